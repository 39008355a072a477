use std::path::Path;

use super::CaptureInstant;

/// OS-level file-property store queried for a "date encoded" value.
///
/// A missing property or a platform error both mean "unavailable".
pub trait PropertyStore: Send + Sync {
    fn date_encoded(&self, path: &Path) -> Option<CaptureInstant>;
}

/// Platforms without a property store.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPropertyStore;

impl PropertyStore for NoPropertyStore {
    fn date_encoded(&self, _path: &Path) -> Option<CaptureInstant> {
        None
    }
}
