use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Failure to resolve a capture instant for a single file.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unsupported file kind: {}", path.display())]
    UnsupportedKind { path: PathBuf },

    #[error("cannot decode metadata of {}: {reason}", path.display())]
    CorruptMedia { path: PathBuf, reason: String },

    /// Batch-level: the metadata tool exited with a failure status.
    #[error("metadata tool failed on {}: {reason}", path.display())]
    ToolFailure { path: PathBuf, reason: String },

    #[error("no usable timestamp source for {}", path.display())]
    Unresolved { path: PathBuf },
}

/// Why a file ended up as a Rejected plan entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("zero size")]
    ZeroSizeFile,
    #[error("unsupported extension")]
    UnsupportedKind,
    #[error("corrupt metadata: {0}")]
    CorruptMedia(String),
    #[error("no timestamp source")]
    Unresolved,
    #[error("unreadable: {0}")]
    Unreadable(String),
}

impl RejectReason {
    /// Per-file resolution errors that become rejects; `ToolFailure` is not one of them.
    pub fn from_resolve(err: &ResolveError) -> Option<Self> {
        match err {
            ResolveError::UnsupportedKind { .. } => Some(Self::UnsupportedKind),
            ResolveError::CorruptMedia { reason, .. } => Some(Self::CorruptMedia(reason.clone())),
            ResolveError::Unresolved { .. } => Some(Self::Unresolved),
            ResolveError::ToolFailure { .. } => None,
        }
    }
}

/// Errors that abort planning for a whole run.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("ABORT: same name but different files from {} to {}", source_path.display(), destination.display())]
    DestinationCollision {
        source_path: PathBuf,
        destination: PathBuf,
    },

    #[error("destination {} is outside root {}", destination.display(), root.display())]
    OutsideRoot { destination: PathBuf, root: PathBuf },

    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PlanError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
