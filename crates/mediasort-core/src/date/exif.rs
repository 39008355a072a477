use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::{In, Reader};

use super::{parse_datetime_tokens, CaptureInstant};

pub const DATE_TIME_ORIGINAL: &str = "DateTimeOriginal";
pub const DATE_TIME: &str = "DateTime";

/// Embedded-metadata decoder: open a file and return its tags by name.
///
/// An image without any metadata block yields an empty map; an error means
/// the file could not be opened or decoded.
pub trait EmbeddedReader: Send + Sync {
    fn read_tags(&self, path: &Path) -> anyhow::Result<HashMap<String, String>>;
}

/// Reads EXIF from JPEG/TIFF/HEIF/PNG/WebP containers.
/// EXIF datetimes have no timezone info - they are local time as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExifReader;

impl EmbeddedReader for ExifReader {
    fn read_tags(&self, path: &Path) -> anyhow::Result<HashMap<String, String>> {
        let mut reader = BufReader::new(File::open(path)?);
        let exif = match Reader::new().read_from_container(&mut reader) {
            Ok(exif) => exif,
            Err(exif::Error::NotFound(_)) => return Ok(HashMap::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(exif
            .fields()
            .filter(|f| f.ifd_num == In::PRIMARY)
            .map(|f| (f.tag.to_string(), f.display_value().to_string()))
            .collect())
    }
}

/// `DateTimeOriginal`, falling back to the generic `DateTime` tag.
pub fn capture_instant(tags: &HashMap<String, String>) -> Option<CaptureInstant> {
    [DATE_TIME_ORIGINAL, DATE_TIME]
        .iter()
        .filter_map(|tag| tags.get(*tag))
        .find_map(|value| parse_datetime_tokens(value))
}
