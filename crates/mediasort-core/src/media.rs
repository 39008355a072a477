use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;

/// Extensions the embedded-metadata decoder understands.
const EXIF_IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "tif", "tiff", "heic", "heif", "png", "webp", "avif",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    /// Video or other timed media (audio included) handled by the metadata tool.
    Video,
    Unsupported,
}

impl MediaKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if ext.is_empty() {
            return Self::Unsupported;
        }
        if EXIF_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Self::Image;
        }
        match mime_guess::from_ext(&ext).first() {
            Some(mime)
                if mime.type_() == mime_guess::mime::VIDEO
                    || mime.type_() == mime_guess::mime::AUDIO =>
            {
                Self::Video
            }
            _ => Self::Unsupported,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaFile {
    /// Absolute path on disk
    pub path: PathBuf,
    pub kind: MediaKind,
    /// File size in bytes
    pub size: u64,
    /// On-disk modification time, local wall clock
    pub modified: NaiveDateTime,
}

impl MediaFile {
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let meta = fs::metadata(path)?;
        let modified: DateTime<Local> = meta.modified()?.into();
        Ok(Self {
            path: path.to_path_buf(),
            kind: MediaKind::from_path(path),
            size: meta.len(),
            modified: modified.naive_local(),
        })
    }

    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_extension() {
        assert_eq!(MediaKind::from_path(Path::new("a/IMG_0001.JPG")), MediaKind::Image);
        assert_eq!(MediaKind::from_path(Path::new("clip.mp4")), MediaKind::Video);
        assert_eq!(MediaKind::from_path(Path::new("clip.MOV")), MediaKind::Video);
        assert_eq!(MediaKind::from_path(Path::new("song.mp3")), MediaKind::Video);
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), MediaKind::Unsupported);
        assert_eq!(MediaKind::from_path(Path::new("README")), MediaKind::Unsupported);
    }
}
