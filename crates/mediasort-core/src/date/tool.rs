use std::path::{Path, PathBuf};
use std::process::Command;

use encoding_rs::SHIFT_JIS;

use super::{parse_datetime_tokens, CaptureInstant};

pub const CREATE_DATE_LABEL: &str = "Create Date";

/// External metadata-extraction utility, run once per file.
///
/// Returns the tool's standard output. A non-zero exit is an error.
pub trait MetadataTool: Send + Sync {
    fn run(&self, path: &Path) -> anyhow::Result<String>;
}

/// `exiftool <file>` with its default human-readable output.
#[derive(Debug, Clone)]
pub struct ExifTool {
    program: PathBuf,
}

impl ExifTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Find `exiftool` on `PATH`.
    pub fn locate() -> Option<Self> {
        which::which("exiftool").ok().map(Self::new)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl MetadataTool for ExifTool {
    fn run(&self, path: &Path) -> anyhow::Result<String> {
        let output = Command::new(&self.program).arg(path).output()?;
        if !output.status.success() {
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                decode_output(&output.stderr).trim()
            );
        }
        Ok(decode_output(&output.stdout))
    }
}

/// Decode tool output, trying UTF-8 first, then Shift_JIS
fn decode_output(raw: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(raw) {
        return s.to_string();
    }

    let (decoded, _, had_errors) = SHIFT_JIS.decode(raw);
    if !had_errors {
        return decoded.into_owned();
    }

    String::from_utf8_lossy(raw).into_owned()
}

/// Find the first `Create Date` line and parse what follows its first colon.
pub fn parse_create_date(stdout: &str) -> Option<CaptureInstant> {
    let line = stdout.lines().find(|l| l.contains(CREATE_DATE_LABEL))?;
    let (_, value) = line.split_once(':')?;
    parse_datetime_tokens(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_date() {
        let out = "ExifTool Version Number         : 12.40\n\
                   File Name                       : clip.mp4\n\
                   Create Date                     : 2019:03:25 16:10:19\n\
                   Modify Date                     : 2019:03:25 16:11:00\n";
        assert_eq!(parse_create_date(out).unwrap().compact_prefix(), "20190325161019");
    }

    #[test]
    fn test_parse_create_date_first_match_wins() {
        let out = "Create Date : 2021:07:04 09:08:07+02:00\n\
                   Media Create Date : 2020:01:01 00:00:00\n";
        assert_eq!(parse_create_date(out).unwrap().compact_prefix(), "20210704090807");
    }

    #[test]
    fn test_parse_create_date_missing_or_zero() {
        assert!(parse_create_date("File Name : clip.mp4\n").is_none());
        assert!(parse_create_date("Create Date : 0000:00:00 00:00:00\n").is_none());
    }

    #[test]
    fn test_decode_output_fallback() {
        assert_eq!(decode_output(b"Create Date : x"), "Create Date : x");
        let (sjis, _, _) = SHIFT_JIS.encode("写真");
        assert!(std::str::from_utf8(&sjis).is_err());
        assert_eq!(decode_output(&sjis), "写真");
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_failure() {
        let tool = ExifTool::new("false");
        assert!(tool.run(Path::new("/nonexistent.mp4")).is_err());
    }
}
