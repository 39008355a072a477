use std::ops::Range;
use std::path::Path;

use chrono::{Datelike, NaiveDate, NaiveDateTime};

use super::{CaptureInstant, NON_DIGITS};
use crate::folder_classify;

/// Interpret the digits of a file name positionally as `YYYYMMDDHHMM[SS]`.
///
/// All non-digits are dropped first, so `IMG_20190325_161019.mp4` and
/// `2019-03-25 16.10.19.jpg` both yield `20190325161019`. Fewer than twelve
/// digits, or any out-of-range field, means no date.
pub fn from_file_name(path: &Path) -> Option<CaptureInstant> {
    let stem = path.file_stem()?.to_str()?;
    let digits = NON_DIGITS.replace_all(stem, "");

    let num = |range: Range<usize>| digits.get(range)?.parse::<u32>().ok();
    let year = i32::try_from(num(0..4)?).ok()?;
    let date = NaiveDate::from_ymd_opt(year, num(4..6)?, num(6..8)?)?;
    let (hour, minute) = (num(8..10)?, num(10..12)?);

    if digits.len() >= 14 {
        Some(CaptureInstant::new(date.and_hms_opt(hour, minute, num(12..14)?)?))
    } else {
        Some(CaptureInstant::without_seconds(date.and_hms_opt(hour, minute, 0)?))
    }
}

/// Year/month from the two enclosing directories, applied to `modified`.
///
/// Only used when the modification time disagrees with both the directory
/// year and the directory month; the day is clamped to the target month.
pub fn from_directory(path: &Path, modified: NaiveDateTime) -> Option<CaptureInstant> {
    let (year, month) = folder_classify::year_month_of(path)?;
    if modified.year() == year || modified.month() == month {
        return None;
    }
    let last_day = (28..=31)
        .rev()
        .find(|&d| NaiveDate::from_ymd_opt(year, month, d).is_some())?;
    let date = NaiveDate::from_ymd_opt(year, month, modified.day().min(last_day))?;
    Some(CaptureInstant::new(date.and_time(modified.time())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefix(name: &str) -> Option<String> {
        from_file_name(Path::new(name)).map(|i| i.compact_prefix())
    }

    #[test]
    fn test_guess_patterns() {
        assert_eq!(prefix("Screenshot_20190919-053857.jpg").as_deref(), Some("20190919053857"));
        assert_eq!(prefix("IMG_20190509_154733.jpg").as_deref(), Some("20190509154733"));
        assert_eq!(prefix("signal-2020-10-26-163832.jpg").as_deref(), Some("20201026163832"));
        assert_eq!(prefix("2016_01_30_11_49_15.mp4").as_deref(), Some("20160130114915"));
        assert_eq!(prefix("VID_201601301149.mp4").as_deref(), Some("201601301149"));
        assert_eq!(prefix("20140822132330_DSC_0016.JPG").as_deref(), Some("20140822132330"));
    }

    #[test]
    fn test_guess_rejects() {
        assert!(prefix("random_photo.jpg").is_none());
        assert!(prefix("f2269376.jpg").is_none());
        assert!(prefix("IMG_20191309_154733.jpg").is_none());
        assert!(prefix("DSC_0016.JPG").is_none());
    }

    #[test]
    fn test_directory_override() {
        let modified = NaiveDateTime::parse_from_str("2024-03-31 08:30:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let i = from_directory(Path::new("/p/2023/02/clip.mp4"), modified).unwrap();
        assert_eq!(i.compact_prefix(), "20230228083000");

        // Same year: left to the modification time.
        assert!(from_directory(Path::new("/p/2024/02/clip.mp4"), modified).is_none());
        // Same month.
        assert!(from_directory(Path::new("/p/2023/03/clip.mp4"), modified).is_none());
        assert!(from_directory(Path::new("/p/holiday/02/clip.mp4"), modified).is_none());
    }
}
