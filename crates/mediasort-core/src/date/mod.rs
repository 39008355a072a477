pub mod exif;
pub mod guess;
pub mod property;
pub mod tool;

use std::sync::{Arc, LazyLock};

use chrono::{Duration, Local, NaiveDate, NaiveDateTime, Timelike};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::ResolveError;
use crate::media::{MediaFile, MediaKind};

use self::exif::EmbeddedReader;
use self::property::PropertyStore;
use self::tool::MetadataTool;

pub const PREFIX_FMT: &str = "%Y%m%d%H%M%S";
const PREFIX_FMT_MINUTES: &str = "%Y%m%d%H%M";

/// Heuristic candidates older than this (or in the future) are discarded.
pub const PLAUSIBLE_DAYS: i64 = 5 * 365;

static NON_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\D+").unwrap());

/// A capture time with minute precision and optionally known seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct CaptureInstant {
    pub datetime: NaiveDateTime,
    pub has_seconds: bool,
}

impl CaptureInstant {
    pub fn new(datetime: NaiveDateTime) -> Self {
        Self {
            datetime: datetime.with_nanosecond(0).unwrap_or(datetime),
            has_seconds: true,
        }
    }

    pub fn without_seconds(datetime: NaiveDateTime) -> Self {
        Self {
            datetime: datetime
                .with_second(0)
                .and_then(|d| d.with_nanosecond(0))
                .unwrap_or(datetime),
            has_seconds: false,
        }
    }

    /// `YYYY/MM`
    pub fn year_month_path(&self) -> String {
        self.datetime.format("%Y/%m").to_string()
    }

    /// `YYYYMMDDHHMMSS`, or `YYYYMMDDHHMM` when seconds are unknown.
    pub fn compact_prefix(&self) -> String {
        let fmt = if self.has_seconds {
            PREFIX_FMT
        } else {
            PREFIX_FMT_MINUTES
        };
        self.datetime.format(fmt).to_string()
    }
}

/// Parse `YYYY MM DD HH MM [SS]` digit groups separated by any punctuation or
/// whitespace, e.g. `2014:08:22 13:23:30` or `2014-08-22 13:23`.
/// An all-zero date is treated as absent.
pub fn parse_datetime_tokens(text: &str) -> Option<CaptureInstant> {
    let tokens: Vec<u32> = NON_DIGITS
        .split(text.trim())
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<u32>().ok())
        .collect::<Option<_>>()?;
    if tokens.len() < 5 || tokens.iter().take(6).all(|&t| t == 0) {
        return None;
    }
    let year = i32::try_from(tokens[0]).ok()?;
    let date = NaiveDate::from_ymd_opt(year, tokens[1], tokens[2])?;
    match tokens.get(5) {
        Some(&sec) => Some(CaptureInstant::new(date.and_hms_opt(tokens[3], tokens[4], sec)?)),
        None => Some(CaptureInstant::without_seconds(
            date.and_hms_opt(tokens[3], tokens[4], 0)?,
        )),
    }
}

/// Where a resolved capture instant came from, in cascade order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    Embedded,
    PropertyStore,
    ExternalTool,
    FilenameEncoded,
    DirectoryEncoded,
    FilesystemTime,
    Inherited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTimestamp {
    pub instant: CaptureInstant,
    pub source: TimestampSource,
    /// Always `YYYY/MM`
    pub year_month_path: String,
    /// Always a zero-padded `YYYYMMDDHHMM[SS]`
    pub compact_prefix: String,
    /// The current file name already encodes `instant`, so no prefix is added.
    pub name_carries_instant: bool,
}

impl ResolvedTimestamp {
    pub fn new(instant: CaptureInstant, source: TimestampSource) -> Self {
        Self {
            instant,
            source,
            year_month_path: instant.year_month_path(),
            compact_prefix: instant.compact_prefix(),
            name_carries_instant: source == TimestampSource::FilenameEncoded,
        }
    }
}

/// The external collaborators consulted by the resolver.
#[derive(Clone)]
pub struct Sources {
    pub embedded: Arc<dyn EmbeddedReader>,
    pub property_store: Arc<dyn PropertyStore>,
    pub tool: Option<Arc<dyn MetadataTool>>,
}

impl Sources {
    pub fn new(embedded: Arc<dyn EmbeddedReader>) -> Self {
        Self {
            embedded,
            property_store: Arc::new(property::NoPropertyStore),
            tool: None,
        }
    }

    pub fn with_tool(mut self, tool: Arc<dyn MetadataTool>) -> Self {
        self.tool = Some(tool);
        self
    }

    pub fn with_property_store(mut self, store: Arc<dyn PropertyStore>) -> Self {
        self.property_store = store;
        self
    }
}

/// Picks the most trustworthy capture instant for a file.
#[derive(Clone)]
pub struct Resolver {
    sources: Sources,
    now: NaiveDateTime,
}

impl Resolver {
    pub fn new(sources: Sources) -> Self {
        Self::at(sources, Local::now().naive_local())
    }

    /// Resolver with a fixed notion of "now" for the plausibility filter.
    pub fn at(sources: Sources, now: NaiveDateTime) -> Self {
        Self { sources, now }
    }

    pub fn is_plausible(&self, instant: &CaptureInstant) -> bool {
        instant.datetime <= self.now
            && self.now - instant.datetime < Duration::days(PLAUSIBLE_DAYS)
    }

    /// Walk the source cascade; the first source with a usable value wins.
    ///
    /// Heuristic sources (filename, directory, filesystem time, inherited)
    /// are only consulted when `pickup` is set, and all but the inherited
    /// value must pass the plausibility filter.
    pub fn resolve(
        &self,
        file: &MediaFile,
        pickup: bool,
        inherited: Option<CaptureInstant>,
    ) -> Result<ResolvedTimestamp, ResolveError> {
        let path = &file.path;
        if file.kind == MediaKind::Unsupported {
            return Err(ResolveError::UnsupportedKind { path: path.clone() });
        }

        if file.kind == MediaKind::Image {
            let tags = self
                .sources
                .embedded
                .read_tags(path)
                .map_err(|e| ResolveError::CorruptMedia {
                    path: path.clone(),
                    reason: format!("{e:#}"),
                })?;
            if let Some(instant) = exif::capture_instant(&tags) {
                debug!(?path, "resolved from embedded metadata");
                return Ok(ResolvedTimestamp::new(instant, TimestampSource::Embedded));
            }
        }

        if let Some(instant) = self
            .sources
            .property_store
            .date_encoded(path)
            .filter(|i| self.is_plausible(i))
        {
            debug!(?path, "resolved from property store");
            return Ok(ResolvedTimestamp::new(instant, TimestampSource::PropertyStore));
        }

        if let Some(tool) = &self.sources.tool {
            let output = tool.run(path).map_err(|e| ResolveError::ToolFailure {
                path: path.clone(),
                reason: format!("{e:#}"),
            })?;
            if let Some(instant) = tool::parse_create_date(&output) {
                debug!(?path, "resolved from metadata tool");
                return Ok(ResolvedTimestamp::new(instant, TimestampSource::ExternalTool));
            }
        }

        if !pickup {
            return Err(ResolveError::Unresolved { path: path.clone() });
        }

        if let Some(instant) = guess::from_file_name(path).filter(|i| self.is_plausible(i)) {
            debug!(?path, "resolved from file name");
            return Ok(ResolvedTimestamp::new(instant, TimestampSource::FilenameEncoded));
        }

        let (candidate, source) = match guess::from_directory(path, file.modified) {
            Some(instant) => (instant, TimestampSource::DirectoryEncoded),
            None => (CaptureInstant::new(file.modified), TimestampSource::FilesystemTime),
        };
        if self.is_plausible(&candidate) {
            debug!(?path, ?source, "resolved from modification time");
            return Ok(ResolvedTimestamp::new(candidate, source));
        }

        if let Some(instant) = inherited {
            debug!(?path, "inherited timestamp from previous sibling");
            return Ok(ResolvedTimestamp::new(instant, TimestampSource::Inherited));
        }

        Err(ResolveError::Unresolved { path: path.clone() })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    pub(crate) struct FakeTags(pub HashMap<String, String>);

    impl EmbeddedReader for FakeTags {
        fn read_tags(&self, _path: &Path) -> anyhow::Result<HashMap<String, String>> {
            Ok(self.0.clone())
        }
    }

    pub(crate) struct Undecodable;

    impl EmbeddedReader for Undecodable {
        fn read_tags(&self, path: &Path) -> anyhow::Result<HashMap<String, String>> {
            anyhow::bail!("unknown image format in {}", path.display())
        }
    }

    pub(crate) struct FakeTool(pub Result<String, String>);

    impl MetadataTool for FakeTool {
        fn run(&self, _path: &Path) -> anyhow::Result<String> {
            self.0.clone().map_err(anyhow::Error::msg)
        }
    }

    pub(crate) fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn tags(pairs: &[(&str, &str)]) -> Arc<FakeTags> {
        Arc::new(FakeTags(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ))
    }

    fn media(path: &str, modified: &str) -> MediaFile {
        let path = PathBuf::from(path);
        MediaFile {
            kind: MediaKind::from_path(&path),
            path,
            size: 1024,
            modified: dt(modified),
        }
    }

    fn resolver(sources: Sources) -> Resolver {
        Resolver::at(sources, dt("2024-06-01 12:00:00"))
    }

    #[test]
    fn test_parse_tokens() {
        let i = parse_datetime_tokens(" 2014:08:22 13:23:30").unwrap();
        assert_eq!(i.compact_prefix(), "20140822132330");
        assert_eq!(i.year_month_path(), "2014/08");

        let i = parse_datetime_tokens("2014-08-22 13:23").unwrap();
        assert!(!i.has_seconds);
        assert_eq!(i.compact_prefix(), "201408221323");

        assert!(parse_datetime_tokens("0000:00:00 00:00:00").is_none());
        assert!(parse_datetime_tokens("2014:13:22 13:23:30").is_none());
        assert!(parse_datetime_tokens("garbage").is_none());
    }

    #[test]
    fn test_embedded_wins_over_everything() {
        let sources = Sources::new(tags(&[("DateTimeOriginal", "2014-08-22 13:23:30")]))
            .with_tool(Arc::new(FakeTool(Ok("Create Date : 2020:01:01 00:00:00".into()))));
        let file = media("/photos/2024/05/20240101120000_DSC_0016.JPG", "2024-05-01 10:00:00");
        let r = resolver(sources)
            .resolve(&file, true, Some(CaptureInstant::new(dt("2023-01-01 00:00:00"))))
            .unwrap();
        assert_eq!(r.source, TimestampSource::Embedded);
        assert_eq!(r.year_month_path, "2014/08");
        assert_eq!(r.compact_prefix, "20140822132330");
        assert!(!r.name_carries_instant);
    }

    #[test]
    fn test_embedded_falls_back_to_datetime_tag() {
        let sources = Sources::new(tags(&[("DateTime", "2016:03:15 15:00:01"), ("Make", "X")]));
        let file = media("/photos/a.jpg", "2024-05-01 10:00:00");
        let r = resolver(sources).resolve(&file, true, None).unwrap();
        assert_eq!(r.compact_prefix, "20160315150001");
    }

    #[test]
    fn test_tool_fallback_for_image_without_exif() {
        let sources = Sources::new(tags(&[])).with_tool(Arc::new(FakeTool(Ok(
            "File Name                       : f2269376.jpg\n\
             Create Date                     : 2019:03:25 16:10:19\n"
                .into(),
        ))));
        let file = media("/photos/f2269376.jpg", "2024-05-01 10:00:00");
        let r = resolver(sources).resolve(&file, true, None).unwrap();
        assert_eq!(r.source, TimestampSource::ExternalTool);
        assert_eq!(r.year_month_path, "2019/03");
        assert_eq!(r.compact_prefix, "20190325161019");
    }

    #[test]
    fn test_zero_create_date_is_unavailable() {
        let sources = Sources::new(tags(&[])).with_tool(Arc::new(FakeTool(Ok(
            "Create Date : 0000:00:00 00:00:00\n".into(),
        ))));
        let file = media("/photos/clip.mp4", "2024-05-01 10:00:00");
        let r = resolver(sources).resolve(&file, true, None).unwrap();
        assert_eq!(r.source, TimestampSource::FilesystemTime);
        assert_eq!(r.compact_prefix, "20240501100000");
    }

    #[test]
    fn test_filename_digits_verbatim() {
        let file = media("/photos/IMG_20240315_101112.jpg", "2024-05-01 10:00:00");
        let r = resolver(Sources::new(tags(&[]))).resolve(&file, true, None).unwrap();
        assert_eq!(r.source, TimestampSource::FilenameEncoded);
        assert_eq!(r.compact_prefix, "20240315101112");
        assert!(r.name_carries_instant);
    }

    #[test]
    fn test_plausibility_filter() {
        let res = resolver(Sources::new(tags(&[])));
        // Too old: falls through to the (plausible) modification time.
        let old = media("/photos/IMG_20100315_101112.jpg", "2024-05-01 10:00:00");
        assert_eq!(
            res.resolve(&old, true, None).unwrap().source,
            TimestampSource::FilesystemTime
        );
        // In the future.
        let future = media("/photos/IMG_20250315_101112.jpg", "2024-05-01 10:00:00");
        assert_eq!(
            res.resolve(&future, true, None).unwrap().compact_prefix,
            "20240501100000"
        );
    }

    #[test]
    fn test_directory_overrides_year_and_month() {
        let file = media("/photos/2023/07/clip.mp4", "2024-02-10 14:05:00");
        let r = resolver(Sources::new(tags(&[]))).resolve(&file, true, None).unwrap();
        assert_eq!(r.source, TimestampSource::DirectoryEncoded);
        assert_eq!(r.compact_prefix, "20230710140500");
    }

    #[test]
    fn test_inherited_when_nothing_else() {
        let file = media("/photos/clip.mp4", "2001-01-01 00:00:00");
        let prev = CaptureInstant::new(dt("2024-04-04 04:04:04"));
        let res = resolver(Sources::new(tags(&[])));
        let r = res.resolve(&file, true, Some(prev)).unwrap();
        assert_eq!(r.source, TimestampSource::Inherited);
        assert_eq!(r.instant, prev);

        assert!(matches!(
            res.resolve(&file, true, None),
            Err(ResolveError::Unresolved { .. })
        ));
    }

    #[test]
    fn test_no_pickup_skips_heuristics() {
        let file = media("/photos/IMG_20240315_101112.jpg", "2024-05-01 10:00:00");
        let res = resolver(Sources::new(tags(&[])));
        let prev = CaptureInstant::new(dt("2024-04-04 04:04:04"));
        assert!(matches!(
            res.resolve(&file, false, Some(prev)),
            Err(ResolveError::Unresolved { .. })
        ));
    }

    #[test]
    fn test_hard_errors() {
        let file = media("/photos/broken.jpg", "2024-05-01 10:00:00");
        let res = resolver(Sources::new(Arc::new(Undecodable)));
        assert!(matches!(
            res.resolve(&file, true, None),
            Err(ResolveError::CorruptMedia { .. })
        ));

        let clip = media("/photos/clip.mov", "2024-05-01 10:00:00");
        let res = resolver(
            Sources::new(tags(&[])).with_tool(Arc::new(FakeTool(Err("exit status 1".into())))),
        );
        assert!(matches!(
            res.resolve(&clip, true, None),
            Err(ResolveError::ToolFailure { .. })
        ));

        let txt = media("/photos/notes.txt", "2024-05-01 10:00:00");
        assert!(matches!(
            res.resolve(&txt, true, None),
            Err(ResolveError::UnsupportedKind { .. })
        ));
    }
}
