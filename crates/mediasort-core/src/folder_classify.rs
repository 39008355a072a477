use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;

/// Staging subdirectory of a root; files in it are never reprocessed.
pub const STAGING_DIR: &str = "skipped";

static YEAR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{4}$").unwrap());
static MONTH_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{1,2}$").unwrap());

/// `2019` -> Some(2019)
pub fn year_folder(name: &str) -> Option<i32> {
    if !YEAR_RE.is_match(name) {
        return None;
    }
    name.parse().ok()
}

/// `03` -> Some(3)
pub fn month_folder(name: &str) -> Option<u32> {
    if !MONTH_RE.is_match(name) {
        return None;
    }
    name.parse().ok().filter(|m| (1..=12).contains(m))
}

/// Year and month encoded by the two directories enclosing `file`
/// (`.../<year>/<month>/file`).
pub fn year_month_of(file: &Path) -> Option<(i32, u32)> {
    let month_dir = file.parent()?;
    let year_dir = month_dir.parent()?;
    let month = month_folder(month_dir.file_name()?.to_str()?)?;
    let year = year_folder(year_dir.file_name()?.to_str()?)?;
    Some((year, month))
}

/// Whether `path` lives under `<root>/skipped`.
pub fn is_staged(path: &Path, root: &Path) -> bool {
    let Some(rel) = pathdiff::diff_paths(path, root) else {
        return false;
    };
    matches!(
        rel.components().next(),
        Some(Component::Normal(first)) if first == STAGING_DIR
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_year_month_folders() {
        assert_eq!(year_month_of(Path::new("/photos/2019/03/a.jpg")), Some((2019, 3)));
        assert_eq!(year_month_of(Path::new("/photos/2019/3/a.jpg")), Some((2019, 3)));
        assert_eq!(year_month_of(Path::new("/photos/2019/13/a.jpg")), None);
        assert_eq!(year_month_of(Path::new("/photos/Vacation/03/a.jpg")), None);
        assert_eq!(year_month_of(Path::new("a.jpg")), None);
    }

    #[test]
    fn test_staged_paths() {
        let root = Path::new("/photos");
        assert!(is_staged(Path::new("/photos/skipped/a.jpg"), root));
        assert!(is_staged(Path::new("/photos/skipped"), root));
        assert!(!is_staged(Path::new("/photos/2019/skipped/a.jpg"), root));
        assert!(!is_staged(Path::new("/photos/skipped_old/a.jpg"), root));
    }
}
