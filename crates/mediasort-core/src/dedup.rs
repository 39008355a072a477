use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::writer::PlanCommand;
use crate::ThrottledProgress;

/// SHA-256 of a file's contents, hex encoded.
pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// One line of a hash log: `<hash>\t<relative name>`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct HashEntry {
    pub hash: String,
    pub name: String,
}

/// Names sharing one content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub hash: String,
    /// Sorted
    pub names: Vec<String>,
}

impl DuplicateGroup {
    /// The longest (most descriptive) name; ties go to the first in sort order.
    pub fn keeper(&self) -> &str {
        self.names
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| a.len().cmp(&b.len()).then(ib.cmp(ia)))
            .map(|(_, n)| n.as_str())
            .unwrap_or("")
    }

    /// Every name except the keeper.
    pub fn removals(&self) -> Vec<&str> {
        let keep = self.keeper();
        let mut kept = false;
        self.names
            .iter()
            .map(String::as_str)
            .filter(|n| {
                if !kept && *n == keep {
                    kept = true;
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}

/// Split on the first tab, or the first whitespace run when there is none.
pub fn parse_log_line(line: &str) -> Option<HashEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (hash, name) = match line.split_once('\t') {
        Some(pair) => pair,
        None => line.trim_start().split_once(char::is_whitespace)?,
    };
    let (hash, name) = (hash.trim(), name.trim_start());
    if hash.is_empty() || name.is_empty() {
        return None;
    }
    Some(HashEntry {
        hash: hash.to_string(),
        name: name.to_string(),
    })
}

/// Sort the log and group adjacent equal hashes; singletons are dropped.
/// Repeated lines (logs appended across runs) count once.
pub fn group_hash_log(text: &str) -> Vec<DuplicateGroup> {
    let mut entries: Vec<HashEntry> = text.lines().filter_map(parse_log_line).collect();
    entries.sort();
    entries.dedup();

    let mut groups = Vec::new();
    for chunk in entries.chunk_by(|a, b| a.hash == b.hash) {
        if chunk.len() > 1 {
            groups.push(DuplicateGroup {
                hash: chunk[0].hash.clone(),
                names: chunk.iter().map(|e| e.name.clone()).collect(),
            });
        }
    }
    groups
}

/// `rm` for every flagged name, resolved against the log's directory.
pub fn removal_commands(groups: &[DuplicateGroup], base_dir: &Path) -> Vec<PlanCommand> {
    groups
        .iter()
        .flat_map(|g| g.removals())
        .map(|name| PlanCommand::Remove(base_dir.join(name)))
        .collect()
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.flatten().map(|e| e.path()).collect();
    entries.sort();
    for path in entries {
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Hash every file below `root` in parallel. Names are relative to `root`
/// with `/` separators; unreadable files are logged and left out.
pub fn build_hash_log(root: &Path, progress: &ThrottledProgress) -> anyhow::Result<Vec<HashEntry>> {
    let mut files = Vec::new();
    collect_files(root, &mut files)?;

    let total = files.len() as u64;
    let counter = AtomicU64::new(0);
    let mut entries: Vec<HashEntry> = files
        .par_iter()
        .filter_map(|path| {
            let current = counter.fetch_add(1, Ordering::Relaxed);
            progress.report("hash", current, total, "Hashing files");
            let hash = match hash_file(path) {
                Ok(h) => h,
                Err(e) => {
                    warn!(?path, error = %e, "cannot hash file");
                    return None;
                }
            };
            let rel = pathdiff::diff_paths(path, root)?;
            Some(HashEntry {
                hash,
                name: rel.to_string_lossy().replace('\\', "/"),
            })
        })
        .collect();
    entries.sort();
    Ok(entries)
}

pub fn write_hash_log(entries: &[HashEntry], out: &mut dyn Write) -> io::Result<()> {
    for e in entries {
        writeln!(out, "{}\t{}", e.hash, e.name)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_adjacent_hashes() {
        let groups = group_hash_log("h2 name_c\nh1 name_b\nh1 name_a\n");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].hash, "h1");
        assert_eq!(groups[0].names, vec!["name_a", "name_b"]);
        assert_eq!(groups[0].removals().len(), 1);

        let cmds = removal_commands(&groups, Path::new("/logs"));
        assert_eq!(cmds, vec![PlanCommand::Remove(PathBuf::from("/logs/name_b"))]);
    }

    #[test]
    fn test_repeated_lines_never_remove_the_only_copy() {
        let groups = group_hash_log("h1\tonly.jpg\nh1\tonly.jpg\n");
        assert!(groups.is_empty());
        assert!(removal_commands(&groups, Path::new("/logs")).is_empty());

        let groups = group_hash_log("h1\ta.jpg\nh1\tb copy.jpg\nh1\ta.jpg\nh1\tb copy.jpg\n");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].keeper(), "b copy.jpg");
        assert_eq!(
            removal_commands(&groups, Path::new("/logs")),
            vec![PlanCommand::Remove(PathBuf::from("/logs/a.jpg"))]
        );
    }

    #[test]
    fn test_keeper_is_longest_name() {
        let groups = group_hash_log(
            "aa\tIMG_0001.jpg\n\
             aa\tIMG_0001 (holiday copy).jpg\n\
             aa\tx.jpg\n\
             bb\tsolo.jpg\n",
        );
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].keeper(), "IMG_0001 (holiday copy).jpg");
        assert_eq!(groups[0].removals(), vec!["IMG_0001.jpg", "x.jpg"]);
    }

    #[test]
    fn test_parse_log_line() {
        let e = parse_log_line("abc\tdir/with space.jpg\r\n").unwrap();
        assert_eq!(e.name, "dir/with space.jpg");
        let e = parse_log_line("abc   plain.jpg").unwrap();
        assert_eq!((e.hash.as_str(), e.name.as_str()), ("abc", "plain.jpg"));
        assert!(parse_log_line("lonely").is_none());
        assert!(parse_log_line("").is_none());
    }

    #[test]
    fn test_build_hash_log() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.jpg"), b"same").unwrap();
        fs::write(dir.path().join("sub/b.jpg"), b"same").unwrap();
        fs::write(dir.path().join("c.jpg"), b"other").unwrap();

        let noop = |_: &str, _: u64, _: u64, _: &str| {};
        let entries = build_hash_log(dir.path(), &ThrottledProgress::new(&noop)).unwrap();
        assert_eq!(entries.len(), 3);

        let mut log = Vec::new();
        write_hash_log(&entries, &mut log).unwrap();
        let groups = group_hash_log(&String::from_utf8(log).unwrap());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].names, vec!["a.jpg", "sub/b.jpg"]);
        assert_eq!(groups[0].keeper(), "sub/b.jpg");
    }
}
