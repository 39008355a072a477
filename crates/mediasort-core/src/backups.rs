use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use crate::writer::PlanCommand;
use crate::ThrottledProgress;

pub const BACKUP_SUFFIX: char = '~';

/// What to do with one `name~` backup file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BackupAction {
    /// Same non-zero size as the original: the backup is redundant.
    Discard { backup: PathBuf, bytes: u64 },
    /// Sizes differ; left alone for a human to look at.
    SizeMismatch {
        backup: PathBuf,
        backup_size: u64,
        original_size: u64,
    },
    /// The original is gone: rename the backup back.
    Restore { backup: PathBuf, original: PathBuf },
}

impl BackupAction {
    pub fn command(&self) -> PlanCommand {
        match self {
            Self::Discard { backup, .. } => PlanCommand::Remove(backup.clone()),
            Self::SizeMismatch {
                backup,
                backup_size,
                original_size,
            } => PlanCommand::Comment(format!(
                "backup differs in size: {} ({backup_size} != {original_size})",
                backup.display()
            )),
            Self::Restore { backup, original } => PlanCommand::Move {
                from: backup.clone(),
                to: original.clone(),
            },
        }
    }
}

/// Classify every `name~` file directly inside `dir`.
pub fn sweep_dir(dir: &Path) -> io::Result<Vec<BackupAction>> {
    let mut backups: Vec<PathBuf> = fs::read_dir(dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.len() > 1 && n.ends_with(BACKUP_SUFFIX))
        })
        .collect();
    backups.sort();

    let mut actions = Vec::with_capacity(backups.len());
    for backup in backups {
        let Some(name) = backup.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // One level only: `a.jpg~~` is the backup of `a.jpg~`.
        let original = backup.with_file_name(&name[..name.len() - BACKUP_SUFFIX.len_utf8()]);

        if !original.is_file() {
            actions.push(BackupAction::Restore { backup, original });
            continue;
        }
        let original_size = fs::metadata(&original)?.len();
        let backup_size = fs::metadata(&backup)?.len();
        if original_size > 0 && original_size == backup_size {
            actions.push(BackupAction::Discard {
                backup,
                bytes: original_size,
            });
        } else {
            actions.push(BackupAction::SizeMismatch {
                backup,
                backup_size,
                original_size,
            });
        }
    }
    Ok(actions)
}

fn collect_dirs(dir: &Path, out: &mut Vec<PathBuf>) {
    out.push(dir.to_path_buf());
    let Ok(entries) = fs::read_dir(dir) else {
        warn!(?dir, "cannot read directory");
        return;
    };
    let mut subdirs: Vec<PathBuf> = entries
        .flatten()
        .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
        .map(|e| e.path())
        .collect();
    subdirs.sort();
    for sub in subdirs {
        collect_dirs(&sub, out);
    }
}

/// Sweep every directory below `root` in parallel. Results keep directory order.
pub fn plan_sweep(root: &Path, progress: &ThrottledProgress) -> Vec<BackupAction> {
    let mut dirs = Vec::new();
    collect_dirs(root, &mut dirs);

    let total = dirs.len() as u64;
    let counter = AtomicU64::new(0);
    let actions: Vec<BackupAction> = dirs
        .par_iter()
        .flat_map_iter(|dir| {
            let current = counter.fetch_add(1, Ordering::Relaxed);
            progress.report("backups", current, total, &dir.to_string_lossy());
            match sweep_dir(dir) {
                Ok(actions) => actions,
                Err(e) => {
                    warn!(?dir, error = %e, "backup sweep failed");
                    Vec::new()
                }
            }
        })
        .collect();

    let reclaimed: u64 = actions
        .iter()
        .map(|a| match a {
            BackupAction::Discard { bytes, .. } => *bytes,
            _ => 0,
        })
        .sum();
    info!(
        actions = actions.len(),
        reclaimed_mb = reclaimed as f64 / 1024.0 / 1024.0,
        "backup sweep planned"
    );
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_dir_classifies() {
        let dir = tempfile::tempdir().unwrap();
        let d = dir.path();
        fs::write(d.join("a.jpg"), b"same").unwrap();
        fs::write(d.join("a.jpg~"), b"same").unwrap();
        fs::write(d.join("b.jpg"), b"short").unwrap();
        fs::write(d.join("b.jpg~"), b"longer backup").unwrap();
        fs::write(d.join("c.jpg~"), b"orphan").unwrap();
        fs::write(d.join("empty.jpg"), b"").unwrap();
        fs::write(d.join("empty.jpg~"), b"").unwrap();
        fs::write(d.join("~"), b"odd").unwrap();

        let actions = sweep_dir(d).unwrap();
        assert_eq!(
            actions,
            vec![
                BackupAction::Discard {
                    backup: d.join("a.jpg~"),
                    bytes: 4
                },
                BackupAction::SizeMismatch {
                    backup: d.join("b.jpg~"),
                    backup_size: 13,
                    original_size: 5
                },
                BackupAction::Restore {
                    backup: d.join("c.jpg~"),
                    original: d.join("c.jpg")
                },
                BackupAction::SizeMismatch {
                    backup: d.join("empty.jpg~"),
                    backup_size: 0,
                    original_size: 0
                },
            ]
        );
    }

    #[test]
    fn test_commands_and_parallel_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for sub in ["2019/03", "2020/01", "misc"] {
            fs::create_dir_all(root.join(sub)).unwrap();
        }
        fs::write(root.join("2019/03/x.jpg"), b"x").unwrap();
        fs::write(root.join("2019/03/x.jpg~"), b"x").unwrap();
        fs::write(root.join("misc/y.mp4~"), b"y").unwrap();

        let noop = |_: &str, _: u64, _: u64, _: &str| {};
        let actions = plan_sweep(root, &ThrottledProgress::new(&noop));
        let commands: Vec<PlanCommand> = actions.iter().map(BackupAction::command).collect();
        assert_eq!(
            commands,
            vec![
                PlanCommand::Remove(root.join("2019/03/x.jpg~")),
                PlanCommand::Move {
                    from: root.join("misc/y.mp4~"),
                    to: root.join("misc/y.mp4"),
                },
            ]
        );

        crate::writer::execute(&commands).unwrap();
        assert!(!root.join("2019/03/x.jpg~").exists());
        assert!(root.join("misc/y.mp4").is_file());
    }
}
