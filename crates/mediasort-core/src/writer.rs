use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::PlanError;
use crate::folder_classify::{self, STAGING_DIR};
use crate::plan::{ensure_overwrite_safe, Diff, PlannedMove, Rejection};

/// What to do with files that could not be classified.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RejectPolicy {
    /// List them in the plan as comments
    #[default]
    Report,
    /// Delete them
    Remove,
    /// Move them to `<root>/skipped/`
    Stage,
}

/// One line of the plan output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanCommand {
    MakeDir(PathBuf),
    Move { from: PathBuf, to: PathBuf },
    Touch { path: PathBuf, mtime: NaiveDateTime },
    Remove(PathBuf),
    /// Reviewer-facing note, never executed
    Comment(String),
}

fn quote(path: &Path) -> String {
    format!("'{}'", path.to_string_lossy().replace('\'', r"'\''"))
}

impl fmt::Display for PlanCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MakeDir(dir) => write!(f, "mkdir -p {}", quote(dir)),
            Self::Move { from, to } => write!(f, "mv -f {} {}", quote(from), quote(to)),
            Self::Touch { path, mtime } => {
                write!(f, "touch -m -t {} {}", mtime.format("%Y%m%d%H%M.%S"), quote(path))
            }
            Self::Remove(path) => write!(f, "rm -f {}", quote(path)),
            Self::Comment(text) => write!(f, "# {}", text.replace('\n', " ")),
        }
    }
}

impl PlanCommand {
    /// Perform the command against the filesystem.
    pub fn apply(&self) -> io::Result<()> {
        match self {
            Self::MakeDir(dir) => fs::create_dir_all(dir),
            Self::Move { from, to } => move_file(from, to),
            Self::Touch { path, mtime } => set_mtime(path, mtime),
            Self::Remove(path) => match fs::remove_file(path) {
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
            Self::Comment(_) => Ok(()),
        }
    }
}

fn set_mtime(path: &Path, mtime: &NaiveDateTime) -> io::Result<()> {
    // NaiveDateTime is local time; convert back to UTC epoch for mtime
    let Some(local) = mtime.and_local_timezone(chrono::Local).earliest() else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{mtime} does not exist in the local timezone"),
        ));
    };
    filetime::set_file_mtime(path, filetime::FileTime::from_unix_time(local.timestamp(), 0))
}

/// Rename, falling back to copy + remove across filesystems.
fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    let meta = fs::metadata(from)?;
    fs::copy(from, to)?;
    filetime::set_file_mtime(to, filetime::FileTime::from_last_modification_time(&meta))?;
    fs::remove_file(from)
}

/// Turns Diffs into commands for one root.
///
/// Directory creation is emitted once per directory, and destinations
/// claimed earlier in the run go through the same overwrite check as files
/// already on disk.
#[derive(Debug)]
pub struct Emitter {
    root: PathBuf,
    do_move: bool,
    rejects: RejectPolicy,
    created_dirs: HashSet<PathBuf>,
    claimed: HashMap<PathBuf, PathBuf>,
}

impl Emitter {
    pub fn new(root: impl Into<PathBuf>, do_move: bool, rejects: RejectPolicy) -> Self {
        Self {
            root: root.into(),
            do_move,
            rejects,
            created_dirs: HashSet::new(),
            claimed: HashMap::new(),
        }
    }

    pub fn emit(&mut self, diffs: &[Diff]) -> Result<Vec<PlanCommand>, PlanError> {
        let mut out = Vec::new();
        for diff in diffs {
            match diff {
                Diff::Valid(m) => self.emit_valid(m, &mut out)?,
                Diff::Rejected(r) => self.emit_rejected(r, &mut out),
            }
        }
        Ok(out)
    }

    fn emit_valid(&mut self, m: &PlannedMove, out: &mut Vec<PlanCommand>) -> Result<(), PlanError> {
        if let Some(mtime) = m.corrected_mtime {
            out.push(PlanCommand::Touch {
                path: m.source.clone(),
                mtime,
            });
        }
        if !self.do_move || !m.needs_move() {
            return Ok(());
        }

        if let Some(earlier) = self.claimed.get(&m.destination) {
            if earlier != &m.source {
                ensure_overwrite_safe(&m.source, earlier, &m.destination)?;
                debug!(destination = ?m.destination, "destination claimed twice, later move wins");
            }
        }
        self.claimed.insert(m.destination.clone(), m.source.clone());

        self.make_parent(&m.destination, out);
        out.push(PlanCommand::Move {
            from: m.source.clone(),
            to: m.destination.clone(),
        });
        Ok(())
    }

    fn emit_rejected(&mut self, r: &Rejection, out: &mut Vec<PlanCommand>) {
        match self.rejects {
            RejectPolicy::Report => {
                out.push(PlanCommand::Comment(format!(
                    "rejected: {} ({})",
                    r.source.display(),
                    r.reason
                )));
            }
            RejectPolicy::Remove => out.push(PlanCommand::Remove(r.source.clone())),
            RejectPolicy::Stage => {
                if folder_classify::is_staged(&r.source, &self.root) {
                    return;
                }
                let Some(to) = self.staging_target(&r.source) else {
                    return;
                };
                self.claimed.insert(to.clone(), r.source.clone());
                self.make_parent(&to, out);
                out.push(PlanCommand::Move {
                    from: r.source.clone(),
                    to,
                });
            }
        }
    }

    /// `<root>/skipped/<name>`, or `<name>~N` when that name is already on
    /// disk or claimed earlier in the run.
    fn staging_target(&self, source: &Path) -> Option<PathBuf> {
        let name = source.file_name()?;
        let dir = self.root.join(STAGING_DIR);
        let taken = |p: &Path| self.claimed.contains_key(p) || p.exists();

        let plain = dir.join(name);
        if !taken(&plain) {
            return Some(plain);
        }
        (1u32..)
            .map(|n| {
                let mut numbered = name.to_os_string();
                numbered.push(format!("~{n}"));
                dir.join(numbered)
            })
            .find(|p| !taken(p))
    }

    fn make_parent(&mut self, path: &Path, out: &mut Vec<PlanCommand>) {
        let Some(dir) = path.parent() else {
            return;
        };
        if self.created_dirs.insert(dir.to_path_buf()) && !dir.is_dir() {
            out.push(PlanCommand::MakeDir(dir.to_path_buf()));
        }
    }
}

/// Append-only plan output, one command per line.
pub struct PlanWriter<W: Write> {
    out: W,
    lines: u64,
}

impl PlanWriter<Box<dyn Write>> {
    /// Append to `path`, or write to stdout when there is none.
    pub fn open(path: Option<&Path>) -> io::Result<Self> {
        let out: Box<dyn Write> = match path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Box::new(BufWriter::new(file))
            }
            None => Box::new(io::stdout()),
        };
        Ok(Self::new(out))
    }
}

impl<W: Write> PlanWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, lines: 0 }
    }

    pub fn header(&mut self, root: &Path) -> io::Result<()> {
        writeln!(
            self.out,
            "# mediasort plan for {} ({})",
            root.display(),
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        )
    }

    /// Write and flush, so an aborted run leaves everything emitted so far.
    pub fn write(&mut self, commands: &[PlanCommand]) -> io::Result<()> {
        for cmd in commands {
            writeln!(self.out, "{cmd}")?;
            self.lines += 1;
        }
        self.out.flush()
    }

    pub fn lines(&self) -> u64 {
        self.lines
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Apply commands in order; stops at the first failure.
pub fn execute(commands: &[PlanCommand]) -> anyhow::Result<u64> {
    let mut applied = 0;
    for cmd in commands {
        if let PlanCommand::Comment(_) = cmd {
            continue;
        }
        cmd.apply().map_err(|e| {
            warn!(command = %cmd, error = %e, "command failed");
            anyhow::anyhow!("{cmd}: {e}")
        })?;
        applied += 1;
    }
    Ok(applied)
}
