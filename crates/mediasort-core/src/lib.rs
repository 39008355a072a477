pub mod backups;
pub mod date;
pub mod dedup;
pub mod error;
pub mod folder_classify;
pub mod media;
pub mod plan;
pub mod walker;
pub mod writer;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::date::exif::ExifReader;
use crate::date::tool::{ExifTool, MetadataTool};
use crate::date::{Resolver, Sources};
use crate::error::PlanError;
use crate::plan::Diff;
use crate::walker::{Scheduler, WalkOptions, DEFAULT_CONCURRENCY};
use crate::writer::{Emitter, PlanCommand, PlanWriter, RejectPolicy};

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOptions {
    pub roots: Vec<PathBuf>,
    /// Move files into `YYYY/MM`; otherwise only modification times are corrected.
    #[serde(default)]
    pub do_move: bool,
    /// Allow the heuristic sources (file name, directory, file time, inherited).
    #[serde(default = "default_true")]
    pub pickup: bool,
    /// Apply the plan instead of only printing it.
    #[serde(default)]
    pub execute: bool,
    #[serde(default)]
    pub rejects: RejectPolicy,
    /// Plan file to append to; stdout when absent.
    #[serde(default)]
    pub plan_output: Option<PathBuf>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub exiftool: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub use_exiftool: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            roots: Vec::new(),
            do_move: false,
            pickup: true,
            execute: false,
            rejects: RejectPolicy::default(),
            plan_output: None,
            concurrency: DEFAULT_CONCURRENCY,
            exiftool: None,
            use_exiftool: true,
        }
    }
}

impl ProcessOptions {
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResult {
    pub total_files: u64,
    /// Planned moves into `YYYY/MM`
    pub moves: u64,
    pub retouches: u64,
    /// Resolved files already in place
    pub in_place: u64,
    pub rejected: u64,
    #[serde(default)]
    pub failed_batches: u64,
    pub commands_written: u64,
    #[serde(default)]
    pub commands_executed: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ProcessResult {
    fn tally(&mut self, diffs: &[Diff], do_move: bool) {
        for diff in diffs {
            self.total_files += 1;
            match diff {
                Diff::Valid(m) => {
                    if m.corrected_mtime.is_some() {
                        self.retouches += 1;
                    }
                    if do_move && m.needs_move() {
                        self.moves += 1;
                    } else {
                        self.in_place += 1;
                    }
                }
                Diff::Rejected(_) => self.rejected += 1,
            }
        }
    }
}

/// Type alias for progress callback
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str) + Send + Sync;

/// Throttled progress reporter: emits at most every 200ms or on completion.
pub struct ThrottledProgress<'a> {
    inner: &'a (dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a),
    last_emit: std::sync::Mutex<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a (dyn Fn(&str, u64, u64, &str) + Send + Sync + 'a)) -> Self {
        Self {
            inner,
            last_emit: std::sync::Mutex::new(Instant::now() - std::time::Duration::from_secs(1)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            let Ok(mut last) = self.last_emit.lock() else {
                return;
            };
            if last.elapsed().as_millis() < 200 {
                return;
            }
            *last = Instant::now();
        }
        (self.inner)(stage, current, total, message);
    }
}

/// Canonicalize every root, failing on the first one that is not a directory.
pub fn validate_roots(roots: &[PathBuf]) -> Result<Vec<PathBuf>, PlanError> {
    roots
        .iter()
        .map(|root| {
            if !root.is_dir() {
                return Err(PlanError::NotADirectory(root.clone()));
            }
            root.canonicalize().map_err(|e| PlanError::io(root, e))
        })
        .collect()
}

/// Configured metadata tool, or `exiftool` from `PATH`.
fn metadata_tool(options: &ProcessOptions) -> Option<Arc<dyn MetadataTool>> {
    if !options.use_exiftool {
        return None;
    }
    let tool = match &options.exiftool {
        Some(program) => ExifTool::new(program),
        None => match ExifTool::locate() {
            Some(tool) => tool,
            None => {
                warn!("exiftool not found on PATH, videos fall back to heuristics");
                return None;
            }
        },
    };
    info!(program = ?tool.program(), "using metadata tool");
    Some(Arc::new(tool))
}

/// Plan (and optionally apply) the reorganization of every root.
pub fn process(
    options: &ProcessOptions,
    progress_callback: &(dyn Fn(&str, u64, u64, &str) + Send + Sync + '_),
) -> anyhow::Result<ProcessResult> {
    let roots = validate_roots(&options.roots)?;
    let tp = ThrottledProgress::new(progress_callback);

    let mut sources = Sources::new(Arc::new(ExifReader));
    if let Some(tool) = metadata_tool(options) {
        sources = sources.with_tool(tool);
    }
    let resolver = Resolver::new(sources);

    let mut plan = PlanWriter::open(options.plan_output.as_deref())?;
    let mut result = ProcessResult::default();

    for root in &roots {
        info!(?root, "planning");
        plan.header(root)?;

        let walk_options = WalkOptions {
            root: root.clone(),
            pickup: options.pickup,
            do_move: options.do_move,
        };
        let mut scheduler = Scheduler::new(resolver.clone(), walk_options, options.concurrency)?;
        let mut emitter = Emitter::new(root.clone(), options.do_move, options.rejects);
        let mut pending: Vec<PlanCommand> = Vec::new();

        let report = scheduler.walk(root, None, &tp, &mut |outcome| {
            result.tally(&outcome.diffs, options.do_move);
            let commands = emitter.emit(&outcome.diffs)?;
            plan.write(&commands)?;
            if options.execute {
                pending.extend(commands);
            }
            Ok(())
        })?;

        for failed in &report.failed {
            result
                .warnings
                .push(format!("{}: {}", failed.dir.display(), failed.reason));
        }
        for dir in &report.unreadable_dirs {
            result.warnings.push(format!("{}: unreadable directory", dir.display()));
        }
        result.failed_batches += report.failed.len() as u64;

        if options.execute {
            info!(?root, commands = pending.len(), "executing plan");
            result.commands_executed += writer::execute(&pending)?;
        }
    }

    result.commands_written = plan.lines();
    Ok(result)
}
