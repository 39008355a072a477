use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::date::{CaptureInstant, Resolver};
use crate::error::{PlanError, RejectReason, ResolveError};
use crate::folder_classify;
use crate::media::{MediaFile, MediaKind};
use crate::plan::{build_diff, check_collision, Diff};
use crate::ThrottledProgress;

/// Default bound on concurrently processed directory batches.
pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub root: PathBuf,
    pub pickup: bool,
    pub do_move: bool,
}

/// The files of one directory, in name order, plus the instant inherited
/// from the enclosing directory's batch.
#[derive(Debug, Clone)]
pub struct DirectoryBatch {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
    pub seed: Option<CaptureInstant>,
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub dir: PathBuf,
    pub diffs: Vec<Diff>,
    /// First instant resolved in this batch, seed for its subdirectories
    pub first_resolved: Option<CaptureInstant>,
}

#[derive(Debug, Error)]
pub enum BatchError {
    /// Aborts this batch only.
    #[error(transparent)]
    Tool(ResolveError),
    /// Aborts the run.
    #[error(transparent)]
    Fatal(PlanError),
    #[error("worker panicked while processing {}", .0.display())]
    Panicked(PathBuf),
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedBatch {
    pub dir: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct WalkReport {
    pub batches: u64,
    pub failed: Vec<FailedBatch>,
    pub unreadable_dirs: Vec<PathBuf>,
}

/// Resolve and plan every file of a batch, strictly in order, so each file
/// can inherit the instant of the last resolved sibling.
pub fn process_batch(
    batch: &DirectoryBatch,
    resolver: &Resolver,
    options: &WalkOptions,
) -> Result<BatchOutcome, BatchError> {
    let mut diffs = Vec::with_capacity(batch.files.len());
    let mut last = batch.seed;
    let mut first_resolved = None;

    for path in &batch.files {
        let file = match MediaFile::read(path) {
            Ok(f) => f,
            Err(e) => {
                warn!(?path, error = %e, "cannot stat file");
                diffs.push(Diff::rejected(path, RejectReason::Unreadable(e.to_string())));
                continue;
            }
        };
        if file.size == 0 {
            warn!(?path, "zero size, ignoring");
            diffs.push(Diff::rejected(path, RejectReason::ZeroSizeFile));
            continue;
        }

        let resolved = match resolver.resolve(&file, options.pickup, last) {
            Ok(r) => r,
            Err(e) => match RejectReason::from_resolve(&e) {
                Some(reason) => {
                    if file.kind == MediaKind::Unsupported {
                        debug!(?path, "unsupported kind");
                    } else {
                        warn!(?path, %reason, "not processed");
                    }
                    diffs.push(Diff::rejected(path, reason));
                    continue;
                }
                None => return Err(BatchError::Tool(e)),
            },
        };
        last = Some(resolved.instant);
        first_resolved.get_or_insert(resolved.instant);

        let diff = build_diff(&file, &resolved, &options.root).map_err(BatchError::Fatal)?;
        let diff = match diff {
            Diff::Valid(planned) if options.do_move => match check_collision(&planned) {
                Ok(()) => Diff::Valid(planned),
                Err(e) => collision_failure(path, e)?,
            },
            other if options.do_move => other,
            other => other.keep_in_place(),
        };
        diffs.push(diff);
    }

    Ok(BatchOutcome {
        dir: batch.dir.clone(),
        diffs,
        first_resolved,
    })
}

/// A destination collision aborts the run; failing to inspect either file
/// only rejects the incoming one.
fn collision_failure(path: &Path, err: PlanError) -> Result<Diff, BatchError> {
    match err {
        PlanError::DestinationCollision { .. } => Err(BatchError::Fatal(err)),
        other => {
            warn!(?path, error = %other, "cannot check destination");
            Ok(Diff::rejected(path, RejectReason::Unreadable(other.to_string())))
        }
    }
}

struct PendingBatch {
    dir: PathBuf,
    subdirs: Vec<PathBuf>,
    seed: Option<CaptureInstant>,
}

type Completed = (u64, Result<BatchOutcome, BatchError>);

/// Walks a tree on the calling thread and fans directory batches out to a
/// bounded worker pool.
///
/// Subdirectories of a directory are enumerated once its batch completes,
/// seeded with that batch's first resolved instant. Completed batches are
/// handed to the sink in completion order.
pub struct Scheduler {
    pool: rayon::ThreadPool,
    resolver: Arc<Resolver>,
    options: Arc<WalkOptions>,
    tx: Sender<Completed>,
    rx: Receiver<Completed>,
    pending: HashMap<u64, PendingBatch>,
    max_pending: usize,
    next_id: u64,
    completed: u64,
}

impl Scheduler {
    pub fn new(resolver: Resolver, options: WalkOptions, concurrency: usize) -> anyhow::Result<Self> {
        let workers = concurrency.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("mediasort-batch-{i}"))
            .build()?;
        let (tx, rx) = mpsc::channel();
        Ok(Self {
            pool,
            resolver: Arc::new(resolver),
            options: Arc::new(options),
            tx,
            rx,
            pending: HashMap::new(),
            max_pending: workers * 2,
            next_id: 0,
            completed: 0,
        })
    }

    pub fn walk(
        &mut self,
        start: &Path,
        seed: Option<CaptureInstant>,
        progress: &ThrottledProgress,
        sink: &mut dyn FnMut(BatchOutcome) -> anyhow::Result<()>,
    ) -> anyhow::Result<WalkReport> {
        let mut report = WalkReport::default();
        let mut ready: Vec<(PathBuf, Option<CaptureInstant>)> = vec![(start.to_path_buf(), seed)];

        loop {
            while let Some((dir, seed)) = ready.pop() {
                while self.pending.len() >= self.max_pending {
                    self.collect_one(&mut ready, &mut report, progress, sink)?;
                }

                let (files, subdirs) = match self.enumerate(&dir) {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(?dir, error = %e, "cannot read directory");
                        report.unreadable_dirs.push(dir);
                        continue;
                    }
                };
                if files.is_empty() {
                    push_subdirs(&mut ready, subdirs, seed);
                    continue;
                }
                self.dispatch(DirectoryBatch { dir, files, seed }, subdirs);
            }

            if self.pending.is_empty() {
                break;
            }
            self.collect_one(&mut ready, &mut report, progress, sink)?;
        }

        Ok(report)
    }

    /// Files and subdirectories of `dir`, each sorted by name. The staging
    /// directory is left out.
    fn enumerate(&self, dir: &Path) -> std::io::Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let mut files = Vec::new();
        let mut subdirs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if folder_classify::is_staged(&path, &self.options.root) {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                subdirs.push(path);
            } else if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        subdirs.sort();
        Ok((files, subdirs))
    }

    fn dispatch(&mut self, batch: DirectoryBatch, subdirs: Vec<PathBuf>) {
        let id = self.next_id;
        self.next_id += 1;
        debug!(dir = ?batch.dir, files = batch.files.len(), "dispatching batch");
        self.pending.insert(
            id,
            PendingBatch {
                dir: batch.dir.clone(),
                subdirs,
                seed: batch.seed,
            },
        );

        let tx = self.tx.clone();
        let resolver = Arc::clone(&self.resolver);
        let options = Arc::clone(&self.options);
        self.pool.spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                process_batch(&batch, &resolver, &options)
            }))
            .unwrap_or_else(|_| Err(BatchError::Panicked(batch.dir.clone())));
            let _ = tx.send((id, result));
        });
    }

    fn collect_one(
        &mut self,
        ready: &mut Vec<(PathBuf, Option<CaptureInstant>)>,
        report: &mut WalkReport,
        progress: &ThrottledProgress,
        sink: &mut dyn FnMut(BatchOutcome) -> anyhow::Result<()>,
    ) -> anyhow::Result<()> {
        let (id, result) = self.rx.recv()?;
        let Some(pending) = self.pending.remove(&id) else {
            anyhow::bail!("completion for unknown batch {id}");
        };
        self.completed += 1;

        let next_seed = match result {
            Ok(outcome) => {
                report.batches += 1;
                let seed = outcome.first_resolved.or(pending.seed);
                sink(outcome)?;
                seed
            }
            Err(BatchError::Fatal(e)) => return Err(e.into()),
            Err(e) => {
                warn!(dir = ?pending.dir, error = %e, "batch aborted");
                report.failed.push(FailedBatch {
                    dir: pending.dir.clone(),
                    reason: e.to_string(),
                });
                pending.seed
            }
        };
        push_subdirs(ready, pending.subdirs, next_seed);

        progress.report(
            "scan",
            self.completed.saturating_sub(1),
            self.next_id,
            &pending.dir.to_string_lossy(),
        );
        Ok(())
    }
}

/// Reverse order so the first subdirectory by name is walked first.
fn push_subdirs(
    ready: &mut Vec<(PathBuf, Option<CaptureInstant>)>,
    subdirs: Vec<PathBuf>,
    seed: Option<CaptureInstant>,
) {
    ready.extend(subdirs.into_iter().rev().map(|d| (d, seed)));
}
