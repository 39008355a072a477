use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Datelike, NaiveDateTime, Timelike};
use serde::Serialize;
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

use crate::date::{CaptureInstant, ResolvedTimestamp};
use crate::dedup::hash_file;
use crate::error::{PlanError, RejectReason};
use crate::media::MediaFile;

/// A file with a resolved timestamp: where it should live and how to retouch it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedMove {
    pub source: PathBuf,
    /// May equal `source`
    pub destination: PathBuf,
    /// Present only when the on-disk modification time disagrees with the resolved instant.
    pub corrected_mtime: Option<NaiveDateTime>,
    pub timestamp: ResolvedTimestamp,
}

impl PlannedMove {
    pub fn needs_move(&self) -> bool {
        !same_path(&self.source, &self.destination)
    }

    pub fn renames(&self) -> bool {
        self.source.file_name() != self.destination.file_name()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub source: PathBuf,
    pub reason: RejectReason,
}

/// One plan entry per scanned file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Diff {
    Valid(PlannedMove),
    Rejected(Rejection),
}

impl Diff {
    pub fn rejected(source: impl Into<PathBuf>, reason: RejectReason) -> Self {
        Self::Rejected(Rejection {
            source: source.into(),
            reason,
        })
    }

    pub fn source(&self) -> &Path {
        match self {
            Self::Valid(m) => &m.source,
            Self::Rejected(r) => &r.source,
        }
    }

    /// Only correct the timestamp; the file stays where it is.
    pub fn keep_in_place(self) -> Self {
        match self {
            Self::Valid(m) => Self::Valid(PlannedMove {
                destination: m.source.clone(),
                ..m
            }),
            rejected => rejected,
        }
    }
}

/// Destination = `root/YYYY/MM/[prefix_]name`.
///
/// A name that already starts with `<prefix>_`, or that encodes the instant
/// itself, is kept as-is.
pub fn build_diff(
    file: &MediaFile,
    resolved: &ResolvedTimestamp,
    root: &Path,
) -> Result<Diff, PlanError> {
    let dest_dir = resolved
        .year_month_path
        .split('/')
        .fold(root.to_path_buf(), |dir, part| dir.join(part));

    let name = file.path.file_name().unwrap_or_default();
    let prefix = format!("{}_", resolved.compact_prefix);
    let already_named = nfc(&name.to_string_lossy()).starts_with(&prefix);

    let destination = if already_named || resolved.name_carries_instant {
        dest_dir.join(name)
    } else {
        let mut renamed = OsString::from(prefix);
        renamed.push(name);
        dest_dir.join(renamed)
    };

    if !destination.starts_with(root) {
        return Err(PlanError::OutsideRoot {
            destination,
            root: root.to_path_buf(),
        });
    }

    let corrected_mtime = needs_mtime_correction(file.modified, &resolved.instant)
        .then_some(resolved.instant.datetime);

    Ok(Diff::Valid(PlannedMove {
        source: file.path.clone(),
        destination,
        corrected_mtime,
        timestamp: resolved.clone(),
    }))
}

/// Year, month, hour or minute differ. Day is not compared so that timezone
/// skew around midnight does not trigger a retouch.
pub fn needs_mtime_correction(on_disk: NaiveDateTime, resolved: &CaptureInstant) -> bool {
    let r = resolved.datetime;
    on_disk.year() != r.year()
        || on_disk.month() != r.month()
        || on_disk.hour() != r.hour()
        || on_disk.minute() != r.minute()
}

/// Refuse to let `incoming` replace `existing` when they differ and the
/// existing file is larger; the pair must be looked at by a human.
pub fn ensure_overwrite_safe(
    incoming: &Path,
    existing: &Path,
    destination: &Path,
) -> Result<(), PlanError> {
    let incoming_size = fs::metadata(incoming)
        .map_err(|e| PlanError::io(incoming, e))?
        .len();
    let existing_size = fs::metadata(existing)
        .map_err(|e| PlanError::io(existing, e))?
        .len();

    if existing_size > incoming_size && !files_identical(incoming, existing)? {
        return Err(PlanError::DestinationCollision {
            source_path: incoming.to_path_buf(),
            destination: destination.to_path_buf(),
        });
    }
    if existing_size == incoming_size && files_identical(incoming, existing)? {
        debug!(?incoming, ?existing, "destination holds an identical copy");
    }
    Ok(())
}

/// Check a planned move against whatever already occupies its destination.
pub fn check_collision(planned: &PlannedMove) -> Result<(), PlanError> {
    if !planned.needs_move() || !planned.destination.is_file() {
        return Ok(());
    }
    ensure_overwrite_safe(&planned.source, &planned.destination, &planned.destination)
}

pub fn files_identical(a: &Path, b: &Path) -> Result<bool, PlanError> {
    let size_a = fs::metadata(a).map_err(|e| PlanError::io(a, e))?.len();
    let size_b = fs::metadata(b).map_err(|e| PlanError::io(b, e))?.len();
    if size_a != size_b {
        return Ok(false);
    }
    let hash_a = hash_file(a).map_err(|e| PlanError::io(a, e))?;
    let hash_b = hash_file(b).map_err(|e| PlanError::io(b, e))?;
    Ok(hash_a == hash_b)
}

fn nfc(s: &str) -> String {
    s.nfc().collect()
}

/// Compare paths component-wise after Unicode NFC normalization.
pub fn same_path(a: &Path, b: &Path) -> bool {
    let norm = |p: &Path| nfc(&p.components().collect::<PathBuf>().to_string_lossy());
    norm(a) == norm(b)
}
