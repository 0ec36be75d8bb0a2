//! Sync actions, execution, and logging for bucket-backup

use crate::Result;
use crate::bucket::Bucket;
use crate::diff::{CompareMode, Diff, DiffType, compare_plan};
use crate::error::Error;
use crate::plan::BackupPlan;
use crate::progress::Progress;
use log::{info, warn};
use rayon::prelude::*;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Represents an action to bring the bucket in line with the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAction {
    Upload(String),
    Replace(String),
    Delete(String),
}

impl SyncAction {
    pub fn key(&self) -> &str {
        match self {
            SyncAction::Upload(key) | SyncAction::Replace(key) | SyncAction::Delete(key) => key,
        }
    }
}

impl fmt::Display for SyncAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncAction::Upload(key) => write!(f, "upload {key}"),
            SyncAction::Replace(key) => write!(f, "replace {key}"),
            SyncAction::Delete(key) => write!(f, "delete {key}"),
        }
    }
}

/// A log entry for a sync action.
#[derive(Debug, Clone)]
pub struct SyncLogEntry {
    pub action: SyncAction,
    pub timestamp: SystemTime,
    pub succeeded: bool,
    pub details: String,
}

/// A log of all sync actions performed.
#[derive(Debug, Clone, Default)]
pub struct SyncLog {
    pub entries: Vec<SyncLogEntry>,
    /// Set when the run was cancelled before every action was attempted.
    pub interrupted: bool,
}

impl SyncLog {
    pub fn succeeded(&self) -> usize {
        self.entries.iter().filter(|e| e.succeeded).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.succeeded()
    }
}

/// Knobs for one sync run.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub compare_mode: CompareMode,
    pub compare_threshold: Duration,
    pub delete_removed: bool,
    pub max_workers: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            dry_run: false,
            compare_mode: CompareMode::default(),
            compare_threshold: Duration::from_secs(crate::config::DEFAULT_COMPARE_THRESHOLD_SECS),
            delete_removed: true,
            max_workers: crate::config::DEFAULT_MAX_WORKERS,
        }
    }
}

/// Plan sync actions based on diffs.
pub fn plan_sync_actions(diffs: &[Diff], delete_removed: bool) -> Vec<SyncAction> {
    diffs
        .iter()
        .filter_map(|diff| match &diff.diff_type {
            DiffType::OnlyLocal => Some(SyncAction::Upload(diff.key.clone())),
            DiffType::Different { .. } => Some(SyncAction::Replace(diff.key.clone())),
            DiffType::OnlyRemote if delete_removed => Some(SyncAction::Delete(diff.key.clone())),
            DiffType::OnlyRemote => None,
        })
        .collect()
}

/// Log a sync action.
pub fn log_sync_action(log: &mut SyncLog, action: &SyncAction, succeeded: bool, details: &str) {
    log.entries.push(SyncLogEntry {
        action: action.clone(),
        timestamp: SystemTime::now(),
        succeeded,
        details: details.to_string(),
    });
}

/// Append the sync log to `path`.
pub fn save_sync_log(log: &SyncLog, path: &Path) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::access(path, e))?;
    for entry in &log.entries {
        let secs = entry
            .timestamp
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let status = if entry.succeeded { "ok" } else { "FAILED" };
        writeln!(file, "{secs} {status} {}: {}", entry.action, entry.details)?;
    }
    Ok(())
}

/// Perform a sync action against the bucket.
pub fn perform_sync_action(action: &SyncAction, source_root: &Path, bucket: &dyn Bucket) -> Result<()> {
    match action {
        SyncAction::Upload(key) | SyncAction::Replace(key) => {
            let src = source_root.join(key);
            let modified = std::fs::metadata(&src)
                .and_then(|m| m.modified())
                .ok();
            bucket.upload(&src, key, modified)
        }
        SyncAction::Delete(key) => bucket.delete(key),
    }
}

/// Bring `bucket` in line with `plan`.
///
/// Actions run on a pool of `max_workers` threads. A failed action is
/// recorded and the rest continue. Setting `cancel` skips the remaining
/// actions and marks the returned log as interrupted.
pub fn run_sync(
    plan: &BackupPlan,
    source_root: &Path,
    bucket: &dyn Bucket,
    options: &SyncOptions,
    cancel: &AtomicBool,
) -> Result<SyncLog> {
    let remote = bucket.list_objects()?;
    info!("{} object(s) in bucket {}", remote.len(), bucket.name());
    let diffs = compare_plan(
        plan,
        source_root,
        remote,
        bucket,
        options.compare_mode,
        options.compare_threshold,
    )?;
    let actions = plan_sync_actions(&diffs, options.delete_removed);

    let mut log = SyncLog::default();
    if options.dry_run {
        for action in &actions {
            info!("(dry run) {action}");
            log_sync_action(&mut log, action, true, "dry run");
        }
        return Ok(log);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.max_workers.max(1))
        .build()
        .map_err(|e| Error::Config(format!("cannot start upload workers: {e}")))?;
    let progress = Progress::transfer(actions.len() as u64);
    let log = Mutex::new(log);

    pool.install(|| {
        actions.par_iter().for_each(|action| {
            if cancel.load(Ordering::SeqCst) {
                return;
            }
            let result = perform_sync_action(action, source_root, bucket);
            let (succeeded, details) = match &result {
                Ok(()) => (true, "done".to_string()),
                Err(e) => {
                    warn!("FAILED to {action}: {e}");
                    (false, e.to_string())
                }
            };
            progress.inc(action.key());
            if let Ok(mut log) = log.lock() {
                log_sync_action(&mut log, action, succeeded, &details);
            }
        });
    });
    progress.finish();

    let mut log = log.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner());
    log.interrupted = cancel.load(Ordering::SeqCst);
    Ok(log)
}
