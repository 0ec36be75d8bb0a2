//! Diffing the local backup plan against a bucket listing

use crate::bucket::{Bucket, RemoteObject};
use crate::error::{Error, Result};
use crate::hash::hash_file;
use crate::plan::BackupPlan;
use log::warn;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

/// How an object present on both sides is judged out of date.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareMode {
    /// Modification times differ by more than the threshold.
    #[default]
    Modtime,
    /// Sizes differ.
    Size,
    /// Sizes or content checksums differ.
    Checksum,
}

impl FromStr for CompareMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "modtime" => Ok(CompareMode::Modtime),
            "size" => Ok(CompareMode::Size),
            "checksum" => Ok(CompareMode::Checksum),
            other => Err(Error::Config(format!(
                "unknown compare mode `{other}` (expected modtime, size or checksum)"
            ))),
        }
    }
}

/// The type of difference between the local tree and the bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffType {
    OnlyLocal,
    OnlyRemote,
    Different {
        local_size: u64,
        remote_size: u64,
        local_time: Option<SystemTime>,
        remote_time: Option<SystemTime>,
    },
}

/// Represents one key that needs attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diff {
    pub key: String,
    pub diff_type: DiffType,
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.diff_type {
            DiffType::OnlyLocal => write!(f, "new: {}", self.key),
            DiffType::OnlyRemote => write!(f, "removed: {}", self.key),
            DiffType::Different {
                local_size,
                remote_size,
                ..
            } => write!(f, "changed: {} ({remote_size} -> {local_size} bytes)", self.key),
        }
    }
}

fn times_differ(a: Option<SystemTime>, b: Option<SystemTime>, threshold: Duration) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => {
            let delta = a.duration_since(b).or_else(|_| b.duration_since(a));
            delta.map(|d| d > threshold).unwrap_or(true)
        }
        _ => true,
    }
}

/// An unreadable checksum on either side counts as a difference, so the
/// failure surfaces later as a failed replace of that one key.
fn checksums_differ(bucket: &dyn Bucket, key: &str, local_path: &Path) -> bool {
    let remote = match bucket.checksum(key) {
        Ok(sum) => sum,
        Err(e) => {
            warn!("cannot checksum remote {key}: {e}");
            return true;
        }
    };
    match hash_file(local_path) {
        Ok(local) => remote.as_deref() != Some(local.as_slice()),
        Err(e) => {
            warn!("cannot checksum {}: {e}", local_path.display());
            true
        }
    }
}

/// Compares the planned files with the bucket contents.
///
/// # Arguments
/// * `plan` - Files selected for backup; its protected keys are never reported as `OnlyRemote`
/// * `source_root` - Directory the plan's relative paths start from
/// * `remote` - Current bucket listing
/// * `bucket` - Consulted for checksums in [`CompareMode::Checksum`]
///
/// # Returns
/// Differences sorted by key.
pub fn compare_plan(
    plan: &BackupPlan,
    source_root: &Path,
    remote: Vec<RemoteObject>,
    bucket: &dyn Bucket,
    mode: CompareMode,
    threshold: Duration,
) -> Result<Vec<Diff>> {
    let remote_objects: FxHashMap<String, RemoteObject> =
        remote.into_iter().map(|o| (o.key.clone(), o)).collect();

    let mut diffs = plan
        .files
        .par_iter()
        .filter_map(|file| {
            let key = file.key();
            let Some(object) = remote_objects.get(&key) else {
                return Some(Diff {
                    key,
                    diff_type: DiffType::OnlyLocal,
                });
            };

            let local_path = source_root.join(&file.path);
            let local_time = std::fs::metadata(&local_path)
                .and_then(|m| m.modified())
                .ok();
            let differs = match mode {
                CompareMode::Modtime => times_differ(local_time, object.modified, threshold),
                CompareMode::Size => file.size != object.size,
                CompareMode::Checksum => {
                    file.size != object.size || checksums_differ(bucket, &key, &local_path)
                }
            };
            differs.then(|| Diff {
                key,
                diff_type: DiffType::Different {
                    local_size: file.size,
                    remote_size: object.size,
                    local_time,
                    remote_time: object.modified,
                },
            })
        })
        .collect::<Vec<_>>();

    let local_keys: rustc_hash::FxHashSet<String> = plan.files.iter().map(|f| f.key()).collect();
    diffs.extend(
        remote_objects
            .keys()
            .filter(|key| !local_keys.contains(*key) && !plan.is_protected(key))
            .map(|key| Diff {
                key: key.clone(),
                diff_type: DiffType::OnlyRemote,
            }),
    );
    diffs.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(diffs)
}
