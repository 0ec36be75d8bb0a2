//! Core library for bucket-backup: filtered directory backups to an object bucket.
//!
//! This crate provides modules for ignore-rule resolution, size limits, lazy tree walking,
//! backup planning, configuration, and syncing the planned files into a bucket.

use std::path::{Component, Path};

/// Render a root-relative path as a `/`-separated object key.
///
/// `.` components are dropped, so the source root itself maps to `""`.
pub fn relative_key(path: &Path) -> String {
    let mut key = String::new();
    for component in path.components() {
        if let Component::CurDir = component {
            continue;
        }
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(&component.as_os_str().to_string_lossy());
    }
    key
}

pub mod bucket;
pub mod config;
pub mod diff;
pub mod error;
pub mod hash;
pub mod pattern;
pub mod plan;
pub mod progress;
pub mod scope;
pub mod size;
pub mod sync;
pub mod walk;

pub use error::{Error, Result};
pub use plan::{BackupPlan, SizeReport};
pub use walk::{Classification, FileRecord, TreeWalker, WalkOptions};
