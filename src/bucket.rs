//! Object bucket abstraction and the directory-backed bucket.
//!
//! The sync engine talks to storage only through [`Bucket`]. [`DirBucket`]
//! keeps objects as plain files below `<bucket_root>/<bucket_name>/`, which is
//! enough for local or mounted targets; network transports plug in by
//! implementing the same trait. Uploads are staged in the sibling directory
//! `<bucket_root>/.<bucket_name>.staging/`, outside the object key space.

use crate::error::{Error, Result};
use crate::hash::hash_file;
use log::debug;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

/// One object as listed by a bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub key: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

pub trait Bucket: Send + Sync {
    fn name(&self) -> &str;

    /// Every object currently stored.
    fn list_objects(&self) -> Result<Vec<RemoteObject>>;

    /// Store the file at `source` under `key`, replacing any existing object.
    fn upload(&self, source: &Path, key: &str, modified: Option<SystemTime>) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;

    /// Content checksum of the stored object, if the bucket can provide one.
    fn checksum(&self, key: &str) -> Result<Option<Vec<u8>>>;
}

/// Reject keys that are empty, absolute, or step outside the bucket.
pub fn validate_key(key: &str) -> Result<()> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && !key.contains('\\')
        && key.split('/').all(|part| !part.is_empty())
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(Error::ObjectKey(key.to_string()))
    }
}

const STAGING_SUFFIX: &str = ".staging";

#[derive(Debug, Clone)]
pub struct DirBucket {
    name: String,
    root: PathBuf,
    staging: PathBuf,
}

impl DirBucket {
    /// Open (creating if needed) the bucket `name` below `bucket_root`.
    pub fn open(bucket_root: &Path, name: &str) -> Result<Self> {
        validate_key(name)?;
        if name.contains('/') || name.ends_with(STAGING_SUFFIX) {
            return Err(Error::ObjectKey(name.to_string()));
        }
        let root = bucket_root.join(name);
        let staging = bucket_root.join(format!(".{name}{STAGING_SUFFIX}"));
        for dir in [&root, &staging] {
            fs::create_dir_all(dir).map_err(|e| Error::access(dir, e))?;
        }
        Ok(DirBucket {
            name: name.to_string(),
            root,
            staging,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Remove empty directories between `path` and the bucket root.
    fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

impl Bucket for DirBucket {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_objects(&self) -> Result<Vec<RemoteObject>> {
        let mut objects = Vec::new();
        for entry in jwalk::WalkDir::new(&self.root).skip_hidden(false) {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let Ok(rel) = path.strip_prefix(&self.root) else {
                continue;
            };
            let meta = entry.metadata().map_err(|e| Error::Io(e.into()))?;
            objects.push(RemoteObject {
                key: crate::relative_key(rel),
                size: meta.len(),
                modified: meta.modified().ok(),
            });
        }
        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn upload(&self, source: &Path, key: &str, modified: Option<SystemTime>) -> Result<()> {
        let dst = self.object_path(key)?;
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::access(parent, e))?;
        }
        let mut input = File::open(source).map_err(|e| Error::access(source, e))?;
        let mut staged =
            NamedTempFile::new_in(&self.staging).map_err(|e| Error::access(&self.staging, e))?;
        io::copy(&mut input, &mut staged).map_err(|e| Error::access(source, e))?;
        if let Some(modified) = modified {
            staged
                .as_file()
                .set_modified(modified)
                .map_err(|e| Error::access(staged.path(), e))?;
        }
        staged
            .persist(&dst)
            .map_err(|e| Error::access(&dst, e.error))?;
        debug!("stored {} in {}", key, self.name);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        fs::remove_file(&path).map_err(|e| Error::access(&path, e))?;
        self.prune_empty_parents(&path);
        Ok(())
    }

    fn checksum(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(key)?;
        if !path.is_file() {
            return Ok(None);
        }
        hash_file(&path).map(Some)
    }
}
