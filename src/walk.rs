//! Lazy depth-first traversal of the source tree.
//!
//! [`TreeWalker`] is an iterator: nothing is read from disk until the consumer
//! pulls the next record, and dropping it abandons the walk. Each directory
//! frame owns the [`IgnoreScope`] derived for it; the scope is dropped when the
//! walker leaves the directory.

use crate::error::{Error, Result};
use crate::scope::{IgnoreScope, load_rule_file};
use crate::size::SizeRules;
use log::debug;
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::vec;

/// Name of the per-directory rule file when none is configured.
pub const DEFAULT_RULE_FILE: &str = ".gitignore";

/// Why a record was kept or dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Included,
    /// Excluded by an ignore pattern; holds the pattern description.
    ExcludedByIgnore(String),
    /// Excluded by a size rule; holds the rule description.
    ExcludedBySize(String),
    /// Symbolic links are never backed up.
    ExcludedBySymlink,
    /// The entry could not be read; holds the error text.
    ExcludedByError(String),
}

impl Classification {
    pub fn is_included(&self) -> bool {
        matches!(self, Classification::Included)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Classification::Included => write!(f, "included"),
            Classification::ExcludedByIgnore(pattern) => write!(f, "ignored by {pattern}"),
            Classification::ExcludedBySize(rule) => write!(f, "size limit {rule}"),
            Classification::ExcludedBySymlink => write!(f, "symbolic link"),
            Classification::ExcludedByError(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// One classified entry of the source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the source root.
    pub path: PathBuf,
    /// Size in bytes; zero for directories and unreadable entries.
    pub size: u64,
    pub is_dir: bool,
    pub classification: Classification,
}

impl FileRecord {
    fn new(path: PathBuf, size: u64, is_dir: bool, classification: Classification) -> Self {
        FileRecord {
            path,
            size,
            is_dir,
            classification,
        }
    }

    fn error(path: PathBuf, is_dir: bool, err: &Error) -> Self {
        FileRecord::new(path, 0, is_dir, Classification::ExcludedByError(err.to_string()))
    }

    pub fn is_included(&self) -> bool {
        self.classification.is_included()
    }

    /// Object key: the relative path with `/` separators.
    pub fn key(&self) -> String {
        crate::relative_key(&self.path)
    }
}

/// Walk options fixed for one run.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub root: PathBuf,
    pub global: IgnoreScope,
    pub size_rules: SizeRules,
    pub rule_file: String,
}

impl WalkOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        WalkOptions {
            root: root.into(),
            global: IgnoreScope::default(),
            size_rules: SizeRules::default(),
            rule_file: DEFAULT_RULE_FILE.to_string(),
        }
    }

    pub fn global(mut self, scope: IgnoreScope) -> Self {
        self.global = scope;
        self
    }

    pub fn size_rules(mut self, rules: SizeRules) -> Self {
        self.size_rules = rules;
        self
    }

    pub fn rule_file(mut self, name: impl Into<String>) -> Self {
        self.rule_file = name.into();
        self
    }

    /// Start a fresh walk. Every call re-reads the filesystem.
    pub fn walk(&self) -> Result<TreeWalker<'_>> {
        TreeWalker::new(self)
    }
}

struct Frame {
    rel: PathBuf,
    scope: IgnoreScope,
    entries: vec::IntoIter<fs::DirEntry>,
}

/// Iterator over [`FileRecord`]s in depth-first, name-sorted order.
pub struct TreeWalker<'a> {
    options: &'a WalkOptions,
    stack: Vec<Frame>,
    pending: VecDeque<FileRecord>,
}

/// Separate the entries of one directory from the ones the OS failed to
/// return. Each failure becomes an error record for the directory itself.
fn split_entries<T>(
    rel: &Path,
    abs: &Path,
    entries: impl Iterator<Item = io::Result<T>>,
) -> (Vec<T>, Vec<FileRecord>) {
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for entry in entries {
        match entry {
            Ok(entry) => ok.push(entry),
            Err(e) => {
                let path = if rel.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    rel.to_path_buf()
                };
                failed.push(FileRecord::error(path, true, &Error::access(abs, e)));
            }
        }
    }
    (ok, failed)
}

/// A file that passed every filter is included only if it opens for reading.
fn open_check(rel: PathBuf, abs: &Path, size: u64) -> FileRecord {
    match File::open(abs) {
        Ok(_) => FileRecord::new(rel, size, false, Classification::Included),
        Err(e) => FileRecord::error(rel, false, &Error::access(abs, e)),
    }
}

impl<'a> TreeWalker<'a> {
    fn new(options: &'a WalkOptions) -> Result<Self> {
        if !options.root.is_dir() {
            return Err(Error::SourceRootNotFound(options.root.clone()));
        }
        let mut walker = TreeWalker {
            options,
            stack: Vec::new(),
            pending: VecDeque::new(),
        };
        let root_rel = PathBuf::new();
        if let Err(err) = walker.enter(&options.root, root_rel, &options.global) {
            walker
                .pending
                .push_back(FileRecord::error(PathBuf::from("."), true, &err));
        }
        Ok(walker)
    }

    /// Read a directory and push its frame with the derived child scope.
    fn enter(&mut self, abs: &Path, rel: PathBuf, parent: &IgnoreScope) -> Result<()> {
        let listing = fs::read_dir(abs).map_err(|e| Error::access(abs, e))?;
        let (mut entries, failed) = split_entries(&rel, abs, listing);
        entries.sort_by_key(|entry| entry.file_name());

        let local = load_rule_file(abs, &rel, &self.options.rule_file)?;
        if !local.is_empty() {
            debug!("{} rule(s) from {}", local.len(), rel.join(&self.options.rule_file).display());
        }
        let scope = parent.derive_child(local);
        self.stack.push(Frame {
            rel,
            scope,
            entries: entries.into_iter(),
        });
        self.pending.extend(failed);
        Ok(())
    }

    /// Classify one entry. Returns `None` when the entry was a directory that
    /// was descended into.
    fn visit(&mut self, entry: fs::DirEntry) -> Option<FileRecord> {
        let frame = self.stack.last()?;
        let rel = frame.rel.join(entry.file_name());
        let abs = entry.path();

        let file_type = match entry.file_type() {
            Ok(file_type) => file_type,
            Err(e) => return Some(FileRecord::error(rel, false, &Error::access(abs, e))),
        };

        let is_dir = file_type.is_dir();
        if let Some(pattern) = frame.scope.excluded_by(&rel, is_dir) {
            let size = if is_dir {
                0
            } else {
                entry.metadata().map(|m| m.len()).unwrap_or(0)
            };
            let reason = Classification::ExcludedByIgnore(pattern.to_string());
            return Some(FileRecord::new(rel, size, is_dir, reason));
        }

        if file_type.is_symlink() {
            return Some(match fs::metadata(&abs) {
                Ok(meta) => FileRecord::new(rel, 0, meta.is_dir(), Classification::ExcludedBySymlink),
                Err(e) => FileRecord::error(rel, false, &Error::access(abs, e)),
            });
        }

        if is_dir {
            let parent = frame.scope.clone();
            return match self.enter(&abs, rel.clone(), &parent) {
                Ok(()) => None,
                Err(err) => Some(FileRecord::error(rel, true, &err)),
            };
        }

        if !file_type.is_file() {
            let reason = "not a regular file".to_string();
            return Some(FileRecord::new(rel, 0, false, Classification::ExcludedByError(reason)));
        }

        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => return Some(FileRecord::error(rel, false, &Error::access(abs, e))),
        };
        if let Some(rule) = self.options.size_rules.violated_by(&rel, size) {
            let reason = Classification::ExcludedBySize(rule.to_string());
            return Some(FileRecord::new(rel, size, false, reason));
        }

        Some(open_check(rel, &abs, size))
    }
}

impl Iterator for TreeWalker<'_> {
    type Item = FileRecord;

    fn next(&mut self) -> Option<FileRecord> {
        loop {
            if let Some(record) = self.pending.pop_front() {
                return Some(record);
            }
            let frame = self.stack.last_mut()?;
            match frame.entries.next() {
                None => {
                    self.stack.pop();
                }
                Some(entry) => {
                    if let Some(record) = self.visit(entry) {
                        debug!("{}: {}", record.path.display(), record.classification);
                        return Some(record);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::Pattern;
    use std::fs;
    use tempfile::tempdir;

    fn collect(options: &WalkOptions) -> Vec<FileRecord> {
        options.walk().unwrap().collect()
    }

    fn find<'a>(records: &'a [FileRecord], path: &str) -> Option<&'a FileRecord> {
        records.iter().find(|r| r.path == Path::new(path))
    }

    #[test]
    fn test_missing_root() {
        let dir = tempdir().unwrap();
        let options = WalkOptions::new(dir.path().join("nope"));
        assert!(matches!(options.walk(), Err(Error::SourceRootNotFound(_))));
    }

    #[test]
    fn test_root_that_is_a_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, b"x").unwrap();
        assert!(matches!(
            WalkOptions::new(&file).walk(),
            Err(Error::SourceRootNotFound(_))
        ));
    }

    #[test]
    fn test_order_is_depth_first_and_sorted() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b/inner.txt"), b"1").unwrap();
        fs::write(dir.path().join("c.txt"), b"2").unwrap();
        fs::write(dir.path().join("a.txt"), b"3").unwrap();

        let paths: Vec<_> = collect(&WalkOptions::new(dir.path()))
            .into_iter()
            .map(|r| r.key())
            .collect();
        assert_eq!(paths, ["a.txt", "b/inner.txt", "c.txt"]);
    }

    #[test]
    fn test_rule_file_applies_only_below_its_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("left")).unwrap();
        fs::create_dir_all(dir.path().join("right")).unwrap();
        fs::write(dir.path().join("left/.gitignore"), "*.tmp\n").unwrap();
        fs::write(dir.path().join("left/x.tmp"), b"").unwrap();
        fs::write(dir.path().join("right/x.tmp"), b"").unwrap();

        let records = collect(&WalkOptions::new(dir.path()));
        assert!(matches!(
            find(&records, "left/x.tmp").unwrap().classification,
            Classification::ExcludedByIgnore(_)
        ));
        assert!(find(&records, "right/x.tmp").unwrap().is_included());
        assert!(find(&records, "left/.gitignore").unwrap().is_included());
    }

    #[test]
    fn test_excluded_directory_yields_single_record() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("build/deep")).unwrap();
        fs::write(dir.path().join("build/deep/out.o"), b"").unwrap();
        fs::write(dir.path().join("build/.gitignore"), "!out.o\n").unwrap();
        fs::write(dir.path().join(".gitignore"), "build/\n").unwrap();

        let records = collect(&WalkOptions::new(dir.path()));
        let build = find(&records, "build").unwrap();
        assert!(build.is_dir);
        assert!(!build.is_included());
        assert!(records.iter().all(|r| !r.path.starts_with("build/")));
    }

    #[test]
    fn test_custom_rule_file_name() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".backupignore"), "*.iso\n").unwrap();
        fs::write(dir.path().join("disk.iso"), b"").unwrap();

        let options = WalkOptions::new(dir.path()).rule_file(".backupignore");
        let records = collect(&options);
        assert!(!find(&records, "disk.iso").unwrap().is_included());
    }

    #[test]
    fn test_invalid_nested_rule_file_marks_directory() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/.gitignore"), "foo[\n").unwrap();
        fs::write(dir.path().join("sub/a.txt"), b"").unwrap();
        fs::write(dir.path().join("b.txt"), b"").unwrap();

        let records = collect(&WalkOptions::new(dir.path()));
        let sub = find(&records, "sub").unwrap();
        assert!(matches!(sub.classification, Classification::ExcludedByError(_)));
        assert!(find(&records, "sub/a.txt").is_none());
        assert!(find(&records, "b.txt").unwrap().is_included());
    }

    #[test]
    fn test_walk_is_restartable() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let options = WalkOptions::new(dir.path());
        let first: Vec<_> = collect(&options);
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        let second: Vec<_> = collect(&options);
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn test_early_abandon() {
        let dir = tempdir().unwrap();
        for i in 0..10 {
            fs::write(dir.path().join(format!("{i}.txt")), b"").unwrap();
        }
        let options = WalkOptions::new(dir.path());
        let first_two: Vec<_> = options.walk().unwrap().take(2).collect();
        assert_eq!(first_two.len(), 2);
    }

    #[test]
    fn test_global_regex_prunes_directories() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("web/node_modules/pkg")).unwrap();
        fs::write(dir.path().join("web/node_modules/pkg/i.js"), b"").unwrap();
        fs::write(dir.path().join("web/app.js"), b"").unwrap();

        let global = IgnoreScope::new([Pattern::regex(".*node_modules$").unwrap()]);
        let records = collect(&WalkOptions::new(dir.path()).global(global));
        assert_eq!(records.len(), 2);
        assert!(find(&records, "web/app.js").unwrap().is_included());
        assert!(find(&records, "web/node_modules").unwrap().is_dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("real")).unwrap();
        fs::write(dir.path().join("real/f.txt"), b"x").unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("broken")).unwrap();

        let records = collect(&WalkOptions::new(dir.path()));
        let link = find(&records, "link").unwrap();
        assert_eq!(link.classification, Classification::ExcludedBySymlink);
        assert!(matches!(
            find(&records, "broken").unwrap().classification,
            Classification::ExcludedByError(_)
        ));
        assert!(find(&records, "link/f.txt").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_ignored_broken_symlink_is_reported_as_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(".gitignore"), "*.lnk\n").unwrap();
        std::os::unix::fs::symlink(dir.path().join("gone"), dir.path().join("stale.lnk")).unwrap();

        let records = collect(&WalkOptions::new(dir.path()));
        assert!(matches!(
            find(&records, "stale.lnk").unwrap().classification,
            Classification::ExcludedByIgnore(_)
        ));
    }

    #[test]
    fn test_open_check() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f.txt");
        fs::write(&file, b"abc").unwrap();

        let ok = open_check(PathBuf::from("f.txt"), &file, 3);
        assert!(ok.is_included());
        assert_eq!(ok.size, 3);

        let gone = open_check(PathBuf::from("gone.txt"), &dir.path().join("gone.txt"), 3);
        assert!(matches!(gone.classification, Classification::ExcludedByError(_)));
        assert_eq!(gone.size, 0);
    }

    #[test]
    fn test_file_removed_after_listing_is_an_error_record() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("c.txt"), b"c").unwrap();

        let options = WalkOptions::new(dir.path());
        let walker = options.walk().unwrap();
        fs::remove_file(dir.path().join("b.txt")).unwrap();
        let records: Vec<_> = walker.collect();

        assert_eq!(records.len(), 3);
        assert!(find(&records, "a.txt").unwrap().is_included());
        assert!(matches!(
            find(&records, "b.txt").unwrap().classification,
            Classification::ExcludedByError(_)
        ));
        assert!(find(&records, "c.txt").unwrap().is_included());
    }

    #[test]
    fn test_split_entries_keeps_good_siblings() {
        let listing = vec![Ok("a"), Err(io::Error::other("bad entry")), Ok("c")];
        let (ok, failed) = split_entries(Path::new("sub"), Path::new("/src/sub"), listing.into_iter());
        assert_eq!(ok, ["a", "c"]);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].path, Path::new("sub"));
        assert!(failed[0].is_dir);
        assert!(matches!(failed[0].classification, Classification::ExcludedByError(_)));

        let root_listing = vec![Err::<(), _>(io::Error::other("bad entry"))];
        let (_, failed) = split_entries(Path::new(""), Path::new("/src"), root_listing.into_iter());
        assert_eq!(failed[0].path, Path::new("."));
        assert_eq!(failed[0].key(), "");
    }
}
