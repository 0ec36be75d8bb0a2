//! Ignore scopes: the ordered rule set in effect at one directory.
//!
//! A scope is never mutated once handed out. Entering a directory derives a
//! new scope by copying the parent's rule list and appending the directory's
//! own rule file, so sibling subtrees cannot see each other's rules.

use crate::error::{Error, Result};
use crate::pattern::Pattern;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Rules ordered from least specific (global) to most specific (deepest rule file).
#[derive(Debug, Clone, Default)]
pub struct IgnoreScope {
    patterns: Vec<Arc<Pattern>>,
}

impl IgnoreScope {
    /// Root scope built from the global ignore list.
    pub fn new(global: impl IntoIterator<Item = Pattern>) -> Self {
        IgnoreScope {
            patterns: global.into_iter().map(Arc::new).collect(),
        }
    }

    /// Copy this scope and append `local` after the inherited rules.
    pub fn derive_child(&self, local: impl IntoIterator<Item = Pattern>) -> Self {
        let mut patterns = self.patterns.clone();
        patterns.extend(local.into_iter().map(Arc::new));
        IgnoreScope { patterns }
    }

    /// The pattern deciding `rel_path`, if any: the last one that matches.
    pub fn decisive(&self, rel_path: &Path, is_dir: bool) -> Option<&Pattern> {
        self.patterns
            .iter()
            .rev()
            .map(Arc::as_ref)
            .find(|p| p.matches(rel_path, is_dir))
    }

    /// Last-match-wins; a path matching nothing is included.
    pub fn is_excluded(&self, rel_path: &Path, is_dir: bool) -> bool {
        self.excluded_by(rel_path, is_dir).is_some()
    }

    /// The exclude pattern responsible when `rel_path` is excluded.
    pub fn excluded_by(&self, rel_path: &Path, is_dir: bool) -> Option<&Pattern> {
        self.decisive(rel_path, is_dir).filter(|p| !p.is_negated())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Pattern> {
        self.patterns.iter().map(Arc::as_ref)
    }
}

/// Compile a gitignore-formatted text whose rules apply below `base`.
pub fn parse_rules(contents: &str, base: &Path, origin: &Path) -> Result<Vec<Pattern>> {
    let mut patterns = Vec::new();
    for line in contents.lines() {
        if let Some(pattern) = Pattern::glob(line, base)? {
            patterns.push(pattern.with_origin(origin));
        }
    }
    Ok(patterns)
}

/// Load the rule file `file_name` in `dir`, if present.
///
/// `rel_dir` is `dir` relative to the source root. A missing file yields no rules.
pub fn load_rule_file(dir: &Path, rel_dir: &Path, file_name: &str) -> Result<Vec<Pattern>> {
    let path = dir.join(file_name);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::access(path, e)),
    };
    parse_rules(&contents, rel_dir, &rel_dir.join(file_name))
}
