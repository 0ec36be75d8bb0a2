//! Compilation of ignore patterns into path matchers.
//!
//! Two flavours exist. Gitignore lines come from per-directory rule files and
//! follow gitignore semantics (`!` negation, trailing `/` for directories,
//! leading or inner `/` anchoring, `*` vs `**`). Raw regular expressions come
//! from configuration and are matched against the root-relative path without
//! any glob translation.

use crate::error::{Error, Result};
use crate::relative_key;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
enum Matcher {
    Glob(Gitignore),
    Regex(Regex),
}

/// One compiled ignore rule. Immutable once built.
#[derive(Debug, Clone)]
pub struct Pattern {
    raw: String,
    negated: bool,
    dir_only: bool,
    anchored: bool,
    /// Directory, relative to the source root, the rule is evaluated from.
    base: PathBuf,
    /// Rule file the pattern was read from, if any.
    origin: Option<PathBuf>,
    matcher: Matcher,
}

impl Pattern {
    /// Compile one gitignore line scoped to `base`.
    ///
    /// Returns `Ok(None)` for blank lines and comments.
    pub fn glob(line: &str, base: &Path) -> Result<Option<Self>> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let invalid = |reason: String| Error::InvalidPattern {
            pattern: line.to_string(),
            reason,
        };
        let mut builder = GitignoreBuilder::new("");
        builder
            .add_line(None, line)
            .map_err(|e| invalid(e.to_string()))?;
        let gitignore = builder.build().map_err(|e| invalid(e.to_string()))?;
        if gitignore.is_empty() {
            return Ok(None);
        }

        let negated = line.starts_with('!');
        let body = line.strip_prefix('!').unwrap_or(line).trim_end();
        let dir_only = body.ends_with('/');
        let anchored = body.trim_end_matches('/').contains('/');

        Ok(Some(Pattern {
            raw: line.to_string(),
            negated,
            dir_only,
            anchored,
            base: base.to_path_buf(),
            origin: None,
            matcher: Matcher::Glob(gitignore),
        }))
    }

    /// Compile a raw regular expression matched from the start of the root-relative path.
    pub fn regex(raw: &str) -> Result<Self> {
        let re = Regex::new(&format!("^(?:{raw})")).map_err(|e| Error::InvalidPattern {
            pattern: raw.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Pattern {
            raw: raw.to_string(),
            negated: false,
            dir_only: false,
            anchored: true,
            base: PathBuf::new(),
            origin: None,
            matcher: Matcher::Regex(re),
        })
    }

    /// Record the rule file this pattern came from, for diagnostics.
    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Test a root-relative path against this pattern.
    ///
    /// A match on a negated pattern means "re-include"; callers decide what a
    /// match means, this only reports whether the pattern applies.
    pub fn matches(&self, rel_path: &Path, is_dir: bool) -> bool {
        let Ok(local) = rel_path.strip_prefix(&self.base) else {
            return false;
        };
        if local.as_os_str().is_empty() {
            return false;
        }
        match &self.matcher {
            Matcher::Glob(gitignore) => !gitignore.matched(local, is_dir).is_none(),
            Matcher::Regex(re) => re.is_match(&relative_key(local)),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    pub fn is_dir_only(&self) -> bool {
        self.dir_only
    }

    pub fn is_anchored(&self) -> bool {
        self.anchored
    }

    pub fn is_regex(&self) -> bool {
        matches!(self.matcher, Matcher::Regex(_))
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "`{}` ({})", self.raw, origin.display()),
            None if self.is_regex() => write!(f, "`{}` (global)", self.raw),
            None => write!(f, "`{}`", self.raw),
        }
    }
}
