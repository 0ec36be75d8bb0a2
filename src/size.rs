//! Size-based exclusion rules.

use crate::error::{Error, Result};
use crate::pattern::Pattern;
use std::fmt;
use std::path::Path;

/// Bytes per megabyte in size expressions. Decimal, not binary.
pub const BYTES_PER_MB: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeOp {
    Ge,
    Gt,
    Le,
    Lt,
    Eq,
}

impl SizeOp {
    // Two-character operators first so ">=" is not read as ">".
    const ALL: [(&'static str, SizeOp); 5] = [
        (">=", SizeOp::Ge),
        ("<=", SizeOp::Le),
        ("==", SizeOp::Eq),
        (">", SizeOp::Gt),
        ("<", SizeOp::Lt),
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            SizeOp::Ge => ">=",
            SizeOp::Gt => ">",
            SizeOp::Le => "<=",
            SizeOp::Lt => "<",
            SizeOp::Eq => "==",
        }
    }

    pub fn holds(self, size: u64, threshold: u64) -> bool {
        match self {
            SizeOp::Ge => size >= threshold,
            SizeOp::Gt => size > threshold,
            SizeOp::Le => size <= threshold,
            SizeOp::Lt => size < threshold,
            SizeOp::Eq => size == threshold,
        }
    }
}

/// A path pattern paired with a size comparison, e.g. `.*\.ipynb$` with `>=5`.
#[derive(Debug, Clone)]
pub struct SizeRule {
    pattern: Pattern,
    op: SizeOp,
    threshold: u64,
    expression: String,
}

impl SizeRule {
    /// Parse a regex pattern and an expression of the form `<op><megabytes>`.
    pub fn parse(pattern: &str, expression: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidSizeExpression {
            pattern: pattern.to_string(),
            expression: expression.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = expression.trim();
        let (op, number) = SizeOp::ALL
            .iter()
            .find_map(|(symbol, op)| trimmed.strip_prefix(*symbol).map(|rest| (*op, rest)))
            .ok_or_else(|| invalid("expected one of >=, >, <=, <, =="))?;
        let megabytes: f64 = number
            .trim()
            .parse()
            .map_err(|_| invalid("expected a number of megabytes"))?;
        if !megabytes.is_finite() || megabytes < 0.0 {
            return Err(invalid("size must be a non-negative number"));
        }

        Ok(SizeRule {
            pattern: Pattern::regex(pattern)?,
            op,
            threshold: (megabytes * BYTES_PER_MB).round() as u64,
            expression: trimmed.to_string(),
        })
    }

    pub fn op(&self) -> SizeOp {
        self.op
    }

    /// Threshold in bytes.
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// True when the rule applies to `rel_path` and its comparison holds.
    pub fn excludes(&self, rel_path: &Path, size: u64) -> bool {
        self.pattern.matches(rel_path, false) && self.op.holds(size, self.threshold)
    }
}

impl fmt::Display for SizeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}`: {}", self.pattern.raw(), self.expression)
    }
}

/// All configured size rules. Any violated rule excludes the file.
#[derive(Debug, Clone, Default)]
pub struct SizeRules {
    rules: Vec<SizeRule>,
}

impl SizeRules {
    pub fn new(rules: Vec<SizeRule>) -> Self {
        SizeRules { rules }
    }

    /// Parse `(pattern, expression)` pairs, failing on the first bad one.
    pub fn parse<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<Self> {
        pairs
            .into_iter()
            .map(|(pattern, expression)| SizeRule::parse(pattern, expression))
            .collect::<Result<Vec<_>>>()
            .map(SizeRules::new)
    }

    /// First rule excluding a file of `size` bytes at `rel_path`.
    pub fn violated_by(&self, rel_path: &Path, size: u64) -> Option<&SizeRule> {
        self.rules.iter().find(|rule| rule.excludes(rel_path, size))
    }

    pub fn is_excluded_by_size(&self, rel_path: &Path, size: u64) -> bool {
        self.violated_by(rel_path, size).is_some()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
