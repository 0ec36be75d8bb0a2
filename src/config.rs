//! Configuration loading and eager validation.
//!
//! A configuration is either a YAML document or an environment file. In an
//! environment file, keys are the upper-case forms of the YAML keys and the
//! list/map valued keys (`GLOBAL_IGNORES`, `SIZE_LIMITS`) hold YAML flow
//! literals such as `[".*\.log$"]`.

use crate::diff::CompareMode;
use crate::error::{Error, Result};
use crate::pattern::Pattern;
use crate::scope::IgnoreScope;
use crate::size::SizeRules;
use crate::walk::{DEFAULT_RULE_FILE, WalkOptions};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_COMPARE_THRESHOLD_SECS: u64 = 10;

fn default_bucket_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_rule_file() -> String {
    DEFAULT_RULE_FILE.to_string()
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_compare_threshold() -> u64 {
    DEFAULT_COMPARE_THRESHOLD_SECS
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub src_dir: PathBuf,
    pub dst_bucket_name: String,
    #[serde(default = "default_bucket_root")]
    pub bucket_root: PathBuf,
    /// Regular expressions, applied at every directory before any rule file.
    #[serde(default)]
    pub global_ignores: Vec<String>,
    /// Regular expression to size expression, e.g. `.*\.ipynb$: ">=5"`.
    #[serde(default)]
    pub size_limits: BTreeMap<String, String>,
    #[serde(default = "default_rule_file")]
    pub ignore_file_name: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default)]
    pub compare_mode: CompareMode,
    #[serde(default = "default_compare_threshold")]
    pub compare_threshold_secs: u64,
    #[serde(default = "default_true")]
    pub delete_removed: bool,
    #[serde(default)]
    pub sync_log: Option<PathBuf>,
}

impl Config {
    pub fn new(src_dir: impl Into<PathBuf>, dst_bucket_name: impl Into<String>) -> Self {
        Config {
            src_dir: src_dir.into(),
            dst_bucket_name: dst_bucket_name.into(),
            bucket_root: default_bucket_root(),
            global_ignores: Vec::new(),
            size_limits: BTreeMap::new(),
            ignore_file_name: default_rule_file(),
            max_workers: DEFAULT_MAX_WORKERS,
            compare_mode: CompareMode::default(),
            compare_threshold_secs: DEFAULT_COMPARE_THRESHOLD_SECS,
            delete_removed: true,
            sync_log: None,
        }
    }

    /// Load from `path`, choosing the format from the file name.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::Config(format!(
                "no config file at {}",
                path.display()
            )));
        }
        if is_env_file(path) {
            Config::from_env_file(path)
        } else {
            let text = fs::read_to_string(path).map_err(|e| Error::access(path, e))?;
            Config::from_yaml_str(&text).map_err(|e| match e {
                Error::ConfigYaml { source, .. } => Error::ConfigYaml {
                    path: path.to_path_buf(),
                    source,
                },
                other => other,
            })
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).map_err(|source| Error::ConfigYaml {
            path: PathBuf::new(),
            source,
        })
    }

    pub fn from_env_file(path: &Path) -> Result<Self> {
        let env_err = |source| Error::ConfigEnv {
            path: path.to_path_buf(),
            source,
        };
        let mut vars = BTreeMap::new();
        for item in dotenvy::from_path_iter(path).map_err(env_err)? {
            let (key, value) = item.map_err(env_err)?;
            vars.insert(key.to_ascii_lowercase(), value);
        }
        Config::from_vars(&vars)
    }

    /// Build from lower-cased `KEY=value` pairs.
    pub fn from_vars(vars: &BTreeMap<String, String>) -> Result<Self> {
        let required = |key: &str| {
            vars.get(key)
                .cloned()
                .ok_or_else(|| Error::Config(format!("{} is required", key.to_ascii_uppercase())))
        };
        let mut config = Config::new(required("src_dir")?, required("dst_bucket_name")?);

        if let Some(root) = vars.get("bucket_root") {
            config.bucket_root = PathBuf::from(root);
        }
        if let Some(ignores) = env_yaml(vars, "global_ignores")? {
            config.global_ignores = ignores;
        }
        if let Some(limits) = env_yaml(vars, "size_limits")? {
            config.size_limits = limits;
        }
        if let Some(name) = vars.get("ignore_file_name") {
            config.ignore_file_name = name.clone();
        }
        if let Some(workers) = env_parse(vars, "max_workers")? {
            config.max_workers = workers;
        }
        if let Some(mode) = env_parse(vars, "compare_mode")? {
            config.compare_mode = mode;
        }
        if let Some(secs) = env_parse(vars, "compare_threshold_secs")? {
            config.compare_threshold_secs = secs;
        }
        if let Some(delete) = env_parse(vars, "delete_removed")? {
            config.delete_removed = delete;
        }
        if let Some(log) = vars.get("sync_log") {
            config.sync_log = Some(PathBuf::from(log));
        }
        Ok(config)
    }

    /// Validate everything and compile the filters.
    ///
    /// Fails before any walk when the source root is missing, a pattern does
    /// not compile, or a size expression is malformed.
    pub fn walk_options(&self) -> Result<WalkOptions> {
        if !self.src_dir.is_dir() {
            return Err(Error::SourceRootNotFound(self.src_dir.clone()));
        }
        if self.max_workers == 0 {
            return Err(Error::Config("max_workers must be at least 1".into()));
        }
        if self.ignore_file_name.is_empty() || self.ignore_file_name.contains(['/', '\\']) {
            return Err(Error::Config(format!(
                "ignore_file_name `{}` must be a plain file name",
                self.ignore_file_name
            )));
        }

        let global = self
            .global_ignores
            .iter()
            .map(|raw| Pattern::regex(raw))
            .collect::<Result<Vec<_>>>()?;
        let size_rules = SizeRules::parse(
            self.size_limits
                .iter()
                .map(|(pattern, expression)| (pattern.as_str(), expression.as_str())),
        )?;

        Ok(WalkOptions::new(&self.src_dir)
            .global(IgnoreScope::new(global))
            .size_rules(size_rules)
            .rule_file(&self.ignore_file_name))
    }

    pub fn compare_threshold(&self) -> Duration {
        Duration::from_secs(self.compare_threshold_secs)
    }
}

fn is_env_file(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == ".env")
        || path.extension().is_some_and(|ext| ext == "env")
}

fn env_yaml<T: DeserializeOwned>(vars: &BTreeMap<String, String>, key: &str) -> Result<Option<T>> {
    vars.get(key)
        .map(|value| {
            serde_yaml::from_str(value).map_err(|e| {
                Error::Config(format!("{}: {e}", key.to_ascii_uppercase()))
            })
        })
        .transpose()
}

fn env_parse<T>(vars: &BTreeMap<String, String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    vars.get(key)
        .map(|value| {
            value.trim().parse().map_err(|e| {
                Error::Config(format!("{}: {e}", key.to_ascii_uppercase()))
            })
        })
        .transpose()
}
