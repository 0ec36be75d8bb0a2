//! Error types for bucket-backup

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while loading configuration, walking the source tree, or syncing.
#[derive(Debug, Error)]
pub enum Error {
    /// A gitignore line or regular expression failed to compile.
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A size limit such as `">=5"` could not be parsed.
    #[error("invalid size expression `{expression}` for pattern `{pattern}`: {reason}")]
    InvalidSizeExpression {
        pattern: String,
        expression: String,
        reason: String,
    },

    /// A single entry of the source tree could not be read.
    #[error("cannot access {}: {source}", .path.display())]
    FilesystemAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configured source root does not exist or is not a directory.
    #[error("source root {} does not exist or is not a directory", .0.display())]
    SourceRootNotFound(PathBuf),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid YAML in {}: {source}", .path.display())]
    ConfigYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid environment file {}: {source}", .path.display())]
    ConfigEnv {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },

    /// An object key that would escape the bucket or is otherwise malformed.
    #[error("invalid object key `{0}`")]
    ObjectKey(String),

    #[error("sync interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Wrap an I/O error with the path it happened on.
    pub fn access(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::FilesystemAccess {
            path: path.into(),
            source,
        }
    }

    /// True for errors that must abort the run before any walk starts.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Error::InvalidPattern { .. }
                | Error::InvalidSizeExpression { .. }
                | Error::SourceRootNotFound(_)
                | Error::Config(_)
                | Error::ConfigYaml { .. }
                | Error::ConfigEnv { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
