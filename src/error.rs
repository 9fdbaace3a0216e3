//! Error types for the coupling-core crate.
//!
//! One unified enumeration, in the style most of this crate's ecosystem uses:
//! a variant per failure class, `#[from]` conversions for the two external
//! error types we actually surface (`std::io::Error`, `rusqlite::Error`), and
//! a catch-all for context-specific messages.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CouplingError {
    /// `git log` parsing hit an error-severity validation issue while
    /// running in `strict` mode (see [`crate::config::ValidationMode`]).
    #[error("git log parse error: {0}")]
    ParseError(String),

    /// An identity-index invariant was violated (should not happen given
    /// the rename protocol in [`crate::identity`]).
    #[error("file identity error: {0}")]
    IdentityError(String),

    /// A configured option failed validation before any work started.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// The `git` subprocess could not be spawned, or exited non-zero on a
    /// call where failure is not informational-only.
    #[error("git subprocess failed: {0}")]
    SubprocessError(String),

    /// Clustering was asked to dispatch to an algorithm name the registry
    /// doesn't know.
    #[error("unknown clustering algorithm: {0}")]
    UnknownAlgorithm(String),

    /// A task was cancelled cooperatively via its abort flag.
    #[error("task cancelled")]
    Cancelled,

    /// Underlying I/O failure (subprocess pipes, columnar files, config
    /// files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Relational store failure. `rusqlite` already carries rich context
    /// in its `Display` impl, so we just wrap it.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Columnar (de)serialization failure.
    #[error("columnar codec error: {0}")]
    Codec(String),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    Custom(String),
}

pub type Result<T> = std::result::Result<T, CouplingError>;

impl From<bincode::Error> for CouplingError {
    fn from(e: bincode::Error) -> Self {
        CouplingError::Codec(e.to_string())
    }
}
