//! Error types for the analytics pipeline.
//!
//! One rich enum for internal use; every variant maps to an error kind named
//! in the design (`IOError`, `ParseError`, `NetworkError`, `ServerError`,
//! `StateError`, `ConfigError`). `ParseError` is always surfaced to callers
//! wrapped as an `Io` variant, per the settings-load contract.

use std::path::PathBuf;

/// All errors that can occur in `telemetry-core` operations.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file malformed: {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("file not lockable (held by another process): {path}")]
    Contention { path: PathBuf },

    #[error("network error contacting collector: {0}")]
    Network(String),

    #[error("collector returned non-2xx status {status}: {message}")]
    Server { status: u16, message: String },

    #[error("operation attempted after close: {0}")]
    State(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AnalyticsError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        AnalyticsError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        AnalyticsError::Parse {
            path: path.into(),
            source,
        }
    }

    pub fn contention(path: impl Into<PathBuf>) -> Self {
        AnalyticsError::Contention { path: path.into() }
    }
}

/// Parse failures surface as IO errors, per the settings-load contract
/// ("parse failure yields an IO-kind error wrapping the parse error").
impl From<AnalyticsError> for std::io::Error {
    fn from(err: AnalyticsError) -> std::io::Error {
        std::io::Error::other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
