use std::path::PathBuf;

use thiserror::Error;

/// Problems with the run configuration. All of them abort the run before a
/// single virtual user is started.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("ramp profile has no stages")]
    EmptyStages,

    #[error("stage {stage}: target must be non-negative, got {value}")]
    NegativeTarget { stage: usize, value: i64 },

    #[error("start VUs must be non-negative, got {0}")]
    NegativeStartVus(i64),

    #[error("duration must be non-negative, got {0:?}")]
    NegativeDuration(String),

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("{value} VUs requested, at most {max} are supported")]
    TooManyVus { value: u64, max: u64 },

    #[error("ramp profile never schedules a virtual user")]
    NoVirtualUsers,

    #[error("target list is empty")]
    EmptyTargets,

    #[error("invalid base URL {url:?}: {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: sonic_rs::Error,
    },
}

/// A request that never produced a response.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Other(err.to_string())
        }
    }
}
