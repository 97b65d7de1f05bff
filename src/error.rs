// src/error.rs
//! Error types with structured error handling.
//!
//! Error types form the vocabulary for failure modes of a fetch run.
//! Two families matter to callers: failures a data source reported for
//! a request, and violations of the engine's contract with its sources
//! (a source that never resolved a request it was handed).

use std::sync::Arc;
use thiserror::Error;

/// Why a fetch computation or a whole run failed.
///
/// `FetchError` is `Clone` because a single failed status cell is read by
/// every computation awaiting that request; each reader gets its own copy
/// of the same underlying cause.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("data source '{data_source}' failed: {cause}")]
    DataSource {
        data_source: String,
        cause: Arc<anyhow::Error>,
    },

    #[error("expected completed fetch for '{request}' from data source '{data_source}'")]
    IncompleteFetch {
        data_source: String,
        request: String,
    },

    #[error("type mismatch for '{request}' in data source '{data_source}'")]
    TypeMismatch {
        data_source: String,
        request: String,
    },

    #[error("{0}")]
    Client(Arc<anyhow::Error>),

    #[error("fetch did not complete within {limit} rounds")]
    RoundLimitExceeded { limit: usize },

    #[error("dispatch to data source '{data_source}' aborted: {reason}")]
    DispatchAborted { data_source: String, reason: String },

    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),
}

impl FetchError {
    /// Wraps an error reported by a data source for one of its requests.
    pub fn data_source(name: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        Self::DataSource {
            data_source: name.into(),
            cause: Arc::new(cause.into()),
        }
    }

    /// Wraps an error raised by client code inside a computation.
    pub fn client(cause: impl Into<anyhow::Error>) -> Self {
        Self::Client(Arc::new(cause.into()))
    }

    /// Whether this error means a data source broke its obligation to
    /// resolve every request it was handed (or was handed the wrong type).
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::IncompleteFetch { .. } | Self::TypeMismatch { .. }
        )
    }

    /// Name of the data source this error is attributed to, if any.
    pub fn data_source_name(&self) -> Option<&str> {
        match self {
            Self::DataSource { data_source, .. }
            | Self::IncompleteFetch { data_source, .. }
            | Self::TypeMismatch { data_source, .. }
            | Self::DispatchAborted { data_source, .. } => Some(data_source),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for FetchError {
    fn from(err: anyhow::Error) -> Self {
        FetchError::Client(Arc::new(err))
    }
}

/// Failure to install the log4rs logger.
#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Filesystem IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid logging configuration: {0}")]
    Config(#[from] log4rs::config::runtime::ConfigErrors),

    #[error("A logger is already installed: {0}")]
    AlreadyInstalled(#[from] log::SetLoggerError),
}

/// Result type alias for convenience
pub type Result<T, E = FetchError> = std::result::Result<T, E>;
