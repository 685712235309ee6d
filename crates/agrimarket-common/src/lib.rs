//! # AgriMarket Common
//!
//! Shared error type, logging setup and retry helpers for the AgriMarket
//! offline worker crates.

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Errors shared by the worker crates.
#[derive(Error, Debug)]
pub enum AgriError {
    /// Worker configuration could not be read or is inconsistent.
    #[error("Config error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<BoxedSource>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// A bug: something that should not happen did. Carries the backtrace
    /// of the place it was detected.
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        backtrace: Box<backtrace::Backtrace>,
    },
}

impl AgriError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            backtrace: Box::new(backtrace::Backtrace::new()),
        }
    }

    /// Short name used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            AgriError::Config { .. } => "config",
            AgriError::InvalidArgument(_) => "invalid_argument",
            AgriError::Io(_) => "io",
            AgriError::Timeout(_) => "timeout",
            AgriError::Internal { .. } => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, AgriError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(AgriError::config("bad prefix").kind(), "config");
        assert_eq!(AgriError::Timeout(Duration::from_secs(1)).kind(), "timeout");
        assert_eq!(AgriError::internal("task panicked").kind(), "internal");
    }

    #[test]
    fn test_config_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing file");
        let err = AgriError::config_with_source("cannot read worker config", io);

        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("missing file"));
        assert_eq!(err.to_string(), "Config error: cannot read worker config");
    }

    #[test]
    fn test_internal_error_message() {
        let err = AgriError::internal("revalidate task panicked");
        assert_eq!(err.to_string(), "Internal error: revalidate task panicked");
    }
}
