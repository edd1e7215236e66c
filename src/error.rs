//! # Command Bus Error Types
//!
//! Every failure the bus can observe is a [`BusError`]. The same value is
//! broadcast to the registered error handlers and returned to the caller, so
//! it is cheap to clone: foreign error sources are held behind an `Arc`.

use std::sync::Arc;
use thiserror::Error;

/// Error type returned by [`Handler`](crate::Handler) implementations.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures reported by the command bus
#[derive(Error, Debug, Clone)]
pub enum BusError {
    #[error("invalid command")]
    InvalidCommand,

    #[error("the command bus is not initialized")]
    NotInitialized,

    #[error("the command bus is shutting down")]
    ShuttingDown,

    #[error("handler {handler} failed: {source}")]
    HandlerFailed {
        handler: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("handler {handler} panicked: {message}")]
    HandlerPanicked { handler: String, message: String },

    #[error("failed to spawn command bus worker: {source}")]
    WorkerSpawn {
        #[source]
        source: Arc<std::io::Error>,
    },
}

impl BusError {
    /// Wrap an error returned by the named handler
    pub fn handler_failed(handler: impl Into<String>, source: HandlerError) -> Self {
        Self::HandlerFailed {
            handler: handler.into(),
            source: Arc::from(source),
        }
    }

    /// True for the rejections produced by the validation gate
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidCommand | Self::NotInitialized | Self::ShuttingDown
        )
    }

    /// True when a registered handler failed or panicked
    pub fn is_handler_failure(&self) -> bool {
        matches!(self, Self::HandlerFailed { .. } | Self::HandlerPanicked { .. })
    }
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        Self::WorkerSpawn {
            source: Arc::new(err),
        }
    }
}

/// Configuration loading failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration source error: {0}")]
    Source(#[from] ::config::ConfigError),

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

pub type Result<T> = std::result::Result<T, BusError>;
