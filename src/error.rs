//! Error types for tickermap.
//!
//! Registration and unregistration are total operations and never fail.
//! The only fallible surfaces are configuration validation and the
//! callbacks themselves, whose failures are logged by the expiry driver
//! rather than returned to the caller.

use std::time::Duration;

/// Errors produced while validating an [`ExpiryConfig`](crate::ExpiryConfig).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// The driver cannot poll on a zero-length period
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    /// A zero timeout would fail every callback immediately
    #[error("callback timeout must be greater than zero")]
    ZeroCallbackTimeout,

    /// A zero threshold would compact the index on every tick
    #[error("compaction threshold must be greater than zero")]
    ZeroCompactionThreshold,
}

/// Failure reported by (or on behalf of) an expiry callback.
///
/// Callbacks return `Result<(), CallbackError>`. The driver catches every
/// variant at the tick boundary, logs it and moves on to the next due entry.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// The callback reported a failure with a message
    #[error("{0}")]
    Failed(String),

    /// The callback propagated an arbitrary error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// The callback task panicked
    #[error("callback panicked: {0}")]
    Panicked(String),

    /// The callback did not complete within the configured timeout.
    /// The task keeps running in the background.
    #[error("callback did not finish within {0:?}")]
    TimedOut(Duration),

    /// The callback task was cancelled by the runtime
    #[error("callback task was cancelled")]
    Cancelled,
}

impl CallbackError {
    /// Convenience constructor for [`CallbackError::Failed`].
    pub fn msg(message: impl Into<String>) -> Self {
        CallbackError::Failed(message.into())
    }
}
