//! Failures reported by the broker connection layer.

use std::{io, time::Duration};

use thiserror::Error;

/// Connection-level failure raised by the external broker connection.
///
/// Surfaced to observers through [`StreamEvent::Error`](crate::StreamEvent::Error);
/// never returned to the code writing records.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("broker unreachable: {0}")]
    Unreachable(String),
    #[error("failed to open exchange `{name}`: {reason}")]
    Exchange { name: String, reason: String },
    #[error("connection closed by broker: {0}")]
    Closed(String),
    #[error("tls setup failed: {0}")]
    Tls(String),
    /// Reconnect attempts kept failing past the backoff deadline. Retries
    /// continue at the maximum delay.
    #[error("no connection within the {0:?} retry deadline")]
    RetryDeadline(Duration),
    #[error("{0}")]
    Other(String),
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        ConnectionError::Unreachable(err.to_string())
    }
}

impl From<native_tls::Error> for ConnectionError {
    fn from(err: native_tls::Error) -> Self {
        ConnectionError::Tls(err.to_string())
    }
}

/// A single publish attempt was rejected by the broker.
///
/// Delivered through [`StreamEvent::AckError`](crate::StreamEvent::AckError).
/// The message is considered attempted and is not retried.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("publish to `{routing_key}` failed: {reason}")]
pub struct PublishError {
    pub routing_key: String,
    pub reason: String,
}

impl PublishError {
    pub fn new(routing_key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            reason: reason.into(),
        }
    }
}
