//! Error types for stream management.
//!
//! Every failure of `send`/`get` is returned as a [`StreamError`]. Timeouts
//! and unknown ids are routine outcomes, so callers are expected to match on
//! [`StreamError::kind`] rather than treat every error as fatal.

use crate::stream::TransmissionMode;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Failure reported by the execution engine.
///
/// The coordinator never inspects these beyond logging; they are surfaced to
/// callers unchanged inside [`StreamError::EngineFailure`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("engine error {code}: {message}")]
pub struct EngineError {
    /// Engine-specific error code.
    pub code: i32,
    /// Human-readable description.
    pub message: String,
}

impl EngineError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Coarse classification of a [`StreamError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown stream name or correlation id.
    NotFound,
    /// Stream name already registered.
    AlreadyExists,
    /// Unknown or inapplicable source/sink selector.
    InvalidLink,
    /// Mixed transmission modes on one stream.
    ModeMismatch,
    /// Indexed-mode result queue overflowed, or a source has too many unmatched sends.
    Overflow,
    /// Deadline elapsed before a result arrived.
    Timeout,
    /// The stream was torn down while the call was in progress.
    InstanceDestroyed,
    /// Failure passed through from the execution engine.
    EngineFailure,
    /// Unparseable graph description or configuration.
    InvalidConfig,
}

/// Errors returned by stream operations.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("stream '{0}' does not exist")]
    StreamNotFound(String),

    #[error("no pending result for unique id {0}")]
    ResultNotFound(u64),

    #[error("stream '{0}' already exists")]
    AlreadyExists(String),

    #[error("invalid link: {0}")]
    InvalidLink(String),

    #[error("transmission mode mismatch: stream uses {current:?}, call requires {requested:?}")]
    ModeMismatch {
        current: TransmissionMode,
        requested: TransmissionMode,
    },

    #[error("result queue of sink {sink} overflowed, {dropped} result(s) dropped")]
    Overflow { sink: usize, dropped: u64 },

    #[error("entry point {entry_point} already has {outstanding} unmatched send(s)")]
    Busy { entry_point: usize, outstanding: u64 },

    #[error("no result within {waited:?}")]
    Timeout { waited: Duration },

    #[error("stream instance was destroyed")]
    InstanceDestroyed,

    #[error(transparent)]
    EngineFailure(#[from] EngineError),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StreamError::StreamNotFound(_) | StreamError::ResultNotFound(_) => ErrorKind::NotFound,
            StreamError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            StreamError::InvalidLink(_) => ErrorKind::InvalidLink,
            StreamError::ModeMismatch { .. } => ErrorKind::ModeMismatch,
            StreamError::Overflow { .. } | StreamError::Busy { .. } => ErrorKind::Overflow,
            StreamError::Timeout { .. } => ErrorKind::Timeout,
            StreamError::InstanceDestroyed => ErrorKind::InstanceDestroyed,
            StreamError::EngineFailure(_) => ErrorKind::EngineFailure,
            StreamError::InvalidConfig(_) | StreamError::Io(_) => ErrorKind::InvalidConfig,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::InvalidConfig(err.to_string())
    }
}

impl From<toml::de::Error> for StreamError {
    fn from(err: toml::de::Error) -> Self {
        StreamError::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(StreamError::StreamNotFound("s".into()).kind(), ErrorKind::NotFound);
        assert_eq!(StreamError::ResultNotFound(7).kind(), ErrorKind::NotFound);
        assert!(StreamError::Timeout {
            waited: Duration::from_millis(5)
        }
        .is_timeout());
        assert_eq!(
            StreamError::from(EngineError::new(3, "push failed")).kind(),
            ErrorKind::EngineFailure
        );
    }

    #[test]
    fn test_engine_error_passes_through() {
        let err = StreamError::from(EngineError::new(42, "device lost"));
        assert_eq!(err.to_string(), "engine error 42: device lost");
        match err {
            StreamError::EngineFailure(inner) => assert_eq!(inner.code, 42),
            other => panic!("unexpected {other:?}"),
        }
    }
}
