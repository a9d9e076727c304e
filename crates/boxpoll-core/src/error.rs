// ── Core error types ──
//
// Three families, matching where a failure is handled:
// - `CoreError`     surfaces to whoever composes the scheduler (fatal at setup).
// - `FetchError`    comes from the fetch collaborator and is absorbed per tick.
// - `NotifierError` comes from the change notifier and is logged and dropped.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by scheduler construction and control operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// An interval, duration or TTL outside its allowed bounds.
    #[error("invalid {field}: {reason}")]
    Config { field: String, reason: String },

    #[error("unknown stream: {id}")]
    UnknownStream { id: String },

    #[error("stream already registered: {id}")]
    DuplicateStream { id: String },

    #[error("scheduler has been shut down")]
    ShutDown,
}

impl CoreError {
    pub(crate) fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_stream(id: &str) -> Self {
        Self::UnknownStream { id: id.to_owned() }
    }
}

/// The fetch collaborator failed to produce a value.
///
/// Every variant is handled the same way by the scheduler: the cache is
/// left untouched and the next scheduled tick retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote error{}: {message}", status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Remote {
        status: Option<u16>,
        message: String,
    },

    #[error("fetch timed out after {}ms", timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("fetch cancelled")]
    Cancelled,

    #[error("failed to decode response: {0}")]
    Decode(String),
}

/// A change notifier refused or failed to deliver an update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("notifier failed: {0}")]
pub struct NotifierError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_error_includes_status_when_present() {
        let err = FetchError::Remote {
            status: Some(503),
            message: "busy".into(),
        };
        assert_eq!(err.to_string(), "remote error (503): busy");

        let err = FetchError::Remote {
            status: None,
            message: "auth_required".into(),
        };
        assert_eq!(err.to_string(), "remote error: auth_required");
    }

    #[test]
    fn timeout_renders_millis() {
        let err = FetchError::Timeout {
            timeout: Duration::from_secs(2),
        };
        assert_eq!(err.to_string(), "fetch timed out after 2000ms");
    }
}
