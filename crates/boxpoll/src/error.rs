//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use boxpoll_config::ConfigError;
use boxpoll_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error("Invalid configuration: {source}")]
    #[diagnostic(
        code(boxpoll::config),
        help("Check the configuration at {path}.\nRun: boxpoll check")
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("No streams configured")]
    #[diagnostic(
        code(boxpoll::no_streams),
        help(
            "Add a stream table to {path}, for example:\n\n  \
             [streams.devices]\n  \
             path = \"lan/browser/pub/\""
        )
    )]
    NoStreams { path: String },

    #[error("Stream '{id}' is not configured")]
    #[diagnostic(code(boxpoll::unknown_stream), help("Configured streams: {available}"))]
    UnknownStream { id: String, available: String },

    // ── Runtime ──────────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(code(boxpoll::scheduler))]
    Scheduler(#[from] CoreError),

    #[error("Could not build HTTP client")]
    #[diagnostic(code(boxpoll::http_client))]
    HttpClient(#[source] reqwest::Error),

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not encode output: {0}")]
    #[diagnostic(code(boxpoll::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn config(path: &std::path::Path, source: ConfigError) -> Self {
        Self::Config {
            path: path.display().to_string(),
            source,
        }
    }

    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::NoStreams { .. } => exit_code::CONFIG,
            Self::UnknownStream { .. } => exit_code::NOT_FOUND,
            Self::Scheduler(CoreError::Config { .. }) => exit_code::USAGE,
            Self::HttpClient(_) => exit_code::CONNECTION,
            _ => exit_code::GENERAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_kind() {
        let err = CliError::NoStreams {
            path: "/tmp/config.toml".into(),
        };
        assert_eq!(err.exit_code(), exit_code::CONFIG);

        let err = CliError::UnknownStream {
            id: "wifi".into(),
            available: "devices".into(),
        };
        assert_eq!(err.exit_code(), exit_code::NOT_FOUND);

        let err = CliError::from(CoreError::ShutDown);
        assert_eq!(err.exit_code(), exit_code::GENERAL);
    }
}
