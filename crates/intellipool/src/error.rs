//! CLI error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use intellipool_config::ConfigError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to controller at {url}")]
    #[diagnostic(
        code(intellipool::connection_failed),
        help(
            "Check that the controller is reachable.\n\
             Hub addresses look like http://<host>/hub, socket addresses like ws://<host>:6680.\n\
             Run with -v for details."
        )
    )]
    ConnectionFailed { url: String },

    #[error("Lost the connection to the controller")]
    #[diagnostic(code(intellipool::connection_lost))]
    ConnectionLost,

    // ── Requests ─────────────────────────────────────────────────────
    #[error("Request '{operation}' could not be sent")]
    #[diagnostic(
        code(intellipool::request_failed),
        help("Run with -v to see why the controller rejected it.")
    )]
    RequestFailed { operation: String },

    #[error("No answer to '{operation}' within {seconds}s")]
    #[diagnostic(
        code(intellipool::timeout),
        help("Increase the wait with --timeout.")
    )]
    NoResponse { operation: String, seconds: u64 },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(intellipool::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(intellipool::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: intellipool config add <name> <server>"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No controller configured")]
    #[diagnostic(
        code(intellipool::no_config),
        help(
            "Pass --server, set INTELLIPOOL_SERVER, or add a profile with: \
             intellipool config add <name> <server>\n\
             Config file: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(intellipool::config))]
    Config(ConfigError),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(intellipool::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectionLost => exit_code::CONNECTION,
            Self::NoResponse { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::ProfileNotFound { .. } | Self::NoConfig { .. } => {
                exit_code::USAGE
            }
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::UnknownProfile { name } => CliError::ProfileNotFound {
                name,
                available: String::new(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(
            CliError::ConnectionFailed { url: "ws://x".into() }.exit_code(),
            exit_code::CONNECTION
        );
        assert_eq!(
            CliError::NoResponse {
                operation: "schedules".into(),
                seconds: 1
            }
            .exit_code(),
            exit_code::TIMEOUT
        );
        assert_eq!(
            CliError::NoConfig { path: String::new() }.exit_code(),
            exit_code::USAGE
        );
        assert_eq!(CliError::ConnectionLost.exit_code(), exit_code::CONNECTION);
    }

    #[test]
    fn config_validation_maps_to_usage() {
        let err: CliError = ConfigError::Validation {
            field: "server".into(),
            reason: "bad".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }
}
