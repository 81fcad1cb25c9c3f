// ── Core error types ──
//
// Errors raised inside intellipool-core. The public `Controller` surface
// logs these and reports a plain success flag; they are exposed so that
// embedders calling the lower-level pieces can match on them.
// The `From<intellipool_api::Error>` impl translates wire-layer errors
// into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to controller at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Unsupported controller address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Controller disconnected")]
    ControllerDisconnected,

    #[error("Controller did not answer within {timeout_ms}ms ({operation})")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    // ── Request errors ───────────────────────────────────────────────
    #[error("Unknown equipment kind: {tag}")]
    UnknownKind { tag: String },

    #[error("Request rejected by controller: {message}")]
    Rejected { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<intellipool_api::Error> for CoreError {
    fn from(err: intellipool_api::Error) -> Self {
        use intellipool_api::Error as Api;

        match err {
            Api::UnsupportedScheme { scheme } => CoreError::InvalidAddress {
                address: String::new(),
                reason: format!("scheme '{scheme}' selects no transport"),
            },
            Api::Http(ref e) => CoreError::ConnectionFailed {
                url: e.url().map(ToString::to_string).unwrap_or_default(),
                reason: e.to_string(),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            Api::Handshake { message } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("hub handshake failed: {message}"),
            },
            Api::WebSocketSend(_) | Api::NotOpen => CoreError::ControllerDisconnected,
            Api::Timeout {
                operation,
                timeout_ms,
            } => CoreError::Timeout {
                operation,
                timeout_ms,
            },
            Api::Invocation { message, .. } => CoreError::Rejected { message },
            Api::Json(e) => CoreError::Internal(format!("JSON error: {e}")),
            Api::InvalidUtf8(e) => CoreError::Internal(format!("invalid UTF-8: {e}")),
        }
    }
}
