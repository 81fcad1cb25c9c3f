use thiserror::Error;

/// Top-level error type for the `intellipool-api` crate.
///
/// Covers every failure mode of the wire layer: address selection,
/// websocket transport, the hub negotiate/handshake exchange, and envelope
/// encoding. `intellipool-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Addressing ──────────────────────────────────────────────────
    /// The URL scheme selects no known transport.
    #[error("Unsupported address scheme '{scheme}' (expected http, https, ws or wss)")]
    UnsupportedScheme { scheme: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error during hub negotiation.
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket send failed.
    #[error("WebSocket send failed: {0}")]
    WebSocketSend(String),

    /// The transport is not open (never connected, closing, or closed).
    #[error("Transport is not open")]
    NotOpen,

    /// Operation timed out.
    #[error("Timed out after {timeout_ms}ms waiting for {operation}")]
    Timeout { operation: &'static str, timeout_ms: u64 },

    // ── Hub protocol ────────────────────────────────────────────────
    /// The hub rejected the negotiate or handshake step.
    #[error("Hub handshake failed: {message}")]
    Handshake { message: String },

    /// The hub completed an invocation with an error.
    #[error("Hub invocation '{target}' failed: {message}")]
    Invocation { target: String, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A reassembled frame was not valid UTF-8.
    #[error("Frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

impl Error {
    /// Returns `true` if the error means the link itself is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::NotOpen | Self::WebSocketSend(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_lost_links_are_disconnects() {
        assert!(Error::NotOpen.is_disconnect());
        assert!(Error::WebSocketSend("broken pipe".into()).is_disconnect());
        assert!(!Error::WebSocketConnect("refused".into()).is_disconnect());
    }

    #[test]
    fn scheme_error_names_the_scheme() {
        let err = Error::UnsupportedScheme {
            scheme: "ftp".into(),
        };
        assert!(err.to_string().contains("'ftp'"));
    }
}
