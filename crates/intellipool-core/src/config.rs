// ── Runtime connection configuration ──
//
// Tuning for one `Controller`. Never touches disk; the CLI (or any other
// embedder) builds a `ControllerConfig` and hands it in.

use std::time::Duration;

use intellipool_api::TransportConfig;

/// Retry schedule for the streaming hub after an unexpected close.
pub const DEFAULT_RECONNECT_DELAYS: [Duration; 3] = [
    Duration::from_secs(0),
    Duration::from_secs(5),
    Duration::from_secs(20),
];

/// Tuning for a single controller connection.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Minimum spacing between raw-socket sends.
    pub send_interval: Duration,
    /// Hub ping cadence.
    pub keepalive_interval: Duration,
    /// Hub silence after which the link counts as lost.
    pub server_timeout: Duration,
    /// How long one hub request may wait for its completion.
    pub request_timeout: Duration,
    /// Upper bound on opening a transport.
    pub connect_timeout: Duration,
    /// Delays before each automatic hub reconnect attempt.
    pub reconnect_delays: Vec<Duration>,
    /// Buffered data events per subscriber before the slowest one lags.
    pub event_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            send_interval: Duration::from_millis(50),
            keepalive_interval: Duration::from_secs(5),
            server_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            reconnect_delays: DEFAULT_RECONNECT_DELAYS.to_vec(),
            event_capacity: 1024,
        }
    }
}

impl ControllerConfig {
    pub(crate) fn transport(&self) -> TransportConfig {
        TransportConfig {
            connect_timeout: self.connect_timeout,
            request_timeout: self.request_timeout,
            send_interval: self.send_interval,
            keepalive_interval: self.keepalive_interval,
            server_timeout: self.server_timeout,
        }
    }
}
