// Transport selection and the shared open/send/close surface.
//
// The address scheme picks the link: `http`/`https` negotiate a streaming
// hub, `ws`/`wss` open the controller's raw socket. Both expose the same
// operations so the controller above never branches on the kind.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use url::Url;

use crate::error::Error;
use crate::hub::{self, HubLink, HubReader};
use crate::throttle::DEFAULT_SEND_INTERVAL;
use crate::websocket::{self, SocketLink, SocketReader};

pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Configuration ────────────────────────────────────────────────────

/// Timing knobs shared by both transports.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Upper bound on negotiate + upgrade + handshake.
    pub connect_timeout: Duration,
    /// How long a hub `Request` invocation may wait for its completion.
    pub request_timeout: Duration,
    /// Minimum spacing between raw-socket sends.
    pub send_interval: Duration,
    /// Hub ping cadence.
    pub keepalive_interval: Duration,
    /// Hub silence after which the link counts as lost.
    pub server_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            send_interval: DEFAULT_SEND_INTERVAL,
            keepalive_interval: Duration::from_secs(5),
            server_timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build the HTTP client used for hub negotiation.
    pub fn build_http_client(&self) -> Result<reqwest::Client, Error> {
        let client = reqwest::Client::builder()
            .timeout(self.connect_timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(concat!("intellipool/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(client)
    }
}

// ── Kind & state ─────────────────────────────────────────────────────

/// Which link an address selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// Negotiated streaming hub (`http`/`https`).
    Hub,
    /// Raw controller socket (`ws`/`wss`).
    Socket,
}

impl TransportKind {
    pub fn for_url(url: &Url) -> Result<Self, Error> {
        match url.scheme() {
            "http" | "https" => Ok(Self::Hub),
            "ws" | "wss" => Ok(Self::Socket),
            other => Err(Error::UnsupportedScheme {
                scheme: other.to_owned(),
            }),
        }
    }

    /// Whether this link recovers on its own after an unexpected close.
    pub fn reconnects(self) -> bool {
        matches!(self, Self::Hub)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hub => f.write_str("hub"),
            Self::Socket => f.write_str("socket"),
        }
    }
}

/// Lifecycle of one opened link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Open,
    Closing,
    Closed,
}

// ── Transport ────────────────────────────────────────────────────────

enum Link {
    Hub(HubLink),
    Socket(SocketLink),
}

enum Source {
    Hub(HubReader),
    Socket(SocketReader),
}

/// Outbound side of an open link.
pub struct Transport {
    kind: TransportKind,
    url: Url,
    state: Arc<watch::Sender<TransportState>>,
    link: Link,
}

/// Inbound side of an open link; yields whole text messages.
pub struct Inbound {
    state: Arc<watch::Sender<TransportState>>,
    source: Source,
}

impl Transport {
    /// Open the link the URL's scheme selects.
    pub async fn connect(url: &Url, config: &TransportConfig) -> Result<(Self, Inbound), Error> {
        let kind = TransportKind::for_url(url)?;
        let (link, source) = match kind {
            TransportKind::Hub => {
                let (link, reader) = hub::connect(url, config).await?;
                (Link::Hub(link), Source::Hub(reader))
            }
            TransportKind::Socket => {
                let (link, reader) = websocket::connect(url, config).await?;
                (Link::Socket(link), Source::Socket(reader))
            }
        };

        let state = Arc::new(watch::Sender::new(TransportState::Open));
        let transport = Self {
            kind,
            url: url.clone(),
            state: Arc::clone(&state),
            link,
        };
        Ok((transport, Inbound { state, source }))
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state() == TransportState::Open
    }

    /// Send one text message. Fails with [`Error::NotOpen`] unless open.
    pub async fn send(&self, text: &str) -> Result<(), Error> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        let result = match &self.link {
            Link::Hub(link) => link.send(text).await,
            Link::Socket(link) => link.send(text).await,
        };
        if let Err(ref e) = result {
            if e.is_disconnect() {
                self.state.send_replace(TransportState::Closed);
            }
        }
        result
    }

    /// Close the link. Safe to call more than once.
    pub async fn close(&self) {
        if self.state() == TransportState::Closed {
            return;
        }
        self.state.send_replace(TransportState::Closing);
        match &self.link {
            Link::Hub(link) => link.close().await,
            Link::Socket(link) => link.close().await,
        }
        self.state.send_replace(TransportState::Closed);
        tracing::debug!(kind = %self.kind, url = %self.url, "transport closed");
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("kind", &self.kind)
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for Inbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source {
            Source::Hub(_) => TransportKind::Hub,
            Source::Socket(_) => TransportKind::Socket,
        };
        f.debug_struct("Inbound")
            .field("source", &source)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl Inbound {
    /// Next whole text message, or `None` once the link has ended.
    pub async fn next_text(&mut self) -> Option<String> {
        let next = match &mut self.source {
            Source::Hub(reader) => reader.next_text().await,
            Source::Socket(reader) => reader.next_text().await,
        };
        if next.is_none() {
            self.state.send_replace(TransportState::Closed);
        }
        next
    }

    /// Subscribe to the link's lifecycle.
    pub fn state(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }
}
