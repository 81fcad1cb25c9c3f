//! Raw WebSocket transport.
//!
//! Talks straight to the controller's socket (`ws://<host>:6680`). Every
//! outbound frame goes through the [`SendThrottle`]; inbound messages are
//! rebuilt from their fragments by [`FrameAssembler`] before decoding.
//!
//! There is no reconnection here -- a dropped socket ends the inbound
//! stream and the caller decides whether to connect again.

use bytes::{Bytes, BytesMut};
use futures_util::stream::{BoxStream, SplitSink};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::Error;
use crate::throttle::SendThrottle;
use crate::transport::{TransportConfig, millis};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── Fragments ────────────────────────────────────────────────────────

/// Frame type of one received fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentKind {
    /// First (or only) fragment of a text message.
    Text,
    /// First (or only) fragment of a binary message.
    Binary,
    /// A follow-on fragment of the message in progress.
    Continuation,
    /// Ping / pong / other control frames.
    Control,
    /// The peer's close frame.
    Close,
}

/// One piece of an inbound message as read from the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub kind: FragmentKind,
    pub payload: Bytes,
    pub end_of_message: bool,
}

impl Fragment {
    pub fn new(kind: FragmentKind, payload: impl Into<Bytes>, end_of_message: bool) -> Self {
        Self {
            kind,
            payload: payload.into(),
            end_of_message,
        }
    }

    /// Map a tungstenite message onto a fragment.
    ///
    /// Complete text/binary messages become a single terminal fragment;
    /// raw frames keep their opcode and FIN bit.
    pub fn from_message(message: Message) -> Self {
        match message {
            Message::Text(text) => {
                Self::new(FragmentKind::Text, Bytes::copy_from_slice(text.as_bytes()), true)
            }
            Message::Binary(data) => {
                Self::new(FragmentKind::Binary, Bytes::copy_from_slice(&data), true)
            }
            Message::Close(_) => Self::new(FragmentKind::Close, Bytes::new(), true),
            Message::Ping(_) | Message::Pong(_) => {
                Self::new(FragmentKind::Control, Bytes::new(), true)
            }
            Message::Frame(frame) => {
                let kind = match frame.header().opcode {
                    OpCode::Data(Data::Text) => FragmentKind::Text,
                    OpCode::Data(Data::Continue) => FragmentKind::Continuation,
                    OpCode::Data(_) => FragmentKind::Binary,
                    OpCode::Control(_) => FragmentKind::Control,
                };
                let end_of_message = frame.header().is_final;
                Self::new(kind, Bytes::copy_from_slice(frame.payload()), end_of_message)
            }
        }
    }
}

// ── FrameAssembler ───────────────────────────────────────────────────

/// Outcome of feeding one fragment to the assembler.
#[derive(Debug, PartialEq, Eq)]
pub enum Assembled {
    /// More fragments are needed.
    Pending,
    /// A complete text message.
    Text(String),
    /// A non-text message was seen; the read attempt was abandoned.
    Skipped,
    /// The peer closed the socket.
    Closed,
}

/// Accumulates text fragments until the end-of-message flag.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
    in_text: bool,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: Fragment) -> Result<Assembled, Error> {
        match fragment.kind {
            FragmentKind::Text | FragmentKind::Continuation => {
                if fragment.kind == FragmentKind::Text {
                    self.buf.clear();
                    self.in_text = true;
                } else if !self.in_text {
                    // Tail of a message we already abandoned.
                    return Ok(Assembled::Skipped);
                }

                self.buf.extend_from_slice(&fragment.payload);
                if !fragment.end_of_message {
                    return Ok(Assembled::Pending);
                }

                self.in_text = false;
                let bytes = self.buf.split().freeze();
                Ok(Assembled::Text(String::from_utf8(bytes.to_vec())?))
            }
            FragmentKind::Binary => {
                self.reset();
                Ok(Assembled::Skipped)
            }
            FragmentKind::Control => Ok(Assembled::Pending),
            FragmentKind::Close => {
                self.reset();
                Ok(Assembled::Closed)
            }
        }
    }

    fn reset(&mut self) {
        self.buf.clear();
        self.in_text = false;
    }
}

// ── SocketReader ─────────────────────────────────────────────────────

/// Inbound half of the raw socket.
pub struct SocketReader {
    fragments: BoxStream<'static, Result<Fragment, Error>>,
    assembler: FrameAssembler,
}

impl SocketReader {
    /// Build a reader over any fragment source.
    pub fn from_fragments<S>(fragments: S) -> Self
    where
        S: Stream<Item = Result<Fragment, Error>> + Send + 'static,
    {
        Self {
            fragments: fragments.boxed(),
            assembler: FrameAssembler::new(),
        }
    }

    fn from_websocket<S>(read: S) -> Self
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Send + 'static,
    {
        Self::from_fragments(read.map(|frame| {
            frame
                .map(Fragment::from_message)
                .map_err(|e| Error::WebSocketConnect(e.to_string()))
        }))
    }

    /// Read until one whole text message has been reassembled.
    ///
    /// Returns `None` once the socket is closed or fails. Non-text
    /// messages and invalid UTF-8 are logged and skipped.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            let fragment = match self.fragments.next().await {
                Some(Ok(fragment)) => fragment,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket read failed");
                    return None;
                }
                None => {
                    tracing::info!("WebSocket stream ended");
                    return None;
                }
            };

            match self.assembler.push(fragment) {
                Ok(Assembled::Text(text)) => return Some(text),
                Ok(Assembled::Pending) => {}
                Ok(Assembled::Skipped) => {
                    tracing::debug!("non-text frame, read attempt abandoned");
                }
                Ok(Assembled::Closed) => {
                    tracing::info!("WebSocket close frame received");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable frame");
                }
            }
        }
    }
}

// ── SocketLink ───────────────────────────────────────────────────────

/// Outbound half of the raw socket.
pub(crate) struct SocketLink {
    sink: Mutex<SplitSink<WsStream, Message>>,
    throttle: SendThrottle,
}

impl SocketLink {
    pub(crate) async fn send(&self, text: &str) -> Result<(), Error> {
        self.throttle
            .run(|| async move {
                let mut sink = self.sink.lock().await;
                sink.send(Message::text(text.to_owned()))
                    .await
                    .map_err(|e| Error::WebSocketSend(e.to_string()))
            })
            .await
    }

    pub(crate) async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.send(Message::Close(None)).await {
            tracing::debug!(error = %e, "close frame not sent");
        }
        let _ = sink.close().await;
    }
}

/// Open a raw socket to the controller.
pub(crate) async fn connect(
    url: &Url,
    config: &TransportConfig,
) -> Result<(SocketLink, SocketReader), Error> {
    tracing::info!(url = %url, "Connecting to controller socket");

    let (ws, _response) = tokio::time::timeout(
        config.connect_timeout,
        tokio_tungstenite::connect_async(url.as_str()),
    )
    .await
    .map_err(|_| Error::Timeout {
        operation: "socket connect",
        timeout_ms: millis(config.connect_timeout),
    })?
    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    tracing::info!("Controller socket connected");

    let (write, read) = ws.split();
    let link = SocketLink {
        sink: Mutex::new(write),
        throttle: SendThrottle::new(config.send_interval),
    };
    Ok((link, SocketReader::from_websocket(read)))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use futures_util::stream;

    use super::*;

    fn text(payload: &str, end: bool) -> Fragment {
        Fragment::new(FragmentKind::Text, payload.to_owned(), end)
    }

    fn cont(payload: &str, end: bool) -> Fragment {
        Fragment::new(FragmentKind::Continuation, payload.to_owned(), end)
    }

    #[test]
    fn single_fragment_message() {
        let mut asm = FrameAssembler::new();
        assert_eq!(
            asm.push(text("{}", true)).unwrap(),
            Assembled::Text("{}".into())
        );
    }

    #[test]
    fn three_fragments_make_one_message() {
        let mut asm = FrameAssembler::new();
        assert_eq!(asm.push(text(r#"{"command":"#, false)).unwrap(), Assembled::Pending);
        assert_eq!(asm.push(cont(r#""NotifyList","#, false)).unwrap(), Assembled::Pending);
        assert_eq!(
            asm.push(cont(r#""objectList":[]}"#, true)).unwrap(),
            Assembled::Text(r#"{"command":"NotifyList","objectList":[]}"#.into())
        );
    }

    #[test]
    fn control_frames_interleave_without_breaking_reassembly() {
        let mut asm = FrameAssembler::new();
        asm.push(text("ab", false)).unwrap();
        assert_eq!(
            asm.push(Fragment::new(FragmentKind::Control, Bytes::new(), true))
                .unwrap(),
            Assembled::Pending
        );
        assert_eq!(asm.push(cont("cd", true)).unwrap(), Assembled::Text("abcd".into()));
    }

    #[test]
    fn binary_aborts_the_read_attempt() {
        let mut asm = FrameAssembler::new();
        asm.push(text("partial", false)).unwrap();
        assert_eq!(
            asm.push(Fragment::new(FragmentKind::Binary, vec![1_u8, 2], false))
                .unwrap(),
            Assembled::Skipped
        );
        // The binary message's own continuation is ignored too.
        assert_eq!(asm.push(cont("xx", true)).unwrap(), Assembled::Skipped);
        assert_eq!(asm.push(text("ok", true)).unwrap(), Assembled::Text("ok".into()));
    }

    #[test]
    fn invalid_utf8_is_an_error_and_does_not_poison_state() {
        let mut asm = FrameAssembler::new();
        let bad = Fragment::new(FragmentKind::Text, vec![0xff_u8, 0xfe], true);
        assert!(asm.push(bad).is_err());
        assert_eq!(asm.push(text("fine", true)).unwrap(), Assembled::Text("fine".into()));
    }

    #[test]
    fn whole_messages_map_to_terminal_fragments() {
        let frag = Fragment::from_message(Message::text("hello"));
        assert_eq!(frag.kind, FragmentKind::Text);
        assert!(frag.end_of_message);
        assert_eq!(&frag.payload[..], b"hello");

        let close = Fragment::from_message(Message::Close(None));
        assert_eq!(close.kind, FragmentKind::Close);
    }

    #[tokio::test]
    async fn reader_reassembles_split_frame() {
        let fragments = vec![
            Ok(text(r#"{"command":"SETPARAMLIST","#, false)),
            Ok(cont(r#""objectList":[{"objnam":"B1101","#, false)),
            Ok(cont(r#""params":{"STATUS":"ON"}}]}"#, true)),
        ];
        let mut reader = SocketReader::from_fragments(stream::iter(fragments));

        let message = reader.next_text().await.unwrap();
        let decoded = crate::protocol::decode(&message).unwrap().unwrap();
        assert_eq!(decoded.command(), Some("SETPARAMLIST"));
        assert_eq!(decoded.payload()["objectList"][0]["objnam"], "B1101");

        assert!(reader.next_text().await.is_none());
    }

    #[tokio::test]
    async fn reader_skips_binary_and_stops_on_close() {
        let fragments = vec![
            Ok(Fragment::new(FragmentKind::Binary, vec![0_u8], true)),
            Ok(text("{}", true)),
            Ok(Fragment::new(FragmentKind::Close, Bytes::new(), true)),
            Ok(text("never read", true)),
        ];
        let mut reader = SocketReader::from_fragments(stream::iter(fragments));

        assert_eq!(reader.next_text().await.as_deref(), Some("{}"));
        assert!(reader.next_text().await.is_none());
    }

    #[tokio::test]
    async fn reader_stops_on_transport_error() {
        let fragments = vec![Err(Error::WebSocketConnect("reset".into()))];
        let mut reader = SocketReader::from_fragments(stream::iter(fragments));
        assert!(reader.next_text().await.is_none());
    }
}
