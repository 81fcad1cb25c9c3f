//! Streaming hub transport.
//!
//! The IntelliCenter bridge exposes a JSON hub over HTTP(S): a negotiate
//! POST hands out a connection token, then a WebSocket carries
//! `0x1E`-terminated JSON records. This client uses two hub methods:
//!
//! - `Request(text)` -- blocking invocation carrying one outbound envelope;
//!   the hub answers with a completion record.
//! - `Feed()` -- stream invocation; every stream item is one inbound
//!   envelope's text.
//!
//! Pings go out every `keepalive_interval`. If nothing arrives for
//! `server_timeout` the link is considered lost.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::transport::{TransportConfig, millis};
use crate::websocket::WsStream;

const RECORD_SEPARATOR: char = '\u{1e}';

const REQUEST_TARGET: &str = "Request";
const FEED_TARGET: &str = "Feed";
const FEED_INVOCATION_ID: &str = "feed";

// Hub record types.
const INVOCATION: u8 = 1;
const STREAM_ITEM: u8 = 2;
const COMPLETION: u8 = 3;
const STREAM_INVOCATION: u8 = 4;
const PING: u8 = 6;
const CLOSE: u8 = 7;

type PendingInvocations = Mutex<HashMap<String, oneshot::Sender<Result<(), String>>>>;

// ── Wire records ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NegotiateResponse {
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    connection_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HubRecord {
    #[serde(rename = "type", default)]
    kind: Option<u8>,
    #[serde(default)]
    invocation_id: Option<String>,
    #[serde(default)]
    item: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

fn frame_record(value: &Value) -> String {
    let mut text = value.to_string();
    text.push(RECORD_SEPARATOR);
    text
}

fn split_records(text: &str) -> impl Iterator<Item = &str> {
    text.split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
}

fn ping_record() -> String {
    frame_record(&json!({ "type": PING }))
}

// ── Negotiate ────────────────────────────────────────────────────────

/// Run the negotiate step and return the WebSocket URL to upgrade on.
///
/// `POST {hub}/negotiate?negotiateVersion=1`, then swap `http(s)` for
/// `ws(s)` and append the token as `id`.
pub async fn negotiate(http: &reqwest::Client, hub_url: &Url) -> Result<Url, Error> {
    let mut negotiate_url = hub_url.clone();
    let path = format!("{}/negotiate", hub_url.path().trim_end_matches('/'));
    negotiate_url.set_path(&path);
    negotiate_url
        .query_pairs_mut()
        .append_pair("negotiateVersion", "1");

    tracing::debug!(url = %negotiate_url, "negotiating hub connection");

    let response: NegotiateResponse = http
        .post(negotiate_url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    if let Some(message) = response.error {
        return Err(Error::Handshake { message });
    }

    let token = response
        .connection_token
        .or(response.connection_id)
        .ok_or_else(|| Error::Handshake {
            message: "negotiate response carried no connection id".into(),
        })?;

    let mut ws_url = hub_url.clone();
    let scheme = if hub_url.scheme() == "https" { "wss" } else { "ws" };
    ws_url.set_scheme(scheme).map_err(|()| Error::Handshake {
        message: format!("cannot derive a websocket URL from {hub_url}"),
    })?;
    ws_url.query_pairs_mut().append_pair("id", &token);

    Ok(ws_url)
}

// ── HubLink ──────────────────────────────────────────────────────────

/// Outbound half of a hub connection.
pub(crate) struct HubLink {
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
    pending: Arc<PendingInvocations>,
    next_invocation: AtomicU64,
    request_timeout: Duration,
    keepalive: CancellationToken,
}

impl HubLink {
    /// Invoke `Request(text)` and wait for the hub's completion.
    pub(crate) async fn send(&self, text: &str) -> Result<(), Error> {
        let id = self
            .next_invocation
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        let record = frame_record(&json!({
            "type": INVOCATION,
            "invocationId": id,
            "target": REQUEST_TARGET,
            "arguments": [text],
        }));

        if let Err(e) = self.write(record).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(Error::Invocation {
                target: REQUEST_TARGET.into(),
                message,
            }),
            // Reader finished and dropped every pending completion.
            Ok(Err(_)) => Err(Error::NotOpen),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(Error::Timeout {
                    operation: "hub invocation",
                    timeout_ms: millis(self.request_timeout),
                })
            }
        }
    }

    async fn write(&self, record: String) -> Result<(), Error> {
        self.sink
            .lock()
            .await
            .send(Message::text(record))
            .await
            .map_err(|e| Error::WebSocketSend(e.to_string()))
    }

    pub(crate) async fn close(&self) {
        self.keepalive.cancel();
        if let Err(e) = self.write(frame_record(&json!({ "type": CLOSE }))).await {
            tracing::debug!(error = %e, "hub close record not sent");
        }
        let _ = self.sink.lock().await.close().await;
    }
}

// ── HubReader ────────────────────────────────────────────────────────

/// Inbound half of a hub connection: yields `Feed` stream items.
pub(crate) struct HubReader {
    stream: SplitStream<WsStream>,
    queue: VecDeque<String>,
    pending: Arc<PendingInvocations>,
    server_timeout: Duration,
    keepalive: CancellationToken,
    finished: bool,
}

impl HubReader {
    pub(crate) async fn next_text(&mut self) -> Option<String> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Some(item);
            }
            if self.finished {
                self.finish().await;
                return None;
            }

            let Ok(frame) = tokio::time::timeout(self.server_timeout, self.stream.next()).await
            else {
                tracing::warn!(
                    timeout_ms = millis(self.server_timeout),
                    "hub went silent, treating link as lost"
                );
                self.finish().await;
                continue;
            };

            match frame {
                Some(Ok(Message::Text(text))) => self.absorb(text.as_str()).await,
                Some(Ok(Message::Close(frame))) => {
                    if let Some(ref cf) = frame {
                        tracing::info!(code = %cf.code, reason = %cf.reason, "hub socket closed");
                    } else {
                        tracing::info!("hub socket closed (no payload)");
                    }
                    self.finish().await;
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "hub read failed");
                    self.finish().await;
                }
                None => {
                    tracing::info!("hub stream ended");
                    self.finish().await;
                }
                Some(Ok(_)) => {
                    // Binary, Ping, Pong, Frame -- ignore
                }
            }
        }
    }

    async fn absorb(&mut self, text: &str) {
        for record in split_records(text) {
            let parsed: HubRecord = match serde_json::from_str(record) {
                Ok(r) => r,
                Err(e) => {
                    tracing::debug!(error = %e, "unparseable hub record");
                    continue;
                }
            };

            let is_feed = parsed.invocation_id.as_deref() == Some(FEED_INVOCATION_ID);
            match parsed.kind {
                Some(STREAM_ITEM) if is_feed => match parsed.item {
                    Some(Value::String(item)) => self.queue.push_back(item),
                    Some(other) => self.queue.push_back(other.to_string()),
                    None => {}
                },
                Some(COMPLETION) if is_feed => {
                    match parsed.error {
                        Some(error) => tracing::warn!(%error, "hub feed failed"),
                        None => tracing::info!("hub feed completed"),
                    }
                    self.finished = true;
                }
                Some(COMPLETION) => {
                    let Some(id) = parsed.invocation_id else { continue };
                    if let Some(tx) = self.pending.lock().await.remove(&id) {
                        let _ = tx.send(parsed.error.map_or(Ok(()), Err));
                    }
                }
                Some(CLOSE) => {
                    match parsed.error {
                        Some(error) => tracing::warn!(%error, "hub closed the connection"),
                        None => tracing::info!("hub closed the connection"),
                    }
                    self.finished = true;
                }
                Some(PING) => tracing::trace!("hub ping"),
                kind => tracing::trace!(?kind, "ignoring hub record"),
            }
        }
    }

    async fn finish(&mut self) {
        self.finished = true;
        self.keepalive.cancel();
        // Dropping the senders fails every in-flight invocation.
        self.pending.lock().await.clear();
    }
}

// ── Connection setup ─────────────────────────────────────────────────

/// Negotiate, upgrade, handshake, and start the feed.
pub(crate) async fn connect(
    hub_url: &Url,
    config: &TransportConfig,
) -> Result<(HubLink, HubReader), Error> {
    let http = config.build_http_client()?;
    let ws_url = negotiate(&http, hub_url).await?;
    open(&ws_url, config).await
}

async fn open(ws_url: &Url, config: &TransportConfig) -> Result<(HubLink, HubReader), Error> {
    tracing::info!(url = %ws_url, "Connecting to hub");

    let timeout_ms = millis(config.connect_timeout);
    let (ws, _response) = tokio::time::timeout(
        config.connect_timeout,
        tokio_tungstenite::connect_async(ws_url.as_str()),
    )
    .await
    .map_err(|_| Error::Timeout {
        operation: "hub connect",
        timeout_ms,
    })?
    .map_err(|e| Error::WebSocketConnect(e.to_string()))?;

    let (mut sink, mut stream) = ws.split();

    sink.send(Message::text(frame_record(
        &json!({ "protocol": "json", "version": 1 }),
    )))
    .await
    .map_err(|e| Error::WebSocketSend(e.to_string()))?;

    let leftover = tokio::time::timeout(config.connect_timeout, await_handshake(&mut stream))
        .await
        .map_err(|_| Error::Timeout {
            operation: "hub handshake",
            timeout_ms,
        })??;

    sink.send(Message::text(frame_record(&json!({
        "type": STREAM_INVOCATION,
        "invocationId": FEED_INVOCATION_ID,
        "target": FEED_TARGET,
        "arguments": [],
    }))))
    .await
    .map_err(|e| Error::WebSocketSend(e.to_string()))?;

    tracing::info!("Hub connected, feed started");

    let sink = Arc::new(Mutex::new(sink));
    let pending = Arc::new(PendingInvocations::default());
    let keepalive = CancellationToken::new();

    if config.keepalive_interval.is_zero() {
        tracing::warn!("hub keepalive disabled (zero interval)");
    } else {
        tokio::spawn(keepalive_loop(
            Arc::clone(&sink),
            config.keepalive_interval,
            keepalive.clone(),
        ));
    }

    let link = HubLink {
        sink,
        pending: Arc::clone(&pending),
        next_invocation: AtomicU64::new(1),
        request_timeout: config.request_timeout,
        keepalive: keepalive.clone(),
    };
    let mut reader = HubReader {
        stream,
        queue: VecDeque::new(),
        pending,
        server_timeout: config.server_timeout,
        keepalive,
        finished: false,
    };
    if let Some(rest) = leftover {
        reader.absorb(&rest).await;
    }

    Ok((link, reader))
}

/// Wait for the hub's handshake answer.
///
/// Returns any records that arrived in the same frame after it.
async fn await_handshake(stream: &mut SplitStream<WsStream>) -> Result<Option<String>, Error> {
    loop {
        let text = match stream.next().await {
            Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
            Some(Ok(Message::Close(_))) | None => {
                return Err(Error::Handshake {
                    message: "hub closed during handshake".into(),
                });
            }
            Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
            Some(Ok(_)) => continue,
        };

        let mut records = split_records(&text);
        let Some(first) = records.next() else { continue };
        let answer: HubRecord = serde_json::from_str(first)?;
        if let Some(message) = answer.error {
            return Err(Error::Handshake { message });
        }

        let rest: Vec<&str> = records.collect();
        if rest.is_empty() {
            return Ok(None);
        }
        let mut joined = rest.join("\u{1e}");
        joined.push(RECORD_SEPARATOR);
        return Ok(Some(joined));
    }
}

async fn keepalive_loop(
    sink: Arc<Mutex<SplitSink<WsStream, Message>>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = sink.lock().await.send(Message::text(ping_record())).await {
                    tracing::debug!(error = %e, "hub keepalive failed");
                    break;
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
