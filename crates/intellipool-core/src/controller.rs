// ── Controller abstraction ──
//
// Full lifecycle management for one IntelliCenter connection: transport
// selection, the receive loop, automatic hub reconnection, subscription
// bookkeeping, and the outbound request surface.
//
// Every public operation reports success as a `bool`. Failures are
// logged here and never propagate to the caller.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use intellipool_api::{
    Dispatch, Inbound, ObjectEntry, OutboundEnvelope, Transport, TransportKind,
};

use crate::config::ControllerConfig;
use crate::error::CoreError;
use crate::model::{DataEvent, EquipmentKind, SCHEDULE_OBJTYP_CONDITION, schedule_key_list};
use crate::registry::SubscriptionRegistry;
use crate::stream::{DataStream, StateStream};

const STATE_CHANNEL_SIZE: usize = 64;
const HARDWARE_DEFINITION_QUERY: &str = "GetHardwareDefinition";
const FETCH_ALL: &str = "ALL";

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

// ── Controller ───────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ControllerInner>`. One controller drives at
/// most one live transport at a time; `connect` replaces whatever was
/// there before.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    config: ControllerConfig,
    registry: SubscriptionRegistry,
    connection_state: watch::Sender<ConnectionState>,
    state_tx: broadcast::Sender<ConnectionState>,
    data_tx: broadcast::Sender<Arc<DataEvent>>,
    transport: ArcSwapOption<Transport>,
    session: Mutex<Option<Session>>,
    /// Process scope. Each session runs under a child of this token.
    cancel: CancellationToken,
    /// Serializes connect and disconnect.
    lifecycle: Mutex<()>,
}

/// The receive loop of one connection, plus the token that stops it.
struct Session {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Controller {
    /// Create a controller. Does NOT connect -- call
    /// [`connect()`](Self::connect) with an address.
    pub fn new(config: ControllerConfig) -> Self {
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (state_tx, _) = broadcast::channel(STATE_CHANNEL_SIZE);
        let (data_tx, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            inner: Arc::new(ControllerInner {
                config,
                registry: SubscriptionRegistry::new(),
                connection_state,
                state_tx,
                data_tx,
                transport: ArcSwapOption::empty(),
                session: Mutex::new(None),
                cancel: CancellationToken::new(),
                lifecycle: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to `address`, replacing any existing connection.
    ///
    /// `http`/`https` addresses open the streaming hub (with automatic
    /// reconnection); `ws`/`wss` addresses open the raw controller
    /// socket. The subscription registry starts empty either way;
    /// re-subscribing is up to the caller.
    ///
    /// Always finishes by publishing a state: `Connected` on success,
    /// `Disconnected` otherwise.
    pub async fn connect(&self, address: &str) -> bool {
        let _lifecycle = self.inner.lifecycle.lock().await;

        self.teardown().await;
        self.inner.registry.clear().await;

        match self.open(address).await {
            Ok(kind) => {
                info!(address, %kind, "connected to controller");
                self.set_state(ConnectionState::Connected);
                true
            }
            Err(e) => {
                warn!(address, error = %e, "connect failed");
                self.set_state(ConnectionState::Disconnected);
                false
            }
        }
    }

    async fn open(&self, address: &str) -> Result<TransportKind, CoreError> {
        let url = Url::parse(address.trim()).map_err(|e| CoreError::InvalidAddress {
            address: address.to_owned(),
            reason: e.to_string(),
        })?;
        let kind = TransportKind::for_url(&url).map_err(|e| CoreError::InvalidAddress {
            address: address.to_owned(),
            reason: e.to_string(),
        })?;
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ControllerDisconnected);
        }

        self.set_state(ConnectionState::Connecting);

        let transport_config = self.inner.config.transport();
        let (transport, inbound) = tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => return Err(CoreError::ControllerDisconnected),
            opened = Transport::connect(&url, &transport_config) => opened?,
        };
        self.inner.transport.store(Some(Arc::new(transport)));

        let cancel = self.inner.cancel.child_token();
        let handle = tokio::spawn(run_session(
            self.clone(),
            url,
            kind,
            inbound,
            cancel.clone(),
        ));
        *self.inner.session.lock().await = Some(Session { cancel, handle });

        Ok(kind)
    }

    /// Close the connection and settle to `Disconnected`.
    ///
    /// Stops the receive loop, closes the transport gracefully, and waits
    /// for both. Subscriptions are kept until the next `connect`.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.teardown().await;
        self.set_state(ConnectionState::Disconnected);
        debug!("disconnected");
    }

    /// Cancel the process scope and disconnect. The controller cannot be
    /// connected again afterwards.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.disconnect().await;
    }

    async fn teardown(&self) {
        let session = self.inner.session.lock().await.take();
        if let Some(session) = session {
            session.cancel.cancel();
            if let Err(e) = session.handle.await {
                warn!(error = %e, "receive loop ended abnormally");
            }
        }
        if let Some(transport) = self.inner.transport.swap(None) {
            transport.close().await;
        }
    }

    fn set_state(&self, state: ConnectionState) {
        self.inner.connection_state.send_replace(state);
        // No subscribers is fine.
        let _ = self.inner.state_tx.send(state);
        debug!(%state, "connection state changed");
    }

    // ── Subscriptions ────────────────────────────────────────────

    /// Subscribe to live updates of `keys` on `objnam`.
    ///
    /// Replaces any earlier key set for the same object.
    pub async fn subscribe<I, K>(&self, objnam: &str, keys: I) -> bool
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        self.inner.registry.record(objnam, keys.clone()).await;

        let envelope = OutboundEnvelope::subscribe(vec![ObjectEntry::with_keys(objnam, keys)]);
        report("subscribe", self.send_envelope(&envelope).await)
    }

    /// Subscribe to `objnam` with the key set of its kind tag.
    pub async fn subscribe_kind(&self, objnam: &str, kind_tag: &str) -> bool {
        let kind = match resolve_kind(kind_tag) {
            Ok(kind) => kind,
            Err(e) => return report("subscribe_kind", Err(e)),
        };
        self.subscribe(objnam, kind.keys().iter().copied()).await
    }

    /// Subscribe to several objects in one request.
    ///
    /// Each `(objnam, kind_tag)` pair is resolved to its kind's key set;
    /// pairs with an unknown kind are skipped. Returns `false` without
    /// sending when nothing resolves.
    pub async fn subscribe_many<I, O, T>(&self, objects: I) -> bool
    where
        I: IntoIterator<Item = (O, T)>,
        O: Into<String>,
        T: AsRef<str>,
    {
        let mut resolved: Vec<(String, Vec<String>)> = Vec::new();
        for (objnam, tag) in objects {
            let objnam = objnam.into();
            match resolve_kind(tag.as_ref()) {
                Ok(kind) => {
                    let keys = kind.keys().iter().map(|k| (*k).to_owned()).collect();
                    resolved.push((objnam, keys));
                }
                Err(e) => debug!(objnam = %objnam, error = %e, "skipping object"),
            }
        }
        if resolved.is_empty() {
            debug!("batch subscribe resolved no objects");
            return false;
        }

        let entries = resolved
            .iter()
            .map(|(objnam, keys)| ObjectEntry::with_keys(objnam.as_str(), keys.iter().cloned()))
            .collect();
        self.inner.registry.record_many(resolved).await;

        let envelope = OutboundEnvelope::subscribe(entries);
        report("subscribe_many", self.send_envelope(&envelope).await)
    }

    /// Ask the controller to release `objnam`.
    ///
    /// Returns `false` without sending if `objnam` is not subscribed. The
    /// subscription stays recorded until the controller acknowledges the
    /// release.
    pub async fn unsubscribe(&self, objnam: &str) -> bool {
        let Some(keys) = self.inner.registry.keys_for(objnam).await else {
            debug!(objnam, "not subscribed, nothing to release");
            return false;
        };

        let envelope = OutboundEnvelope::release(vec![ObjectEntry::with_keys(objnam, keys)]);
        let message_id = envelope.message_id();
        if self
            .inner
            .registry
            .begin_release(objnam, message_id)
            .await
            .is_none()
        {
            return false;
        }

        let result = self.send_envelope(&envelope).await;
        if result.is_err() {
            self.inner.registry.abandon_release(message_id).await;
        }
        report("unsubscribe", result)
    }

    /// Ask the controller to drop every subscription.
    ///
    /// Returns `false` without sending when nothing is subscribed. Local
    /// state is cleared only when the controller's `ClearParam` arrives.
    pub async fn unsubscribe_all(&self) -> bool {
        if self.inner.registry.is_empty().await {
            debug!("no subscriptions to clear");
            return false;
        }
        let envelope = OutboundEnvelope::clear();
        report("unsubscribe_all", self.send_envelope(&envelope).await)
    }

    // ── Requests ─────────────────────────────────────────────────

    /// One-shot read of `objnam` with its kind's key set. Records no
    /// subscription.
    pub async fn fetch_item(&self, objnam: &str, kind_tag: &str) -> bool {
        let kind = match resolve_kind(kind_tag) {
            Ok(kind) => kind,
            Err(e) => return report("fetch_item", Err(e)),
        };
        let envelope = OutboundEnvelope::fetch(
            None,
            vec![ObjectEntry::with_keys(objnam, kind.keys().iter().copied())],
        );
        report("fetch_item", self.send_envelope(&envelope).await)
    }

    /// Read every schedule object.
    pub async fn fetch_schedules(&self) -> bool {
        let envelope = OutboundEnvelope::fetch(
            Some(SCHEDULE_OBJTYP_CONDITION.to_owned()),
            vec![ObjectEntry::with_keys(FETCH_ALL, [schedule_key_list()])],
        );
        report("fetch_schedules", self.send_envelope(&envelope).await)
    }

    /// Ask for the controller's hardware definition.
    pub async fn fetch_hardware_definition(&self) -> bool {
        self.send_query(HARDWARE_DEFINITION_QUERY, " ").await
    }

    /// Send a named `GetQuery`.
    pub async fn send_query(&self, name: &str, arguments: &str) -> bool {
        let envelope = OutboundEnvelope::query(name, arguments);
        report("send_query", self.send_envelope(&envelope).await)
    }

    /// Write one property on one object.
    pub async fn send_property_update(&self, objnam: &str, property: &str, value: &str) -> bool {
        let envelope = OutboundEnvelope::set_param(objnam, property, value);
        report("send_property_update", self.send_envelope(&envelope).await)
    }

    /// Invoke a controller method with `{objnam: value}` as arguments.
    pub async fn send_command(&self, method: &str, objnam: &str, value: &str) -> bool {
        let envelope = OutboundEnvelope::invoke(method, objnam, value);
        report("send_command", self.send_envelope(&envelope).await)
    }

    async fn send_envelope(&self, envelope: &OutboundEnvelope) -> Result<(), CoreError> {
        let transport = self
            .inner
            .transport
            .load_full()
            .ok_or(CoreError::ControllerDisconnected)?;
        let text = envelope.to_json()?;

        debug!(
            command = %envelope.command(),
            message_id = %envelope.message_id(),
            "sending request"
        );

        tokio::select! {
            biased;
            () = self.inner.cancel.cancelled() => Err(CoreError::ControllerDisconnected),
            sent = transport.send(&text) => sent.map_err(CoreError::from),
        }
    }

    // ── State observation ────────────────────────────────────────

    /// Watch the current connection state.
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.connection_state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Every state transition, in order, from now on.
    pub fn state_changes(&self) -> broadcast::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state_stream(&self) -> StateStream {
        StateStream::new(self.connection_state())
    }

    /// Data events pushed by the controller.
    pub fn data(&self) -> broadcast::Receiver<Arc<DataEvent>> {
        self.inner.data_tx.subscribe()
    }

    pub fn data_stream(&self) -> DataStream {
        DataStream::new(self.data())
    }

    /// Kind of the live transport, if any.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        self.inner.transport.load_full().map(|t| t.kind())
    }

    // ── Registry accessors ───────────────────────────────────────

    /// Snapshot of current subscriptions, keyed by objnam.
    pub async fn subscriptions(&self) -> BTreeMap<String, Vec<String>> {
        self.inner.registry.snapshot().await
    }

    /// Number of releases still waiting for an acknowledgement.
    pub async fn pending_releases(&self) -> usize {
        self.inner.registry.pending_count().await
    }

    // ── Inbound handling ─────────────────────────────────────────

    async fn handle_frame(&self, text: &str) {
        let envelope = match intellipool_api::protocol::decode(text) {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                tracing::trace!("ignoring non-JSON frame");
                return;
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                return;
            }
        };

        match envelope.dispatch() {
            Dispatch::RegistryClear => {
                self.inner.registry.clear().await;
                info!("controller cleared all subscriptions");
            }
            Dispatch::ReleaseAck(Some(message_id)) => {
                match self.inner.registry.resolve_release(message_id).await {
                    Some(objnam) => debug!(%objnam, %message_id, "release acknowledged"),
                    None => debug!(%message_id, "release ack for unknown request ignored"),
                }
            }
            Dispatch::ReleaseAck(None) => {
                debug!("release ack without a usable messageID ignored");
            }
            Dispatch::Data => {
                let event = Arc::new(DataEvent::from_envelope(envelope));
                // No subscribers is fine.
                let _ = self.inner.data_tx.send(event);
            }
        }
    }

    /// Feed inbound frames to [`handle_frame`](Self::handle_frame) until
    /// the link ends. Returns `true` if stopped by cancellation.
    async fn pump(&self, inbound: &mut Inbound, cancel: &CancellationToken) -> bool {
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return true,
                next = inbound.next_text() => next,
            };
            let Some(text) = next else { return false };
            self.handle_frame(&text).await;
        }
    }

    /// Retry the hub after an unexpected close.
    ///
    /// Returns the new inbound half on success. On exhaustion the state
    /// settles to `Disconnected`; on cancellation it is left alone.
    async fn reconnect(&self, url: &Url, cancel: &CancellationToken) -> Option<Inbound> {
        self.set_state(ConnectionState::Reconnecting);
        let transport_config = self.inner.config.transport();

        for (attempt, delay) in self.inner.config.reconnect_delays.iter().enumerate() {
            let attempt = attempt + 1;
            tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                () = tokio::time::sleep(*delay) => {}
            }

            info!(attempt, delay_ms = millis(*delay), %url, "reconnecting");
            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                opened = Transport::connect(url, &transport_config) => opened,
            };

            match opened {
                Ok((transport, inbound)) => {
                    self.inner.registry.clear().await;
                    self.inner.transport.store(Some(Arc::new(transport)));
                    info!(attempt, "reconnected");
                    self.set_state(ConnectionState::Connected);
                    return Some(inbound);
                }
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }
        }

        warn!("reconnect attempts exhausted");
        self.set_state(ConnectionState::Disconnected);
        None
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("state", &self.state())
            .field("transport", &self.transport_kind())
            .finish_non_exhaustive()
    }
}

// ── Background tasks ─────────────────────────────────────────────

/// Receive loop for one connection.
async fn run_session(
    controller: Controller,
    url: Url,
    kind: TransportKind,
    mut inbound: Inbound,
    cancel: CancellationToken,
) {
    loop {
        if controller.pump(&mut inbound, &cancel).await {
            return;
        }

        info!(%url, %kind, "connection closed by peer");
        if let Some(transport) = controller.inner.transport.swap(None) {
            transport.close().await;
        }

        if !kind.reconnects() {
            controller.set_state(ConnectionState::Disconnected);
            return;
        }

        match controller.reconnect(&url, &cancel).await {
            Some(next) => inbound = next,
            None => return,
        }
    }
}

fn resolve_kind(tag: &str) -> Result<EquipmentKind, CoreError> {
    EquipmentKind::from_tag(tag).ok_or_else(|| CoreError::UnknownKind {
        tag: tag.to_owned(),
    })
}

/// Log a failed request and collapse the outcome to a success flag.
fn report(operation: &'static str, result: Result<(), CoreError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(operation, error = %e, "request not sent");
            false
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn controller() -> Controller {
        Controller::new(ControllerConfig::default())
    }

    #[tokio::test]
    async fn starts_disconnected() {
        let ctrl = controller();
        assert_eq!(ctrl.state(), ConnectionState::Disconnected);
        assert!(ctrl.transport_kind().is_none());
    }

    #[tokio::test]
    async fn unknown_scheme_fails_and_reports_disconnected() {
        let ctrl = controller();
        let mut changes = ctrl.state_changes();

        assert!(!ctrl.connect("ftp://10.0.0.5").await);
        assert_eq!(changes.recv().await.unwrap(), ConnectionState::Disconnected);
        assert_eq!(ctrl.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn garbage_address_fails() {
        let ctrl = controller();
        assert!(!ctrl.connect("not an address").await);
        assert_eq!(ctrl.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn requests_fail_while_disconnected() {
        let ctrl = controller();
        assert!(!ctrl.send_property_update("C0001", "STATUS", "ON").await);
        assert!(!ctrl.fetch_schedules().await);
        assert!(!ctrl.fetch_hardware_definition().await);
    }

    #[tokio::test]
    async fn unknown_kinds_send_nothing() {
        let ctrl = controller();
        assert!(!ctrl.subscribe_kind("V0001", "VALVE").await);
        assert!(!ctrl.fetch_item("V0001", "VALVE").await);
        assert!(!ctrl.subscribe_many([("V0001", "VALVE"), ("V0002", "ACTUATOR")]).await);
        assert!(ctrl.subscriptions().await.is_empty());
    }

    #[test]
    fn unknown_kind_names_its_tag() {
        assert!(resolve_kind("LIGHT").is_ok());
        let err = resolve_kind("VALVE").unwrap_err();
        assert!(matches!(err, CoreError::UnknownKind { ref tag } if tag == "VALVE"));
        assert!(!report("fetch_item", Err(err)));
        assert!(report("fetch_item", Ok(())));
    }

    #[tokio::test]
    async fn unsubscribe_of_unknown_object_is_a_noop() {
        let ctrl = controller();
        assert!(!ctrl.unsubscribe("C0001").await);
        assert!(!ctrl.unsubscribe_all().await);
        assert_eq!(ctrl.pending_releases().await, 0);
    }

    #[tokio::test]
    async fn inbound_dispatch_updates_registry() {
        let ctrl = controller();
        let mut data = ctrl.data();
        ctrl.inner
            .registry
            .record("C0001", vec!["ACT".into(), "USE".into()])
            .await;
        let id = uuid::Uuid::new_v4();
        ctrl.inner.registry.begin_release("C0001", id).await;

        // Unknown ack: nothing changes.
        ctrl.handle_frame(&format!(
            r#"{{"command":"ReleaseParamList","messageID":"{}"}}"#,
            uuid::Uuid::new_v4()
        ))
        .await;
        assert_eq!(ctrl.pending_releases().await, 1);

        // Matching ack: both entries go.
        ctrl.handle_frame(&format!(
            r#"{{"command":"ReleaseParamList","messageID":"{id}"}}"#
        ))
        .await;
        assert_eq!(ctrl.pending_releases().await, 0);
        assert!(ctrl.subscriptions().await.is_empty());

        // Noise and malformed frames are dropped.
        ctrl.handle_frame("keepalive").await;
        ctrl.handle_frame("{not json").await;

        // Control commands are not forwarded as data.
        assert!(data.try_recv().is_err());

        ctrl.handle_frame(r#"{"command":"NotifyList","objectList":[]}"#).await;
        let event = data.try_recv().unwrap();
        assert_eq!(event.command.as_deref(), Some("NotifyList"));
    }

    #[tokio::test]
    async fn shutdown_prevents_reconnect() {
        let ctrl = controller();
        ctrl.shutdown().await;
        assert!(!ctrl.connect("ws://127.0.0.1:1").await);
        assert_eq!(ctrl.state(), ConnectionState::Disconnected);
    }
}
