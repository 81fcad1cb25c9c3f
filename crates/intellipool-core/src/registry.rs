// ── Subscription registry ──
//
// Tracks which keys are subscribed on which object, and which release
// requests are still waiting for the controller's acknowledgement.
// Both maps sit behind one lock: callers mutate them on subscribe and
// unsubscribe while the receive loop mutates them on acknowledgements.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Default)]
struct RegistryState {
    /// objnam -> subscribed keys. One entry per object.
    subscriptions: HashMap<String, Vec<String>>,
    /// release messageID -> objnam.
    pending: HashMap<Uuid, String>,
}

impl RegistryState {
    fn supersede(&mut self, objnam: &str, keys: Vec<String>) -> Option<Vec<String>> {
        self.pending.retain(|_, pending| pending.as_str() != objnam);
        self.subscriptions.insert(objnam.to_owned(), keys)
    }
}

/// Subscriptions and outstanding release acknowledgements.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription, replacing any earlier key set for `objnam`.
    ///
    /// A release still in flight for `objnam` is forgotten: its late
    /// acknowledgement must not remove the newer subscription.
    pub async fn record(&self, objnam: &str, keys: Vec<String>) -> Option<Vec<String>> {
        let mut state = self.state.lock().await;
        state.supersede(objnam, keys)
    }

    /// Record several subscriptions under one lock.
    pub async fn record_many<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (String, Vec<String>)>,
    {
        let mut state = self.state.lock().await;
        for (objnam, keys) in entries {
            state.supersede(&objnam, keys);
        }
    }

    pub async fn keys_for(&self, objnam: &str) -> Option<Vec<String>> {
        self.state.lock().await.subscriptions.get(objnam).cloned()
    }

    pub async fn contains(&self, objnam: &str) -> bool {
        self.state.lock().await.subscriptions.contains_key(objnam)
    }

    /// Mark `objnam` as awaiting a release acknowledgement under
    /// `message_id`.
    ///
    /// Returns the subscribed keys, or `None` (and records nothing) when
    /// `objnam` has no subscription. The subscription itself stays until
    /// [`resolve_release`](Self::resolve_release).
    pub async fn begin_release(&self, objnam: &str, message_id: Uuid) -> Option<Vec<String>> {
        let mut state = self.state.lock().await;
        let keys = state.subscriptions.get(objnam).cloned()?;
        state.pending.insert(message_id, objnam.to_owned());
        Some(keys)
    }

    /// Forget a pending release whose request never left.
    pub async fn abandon_release(&self, message_id: Uuid) {
        self.state.lock().await.pending.remove(&message_id);
    }

    /// Apply a release acknowledgement.
    ///
    /// Removes the pending entry and its subscription and returns the
    /// released objnam. Unknown ids change nothing.
    pub async fn resolve_release(&self, message_id: Uuid) -> Option<String> {
        let mut state = self.state.lock().await;
        let objnam = state.pending.remove(&message_id)?;
        state.subscriptions.remove(&objnam);
        Some(objnam)
    }

    /// Drop every subscription and pending release.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.subscriptions.clear();
        state.pending.clear();
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.subscriptions.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.subscriptions.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Point-in-time copy of all subscriptions, ordered by objnam.
    pub async fn snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.state
            .lock()
            .await
            .subscriptions
            .iter()
            .map(|(objnam, keys)| (objnam.clone(), keys.clone()))
            .collect()
    }
}
