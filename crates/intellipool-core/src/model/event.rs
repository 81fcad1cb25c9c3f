use chrono::{DateTime, Utc};
use intellipool_api::InboundEnvelope;
use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

/// One data message pushed by the controller.
///
/// The payload is forwarded exactly as decoded; interpreting it against
/// the keys originally subscribed is the consumer's job.
#[derive(Debug, Clone, Serialize)]
pub struct DataEvent {
    pub command: Option<String>,
    pub message_id: Option<Uuid>,
    pub payload: Value,
    #[serde(skip)]
    pub raw: String,
    pub received_at: DateTime<Utc>,
}

impl DataEvent {
    pub(crate) fn from_envelope(envelope: InboundEnvelope) -> Self {
        let command = envelope.command().map(str::to_owned);
        let message_id = envelope.message_id();
        let raw = envelope.raw().to_owned();
        Self {
            command,
            message_id,
            payload: envelope.into_payload(),
            raw,
            received_at: Utc::now(),
        }
    }

    /// `(objnam, params)` for every entry of the payload's `objectList`
    /// that carries both.
    pub fn objects(&self) -> impl Iterator<Item = (&str, &Map<String, Value>)> {
        self.payload
            .get("objectList")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|entry| {
                let objnam = entry.get("objnam")?.as_str()?;
                let params = entry.get("params")?.as_object()?;
                Some((objnam, params))
            })
    }
}
