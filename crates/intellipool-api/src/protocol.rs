//! JSON envelope codec for the IntelliCenter protocol.
//!
//! Outbound requests are built through the constructors on
//! [`OutboundEnvelope`]; every one of them stamps a fresh `messageID`.
//! Inbound text is decoded with [`decode`] and classified with
//! [`InboundEnvelope::dispatch`].
//!
//! Wire shapes (field names are the controller's contract):
//!
//! ```text
//! {"command":"GETPARAMLIST","condition":"OBJTYP=SCHED","objectList":[{"objnam":"ALL","keys":[...]}],"messageID":"..."}
//! {"command":"RequestParamList","objectList":[{"objnam":"B1101","keys":[...]}],"messageID":"..."}
//! {"command":"ReleaseParamList","objectList":[{"objnam":"B1101","keys":[...]}],"messageID":"..."}
//! {"command":"ClearParam","messageID":"..."}
//! {"command":"SETPARAMLIST","objectList":[{"objnam":"C0001","params":{"STATUS":"ON"}}],"messageID":"..."}
//! {"command":"SETCOMMAND","method":"SETIMMEDIATE","arguments":{"C0001":"ON"},"messageID":"..."}
//! {"command":"GetQuery","queryName":"GetHardwareDefinition","arguments":" ","messageID":"..."}
//! ```

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::Error;

// ── Command names ────────────────────────────────────────────────────

/// Every command this client emits, plus the two control commands the
/// controller echoes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    GetParamList,
    RequestParamList,
    ReleaseParamList,
    ClearParam,
    SetParamList,
    SetCommand,
    GetQuery,
}

impl CommandKind {
    /// The exact string the controller expects in the `command` field.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GetParamList => "GETPARAMLIST",
            Self::RequestParamList => "RequestParamList",
            Self::ReleaseParamList => "ReleaseParamList",
            Self::ClearParam => "ClearParam",
            Self::SetParamList => "SETPARAMLIST",
            Self::SetCommand => "SETCOMMAND",
            Self::GetQuery => "GetQuery",
        }
    }
}

impl Serialize for CommandKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ObjectEntry ──────────────────────────────────────────────────────

/// One element of an `objectList`.
///
/// Carries `keys` for fetch/subscribe/release requests and `params` for
/// parameter writes; the unused half is omitted from the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectEntry {
    pub objnam: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
}

impl ObjectEntry {
    /// An entry naming the keys of interest on one object.
    pub fn with_keys<I, K>(objnam: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            objnam: objnam.into(),
            keys: Some(keys.into_iter().map(Into::into).collect()),
            params: None,
        }
    }

    /// An entry writing a single property value.
    pub fn with_param(
        objnam: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut params = Map::new();
        params.insert(property.into(), Value::String(value.into()));
        Self {
            objnam: objnam.into(),
            keys: None,
            params: Some(params),
        }
    }
}

// ── OutboundEnvelope ─────────────────────────────────────────────────

/// A request ready to be written to the transport.
///
/// Immutable once built. The `messageID` is generated per construction
/// and never reused.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    command: CommandKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    condition: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    object_list: Option<Vec<ObjectEntry>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    query_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    arguments: Option<Value>,

    #[serde(rename = "messageID")]
    message_id: Uuid,
}

impl OutboundEnvelope {
    fn new(command: CommandKind) -> Self {
        Self {
            command,
            condition: None,
            object_list: None,
            method: None,
            query_name: None,
            arguments: None,
            message_id: Uuid::new_v4(),
        }
    }

    /// `GETPARAMLIST`: one-shot read of the listed objects' keys.
    ///
    /// Use objnam `"ALL"` together with a `condition` such as
    /// `"OBJTYP=SCHED"` to read every matching object.
    pub fn fetch(condition: Option<String>, objects: Vec<ObjectEntry>) -> Self {
        Self {
            condition,
            object_list: Some(objects),
            ..Self::new(CommandKind::GetParamList)
        }
    }

    /// `RequestParamList`: subscribe to live updates for the listed keys.
    pub fn subscribe(objects: Vec<ObjectEntry>) -> Self {
        Self {
            object_list: Some(objects),
            ..Self::new(CommandKind::RequestParamList)
        }
    }

    /// `ReleaseParamList`: drop a subscription.
    pub fn release(objects: Vec<ObjectEntry>) -> Self {
        Self {
            object_list: Some(objects),
            ..Self::new(CommandKind::ReleaseParamList)
        }
    }

    /// `ClearParam`: drop every subscription held by this client.
    pub fn clear() -> Self {
        Self::new(CommandKind::ClearParam)
    }

    /// `SETPARAMLIST`: write one property on one object.
    pub fn set_param(
        objnam: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            object_list: Some(vec![ObjectEntry::with_param(objnam, property, value)]),
            ..Self::new(CommandKind::SetParamList)
        }
    }

    /// `SETCOMMAND`: invoke a named controller method with `{objnam: value}`.
    pub fn invoke(
        method: impl Into<String>,
        objnam: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut arguments = Map::new();
        arguments.insert(objnam.into(), Value::String(value.into()));
        Self {
            method: Some(method.into()),
            arguments: Some(Value::Object(arguments)),
            ..Self::new(CommandKind::SetCommand)
        }
    }

    /// `GetQuery`: a named query such as `GetHardwareDefinition`.
    pub fn query(name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            query_name: Some(name.into()),
            arguments: Some(Value::String(arguments.into())),
            ..Self::new(CommandKind::GetQuery)
        }
    }

    pub fn command(&self) -> CommandKind {
        self.command
    }

    pub fn message_id(&self) -> Uuid {
        self.message_id
    }

    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    pub fn object_list(&self) -> &[ObjectEntry] {
        self.object_list.as_deref().unwrap_or_default()
    }

    /// Encode to the compact JSON text written on the wire.
    pub fn to_json(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── InboundEnvelope ──────────────────────────────────────────────────

/// How the receive path should route a decoded envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// `ClearParam`: wipe every subscription and pending release.
    RegistryClear,
    /// `ReleaseParamList`: resolve the pending release with this id, if any.
    ReleaseAck(Option<Uuid>),
    /// Anything else: hand the payload to consumers untouched.
    Data,
}

/// A decoded inbound message.
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    command: Option<String>,
    message_id: Option<Uuid>,
    payload: Value,
    raw: String,
}

impl InboundEnvelope {
    /// The `command` field, when present and a string.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// The `messageID` field, when present and a valid UUID.
    pub fn message_id(&self) -> Option<Uuid> {
        self.message_id
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The exact text received.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }

    pub fn dispatch(&self) -> Dispatch {
        match self.command() {
            Some(c) if c == CommandKind::ClearParam.as_str() => Dispatch::RegistryClear,
            Some(c) if c == CommandKind::ReleaseParamList.as_str() => {
                Dispatch::ReleaseAck(self.message_id)
            }
            _ => Dispatch::Data,
        }
    }
}

/// Decode one complete inbound text frame.
///
/// Returns `Ok(None)` for frames that do not open with `{` (keepalive
/// noise, banners). Malformed JSON is an error for the caller to log.
pub fn decode(text: &str) -> Result<Option<InboundEnvelope>, Error> {
    if !text.trim_start().starts_with('{') {
        return Ok(None);
    }

    let payload: Value = serde_json::from_str(text)?;

    let command = payload
        .get("command")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let message_id = payload
        .get("messageID")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok());

    Ok(Some(InboundEnvelope {
        command,
        message_id,
        payload,
        raw: text.to_owned(),
    }))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn wire(envelope: &OutboundEnvelope) -> Value {
        serde_json::from_str(&envelope.to_json().unwrap()).unwrap()
    }

    #[test]
    fn fetch_all_with_condition() {
        let env = OutboundEnvelope::fetch(
            Some("OBJTYP=SCHED".into()),
            vec![ObjectEntry::with_keys("ALL", ["OBJNAM : SNAME"])],
        );

        assert_eq!(
            wire(&env),
            json!({
                "command": "GETPARAMLIST",
                "condition": "OBJTYP=SCHED",
                "objectList": [{ "objnam": "ALL", "keys": ["OBJNAM : SNAME"] }],
                "messageID": env.message_id().to_string(),
            })
        );
    }

    #[test]
    fn fetch_single_object_omits_condition() {
        let env = OutboundEnvelope::fetch(None, vec![ObjectEntry::with_keys("B1101", ["STATUS"])]);
        let value = wire(&env);
        assert!(value.get("condition").is_none());
        assert_eq!(value["objectList"][0]["objnam"], "B1101");
    }

    #[test]
    fn subscribe_lists_every_object() {
        let env = OutboundEnvelope::subscribe(vec![
            ObjectEntry::with_keys("B1101", ["STATUS", "HTMODE"]),
            ObjectEntry::with_keys("C0001", ["ACT", "USE"]),
        ]);

        assert_eq!(
            wire(&env),
            json!({
                "command": "RequestParamList",
                "objectList": [
                    { "objnam": "B1101", "keys": ["STATUS", "HTMODE"] },
                    { "objnam": "C0001", "keys": ["ACT", "USE"] },
                ],
                "messageID": env.message_id().to_string(),
            })
        );
    }

    #[test]
    fn clear_carries_only_command_and_id() {
        let env = OutboundEnvelope::clear();
        assert_eq!(
            wire(&env),
            json!({ "command": "ClearParam", "messageID": env.message_id().to_string() })
        );
    }

    #[test]
    fn set_param_shape() {
        let env = OutboundEnvelope::set_param("C0001", "STATUS", "ON");
        assert_eq!(
            wire(&env),
            json!({
                "command": "SETPARAMLIST",
                "objectList": [{ "objnam": "C0001", "params": { "STATUS": "ON" } }],
                "messageID": env.message_id().to_string(),
            })
        );
    }

    #[test]
    fn invoke_shape() {
        let env = OutboundEnvelope::invoke("SETIMMEDIATE", "C0001", "ON");
        assert_eq!(
            wire(&env),
            json!({
                "command": "SETCOMMAND",
                "method": "SETIMMEDIATE",
                "arguments": { "C0001": "ON" },
                "messageID": env.message_id().to_string(),
            })
        );
    }

    #[test]
    fn query_shape_preserves_field_order() {
        let env = OutboundEnvelope::query("GetHardwareDefinition", " ");
        let text = env.to_json().unwrap();
        let query_at = text.find("queryName").unwrap();
        let args_at = text.find("arguments").unwrap();
        let id_at = text.find("messageID").unwrap();
        assert!(text.starts_with(r#"{"command":"GetQuery""#));
        assert!(query_at < args_at && args_at < id_at);
    }

    #[test]
    fn message_ids_are_fresh() {
        let a = OutboundEnvelope::clear();
        let b = OutboundEnvelope::clear();
        assert_ne!(a.message_id(), b.message_id());
    }

    #[test]
    fn decode_skips_non_object_frames() {
        assert!(decode("keepalive").unwrap().is_none());
        assert!(decode("").unwrap().is_none());
        assert!(decode("[1,2]").unwrap().is_none());
    }

    #[test]
    fn decode_rejects_malformed_json() {
        assert!(decode("{ not json").is_err());
    }

    #[test]
    fn classify_clear_param() {
        let env = decode(r#"{"command":"ClearParam","messageID":"x"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(env.dispatch(), Dispatch::RegistryClear);
    }

    #[test]
    fn classify_release_ack_with_id() {
        let id = Uuid::new_v4();
        let text = json!({ "command": "ReleaseParamList", "messageID": id }).to_string();
        let env = decode(&text).unwrap().unwrap();
        assert_eq!(env.dispatch(), Dispatch::ReleaseAck(Some(id)));
    }

    #[test]
    fn classify_release_ack_with_garbage_id() {
        let env = decode(r#"{"command":"ReleaseParamList","messageID":"nope"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(env.dispatch(), Dispatch::ReleaseAck(None));
    }

    #[test]
    fn classify_everything_else_as_data() {
        let text = r#"{"command":"NotifyList","objectList":[{"objnam":"B1101","params":{"STATUS":"ON"}}]}"#;
        let env = decode(text).unwrap().unwrap();
        assert_eq!(env.dispatch(), Dispatch::Data);
        assert_eq!(env.raw(), text);
        assert_eq!(env.payload()["objectList"][0]["params"]["STATUS"], "ON");

        let no_command = decode(r#"{"answer":[]}"#).unwrap().unwrap();
        assert_eq!(no_command.dispatch(), Dispatch::Data);

        let numeric_command = decode(r#"{"command":7}"#).unwrap().unwrap();
        assert_eq!(numeric_command.command(), None);
        assert_eq!(numeric_command.dispatch(), Dispatch::Data);
    }
}
