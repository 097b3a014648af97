//! The Pusher wire event and its JSON framing.
//!
//! Pusher frames are a small JSON object: `{"event": ..., "data": ...,
//! "channel": ...}`. This module owns the one place that object's shape is
//! allowed to leak into: everywhere else in the crate works with [`Event`].

use serde_json::{Map, Value};

use crate::error::{Error, Result};

const PUSHER_PREFIX: &str = "pusher:";
const PUSHER_INTERNAL_PREFIX: &str = "pusher_internal:";

/// A single Pusher event, received or about to be sent.
///
/// Unlike the reference implementation's dict-that-is-also-an-object, this
/// is a plain record: a name, an optional channel, and a free-form JSON
/// payload. Extra fields seen on receive are kept around but never
/// re-emitted on send.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub channel: Option<String>,
    pub data: Value,
    pub extra: Map<String, Value>,
}

impl Event {
    /// Build an event carrying a JSON payload.
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            channel: None,
            data,
            extra: Map::new(),
        }
    }

    /// Build an event with no payload (`data` serializes to `""`).
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, Value::Null)
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    fn is_control(&self) -> bool {
        self.name.starts_with(PUSHER_PREFIX) || self.name.starts_with(PUSHER_INTERNAL_PREFIX)
    }
}

/// Parse a received text frame into an [`Event`].
///
/// Renames the wire's `event` field to `name`; double-decodes `data` for
/// `pusher:`/`pusher_internal:` events when it arrived as a JSON string
/// (Pusher double-encodes control payloads); defaults a missing `data` to
/// an empty object.
pub fn load(raw: &str) -> Result<Event> {
    let value: Value = serde_json::from_str(raw)?;
    let mut object = match value {
        Value::Object(map) => map,
        _ => return Err(Error::BadEventName("frame was not a JSON object".into())),
    };

    let name = match object.remove("event") {
        Some(Value::String(s)) if !s.is_empty() => s,
        _ => return Err(Error::BadEventName("no event name".into())),
    };

    let channel = match object.remove("channel") {
        Some(Value::String(s)) => Some(s),
        _ => None,
    };

    let is_control =
        name.starts_with(PUSHER_PREFIX) || name.starts_with(PUSHER_INTERNAL_PREFIX);

    let data = match object.remove("data") {
        Some(Value::String(encoded)) if is_control => serde_json::from_str(&encoded)?,
        Some(value) => value,
        None => Value::Object(Map::new()),
    };

    Ok(Event {
        name,
        channel,
        data,
        extra: object,
    })
}

/// Serialize an [`Event`] to a Pusher wire frame: `event`, `data`, and
/// `channel` only, in that order. `data` becomes `""` when falsy (Pusher's
/// own convention, not ours) rather than e.g. `{}` or `null`.
pub fn serialize(event: &Event) -> Result<String> {
    if event.name.is_empty() {
        return Err(Error::BadEventName("event name not set".into()));
    }

    let mut object = Map::new();
    object.insert("event".to_string(), Value::String(event.name.clone()));
    object.insert("data".to_string(), serialize_data(&event.data));
    if let Some(channel) = &event.channel {
        object.insert("channel".to_string(), Value::String(channel.clone()));
    }

    Ok(Value::Object(object).to_string())
}

fn serialize_data(data: &Value) -> Value {
    if is_falsy(data) {
        Value::String(String::new())
    } else {
        data.clone()
    }
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn load_renames_event_to_name() {
        let event = load(r#"{"event":"ping","data":{}}"#).unwrap();
        assert_eq!(event.name, "ping");
    }

    #[test]
    fn load_fails_without_event_name() {
        assert!(load(r#"{"data":{}}"#).is_err());
    }

    #[test]
    fn load_fails_on_non_object() {
        assert!(load("[]").is_err());
        assert!(load("").is_err());
    }

    #[test]
    fn load_defaults_missing_data_to_empty_object() {
        let event = load(r#"{"event":"pusher:ping"}"#).unwrap();
        assert_eq!(event.data, json!({}));
    }

    #[test]
    fn load_double_decodes_control_event_string_data() {
        let raw = r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"a\"}"}"#;
        let event = load(raw).unwrap();
        assert_eq!(event.data, json!({"socket_id": "a"}));
    }

    #[test]
    fn load_keeps_non_control_string_data_as_a_string() {
        let raw = r#"{"event":"client-event","data":"just a string"}"#;
        let event = load(raw).unwrap();
        assert_eq!(event.data, json!("just a string"));
    }

    #[test]
    fn load_preserves_channel_and_extra_fields() {
        let raw = r#"{"event":"foo","channel":"bar","data":{},"socket_id":"123"}"#;
        let event = load(raw).unwrap();
        assert_eq!(event.channel.as_deref(), Some("bar"));
        assert_eq!(event.extra.get("socket_id"), Some(&json!("123")));
    }

    #[test]
    fn serialize_fails_without_name() {
        let event = Event::new("", json!({}));
        assert!(serialize(&event).is_err());
    }

    #[test]
    fn serialize_emits_empty_string_for_falsy_data() {
        let event = Event::bare("pusher:ping");
        let wire = serialize(&event).unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["data"], json!(""));
    }

    #[test]
    fn serialize_omits_channel_when_unset() {
        let event = Event::new("foo", json!({"a": 1}));
        let wire = serialize(&event).unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert!(value.get("channel").is_none());
    }

    #[test]
    fn serialize_drops_extra_fields() {
        let mut event = Event::new("foo", json!({"a": 1})).with_channel("c");
        event.extra.insert("socket_id".into(), json!("ignored"));
        let wire = serialize(&event).unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn round_trips_name_channel_and_data() {
        let event = Event::new("custom-event", json!({"a": 1})).with_channel("room");
        let wire = serialize(&event).unwrap();
        let reloaded = load(&wire).unwrap();
        assert_eq!(reloaded.name, event.name);
        assert_eq!(reloaded.channel, event.channel);
        assert_eq!(reloaded.data, event.data);
    }

    #[test]
    fn control_events_are_not_restringified_on_send() {
        let event = Event::new("pusher:subscribe", json!({"channel": "x"}));
        assert!(event.is_control());
        let wire = serialize(&event).unwrap();
        let value: Value = serde_json::from_str(&wire).unwrap();
        assert_eq!(value["data"], json!({"channel": "x"}));
    }
}
