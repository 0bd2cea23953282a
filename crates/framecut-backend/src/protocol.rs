//! Wire types for the control channel.
//!
//! Every line on the channel is one JSON object `{Type, RequestId, Payload}`.
//! Responses echo `Type` and `RequestId` of the request they answer.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const PING: &str = "ping";
pub const RENDER_ONE: &str = "RenderOne";
pub const UPDATE_CLIPS: &str = "UpdateClips";
pub const SHUT_DOWN: &str = "ShutDown";

/// One request or response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "Type", default)]
    pub kind: String,
    /// Opaque correlation id. Usually a string, echoed back verbatim.
    #[serde(rename = "RequestId", default)]
    pub request_id: Value,
    #[serde(rename = "Payload", default)]
    pub payload: Value,
}

impl Message {
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }

    /// A response to `self` carrying `payload`.
    pub fn reply(&self, payload: Value) -> Message {
        Message {
            kind: self.kind.clone(),
            request_id: self.request_id.clone(),
            payload,
        }
    }

    /// The payload, or `None` when it is absent or `null`.
    ///
    /// Some clients send structured payloads as a JSON string; those are
    /// decoded once more.
    pub fn payload(&self) -> Option<Value> {
        match &self.payload {
            Value::Null => None,
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(Value::Null) => None,
                Ok(inner) => Some(inner),
                Err(_) => Some(self.payload.clone()),
            },
            other => Some(other.clone()),
        }
    }

    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// The project draft sent with `UpdateClips`.
///
/// Only `Clips` is consumed by the renderer; the rest is kept so the draft
/// survives a round trip through the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftStructure {
    #[serde(rename = "Name", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Clips", default)]
    pub clips: Vec<Value>,
    #[serde(rename = "SoundTracks", default)]
    pub sound_tracks: Vec<Value>,
    #[serde(rename = "targetFrameRate", default, skip_serializing_if = "Option::is_none")]
    pub target_frame_rate: Option<u32>,
    #[serde(rename = "Duration", default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Frame index carried by a `RenderOne` payload: a bare number, or a
/// numeric string.
pub fn frame_index(payload: &Value) -> Option<u32> {
    match payload {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn ping_payload() -> Value {
    json!({ "value": chrono::Local::now().to_rfc3339() })
}

pub fn ok_payload() -> Value {
    json!({ "status": "ok" })
}

pub fn completed_payload(path: &str) -> Value {
    json!({ "status": "completed", "path": path })
}

pub fn error_payload(message: impl Into<String>) -> Value {
    json!({ "status": "error", "message": message.into() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_envelope() {
        let msg = Message::parse(r#"{"Type":"RenderOne","RequestId":"r-7","Payload":42}"#).unwrap();
        assert_eq!(msg.kind, RENDER_ONE);
        assert_eq!(msg.request_id, json!("r-7"));
        assert_eq!(msg.payload().as_ref().and_then(frame_index), Some(42));
    }

    #[test]
    fn test_missing_fields_default() {
        let msg = Message::parse(r#"{"Type":"ping"}"#).unwrap();
        assert_eq!(msg.request_id, Value::Null);
        assert!(msg.payload().is_none());
        assert!(Message::parse("{}").unwrap().kind.is_empty());
    }

    #[test]
    fn test_reply_echoes_type_and_id() {
        let msg = Message::parse(r#"{"Type":"ping","RequestId":"abc","Payload":null}"#).unwrap();
        let line = msg.reply(ok_payload()).to_line().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["Type"], "ping");
        assert_eq!(value["RequestId"], "abc");
        assert_eq!(value["Payload"]["status"], "ok");
    }

    #[test]
    fn test_string_encoded_payload() {
        let msg = Message {
            kind: UPDATE_CLIPS.into(),
            request_id: json!("1"),
            payload: json!(r#"{"Clips":[],"targetFrameRate":30}"#),
        };
        let draft: DraftStructure = serde_json::from_value(msg.payload().unwrap()).unwrap();
        assert!(draft.clips.is_empty());
        assert_eq!(draft.target_frame_rate, Some(30));
    }

    #[test]
    fn test_frame_index_rejects_out_of_range() {
        assert_eq!(frame_index(&json!("17")), Some(17));
        assert_eq!(frame_index(&json!(-1)), None);
        assert_eq!(frame_index(&json!(u64::from(u32::MAX) + 1)), None);
        assert_eq!(frame_index(&json!(1.5)), None);
    }

    #[test]
    fn test_draft_keeps_unknown_fields() {
        let draft: DraftStructure = serde_json::from_value(json!({
            "Name": "demo",
            "Clips": [{ "Id": "a" }],
            "relativeResolution": 1000
        }))
        .unwrap();
        assert_eq!(draft.name.as_deref(), Some("demo"));
        assert_eq!(draft.clips.len(), 1);
        assert_eq!(draft.extra.get("relativeResolution"), Some(&json!(1000)));
    }
}
