//! Protocol message builder: pure functions producing wire envelopes.
//!
//! Field names are literal and bit-exact on the wire. `None`-valued fields
//! are omitted from the resulting object rather than serialized as `null`.

use serde_json::{json, Map, Value as JsonValue};

use crate::error::BridgeError;

fn insert_if_some(map: &mut Map<String, JsonValue>, key: &str, value: Option<JsonValue>) {
    if let Some(v) = value {
        map.insert(key.to_string(), v);
    }
}

/// Produces envelopes from validated arguments. A fallback implementation
/// (`FallbackBuilder`) is always present; additional implementors can be
/// slotted in via [`build_with_fallback`] without touching call sites.
pub trait MessageBuilder: Send + Sync {
    fn subscribe(&self, topic: &str, msg_type: &str, compression: Option<&str>) -> Option<JsonValue>;
    fn unsubscribe(&self, topic: &str) -> Option<JsonValue>;
    fn advertise(&self, topic: &str, msg_type: &str) -> Option<JsonValue>;
    fn publish(&self, topic: &str, msg: &JsonValue) -> Option<JsonValue>;
    fn call_service(&self, service: &str, msg_type: &str, args: &JsonValue, id: &str) -> Option<JsonValue>;
    fn send_action_goal(
        &self,
        action: &str,
        action_type: &str,
        goal: &JsonValue,
        id: &str,
        session_id: Option<&str>,
    ) -> Option<JsonValue>;
    fn cancel_action_goal(
        &self,
        action: &str,
        action_type: &str,
        session_id: Option<&str>,
    ) -> Option<JsonValue>;
    fn cli_request(&self, id: &str, command: &str, args: &JsonValue) -> Option<JsonValue>;
}

/// The only builder shipped in this crate. Always produces a well-formed
/// envelope, so it never needs to retry against itself.
pub struct FallbackBuilder;

impl MessageBuilder for FallbackBuilder {
    fn subscribe(&self, topic: &str, msg_type: &str, compression: Option<&str>) -> Option<JsonValue> {
        let mut map = Map::new();
        map.insert("op".into(), json!("subscribe"));
        map.insert("topic".into(), json!(topic));
        map.insert("type".into(), json!(msg_type));
        insert_if_some(&mut map, "compression", compression.map(|c| json!(c)));
        Some(JsonValue::Object(map))
    }

    fn unsubscribe(&self, topic: &str) -> Option<JsonValue> {
        Some(json!({"op": "unsubscribe", "topic": topic}))
    }

    fn advertise(&self, topic: &str, msg_type: &str) -> Option<JsonValue> {
        Some(json!({"op": "advertise", "topic": topic, "type": msg_type}))
    }

    fn publish(&self, topic: &str, msg: &JsonValue) -> Option<JsonValue> {
        Some(json!({"op": "publish", "topic": topic, "msg": msg}))
    }

    fn call_service(&self, service: &str, msg_type: &str, args: &JsonValue, id: &str) -> Option<JsonValue> {
        Some(json!({
            "op": "call_service",
            "service": service,
            "type": msg_type,
            "args": args,
            "id": id,
        }))
    }

    fn send_action_goal(
        &self,
        action: &str,
        action_type: &str,
        goal: &JsonValue,
        id: &str,
        session_id: Option<&str>,
    ) -> Option<JsonValue> {
        let mut map = Map::new();
        map.insert("op".into(), json!("send_action_goal"));
        map.insert("action".into(), json!(action));
        map.insert("action_type".into(), json!(action_type));
        map.insert("goal".into(), goal.clone());
        map.insert("id".into(), json!(id));
        insert_if_some(&mut map, "session_id", session_id.map(|s| json!(s)));
        Some(JsonValue::Object(map))
    }

    fn cancel_action_goal(
        &self,
        action: &str,
        action_type: &str,
        session_id: Option<&str>,
    ) -> Option<JsonValue> {
        let mut map = Map::new();
        map.insert("op".into(), json!("cancel_action_goal"));
        map.insert("action".into(), json!(action));
        map.insert("action_type".into(), json!(action_type));
        insert_if_some(&mut map, "session_id", session_id.map(|s| json!(s)));
        Some(JsonValue::Object(map))
    }

    fn cli_request(&self, id: &str, command: &str, args: &JsonValue) -> Option<JsonValue> {
        Some(json!({
            "op": "cli_request",
            "id": id,
            "command": command,
            "args": args,
        }))
    }
}

/// Applies `builder`, falling back to [`FallbackBuilder`] if it produces no
/// envelope or one with a missing/empty `op` field, and failing hard if the
/// fallback also fails to produce a valid envelope.
pub fn build_with_fallback<F>(builder: &dyn MessageBuilder, build: F) -> Result<JsonValue, BridgeError>
where
    F: Fn(&dyn MessageBuilder) -> Option<JsonValue>,
{
    if let Some(envelope) = build(builder).filter(has_valid_op) {
        return Ok(envelope);
    }
    build(&FallbackBuilder)
        .filter(has_valid_op)
        .ok_or(BridgeError::MessageBuildFailed)
}

fn has_valid_op(envelope: &JsonValue) -> bool {
    matches!(envelope.get("op"), Some(JsonValue::String(s)) if !s.is_empty())
}
