//! Action-event state machine: reconciles `action_result` and the
//! `type`-discriminated event shapes (`request`/`feedback`/`result`/`error`)
//! against the pending-action table.

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::BridgeError;
use crate::pending::{ActionEvent, PendingActions};

/// Whether an incoming envelope matched a pending action. Both variants are
/// "handled" in the sense that dispatch should stop after this priority
/// slot either way; `NoMatch` just means there was nothing to deliver to.
pub enum Outcome {
    Dispatched,
    NoMatch,
}

fn complete(actions: &mut PendingActions, id: &str, result: Result<JsonValue, BridgeError>) -> Outcome {
    match actions.remove(id) {
        Some(entry) => {
            let _ = entry.completion.send(result);
            Outcome::Dispatched
        }
        None => Outcome::NoMatch,
    }
}

/// `{op:"action_result", action, id?, session_id?, result?, error?}`.
pub fn handle_action_result(envelope: &JsonValue, actions: &mut PendingActions) -> Outcome {
    let id = envelope.get("id").and_then(JsonValue::as_str);
    let session_id = envelope.get("session_id").and_then(JsonValue::as_str);
    let Some(key) = actions.find_key(id, session_id) else {
        debug!("action_result with no matching pending action (id={:?}, session_id={:?})", id, session_id);
        return Outcome::NoMatch;
    };

    if let Some(error) = envelope.get("error").and_then(JsonValue::as_str) {
        let action = actions.get_mut(&key).map(|a| a.action.clone()).unwrap_or_default();
        return complete(
            actions,
            &key,
            Err(BridgeError::ActionFailed {
                action,
                id: key.clone(),
                message: error.to_string(),
            }),
        );
    }

    let result = envelope
        .get("result")
        .cloned()
        .unwrap_or_else(|| envelope.clone());
    complete(actions, &key, Ok(result))
}

/// Dispatches a top-level `type` event (`request`/`feedback`/`result`/`error`).
pub fn handle_type_event(envelope: &JsonValue, actions: &mut PendingActions) -> Outcome {
    let event_type = match envelope.get("type").and_then(JsonValue::as_str) {
        Some(t) => t,
        None => return Outcome::NoMatch,
    };

    let id = envelope.get("id").and_then(JsonValue::as_str);
    let session_id = envelope.get("session_id").and_then(JsonValue::as_str);
    let Some(key) = actions.find_key(id, session_id) else {
        debug!("{event_type} event with no matching pending action");
        return Outcome::NoMatch;
    };

    match event_type {
        "request" => {
            if let Some(entry) = actions.get_mut(&key) {
                let _ = entry.events.send(ActionEvent::Request(envelope.clone()));
            }
            Outcome::Dispatched
        }
        "feedback" => {
            if let Some(entry) = actions.get_mut(&key) {
                let feedback = envelope
                    .get("feedback")
                    .cloned()
                    .unwrap_or_else(|| envelope.clone());
                let _ = entry.events.send(ActionEvent::Feedback(feedback));
            }
            Outcome::Dispatched
        }
        "result" => {
            let action = actions.get_mut(&key).map(|a| a.action.clone()).unwrap_or_default();
            let status = envelope.get("status").and_then(JsonValue::as_i64);
            let result = match status {
                Some(status) if status != 0 => Err(BridgeError::ActionNonSuccess {
                    action,
                    id: key.clone(),
                    status,
                }),
                _ => Ok(envelope
                    .get("result")
                    .cloned()
                    .unwrap_or(JsonValue::Null)),
            };
            complete(actions, &key, result)
        }
        "error" => {
            let action = actions.get_mut(&key).map(|a| a.action.clone()).unwrap_or_default();
            let message = envelope
                .get("message")
                .and_then(JsonValue::as_str)
                .unwrap_or("action failed")
                .to_string();
            complete(actions, &key, Err(BridgeError::ActionFailed { action, id: key.clone(), message }))
        }
        _ => Outcome::NoMatch,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::{mpsc, oneshot};

    fn insert_pending(actions: &mut PendingActions, id: &str, session_id: Option<&str>) -> (
        oneshot::Receiver<Result<JsonValue, BridgeError>>,
        mpsc::UnboundedReceiver<ActionEvent>,
    ) {
        let (completion, completion_rx) = oneshot::channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        actions.insert(crate::pending::PendingAction {
            id: id.to_string(),
            session_id: session_id.map(str::to_string),
            action: "/arm/move".into(),
            action_type: "demo/MoveArm".into(),
            completion,
            events,
            timeout: None,
        });
        (completion_rx, events_rx)
    }

    #[tokio::test]
    async fn result_status_zero_resolves() {
        let mut actions = PendingActions::default();
        let (completion_rx, _events_rx) = insert_pending(&mut actions, "g1", Some("s1"));
        let envelope = json!({"type":"result", "id":"g1", "status":0, "result":{"success":true}});
        handle_type_event(&envelope, &mut actions);
        let result = completion_rx.await.unwrap();
        assert_eq!(result.unwrap(), json!({"success": true}));
        assert_eq!(actions.len(), 0);
    }

    #[tokio::test]
    async fn result_non_zero_status_rejects() {
        let mut actions = PendingActions::default();
        let (completion_rx, _events_rx) = insert_pending(&mut actions, "g1", Some("s1"));
        let envelope = json!({"type":"result", "id":"g1", "status":2, "result":{}});
        handle_type_event(&envelope, &mut actions);
        let result = completion_rx.await.unwrap();
        assert!(matches!(result, Err(BridgeError::ActionNonSuccess { status: 2, .. })));
    }

    #[tokio::test]
    async fn feedback_does_not_remove_entry() {
        let mut actions = PendingActions::default();
        let (_completion_rx, mut events_rx) = insert_pending(&mut actions, "g1", Some("s1"));
        let envelope = json!({"type":"feedback", "id":"g1", "feedback":{"progress":0.5}});
        handle_type_event(&envelope, &mut actions);
        assert_eq!(actions.len(), 1);
        match events_rx.recv().await.unwrap() {
            ActionEvent::Feedback(value) => assert_eq!(value, json!({"progress": 0.5})),
            _ => panic!("expected feedback event"),
        }
    }

    #[tokio::test]
    async fn action_result_with_error_rejects() {
        let mut actions = PendingActions::default();
        let (completion_rx, _events_rx) = insert_pending(&mut actions, "g1", None);
        let envelope = json!({"op":"action_result", "id":"g1", "error":"unknown_action_type"});
        handle_action_result(&envelope, &mut actions);
        let result = completion_rx.await.unwrap();
        match result {
            Err(BridgeError::ActionFailed { message, .. }) => {
                assert!(message.contains("unknown_action_type"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn ambiguous_event_attributed_to_sole_pending_action() {
        let mut actions = PendingActions::default();
        let (completion_rx, _events_rx) = insert_pending(&mut actions, "g1", None);
        let envelope = json!({"type":"result", "status":0, "result":{"ok":true}});
        handle_type_event(&envelope, &mut actions);
        assert!(completion_rx.await.unwrap().is_ok());
    }
}
