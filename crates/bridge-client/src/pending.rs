//! Correlation tables: pending service calls (shared with CLI execution),
//! pending actions (by id and by session), and pending action cancels.
//! Implemented as three independent keyed maps rather than a single graph,
//! so destruction stays local to one table.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::BridgeError;

pub type Reply = oneshot::Sender<Result<JsonValue, BridgeError>>;

/// Distinguishes a service call from a CLI execution request; both share
/// the same correlation lifecycle (allocate id, arm timeout, await
/// response, clean up on synchronous send failure) so they share one table.
#[derive(Debug, Clone)]
pub enum PendingCallKind {
    Service { service: String },
    Cli { command: String },
}

impl PendingCallKind {
    pub fn identifier(&self) -> &str {
        match self {
            PendingCallKind::Service { service } => service,
            PendingCallKind::Cli { command } => command,
        }
    }
}

pub struct PendingCall {
    pub kind: PendingCallKind,
    pub reply: Reply,
    pub timeout: Option<JoinHandle<()>>,
}

/// Pending service calls and CLI executions, keyed by correlation id.
#[derive(Default)]
pub struct PendingCalls {
    entries: HashMap<String, PendingCall>,
}

impl PendingCalls {
    pub fn insert(&mut self, id: String, entry: PendingCall) {
        // Re-keying on id collision is allowed (overwrites); abort any
        // timer the overwritten entry held so it never fires against a
        // call that no longer exists.
        if let Some(previous) = self.entries.insert(id, entry) {
            if let Some(timer) = previous.timeout {
                timer.abort();
            }
        }
    }

    pub fn remove(&mut self, id: &str) -> Option<PendingCall> {
        self.entries.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub struct PendingAction {
    pub id: String,
    pub session_id: Option<String>,
    pub action: String,
    pub action_type: String,
    pub completion: Reply,
    pub events: mpsc::UnboundedSender<ActionEvent>,
    pub timeout: Option<JoinHandle<()>>,
}

/// Streamed action events delivered to a caller while a goal is pending.
#[derive(Debug, Clone)]
pub enum ActionEvent {
    Request(JsonValue),
    Feedback(JsonValue),
}

/// Pending actions, keyed by correlation id, with a reverse session-id
/// index for lookup by `session_id` alone.
#[derive(Default)]
pub struct PendingActions {
    by_id: HashMap<String, PendingAction>,
    session_index: HashMap<String, String>,
}

impl PendingActions {
    pub fn insert(&mut self, entry: PendingAction) {
        if let Some(session_id) = &entry.session_id {
            self.session_index.insert(session_id.clone(), entry.id.clone());
        }
        if let Some(previous) = self.by_id.insert(entry.id.clone(), entry) {
            if let Some(timer) = previous.timeout {
                timer.abort();
            }
            if let Some(session_id) = previous.session_id {
                self.session_index.remove(&session_id);
            }
        }
    }

    /// Finds a pending action by id, falling back to session id, falling
    /// back to the sole pending entry if exactly one exists. Matches the
    /// spec's deliberate ambiguity-resolution rule for servers that omit
    /// both correlators.
    pub fn find_key(&self, id: Option<&str>, session_id: Option<&str>) -> Option<String> {
        if let Some(id) = id {
            if self.by_id.contains_key(id) {
                return Some(id.to_string());
            }
        }
        if let Some(session_id) = session_id {
            if let Some(id) = self.session_index.get(session_id) {
                return Some(id.clone());
            }
        }
        if self.by_id.len() == 1 {
            return self.by_id.keys().next().cloned();
        }
        None
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PendingAction> {
        self.by_id.get_mut(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<PendingAction> {
        let removed = self.by_id.remove(id);
        if let Some(entry) = &removed {
            if let Some(session_id) = &entry.session_id {
                self.session_index.remove(session_id);
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.by_id.keys()
    }

    /// Drains every pending action, for use when a disconnect must reject
    /// all outstanding completions at once.
    pub fn drain(&mut self) -> Vec<PendingAction> {
        self.session_index.clear();
        self.by_id.drain().map(|(_, v)| v).collect()
    }
}

pub struct PendingCancel {
    pub action: String,
    pub reply: Reply,
    pub timeout: Option<JoinHandle<()>>,
}

/// Pending action cancels, keyed by `"<action>::<session id or 'default'>"`.
#[derive(Default)]
pub struct PendingCancels {
    entries: HashMap<String, PendingCancel>,
}

impl PendingCancels {
    pub fn key(action: &str, session_id: Option<&str>) -> String {
        format!("{action}::{}", session_id.unwrap_or("default"))
    }

    pub fn insert(&mut self, key: String, entry: PendingCancel) {
        if let Some(previous) = self.entries.insert(key, entry) {
            if let Some(timer) = previous.timeout {
                timer.abort();
            }
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<PendingCancel> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn drain(&mut self) -> Vec<PendingCancel> {
        self.entries.drain().map(|(_, v)| v).collect()
    }
}
