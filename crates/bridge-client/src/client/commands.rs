//! The command set sent from [`super::Client`] handles to the
//! [`super::ClientCore`] actor task over an `mpsc` channel.

use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use crate::cli::CliOutput;
use crate::error::BridgeError;
use crate::subscription::Callback;

use super::ActionGoal;

/// Internal self-addressed message a timeout task posts back to the actor
/// when it fires. Not constructible from outside the crate.
#[derive(Debug)]
pub enum TimeoutKind {
    Service { id: String, service: String, timeout: Duration },
    Action { id: String, action: String, timeout: Duration },
    Cancel { key: String, action: String, session_id: Option<String>, timeout: Duration },
    Cli { id: String, command: String, timeout: Duration },
}

pub enum Command {
    Connect {
        url: String,
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Subscribe {
        topic: String,
        msg_type: String,
        compression: Option<String>,
        callback: Callback,
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Unsubscribe {
        topic: String,
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Advertise {
        topic: String,
        msg_type: String,
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    Publish {
        topic: String,
        msg: JsonValue,
        reply: oneshot::Sender<Result<(), BridgeError>>,
    },
    CallService {
        service: String,
        msg_type: String,
        args: JsonValue,
        id: Option<String>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<JsonValue, BridgeError>>,
    },
    SendActionGoal {
        action: String,
        action_type: String,
        goal: JsonValue,
        id: Option<String>,
        session_id: Option<String>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<ActionGoal>,
    },
    CancelActionGoal {
        action: String,
        action_type: String,
        session_id: Option<String>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<JsonValue, BridgeError>>,
    },
    CliExec {
        command: String,
        args: JsonValue,
        id: Option<String>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<CliOutput, BridgeError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
    Timeout(TimeoutKind),
}
