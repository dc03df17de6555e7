//! Client core: the connection state machine, message demultiplexing,
//! subscription replay, timeout management, and cancellation.
//!
//! Mirrors the handle/actor split the rest of this workspace uses for
//! long-lived connections: [`Client`] is a cheap, `Clone`-able handle that
//! sends [`commands::Command`]s over an `mpsc` channel; [`ClientCore`] is a
//! single task that owns every mutable table and is the only thing that
//! ever touches the transport.

pub mod commands;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::action;
use crate::cli::{self, CliOutput};
use crate::codec::{resolve_codec, Codec, CodecSelector};
use crate::error::{BridgeError, TransportError};
use crate::message::{build_with_fallback, FallbackBuilder, MessageBuilder};
use crate::pending::{
    ActionEvent, PendingAction, PendingActions, PendingCall, PendingCallKind, PendingCalls,
    PendingCancel, PendingCancels,
};
use crate::reconnect::{ReconnectConfig, ReconnectReason, ReconnectState};
use crate::subscription::{AdvertisementEntry, AdvertisementTable, Callback, SubscriptionEntry, SubscriptionTable};
use crate::transport::{ReadyState, Transport, TransportEvent, TransportFactory};

use commands::{Command, TimeoutKind};

/// Handle returned by [`Client::send_action_goal`]. Streamed `request`/
/// `feedback` events arrive on `events`; the terminal outcome is awaited
/// separately via [`ActionGoal::completion`] so a caller can observe
/// feedback and the final result concurrently.
pub struct ActionGoal {
    pub id: String,
    pub session_id: Option<String>,
    pub events: mpsc::UnboundedReceiver<ActionEvent>,
    completion_rx: oneshot::Receiver<Result<JsonValue, BridgeError>>,
}

impl ActionGoal {
    pub async fn completion(self) -> Result<JsonValue, BridgeError> {
        self.completion_rx.await.unwrap_or(Err(BridgeError::ChannelClosed))
    }
}

fn default_transport_factory() -> TransportFactory {
    #[cfg(not(target_arch = "wasm32"))]
    {
        Arc::new(crate::transport::native::connect)
    }
    #[cfg(target_arch = "wasm32")]
    {
        Arc::new(crate::transport::wasm::connect)
    }
}

/// Assembled client configuration. Built via [`ClientBuilder`].
pub struct ClientConfig {
    pub reconnect: ReconnectConfig,
    pub codec: CodecSelector,
    pub default_timeout: Option<Duration>,
    pub transport_factory: TransportFactory,
    pub message_builder: Arc<dyn MessageBuilder>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            reconnect: ReconnectConfig::default(),
            codec: CodecSelector::default(),
            default_timeout: None,
            transport_factory: default_transport_factory(),
            message_builder: Arc::new(FallbackBuilder),
        }
    }
}

/// Chained-setter builder assembling a [`ClientConfig`], mirroring the
/// builder pattern used elsewhere for configuration.
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        ClientBuilder::default()
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.config.reconnect = reconnect;
        self
    }

    pub fn codec(mut self, codec: CodecSelector) -> Self {
        self.config.codec = codec;
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = Some(timeout);
        self
    }

    pub fn transport_factory(mut self, factory: TransportFactory) -> Self {
        self.config.transport_factory = factory;
        self
    }

    pub fn message_builder(mut self, builder: Arc<dyn MessageBuilder>) -> Self {
        self.config.message_builder = builder;
        self
    }

    pub fn build(self) -> Client {
        Client::new(self.config)
    }
}

/// Per-call options shared by `call_service`/`cli_exec`/`cancel_action_goal`.
#[derive(Default, Clone)]
pub struct CallOptions {
    pub id: Option<String>,
    pub timeout: Option<Duration>,
}

/// Options for `send_action_goal`.
#[derive(Default, Clone)]
pub struct ActionGoalOptions {
    pub id: Option<String>,
    pub session_id: Option<String>,
    pub timeout: Option<Duration>,
}

/// Public handle. Cheap to `Clone`; every clone shares the same underlying
/// actor task.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let core = ClientCore::new(config, rx, tx.clone());
        tokio::spawn(core.run());
        Client { commands: tx }
    }

    fn send(&self, command: Command) -> Result<(), BridgeError> {
        self.commands.send(command).map_err(|_| BridgeError::ChannelClosed)
    }

    pub async fn connect(&self, url: impl Into<String>) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Connect { url: url.into(), reply })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    pub async fn subscribe(
        &self,
        topic: impl Into<String>,
        msg_type: impl Into<String>,
        compression: Option<String>,
        callback: Callback,
    ) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Subscribe {
            topic: topic.into(),
            msg_type: msg_type.into(),
            compression,
            callback,
            reply,
        })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    pub async fn unsubscribe(&self, topic: impl Into<String>) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unsubscribe { topic: topic.into(), reply })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    pub async fn advertise(
        &self,
        topic: impl Into<String>,
        msg_type: impl Into<String>,
    ) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Advertise {
            topic: topic.into(),
            msg_type: msg_type.into(),
            reply,
        })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    pub async fn publish(&self, topic: impl Into<String>, msg: JsonValue) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Publish { topic: topic.into(), msg, reply })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    pub async fn call_service(
        &self,
        service: impl Into<String>,
        msg_type: impl Into<String>,
        args: JsonValue,
        options: CallOptions,
    ) -> Result<JsonValue, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CallService {
            service: service.into(),
            msg_type: msg_type.into(),
            args,
            id: options.id,
            timeout: options.timeout,
            reply,
        })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    pub async fn send_action_goal(
        &self,
        action: impl Into<String>,
        action_type: impl Into<String>,
        goal: JsonValue,
        options: ActionGoalOptions,
    ) -> Result<ActionGoal, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::SendActionGoal {
            action: action.into(),
            action_type: action_type.into(),
            goal,
            id: options.id,
            session_id: options.session_id,
            timeout: options.timeout,
            reply,
        })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }

    pub async fn cancel_action_goal(
        &self,
        action: impl Into<String>,
        action_type: impl Into<String>,
        session_id: Option<String>,
        options: CallOptions,
    ) -> Result<JsonValue, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CancelActionGoal {
            action: action.into(),
            action_type: action_type.into(),
            session_id,
            timeout: options.timeout,
            reply,
        })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    pub async fn cli_exec(
        &self,
        command: impl Into<String>,
        args: JsonValue,
        options: CallOptions,
    ) -> Result<CliOutput, BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CliExec {
            command: command.into(),
            args,
            id: options.id,
            timeout: options.timeout,
            reply,
        })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)?
    }

    pub async fn close(&self) -> Result<(), BridgeError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Close { reply })?;
        rx.await.map_err(|_| BridgeError::ChannelClosed)
    }
}

/// Owner of every mutable table: subscriptions, advertisements, the three
/// pending-entry tables, the reconnect scheduler, the current transport,
/// and the socket generation counters. Reached only through [`Client`].
struct ClientCore {
    command_rx: mpsc::UnboundedReceiver<Command>,
    self_tx: mpsc::UnboundedSender<Command>,

    codec: Arc<dyn Codec>,
    builder: Arc<dyn MessageBuilder>,
    transport_factory: TransportFactory,
    default_timeout: Option<Duration>,

    url: Option<String>,
    transport: Option<Arc<dyn Transport>>,
    event_rx: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    in_flight_connect: Option<Vec<oneshot::Sender<Result<(), BridgeError>>>>,

    socket_generation: u64,
    active_generation: u64,
    current_generation: Option<u64>,

    reconnect: ReconnectState,
    subscriptions: SubscriptionTable,
    advertisements: AdvertisementTable,
    pending_calls: PendingCalls,
    pending_actions: PendingActions,
    pending_cancels: PendingCancels,

    next_id: AtomicU64,
}

impl ClientCore {
    fn new(
        config: ClientConfig,
        command_rx: mpsc::UnboundedReceiver<Command>,
        self_tx: mpsc::UnboundedSender<Command>,
    ) -> Self {
        ClientCore {
            command_rx,
            self_tx,
            codec: resolve_codec(config.codec),
            builder: config.message_builder,
            transport_factory: config.transport_factory,
            default_timeout: config.default_timeout,
            url: None,
            transport: None,
            event_rx: None,
            in_flight_connect: None,
            socket_generation: 0,
            active_generation: 0,
            current_generation: None,
            reconnect: ReconnectState::new(config.reconnect),
            subscriptions: SubscriptionTable::default(),
            advertisements: AdvertisementTable::default(),
            pending_calls: PendingCalls::default(),
            pending_actions: PendingActions::default(),
            pending_cancels: PendingCancels::default(),
            next_id: AtomicU64::new(1),
        }
    }

    fn generate_id(&self) -> String {
        format!("id_{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                event = Self::recv_event(&mut self.event_rx) => {
                    if let Some(event) = event {
                        self.handle_transport_event(event).await;
                    }
                }
                reason = self.reconnect.wait() => {
                    if let Some(reason) = reason {
                        self.open_socket(reason).await;
                    }
                }
            }
        }
    }

    async fn recv_event(event_rx: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>) -> Option<TransportEvent> {
        match event_rx {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    // -- command handling ---------------------------------------------

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { url, reply } => self.handle_connect(url, reply).await,
            Command::Subscribe { topic, msg_type, compression, callback, reply } => {
                let result = self.handle_subscribe(topic, msg_type, compression, callback);
                let _ = reply.send(result);
            }
            Command::Unsubscribe { topic, reply } => {
                let result = self.handle_unsubscribe(topic);
                let _ = reply.send(result);
            }
            Command::Advertise { topic, msg_type, reply } => {
                let result = self.handle_advertise(topic, msg_type);
                let _ = reply.send(result);
            }
            Command::Publish { topic, msg, reply } => {
                let result = self.handle_publish(topic, msg);
                let _ = reply.send(result);
            }
            Command::CallService { service, msg_type, args, id, timeout, reply } => {
                self.handle_call_service(service, msg_type, args, id, timeout, reply);
            }
            Command::SendActionGoal { action, action_type, goal, id, session_id, timeout, reply } => {
                self.handle_send_action_goal(action, action_type, goal, id, session_id, timeout, reply);
            }
            Command::CancelActionGoal { action, action_type, session_id, timeout, reply } => {
                self.handle_cancel_action_goal(action, action_type, session_id, timeout, reply);
            }
            Command::CliExec { command, args, id, timeout, reply } => {
                self.handle_cli_exec(command, args, id, timeout, reply);
            }
            Command::Close { reply } => {
                self.handle_close();
                let _ = reply.send(());
            }
            Command::Timeout(kind) => self.handle_timeout(kind),
        }
    }

    async fn handle_connect(&mut self, url: String, reply: oneshot::Sender<Result<(), BridgeError>>) {
        if let Some(pending) = &mut self.in_flight_connect {
            pending.push(reply);
            return;
        }

        self.reconnect.clear_manual_close();
        self.reconnect.cancel_timer();
        self.url = Some(url.clone());
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.event_rx = None;

        match (self.transport_factory)(&url) {
            Ok((transport, event_rx)) => {
                self.socket_generation += 1;
                self.current_generation = Some(self.socket_generation);
                self.transport = Some(transport);
                self.event_rx = Some(event_rx);
                self.in_flight_connect = Some(vec![reply]);
            }
            Err(err) => {
                let _ = reply.send(Err(err.into()));
            }
        }
    }

    fn handle_subscribe(
        &mut self,
        topic: String,
        msg_type: String,
        compression: Option<String>,
        callback: Callback,
    ) -> Result<(), BridgeError> {
        let needs_send = match self.subscriptions.get_mut(&topic) {
            Some(entry) => {
                let changed = entry.msg_type != msg_type || entry.compression != compression;
                entry.add_callback(callback);
                if changed {
                    entry.msg_type = msg_type.clone();
                    entry.compression = compression.clone();
                }
                changed
            }
            None => {
                let mut entry = SubscriptionEntry { msg_type: msg_type.clone(), compression: compression.clone(), callbacks: Vec::new() };
                entry.add_callback(callback);
                self.subscriptions.insert(topic.clone(), entry);
                true
            }
        };

        if !needs_send {
            return Ok(());
        }

        let builder = Arc::clone(&self.builder);
        let envelope = build_with_fallback(builder.as_ref(), |b| {
            b.subscribe(&topic, &msg_type, compression.as_deref())
        })?;
        self.send_envelope(envelope)
    }

    fn handle_unsubscribe(&mut self, topic: String) -> Result<(), BridgeError> {
        self.subscriptions.remove(&topic);
        let builder = Arc::clone(&self.builder);
        let envelope = build_with_fallback(builder.as_ref(), |b| b.unsubscribe(&topic))?;
        self.send_envelope(envelope)
    }

    fn handle_advertise(&mut self, topic: String, msg_type: String) -> Result<(), BridgeError> {
        self.advertisements.insert(topic.clone(), AdvertisementEntry { msg_type: msg_type.clone() });
        let builder = Arc::clone(&self.builder);
        let envelope = build_with_fallback(builder.as_ref(), |b| b.advertise(&topic, &msg_type))?;
        self.send_envelope(envelope)
    }

    fn handle_publish(&mut self, topic: String, msg: JsonValue) -> Result<(), BridgeError> {
        let builder = Arc::clone(&self.builder);
        let envelope = build_with_fallback(builder.as_ref(), |b| b.publish(&topic, &msg))?;
        self.send_envelope(envelope)
    }

    fn handle_call_service(
        &mut self,
        service: String,
        msg_type: String,
        args: JsonValue,
        id: Option<String>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<JsonValue, BridgeError>>,
    ) {
        let id = id.unwrap_or_else(|| self.generate_id());
        let builder = Arc::clone(&self.builder);
        let envelope = match build_with_fallback(builder.as_ref(), |b| b.call_service(&service, &msg_type, &args, &id)) {
            Ok(envelope) => envelope,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };

        if let Err(err) = self.send_envelope(envelope) {
            let _ = reply.send(Err(err));
            return;
        }

        let timeout_handle = timeout.or(self.default_timeout).map(|duration| {
            self.spawn_timeout(TimeoutKind::Service { id: id.clone(), service: service.clone(), timeout: duration })
        });

        self.pending_calls.insert(
            id,
            PendingCall { kind: PendingCallKind::Service { service }, reply, timeout: timeout_handle },
        );
    }

    fn handle_send_action_goal(
        &mut self,
        action: String,
        action_type: String,
        goal: JsonValue,
        id: Option<String>,
        session_id: Option<String>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<ActionGoal>,
    ) {
        let id = id.unwrap_or_else(|| self.generate_id());
        let (completion_tx, completion_rx) = oneshot::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let builder = Arc::clone(&self.builder);
        let envelope = build_with_fallback(builder.as_ref(), |b| {
            b.send_action_goal(&action, &action_type, &goal, &id, session_id.as_deref())
        });

        let send_result = envelope.and_then(|envelope| self.send_envelope(envelope));

        if let Err(err) = send_result {
            let _ = completion_tx.send(Err(err));
        } else {
            let timeout_handle = timeout.or(self.default_timeout).map(|duration| {
                self.spawn_timeout(TimeoutKind::Action { id: id.clone(), action: action.clone(), timeout: duration })
            });
            self.pending_actions.insert(PendingAction {
                id: id.clone(),
                session_id: session_id.clone(),
                action,
                action_type,
                completion: completion_tx,
                events: events_tx,
                timeout: timeout_handle,
            });
        }

        let _ = reply.send(ActionGoal { id, session_id, events: events_rx, completion_rx });
    }

    fn handle_cancel_action_goal(
        &mut self,
        action: String,
        action_type: String,
        session_id: Option<String>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<JsonValue, BridgeError>>,
    ) {
        let key = PendingCancels::key(&action, session_id.as_deref());
        let builder = Arc::clone(&self.builder);
        let envelope = match build_with_fallback(builder.as_ref(), |b| {
            b.cancel_action_goal(&action, &action_type, session_id.as_deref())
        }) {
            Ok(envelope) => envelope,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };

        if let Err(err) = self.send_envelope(envelope) {
            let _ = reply.send(Err(err));
            return;
        }

        let timeout_handle = timeout.or(self.default_timeout).map(|duration| {
            self.spawn_timeout(TimeoutKind::Cancel {
                key: key.clone(),
                action: action.clone(),
                session_id: session_id.clone(),
                timeout: duration,
            })
        });

        self.pending_cancels.insert(key, PendingCancel { action, reply, timeout: timeout_handle });
    }

    fn handle_cli_exec(
        &mut self,
        command: String,
        args: JsonValue,
        id: Option<String>,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<CliOutput, BridgeError>>,
    ) {
        let id = id.unwrap_or_else(|| self.generate_id());
        let builder = Arc::clone(&self.builder);
        let envelope = match build_with_fallback(builder.as_ref(), |b| b.cli_request(&id, &command, &args)) {
            Ok(envelope) => envelope,
            Err(err) => {
                let _ = reply.send(Err(err));
                return;
            }
        };

        let (inner_reply, inner_rx) = oneshot::channel();
        if let Err(err) = self.send_envelope(envelope) {
            let _ = reply.send(Err(err));
            return;
        }

        let timeout_handle = timeout.or(self.default_timeout).map(|duration| {
            self.spawn_timeout(TimeoutKind::Cli { id: id.clone(), command: command.clone(), timeout: duration })
        });

        self.pending_calls.insert(
            id,
            PendingCall { kind: PendingCallKind::Cli { command }, reply: inner_reply, timeout: timeout_handle },
        );

        // Bridge the generic `JsonValue` pending-call reply into the
        // typed `CliOutput` the public API promises.
        tokio::spawn(async move {
            let result = match inner_rx.await {
                Ok(Ok(envelope)) => Ok(cli::parse_cli_output(&envelope)),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(BridgeError::ChannelClosed),
            };
            let _ = reply.send(result);
        });
    }

    fn handle_close(&mut self) {
        self.reconnect.manual_close();
        if let Some(pending) = self.in_flight_connect.take() {
            for reply in pending {
                let _ = reply.send(Err(BridgeError::Closed));
            }
        }
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.event_rx = None;

        for entry in self.pending_actions.drain() {
            if let Some(timer) = entry.timeout {
                timer.abort();
            }
            let _ = entry.completion.send(Err(BridgeError::ActionInterrupted {
                action: entry.action,
                id: entry.id,
            }));
        }
        for entry in self.pending_cancels.drain() {
            if let Some(timer) = entry.timeout {
                timer.abort();
            }
            let _ = entry.reply.send(Err(BridgeError::CancelInterrupted {
                action: entry.action,
                session: "unknown".to_string(),
            }));
        }
    }

    fn handle_timeout(&mut self, kind: TimeoutKind) {
        match kind {
            TimeoutKind::Service { id, service, timeout } => {
                if let Some(entry) = self.pending_calls.remove(&id) {
                    let _ = entry.reply.send(Err(BridgeError::ServiceTimeout { service, id, timeout }));
                }
            }
            TimeoutKind::Action { id, action, timeout } => {
                if let Some(entry) = self.pending_actions.remove(&id) {
                    let _ = entry.completion.send(Err(BridgeError::ActionTimeout { action, id, timeout }));
                }
            }
            TimeoutKind::Cancel { key, action, session_id, timeout } => {
                if let Some(entry) = self.pending_cancels.remove(&key) {
                    let session = session_id.unwrap_or_else(|| "default".to_string());
                    let _ = entry.reply.send(Err(BridgeError::CancelTimeout { action, session, timeout }));
                }
            }
            TimeoutKind::Cli { id, command, timeout } => {
                if let Some(entry) = self.pending_calls.remove(&id) {
                    let _ = entry.reply.send(Err(BridgeError::CliTimeout { command, id, timeout }));
                }
            }
        }
    }

    fn spawn_timeout(&self, kind: TimeoutKind) -> tokio::task::JoinHandle<()> {
        let duration = match &kind {
            TimeoutKind::Service { timeout, .. }
            | TimeoutKind::Action { timeout, .. }
            | TimeoutKind::Cancel { timeout, .. }
            | TimeoutKind::Cli { timeout, .. } => *timeout,
        };
        let self_tx = self.self_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = self_tx.send(Command::Timeout(kind));
        })
    }

    fn send_envelope(&self, envelope: JsonValue) -> Result<(), BridgeError> {
        let transport = self.transport.as_ref().ok_or(TransportError::NotConnected)?;
        if transport.ready_state() != ReadyState::Open {
            return Err(TransportError::NotConnected.into());
        }
        let frame = self.codec.encode(&envelope)?;
        transport.send(frame)?;
        Ok(())
    }

    // -- transport event handling ---------------------------------------

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.handle_open().await,
            TransportEvent::Message(frame) => self.handle_message(frame),
            TransportEvent::Error(message) => {
                warn!(error = %message, "transport error");
            }
            TransportEvent::Close { code, reason } => self.handle_disconnect(code, reason).await,
        }
    }

    async fn handle_open(&mut self) {
        if let Some(generation) = self.current_generation {
            self.active_generation = generation;
        }
        info!("connection open, replaying subscriptions and advertisements");

        let replay_result = self.replay_state();
        match replay_result {
            Ok(()) => {
                self.reconnect.reset();
                if let Some(replies) = self.in_flight_connect.take() {
                    for reply in replies {
                        let _ = reply.send(Ok(()));
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "state replay failed after connect");
                if let Some(replies) = self.in_flight_connect.take() {
                    for reply in replies {
                        let _ = reply.send(Err(BridgeError::Transport(TransportError::SendFailed(err.to_string()))));
                    }
                }
                self.schedule_reconnect(ReconnectReason::ConnectError, Some(err.to_string()));
            }
        }
    }

    fn replay_state(&self) -> Result<(), BridgeError> {
        let builder = self.builder.as_ref();
        for (topic, entry) in self.subscriptions.iter_in_order() {
            let envelope = build_with_fallback(builder, |b| {
                b.subscribe(topic, &entry.msg_type, entry.compression.as_deref())
            })?;
            self.send_envelope(envelope)?;
        }
        for (topic, entry) in self.advertisements.iter_in_order() {
            let envelope = build_with_fallback(builder, |b| b.advertise(topic, &entry.msg_type))?;
            self.send_envelope(envelope)?;
        }
        Ok(())
    }

    fn handle_message(&mut self, frame: crate::codec::WireFrame) {
        let envelope = match self.codec.decode(&frame) {
            Ok(value) => value,
            Err(err) => {
                debug!(error = %err, "dropping undecodable frame");
                return;
            }
        };

        let op = envelope.get("op").and_then(JsonValue::as_str);
        match op {
            Some("publish") => self.dispatch_publish(&envelope),
            Some("service_response") => self.dispatch_service_response(&envelope),
            Some("cli_response") => self.dispatch_cli_response(&envelope),
            Some("cancel_action_result") => self.dispatch_cancel_action_result(&envelope),
            Some("action_result") => {
                action::handle_action_result(&envelope, &mut self.pending_actions);
            }
            Some("error") => {
                debug!(?envelope, "dropping out-of-band server error frame");
            }
            _ => {
                if envelope.get("type").is_some() {
                    action::handle_type_event(&envelope, &mut self.pending_actions);
                } else {
                    debug!(?envelope, "dropping envelope with no recognized discriminant");
                }
            }
        }
    }

    fn dispatch_publish(&self, envelope: &JsonValue) {
        let Some(topic) = envelope.get("topic").and_then(JsonValue::as_str) else { return };
        let Some(entry) = self.subscriptions.get(topic) else { return };
        let msg = envelope.get("msg").cloned().unwrap_or(JsonValue::Null);
        for callback in &entry.callbacks {
            callback(msg.clone());
        }
    }

    fn dispatch_service_response(&mut self, envelope: &JsonValue) {
        let Some(id) = envelope.get("id").and_then(JsonValue::as_str) else { return };
        let Some(entry) = self.pending_calls.remove(id) else { return };
        if let Some(timer) = entry.timeout {
            timer.abort();
        }
        let service = entry.kind.identifier().to_string();
        let result_ok = envelope.get("result").and_then(JsonValue::as_bool).unwrap_or(false);
        let result = if result_ok {
            Ok(envelope.get("values").cloned().unwrap_or_else(|| JsonValue::Object(Default::default())))
        } else {
            let message = envelope
                .get("error")
                .and_then(JsonValue::as_str)
                .unwrap_or("service call failed")
                .to_string();
            Err(BridgeError::ServiceFailed { service, id: id.to_string(), message })
        };
        let _ = entry.reply.send(result);
    }

    fn dispatch_cli_response(&mut self, envelope: &JsonValue) {
        let Some(id) = envelope.get("id").and_then(JsonValue::as_str) else { return };
        let Some(entry) = self.pending_calls.remove(id) else { return };
        if let Some(timer) = entry.timeout {
            timer.abort();
        }
        let command = entry.kind.identifier().to_string();
        let result_ok = envelope.get("result").and_then(JsonValue::as_bool).unwrap_or(false);
        let result = if result_ok {
            Ok(envelope.clone())
        } else {
            let message = envelope
                .get("error")
                .and_then(JsonValue::as_str)
                .unwrap_or("CLI command failed")
                .to_string();
            Err(BridgeError::CliFailed { command, id: id.to_string(), message })
        };
        let _ = entry.reply.send(result);
    }

    fn dispatch_cancel_action_result(&mut self, envelope: &JsonValue) {
        let action = envelope.get("action").and_then(JsonValue::as_str).unwrap_or_default();
        let session_id = envelope.get("session_id").and_then(JsonValue::as_str);
        let key = PendingCancels::key(action, session_id);
        let Some(entry) = self.pending_cancels.remove(&key) else { return };
        if let Some(timer) = entry.timeout {
            timer.abort();
        }
        let result_ok = envelope.get("result").and_then(JsonValue::as_bool).unwrap_or(false);
        let result = if result_ok {
            Ok(envelope.clone())
        } else {
            let message = envelope
                .get("error")
                .and_then(JsonValue::as_str)
                .unwrap_or("cancel failed")
                .to_string();
            Err(BridgeError::CancelFailed {
                action: entry.action,
                session: session_id.unwrap_or("default").to_string(),
                message,
            })
        };
        let _ = entry.reply.send(result);
    }

    async fn handle_disconnect(&mut self, _code: Option<u16>, reason: String) {
        self.transport = None;
        self.event_rx = None;

        if let Some(replies) = self.in_flight_connect.take() {
            for reply in replies {
                let _ = reply.send(Err(BridgeError::Transport(TransportError::OpenFailed {
                    url: self.url.clone().unwrap_or_default(),
                    reason: reason.clone(),
                })));
            }
            // A disconnect during opening is a connect failure; schedule a
            // reconnect the same as any other close.
            self.schedule_reconnect(ReconnectReason::ConnectError, Some(reason));
            return;
        }

        for entry in self.pending_actions.drain() {
            if let Some(timer) = entry.timeout {
                timer.abort();
            }
            let _ = entry.completion.send(Err(BridgeError::ActionInterrupted {
                action: entry.action,
                id: entry.id,
            }));
        }
        for entry in self.pending_cancels.drain() {
            if let Some(timer) = entry.timeout {
                timer.abort();
            }
            let _ = entry.reply.send(Err(BridgeError::CancelInterrupted {
                action: entry.action,
                session: "unknown".to_string(),
            }));
        }
        // Pending service calls survive: they either resolve after
        // reconnect delivers a late `service_response`, or their own
        // timeout fires independently.

        self.schedule_reconnect(ReconnectReason::SocketClose, Some(reason));
    }

    fn schedule_reconnect(&mut self, reason: ReconnectReason, error: Option<String>) {
        if self.reconnect.is_manual_close() {
            return;
        }
        if let Some(scheduled) = self.reconnect.schedule(reason, error) {
            info!(
                attempt = scheduled.attempt,
                delay_ms = scheduled.next_delay.as_millis() as u64,
                ?reason,
                error = ?scheduled.error,
                "reconnect scheduled"
            );
        }
    }

    async fn open_socket(&mut self, _reason: ReconnectReason) {
        let Some(url) = self.url.clone() else { return };
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.event_rx = None;

        match (self.transport_factory)(&url) {
            Ok((transport, event_rx)) => {
                self.socket_generation += 1;
                self.current_generation = Some(self.socket_generation);
                self.transport = Some(transport);
                self.event_rx = Some(event_rx);
            }
            Err(err) => {
                warn!(error = %err, "reconnect attempt failed to open socket");
                self.schedule_reconnect(ReconnectReason::OpenSocketThrow, Some(err.to_string()));
            }
        }
    }
}
