//! The resilient messaging channel.
//!
//! ```text
//! connect() ──► Connecting ──open ok──► Connected ──close 1000──► Disconnected
//!                   │                       │
//!               open failed           close ≠ 1000 / error
//!                   ▼                       ▼
//!             Disconnected ◄──────── Disconnected + reconnect after delay
//! ```
//!
//! All state lives behind one mutex that is only held for transitions. Every
//! event for subscribers is pushed, under that lock, onto a single queue
//! drained by a dispatcher task, so subscribers see events in transition
//! order and may call back into the channel from inside a handler.
//! Handlers that call back should capture a [`WeakChannel`]: a [`Channel`]
//! clone stored in a handler keeps the channel alive through its own
//! registry until `disconnect()` releases the handler.
//!
//! Each transport attempt is tagged with a generation number. Events from a
//! link whose generation is no longer current are discarded; a late open of
//! a superseded attempt is closed straight away.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::ChannelConfig;
use crate::endpoint::Identity;
use crate::error::ChannelError;
use crate::event::{ChannelState, CloseCode, ConnectionEvent, ConnectionState, ReconnectPlan};
use crate::message::ChatMessage;
use crate::policy::ReconnectPolicy;
use crate::registry::{Handler, HandlerRegistry, Subscription};
use crate::transport::{Connector, FrameWriter, TransportEvent, TransportLink};

const CLIENT_DISCONNECT: &str = "client disconnect";

/// Work for the dispatcher task.
enum Dispatch {
    Message(ChatMessage),
    Connection(ConnectionEvent),
    /// Drop handlers registered before these watermarks.
    Release { messages: u64, connections: u64 },
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptKind {
    User,
    Reconnect,
}

struct ScheduledReconnect {
    generation: u64,
    task: JoinHandle<()>,
}

struct Core {
    state: ChannelState,
    generation: u64,
    attempt: AttemptKind,
    writer: Option<FrameWriter>,
    identity: Option<Identity>,
    reconnect_attempts: u32,
    scheduled: Option<ScheduledReconnect>,
    pending: Option<oneshot::Sender<Result<(), ChannelError>>>,
}

impl Core {
    fn cancel_scheduled(&mut self) {
        if let Some(scheduled) = self.scheduled.take() {
            scheduled.task.abort();
            debug!(generation = scheduled.generation, "scheduled reconnect cancelled");
        }
    }

    fn is_current(&self, generation: u64, state: ChannelState) -> bool {
        self.generation == generation && self.state == state
    }
}

struct Shared {
    connector: Arc<dyn Connector>,
    config: ChannelConfig,
    policy: ReconnectPolicy,
    core: Mutex<Core>,
    state_tx: watch::Sender<ChannelState>,
    queue: mpsc::UnboundedSender<Dispatch>,
    messages: HandlerRegistry<ChatMessage>,
    connections: HandlerRegistry<ConnectionEvent>,
}

/// A single logical chat connection with automatic recovery.
///
/// `Channel` is a cheap handle; clones share the same connection, state and
/// subscribers. Construct one per logical connection and pass it to the
/// components that need it.
///
/// Must be created inside a Tokio runtime: the channel spawns a dispatcher
/// task that invokes subscriber handlers. Handlers run on that task and
/// should return quickly.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    /// Create a disconnected channel.
    pub fn new(connector: impl Connector, config: ChannelConfig) -> Self {
        Self::with_connector(Arc::new(connector), config)
    }

    /// Create a disconnected channel over a shared connector.
    pub fn with_connector(connector: Arc<dyn Connector>, config: ChannelConfig) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        let messages = HandlerRegistry::new("message");
        let connections = HandlerRegistry::new("connection");

        tokio::spawn(run_dispatcher(rx, messages.clone(), connections.clone()));

        let policy = ReconnectPolicy::new(config.reconnect.clone());
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                policy,
                core: Mutex::new(Core {
                    state: ChannelState::Disconnected,
                    generation: 0,
                    attempt: AttemptKind::User,
                    writer: None,
                    identity: None,
                    reconnect_attempts: 0,
                    scheduled: None,
                    pending: None,
                }),
                state_tx,
                queue,
                messages,
                connections,
            }),
        }
    }

    /// Open the connection for `user_id` (and optional chat `session_id`).
    ///
    /// Resolves once the transport is open. If the channel is already
    /// connecting or connected this returns `Ok(())` immediately and opens
    /// nothing. A failed open is returned as the error and does not schedule
    /// a reconnect.
    pub async fn connect(
        &self,
        user_id: impl Into<String>,
        session_id: Option<String>,
    ) -> Result<(), ChannelError> {
        let rx = {
            let mut core = self.shared.lock();
            if core.state != ChannelState::Disconnected {
                debug!(state = %core.state, "connect ignored: channel already active");
                return Ok(());
            }
            let identity = Identity::new(user_id, session_id);
            let url = self.shared.config.endpoint.url(&identity)?;

            core.cancel_scheduled();
            core.reconnect_attempts = 0;
            core.identity = Some(identity);
            let (tx, rx) = oneshot::channel();
            core.pending = Some(tx);
            self.shared.start_attempt(&mut core, url, AttemptKind::User);
            rx
        };
        rx.await.unwrap_or(Err(ChannelError::Cancelled))
    }

    /// Close the connection with the normal-closure code.
    ///
    /// Cancels any scheduled reconnect, resets the attempt counter, rejects
    /// a pending `connect` with [`ChannelError::Cancelled`], and removes the
    /// handlers registered so far once the final `Disconnected` event has
    /// been delivered.
    pub fn disconnect(&self) {
        let shared = &self.shared;
        let mut core = shared.lock();
        let was = core.state;

        core.generation += 1;
        core.cancel_scheduled();
        core.reconnect_attempts = 0;
        if let Some(writer) = core.writer.take() {
            if let Err(e) = writer.close(CloseCode::NORMAL, CLIENT_DISCONNECT) {
                debug!(error = %e, "transport already gone on disconnect");
            }
        }
        if let Some(pending) = core.pending.take() {
            let _ = pending.send(Err(ChannelError::Cancelled));
        }
        core.state = ChannelState::Disconnected;
        shared.publish(ChannelState::Disconnected);

        if was == ChannelState::Connected {
            shared.enqueue(Dispatch::Connection(ConnectionEvent::Disconnected {
                code: CloseCode::NORMAL,
                reason: CLIENT_DISCONNECT.into(),
                reconnect: ReconnectPlan::None,
            }));
        }
        shared.enqueue(Dispatch::Release {
            messages: shared.messages.watermark(),
            connections: shared.connections.watermark(),
        });
        info!(from = %was, "channel disconnected");
    }

    /// Send a text message. Returns the message as it was sent.
    pub fn send(&self, content: impl Into<String>) -> Result<ChatMessage, ChannelError> {
        let message = ChatMessage::text(content);
        self.send_message(&message)?;
        Ok(message)
    }

    /// Send an arbitrary envelope. Fails with [`ChannelError::NotConnected`]
    /// unless the channel is connected; nothing is queued in that case.
    pub fn send_message(&self, message: &ChatMessage) -> Result<(), ChannelError> {
        let core = self.shared.lock();
        let writer = match (core.state, core.writer.as_ref()) {
            (ChannelState::Connected, Some(writer)) => writer,
            _ => return Err(ChannelError::NotConnected),
        };
        let frame = message.encode()?;
        let bytes = frame.len();
        writer.send_text(frame)?;
        debug!(kind = %message.kind, bytes, "message sent");
        Ok(())
    }

    /// Subscribe to inbound messages.
    pub fn on_message<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ChatMessage) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.messages.register(handler)
    }

    /// Subscribe to inbound messages with a [`Handler`] implementation.
    pub fn on_message_handler(&self, handler: impl Handler<ChatMessage>) -> Subscription {
        self.shared.messages.register_handler(handler)
    }

    /// Subscribe to connection events.
    pub fn on_connection<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ConnectionEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.shared.connections.register(handler)
    }

    /// Subscribe to connection events with a [`Handler`] implementation.
    pub fn on_connection_handler(&self, handler: impl Handler<ConnectionEvent>) -> Subscription {
        self.shared.connections.register_handler(handler)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ChannelState {
        self.shared.lock().state
    }

    /// `{ is_connected, is_connecting }` snapshot.
    pub fn connection_state(&self) -> ConnectionState {
        self.state().into()
    }

    /// Observe state changes.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.shared.state_tx.subscribe()
    }

    /// Automatic attempts made since the last successful open or explicit
    /// connect/disconnect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.lock().reconnect_attempts
    }

    pub fn max_reconnect_attempts(&self) -> u32 {
        self.shared.policy.max_attempts()
    }

    pub fn remaining_reconnect_attempts(&self) -> u32 {
        self.max_reconnect_attempts()
            .saturating_sub(self.reconnect_attempts())
    }

    /// Identity of the last `connect` call.
    pub fn identity(&self) -> Option<Identity> {
        self.shared.lock().identity.clone()
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    /// Number of registered `(message, connection)` handlers.
    pub fn handler_counts(&self) -> (usize, usize) {
        (self.shared.messages.len(), self.shared.connections.len())
    }

    /// Wait until every event queued so far has been delivered.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.shared.enqueue(Dispatch::Flush(tx));
        let _ = rx.await;
    }

    /// A handle that does not keep the channel alive.
    pub fn downgrade(&self) -> WeakChannel {
        WeakChannel {
            shared: Arc::downgrade(&self.shared),
        }
    }
}

/// Non-owning [`Channel`] handle for handlers that call back into the
/// channel they are subscribed to.
///
/// ```ignore
/// let weak = channel.downgrade();
/// channel.on_message(move |message: &ChatMessage| {
///     if let Some(channel) = weak.upgrade() {
///         channel.send(format!("ack: {}", message.content))?;
///     }
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct WeakChannel {
    shared: Weak<Shared>,
}

impl WeakChannel {
    /// The channel, if any [`Channel`] handle is still alive.
    pub fn upgrade(&self) -> Option<Channel> {
        self.shared.upgrade().map(|shared| Channel { shared })
    }
}

impl fmt::Debug for WeakChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakChannel")
            .field("alive", &(self.shared.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.lock();
        f.debug_struct("Channel")
            .field("state", &core.state)
            .field("generation", &core.generation)
            .field("reconnect_attempts", &core.reconnect_attempts)
            .field("transport", &self.shared.connector.name())
            .finish()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: ChannelState) {
        self.state_tx.send_replace(state);
    }

    fn enqueue(&self, item: Dispatch) {
        if self.queue.send(item).is_err() {
            debug!("dispatcher stopped; event dropped");
        }
    }

    fn start_attempt(self: &Arc<Self>, core: &mut Core, url: Url, kind: AttemptKind) {
        core.generation += 1;
        core.state = ChannelState::Connecting;
        core.attempt = kind;
        self.publish(ChannelState::Connecting);

        let generation = core.generation;
        info!(
            url = %url,
            generation,
            transport = self.connector.name(),
            reconnect = kind == AttemptKind::Reconnect,
            "connecting"
        );
        tokio::spawn(run_link(
            Arc::downgrade(self),
            Arc::clone(&self.connector),
            url,
            generation,
            self.config.connect_timeout(),
        ));
    }

    /// Install a freshly opened link. Returns `false` if the attempt was
    /// superseded; the link is closed in that case.
    fn on_open(&self, generation: u64, writer: FrameWriter) -> bool {
        let mut core = self.lock();
        if !core.is_current(generation, ChannelState::Connecting) {
            debug!(generation, "closing late open from superseded attempt");
            let _ = writer.close(CloseCode::NORMAL, "superseded");
            return false;
        }
        let reconnected = core.attempt == AttemptKind::Reconnect;
        core.state = ChannelState::Connected;
        core.writer = Some(writer);
        core.reconnect_attempts = 0;
        self.publish(ChannelState::Connected);
        self.enqueue(Dispatch::Connection(ConnectionEvent::Connected));
        if let Some(pending) = core.pending.take() {
            let _ = pending.send(Ok(()));
        }
        info!(generation, reconnected, "connected");
        true
    }

    fn on_open_failed(self: &Arc<Self>, generation: u64, error: ChannelError) {
        let mut core = self.lock();
        if !core.is_current(generation, ChannelState::Connecting) {
            debug!(generation, error = %error, "ignoring failure of superseded attempt");
            return;
        }
        core.state = ChannelState::Disconnected;
        self.publish(ChannelState::Disconnected);

        let attempt = core.attempt;
        match attempt {
            AttemptKind::User => {
                warn!(error = %error, "connect failed");
                if let Some(pending) = core.pending.take() {
                    let _ = pending.send(Err(error));
                }
            }
            AttemptKind::Reconnect => {
                warn!(
                    attempt = core.reconnect_attempts,
                    max = self.policy.max_attempts(),
                    error = %error,
                    "reconnect attempt failed"
                );
                let plan = self.plan_reconnect(&mut core);
                if let ReconnectPlan::Exhausted { .. } = plan {
                    self.enqueue(Dispatch::Connection(ConnectionEvent::Disconnected {
                        code: CloseCode::ABNORMAL,
                        reason: error.to_string(),
                        reconnect: plan,
                    }));
                }
            }
        }
    }

    /// Returns `false` once the link is stale and its reader should stop.
    fn on_frame(&self, generation: u64, text: &str) -> bool {
        let decoded = ChatMessage::decode(text);
        let core = self.lock();
        if !core.is_current(generation, ChannelState::Connected) {
            return false;
        }
        match decoded {
            Ok(message) => {
                trace!(kind = %message.kind, "message received");
                self.enqueue(Dispatch::Message(message));
            }
            Err(e) => {
                warn!(error = %e, frame = %preview(text), "dropping malformed frame");
            }
        }
        true
    }

    fn on_closed(self: &Arc<Self>, generation: u64, code: CloseCode, reason: String) {
        let mut core = self.lock();
        if !core.is_current(generation, ChannelState::Connected) {
            debug!(generation, code = %code, "ignoring close of superseded link");
            return;
        }
        core.state = ChannelState::Disconnected;
        core.writer = None;
        self.publish(ChannelState::Disconnected);

        let reconnect = if code.is_normal() {
            info!(code = %code, reason = %reason, "connection closed");
            ReconnectPlan::None
        } else {
            warn!(code = %code, reason = %reason, "connection lost");
            self.plan_reconnect(&mut core)
        };
        self.enqueue(Dispatch::Connection(ConnectionEvent::Disconnected {
            code,
            reason,
            reconnect,
        }));
    }

    fn plan_reconnect(self: &Arc<Self>, core: &mut Core) -> ReconnectPlan {
        if !self.policy.should_reconnect(core.reconnect_attempts) {
            warn!(
                attempts = core.reconnect_attempts,
                "reconnect attempts exhausted; staying disconnected"
            );
            return ReconnectPlan::Exhausted {
                attempts: core.reconnect_attempts,
            };
        }
        core.reconnect_attempts += 1;
        let attempt = core.reconnect_attempts;
        let delay = self.policy.next_delay(attempt).unwrap_or(Duration::ZERO);
        self.schedule_reconnect(core, delay);
        info!(
            attempt,
            max = self.policy.max_attempts(),
            delay_ms = delay.as_millis() as u64,
            "reconnect scheduled"
        );
        ReconnectPlan::Scheduled { attempt, delay }
    }

    fn schedule_reconnect(self: &Arc<Self>, core: &mut Core, delay: Duration) {
        core.cancel_scheduled();
        let generation = core.generation;
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(shared) = weak.upgrade() {
                shared.on_reconnect_due(generation);
            }
        });
        core.scheduled = Some(ScheduledReconnect { generation, task });
    }

    fn on_reconnect_due(self: &Arc<Self>, generation: u64) {
        let mut core = self.lock();
        let due = matches!(&core.scheduled, Some(s) if s.generation == generation);
        if !due {
            return;
        }
        core.scheduled = None;
        if core.state != ChannelState::Disconnected {
            debug!(state = %core.state, "scheduled reconnect skipped: channel already active");
            return;
        }
        let Some(identity) = core.identity.clone() else {
            return;
        };
        match self.config.endpoint.url(&identity) {
            Ok(url) => self.start_attempt(&mut core, url, AttemptKind::Reconnect),
            Err(e) => warn!(error = %e, "cannot build reconnect URL"),
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let core = self.core.get_mut().unwrap_or_else(PoisonError::into_inner);
        core.cancel_scheduled();
        if let Some(writer) = core.writer.take() {
            let _ = writer.close(CloseCode::NORMAL, "channel dropped");
        }
    }
}

/// Open one transport and pump its events until it closes or goes stale.
async fn run_link(
    weak: Weak<Shared>,
    connector: Arc<dyn Connector>,
    url: Url,
    generation: u64,
    timeout: Option<Duration>,
) {
    let opened = match timeout {
        Some(limit) => match tokio::time::timeout(limit, connector.open(&url)).await {
            Ok(result) => result,
            Err(_) => Err(ChannelError::ConnectTimeout {
                ms: limit.as_millis() as u64,
            }),
        },
        None => connector.open(&url).await,
    };

    let Some(shared) = weak.upgrade() else {
        if let Ok(link) = opened {
            let _ = link.writer.close(CloseCode::NORMAL, "channel dropped");
        }
        return;
    };
    let mut events = match opened {
        Ok(TransportLink { writer, events }) => {
            if !shared.on_open(generation, writer) {
                return;
            }
            events
        }
        Err(e) => {
            shared.on_open_failed(generation, e);
            return;
        }
    };
    drop(shared);

    while let Some(event) = events.next().await {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Frame(text) => {
                if !shared.on_frame(generation, &text) {
                    return;
                }
            }
            TransportEvent::Closed { code, reason } => {
                shared.on_closed(generation, code, reason);
                return;
            }
            TransportEvent::Error(e) => {
                warn!(generation, error = %e, "transport error");
                shared.on_closed(generation, CloseCode::ABNORMAL, e);
                return;
            }
        }
    }

    if let Some(shared) = weak.upgrade() {
        shared.on_closed(generation, CloseCode::ABNORMAL, "connection lost".into());
    }
}

async fn run_dispatcher(
    mut rx: mpsc::UnboundedReceiver<Dispatch>,
    messages: HandlerRegistry<ChatMessage>,
    connections: HandlerRegistry<ConnectionEvent>,
) {
    while let Some(item) = rx.recv().await {
        match item {
            Dispatch::Message(message) => {
                let report = messages.dispatch(&message);
                if report.failed > 0 {
                    debug!(failed = report.failed, delivered = report.delivered, "message dispatch had failures");
                }
            }
            Dispatch::Connection(event) => {
                debug!(event = %event, "connection event");
                connections.dispatch(&event);
            }
            Dispatch::Release {
                messages: m,
                connections: c,
            } => {
                let removed = messages.clear_before(m) + connections.clear_before(c);
                if removed > 0 {
                    debug!(removed, "handlers released on disconnect");
                }
            }
            Dispatch::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    trace!("dispatcher stopped");
}

fn preview(text: &str) -> String {
    text.chars().take(120).collect()
}
