//! Per-terminal connection engine
//!
//! Each engine is a single tokio task that owns the transport, the heartbeat,
//! the reconnect timer and all state transitions. Callers hold a cheap
//! [`ConnectionEngine`] handle and talk to the task over a command channel;
//! inbound events leave through an unbounded channel to the registry's
//! dispatcher, so no observer code ever runs inside the engine task.

mod state;
mod stats;

pub use state::ConnectionState;
pub use stats::{Statistics, StatsCounters};

use bytes::Bytes;
use std::future::{self, Future};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;
use tokio::time::{sleep_until, timeout, Instant};

use crate::config::TerminalConfig;
use crate::error::{CoreError, ErrorCode, Result};
use crate::protocol::{FrameCodec, InboundMessage, MessageCodec, HEARTBEAT_PAYLOAD};
use crate::transport::{
    Connector, Heartbeat, ReconnectPolicy, TransportEvent, TransportLink, TransportSink,
    CLOSE_ABNORMAL, CLOSE_NORMAL,
};
use crate::types::{Dispatch, InboundEvent, RoutedEvent};

/// Pending commands per engine before callers wait
const COMMAND_BUFFER: usize = 64;

type Handshake = Pin<Box<dyn Future<Output = Result<TransportLink>> + Send>>;

/// Handshake in flight, polled by the engine loop so commands stay serviced
struct PendingOpen {
    handshake: Handshake,
    /// Present for an explicit connect; reconnect attempts have no caller
    reply: Option<oneshot::Sender<Result<()>>>,
}

enum Command {
    Connect {
        trace_id: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    SendText {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    SendBinary {
        data: Bytes,
        type_tag: String,
        reply: oneshot::Sender<Result<()>>,
    },
    ResetStatistics {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to one terminal's connection engine
pub struct ConnectionEngine {
    terminal_id: Arc<str>,
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<StatsCounters>,
    task: AbortHandle,
}

impl ConnectionEngine {
    /// Spawn engine task for one terminal
    ///
    /// Inbound events are tagged with `terminal_id` and pushed into `events`.
    pub fn spawn(
        terminal_id: impl Into<Arc<str>>,
        config: Arc<TerminalConfig>,
        connector: Arc<dyn Connector>,
        events: mpsc::UnboundedSender<Dispatch>,
    ) -> Self {
        let terminal_id = terminal_id.into();
        let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (state_tx, state) = watch::channel(ConnectionState::Idle);
        let stats = Arc::new(StatsCounters::new());

        let task = EngineTask {
            terminal_id: terminal_id.clone(),
            policy: ReconnectPolicy::from_config(&config),
            config,
            connector,
            events,
            state: state_tx,
            stats: stats.clone(),
            sink: None,
            pending: None,
            inbound: None,
            heartbeat: None,
            reconnect_at: None,
            reconnect_enabled: false,
            attempts: 0,
        };
        let handle = tokio::spawn(task.run(command_rx));

        Self {
            terminal_id,
            commands,
            state,
            stats,
            task: handle.abort_handle(),
        }
    }

    pub fn terminal_id(&self) -> &str {
        &self.terminal_id
    }

    /// Connect and enable auto-reconnect
    ///
    /// A failed explicit connect is reported to the caller and never retried.
    pub async fn connect(&self, trace_id: Option<&str>) -> Result<()> {
        let trace_id = trace_id.map(str::to_owned);
        self.request(|reply| Command::Connect { trace_id, reply })
            .await?
    }

    /// Disconnect and disable auto-reconnect; always succeeds
    pub async fn disconnect(&self) -> Result<()> {
        self.request(|reply| Command::Disconnect { reply }).await
    }

    /// Send pre-serialized JSON text
    pub async fn send_text(&self, text: String) -> Result<()> {
        self.request(|reply| Command::SendText { text, reply })
            .await?
    }

    /// Wrap `data` in a binary frame tagged `type_tag` and send it
    pub async fn send_binary(&self, data: Bytes, type_tag: &str) -> Result<()> {
        let type_tag = type_tag.to_owned();
        self.request(|reply| Command::SendBinary {
            data,
            type_tag,
            reply,
        })
        .await?
    }

    pub async fn reset_statistics(&self) -> Result<()> {
        self.request(|reply| Command::ResetStatistics { reply }).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Subscribe to state transitions
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn statistics(&self) -> Statistics {
        self.stats.snapshot()
    }

    /// Disconnect and stop the engine task
    ///
    /// Waits up to `drain` for a clean close, then aborts the task.
    pub async fn shutdown(&self, drain: Duration) {
        let graceful = self.request(|reply| Command::Shutdown { reply });
        match timeout(drain, graceful).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                // task already gone
            }
            Err(_) => {
                tracing::warn!(
                    "Terminal {} did not stop within {:?}, aborting",
                    self.terminal_id,
                    drain
                );
                self.task.abort();
            }
        }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> CoreError {
        CoreError::Internal(format!("Engine for terminal {} has stopped", self.terminal_id))
    }
}

/// What woke the engine loop
enum Wake {
    Command(Command),
    Transport(Option<TransportEvent>),
    Opened(Result<TransportLink>),
    Heartbeat,
    Reconnect,
    Stop,
}

struct EngineTask {
    terminal_id: Arc<str>,
    config: Arc<TerminalConfig>,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<Dispatch>,
    state: watch::Sender<ConnectionState>,
    stats: Arc<StatsCounters>,
    sink: Option<Box<dyn TransportSink>>,
    pending: Option<PendingOpen>,
    inbound: Option<mpsc::Receiver<TransportEvent>>,
    heartbeat: Option<Heartbeat>,
    reconnect_at: Option<Instant>,
    reconnect_enabled: bool,
    attempts: u32,
}

impl EngineTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        tracing::debug!("Engine for terminal {} started", self.terminal_id);

        loop {
            let wake = tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => Wake::Command(cmd),
                    None => Wake::Stop,
                },
                event = next_event(&mut self.inbound) => Wake::Transport(event),
                result = next_handshake(&mut self.pending) => Wake::Opened(result),
                _ = next_heartbeat(&mut self.heartbeat) => Wake::Heartbeat,
                _ = reconnect_due(self.reconnect_at) => Wake::Reconnect,
            };

            match wake {
                Wake::Command(Command::Connect { trace_id, reply }) => {
                    self.connect(trace_id.as_deref(), reply)
                }
                Wake::Command(Command::Disconnect { reply }) => {
                    self.disconnect().await;
                    let _ = reply.send(());
                }
                Wake::Command(Command::SendText { text, reply }) => {
                    let _ = reply.send(self.send_text(text).await);
                }
                Wake::Command(Command::SendBinary {
                    data,
                    type_tag,
                    reply,
                }) => {
                    let _ = reply.send(self.send_binary(&data, &type_tag).await);
                }
                Wake::Command(Command::ResetStatistics { reply }) => {
                    self.stats.reset();
                    let _ = reply.send(());
                }
                Wake::Command(Command::Shutdown { reply }) => {
                    self.disconnect().await;
                    let _ = reply.send(());
                    break;
                }
                Wake::Transport(Some(event)) => self.on_transport_event(event),
                Wake::Transport(None) => {
                    self.on_connection_lost(CLOSE_ABNORMAL, "Abnormal closure".to_string())
                }
                Wake::Opened(result) => self.on_handshake(result),
                Wake::Heartbeat => self.on_heartbeat().await,
                Wake::Reconnect => self.on_reconnect_due(),
                Wake::Stop => {
                    self.disconnect().await;
                    break;
                }
            }
        }

        tracing::debug!("Engine for terminal {} stopped", self.terminal_id);
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!("Terminal {}: {} -> {}", self.terminal_id, current, state);
            *current = state;
            true
        });
    }

    fn emit(&self, event: InboundEvent) {
        // receiver gone means the registry is shutting down
        let _ = self.events.send(Dispatch::Event(RoutedEvent {
            terminal_id: self.terminal_id.clone(),
            event,
        }));
    }

    fn record_activity(&mut self) {
        if let Some(heartbeat) = self.heartbeat.as_mut() {
            heartbeat.record_activity();
        }
    }

    fn connect(&mut self, trace_id: Option<&str>, reply: oneshot::Sender<Result<()>>) {
        if self.current_state().is_open() {
            let _ = reply.send(Err(CoreError::AlreadyConnected));
            return;
        }

        self.cancel_pending("Superseded by a newer connect");
        self.reconnect_enabled = true;
        self.reconnect_at = None;
        self.start_open(trace_id, Some(reply));
    }

    /// Begin one handshake attempt; the outcome arrives as `Wake::Opened`
    fn start_open(&mut self, trace_id: Option<&str>, reply: Option<oneshot::Sender<Result<()>>>) {
        self.set_state(ConnectionState::Connecting);

        let url = match self.config.websocket_url(trace_id) {
            Ok(url) => url,
            Err(e) => {
                self.connection_failed(e.to_string());
                self.open_failed(reply, e);
                return;
            }
        };

        tracing::info!(
            "Terminal {} connecting to {}",
            self.terminal_id,
            self.config.endpoint
        );

        let connector = self.connector.clone();
        let limit = self.config.connection_timeout();
        let limit_ms = self.config.connection_timeout_ms;
        let handshake: Handshake = Box::pin(async move {
            match timeout(limit, connector.open(&url)).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::ConnectionTimeout(limit_ms)),
            }
        });
        self.pending = Some(PendingOpen { handshake, reply });
    }

    fn on_handshake(&mut self, result: Result<TransportLink>) {
        let reply = self.pending.take().and_then(|pending| pending.reply);

        match result {
            Ok(link) => {
                self.on_open(link);
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
            }
            Err(CoreError::ConnectionTimeout(limit_ms)) => {
                tracing::error!(
                    "Terminal {} connection timed out after {}ms",
                    self.terminal_id,
                    limit_ms
                );
                self.stats.error();
                self.emit(InboundEvent::error(
                    ErrorCode::ConnectionTimeout,
                    "Connection timeout",
                ));
                self.emit(InboundEvent::connection(false, "Connection timeout"));
                self.open_failed(reply, CoreError::ConnectionTimeout(limit_ms));
            }
            Err(e) => {
                let reason = match e {
                    CoreError::ConnectionFailed(reason) => reason,
                    other => other.to_string(),
                };
                self.connection_failed(reason.clone());
                self.open_failed(reply, CoreError::ConnectionFailed(reason));
            }
        }
    }

    /// Explicit connects report to the caller; reconnect attempts retry
    fn open_failed(&mut self, reply: Option<oneshot::Sender<Result<()>>>, err: CoreError) {
        self.set_state(ConnectionState::Closed);
        match reply {
            Some(reply) => {
                let _ = reply.send(Err(err));
            }
            None => self.schedule_reconnect(),
        }
    }

    /// Drop the in-flight handshake, failing its caller if any
    fn cancel_pending(&mut self, reason: &str) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        tracing::debug!("Terminal {} handshake cancelled: {}", self.terminal_id, reason);
        if let Some(reply) = pending.reply {
            let _ = reply.send(Err(CoreError::ConnectionFailed(reason.to_string())));
        }
    }

    fn connection_failed(&self, reason: String) {
        tracing::error!("Terminal {} connection failed: {}", self.terminal_id, reason);
        self.stats.error();
        self.emit(InboundEvent::error(ErrorCode::ConnectionFailed, reason.clone()));
        self.emit(InboundEvent::connection(false, reason));
    }

    fn on_open(&mut self, link: TransportLink) {
        self.sink = Some(link.sink);
        self.inbound = Some(link.events);
        self.heartbeat = Heartbeat::start(self.config.heartbeat_interval());
        self.attempts = 0;

        self.stats.set_reconnect_attempts(0);
        self.stats.mark_connected();
        self.set_state(ConnectionState::Open);

        tracing::info!("Terminal {} connected", self.terminal_id);
        self.emit(InboundEvent::connection(true, ""));
    }

    async fn disconnect(&mut self) {
        self.cancel_pending("Disconnected before the connection opened");
        self.reconnect_enabled = false;
        self.reconnect_at = None;
        self.heartbeat = None;
        self.inbound = None;

        let was_active = self.current_state().is_active();

        if let Some(mut sink) = self.sink.take() {
            self.set_state(ConnectionState::Closing);
            let close = sink.close(CLOSE_NORMAL, "Normal disconnection");
            match timeout(self.config.connection_timeout(), close).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::debug!("Terminal {} close frame failed: {}", self.terminal_id, e)
                }
                Err(_) => tracing::debug!("Terminal {} close frame timed out", self.terminal_id),
            }
        }

        self.stats.mark_disconnected();
        self.set_state(ConnectionState::Closed);

        if was_active {
            tracing::info!("Terminal {} disconnected", self.terminal_id);
            self.emit(InboundEvent::closed(CLOSE_NORMAL, "Normal disconnection"));
            self.emit(InboundEvent::connection(false, "User disconnected"));
        }
    }

    async fn send_text(&mut self, text: String) -> Result<()> {
        let max = self.config.max_message_size;
        let Some(sink) = self.open_sink() else {
            return Err(CoreError::NotConnected);
        };

        if text.len() > max {
            return Err(CoreError::PayloadTooLarge {
                size: text.len(),
                max,
            });
        }

        let result = sink.send_text(text).await;
        match result {
            Ok(()) => {
                self.record_activity();
                self.stats.signal_sent();
                Ok(())
            }
            Err(e) => Err(self.send_failed(e)),
        }
    }

    async fn send_binary(&mut self, data: &[u8], type_tag: &str) -> Result<()> {
        if self.open_sink().is_none() {
            return Err(CoreError::NotConnected);
        }

        let frame = match FrameCodec::encode(data, type_tag) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Terminal {} binary frame rejected: {}", self.terminal_id, e);
                self.stats.error();
                self.emit(InboundEvent::error(e.code(), e.to_string()));
                return Err(e);
            }
        };
        let Some(sink) = self.sink.as_mut() else {
            return Err(CoreError::NotConnected);
        };
        let result = sink.send_binary(frame).await;
        match result {
            Ok(()) => {
                self.record_activity();
                self.stats.binary_sent();
                Ok(())
            }
            Err(e) => Err(self.send_failed(e)),
        }
    }

    fn open_sink(&mut self) -> Option<&mut Box<dyn TransportSink>> {
        if !self.state.borrow().is_open() {
            return None;
        }
        self.sink.as_mut()
    }

    fn send_failed(&self, e: CoreError) -> CoreError {
        let reason = match e {
            CoreError::SendFailed(reason) => reason,
            other => other.to_string(),
        };
        tracing::error!("Terminal {} send failed: {}", self.terminal_id, reason);
        self.stats.error();
        self.emit(InboundEvent::error(ErrorCode::SendFailed, reason.clone()));
        CoreError::SendFailed(reason)
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Text(text) => self.on_text(&text),
            TransportEvent::Binary(data) => {
                self.record_activity();
                self.stats.binary_received();
                self.emit(InboundEvent::Binary(data));
            }
            TransportEvent::Closed { code, reason } => self.on_connection_lost(code, reason),
            TransportEvent::Error(message) => {
                tracing::error!("Terminal {} transport error: {}", self.terminal_id, message);
                self.stats.error();
                self.emit(InboundEvent::error(ErrorCode::ConnectionFailed, message.clone()));
                self.on_connection_lost(CLOSE_ABNORMAL, message);
            }
        }
    }

    fn on_text(&mut self, text: &str) {
        self.record_activity();

        match MessageCodec::decode_inbound(text) {
            Ok(InboundMessage::Directive(directive)) => {
                self.stats.directive_received();
                if self.config.enable_directive_receiving {
                    tracing::debug!(
                        "Terminal {} received directive {} ({})",
                        self.terminal_id,
                        directive.name,
                        directive.id
                    );
                    self.emit(InboundEvent::Directive(directive));
                }
            }
            Ok(InboundMessage::Other(value)) => {
                tracing::debug!("Terminal {} received message: {}", self.terminal_id, value);
            }
            Err(_) => {
                tracing::warn!("Terminal {} invalid JSON message: {}", self.terminal_id, text);
                self.stats.error();
                self.emit(InboundEvent::error(
                    ErrorCode::InternalError,
                    "Invalid JSON message",
                ));
            }
        }
    }

    async fn on_heartbeat(&mut self) {
        let idle = match self.heartbeat.as_ref() {
            Some(heartbeat) => heartbeat.is_idle(),
            None => return,
        };
        if !idle {
            return;
        }

        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        let result = sink.send_text(HEARTBEAT_PAYLOAD.to_string()).await;
        match result {
            Ok(()) => {
                self.record_activity();
                tracing::debug!("Terminal {} heartbeat sent", self.terminal_id);
            }
            Err(e) => {
                tracing::error!("Terminal {} heartbeat failed: {}", self.terminal_id, e);
                self.on_connection_lost(CLOSE_ABNORMAL, "Heartbeat failed".to_string());
            }
        }
    }

    fn on_connection_lost(&mut self, code: u16, reason: String) {
        self.sink = None;
        self.inbound = None;
        self.heartbeat = None;
        self.stats.mark_disconnected();
        self.set_state(ConnectionState::Closed);

        tracing::warn!(
            "Terminal {} connection lost: {} {}",
            self.terminal_id,
            code,
            reason
        );
        self.emit(InboundEvent::closed(code, reason));
        self.emit(InboundEvent::connection(false, "Connection lost"));

        if self.reconnect_enabled {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        if !self.policy.should_retry(self.attempts) {
            tracing::error!(
                "Terminal {} max reconnect attempts ({}) reached",
                self.terminal_id,
                self.attempts
            );
            self.reconnect_at = None;
            self.set_state(ConnectionState::Closed);
            self.emit(InboundEvent::error(
                ErrorCode::ConnectionFailed,
                "Max reconnect attempts reached",
            ));
            return;
        }

        let delay = self.policy.delay(self.attempts);
        tracing::info!(
            "Terminal {} reconnecting in {:?} (attempt {})",
            self.terminal_id,
            delay,
            self.attempts + 1
        );
        self.reconnect_at = Some(Instant::now() + delay);
        self.set_state(ConnectionState::Reconnecting);
    }

    fn on_reconnect_due(&mut self) {
        self.reconnect_at = None;
        if !self.reconnect_enabled || self.current_state().is_open() || self.pending.is_some() {
            return;
        }

        self.attempts += 1;
        self.stats.set_reconnect_attempts(self.attempts);
        self.start_open(None, None);
    }
}

async fn next_event(inbound: &mut Option<mpsc::Receiver<TransportEvent>>) -> Option<TransportEvent> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => future::pending().await,
    }
}

async fn next_handshake(pending: &mut Option<PendingOpen>) -> Result<TransportLink> {
    match pending {
        Some(pending) => pending.handshake.as_mut().await,
        None => future::pending().await,
    }
}

async fn next_heartbeat(heartbeat: &mut Option<Heartbeat>) {
    match heartbeat {
        Some(heartbeat) => heartbeat.tick().await,
        None => future::pending().await,
    }
}

async fn reconnect_due(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at).await,
        None => future::pending().await,
    }
}

#[cfg(test)]
mod tests;
