//! Multi-terminal registry
//!
//! Owns one [`ConnectionEngine`] per registered terminal, fans operations
//! out concurrently and routes engine events to observers through a single
//! dispatcher task.

use bytes::Bytes;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::TerminalConfig;
use crate::engine::{ConnectionEngine, ConnectionState, Statistics};
use crate::error::{CoreError, ErrorCode, Result};
use crate::protocol::MessageCodec;
use crate::router::{CallbackRouter, Handler};
use crate::transport::{Connector, WebSocketConnector};
use crate::types::{Directive, Dispatch, EventKind, InboundEvent, Payload, Signal};

/// How long `shutdown` waits for each engine to close cleanly
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Type tag used by [`TerminalRegistry::send_audio`] when none is given
pub const DEFAULT_AUDIO_FORMAT: &str = "opus";

struct Terminal {
    config: Arc<TerminalConfig>,
    engine: ConnectionEngine,
}

/// Registry of terminals keyed by terminal id
///
/// Must be created inside a tokio runtime (it spawns the event dispatcher).
pub struct TerminalRegistry {
    terminals: RwLock<HashMap<String, Arc<Terminal>>>,
    router: Arc<CallbackRouter>,
    connector: Arc<dyn Connector>,
    events: Mutex<Option<mpsc::UnboundedSender<Dispatch>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    last_error: Mutex<Option<String>>,
    drain_timeout: Duration,
    shut_down: AtomicBool,
}

impl TerminalRegistry {
    /// Create registry using the WebSocket transport
    pub fn new() -> Self {
        Self::with_connector(Arc::new(WebSocketConnector::new()))
    }

    /// Create registry with a custom transport
    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        let router = Arc::new(CallbackRouter::new());
        let (events, rx) = mpsc::unbounded_channel();
        let dispatcher = tokio::spawn(dispatch_events(rx, router.clone()));

        Self {
            terminals: RwLock::new(HashMap::new()),
            router,
            connector,
            events: Mutex::new(Some(events)),
            dispatcher: Mutex::new(Some(dispatcher)),
            last_error: Mutex::new(None),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn with_drain_timeout(mut self, drain_timeout: Duration) -> Self {
        self.drain_timeout = drain_timeout;
        self
    }

    /// Crate version
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// Register terminal; an existing id is never replaced
    pub async fn register(&self, terminal_id: impl Into<String>, config: TerminalConfig) -> Result<()> {
        let terminal_id = terminal_id.into();
        let events = self.record(self.event_sender())?;

        let mut terminals = self.terminals.write().await;
        if terminals.contains_key(&terminal_id) {
            return self.record(Err(CoreError::AlreadyRegistered(terminal_id)));
        }

        let config = Arc::new(config);
        let engine = ConnectionEngine::spawn(
            terminal_id.as_str(),
            config.clone(),
            self.connector.clone(),
            events,
        );
        terminals.insert(terminal_id.clone(), Arc::new(Terminal { config, engine }));

        tracing::info!("Registered terminal {}", terminal_id);
        Ok(())
    }

    /// Disconnect terminal and release its engine
    pub async fn unregister(&self, terminal_id: &str) -> Result<()> {
        self.record(self.ensure_running())?;
        let removed = self.terminals.write().await.remove(terminal_id);
        let terminal =
            self.record(removed.ok_or_else(|| CoreError::TerminalNotFound(terminal_id.to_string())))?;

        terminal.engine.shutdown(self.drain_timeout).await;

        // queued behind the engine's final events
        let up_to = self.router.sequence();
        let release = Dispatch::Release {
            terminal_id: terminal_id.into(),
            up_to,
        };
        let queued = self
            .events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|events| events.send(release).is_ok())
            .unwrap_or(false);
        if !queued {
            self.router.clear_terminal(terminal_id, up_to);
        }

        tracing::info!("Unregistered terminal {}", terminal_id);
        Ok(())
    }

    pub async fn connect(&self, terminal_id: &str, trace_id: Option<&str>) -> Result<()> {
        let terminal = self.terminal(terminal_id).await?;
        self.record(terminal.engine.connect(trace_id).await)
    }

    pub async fn disconnect(&self, terminal_id: &str) -> Result<()> {
        let terminal = self.terminal(terminal_id).await?;
        self.record(terminal.engine.disconnect().await)
    }

    /// Connect every terminal concurrently
    pub async fn connect_all(&self) -> HashMap<String, Result<()>> {
        let mut set = JoinSet::new();
        let mut ids = Vec::new();
        for (id, terminal) in self.all_terminals().await {
            ids.push(id.clone());
            set.spawn(async move {
                let result = terminal.engine.connect(None).await;
                (id, result)
            });
        }
        join_fan_out(set, ids).await.into_iter().collect()
    }

    /// Disconnect every terminal concurrently
    pub async fn disconnect_all(&self) -> HashMap<String, Result<()>> {
        let mut set = JoinSet::new();
        let mut ids = Vec::new();
        for (id, terminal) in self.all_terminals().await {
            ids.push(id.clone());
            set.spawn(async move {
                let result = terminal.engine.disconnect().await;
                (id, result)
            });
        }
        join_fan_out(set, ids).await.into_iter().collect()
    }

    /// Send pre-serialized JSON text
    pub async fn send_message(&self, terminal_id: &str, text: String) -> Result<()> {
        let terminal = self.terminal(terminal_id).await?;
        self.record(terminal.engine.send_text(text).await)
    }

    /// Send several texts concurrently; result per input index
    ///
    /// No ordering is guaranteed between the texts of one batch.
    pub async fn send_batch(&self, terminal_id: &str, payloads: Vec<String>) -> BTreeMap<usize, Result<()>> {
        let terminal = match self.terminal(terminal_id).await {
            Ok(terminal) => terminal,
            Err(e) => return fail_all(payloads.len(), &e),
        };

        let mut set = JoinSet::new();
        for (index, text) in payloads.into_iter().enumerate() {
            let terminal = terminal.clone();
            set.spawn(async move { (index, terminal.engine.send_text(text).await) });
        }
        let indices = (0..set.len()).collect();
        join_fan_out(set, indices).await.into_iter().collect()
    }

    /// Fill empty source fields, encode and send a signal
    pub async fn send_signal(&self, terminal_id: &str, signal: Signal) -> Result<()> {
        let terminal = self.terminal(terminal_id).await?;
        let text = self.record(encode_for(&terminal.config, signal))?;
        self.record(terminal.engine.send_text(text).await)
    }

    /// Send several signals concurrently; result per input index
    pub async fn send_signal_batch(&self, terminal_id: &str, signals: Vec<Signal>) -> BTreeMap<usize, Result<()>> {
        let terminal = match self.terminal(terminal_id).await {
            Ok(terminal) => terminal,
            Err(e) => return fail_all(signals.len(), &e),
        };

        let mut set = JoinSet::new();
        for (index, signal) in signals.into_iter().enumerate() {
            let terminal = terminal.clone();
            set.spawn(async move {
                let result = match encode_for(&terminal.config, signal) {
                    Ok(text) => terminal.engine.send_text(text).await,
                    Err(e) => Err(e),
                };
                (index, result)
            });
        }
        let indices = (0..set.len()).collect();
        join_fan_out(set, indices).await.into_iter().collect()
    }

    /// Send text signal with `payload.text = text` plus optional extra fields
    pub async fn send_text(
        &self,
        terminal_id: &str,
        signal_type: &str,
        text: &str,
        extra: Option<Map<String, Value>>,
    ) -> Result<()> {
        let mut signal = Signal::text(signal_type, text);
        for (key, value) in extra.unwrap_or_default() {
            signal.payload.set_value(key, value);
        }
        self.send_signal(terminal_id, signal).await
    }

    /// Send signal whose payload is `data`
    pub async fn send_json(&self, terminal_id: &str, signal_type: &str, data: Map<String, Value>) -> Result<()> {
        let signal = Signal::new(signal_type).with_payload(Payload::from(data));
        self.send_signal(terminal_id, signal).await
    }

    /// Send binary frame tagged `type_tag`
    pub async fn send_binary(&self, terminal_id: &str, data: Bytes, type_tag: &str) -> Result<()> {
        let terminal = self.terminal(terminal_id).await?;
        self.record(terminal.engine.send_binary(data, type_tag).await)
    }

    /// Send audio frame; format defaults to `opus`
    pub async fn send_audio(&self, terminal_id: &str, data: Bytes, format: Option<&str>) -> Result<()> {
        self.send_binary(terminal_id, data, format.unwrap_or(DEFAULT_AUDIO_FORMAT))
            .await
    }

    pub async fn is_connected(&self, terminal_id: &str) -> bool {
        self.terminals
            .read()
            .await
            .get(terminal_id)
            .is_some_and(|terminal| terminal.engine.is_connected())
    }

    pub async fn state(&self, terminal_id: &str) -> Result<ConnectionState> {
        Ok(self.terminal(terminal_id).await?.engine.state())
    }

    pub async fn terminal_config(&self, terminal_id: &str) -> Result<Arc<TerminalConfig>> {
        Ok(self.terminal(terminal_id).await?.config.clone())
    }

    /// Registered terminal ids, sorted
    pub async fn terminal_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.terminals.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ids of terminals with an open connection, sorted
    pub async fn connected_terminal_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .terminals
            .read()
            .await
            .iter()
            .filter(|(_, terminal)| terminal.engine.is_connected())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn statistics(&self, terminal_id: &str) -> Result<Statistics> {
        Ok(self.terminal(terminal_id).await?.engine.statistics())
    }

    pub async fn statistics_all(&self) -> HashMap<String, Statistics> {
        self.terminals
            .read()
            .await
            .iter()
            .map(|(id, terminal)| (id.clone(), terminal.engine.statistics()))
            .collect()
    }

    pub async fn reset_statistics(&self, terminal_id: &str) -> Result<()> {
        let terminal = self.terminal(terminal_id).await?;
        self.record(terminal.engine.reset_statistics().await)
    }

    /// Message of the most recent failed single-terminal operation
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear_error(&self) {
        self.last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    // Per-terminal observers

    pub async fn set_connection_callback<F>(&self, terminal_id: &str, f: F) -> Result<()>
    where
        F: Fn(bool, &str) + Send + Sync + 'static,
    {
        self.set_terminal_handler(
            terminal_id,
            EventKind::Connection,
            connection_handler(move |_, connected, message| f(connected, message)),
        )
        .await
    }

    pub async fn set_directive_callback<F>(&self, terminal_id: &str, f: F) -> Result<()>
    where
        F: Fn(&Directive) + Send + Sync + 'static,
    {
        self.set_terminal_handler(
            terminal_id,
            EventKind::Directive,
            directive_handler(move |_, directive| f(directive)),
        )
        .await
    }

    pub async fn set_binary_callback<F>(&self, terminal_id: &str, f: F) -> Result<()>
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.set_terminal_handler(
            terminal_id,
            EventKind::Binary,
            binary_handler(move |_, data| f(data)),
        )
        .await
    }

    pub async fn set_error_callback<F>(&self, terminal_id: &str, f: F) -> Result<()>
    where
        F: Fn(ErrorCode, &str) + Send + Sync + 'static,
    {
        self.set_terminal_handler(
            terminal_id,
            EventKind::Error,
            error_handler(move |_, code, message| f(code, message)),
        )
        .await
    }

    pub async fn set_close_callback<F>(&self, terminal_id: &str, f: F) -> Result<()>
    where
        F: Fn(u16, &str) + Send + Sync + 'static,
    {
        self.set_terminal_handler(
            terminal_id,
            EventKind::Closed,
            close_handler(move |_, code, reason| f(code, reason)),
        )
        .await
    }

    // Global observers: first argument is the terminal id

    pub fn set_global_connection_callback<F>(&self, f: F)
    where
        F: Fn(&str, bool, &str) + Send + Sync + 'static,
    {
        self.router.set_global(EventKind::Connection, connection_handler(f));
    }

    pub fn set_global_directive_callback<F>(&self, f: F)
    where
        F: Fn(&str, &Directive) + Send + Sync + 'static,
    {
        self.router.set_global(EventKind::Directive, directive_handler(f));
    }

    pub fn set_global_binary_callback<F>(&self, f: F)
    where
        F: Fn(&str, &Bytes) + Send + Sync + 'static,
    {
        self.router.set_global(EventKind::Binary, binary_handler(f));
    }

    pub fn set_global_error_callback<F>(&self, f: F)
    where
        F: Fn(&str, ErrorCode, &str) + Send + Sync + 'static,
    {
        self.router.set_global(EventKind::Error, error_handler(f));
    }

    pub fn set_global_close_callback<F>(&self, f: F)
    where
        F: Fn(&str, u16, &str) + Send + Sync + 'static,
    {
        self.router.set_global(EventKind::Closed, close_handler(f));
    }

    /// Disconnect and release every terminal
    ///
    /// Events already emitted are still delivered. Every later call on the
    /// registry fails with an internal error.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down terminal registry");

        let terminals: Vec<(String, Arc<Terminal>)> =
            self.terminals.write().await.drain().collect();

        let drain = self.drain_timeout;
        let mut set = JoinSet::new();
        for (_, terminal) in terminals {
            set.spawn(async move { terminal.engine.shutdown(drain).await });
        }
        while set.join_next().await.is_some() {}

        // Dispatcher exits once every sender is gone
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut dispatcher) = dispatcher {
            if tokio::time::timeout(drain, &mut dispatcher).await.is_err() {
                tracing::warn!("Event dispatcher did not drain within {:?}", drain);
                dispatcher.abort();
            }
        }

        tracing::info!("Terminal registry shut down");
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(CoreError::Internal("Registry has been shut down".to_string()));
        }
        Ok(())
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            *self
                .last_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(e.to_string());
        }
        result
    }

    fn event_sender(&self) -> Result<mpsc::UnboundedSender<Dispatch>> {
        self.ensure_running()?;
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| CoreError::Internal("Registry has been shut down".to_string()))
    }

    async fn terminal(&self, terminal_id: &str) -> Result<Arc<Terminal>> {
        self.record(self.ensure_running())?;
        let terminal = self.terminals.read().await.get(terminal_id).cloned();
        self.record(terminal.ok_or_else(|| CoreError::TerminalNotFound(terminal_id.to_string())))
    }

    async fn all_terminals(&self) -> Vec<(String, Arc<Terminal>)> {
        self.terminals
            .read()
            .await
            .iter()
            .map(|(id, terminal)| (id.clone(), terminal.clone()))
            .collect()
    }

    async fn set_terminal_handler(&self, terminal_id: &str, kind: EventKind, handler: Handler) -> Result<()> {
        self.terminal(terminal_id).await?;
        self.router.set_terminal(terminal_id, kind, handler);
        Ok(())
    }
}

impl Default for TerminalRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch_events(mut rx: mpsc::UnboundedReceiver<Dispatch>, router: Arc<CallbackRouter>) {
    while let Some(item) = rx.recv().await {
        match item {
            Dispatch::Event(routed) => {
                router.dispatch(&routed);
            }
            Dispatch::Release { terminal_id, up_to } => router.clear_terminal(&terminal_id, up_to),
        }
    }
    tracing::debug!("Event dispatcher stopped");
}

fn encode_for(config: &TerminalConfig, mut signal: Signal) -> Result<String> {
    signal.fill_source(&config.device_id, &config.device_type);
    MessageCodec::encode_signal(&signal)
}

/// Join every fan-out task; keys whose task died map to an internal error
async fn join_fan_out<K>(mut set: JoinSet<(K, Result<()>)>, keys: Vec<K>) -> Vec<(K, Result<()>)>
where
    K: PartialEq + Send + 'static,
{
    let mut done: Vec<(K, Result<()>)> = Vec::with_capacity(keys.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(entry) => done.push(entry),
            Err(e) => tracing::error!("Fan-out task failed: {}", e),
        }
    }

    for key in keys {
        if !done.iter().any(|(k, _)| *k == key) {
            done.push((key, Err(CoreError::Internal("Fan-out task failed".to_string()))));
        }
    }
    done
}

fn fail_all(count: usize, err: &CoreError) -> BTreeMap<usize, Result<()>> {
    (0..count)
        .map(|index| {
            let e = match err {
                CoreError::TerminalNotFound(id) => CoreError::TerminalNotFound(id.clone()),
                other => CoreError::Internal(other.to_string()),
            };
            (index, Err(e))
        })
        .collect()
}

fn connection_handler<F>(f: F) -> Handler
where
    F: Fn(&str, bool, &str) + Send + Sync + 'static,
{
    Arc::new(move |terminal_id: &str, event: &InboundEvent| {
        if let InboundEvent::ConnectionChanged { connected, message } = event {
            f(terminal_id, *connected, message);
        }
    })
}

fn directive_handler<F>(f: F) -> Handler
where
    F: Fn(&str, &Directive) + Send + Sync + 'static,
{
    Arc::new(move |terminal_id: &str, event: &InboundEvent| {
        if let InboundEvent::Directive(directive) = event {
            f(terminal_id, directive);
        }
    })
}

fn binary_handler<F>(f: F) -> Handler
where
    F: Fn(&str, &Bytes) + Send + Sync + 'static,
{
    Arc::new(move |terminal_id: &str, event: &InboundEvent| {
        if let InboundEvent::Binary(data) = event {
            f(terminal_id, data);
        }
    })
}

fn error_handler<F>(f: F) -> Handler
where
    F: Fn(&str, ErrorCode, &str) + Send + Sync + 'static,
{
    Arc::new(move |terminal_id: &str, event: &InboundEvent| {
        if let InboundEvent::Error { code, message } = event {
            f(terminal_id, *code, message);
        }
    })
}

fn close_handler<F>(f: F) -> Handler
where
    F: Fn(&str, u16, &str) + Send + Sync + 'static,
{
    Arc::new(move |terminal_id: &str, event: &InboundEvent| {
        if let InboundEvent::Closed { code, reason } = event {
            f(terminal_id, *code, reason);
        }
    })
}
