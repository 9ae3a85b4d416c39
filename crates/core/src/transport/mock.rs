//! Scriptable in-memory transport for tests and demos

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use url::Url;

use super::{Connector, TransportEvent, TransportLink, TransportSink, CLOSE_ABNORMAL};
use crate::error::{CoreError, Result};

const EVENT_BUFFER: usize = 64;

/// Handshake result for one `open` call
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    /// Handshake succeeds
    Accept,
    /// Handshake fails with the given reason
    Refuse(String),
    /// Handshake never completes (exercises the connection timeout)
    Hang,
}

#[derive(Default)]
struct ConnectorState {
    script: VecDeque<OpenOutcome>,
    fallback: Option<OpenOutcome>,
    urls: Vec<Url>,
    links: Vec<MockLink>,
}

/// Mock connector
///
/// Outcomes queued with [`push_outcome`](Self::push_outcome) are consumed in
/// order; once the queue is empty every open uses the fallback outcome
/// (accept unless changed).
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    /// Create connector that accepts every handshake
    pub fn new() -> Self {
        Self::default()
    }

    /// Create connector that refuses every handshake
    pub fn refusing(reason: impl Into<String>) -> Self {
        let connector = Self::new();
        connector.set_fallback(OpenOutcome::Refuse(reason.into()));
        connector
    }

    /// Queue outcome for the next unscripted open
    pub fn push_outcome(&self, outcome: OpenOutcome) {
        self.lock().script.push_back(outcome);
    }

    /// Outcome used once the script is exhausted
    pub fn set_fallback(&self, outcome: OpenOutcome) {
        self.lock().fallback = Some(outcome);
    }

    /// Number of `open` calls so far (including refused ones)
    pub fn open_count(&self) -> usize {
        self.lock().urls.len()
    }

    pub fn opened_urls(&self) -> Vec<Url> {
        self.lock().urls.clone()
    }

    /// Link created by the n-th accepted handshake
    pub fn link(&self, index: usize) -> Option<MockLink> {
        self.lock().links.get(index).cloned()
    }

    pub fn last_link(&self) -> Option<MockLink> {
        self.lock().links.last().cloned()
    }

    fn lock(&self) -> MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self, url: &Url) -> Result<TransportLink> {
        let outcome = {
            let mut state = self.lock();
            state.urls.push(url.clone());
            match state.script.pop_front() {
                Some(outcome) => outcome,
                None => state.fallback.clone().unwrap_or(OpenOutcome::Accept),
            }
        };

        match outcome {
            OpenOutcome::Accept => {
                let (tx, events) = mpsc::channel(EVENT_BUFFER);
                let link = MockLink {
                    tx,
                    shared: Arc::new(Mutex::new(LinkState::default())),
                };
                self.lock().links.push(link.clone());
                Ok(TransportLink {
                    sink: Box::new(MockSink {
                        shared: link.shared.clone(),
                    }),
                    events,
                })
            }
            OpenOutcome::Refuse(reason) => Err(CoreError::ConnectionFailed(reason)),
            OpenOutcome::Hang => std::future::pending().await,
        }
    }
}

#[derive(Debug, Default)]
struct LinkState {
    texts: Vec<String>,
    binaries: Vec<Bytes>,
    fail_sends: bool,
    close_frame: Option<(u16, String)>,
}

/// Test-side handle of one accepted mock connection
#[derive(Clone)]
pub struct MockLink {
    tx: mpsc::Sender<TransportEvent>,
    shared: Arc<Mutex<LinkState>>,
}

impl MockLink {
    /// Deliver event to the engine; false once the engine released the link
    pub fn inject(&self, event: TransportEvent) -> bool {
        self.tx.try_send(event).is_ok()
    }

    pub fn inject_text(&self, text: impl Into<String>) -> bool {
        self.inject(TransportEvent::Text(text.into()))
    }

    pub fn inject_binary(&self, data: impl Into<Bytes>) -> bool {
        self.inject(TransportEvent::Binary(data.into()))
    }

    /// Simulate the peer vanishing
    pub fn drop_connection(&self) -> bool {
        self.inject(TransportEvent::Closed {
            code: CLOSE_ABNORMAL,
            reason: "Connection reset".to_string(),
        })
    }

    /// Make every following send fail
    pub fn set_fail_sends(&self, fail: bool) {
        self.lock().fail_sends = fail;
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.lock().texts.clone()
    }

    pub fn sent_binaries(&self) -> Vec<Bytes> {
        self.lock().binaries.clone()
    }

    /// Close code and reason sent by the engine, if any
    pub fn close_frame(&self) -> Option<(u16, String)> {
        self.lock().close_frame.clone()
    }

    /// Whether the engine still holds the receiving end
    pub fn is_attached(&self) -> bool {
        !self.tx.is_closed()
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

struct MockSink {
    shared: Arc<Mutex<LinkState>>,
}

impl MockSink {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        let mut state = self.lock();
        if state.fail_sends || state.close_frame.is_some() {
            return Err(CoreError::SendFailed("Mock link is down".to_string()));
        }
        state.texts.push(text);
        Ok(())
    }

    async fn send_binary(&mut self, data: Bytes) -> Result<()> {
        let mut state = self.lock();
        if state.fail_sends || state.close_frame.is_some() {
            return Err(CoreError::SendFailed("Mock link is down".to_string()));
        }
        state.binaries.push(data);
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        self.lock().close_frame = Some((code, reason.to_string()));
        Ok(())
    }
}
