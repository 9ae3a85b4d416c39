//! Transport abstraction and default implementations
//!
//! The connection engine only sees [`Connector`] and [`TransportSink`]:
//! - `websocket` provides the production WebSocket connector
//! - `mock` provides a scriptable connector for tests and demos
//! - `heartbeat` and `reconnect` hold the keep-alive and backoff logic

pub mod heartbeat;
pub mod mock;
pub mod reconnect;
pub mod websocket;

pub use heartbeat::Heartbeat;
pub use mock::{MockConnector, MockLink, OpenOutcome};
pub use reconnect::ReconnectPolicy;
pub use websocket::WebSocketConnector;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::Result;

/// Close code used when the peer vanished without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Close code for a caller-initiated disconnect
pub const CLOSE_NORMAL: u16 = 1000;

/// Event read from an open transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Text(String),
    Binary(Bytes),
    Closed { code: u16, reason: String },
    Error(String),
}

/// Write half of an open transport
#[async_trait]
pub trait TransportSink: Send {
    async fn send_text(&mut self, text: String) -> Result<()>;

    async fn send_binary(&mut self, data: Bytes) -> Result<()>;

    /// Send close frame and release the connection
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

/// Handshake result: write half plus inbound event stream
///
/// The stream ends (returns `None`) once the connection is gone.
pub struct TransportLink {
    pub sink: Box<dyn TransportSink>,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens transports for a connection engine
///
/// Implementations perform the handshake only; the engine applies the
/// connection timeout around [`Connector::open`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &Url) -> Result<TransportLink>;
}
