//! WebSocket transport over tokio-tungstenite

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{Connector, TransportEvent, TransportLink, TransportSink, CLOSE_ABNORMAL};
use crate::error::{CoreError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound events buffered between the reader task and the engine
const EVENT_BUFFER: usize = 256;

/// Production connector (`ws://` and `wss://`)
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self, url: &Url) -> Result<TransportLink> {
        // Nagle off: audio frames are small and latency-sensitive
        let (ws, response) =
            tokio_tungstenite::connect_async_with_config(url.as_str(), None, true)
                .await
                .map_err(|e| CoreError::ConnectionFailed(e.to_string()))?;

        tracing::debug!("WebSocket handshake complete: HTTP {}", response.status());

        let (write, read) = ws.split();
        let (tx, events) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(read_loop(read, tx));

        Ok(TransportLink {
            sink: Box::new(WebSocketSink { write, reader }),
            events,
        })
    }
}

/// Forward frames until the socket ends or the engine drops the receiver
async fn read_loop(
    mut read: futures_util::stream::SplitStream<WsStream>,
    tx: mpsc::Sender<TransportEvent>,
) {
    while let Some(frame) = read.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => TransportEvent::Text(text.as_str().to_owned()),
            Ok(Message::Binary(data)) => TransportEvent::Binary(data),
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                    .unwrap_or((CLOSE_ABNORMAL, String::new()));
                let _ = tx.send(TransportEvent::Closed { code, reason }).await;
                return;
            }
            // tungstenite answers pings itself
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => continue,
            Err(e) => {
                let _ = tx.send(TransportEvent::Error(e.to_string())).await;
                return;
            }
        };

        if tx.send(event).await.is_err() {
            return;
        }
    }
}

struct WebSocketSink {
    write: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.write
            .send(Message::text(text))
            .await
            .map_err(|e| CoreError::SendFailed(e.to_string()))
    }

    async fn send_binary(&mut self, data: Bytes) -> Result<()> {
        self.write
            .send(Message::binary(data))
            .await
            .map_err(|e| CoreError::SendFailed(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        let result = self
            .write
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| CoreError::SendFailed(e.to_string()));
        self.reader.abort();
        result
    }
}

impl Drop for WebSocketSink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
