//! StreamInd Core - Terminal transport for the StreamInd platform
//!
//! This crate provides:
//! - Domain types (signals, directives, payloads, events)
//! - Protocol handling (JSON messages, 14-byte binary audio frames)
//! - Transport abstraction with WebSocket and mock implementations
//! - Per-terminal connection engine (heartbeat, backoff reconnect, statistics)
//! - Multi-terminal registry with callback routing
//! - Error types

pub mod config;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod router;
pub mod transport;
pub mod types;

// Re-export common types
pub use config::TerminalConfig;
pub use engine::{ConnectionEngine, ConnectionState, Statistics};
pub use error::{CoreError, ErrorCode, Result};
pub use protocol::{Frame, FrameCodec, MessageCodec};
pub use registry::TerminalRegistry;
pub use router::CallbackRouter;
pub use transport::{Connector, MockConnector, WebSocketConnector};
pub use types::{Directive, EventKind, InboundEvent, Payload, Signal, SignalSource};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_defined() {
        assert!(!TerminalRegistry::version().is_empty());
    }
}
