//! Inbound events reported by a terminal's engine

use bytes::Bytes;
use std::sync::Arc;

use super::Directive;
use crate::error::ErrorCode;

/// Event produced by one terminal's connection engine
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Connection established or lost
    ConnectionChanged { connected: bool, message: String },

    /// Directive received from the platform
    Directive(Directive),

    /// Binary message received, delivered as-is
    Binary(Bytes),

    /// Transport or protocol error
    Error { code: ErrorCode, message: String },

    /// Underlying connection closed
    Closed { code: u16, reason: String },
}

/// Observer category an event is routed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connection,
    Directive,
    Binary,
    Error,
    Closed,
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::ConnectionChanged { .. } => EventKind::Connection,
            InboundEvent::Directive(_) => EventKind::Directive,
            InboundEvent::Binary(_) => EventKind::Binary,
            InboundEvent::Error { .. } => EventKind::Error,
            InboundEvent::Closed { .. } => EventKind::Closed,
        }
    }

    /// Create connection-changed event
    pub fn connection(connected: bool, message: impl Into<String>) -> Self {
        Self::ConnectionChanged {
            connected,
            message: message.into(),
        }
    }

    /// Create error event
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }

    /// Create closed event
    pub fn closed(code: u16, reason: impl Into<String>) -> Self {
        Self::Closed {
            code,
            reason: reason.into(),
        }
    }
}

/// Event tagged with the terminal that produced it
#[derive(Debug, Clone)]
pub struct RoutedEvent {
    pub terminal_id: Arc<str>,
    pub event: InboundEvent,
}

/// Item on the queue drained by the registry's dispatcher task
#[derive(Debug, Clone)]
pub enum Dispatch {
    Event(RoutedEvent),
    /// Drop a terminal's observers registered up to sequence `up_to`
    ///
    /// Queued behind the terminal's last events, so those still reach them.
    Release { terminal_id: Arc<str>, up_to: u64 },
}
