//! Domain types for signals, directives and terminal events

mod directive;
mod event;
mod payload;
mod signal;

pub use directive::Directive;
pub use event::{Dispatch, EventKind, InboundEvent, RoutedEvent};
pub use payload::Payload;
pub use signal::{Signal, SignalSource};
