//! JSON codec for signals and directives

use serde_json::Value;

use crate::error::Result;
use crate::types::{Directive, Signal};

/// Keep-alive text sent when a connection has been idle
pub const HEARTBEAT_PAYLOAD: &str = r#"{"type":"ping"}"#;

/// Classified inbound text message
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Object carrying both `id` and `name`
    Directive(Directive),
    /// Any other valid JSON (pongs, acks, platform notices)
    Other(Value),
}

/// Message codec for text frames
pub struct MessageCodec;

impl MessageCodec {
    /// Encode signal to JSON text
    pub fn encode_signal(signal: &Signal) -> Result<String> {
        Ok(serde_json::to_string(signal)?)
    }

    pub fn decode_signal(text: &str) -> Result<Signal> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn encode_directive(directive: &Directive) -> Result<String> {
        Ok(serde_json::to_string(directive)?)
    }

    pub fn decode_directive(text: &str) -> Result<Directive> {
        Ok(serde_json::from_str(text)?)
    }

    /// Parse and classify an inbound text frame
    ///
    /// Directive detection is structural: any object with non-null `id` and
    /// `name` fields is a directive. Returns an error only for invalid JSON.
    pub fn decode_inbound(text: &str) -> Result<InboundMessage> {
        let value: Value = serde_json::from_str(text)?;

        if Self::is_directive(&value) {
            if let Ok(directive) = serde_json::from_value::<Directive>(value.clone()) {
                return Ok(InboundMessage::Directive(directive));
            }
        }

        Ok(InboundMessage::Other(value))
    }

    fn is_directive(value: &Value) -> bool {
        let Some(object) = value.as_object() else {
            return false;
        };
        let present = |key| object.get(key).is_some_and(|v| !v.is_null());
        present("id") && present("name")
    }
}
