//! Uplink signal messages

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::Payload;

/// Process-wide counter for signal ids
static SIGNAL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Where a signal was produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SignalSource {
    pub receptor_id: String,
    pub receptor_topic: String,
    pub generated_time: String,
}

/// Uplink application message (terminal → platform)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub uuid: String,
    #[serde(rename = "type")]
    pub signal_type: String,
    pub timestamp: String,
    #[serde(default)]
    pub source: SignalSource,
    #[serde(default)]
    pub payload: Payload,
}

impl Signal {
    /// Create signal with a fresh id and the current UTC timestamp
    pub fn new(signal_type: impl Into<String>) -> Self {
        let timestamp = iso_timestamp();
        Self {
            uuid: next_signal_id(),
            signal_type: signal_type.into(),
            source: SignalSource {
                generated_time: timestamp.clone(),
                ..SignalSource::default()
            },
            timestamp,
            payload: Payload::new(),
        }
    }

    /// Create text signal (`payload.text`)
    pub fn text(signal_type: impl Into<String>, text: impl Into<String>) -> Self {
        let mut signal = Self::new(signal_type);
        signal.payload.set_string("text", text);
        signal
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Fill empty source fields from the sending terminal's identity
    pub fn fill_source(&mut self, device_id: &str, device_type: &str) {
        if self.source.receptor_id.is_empty() {
            self.source.receptor_id = device_id.to_string();
        }
        if self.source.receptor_topic.is_empty() {
            self.source.receptor_topic = device_type.to_string();
        }
        if self.source.generated_time.is_empty() {
            self.source.generated_time = self.timestamp.clone();
        }
    }
}

/// `sig_<epoch millis>_<counter>`
fn next_signal_id() -> String {
    let count = SIGNAL_COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("sig_{}_{}", chrono::Utc::now().timestamp_millis(), count)
}

/// UTC timestamp with millisecond precision, e.g. `2026-01-02T03:04:05.678Z`
pub(crate) fn iso_timestamp() -> String {
    chrono::Utc::now()
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string()
}
