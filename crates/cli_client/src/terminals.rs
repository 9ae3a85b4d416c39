//! Terminal list loaded from a JSON file
//!
//! Format: an array of terminal configs, each with an extra `id` field.
//!
//! ```json
//! [{"id": "kitchen", "deviceId": "dev-1", "deviceType": "speaker",
//!   "endpoint": "wss://platform.example.com/signals", "tenantId": "t",
//!   "productId": "p", "productKey": "k", "heartbeatIntervalMs": 10000}]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use streamind_core::TerminalConfig;

/// One terminal from the file
#[derive(Debug, Deserialize)]
pub struct TerminalEntry {
    pub id: String,
    #[serde(flatten)]
    pub config: TerminalConfig,
}

pub fn load(path: &Path) -> Result<Vec<TerminalEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse(&raw).with_context(|| format!("Invalid terminal file {}", path.display()))
}

pub fn parse(raw: &str) -> Result<Vec<TerminalEntry>> {
    let entries: Vec<TerminalEntry> = serde_json::from_str(raw)?;
    if entries.is_empty() {
        bail!("no terminals defined");
    }

    let mut seen = HashSet::new();
    for entry in &entries {
        if !seen.insert(entry.id.as_str()) {
            bail!("duplicate terminal id {}", entry.id);
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO: &str = r#"[
        {"id": "a", "deviceId": "dev-a", "deviceType": "speaker",
         "endpoint": "wss://x/ws", "tenantId": "t", "productId": "p", "productKey": "k",
         "maxReconnectAttempts": 3},
        {"id": "b", "deviceId": "dev-b", "deviceType": "mic",
         "endpoint": "wss://x/ws", "tenantId": "t", "productId": "p", "productKey": "k"}
    ]"#;

    #[test]
    fn test_parse_entries_with_defaults() {
        let entries = parse(TWO).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "a");
        assert_eq!(entries[0].config.max_reconnect_attempts, 3);
        assert_eq!(entries[1].config.device_type, "mic");
        assert_eq!(entries[1].config.max_reconnect_attempts, -1);
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        assert!(parse("[]").is_err());

        let dup = TWO.replace(r#""id": "b""#, r#""id": "a""#);
        let err = parse(&dup).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }
}
