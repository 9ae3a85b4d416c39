//! Connection lifecycle state

use serde::Serialize;
use std::fmt;

/// Lifecycle state of one terminal connection
///
/// `Idle → Connecting → Open → Closing → Closed`, plus `Reconnecting`
/// between a dropped connection and the next retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Reconnecting,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == ConnectionState::Open
    }

    /// Connected, or working on becoming connected
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Open | ConnectionState::Reconnecting
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Open.is_open());
        assert!(ConnectionState::Reconnecting.is_active());
        assert!(!ConnectionState::Closed.is_active());
        assert!(!ConnectionState::Idle.is_open());
        assert_eq!(ConnectionState::Closing.to_string(), "closing");
    }
}
