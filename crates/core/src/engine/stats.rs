//! Per-terminal statistics

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use tokio::time::Instant;

/// Live counters, written by the owning engine and read from anywhere
#[derive(Debug)]
pub struct StatsCounters {
    signals_sent: AtomicU64,
    binary_sent: AtomicU64,
    directives_received: AtomicU64,
    binary_received: AtomicU64,
    errors: AtomicU64,
    reconnect_attempts: AtomicU32,
    connected: AtomicBool,
    /// Millis since `origin` when the current connection opened, plus one
    connected_at: AtomicU64,
    origin: Instant,
}

impl Default for StatsCounters {
    fn default() -> Self {
        Self {
            signals_sent: AtomicU64::new(0),
            binary_sent: AtomicU64::new(0),
            directives_received: AtomicU64::new(0),
            binary_received: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            reconnect_attempts: AtomicU32::new(0),
            connected: AtomicBool::new(false),
            connected_at: AtomicU64::new(0),
            origin: Instant::now(),
        }
    }
}

impl StatsCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn signal_sent(&self) {
        self.signals_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn binary_sent(&self) {
        self.binary_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn directive_received(&self) {
        self.directives_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn binary_received(&self) {
        self.binary_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_reconnect_attempts(&self, attempts: u32) {
        self.reconnect_attempts.store(attempts, Ordering::Relaxed);
    }

    pub(crate) fn mark_connected(&self) {
        let since = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX - 1);
        self.connected_at.store(since + 1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Release);
    }

    pub(crate) fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
        self.connected_at.store(0, Ordering::Relaxed);
    }

    /// Zero the traffic and error counters
    ///
    /// Connection flag, uptime and the current reconnect attempt count
    /// describe live state and are left alone.
    pub(crate) fn reset(&self) {
        self.signals_sent.store(0, Ordering::Relaxed);
        self.binary_sent.store(0, Ordering::Relaxed);
        self.directives_received.store(0, Ordering::Relaxed);
        self.binary_received.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> Statistics {
        let connected = self.connected.load(Ordering::Acquire);
        let connected_at = self.connected_at.load(Ordering::Relaxed);

        let uptime_secs = if connected && connected_at > 0 {
            let now = self.origin.elapsed().as_millis() as f64;
            ((now - (connected_at - 1) as f64) / 1000.0).max(0.0)
        } else {
            0.0
        };

        Statistics {
            signals_sent: self.signals_sent.load(Ordering::Relaxed),
            binary_sent: self.binary_sent.load(Ordering::Relaxed),
            directives_received: self.directives_received.load(Ordering::Relaxed),
            binary_received: self.binary_received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            connected,
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            uptime_secs,
        }
    }
}

/// Statistics snapshot for one terminal
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub signals_sent: u64,
    pub binary_sent: u64,
    pub directives_received: u64,
    pub binary_received: u64,
    pub errors: u64,
    pub connected: bool,
    /// Retries in the current outage; reset once a connection opens
    pub reconnect_attempts: u32,
    pub uptime_secs: f64,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "signals_sent={} binary_sent={} directives_received={} binary_received={} \
             errors={} connected={} uptime={:.1}s reconnect_attempts={}",
            self.signals_sent,
            self.binary_sent,
            self.directives_received,
            self.binary_received,
            self.errors,
            self.connected,
            self.uptime_secs,
            self.reconnect_attempts
        )
    }
}
