//! Idle-based heartbeat for open connections
//!
//! The engine polls [`Heartbeat::tick`] inside its select loop and sends a
//! ping only when nothing was sent or received for a full interval.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Heartbeat state for one open connection
pub struct Heartbeat {
    interval: Duration,
    last_activity: Instant,
    ticker: Interval,
}

impl Heartbeat {
    /// Start heartbeat; first tick fires one interval from now
    ///
    /// Returns `None` for a zero interval (heartbeat disabled).
    pub fn start(interval: Duration) -> Option<Self> {
        if interval.is_zero() {
            return None;
        }

        let now = Instant::now();
        let mut ticker = interval_at(now + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Some(Self {
            interval,
            last_activity: now,
            ticker,
        })
    }

    /// Record send or receive activity
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Time since last activity
    pub fn idle(&self) -> Duration {
        self.last_activity.elapsed()
    }

    /// Whether a ping is due
    pub fn is_idle(&self) -> bool {
        self.idle() >= self.interval
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for next heartbeat tick
    pub async fn tick(&mut self) {
        self.ticker.tick().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_interval_disables_heartbeat() {
        assert!(Heartbeat::start(Duration::ZERO).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_interval() {
        let mut heartbeat = Heartbeat::start(Duration::from_secs(5)).unwrap();
        let started = Instant::now();

        heartbeat.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert!(heartbeat.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_idle() {
        let mut heartbeat = Heartbeat::start(Duration::from_secs(5)).unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        heartbeat.record_activity();
        assert_eq!(heartbeat.idle(), Duration::ZERO);

        heartbeat.tick().await;
        assert!(!heartbeat.is_idle());
        assert_eq!(heartbeat.idle(), Duration::from_secs(2));
    }
}
