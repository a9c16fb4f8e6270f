//! Periodic ACK heartbeat.
//!
//! The receiver re-announces its current acknowledgement bit on a fixed
//! period whether or not data is flowing, so an ACK lost on the wire is
//! eventually repeated and the peer's retry loop can complete.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Fixed-period ACK timer
#[derive(Debug)]
pub struct Heartbeat {
    interval: Interval,
}

impl Heartbeat {
    /// Create a heartbeat whose first tick is one period from now
    pub fn new(period: Duration) -> Self {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// Wait for the next heartbeat
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
