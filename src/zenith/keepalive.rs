//! Idle ping and subscription liveness deadlines
//!
//! The scheduler holds deadlines only; the session loop sleeps until them and
//! reports back when one fires.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct KeepaliveScheduler {
    idle_interval: Duration,
    liveness_interval: Duration,
    /// When to ping if nothing arrives; `None` while disarmed
    idle_at: Option<Instant>,
    /// Next liveness check
    liveness_at: Option<Instant>,
}

impl KeepaliveScheduler {
    pub fn new(idle_interval: Duration, liveness_interval: Duration) -> Self {
        Self {
            idle_interval,
            liveness_interval,
            idle_at: None,
            liveness_at: None,
        }
    }

    /// Start both timers for a freshly opened socket
    pub fn arm(&mut self, now: Instant) {
        self.idle_at = Some(now + self.idle_interval);
        self.liveness_at = Some(now + self.liveness_interval);
    }

    /// Socket activity in either direction pushes the idle deadline out
    pub fn touch(&mut self, now: Instant) {
        if self.idle_at.is_some() {
            self.idle_at = Some(now + self.idle_interval);
        }
    }

    pub fn idle_deadline(&self) -> Option<Instant> {
        self.idle_at
    }

    /// The liveness timer only runs while at least one subscription is registered
    pub fn liveness_deadline(&self, active_subscriptions: usize) -> Option<Instant> {
        if active_subscriptions == 0 {
            return None;
        }
        self.liveness_at
    }

    pub fn on_idle_fired(&mut self, now: Instant) {
        self.touch(now);
    }

    pub fn on_liveness_fired(&mut self, now: Instant) {
        if self.liveness_at.is_some() {
            self.liveness_at = Some(now + self.liveness_interval);
        }
    }

    pub fn cancel(&mut self) {
        self.idle_at = None;
        self.liveness_at = None;
    }

    pub fn is_armed(&self) -> bool {
        self.idle_at.is_some()
    }
}
