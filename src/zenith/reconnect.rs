//! Reconnection strategies

use std::sync::Arc;
use std::time::Duration;

use crate::common::traits::ReconnectStrategy;
use crate::config::types::SessionSettings;

/// Leave the session closed after an unexpected disconnect
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReconnect;

impl ReconnectStrategy for NoReconnect {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }

    fn resubscribe(&self) -> bool {
        false
    }
}

/// Reopen the socket after a fixed delay and resend every subscription
#[derive(Debug, Clone, Copy)]
pub struct ReconnectAndResubscribe {
    pub delay: Duration,
    /// 0 retries forever
    pub max_attempts: u32,
}

impl ReconnectStrategy for ReconnectAndResubscribe {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if self.max_attempts > 0 && attempt > self.max_attempts {
            return None;
        }
        Some(self.delay)
    }
}

/// Pick the strategy the settings ask for
pub fn from_settings(settings: &SessionSettings) -> Arc<dyn ReconnectStrategy> {
    if settings.auto_reconnect {
        Arc::new(ReconnectAndResubscribe {
            delay: settings.reconnect_delay(),
            max_attempts: settings.max_reconnect_attempts,
        })
    } else {
        Arc::new(NoReconnect)
    }
}
