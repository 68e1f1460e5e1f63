//! Subscription listeners and pending subscribe confirmations
//!
//! Listeners are keyed by controller and topic. A single inbound frame both
//! confirms any subscribe waiting on its key and is broadcast to every listener
//! of that key, in registration order.

use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::convert::to_topic_update;
use super::correlation::{arm_deadline, Completion, Expiry};
use super::messages::{Response, SubscribeRequest, SubscriptionKey, TopicUpdate};
use crate::common::errors::ClientError;

/// Callback invoked for each update of a subscribed topic
pub type Listener = Box<dyn Fn(&TopicUpdate) + Send + Sync>;

struct PendingSubscribe {
    transaction_id: u64,
    completion: Completion,
    deadline: JoinHandle<()>,
}

pub struct SubscriptionMultiplexer {
    /// Listeners per topic, in registration order
    listeners: HashMap<SubscriptionKey, Vec<Listener>>,
    /// Subscribes waiting for their first frame
    pending: HashMap<SubscriptionKey, Vec<PendingSubscribe>>,
    call_timeout: Duration,
    /// Where fired deadlines are reported
    expired: mpsc::UnboundedSender<Expiry>,
}

impl SubscriptionMultiplexer {
    pub fn new(call_timeout: Duration, expired: mpsc::UnboundedSender<Expiry>) -> Self {
        Self {
            listeners: HashMap::new(),
            pending: HashMap::new(),
            call_timeout,
            expired,
        }
    }

    /// Append a listener; it stays registered for the life of the client
    pub fn register(&mut self, key: SubscriptionKey, listener: Listener) {
        self.listeners.entry(key).or_default().push(listener);
    }

    /// Record a subscribe awaiting confirmation, returning the frame to send
    pub fn begin(
        &mut self,
        key: SubscriptionKey,
        transaction_id: u64,
        completion: Completion,
    ) -> SubscribeRequest {
        let deadline = arm_deadline(
            self.call_timeout,
            self.expired.clone(),
            Expiry::Subscribe {
                key: key.clone(),
                transaction_id,
            },
        );
        let request = SubscribeRequest::new(&key, transaction_id);
        self.pending.entry(key).or_default().push(PendingSubscribe {
            transaction_id,
            completion,
            deadline,
        });
        request
    }

    /// Confirm pending subscribes for the frame's key and fan it out to listeners
    ///
    /// Returns the number of listeners the update reached.
    pub fn dispatch(&mut self, response: &Response) -> usize {
        let Some(key) = response.key() else {
            return 0;
        };

        if let Some(waiting) = self.pending.remove(&key) {
            for subscribe in waiting {
                subscribe.deadline.abort();
                let outcome = if response.is_error() {
                    Err(response.clone().into_error(&key.controller, &key.topic))
                } else {
                    Ok(response.clone())
                };
                let _ = subscribe.completion.send(outcome);
            }
        }

        let Some(listeners) = self.listeners.get(&key) else {
            return 0;
        };
        let Some(update) = to_topic_update(response) else {
            return 0;
        };
        for listener in listeners {
            listener(&update);
        }
        listeners.len()
    }

    /// Reject a subscribe whose deadline fired; its listener stays registered
    pub fn expire(&mut self, key: &SubscriptionKey, transaction_id: u64) -> bool {
        self.take_pending(key, transaction_id)
            .map(|subscribe| {
                warn!("Subscribe to {} (transaction {}) timed out", key, transaction_id);
                let _ = subscribe.completion.send(Err(ClientError::Timeout {
                    controller: key.controller.clone(),
                    topic: key.topic.clone(),
                }));
            })
            .is_some()
    }

    pub fn reject(&mut self, key: &SubscriptionKey, transaction_id: u64, error: ClientError) -> bool {
        self.take_pending(key, transaction_id)
            .map(|subscribe| {
                subscribe.deadline.abort();
                let _ = subscribe.completion.send(Err(error));
            })
            .is_some()
    }

    /// Reject every subscribe awaiting confirmation; listeners are kept
    pub fn fail_pending(&mut self, error: impl Fn() -> ClientError) -> usize {
        let mut count = 0;
        for (_, waiting) in self.pending.drain() {
            for subscribe in waiting {
                subscribe.deadline.abort();
                let _ = subscribe.completion.send(Err(error()));
                count += 1;
            }
        }
        count
    }

    /// Keys with at least one listener, for resubscribing after a reconnect
    pub fn keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.listeners.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn active_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    fn take_pending(&mut self, key: &SubscriptionKey, transaction_id: u64) -> Option<PendingSubscribe> {
        let waiting = self.pending.get_mut(key)?;
        let index = waiting
            .iter()
            .position(|subscribe| subscribe.transaction_id == transaction_id)?;
        let subscribe = waiting.remove(index);
        if waiting.is_empty() {
            self.pending.remove(key);
        }
        debug!("Dropped pending subscribe {} for {}", transaction_id, key);
        Some(subscribe)
    }
}
