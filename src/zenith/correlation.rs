//! Transaction IDs, pending calls and their deadlines

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::messages::{CallRequest, Response, SubscriptionKey};
use crate::common::errors::{ClientError, Result};

/// Where a request's response is delivered
pub type Completion = oneshot::Sender<Result<Response>>;

/// A deadline that fired, reported back to the session loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expiry {
    Call(u64),
    Subscribe {
        key: SubscriptionKey,
        transaction_id: u64,
    },
}

/// Spawn a one-shot timer that reports `expiry` unless aborted first
pub fn arm_deadline(
    timeout: Duration,
    expired: mpsc::UnboundedSender<Expiry>,
    expiry: Expiry,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        let _ = expired.send(expiry);
    })
}

struct PendingCall {
    controller: String,
    topic: String,
    completion: Completion,
    deadline: JoinHandle<()>,
}

/// Issues transaction IDs and matches responses to outstanding calls
///
/// IDs start at 1 and are shared with subscribe requests, so every outbound
/// frame of a session carries a distinct ID.
pub struct CorrelationEngine {
    /// Last ID handed out; the first call gets 1
    last_transaction_id: u64,
    /// Calls awaiting a response, by transaction ID
    pending: HashMap<u64, PendingCall>,
    call_timeout: Duration,
    /// Where fired deadlines are reported
    expired: mpsc::UnboundedSender<Expiry>,
}

impl CorrelationEngine {
    pub fn new(call_timeout: Duration, expired: mpsc::UnboundedSender<Expiry>) -> Self {
        Self {
            last_transaction_id: 0,
            pending: HashMap::new(),
            call_timeout,
            expired,
        }
    }

    pub fn next_transaction_id(&mut self) -> u64 {
        self.last_transaction_id += 1;
        self.last_transaction_id
    }

    /// Record a call and arm its deadline, returning the frame to send
    pub fn begin(
        &mut self,
        controller: String,
        topic: String,
        data: Value,
        completion: Completion,
    ) -> CallRequest {
        let transaction_id = self.next_transaction_id();
        let deadline = arm_deadline(
            self.call_timeout,
            self.expired.clone(),
            Expiry::Call(transaction_id),
        );

        let request = CallRequest {
            controller: controller.clone(),
            topic: topic.clone(),
            data,
            confirm: false,
            transaction_id,
        };

        self.pending.insert(
            transaction_id,
            PendingCall {
                controller,
                topic,
                completion,
                deadline,
            },
        );
        request
    }

    /// Complete the call a response answers; false if nothing was waiting for it
    pub fn resolve(&mut self, response: &Response) -> bool {
        let Some(transaction_id) = response.transaction_id else {
            return false;
        };
        let Some(call) = self.pending.remove(&transaction_id) else {
            debug!("No pending call for transaction {}", transaction_id);
            return false;
        };

        call.deadline.abort();
        let outcome = if response.is_error() {
            Err(response.clone().into_error(&call.controller, &call.topic))
        } else {
            Ok(response.clone())
        };
        let _ = call.completion.send(outcome);
        true
    }

    /// Reject a call whose deadline fired; a late response is then dropped
    pub fn expire(&mut self, transaction_id: u64) -> bool {
        let Some(call) = self.pending.remove(&transaction_id) else {
            return false;
        };
        warn!(
            "Call {}/{} (transaction {}) timed out",
            call.controller, call.topic, transaction_id
        );
        let error = ClientError::Timeout {
            controller: call.controller,
            topic: call.topic,
        };
        let _ = call.completion.send(Err(error));
        true
    }

    /// Reject one call with the given error, e.g. when its frame could not be sent
    pub fn reject(&mut self, transaction_id: u64, error: ClientError) -> bool {
        let Some(call) = self.pending.remove(&transaction_id) else {
            return false;
        };
        call.deadline.abort();
        let _ = call.completion.send(Err(error));
        true
    }

    /// Reject every outstanding call, returning how many there were
    pub fn fail_all(&mut self, error: impl Fn() -> ClientError) -> usize {
        let count = self.pending.len();
        for (_, call) in self.pending.drain() {
            call.deadline.abort();
            let _ = call.completion.send(Err(error()));
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
