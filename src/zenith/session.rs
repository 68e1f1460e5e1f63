//! The task that owns the socket
//!
//! Callers talk to it through a `SessionHandle`; every request carries a oneshot
//! sender the task completes when the server answers, the deadline fires, or the
//! connection goes away.

use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use super::auth::TokenManager;
use super::correlation::{Completion, CorrelationEngine, Expiry};
use super::keepalive::KeepaliveScheduler;
use super::messages::{Response, SubscribeRequest, SubscriptionKey};
use super::subscriptions::{Listener, SubscriptionMultiplexer};
use super::transport::{handshake_request, Transport, TransportEvent};
use crate::common::errors::{ClientError, Result};
use crate::common::traits::ReconnectStrategy;
use crate::common::types::{ConnectionState, Direction, DisconnectReason, FrameTrace};
use crate::config::types::SessionSettings;

/// Called after a close the caller did not ask for
pub type DisconnectCallback = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Stand-in deadline for a timer that is not running
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

pub(crate) enum Command {
    Call {
        controller: String,
        topic: String,
        data: Value,
        reply: Completion,
    },
    Subscribe {
        key: SubscriptionKey,
        listener: Listener,
        reply: Completion,
    },
    /// The server refused a refreshed token
    Revoke,
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Cloneable sender side of the session task
#[derive(Clone)]
pub(crate) struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl SessionHandle {
    pub async fn call(&self, controller: &str, topic: &str, data: Value) -> Result<Response> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Call {
                controller: controller.to_string(),
                topic: topic.to_string(),
                data,
                reply,
            })
            .map_err(|_| ClientError::NotConnected)?;
        response.await.map_err(|_| ClientError::Disconnected)?
    }

    pub async fn subscribe(&self, key: SubscriptionKey, listener: Listener) -> Result<Response> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Subscribe {
                key,
                listener,
                reply,
            })
            .map_err(|_| ClientError::NotConnected)?;
        response.await.map_err(|_| ClientError::Disconnected)?
    }

    pub fn revoke(&self) {
        let _ = self.commands.send(Command::Revoke);
    }

    /// Ask the task to close the socket and wait until it has
    pub async fn close(&self) {
        let (done, closed) = oneshot::channel();
        if self.commands.send(Command::Close { done }).is_ok() {
            let _ = closed.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// What the task needs beyond the socket itself
pub(crate) struct SessionShared {
    /// Signs the handshake of every (re)connection
    pub tokens: Arc<TokenManager>,
    pub websocket_url: String,
    /// Sent as the `version` query parameter
    pub protocol_version: Option<String>,
    pub strategy: Arc<dyn ReconnectStrategy>,
    /// Invoked once per unexpected close
    pub on_disconnect: DisconnectCallback,
    /// Cleared by an intentional disconnect; gates the callback and reconnection
    pub reconnect_enabled: Arc<AtomicBool>,
    pub state: watch::Sender<ConnectionState>,
    /// Present only when frame tracing is on
    pub frames: Option<broadcast::Sender<FrameTrace>>,
}

/// Open a socket signed with the current access token
pub(crate) async fn open_transport(
    tokens: &TokenManager,
    websocket_url: &str,
    protocol_version: Option<&str>,
) -> Result<Transport> {
    let mut request = handshake_request(websocket_url, protocol_version)?;
    tokens.sign(&mut request).await?;
    Transport::open(request).await
}

enum Exit {
    /// The caller closed the session
    Closed,
    Lost(DisconnectReason),
    Revoked,
}

struct Session {
    /// Current socket; replaced on reconnection
    transport: Transport,
    /// Requests from `SessionHandle`
    commands: mpsc::UnboundedReceiver<Command>,
    /// Deadlines that fired for calls and subscribes
    expired: mpsc::UnboundedReceiver<Expiry>,
    /// Outstanding calls by transaction ID
    correlation: CorrelationEngine,
    /// Listeners and pending subscribes by topic
    subscriptions: SubscriptionMultiplexer,
    /// Idle ping and liveness deadlines
    keepalive: KeepaliveScheduler,
    shared: SessionShared,
}

/// Start the task for an open socket
pub(crate) fn spawn(
    transport: Transport,
    settings: &SessionSettings,
    shared: SessionShared,
) -> (SessionHandle, JoinHandle<()>) {
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (expired_tx, expired) = mpsc::unbounded_channel();

    let session = Session {
        transport,
        commands,
        expired,
        correlation: CorrelationEngine::new(settings.call_timeout(), expired_tx.clone()),
        subscriptions: SubscriptionMultiplexer::new(settings.call_timeout(), expired_tx),
        keepalive: KeepaliveScheduler::new(
            settings.idle_ping_interval(),
            settings.liveness_interval(),
        ),
        shared,
    };

    let task = tokio::spawn(session.run());
    (SessionHandle { commands: commands_tx }, task)
}

impl Session {
    async fn run(mut self) {
        loop {
            match self.run_connected().await {
                Exit::Closed => break,
                Exit::Revoked => {
                    warn!("Access revoked, closing session");
                    self.fail_outstanding(|| ClientError::AccessRevoked);
                    if let Err(e) = self.transport.close().await {
                        debug!("Close handshake failed: {}", e);
                    }
                    self.notify(DisconnectReason::AccessRevoked);
                    break;
                }
                Exit::Lost(reason) => {
                    warn!("Connection lost: {}", reason);
                    self.fail_outstanding(|| ClientError::Disconnected);
                    self.notify(reason);
                    if !self.reconnect().await {
                        break;
                    }
                }
            }
        }

        self.keepalive.cancel();
        self.shared.tokens.cancel();
        self.shared.state.send_replace(ConnectionState::Disconnected);
        debug!("Session task finished");
    }

    async fn run_connected(&mut self) -> Exit {
        self.keepalive.arm(Instant::now());

        loop {
            let far_future = Instant::now() + FAR_FUTURE;
            let idle_at = self.keepalive.idle_deadline().unwrap_or(far_future);
            let liveness = self
                .keepalive
                .liveness_deadline(self.subscriptions.active_count());
            let liveness_at = liveness.unwrap_or(far_future);

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Call { controller, topic, data, reply }) => {
                        self.start_call(controller, topic, data, reply).await;
                    }
                    Some(Command::Subscribe { key, listener, reply }) => {
                        self.start_subscribe(key, listener, reply).await;
                    }
                    Some(Command::Revoke) => return Exit::Revoked,
                    Some(Command::Close { done }) => {
                        self.close().await;
                        let _ = done.send(());
                        return Exit::Closed;
                    }
                    None => {
                        self.close().await;
                        return Exit::Closed;
                    }
                },
                event = self.transport.next_event() => match event {
                    TransportEvent::Text(text) => {
                        self.keepalive.touch(Instant::now());
                        self.on_frame(text);
                    }
                    TransportEvent::Ping(payload) => {
                        self.keepalive.touch(Instant::now());
                        if let Err(e) = self.transport.send_pong(payload).await {
                            warn!("Failed to send pong: {}", e);
                        }
                    }
                    TransportEvent::Pong => self.keepalive.touch(Instant::now()),
                    TransportEvent::Closed(reason) => {
                        return Exit::Lost(DisconnectReason::Closed(reason));
                    }
                    TransportEvent::Error(e) => return Exit::Lost(DisconnectReason::Error(e)),
                },
                Some(expiry) = self.expired.recv() => self.on_expiry(expiry),
                _ = sleep_until(idle_at) => {
                    trace!("Connection idle, sending ping");
                    if let Err(e) = self.transport.send_ping().await {
                        warn!("Failed to send ping: {}", e);
                    }
                    self.keepalive.on_idle_fired(Instant::now());
                }
                _ = sleep_until(liveness_at), if liveness.is_some() => {
                    trace!(
                        "Liveness check, {} active subscription(s)",
                        self.subscriptions.active_count()
                    );
                    self.keepalive.on_liveness_fired(Instant::now());
                }
            }
        }
    }

    async fn start_call(&mut self, controller: String, topic: String, data: Value, reply: Completion) {
        let request = self.correlation.begin(controller, topic, data, reply);
        if let Err(e) = self.send_json(&request).await {
            self.correlation.reject(request.transaction_id, e);
        }
    }

    async fn start_subscribe(&mut self, key: SubscriptionKey, listener: Listener, reply: Completion) {
        // registered first so an update racing the confirmation is not lost
        self.subscriptions.register(key.clone(), listener);
        let transaction_id = self.correlation.next_transaction_id();
        let request = self.subscriptions.begin(key.clone(), transaction_id, reply);
        if let Err(e) = self.send_json(&request).await {
            self.subscriptions.reject(&key, transaction_id, e);
        }
    }

    fn on_frame(&mut self, text: String) {
        self.trace_frame(Direction::Inbound, &text);

        let response = match Response::parse(&text) {
            Ok(response) => response,
            Err(e) => {
                warn!("Discarding malformed frame: {}", e);
                return;
            }
        };

        let answered = self.correlation.resolve(&response);
        let delivered = self.subscriptions.dispatch(&response);
        if !answered && delivered == 0 {
            debug!(
                "Unmatched frame (transaction {:?}, key {:?})",
                response.transaction_id,
                response.key()
            );
        }
    }

    fn on_expiry(&mut self, expiry: Expiry) {
        match expiry {
            Expiry::Call(transaction_id) => {
                self.correlation.expire(transaction_id);
            }
            Expiry::Subscribe {
                key,
                transaction_id,
            } => {
                self.subscriptions.expire(&key, transaction_id);
            }
        }
    }

    async fn send_json<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let text = serde_json::to_string(message)?;
        self.trace_frame(Direction::Outbound, &text);
        self.transport.send_text(text).await?;
        self.keepalive.touch(Instant::now());
        Ok(())
    }

    fn trace_frame(&self, direction: Direction, text: &str) {
        trace!(?direction, "{}", text);
        if let Some(frames) = &self.shared.frames {
            debug!(?direction, "{}", text);
            let _ = frames.send(FrameTrace {
                direction,
                text: text.to_string(),
            });
        }
    }

    fn fail_outstanding(&mut self, error: impl Fn() -> ClientError) {
        let calls = self.correlation.fail_all(&error);
        let subscribes = self.subscriptions.fail_pending(&error);
        if calls + subscribes > 0 {
            debug!(
                "Rejected {} pending call(s) and {} pending subscribe(s)",
                calls, subscribes
            );
        }
    }

    fn notify(&self, reason: DisconnectReason) {
        if self.shared.reconnect_enabled.load(Ordering::SeqCst) {
            (self.shared.on_disconnect)(reason);
        }
    }

    async fn close(&mut self) {
        self.shared.state.send_replace(ConnectionState::Closing);
        self.fail_outstanding(|| ClientError::Disconnected);
        self.keepalive.cancel();
        if let Err(e) = self.transport.close().await {
            debug!("Close handshake failed: {}", e);
        }
        info!("Session closed");
    }

    /// Run the reconnect strategy; true once a new socket is open
    async fn reconnect(&mut self) -> bool {
        self.keepalive.cancel();
        let mut attempt = 0;

        loop {
            if !self.shared.reconnect_enabled.load(Ordering::SeqCst) {
                return false;
            }
            attempt += 1;
            let Some(delay) = self.shared.strategy.next_delay(attempt) else {
                info!("Giving up on reconnection after {} attempt(s)", attempt - 1);
                return false;
            };

            self.shared
                .state
                .send_replace(ConnectionState::Reconnecting { attempt });
            info!("Reconnecting in {:?} (attempt {})", delay, attempt);
            if !self.wait_rejecting_commands(delay).await {
                return false;
            }

            self.shared.state.send_replace(ConnectionState::Connecting);
            let opened = open_transport(
                &self.shared.tokens,
                &self.shared.websocket_url,
                self.shared.protocol_version.as_deref(),
            )
            .await;

            match opened {
                Ok(transport) => {
                    self.transport = transport;
                    self.shared.state.send_replace(ConnectionState::Connected);
                    info!("Reconnected after {} attempt(s)", attempt);
                    if self.shared.strategy.resubscribe() {
                        self.resubscribe_all().await;
                    }
                    return true;
                }
                Err(e) => warn!("Reconnection attempt {} failed: {}", attempt, e),
            }
        }
    }

    /// Sleep out a reconnect delay; requests arriving meanwhile fail fast
    async fn wait_rejecting_commands(&mut self, delay: Duration) -> bool {
        let wake = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = sleep_until(wake) => return true,
                command = self.commands.recv() => match command {
                    Some(Command::Call { reply, .. }) | Some(Command::Subscribe { reply, .. }) => {
                        let _ = reply.send(Err(ClientError::NotConnected));
                    }
                    Some(Command::Revoke) => return false,
                    Some(Command::Close { done }) => {
                        let _ = done.send(());
                        return false;
                    }
                    None => return false,
                },
                Some(expiry) = self.expired.recv() => self.on_expiry(expiry),
            }
        }
    }

    async fn resubscribe_all(&mut self) {
        let keys = self.subscriptions.keys();
        info!("Resubscribing to {} topic(s)", keys.len());
        for key in keys {
            let request = SubscribeRequest::new(&key, self.correlation.next_transaction_id());
            if let Err(e) = self.send_json(&request).await {
                warn!("Failed to resubscribe to {}: {}", key, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_handle_without_task_reports_not_connected() {
        let (commands, receiver) = mpsc::unbounded_channel();
        drop(receiver);
        let handle = SessionHandle { commands };

        assert!(handle.is_closed());
        assert!(matches!(
            handle.call("Trading", "QueryAccounts", json!({})).await,
            Err(ClientError::NotConnected)
        ));
        handle.close().await;
    }

    #[tokio::test]
    async fn test_dropped_reply_reports_disconnected() {
        let (commands, mut receiver) = mpsc::unbounded_channel();
        let handle = SessionHandle { commands };

        let task = tokio::spawn(async move {
            // accept the command and drop its reply sender
            let _ = receiver.recv().await;
        });
        assert!(matches!(
            handle.call("Trading", "QueryOrders", json!({})).await,
            Err(ClientError::Disconnected)
        ));
        task.await.unwrap();
    }
}
