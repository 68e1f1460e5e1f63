//! Zenith client: authentication, socket and session behind one handle

use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use super::auth::{OAuthClient, TokenEvent, TokenManager};
use super::messages::{Response, SubscriptionKey, TopicUpdate};
use super::reconnect;
use super::session::{self, open_transport, SessionHandle, SessionShared};
use crate::common::channels::{create_frame_tap, create_update_channel};
use crate::common::errors::{ClientError, Result};
use crate::common::traits::{ReconnectStrategy, TokenSource};
use crate::common::types::{ConnectionState, DisconnectReason, FrameTrace};
use crate::config::types::{ClientConfig, Endpoints};

/// Controller handling authentication calls
pub const AUTH_CONTROLLER: &str = "Auth";

/// Client for one Zenith session
///
/// `connect` authenticates and opens the socket; `call` and `subscribe` are then
/// usable from any task through `&self`. Exactly one socket is live per client.
pub struct ZenithClient {
    /// Client configuration
    config: ClientConfig,
    /// Token and WebSocket endpoints in use
    endpoints: Endpoints,
    /// Access token holder and refresh timer
    tokens: Arc<TokenManager>,
    /// What to do after an unexpected close
    strategy: Arc<dyn ReconnectStrategy>,
    /// Current connection state
    state: watch::Sender<ConnectionState>,
    /// Set while connected; cleared before an intentional close
    reconnect_enabled: Arc<AtomicBool>,
    /// Frame tap, fed only in debug mode
    frames: broadcast::Sender<FrameTrace>,
    /// Command handle of the live session
    session: Option<SessionHandle>,
    /// Task owning the socket
    session_task: Option<JoinHandle<()>>,
    /// Task forwarding refreshed tokens to the server
    supervisor: Option<JoinHandle<()>>,
}

impl ZenithClient {
    /// Create a client for the environment the configuration selects
    pub fn new(config: ClientConfig) -> Result<Self> {
        let endpoints = Endpoints::for_environment(config.environment());
        Self::with_endpoints(config, endpoints)
    }

    /// Create a client against explicit endpoints
    pub fn with_endpoints(config: ClientConfig, endpoints: Endpoints) -> Result<Self> {
        let source = OAuthClient::new(&endpoints, config.credentials.clone())?;
        Ok(Self::with_token_source(config, endpoints, Arc::new(source)))
    }

    /// Create a client that obtains tokens from `source`
    pub fn with_token_source(
        config: ClientConfig,
        endpoints: Endpoints,
        source: Arc<dyn TokenSource>,
    ) -> Self {
        let strategy = reconnect::from_settings(&config.settings);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            endpoints,
            tokens: Arc::new(TokenManager::new(source)),
            strategy,
            state,
            reconnect_enabled: Arc::new(AtomicBool::new(false)),
            frames: create_frame_tap(),
            session: None,
            session_task: None,
            supervisor: None,
        }
    }

    /// Replace the strategy chosen from the settings
    pub fn with_reconnect_strategy(mut self, strategy: Arc<dyn ReconnectStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Watch connection state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Raw inbound and outbound frames; only populated when `debug` is set
    pub fn frames(&self) -> broadcast::Receiver<FrameTrace> {
        self.frames.subscribe()
    }

    /// Authenticate, open the socket and start the session
    ///
    /// `on_disconnect` runs when the socket closes without `disconnect` having been
    /// called, before any reconnection is attempted.
    #[instrument(skip(self, on_disconnect), fields(environment = %self.config.environment()))]
    pub async fn connect<F>(&mut self, on_disconnect: F) -> Result<()>
    where
        F: Fn(DisconnectReason) + Send + Sync + 'static,
    {
        if self.session.as_ref().is_some_and(|s| !s.is_closed()) {
            warn!("Already connected");
            return Ok(());
        }
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }

        self.set_state(ConnectionState::Authenticating);
        let (token_tx, token_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.tokens.authenticate(token_tx).await {
            error!("Authentication failed: {}", e);
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        self.set_state(ConnectionState::Connecting);
        info!("Connecting to {}", self.endpoints.websocket_url);
        let opened = open_transport(
            &self.tokens,
            &self.endpoints.websocket_url,
            self.config.protocol_version.as_deref(),
        )
        .await;
        let transport = match opened {
            Ok(transport) => transport,
            Err(e) => {
                error!("Connection failed: {}", e);
                self.reconnect_enabled.store(false, Ordering::SeqCst);
                self.tokens.cancel();
                self.set_state(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.reconnect_enabled.store(true, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);

        let shared = SessionShared {
            tokens: self.tokens.clone(),
            websocket_url: self.endpoints.websocket_url.clone(),
            protocol_version: self.config.protocol_version.clone(),
            strategy: self.strategy.clone(),
            on_disconnect: Arc::new(on_disconnect),
            reconnect_enabled: self.reconnect_enabled.clone(),
            state: self.state.clone(),
            frames: self.config.debug.then(|| self.frames.clone()),
        };
        let (handle, task) = session::spawn(transport, &self.config.settings, shared);

        self.supervisor = Some(tokio::spawn(supervise_tokens(token_rx, handle.clone())));
        self.session = Some(handle);
        self.session_task = Some(task);
        info!("Connected");
        Ok(())
    }

    /// Close the session; pending calls fail with `Disconnected`
    #[instrument(skip(self))]
    pub async fn disconnect(&mut self) {
        // cleared first so the close is not reported as unexpected
        self.reconnect_enabled.store(false, Ordering::SeqCst);
        self.tokens.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }

        if let Some(session) = self.session.take() {
            self.set_state(ConnectionState::Closing);
            session.close().await;
        }
        if let Some(task) = self.session_task.take() {
            if let Err(e) = task.await {
                warn!("Session task ended abnormally: {}", e);
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Disconnected");
    }

    /// Send a call and wait for its response
    ///
    /// Responses with `Result` of `Invalid` or `Rejected` are returned as `Ok`;
    /// inspect `Response::result_code`. A response marked `Error` fails with
    /// `ClientError::CallFailed`.
    pub async fn call(&self, controller: &str, topic: &str, data: Value) -> Result<Response> {
        self.session()?.call(controller, topic, data).await
    }

    /// Register `on_update` for a topic and wait for the first confirming message
    ///
    /// The confirming message is also delivered to `on_update`. The listener stays
    /// registered for the life of the client.
    pub async fn subscribe<F>(&self, controller: &str, topic: &str, on_update: F) -> Result<Response>
    where
        F: Fn(&TopicUpdate) + Send + Sync + 'static,
    {
        let key = SubscriptionKey::new(controller, topic);
        self.session()?.subscribe(key, Box::new(on_update)).await
    }

    /// Like `subscribe`, delivering updates on a channel
    pub async fn subscribe_stream(
        &self,
        controller: &str,
        topic: &str,
    ) -> Result<(Response, mpsc::UnboundedReceiver<TopicUpdate>)> {
        let (tx, rx) = create_update_channel();
        let confirmation = self
            .subscribe(controller, topic, move |update: &TopicUpdate| {
                let _ = tx.send(update.clone());
            })
            .await?;
        Ok((confirmation, rx))
    }

    fn session(&self) -> Result<&SessionHandle> {
        self.session.as_ref().ok_or(ClientError::NotConnected)
    }

    fn set_state(&self, state: ConnectionState) {
        debug!("Connection state: {:?}", state);
        self.state.send_replace(state);
    }
}

impl Drop for ZenithClient {
    fn drop(&mut self) {
        self.reconnect_enabled.store(false, Ordering::SeqCst);
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}

/// Tell the server about every refreshed token; any refusal ends the session
async fn supervise_tokens(mut events: mpsc::UnboundedReceiver<TokenEvent>, session: SessionHandle) {
    while let Some(event) = events.recv().await {
        match event {
            TokenEvent::Refreshed(access_token) => {
                let data = json!({"Provider": "Bearer", "AccessToken": access_token});
                match session.call(AUTH_CONTROLLER, "AuthToken", data).await {
                    Ok(response) if response.is_success() => {
                        info!("Server accepted refreshed token");
                    }
                    Ok(response) => {
                        error!("Server refused refreshed token: {:?}", response.result);
                        session.revoke();
                        break;
                    }
                    Err(ClientError::Disconnected | ClientError::NotConnected) => {
                        debug!("No live socket for the token update");
                    }
                    Err(e) => {
                        error!("Token update failed: {}", e);
                        session.revoke();
                        break;
                    }
                }
            }
            TokenEvent::RefreshFailed(e) => {
                error!("Token refresh failed: {}", e);
                session.revoke();
                break;
            }
        }
    }
}
