//! OAuth2 authentication and transparent token refresh

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tracing::{debug, info, instrument, warn};

use crate::common::errors::{ClientError, Result};
use crate::common::traits::TokenSource;
use crate::config::types::{Credentials, Endpoints};

/// Timeout for a single request to the token endpoint
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// An access token and what is needed to replace it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime reported by the authorization server when the token was issued
    pub expires_in: Duration,
    pub refresh_token: Option<String>,
}

/// Successful token endpoint body
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl From<TokenResponse> for Token {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            token_type: response.token_type,
            expires_in: Duration::from_secs(response.expires_in),
            refresh_token: response.refresh_token,
        }
    }
}

/// OAuth2 error body (RFC 6749 section 5.2)
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Map an OAuth error body onto the client error taxonomy
pub fn classify_oauth_error(body: OAuthErrorBody) -> ClientError {
    match body.error.as_str() {
        "invalid_client" => ClientError::BadCredentials,
        "unauthorized_client" => ClientError::NoAccess,
        _ => ClientError::OAuth {
            code: body.error,
            description: body.error_description.unwrap_or_default(),
        },
    }
}

/// Delay before refreshing a token with the given lifetime: 90% of it
pub fn refresh_delay(expires_in: Duration) -> Duration {
    // divide first so an oversized lifetime cannot overflow
    expires_in / 10 * 9
}

/// Map a failed HTTP exchange onto a connection error carrying the underlying code
fn transport_error(err: reqwest::Error) -> ClientError {
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return ClientError::connection(format!("{:?}", io.kind()), &err);
        }
        source = cause.source();
    }

    let code = if err.is_timeout() {
        "Timeout".to_string()
    } else if err.is_connect() {
        "Connect".to_string()
    } else if let Some(status) = err.status() {
        status.as_u16().to_string()
    } else {
        "Request".to_string()
    };
    ClientError::connection(code, err)
}

/// Token endpoint client for the resource-owner password grant
#[derive(Debug, Clone)]
pub struct OAuthClient {
    http: Client,
    token_url: String,
    scope: String,
    credentials: Credentials,
}

impl OAuthClient {
    pub fn new(endpoints: &Endpoints, credentials: Credentials) -> Result<Self> {
        let http = Client::builder()
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Internal(e.to_string()))?;

        Ok(Self {
            http,
            token_url: endpoints.token_url.clone(),
            scope: endpoints.scope.clone(),
            credentials,
        })
    }

    #[instrument(skip(self, form), fields(url = %self.token_url))]
    async fn exchange(&self, form: &[(&str, &str)]) -> Result<Token> {
        let response = self
            .http
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if let Ok(error) = serde_json::from_str::<OAuthErrorBody>(&body) {
            warn!("Token endpoint returned error {}", error.error);
            return Err(classify_oauth_error(error));
        }

        if !status.is_success() {
            return Err(ClientError::InvalidResponse(format!(
                "Token endpoint returned status {}: {}",
                status, body
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ClientError::InvalidResponse(format!("Invalid token body: {}", e)))?;
        Ok(token.into())
    }
}

#[async_trait]
impl TokenSource for OAuthClient {
    async fn password_grant(&self) -> Result<Token> {
        let credentials = &self.credentials;
        self.exchange(&[
            ("grant_type", "password"),
            ("username", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ])
        .await
    }

    async fn refresh_grant(&self, refresh_token: &str) -> Result<Token> {
        let credentials = &self.credentials;
        self.exchange(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("scope", self.scope.as_str()),
        ])
        .await
    }
}

/// Outcome of a scheduled refresh, consumed by the session supervisor
#[derive(Debug)]
pub enum TokenEvent {
    /// A new access token is held; the server must be told about it
    Refreshed(String),
    /// The refresh exchange failed; the token will expire
    RefreshFailed(ClientError),
}

/// Owns the token and the single refresh timer
pub struct TokenManager {
    source: Arc<dyn TokenSource>,
    token: Arc<RwLock<Option<Token>>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl TokenManager {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            token: Arc::new(RwLock::new(None)),
            refresh_task: Mutex::new(None),
        }
    }

    /// Run the password grant and arm the refresh timer
    ///
    /// Refresh outcomes are reported on `events` until `cancel` is called.
    #[instrument(skip(self, events))]
    pub async fn authenticate(&self, events: mpsc::UnboundedSender<TokenEvent>) -> Result<Token> {
        let token = self.source.password_grant().await?;
        info!("Authenticated, token expires in {:?}", token.expires_in);

        *self.token.write().await = Some(token.clone());
        self.arm(token.expires_in, events);
        Ok(token)
    }

    /// Current access token, if authenticated
    pub async fn access_token(&self) -> Option<String> {
        self.token.read().await.as_ref().map(|t| t.access_token.clone())
    }

    /// Attach the bearer credential to a handshake request
    pub async fn sign(&self, request: &mut Request) -> Result<()> {
        let access_token = self.access_token().await.ok_or(ClientError::NotConnected)?;
        let value = HeaderValue::from_str(&format!("Bearer {}", access_token))
            .map_err(|e| ClientError::Internal(e.to_string()))?;
        request.headers_mut().insert(header::AUTHORIZATION, value);
        Ok(())
    }

    /// Whether a refresh timer is live
    pub fn is_armed(&self) -> bool {
        self.refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Stop the refresh timer
    pub fn cancel(&self) {
        let task = self
            .refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
            debug!("Token refresh timer cancelled");
        }
    }

    fn arm(&self, expires_in: Duration, events: mpsc::UnboundedSender<TokenEvent>) {
        let task = tokio::spawn(refresh_loop(
            self.source.clone(),
            self.token.clone(),
            expires_in,
            events,
        ));

        let previous = self
            .refresh_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for TokenManager {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Exchange the held token for a new one and store it
async fn refresh_token(
    source: &dyn TokenSource,
    store: &RwLock<Option<Token>>,
) -> Result<Token> {
    let refresh = store
        .read()
        .await
        .as_ref()
        .and_then(|t| t.refresh_token.clone());

    let token = match refresh {
        Some(refresh) => source.refresh_grant(&refresh).await?,
        // No refresh token was issued; fall back to a fresh password grant
        None => source.password_grant().await?,
    };

    *store.write().await = Some(token.clone());
    Ok(token)
}

async fn refresh_loop(
    source: Arc<dyn TokenSource>,
    store: Arc<RwLock<Option<Token>>>,
    mut expires_in: Duration,
    events: mpsc::UnboundedSender<TokenEvent>,
) {
    loop {
        let delay = refresh_delay(expires_in);
        debug!(
            "Token refresh scheduled in {:?} (token expires in {:?})",
            delay, expires_in
        );
        tokio::time::sleep(delay).await;

        match refresh_token(source.as_ref(), &store).await {
            Ok(token) => {
                info!("Token refreshed, expires in {:?}", token.expires_in);
                expires_in = token.expires_in;
                if events.send(TokenEvent::Refreshed(token.access_token)).is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!("Token refresh failed: {}", e);
                let _ = events.send(TokenEvent::RefreshFailed(e));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::MockTokenSource;
    use mockall::Sequence;
    use tokio::time::Instant;
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    fn token(access: &str, expires_in: u64, refresh: Option<&str>) -> Token {
        Token {
            access_token: access.to_string(),
            token_type: "Bearer".to_string(),
            expires_in: Duration::from_secs(expires_in),
            refresh_token: refresh.map(str::to_string),
        }
    }

    #[test]
    fn test_refresh_delay_is_ninety_percent() {
        assert_eq!(refresh_delay(Duration::from_secs(100)), Duration::from_secs(90));
        assert_eq!(refresh_delay(Duration::from_secs(3600)), Duration::from_secs(3240));
        assert_eq!(refresh_delay(Duration::from_secs(150)), Duration::from_secs(135));
    }

    #[test]
    fn test_refresh_delay_with_huge_lifetime() {
        let delay = refresh_delay(Duration::from_secs(u64::MAX));
        assert!(delay < Duration::from_secs(u64::MAX));
        assert!(delay > Duration::from_secs(u64::MAX / 10 * 8));
    }

    #[test]
    fn test_classify_oauth_errors() {
        let body = |error: &str, description: Option<&str>| OAuthErrorBody {
            error: error.to_string(),
            error_description: description.map(str::to_string),
        };

        assert!(matches!(
            classify_oauth_error(body("invalid_client", None)),
            ClientError::BadCredentials
        ));
        assert!(matches!(
            classify_oauth_error(body("unauthorized_client", None)),
            ClientError::NoAccess
        ));
        match classify_oauth_error(body("invalid_grant", Some("Invalid username or password"))) {
            ClientError::OAuth { code, description } => {
                assert_eq!(code, "invalid_grant");
                assert_eq!(description, "Invalid username or password");
            }
            other => panic!("Expected OAuth error, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_fires_at_ninety_percent_and_rearms() {
        let mut source = MockTokenSource::new();
        let mut seq = Sequence::new();
        source
            .expect_password_grant()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(token("t1", 100, Some("r1"))));
        source
            .expect_refresh_grant()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|refresh| {
                assert_eq!(refresh, "r1");
                Ok(token("t2", 50, Some("r2")))
            });
        source
            .expect_refresh_grant()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|refresh| {
                assert_eq!(refresh, "r2");
                Ok(token("t3", 50, Some("r3")))
            });

        let manager = TokenManager::new(Arc::new(source));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let start = Instant::now();

        manager.authenticate(tx).await.unwrap();
        assert!(manager.is_armed());
        assert_eq!(manager.access_token().await.as_deref(), Some("t1"));

        match rx.recv().await {
            Some(TokenEvent::Refreshed(access)) => assert_eq!(access, "t2"),
            other => panic!("Expected refresh, got {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(90));

        // re-armed from the new token's 50 second lifetime
        match rx.recv().await {
            Some(TokenEvent::Refreshed(access)) => assert_eq!(access, "t3"),
            other => panic!("Expected refresh, got {:?}", other),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(135));
        assert_eq!(manager.access_token().await.as_deref(), Some("t3"));

        manager.cancel();
        assert!(!manager.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_without_refresh_token_uses_password_grant() {
        let mut source = MockTokenSource::new();
        let mut seq = Sequence::new();
        source
            .expect_password_grant()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(token("t1", 10, None)));
        source
            .expect_password_grant()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Err(ClientError::BadCredentials));
        source.expect_refresh_grant().never();

        let manager = TokenManager::new(Arc::new(source));
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.authenticate(tx).await.unwrap();

        match rx.recv().await {
            Some(TokenEvent::RefreshFailed(ClientError::BadCredentials)) => {}
            other => panic!("Expected refresh failure, got {:?}", other),
        }
        // the failed loop does not re-arm and drops its sender
        assert!(rx.recv().await.is_none());
        assert!(!manager.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_authenticate_twice_keeps_one_timer() {
        let mut source = MockTokenSource::new();
        source
            .expect_password_grant()
            .times(2)
            .returning(|| Ok(token("t", 100, Some("r"))));
        source
            .expect_refresh_grant()
            .times(1)
            .returning(|_| Ok(token("t2", 1000, Some("r2"))));

        let manager = TokenManager::new(Arc::new(source));
        let (first_tx, mut first_rx) = mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = mpsc::unbounded_channel();
        manager.authenticate(first_tx).await.unwrap();
        manager.authenticate(second_tx).await.unwrap();

        assert!(matches!(second_rx.recv().await, Some(TokenEvent::Refreshed(_))));
        // the first loop was aborted, dropping its sender without an event
        assert!(first_rx.recv().await.is_none());
        manager.cancel();
    }

    #[tokio::test]
    async fn test_sign_attaches_bearer_header() {
        let mut source = MockTokenSource::new();
        source
            .expect_password_grant()
            .returning(|| Ok(token("abc", 3600, None)));

        let manager = TokenManager::new(Arc::new(source));
        let mut request = "ws://localhost/Zenith".into_client_request().unwrap();
        assert!(matches!(
            manager.sign(&mut request).await,
            Err(ClientError::NotConnected)
        ));

        let (tx, _rx) = mpsc::unbounded_channel();
        manager.authenticate(tx).await.unwrap();
        manager.sign(&mut request).await.unwrap();
        assert_eq!(
            request.headers().get(header::AUTHORIZATION).unwrap(),
            "Bearer abc"
        );
        manager.cancel();
    }
}
