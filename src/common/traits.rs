//! Trait definitions at the seams of the session

use async_trait::async_trait;
use std::time::Duration;

use super::errors::Result;
use crate::zenith::auth::Token;

/// Source of OAuth2 access tokens
///
/// The session only needs two exchanges: the initial resource-owner password grant
/// and a refresh. `OAuthClient` implements this against the authorization server;
/// tests substitute their own.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Exchange the stored credentials for a token
    async fn password_grant(&self) -> Result<Token>;

    /// Exchange a refresh token for a new token
    async fn refresh_grant(&self, refresh_token: &str) -> Result<Token>;
}

/// Decides what happens after the socket closes without the caller asking for it
pub trait ReconnectStrategy: Send + Sync {
    /// Delay before reconnection attempt `attempt` (1-based), or `None` to give up
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Whether every registered subscription is re-sent after reconnecting
    fn resubscribe(&self) -> bool {
        true
    }
}
