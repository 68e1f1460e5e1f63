//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::common::types::Environment;

/// Main client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// OAuth2 resource-owner credentials
    pub credentials: Credentials,
    /// Use the staging environment instead of production
    #[serde(default)]
    pub staging: bool,
    /// Optional protocol version sent as a query parameter on the handshake
    #[serde(default)]
    pub protocol_version: Option<String>,
    /// Surface every inbound/outbound frame for inspection
    #[serde(default)]
    pub debug: bool,
    /// Session timing and reconnection settings
    #[serde(default)]
    pub settings: SessionSettings,
}

impl ClientConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            staging: false,
            protocol_version: None,
            debug: false,
            settings: SessionSettings::default(),
        }
    }

    pub fn environment(&self) -> Environment {
        Environment::from_staging_flag(self.staging)
    }
}

/// Credentials for the OAuth2 password grant
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Session timing and reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Deadline for a call or subscribe response in milliseconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
    /// Idle period after which a ping is sent, in seconds
    #[serde(default = "default_idle_ping")]
    pub idle_ping_seconds: u64,
    /// Period of the subscription liveness timer, in seconds
    #[serde(default = "default_liveness")]
    pub liveness_seconds: u64,
    /// Reconnect and resubscribe after an unexpected close
    #[serde(default)]
    pub auto_reconnect: bool,
    /// Delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Maximum reconnection attempts (0 = infinite)
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

impl SessionSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn idle_ping_interval(&self) -> Duration {
        Duration::from_secs(self.idle_ping_seconds)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_seconds)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            call_timeout_ms: default_call_timeout(),
            idle_ping_seconds: default_idle_ping(),
            liveness_seconds: default_liveness(),
            auto_reconnect: false,
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: 0,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_call_timeout() -> u64 {
    10_000
}

fn default_idle_ping() -> u64 {
    30
}

fn default_liveness() -> u64 {
    10
}

fn default_reconnect_delay() -> u64 {
    5000
}

/// Fixed endpoints of one environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// OAuth2 authorization endpoint
    pub auth_url: String,
    /// OAuth2 token endpoint
    pub token_url: String,
    /// Protocol WebSocket endpoint
    pub websocket_url: String,
    /// Scope requested with every grant
    pub scope: String,
}

/// Scope requested from the authorization server
pub const API_SCOPE: &str = "Zenith/Trading";

impl Endpoints {
    pub fn for_environment(environment: Environment) -> Self {
        let (auth_base, websocket_url) = match environment {
            Environment::Production => (
                "https://passport.paritech.com",
                "wss://zenith.paritech.com/Zenith",
            ),
            Environment::Staging => (
                "https://passport.staging.paritech.com",
                "wss://zenith.staging.paritech.com/Zenith",
            ),
        };
        Self::from_auth_base(auth_base, websocket_url)
    }

    /// Derive the OAuth2 endpoints from an authorization server base URL
    pub fn from_auth_base(auth_base: &str, websocket_url: &str) -> Self {
        let auth_base = auth_base.trim_end_matches('/');
        Self {
            auth_url: format!("{}/connect/authorize", auth_base),
            token_url: format!("{}/connect/token", auth_base),
            websocket_url: websocket_url.to_string(),
            scope: API_SCOPE.to_string(),
        }
    }
}
