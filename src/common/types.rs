//! Types shared between the session layers and its callers

use serde::{Deserialize, Serialize};

/// Server environment, selected by a boolean flag rather than a user-supplied URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    Staging,
}

impl Environment {
    /// Map the configuration flag onto an environment
    pub fn from_staging_flag(staging: bool) -> Self {
        if staging {
            Environment::Staging
        } else {
            Environment::Production
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Staging => write!(f, "staging"),
        }
    }
}

/// Lifecycle of the single socket owned by a client instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    Connecting,
    Connected,
    /// Waiting for the reconnect strategy after an unexpected close
    Reconnecting { attempt: u32 },
    Closing,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Why a session ended without the caller asking for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The server closed the socket (with optional close frame reason)
    Closed(Option<String>),
    /// The socket failed
    Error(String),
    /// A refreshed token was refused, or the refresh itself failed
    AccessRevoked,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::Closed(Some(reason)) => write!(f, "closed: {}", reason),
            DisconnectReason::Closed(None) => write!(f, "closed"),
            DisconnectReason::Error(e) => write!(f, "error: {}", e),
            DisconnectReason::AccessRevoked => write!(f, "access revoked"),
        }
    }
}

/// Direction of a traced frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// A raw frame surfaced for inspection when the debug flag is set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameTrace {
    pub direction: Direction,
    pub text: String,
}
