//! Error types for the client

use serde_json::Value;
use thiserror::Error;

/// Result type alias using our ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Main error type for client operations
#[derive(Error, Debug)]
pub enum ClientError {
    /// Transport-level failure before a session is established (refused, DNS, TLS, handshake)
    #[error("Connection error ({code}): {message}")]
    Connection { code: String, message: String },

    /// The authorization server rejected the client identity (`invalid_client`)
    #[error("Bad client credentials")]
    BadCredentials,

    /// The client is not entitled to the requested grant (`unauthorized_client`)
    #[error("Client has no access")]
    NoAccess,

    /// Any other OAuth error body, passed through verbatim
    #[error("OAuth error {code}: {description}")]
    OAuth { code: String, description: String },

    /// No response to a call or subscribe within the call deadline
    #[error("Timed out waiting for {controller}/{topic}")]
    Timeout { controller: String, topic: String },

    /// The server refused a refreshed token; the session cannot continue
    #[error("Access revoked by server")]
    AccessRevoked,

    /// The connection closed while the operation was outstanding
    #[error("Disconnected")]
    Disconnected,

    /// The operation requires an open session
    #[error("Not connected")]
    NotConnected,

    /// The server answered with `Action` or `Result` set to `Error`
    #[error("Call {controller}/{topic} failed: {errors}")]
    CallFailed {
        controller: String,
        topic: String,
        errors: Value,
    },

    /// Invalid response from the authorization server or protocol server
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Build a connection error from a code and any displayable cause
    pub fn connection(code: impl Into<String>, message: impl ToString) -> Self {
        ClientError::Connection {
            code: code.into(),
            message: message.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        let code = match &err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => "closed".to_string(),
            // surface the OS-level kind, e.g. ConnectionRefused
            WsError::Io(io) => format!("{:?}", io.kind()),
            WsError::Url(_) => "url".to_string(),
            WsError::Http(response) => response.status().as_u16().to_string(),
            WsError::Protocol(_) => "protocol".to_string(),
            _ => "websocket".to_string(),
        };
        ClientError::connection(code, err)
    }
}
