//! Zenith Client Library
//!
//! An async Rust client for the Zenith JSON-over-WebSocket trading protocol:
//! OAuth2 authentication with transparent refresh, request/response calls
//! correlated by transaction ID, and topic subscriptions multiplexed over the
//! same socket.

pub mod common;
pub mod config;
pub mod zenith;

// Re-export commonly used types
pub use common::errors::{ClientError, Result};
pub use common::traits::{ReconnectStrategy, TokenSource};
pub use common::types::{ConnectionState, Direction, DisconnectReason, Environment, FrameTrace};
pub use config::types::{ClientConfig, Credentials, Endpoints, SessionSettings};
pub use zenith::auth::{OAuthClient, Token};
pub use zenith::client::ZenithClient;
pub use zenith::messages::{
    account_topic, symbol_topic, ChangeOperation, Order, OrderChange, OrderDetails, OrderRoute,
    OrderSide, Response, ResultCode, SubscriptionKey, TopicUpdate,
};
pub use zenith::reconnect::{NoReconnect, ReconnectAndResubscribe};
