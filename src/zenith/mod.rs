//! Zenith protocol client

pub mod auth;
pub mod client;
pub mod convert;
pub mod correlation;
pub mod keepalive;
pub mod messages;
pub mod reconnect;
pub mod requests;
pub mod session;
pub mod subscriptions;
pub mod transport;
