//! Zenith wire message types

use chrono::{DateTime, FixedOffset};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::common::errors::{ClientError, Result};

/// Action value that turns an outbound frame into a subscribe request
pub const ACTION_SUBSCRIBE: &str = "Sub";

/// Action/Result value that marks a failed call
pub const ACTION_ERROR: &str = "Error";

/// Outbound request/response call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CallRequest {
    pub controller: String,
    pub topic: String,
    pub data: Value,
    pub confirm: bool,
    #[serde(rename = "TransactionID")]
    pub transaction_id: u64,
}

/// Outbound subscribe request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscribeRequest {
    pub controller: String,
    pub topic: String,
    pub action: String,
    pub confirm: bool,
    #[serde(rename = "TransactionID")]
    pub transaction_id: u64,
}

impl SubscribeRequest {
    pub fn new(key: &SubscriptionKey, transaction_id: u64) -> Self {
        Self {
            controller: key.controller.clone(),
            topic: key.topic.clone(),
            action: ACTION_SUBSCRIBE.to_string(),
            confirm: false,
            transaction_id,
        }
    }
}

/// Any inbound frame: a call response, a subscription update, or both
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    #[serde(rename = "TransactionID", default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Value>,
}

impl Response {
    /// Parse a raw text frame
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Subscription key this frame addresses, if it carries a controller and topic
    pub fn key(&self) -> Option<SubscriptionKey> {
        match (&self.controller, &self.topic) {
            (Some(controller), Some(topic)) => Some(SubscriptionKey::new(controller, topic)),
            _ => None,
        }
    }

    /// Whether `Action` or `Result` marks this frame as a failure
    pub fn is_error(&self) -> bool {
        self.action.as_deref() == Some(ACTION_ERROR) || self.result.as_deref() == Some(ACTION_ERROR)
    }

    /// Business-level result code, when the server sent one
    pub fn result_code(&self) -> Option<ResultCode> {
        self.result.as_deref().map(ResultCode::from)
    }

    pub fn is_success(&self) -> bool {
        self.result_code() == Some(ResultCode::Success)
    }

    /// Deserialize the `Data` payload into a typed model
    pub fn parse_data<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    /// Convert a failed frame into the error the caller sees
    pub fn into_error(self, controller: &str, topic: &str) -> ClientError {
        ClientError::CallFailed {
            controller: controller.to_string(),
            topic: topic.to_string(),
            errors: self.errors.unwrap_or(self.data),
        }
    }
}

/// Result codes observed on call responses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultCode {
    Success,
    /// Bad input; `Errors` describes which
    Invalid,
    /// Server-side business rejection
    Rejected,
    /// Parameter-level failure
    Error,
    Other(String),
}

impl From<&str> for ResultCode {
    fn from(value: &str) -> Self {
        match value {
            "Success" => ResultCode::Success,
            "Invalid" => ResultCode::Invalid,
            "Rejected" => ResultCode::Rejected,
            "Error" => ResultCode::Error,
            other => ResultCode::Other(other.to_string()),
        }
    }
}

/// Identifies a class of unsolicited updates: controller plus topic instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub controller: String,
    pub topic: String,
}

impl SubscriptionKey {
    pub fn new(controller: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            topic: topic.into(),
        }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.controller, self.topic)
    }
}

/// Topic instance for a symbol on a market, e.g. `Security!BHP[ASX]`
pub fn symbol_topic(topic: &str, code: &str, market: &str) -> String {
    format!("{}!{}[{}]", topic, code, market)
}

/// Topic instance for an account, e.g. `Orders!12345[Demo]`
pub fn account_topic(topic: &str, account: &str) -> String {
    format!("{}!{}", topic, account)
}

/// An inbound frame delivered to subscription listeners
#[derive(Debug, Clone, PartialEq)]
pub struct TopicUpdate {
    pub controller: String,
    pub topic: String,
    pub action: Option<String>,
    pub data: Value,
    /// Textual time fields of `data`, parsed, keyed by JSON pointer
    pub timestamps: BTreeMap<String, DateTime<FixedOffset>>,
}

// ============================================================================
// Trading payloads
// ============================================================================

/// Operation carried by an order change record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
    #[serde(rename = "A")]
    Added,
    #[serde(rename = "U")]
    Updated,
    #[serde(rename = "R")]
    Removed,
    #[serde(rename = "C")]
    Cleared,
}

/// One record of a `QueryOrders` response or `Orders` update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderChange {
    #[serde(rename = "O")]
    pub operation: ChangeOperation,
    #[serde(rename = "Order", default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Order {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    pub status: String,
    pub details: OrderDetails,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderDetails {
    pub side: OrderSide,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    pub quantity: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validity: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Bid,
    Ask,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Bid => write!(f, "Bid"),
            OrderSide::Ask => write!(f, "Ask"),
        }
    }
}

/// Routing instruction for a new order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderRoute {
    pub algorithm: String,
    pub market: String,
}

impl OrderRoute {
    pub fn market(market: impl Into<String>) -> Self {
        Self {
            algorithm: "Market".to_string(),
            market: market.into(),
        }
    }
}
