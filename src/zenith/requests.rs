//! Request builders for the controllers and topics the client uses

use serde_json::json;
use tracing::instrument;

use super::client::{ZenithClient, AUTH_CONTROLLER};
use super::messages::{
    account_topic, symbol_topic, OrderChange, OrderDetails, OrderRoute, Response, TopicUpdate,
};
use crate::common::errors::Result;

pub const ZENITH_CONTROLLER: &str = "Zenith";
pub const TRADING_CONTROLLER: &str = "Trading";
pub const MARKET_CONTROLLER: &str = "Market";

impl ZenithClient {
    /// Identity and permissions of the authenticated user
    #[instrument(skip(self))]
    pub async fn identify(&self) -> Result<Response> {
        self.call(AUTH_CONTROLLER, "Identify", json!({})).await
    }

    #[instrument(skip(self))]
    pub async fn server_info(&self) -> Result<Response> {
        self.call(ZENITH_CONTROLLER, "QueryServerInfo", json!({})).await
    }

    #[instrument(skip(self))]
    pub async fn query_accounts(&self) -> Result<Response> {
        self.call(TRADING_CONTROLLER, "QueryAccounts", json!({})).await
    }

    #[instrument(skip(self))]
    pub async fn query_orders(&self, account: &str) -> Result<Response> {
        self.call(TRADING_CONTROLLER, "QueryOrders", json!({"Account": account}))
            .await
    }

    /// Orders of an account, decoded
    pub async fn query_order_changes(&self, account: &str) -> Result<Vec<OrderChange>> {
        self.query_orders(account).await?.parse_data()
    }

    #[instrument(skip(self))]
    pub async fn query_holdings(&self, account: &str) -> Result<Response> {
        self.call(TRADING_CONTROLLER, "QueryHoldings", json!({"Account": account}))
            .await
    }

    #[instrument(skip(self))]
    pub async fn query_balances(&self, account: &str) -> Result<Response> {
        self.call(TRADING_CONTROLLER, "QueryBalances", json!({"Account": account}))
            .await
    }

    #[instrument(skip(self))]
    pub async fn query_markets(&self) -> Result<Response> {
        self.call(MARKET_CONTROLLER, "QueryMarkets", json!({})).await
    }

    #[instrument(skip(self))]
    pub async fn query_security(&self, code: &str, market: &str) -> Result<Response> {
        self.call(
            MARKET_CONTROLLER,
            "QuerySecurity",
            json!({"Code": code, "Market": market}),
        )
        .await
    }

    /// Place an order; a business rejection comes back as `Ok` with `Result` set
    #[instrument(skip(self, details, route), fields(code = %details.code, side = %details.side))]
    pub async fn place_order(
        &self,
        account: &str,
        details: &OrderDetails,
        route: &OrderRoute,
    ) -> Result<Response> {
        self.call(
            TRADING_CONTROLLER,
            "PlaceOrder",
            json!({"Account": account, "Details": details, "Route": route}),
        )
        .await
    }

    #[instrument(skip(self, details))]
    pub async fn amend_order(
        &self,
        account: &str,
        order_id: &str,
        details: &OrderDetails,
    ) -> Result<Response> {
        self.call(
            TRADING_CONTROLLER,
            "AmendOrder",
            json!({"Account": account, "OrderID": order_id, "Details": details}),
        )
        .await
    }

    #[instrument(skip(self))]
    pub async fn cancel_order(&self, account: &str, order_id: &str) -> Result<Response> {
        self.call(
            TRADING_CONTROLLER,
            "CancelOrder",
            json!({"Account": account, "OrderID": order_id}),
        )
        .await
    }

    #[instrument(skip(self, on_update))]
    pub async fn subscribe_orders<F>(&self, account: &str, on_update: F) -> Result<Response>
    where
        F: Fn(&TopicUpdate) + Send + Sync + 'static,
    {
        self.subscribe(TRADING_CONTROLLER, &account_topic("Orders", account), on_update)
            .await
    }

    #[instrument(skip(self, on_update))]
    pub async fn subscribe_holdings<F>(&self, account: &str, on_update: F) -> Result<Response>
    where
        F: Fn(&TopicUpdate) + Send + Sync + 'static,
    {
        self.subscribe(TRADING_CONTROLLER, &account_topic("Holdings", account), on_update)
            .await
    }

    #[instrument(skip(self, on_update))]
    pub async fn subscribe_security<F>(&self, code: &str, market: &str, on_update: F) -> Result<Response>
    where
        F: Fn(&TopicUpdate) + Send + Sync + 'static,
    {
        self.subscribe(
            MARKET_CONTROLLER,
            &symbol_topic("Security", code, market),
            on_update,
        )
        .await
    }

    #[instrument(skip(self, on_update))]
    pub async fn subscribe_trades<F>(&self, code: &str, market: &str, on_update: F) -> Result<Response>
    where
        F: Fn(&TopicUpdate) + Send + Sync + 'static,
    {
        self.subscribe(MARKET_CONTROLLER, &symbol_topic("Trades", code, market), on_update)
            .await
    }

    #[instrument(skip(self, on_update))]
    pub async fn subscribe_depth<F>(&self, code: &str, market: &str, on_update: F) -> Result<Response>
    where
        F: Fn(&TopicUpdate) + Send + Sync + 'static,
    {
        self.subscribe(MARKET_CONTROLLER, &symbol_topic("Depth", code, market), on_update)
            .await
    }
}
