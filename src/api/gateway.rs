use crate::error::GatewayError;
use crate::models::{
    AccountState, Candle, OrderBookTop, OrderId, OrderSide, Stats24h, StopKind, SymbolFilters,
};
use async_trait::async_trait;

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Signed order/account operations and market metadata for a futures exchange
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Market order for `quantity` base units
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> GatewayResult<OrderId>;

    /// Protective stop-market / take-profit-market order
    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        stop_price: f64,
        quantity: f64,
        kind: StopKind,
    ) -> GatewayResult<OrderId>;

    async fn cancel_order(&self, symbol: &str, order_id: &OrderId) -> GatewayResult<()>;

    async fn get_account_state(&self) -> GatewayResult<AccountState>;

    async fn get_symbol_filters(&self, symbol: &str) -> GatewayResult<SymbolFilters>;

    async fn get_order_book_top(&self, symbol: &str) -> GatewayResult<OrderBookTop>;

    async fn get_24h_stats(&self, symbol: &str) -> GatewayResult<Stats24h>;

    /// OHLC history, oldest first
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32)
        -> GatewayResult<Vec<Candle>>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()>;
}
