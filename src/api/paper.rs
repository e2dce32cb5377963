use super::gateway::{ExchangeGateway, GatewayResult};
use crate::error::GatewayError;
use crate::models::{
    AccountState, Candle, OrderBookTop, OrderId, OrderSide, Stats24h, StopKind, SymbolFilters,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Gateway operations that can have failures injected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaperOp {
    MarketOrder,
    StopOrder(StopKind),
    Cancel,
    Account,
    Filters,
    OrderBook,
    Stats,
    Klines,
    Leverage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperOrderType {
    Market,
    Stop(StopKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaperOrderStatus {
    Filled,
    New,
    Canceled,
}

#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub id: OrderId,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: PaperOrderType,
    pub quantity: f64,
    pub stop_price: Option<f64>,
    /// Price the order executed at, once filled
    pub fill_price: Option<f64>,
    pub status: PaperOrderStatus,
}

/// Net paper position; positive quantity is long
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PaperPosition {
    pub quantity: f64,
    pub entry_price: f64,
}

#[derive(Default)]
struct PaperState {
    account: Option<AccountState>,
    marks: HashMap<String, f64>,
    positions: HashMap<String, PaperPosition>,
    filters: HashMap<String, SymbolFilters>,
    books: HashMap<String, OrderBookTop>,
    stats: HashMap<String, Stats24h>,
    klines: HashMap<String, Vec<Candle>>,
    leverage: HashMap<String, u32>,
    orders: Vec<PaperOrder>,
    failures: HashMap<PaperOp, u32>,
    next_id: u64,
}

/// In-memory futures exchange
///
/// Records every order and fills market orders immediately at the last known
/// price. Protective orders rest until cancelled or until a mark price crosses
/// them; they only ever reduce the position. Realized pnl is booked to the
/// wallet and margin balances. Market data comes from the configured values,
/// or from `market` when one is attached (paper trading against live data).
/// With live data attached, resting stops are checked against the live price
/// whenever the account is read.
#[derive(Clone)]
pub struct PaperExchange {
    state: Arc<Mutex<PaperState>>,
    market: Option<Arc<dyn ExchangeGateway>>,
}

impl Default for PaperExchange {
    fn default() -> Self {
        Self::new(10_000.0)
    }
}

impl PaperExchange {
    pub fn new(wallet_balance: f64) -> Self {
        let state = PaperState {
            account: Some(AccountState {
                wallet_balance,
                margin_balance: wallet_balance * 0.5,
                unrealized_pnl: 0.0,
            }),
            next_id: 1,
            ..PaperState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            market: None,
        }
    }

    /// Read-only market data from another gateway
    pub fn with_market_data(mut self, market: Arc<dyn ExchangeGateway>) -> Self {
        self.market = Some(market);
        self
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set book, stats and filters in one go for a liquid test market
    pub fn list_symbol(&self, symbol: &str, price: f64) {
        let mut state = self.lock();
        state.marks.insert(symbol.to_string(), price);
        state.filters.insert(
            symbol.to_string(),
            SymbolFilters {
                tick_size: 0.01,
                lot_size: 0.001,
            },
        );
        state.books.insert(
            symbol.to_string(),
            OrderBookTop {
                best_bid: price,
                best_ask: price * 1.0001,
            },
        );
        state.stats.insert(
            symbol.to_string(),
            Stats24h {
                volume: 1_000_000.0,
                last_price: price,
            },
        );
    }

    pub fn set_account(&self, account: AccountState) {
        self.lock().account = Some(account);
    }

    pub fn set_filters(&self, symbol: &str, filters: SymbolFilters) {
        self.lock().filters.insert(symbol.to_string(), filters);
    }

    pub fn set_order_book(&self, symbol: &str, book: OrderBookTop) {
        self.lock().books.insert(symbol.to_string(), book);
    }

    pub fn set_stats(&self, symbol: &str, stats: Stats24h) {
        let mut state = self.lock();
        state.marks.insert(symbol.to_string(), stats.last_price);
        state.stats.insert(symbol.to_string(), stats);
    }

    /// Move the last price; resting stops it crosses are filled
    pub fn set_mark_price(&self, symbol: &str, price: f64) {
        let mut state = self.lock();
        state.marks.insert(symbol.to_string(), price);
        state.trigger_stops(symbol, price);
    }

    pub fn position(&self, symbol: &str) -> Option<PaperPosition> {
        self.lock().positions.get(symbol).copied()
    }

    pub fn set_klines(&self, symbol: &str, candles: Vec<Candle>) {
        self.lock().klines.insert(symbol.to_string(), candles);
    }

    /// Make the next `times` calls of `op` fail with a network error
    pub fn fail_next(&self, op: PaperOp, times: u32) {
        self.lock().failures.insert(op, times);
    }

    pub fn orders(&self) -> Vec<PaperOrder> {
        self.lock().orders.clone()
    }

    /// Protective orders still working for a symbol
    pub fn open_stop_orders(&self, symbol: &str) -> Vec<PaperOrder> {
        self.lock()
            .orders
            .iter()
            .filter(|o| o.symbol == symbol && o.status == PaperOrderStatus::New)
            .cloned()
            .collect()
    }

    pub fn market_orders(&self, symbol: &str) -> Vec<PaperOrder> {
        self.lock()
            .orders
            .iter()
            .filter(|o| o.symbol == symbol && o.order_type == PaperOrderType::Market)
            .cloned()
            .collect()
    }

    pub fn leverage(&self, symbol: &str) -> Option<u32> {
        self.lock().leverage.get(symbol).copied()
    }

    fn check_failure(&self, op: PaperOp) -> GatewayResult<()> {
        let mut state = self.lock();
        if let Some(remaining) = state.failures.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(GatewayError::Network(format!("injected failure: {:?}", op)));
            }
        }
        Ok(())
    }

    fn check_quantity(quantity: f64) -> GatewayResult<()> {
        if quantity > 0.0 {
            Ok(())
        } else {
            Err(GatewayError::Api {
                code: -4003,
                message: "Quantity less than or equal to zero.".to_string(),
            })
        }
    }

    /// Local mark first, then the attached market's last price
    async fn mark_price(&self, symbol: &str) -> GatewayResult<f64> {
        if let Some(price) = self.lock().marks.get(symbol).copied() {
            return Ok(price);
        }
        match &self.market {
            Some(market) => Ok(market.get_24h_stats(symbol).await?.last_price),
            None => Err(Self::missing("price", symbol)),
        }
    }

    async fn settle_live_stops(&self) {
        if self.market.is_none() {
            return;
        }
        let mut symbols: Vec<String> = self
            .lock()
            .orders
            .iter()
            .filter(|o| o.status == PaperOrderStatus::New)
            .map(|o| o.symbol.clone())
            .collect();
        symbols.sort();
        symbols.dedup();

        for symbol in symbols {
            match self.mark_price(&symbol).await {
                Ok(price) => self.lock().trigger_stops(&symbol, price),
                Err(e) => tracing::debug!(symbol = %symbol, "No price to settle stops: {}", e),
            }
        }
    }

    fn missing(what: &str, symbol: &str) -> GatewayError {
        GatewayError::MissingData(format!("no {} configured for {}", what, symbol))
    }
}

impl PaperState {
    fn push_order(
        &mut self,
        symbol: &str,
        side: OrderSide,
        order_type: PaperOrderType,
        quantity: f64,
        stop_price: Option<f64>,
    ) -> OrderId {
        let id = OrderId(format!("paper-{}", self.next_id));
        self.next_id += 1;
        self.orders.push(PaperOrder {
            id: id.clone(),
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            stop_price,
            fill_price: None,
            status: PaperOrderStatus::New,
        });

        tracing::debug!(
            symbol = %symbol,
            order_id = %id,
            side = side.as_str(),
            quantity = quantity,
            "Paper order recorded"
        );
        id
    }

    /// Apply a fill to the net position; returns the realized pnl
    ///
    /// A reduce-only fill never opens or flips a position.
    fn fill(
        &mut self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
        price: f64,
        reduce_only: bool,
    ) -> f64 {
        let direction = match side {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        };
        let position = self.positions.entry(symbol.to_string()).or_default();

        let closed = if position.quantity * direction < 0.0 {
            quantity.min(position.quantity.abs())
        } else {
            0.0
        };
        let realized = (price - position.entry_price) * closed * position.quantity.signum();
        position.quantity += closed * direction;

        let opened = if reduce_only { 0.0 } else { quantity - closed };
        if opened > 0.0 {
            let held = position.quantity.abs();
            position.entry_price = (position.entry_price * held + price * opened) / (held + opened);
            position.quantity += opened * direction;
        }
        if position.quantity.abs() < 1e-12 {
            self.positions.remove(symbol);
        }

        if realized != 0.0 {
            if let Some(account) = self.account.as_mut() {
                account.wallet_balance += realized;
                account.margin_balance += realized;
            }
            tracing::debug!(symbol = %symbol, realized = realized, "Paper pnl realized");
        }
        realized
    }

    /// Fill every resting stop for `symbol` that `price` has crossed
    fn trigger_stops(&mut self, symbol: &str, price: f64) {
        let crossed: Vec<usize> = self
            .orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.symbol == symbol && o.status == PaperOrderStatus::New)
            .filter(|(_, o)| {
                let (PaperOrderType::Stop(kind), Some(stop)) = (o.order_type, o.stop_price) else {
                    return false;
                };
                match (kind, o.side) {
                    (StopKind::StopLoss, OrderSide::Sell) | (StopKind::TakeProfit, OrderSide::Buy) => {
                        price <= stop
                    }
                    (StopKind::StopLoss, OrderSide::Buy) | (StopKind::TakeProfit, OrderSide::Sell) => {
                        price >= stop
                    }
                }
            })
            .map(|(i, _)| i)
            .collect();

        for i in crossed {
            let (side, quantity, stop) = {
                let order = &self.orders[i];
                (order.side, order.quantity, order.stop_price.unwrap_or(price))
            };
            let has_position = self
                .positions
                .get(symbol)
                .map_or(false, |p| p.quantity.abs() > f64::EPSILON);
            if !has_position {
                // Nothing left to reduce
                self.orders[i].status = PaperOrderStatus::Canceled;
                continue;
            }
            self.fill(symbol, side, quantity, stop, true);
            let order = &mut self.orders[i];
            order.status = PaperOrderStatus::Filled;
            order.fill_price = Some(stop);
            tracing::info!(symbol = %symbol, order_id = %order.id, price = stop, "Paper stop filled");
        }
    }
}

#[async_trait]
impl ExchangeGateway for PaperExchange {
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> GatewayResult<OrderId> {
        self.check_failure(PaperOp::MarketOrder)?;
        Self::check_quantity(quantity)?;
        let price = self.mark_price(symbol).await?;

        let mut state = self.lock();
        let id = state.push_order(symbol, side, PaperOrderType::Market, quantity, None);
        state.fill(symbol, side, quantity, price, false);
        if let Some(order) = state.orders.last_mut() {
            order.status = PaperOrderStatus::Filled;
            order.fill_price = Some(price);
        }
        Ok(id)
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        stop_price: f64,
        quantity: f64,
        kind: StopKind,
    ) -> GatewayResult<OrderId> {
        self.check_failure(PaperOp::StopOrder(kind))?;
        Self::check_quantity(quantity)?;
        Ok(self.lock().push_order(
            symbol,
            side,
            PaperOrderType::Stop(kind),
            quantity,
            Some(stop_price),
        ))
    }

    async fn cancel_order(&self, symbol: &str, order_id: &OrderId) -> GatewayResult<()> {
        self.check_failure(PaperOp::Cancel)?;
        let mut state = self.lock();
        let order = state
            .orders
            .iter_mut()
            .find(|o| &o.id == order_id && o.symbol == symbol && o.status == PaperOrderStatus::New)
            .ok_or_else(|| GatewayError::Api {
                code: -2011,
                message: "Unknown order sent.".to_string(),
            })?;
        order.status = PaperOrderStatus::Canceled;
        Ok(())
    }

    async fn get_account_state(&self) -> GatewayResult<AccountState> {
        self.check_failure(PaperOp::Account)?;
        self.settle_live_stops().await;
        self.lock()
            .account
            .ok_or_else(|| GatewayError::MissingData("no account configured".to_string()))
    }

    async fn get_symbol_filters(&self, symbol: &str) -> GatewayResult<SymbolFilters> {
        self.check_failure(PaperOp::Filters)?;
        if let Some(filters) = self.lock().filters.get(symbol).copied() {
            return Ok(filters);
        }
        match &self.market {
            Some(market) => market.get_symbol_filters(symbol).await,
            None => Err(Self::missing("filters", symbol)),
        }
    }

    async fn get_order_book_top(&self, symbol: &str) -> GatewayResult<OrderBookTop> {
        self.check_failure(PaperOp::OrderBook)?;
        if let Some(book) = self.lock().books.get(symbol).copied() {
            return Ok(book);
        }
        match &self.market {
            Some(market) => market.get_order_book_top(symbol).await,
            None => Err(Self::missing("order book", symbol)),
        }
    }

    async fn get_24h_stats(&self, symbol: &str) -> GatewayResult<Stats24h> {
        self.check_failure(PaperOp::Stats)?;
        if let Some(stats) = self.lock().stats.get(symbol).copied() {
            return Ok(stats);
        }
        match &self.market {
            Some(market) => market.get_24h_stats(symbol).await,
            None => Err(Self::missing("24h stats", symbol)),
        }
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> GatewayResult<Vec<Candle>> {
        self.check_failure(PaperOp::Klines)?;
        let stored = self.lock().klines.get(symbol).cloned();
        if let Some(candles) = stored {
            let skip = candles.len().saturating_sub(limit as usize);
            return Ok(candles.into_iter().skip(skip).collect());
        }
        match &self.market {
            Some(market) => market.get_klines(symbol, interval, limit).await,
            None => Err(Self::missing("klines", symbol)),
        }
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        self.check_failure(PaperOp::Leverage)?;
        self.lock().leverage.insert(symbol.to_string(), leverage);
        tracing::info!("Paper leverage {}x for {} at {}", leverage, symbol, Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_market_and_stop_orders() {
        let exchange = PaperExchange::default();
        exchange.list_symbol("BTCUSDT", 100.0);
        exchange
            .place_market_order("BTCUSDT", OrderSide::Buy, 1.0)
            .await
            .unwrap();
        let stop = exchange
            .place_stop_order("BTCUSDT", OrderSide::Sell, 98.0, 1.0, StopKind::StopLoss)
            .await
            .unwrap();

        assert_eq!(exchange.market_orders("BTCUSDT").len(), 1);
        assert_eq!(exchange.open_stop_orders("BTCUSDT").len(), 1);

        exchange.cancel_order("BTCUSDT", &stop).await.unwrap();
        assert!(exchange.open_stop_orders("BTCUSDT").is_empty());

        // Second cancel of the same order is rejected
        let again = exchange.cancel_order("BTCUSDT", &stop).await;
        assert!(matches!(again, Err(GatewayError::Api { code: -2011, .. })));
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient_and_counted() {
        let exchange = PaperExchange::default();
        exchange.fail_next(PaperOp::Account, 2);

        assert!(exchange.get_account_state().await.unwrap_err().is_transient());
        assert!(exchange.get_account_state().await.is_err());
        assert!(exchange.get_account_state().await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_quantity_rejected() {
        let exchange = PaperExchange::default();
        let result = exchange
            .place_market_order("BTCUSDT", OrderSide::Sell, 0.0)
            .await;
        assert!(matches!(result, Err(GatewayError::Api { .. })));
    }

    #[tokio::test]
    async fn test_market_data_delegation() {
        let live = PaperExchange::default();
        live.list_symbol("ETHUSDT", 2000.0);

        let paper = PaperExchange::new(500.0).with_market_data(Arc::new(live));
        let stats = paper.get_24h_stats("ETHUSDT").await.unwrap();

        assert_eq!(stats.last_price, 2000.0);
        assert!(paper.get_order_book_top("SOLUSDT").await.is_err());
        assert_eq!(
            paper.get_account_state().await.unwrap().wallet_balance,
            500.0
        );
    }

    #[tokio::test]
    async fn test_market_fills_book_realized_pnl() {
        let exchange = PaperExchange::new(1_000.0);
        exchange.list_symbol("BTCUSDT", 100.0);

        exchange
            .place_market_order("BTCUSDT", OrderSide::Buy, 2.0)
            .await
            .unwrap();
        assert_eq!(exchange.market_orders("BTCUSDT")[0].fill_price, Some(100.0));

        exchange.set_mark_price("BTCUSDT", 105.0);
        exchange
            .place_market_order("BTCUSDT", OrderSide::Sell, 0.5)
            .await
            .unwrap();

        let position = exchange.position("BTCUSDT").unwrap();
        assert!((position.quantity - 1.5).abs() < 1e-9);
        assert_eq!(position.entry_price, 100.0);

        let account = exchange.get_account_state().await.unwrap();
        assert!((account.wallet_balance - 1_002.5).abs() < 1e-9);
        assert!((account.margin_balance - 502.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_crossed_stop_fills_and_sibling_expires() {
        let exchange = PaperExchange::new(1_000.0);
        exchange.list_symbol("BTCUSDT", 100.0);
        exchange
            .place_market_order("BTCUSDT", OrderSide::Buy, 1.0)
            .await
            .unwrap();
        let stop = exchange
            .place_stop_order("BTCUSDT", OrderSide::Sell, 98.0, 1.0, StopKind::StopLoss)
            .await
            .unwrap();
        exchange
            .place_stop_order("BTCUSDT", OrderSide::Sell, 103.0, 1.0, StopKind::TakeProfit)
            .await
            .unwrap();

        exchange.set_mark_price("BTCUSDT", 99.0);
        assert_eq!(exchange.open_stop_orders("BTCUSDT").len(), 2);

        exchange.set_mark_price("BTCUSDT", 97.5);
        let filled: Vec<_> = exchange
            .orders()
            .into_iter()
            .filter(|o| o.id == stop)
            .collect();
        assert_eq!(filled[0].status, PaperOrderStatus::Filled);
        assert_eq!(filled[0].fill_price, Some(98.0));
        assert!(exchange.position("BTCUSDT").is_none());

        // Reduce-only: the take-profit has nothing left to close
        exchange.set_mark_price("BTCUSDT", 104.0);
        assert!(exchange.open_stop_orders("BTCUSDT").is_empty());
        assert!(exchange.position("BTCUSDT").is_none());

        let account = exchange.get_account_state().await.unwrap();
        assert!((account.wallet_balance - 998.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_market_order_needs_a_price() {
        let exchange = PaperExchange::default();
        let result = exchange
            .place_market_order("SOLUSDT", OrderSide::Buy, 1.0)
            .await;
        assert!(matches!(result, Err(GatewayError::MissingData(_))));
        assert!(exchange.orders().is_empty());
    }
}
