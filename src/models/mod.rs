use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a futures position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for Long, -1 for Short
    pub fn sign(self) -> f64 {
        match self {
            Side::Long => 1.0,
            Side::Short => -1.0,
        }
    }

    /// Order side that opens a position in this direction
    pub fn entry_order(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces a position in this direction
    pub fn exit_order(self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// Exchange order side
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Kind of protective order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StopKind {
    StopLoss,
    TakeProfit,
}

impl StopKind {
    /// Exchange order type (`STOP_MARKET` / `TAKE_PROFIT_MARKET`)
    pub fn order_type(self) -> &'static str {
        match self {
            StopKind::StopLoss => "STOP_MARKET",
            StopKind::TakeProfit => "TAKE_PROFIT_MARKET",
        }
    }
}

/// Exchange-assigned order identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OrderId(pub String);

impl std::fmt::Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Single trade price from the feed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Price point kept in the analyzer history
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceSample {
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Whether the live protective orders for a position are in place
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Protection {
    Protected,
    /// Stop-loss and/or take-profit could not be placed. High severity.
    Unprotected,
}

/// Open futures position, one per symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub initial_quantity: f64,
    pub entry_price: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub opened_at: DateTime<Utc>,
    pub stop_order: Option<OrderId>,
    pub take_profit_order: Option<OrderId>,
    pub protection: Protection,
    /// Partial-close ladder levels already consumed, by index
    pub fired_levels: Vec<usize>,
    /// Quote pnl booked by partial closes so far
    pub realized_pnl: f64,
}

impl Position {
    /// Signed pnl in percent of entry (positive = in the position's favor)
    pub fn pnl_percent(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * 100.0 * self.side.sign()
    }

    /// Unrealized pnl in quote currency for the remaining quantity
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }

    pub fn is_protected(&self) -> bool {
        self.protection == Protection::Protected
    }
}

/// Trailing stop bookkeeping, one per open position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrailingStop {
    /// Highest price seen for a Long, lowest for a Short
    pub best_price: f64,
    pub stop_price: f64,
    pub distance_percent: f64,
}

/// Trigger direction for a price alert
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlertDirection {
    Above,
    Below,
    /// Fires as soon as price leaves the threshold in either direction
    Both,
}

/// Edge-triggered price alert; never resets once triggered
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceAlert {
    pub symbol: String,
    pub threshold_price: f64,
    pub direction: AlertDirection,
    pub message: String,
    pub triggered: bool,
}

impl PriceAlert {
    pub fn new(
        symbol: impl Into<String>,
        threshold_price: f64,
        direction: AlertDirection,
        message: impl Into<String>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            threshold_price,
            direction,
            message: message.into(),
            triggered: false,
        }
    }

    pub fn is_crossed(&self, price: f64) -> bool {
        match self.direction {
            AlertDirection::Above => price > self.threshold_price,
            AlertDirection::Below => price < self.threshold_price,
            AlertDirection::Both => price != self.threshold_price,
        }
    }
}

/// Futures account snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AccountState {
    pub wallet_balance: f64,
    pub margin_balance: f64,
    pub unrealized_pnl: f64,
}

impl AccountState {
    /// Total margin balance over total wallet balance
    pub fn margin_ratio(&self) -> Option<f64> {
        if self.wallet_balance > 0.0 {
            Some(self.margin_balance / self.wallet_balance)
        } else {
            None
        }
    }
}

/// Price and quantity increments for a symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SymbolFilters {
    pub tick_size: f64,
    pub lot_size: f64,
}

impl SymbolFilters {
    /// Round a price to the nearest tick
    pub fn round_price(&self, price: f64) -> f64 {
        if self.tick_size <= 0.0 {
            return price;
        }
        (price / self.tick_size).round() * self.tick_size
    }

    /// Round a quantity down to the lot step
    pub fn floor_quantity(&self, quantity: f64) -> f64 {
        if self.lot_size <= 0.0 {
            return quantity;
        }
        let steps = quantity / self.lot_size;
        let nearest = steps.round();
        // 0.3 / 0.1 lands just under 3; only that float noise may round up
        if nearest > steps
            && nearest * self.lot_size - quantity <= quantity.abs() * 4.0 * f64::EPSILON
        {
            nearest * self.lot_size
        } else {
            steps.floor() * self.lot_size
        }
    }
}

/// Best bid/ask snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct OrderBookTop {
    pub best_bid: f64,
    pub best_ask: f64,
}

impl OrderBookTop {
    /// (ask - bid) / bid in percent
    pub fn spread_percent(&self) -> Option<f64> {
        if self.best_bid > 0.0 {
            Some((self.best_ask - self.best_bid) / self.best_bid * 100.0)
        } else {
            None
        }
    }
}

/// Rolling 24h ticker statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Stats24h {
    pub volume: f64,
    pub last_price: f64,
}

impl Stats24h {
    /// Traded volume in quote currency
    pub fn quote_volume(&self) -> f64 {
        self.volume * self.last_price
    }
}
