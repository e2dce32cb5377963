use super::alerts::{AlertBook, TargetPriceAlert};
use super::session::SessionStats;
use crate::analysis::PriceAnalyzer;
use crate::api::ExchangeGateway;
use crate::config::{EngineConfig, TradingPolicy};
use crate::error::EngineError;
use crate::indicators::calculate_atr;
use crate::models::{
    Candle, OrderId, Position, PriceAlert, Protection, Side, SymbolFilters, TrailingStop,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Why an entry was refused for this tick
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EntryRejection {
    #[error("position already open or pending")]
    AlreadyOpen,
    #[error("daily trade limit reached ({0})")]
    DailyTradeLimit(u32),
    #[error("max positions reached ({open}/{max})")]
    MaxPositions { open: usize, max: usize },
    #[error("24h volume ${volume:.0} below minimum")]
    LowVolume { volume: f64 },
    #[error("spread {spread:.4}% above maximum")]
    WideSpread { spread: f64 },
    #[error("margin ratio {ratio:.2} above maximum")]
    MarginRatio { ratio: f64 },
    #[error("volatility {volatility:.1}% above maximum")]
    HighVolatility { volatility: f64 },
    #[error("{what} unavailable: {reason}")]
    DataUnavailable { what: &'static str, reason: String },
}

/// Stop-loss / take-profit distances in percent of entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopLevels {
    pub stop_loss_percent: f64,
    pub take_profit_percent: f64,
}

impl StopLevels {
    /// Absolute (stop_loss, take_profit) prices for an entry
    pub fn prices(&self, side: Side, entry_price: f64) -> (f64, f64) {
        let sign = side.sign();
        (
            entry_price * (1.0 - sign * self.stop_loss_percent / 100.0),
            entry_price * (1.0 + sign * self.take_profit_percent / 100.0),
        )
    }
}

/// Validated order parameters for a new position
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPlan {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    /// Position notional in quote currency before lot rounding
    pub notional: f64,
}

/// A partial-close ladder level ready to execute
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PartialClose {
    pub level: usize,
    pub profit_percent: f64,
    pub close_fraction: f64,
    /// Unrounded quantity to close
    pub quantity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
}

#[derive(Debug, Clone)]
pub struct ClosedTrade {
    pub position: Position,
    pub exit_price: f64,
    pub pnl: f64,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LiquidationWarning {
    pub liquidation_price: f64,
    /// |price - liquidation| / price
    pub distance: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionStatus {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub current_price: Option<f64>,
    pub pnl_percent: Option<f64>,
    pub stop_distance_percent: Option<f64>,
    pub target_distance_percent: Option<f64>,
    pub protected: bool,
}

/// Snapshot of open positions and session counters
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub positions: Vec<PositionStatus>,
    pub session: SessionStats,
}

impl StatusReport {
    pub fn log(&self) {
        tracing::info!(
            "📊 Status: {} open position(s), {} trades, win rate {:.1}%, realized P&L ${:.2}",
            self.positions.len(),
            self.session.total_trades,
            self.session.win_rate(),
            self.session.realized_pnl
        );
        for p in &self.positions {
            tracing::info!(
                symbol = %p.symbol,
                side = %p.side,
                quantity = p.quantity,
                entry = p.entry_price,
                pnl_percent = p.pnl_percent.unwrap_or(0.0),
                to_stop_percent = p.stop_distance_percent.unwrap_or(0.0),
                to_target_percent = p.target_distance_percent.unwrap_or(0.0),
                protected = p.protected,
                "Open position"
            );
        }
    }
}

#[derive(Debug)]
struct RiskBook {
    positions: HashMap<String, Position>,
    trailing: HashMap<String, TrailingStop>,
    pending: HashSet<String>,
    alerts: AlertBook,
    targets: HashMap<String, TargetPriceAlert>,
    session: SessionStats,
}

impl RiskBook {
    fn exposure(&self) -> usize {
        self.positions.len() + self.pending.len()
    }

    fn is_busy(&self, symbol: &str) -> bool {
        self.positions.contains_key(symbol) || self.pending.contains(symbol)
    }
}

fn lock_book(book: &Mutex<RiskBook>) -> MutexGuard<'_, RiskBook> {
    book.lock().unwrap_or_else(|e| e.into_inner())
}

/// Slot held while an entry is in flight; released on drop
///
/// Pending entries count toward the position limit, so concurrent symbols
/// can't overshoot it while orders are outstanding.
#[must_use]
pub struct EntryReservation {
    book: Arc<Mutex<RiskBook>>,
    symbol: String,
}

impl Drop for EntryReservation {
    fn drop(&mut self) {
        lock_book(&self.book).pending.remove(&self.symbol);
    }
}

/// Owns the position registry, trailing stops and alerts
///
/// All state lives behind one mutex that is never held across an await, so
/// each read-modify-write for a symbol is atomic with respect to other ticks.
pub struct RiskManager {
    policy: TradingPolicy,
    liquidation_warning_ratio: f64,
    target_reset_percent: f64,
    gateway: Arc<dyn ExchangeGateway>,
    analyzer: PriceAnalyzer,
    book: Arc<Mutex<RiskBook>>,
}

impl RiskManager {
    pub fn new(
        policy: TradingPolicy,
        engine: &EngineConfig,
        gateway: Arc<dyn ExchangeGateway>,
        analyzer: PriceAnalyzer,
    ) -> Self {
        let book = RiskBook {
            positions: HashMap::new(),
            trailing: HashMap::new(),
            pending: HashSet::new(),
            alerts: AlertBook::default(),
            targets: HashMap::new(),
            session: SessionStats::new(Utc::now()),
        };
        Self {
            policy,
            liquidation_warning_ratio: engine.liquidation_warning_ratio,
            target_reset_percent: engine.target_reset_percent,
            gateway,
            analyzer,
            book: Arc::new(Mutex::new(book)),
        }
    }

    fn book(&self) -> MutexGuard<'_, RiskBook> {
        lock_book(&self.book)
    }

    pub fn policy(&self) -> &TradingPolicy {
        &self.policy
    }

    // ---------------------------------------------------------------------
    // Entry gating
    // ---------------------------------------------------------------------

    /// Run the entry gates in order, stopping at the first failure
    ///
    /// Exchange data that can't be fetched counts as a failed gate.
    pub async fn entry_check(&self, symbol: &str, price: f64) -> Result<(), EntryRejection> {
        {
            let book = self.book();
            if book.is_busy(symbol) {
                return Err(EntryRejection::AlreadyOpen);
            }
            if book
                .session
                .daily_limit_reached(self.policy.max_daily_trades, Utc::now())
            {
                return Err(EntryRejection::DailyTradeLimit(self.policy.max_daily_trades));
            }
            let open = book.exposure();
            if open >= self.policy.max_positions {
                return Err(EntryRejection::MaxPositions {
                    open,
                    max: self.policy.max_positions,
                });
            }
        }

        let stats = self
            .gateway
            .get_24h_stats(symbol)
            .await
            .map_err(|e| unavailable("24h stats", e))?;
        let volume = stats.quote_volume();
        if volume < self.policy.min_volume_usd {
            return Err(EntryRejection::LowVolume { volume });
        }

        let top = self
            .gateway
            .get_order_book_top(symbol)
            .await
            .map_err(|e| unavailable("order book", e))?;
        let spread = top
            .spread_percent()
            .ok_or_else(|| unavailable("order book", "empty bid side"))?;
        if spread > self.policy.max_spread_percent {
            return Err(EntryRejection::WideSpread { spread });
        }

        let account = self
            .gateway
            .get_account_state()
            .await
            .map_err(|e| unavailable("account", e))?;
        let ratio = account
            .margin_ratio()
            .ok_or_else(|| unavailable("account", "zero wallet balance"))?;
        if ratio > self.policy.max_margin_ratio {
            return Err(EntryRejection::MarginRatio { ratio });
        }

        match self.analyzer.volatility(symbol) {
            Some(volatility) if volatility > self.policy.max_volatility => {
                return Err(EntryRejection::HighVolatility { volatility });
            }
            Some(_) => {}
            None => tracing::debug!(
                symbol = %symbol,
                samples = self.analyzer.sample_count(symbol),
                "Volatility not known yet, gate skipped"
            ),
        }

        tracing::debug!(symbol = %symbol, price = %price, "Entry gates passed");
        Ok(())
    }

    pub async fn can_enter(&self, symbol: &str, price: f64) -> bool {
        match self.entry_check(symbol, price).await {
            Ok(()) => true,
            Err(rejection) => {
                match &rejection {
                    EntryRejection::DataUnavailable { .. } => {
                        tracing::warn!(symbol = %symbol, "Entry rejected: {}", rejection)
                    }
                    _ => tracing::info!(symbol = %symbol, "Entry rejected: {}", rejection),
                }
                false
            }
        }
    }

    /// Claim an entry slot for `symbol`; `None` if busy or at the position limit
    pub fn reserve_entry(&self, symbol: &str) -> Option<EntryReservation> {
        let mut book = self.book();
        if book.is_busy(symbol) || book.exposure() >= self.policy.max_positions {
            return None;
        }
        book.pending.insert(symbol.to_string());
        Some(EntryReservation {
            book: Arc::clone(&self.book),
            symbol: symbol.to_string(),
        })
    }

    // ---------------------------------------------------------------------
    // Stops and sizing
    // ---------------------------------------------------------------------

    /// ATR-scaled stop distance clamped to the policy bounds, with the
    /// policy's static percentages as fallback
    pub fn dynamic_stops(&self, candles: &[Candle], price: f64) -> StopLevels {
        let atr = calculate_atr(candles, self.policy.atr_period).filter(|atr| atr.is_finite());

        match atr {
            Some(atr) if price > 0.0 => {
                let raw = atr * self.policy.atr_multiplier / price * 100.0;
                let stop_loss_percent =
                    raw.clamp(self.policy.min_stop_loss, self.policy.max_stop_loss);
                StopLevels {
                    stop_loss_percent,
                    take_profit_percent: stop_loss_percent * self.policy.reward_ratio,
                }
            }
            _ => {
                tracing::warn!(
                    candles = candles.len(),
                    "ATR unavailable, using default stop/target"
                );
                StopLevels {
                    stop_loss_percent: self.policy.default_stop_loss_percent,
                    take_profit_percent: self.policy.default_take_profit_percent,
                }
            }
        }
    }

    /// Risk-based notional, capped by `validate_position_size`
    pub fn position_size(&self, balance: f64, entry_price: f64, stop_loss_price: f64) -> f64 {
        if balance <= 0.0 || entry_price <= 0.0 {
            return 0.0;
        }
        let stop_diff_percent = (entry_price - stop_loss_price).abs() / entry_price * 100.0;
        if stop_diff_percent <= 0.0 {
            return 0.0;
        }

        let raw = balance * self.policy.risk_per_trade / stop_diff_percent
            * self.policy.leverage as f64;
        self.validate_position_size(raw, balance)
    }

    /// Clamp to `[0, max_position_fraction * balance]`
    pub fn validate_position_size(&self, size: f64, balance: f64) -> f64 {
        let cap = (balance * self.policy.max_position_fraction).max(0.0);
        if size > cap {
            tracing::debug!("Position size capped at ${:.2}", cap);
        }
        size.max(0.0).min(cap)
    }

    /// Compute stops, size and exchange-rounded quantity for an entry
    pub fn plan_entry(
        &self,
        symbol: &str,
        side: Side,
        price: f64,
        candles: &[Candle],
        balance: f64,
        filters: &SymbolFilters,
    ) -> crate::Result<EntryPlan> {
        if !(price > 0.0) {
            return Err(EngineError::Validation(format!(
                "invalid entry price {} for {}",
                price, symbol
            )));
        }

        let levels = self.dynamic_stops(candles, price);
        let (stop_loss, take_profit) = levels.prices(side, price);
        let stop_loss_price = filters.round_price(stop_loss);
        let take_profit_price = filters.round_price(take_profit);

        let ordered = match side {
            Side::Long => stop_loss_price < price && price < take_profit_price,
            Side::Short => take_profit_price < price && price < stop_loss_price,
        };
        if !ordered {
            return Err(EngineError::Validation(format!(
                "{} stops collapse after tick rounding (sl {}, tp {}, entry {})",
                symbol, stop_loss_price, take_profit_price, price
            )));
        }

        let notional = self.position_size(balance, price, stop_loss_price);
        let quantity = filters.floor_quantity(notional / price);
        if quantity <= 0.0 {
            return Err(EngineError::Validation(format!(
                "{} quantity rounds to zero (notional ${:.2}, lot {})",
                symbol, notional, filters.lot_size
            )));
        }

        Ok(EntryPlan {
            symbol: symbol.to_string(),
            side,
            quantity,
            entry_price: price,
            stop_loss_price,
            take_profit_price,
            notional,
        })
    }

    // ---------------------------------------------------------------------
    // Position registry
    // ---------------------------------------------------------------------

    pub fn record_position(&self, position: Position) {
        let mut book = self.book();
        book.session.record_entry(position.opened_at);
        book.trailing.remove(&position.symbol);
        tracing::info!(
            symbol = %position.symbol,
            side = %position.side,
            quantity = position.quantity,
            entry = position.entry_price,
            stop_loss = position.stop_loss_price,
            take_profit = position.take_profit_price,
            "Position recorded"
        );
        book.positions.insert(position.symbol.clone(), position);
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.book().positions.get(symbol).cloned()
    }

    pub fn open_count(&self) -> usize {
        self.book().positions.len()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.book().positions.contains_key(symbol)
    }

    pub fn mark_unprotected(&self, symbol: &str, reason: &str) {
        if let Some(position) = self.book().positions.get_mut(symbol) {
            position.protection = Protection::Unprotected;
            tracing::error!(symbol = %symbol, reason = %reason, "🚨 Position is UNPROTECTED");
        }
    }

    /// Replace the tracked protective order ids after a resize
    pub fn set_protection(
        &self,
        symbol: &str,
        stop_order: Option<OrderId>,
        take_profit_order: Option<OrderId>,
    ) {
        if let Some(position) = self.book().positions.get_mut(symbol) {
            position.protection = if stop_order.is_some() && take_profit_order.is_some() {
                Protection::Protected
            } else {
                Protection::Unprotected
            };
            position.stop_order = stop_order;
            position.take_profit_order = take_profit_order;
        }
    }

    // ---------------------------------------------------------------------
    // Trailing stop
    // ---------------------------------------------------------------------

    /// Returns a better stop price to place for `price`, if any
    ///
    /// Only the first favorable tick initializes state here. The best price
    /// and the stop advance through `commit_stop`, once the exchange order
    /// has been replaced.
    pub fn trailing_candidate(&self, symbol: &str, price: f64) -> Option<f64> {
        let mut book = self.book();
        let position = book.positions.get(symbol)?.clone();

        let Some(trailing) = book.trailing.get_mut(symbol) else {
            if position.pnl_percent(price) > 0.0 {
                let distance_percent =
                    (price - position.stop_loss_price).abs() / price * 100.0;
                book.trailing.insert(
                    symbol.to_string(),
                    TrailingStop {
                        best_price: price,
                        stop_price: position.stop_loss_price,
                        distance_percent,
                    },
                );
                tracing::debug!(
                    symbol = %symbol,
                    distance_percent = distance_percent,
                    "Trailing stop initialized"
                );
            }
            return None;
        };

        let candidate = match position.side {
            Side::Long if price > trailing.best_price => {
                price * (1.0 - trailing.distance_percent / 100.0)
            }
            Side::Short if price < trailing.best_price => {
                price * (1.0 + trailing.distance_percent / 100.0)
            }
            _ => return None,
        };

        let improves = match position.side {
            Side::Long => candidate > trailing.stop_price,
            Side::Short => candidate < trailing.stop_price,
        };
        improves.then_some(candidate)
    }

    /// Record a replaced stop order placed for the tick at `trigger_price`.
    /// Moves against the position are ignored.
    pub fn commit_stop(
        &self,
        symbol: &str,
        stop_price: f64,
        trigger_price: f64,
        order: Option<OrderId>,
    ) -> bool {
        let mut book = self.book();
        let RiskBook {
            positions,
            trailing,
            ..
        } = &mut *book;

        let Some(position) = positions.get_mut(symbol) else {
            return false;
        };
        let improves = match position.side {
            Side::Long => stop_price > position.stop_loss_price,
            Side::Short => stop_price < position.stop_loss_price,
        };
        if !improves {
            return false;
        }

        let previous = position.stop_loss_price;
        position.stop_loss_price = stop_price;
        position.stop_order = order;
        if let Some(trailing) = trailing.get_mut(symbol) {
            trailing.stop_price = stop_price;
            let better = match position.side {
                Side::Long => trigger_price > trailing.best_price,
                Side::Short => trigger_price < trailing.best_price,
            };
            if better {
                trailing.best_price = trigger_price;
            }
        }

        tracing::info!(
            symbol = %symbol,
            from = previous,
            to = stop_price,
            "📈 Trailing stop moved"
        );
        true
    }

    pub fn trailing_stop(&self, symbol: &str) -> Option<TrailingStop> {
        self.book().trailing.get(symbol).copied()
    }

    // ---------------------------------------------------------------------
    // Partial-close ladder
    // ---------------------------------------------------------------------

    /// First ladder level reached by `price` that hasn't fired for this position
    pub fn check_partial_close(&self, symbol: &str, price: f64) -> Option<PartialClose> {
        let book = self.book();
        let position = book.positions.get(symbol)?;
        let pnl_percent = position.pnl_percent(price);

        self.policy
            .partial_close_levels
            .iter()
            .enumerate()
            .filter(|(index, _)| !position.fired_levels.contains(index))
            .find(|(_, level)| pnl_percent >= level.profit_percent)
            .map(|(level, rung)| PartialClose {
                level,
                profit_percent: rung.profit_percent,
                close_fraction: rung.close_fraction,
                quantity: position.quantity * rung.close_fraction,
            })
    }

    /// Reduce the position after a partial fill and consume the level
    ///
    /// Returns the updated position, or `None` if it no longer exists or
    /// was closed out entirely.
    pub fn apply_partial_close(
        &self,
        symbol: &str,
        level: usize,
        closed_quantity: f64,
        price: f64,
    ) -> Option<Position> {
        let now = Utc::now();
        let mut book = self.book();
        let position = book.positions.get_mut(symbol)?;

        // A level can never close more than the position was opened with
        let closed = closed_quantity
            .min(position.quantity.min(position.initial_quantity))
            .max(0.0);
        let pnl = (price - position.entry_price) * closed * position.side.sign();
        position.quantity -= closed;
        position.realized_pnl += pnl;
        if !position.fired_levels.contains(&level) {
            position.fired_levels.push(level);
        }

        tracing::info!(
            symbol = %symbol,
            level = level,
            closed = closed,
            remaining = position.quantity,
            pnl = pnl,
            "💰 Partial close"
        );

        if position.quantity <= f64::EPSILON {
            let trade_pnl = position.realized_pnl;
            book.positions.remove(symbol);
            book.trailing.remove(symbol);
            book.session.record_close(pnl, trade_pnl, now);
            return None;
        }

        let updated = position.clone();
        book.session.record_partial(pnl, now);
        Some(updated)
    }

    /// Consume a level without trading (its quantity rounded to zero)
    pub fn mark_level_consumed(&self, symbol: &str, level: usize) {
        if let Some(position) = self.book().positions.get_mut(symbol) {
            if !position.fired_levels.contains(&level) {
                position.fired_levels.push(level);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Exits
    // ---------------------------------------------------------------------

    /// Which live protective order `price` has crossed, if any
    pub fn check_exit(&self, symbol: &str, price: f64) -> Option<ExitReason> {
        let book = self.book();
        let position = book.positions.get(symbol)?;

        let (hit_stop, hit_target) = match position.side {
            Side::Long => (
                price <= position.stop_loss_price,
                price >= position.take_profit_price,
            ),
            Side::Short => (
                price >= position.stop_loss_price,
                price <= position.take_profit_price,
            ),
        };

        // Only orders actually resting on the exchange can fill
        if hit_stop && position.stop_order.is_some() {
            Some(ExitReason::StopLoss)
        } else if hit_target && position.take_profit_order.is_some() {
            Some(ExitReason::TakeProfit)
        } else {
            None
        }
    }

    /// Remove a fully closed position and record the trade
    pub fn close_position(
        &self,
        symbol: &str,
        exit_price: f64,
        reason: ExitReason,
    ) -> Option<ClosedTrade> {
        let mut book = self.book();
        let position = book.positions.remove(symbol)?;
        book.trailing.remove(symbol);

        let leg_pnl = position.unrealized_pnl(exit_price);
        let pnl = position.realized_pnl + leg_pnl;
        book.session.record_close(leg_pnl, pnl, Utc::now());

        tracing::info!(
            symbol = %symbol,
            reason = ?reason,
            exit = exit_price,
            pnl = pnl,
            "Position closed"
        );

        Some(ClosedTrade {
            position,
            exit_price,
            pnl,
            reason,
        })
    }

    // ---------------------------------------------------------------------
    // Liquidation
    // ---------------------------------------------------------------------

    /// Approximate isolated-margin liquidation price
    pub fn liquidation_price(&self, position: &Position) -> f64 {
        let leverage = self.policy.leverage.max(1) as f64;
        position.entry_price * (1.0 - position.side.sign() / leverage)
    }

    /// Advisory warning when price is within the proximity band of liquidation
    pub fn check_liquidation(&self, symbol: &str, price: f64) -> Option<LiquidationWarning> {
        if price <= 0.0 {
            return None;
        }
        let position = self.position(symbol)?;
        let liquidation_price = self.liquidation_price(&position);
        let distance = (price - liquidation_price).abs() / price;

        (distance < self.liquidation_warning_ratio).then_some(LiquidationWarning {
            liquidation_price,
            distance,
        })
    }

    // ---------------------------------------------------------------------
    // Alerts
    // ---------------------------------------------------------------------

    pub fn add_alert(&self, alert: PriceAlert) {
        self.book().alerts.add(alert);
    }

    /// Newly triggered generic alerts for this tick
    pub fn check_alerts(&self, symbol: &str, price: f64) -> Vec<PriceAlert> {
        self.book().alerts.check(symbol, price)
    }

    /// Install or move the entry target; a moved target keeps its latch
    pub fn set_target(&self, symbol: &str, target: f64) {
        let reset_percent = self.target_reset_percent;
        self.book()
            .targets
            .entry(symbol.to_string())
            .and_modify(|alert| alert.target = target)
            .or_insert_with(|| TargetPriceAlert::new(target, reset_percent));
    }

    pub fn target(&self, symbol: &str) -> Option<f64> {
        self.book().targets.get(symbol).map(|t| t.target)
    }

    /// True on the tick where price reaches the entry target
    pub fn check_target(&self, symbol: &str, price: f64) -> bool {
        self.book()
            .targets
            .get_mut(symbol)
            .map(|alert| alert.update(price))
            .unwrap_or(false)
    }

    // ---------------------------------------------------------------------
    // Reporting
    // ---------------------------------------------------------------------

    pub fn session(&self) -> SessionStats {
        self.book().session.clone()
    }

    pub fn status(&self, prices: &HashMap<String, f64>) -> StatusReport {
        let book = self.book();
        let mut positions: Vec<PositionStatus> = book
            .positions
            .values()
            .map(|p| {
                let current_price = prices.get(&p.symbol).copied();
                let distance = |level: f64| current_price.map(|c| (level - c).abs() / c * 100.0);
                PositionStatus {
                    symbol: p.symbol.clone(),
                    side: p.side,
                    quantity: p.quantity,
                    entry_price: p.entry_price,
                    current_price,
                    pnl_percent: current_price.map(|c| p.pnl_percent(c)),
                    stop_distance_percent: distance(p.stop_loss_price),
                    target_distance_percent: distance(p.take_profit_price),
                    protected: p.is_protected(),
                }
            })
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        StatusReport {
            positions,
            session: book.session.clone(),
        }
    }
}

fn unavailable(what: &'static str, reason: impl std::fmt::Display) -> EntryRejection {
    EntryRejection::DataUnavailable {
        what,
        reason: reason.to_string(),
    }
}
