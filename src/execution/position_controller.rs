use crate::api::{notify_detached, ExchangeGateway, Notifier};
use crate::error::EngineError;
use crate::models::{OrderId, Position, Protection, Side, StopKind, SymbolFilters};
use crate::risk::{ClosedTrade, EntryPlan, EntryReservation, ExitReason, PartialClose, RiskManager};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Result of executing one ladder level
#[derive(Debug, Clone, PartialEq)]
pub enum PartialOutcome {
    /// Level quantity rounded to zero lots; consumed without trading
    Skipped,
    Closed {
        quantity: f64,
        /// `None` once nothing is left
        remaining: Option<Position>,
    },
}

/// Executes position lifecycle orders and keeps the risk book in step
///
/// Every exchange call happens outside the risk book lock; the book is only
/// updated once the exchange has confirmed the order.
pub struct PositionController {
    gateway: Arc<dyn ExchangeGateway>,
    risk: Arc<RiskManager>,
    notifier: Arc<dyn Notifier>,
    leverage_set: Mutex<HashSet<String>>,
}

impl PositionController {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        risk: Arc<RiskManager>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            gateway,
            risk,
            notifier,
            leverage_set: Mutex::new(HashSet::new()),
        }
    }

    pub async fn filters(&self, symbol: &str) -> crate::Result<SymbolFilters> {
        Ok(self.gateway.get_symbol_filters(symbol).await?)
    }

    /// Set leverage once per symbol; failures only log
    async fn ensure_leverage(&self, symbol: &str) {
        let already = self
            .leverage_set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(symbol);
        if already {
            return;
        }

        let leverage = self.risk.policy().leverage;
        match self.gateway.set_leverage(symbol, leverage).await {
            Ok(()) => {
                tracing::info!(symbol = %symbol, "Leverage set to {}x", leverage);
                self.leverage_set
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(symbol.to_string());
            }
            Err(e) => tracing::warn!(symbol = %symbol, "Failed to set leverage: {}", e),
        }
    }

    fn alert_unprotected(&self, symbol: &str, reason: &str) {
        self.risk.mark_unprotected(symbol, reason);
        notify_detached(
            &self.notifier,
            format!("🚨 {} position is UNPROTECTED: {}", symbol, reason),
        );
    }

    /// Market entry followed by stop-loss and take-profit orders
    ///
    /// A failed entry order is an error. Failed protective orders are not:
    /// the position is recorded as `Unprotected` and returned.
    pub async fn open(
        &self,
        plan: &EntryPlan,
        reservation: EntryReservation,
    ) -> crate::Result<Position> {
        let symbol = plan.symbol.as_str();
        self.ensure_leverage(symbol).await;

        tracing::info!(
            symbol = %symbol,
            side = %plan.side,
            quantity = plan.quantity,
            price = plan.entry_price,
            "Opening position"
        );
        self.gateway
            .place_market_order(symbol, plan.side.entry_order(), plan.quantity)
            .await?;

        let exit = plan.side.exit_order();
        let stop_order = self
            .gateway
            .place_stop_order(
                symbol,
                exit,
                plan.stop_loss_price,
                plan.quantity,
                StopKind::StopLoss,
            )
            .await;
        let take_profit_order = self
            .gateway
            .place_stop_order(
                symbol,
                exit,
                plan.take_profit_price,
                plan.quantity,
                StopKind::TakeProfit,
            )
            .await;

        let mut failures = Vec::new();
        if let Err(e) = &stop_order {
            failures.push(format!("stop-loss rejected: {}", e));
        }
        if let Err(e) = &take_profit_order {
            failures.push(format!("take-profit rejected: {}", e));
        }

        let position = Position {
            symbol: plan.symbol.clone(),
            side: plan.side,
            quantity: plan.quantity,
            initial_quantity: plan.quantity,
            entry_price: plan.entry_price,
            stop_loss_price: plan.stop_loss_price,
            take_profit_price: plan.take_profit_price,
            opened_at: Utc::now(),
            stop_order: stop_order.ok(),
            take_profit_order: take_profit_order.ok(),
            protection: if failures.is_empty() {
                Protection::Protected
            } else {
                Protection::Unprotected
            },
            fired_levels: Vec::new(),
            realized_pnl: 0.0,
        };

        self.risk.record_position(position.clone());
        drop(reservation);

        if failures.is_empty() {
            notify_detached(
                &self.notifier,
                format!(
                    "Opened {} {} x{} @ {} (SL {}, TP {})",
                    plan.side,
                    symbol,
                    plan.quantity,
                    plan.entry_price,
                    plan.stop_loss_price,
                    plan.take_profit_price
                ),
            );
        } else {
            self.alert_unprotected(symbol, &failures.join("; "));
        }

        Ok(position)
    }

    /// Cancel the current stop and place a better one
    ///
    /// `trigger_price` is the tick the stop was computed from; the trailing
    /// state only advances to it once the new order is resting.
    /// Returns `Ok(false)` when the tick-rounded price is no improvement.
    /// If the new stop can't be placed after the old one was cancelled, the
    /// position is marked unprotected and `EngineError::Unprotected` returned.
    pub async fn replace_stop(
        &self,
        symbol: &str,
        stop_price: f64,
        trigger_price: f64,
    ) -> crate::Result<bool> {
        let Some(position) = self.risk.position(symbol) else {
            return Ok(false);
        };
        let filters = self.filters(symbol).await?;
        let stop_price = filters.round_price(stop_price);

        let improves = match position.side {
            Side::Long => stop_price > position.stop_loss_price,
            Side::Short => stop_price < position.stop_loss_price,
        };
        if !improves {
            return Ok(false);
        }

        // Old stop stays in place if the cancel fails
        if let Some(order_id) = &position.stop_order {
            self.gateway.cancel_order(symbol, order_id).await?;
        }

        match self
            .gateway
            .place_stop_order(
                symbol,
                position.side.exit_order(),
                stop_price,
                position.quantity,
                StopKind::StopLoss,
            )
            .await
        {
            Ok(order_id) => Ok(self
                .risk
                .commit_stop(symbol, stop_price, trigger_price, Some(order_id))),
            Err(e) => {
                let reason = format!("trailing stop replacement failed: {}", e);
                self.risk
                    .set_protection(symbol, None, position.take_profit_order.clone());
                self.alert_unprotected(symbol, &reason);
                Err(EngineError::Unprotected {
                    symbol: symbol.to_string(),
                    reason,
                })
            }
        }
    }

    /// Execute one partial-close level at market
    pub async fn partial_close(
        &self,
        symbol: &str,
        close: PartialClose,
        price: f64,
    ) -> crate::Result<PartialOutcome> {
        let Some(position) = self.risk.position(symbol) else {
            return Ok(PartialOutcome::Skipped);
        };
        let filters = self.filters(symbol).await?;
        let quantity = filters.floor_quantity(close.quantity.min(position.quantity));

        if quantity <= 0.0 {
            tracing::debug!(
                symbol = %symbol,
                level = close.level,
                "Partial close below lot size, level consumed"
            );
            self.risk.mark_level_consumed(symbol, close.level);
            return Ok(PartialOutcome::Skipped);
        }

        self.gateway
            .place_market_order(symbol, position.side.exit_order(), quantity)
            .await?;

        let remaining = self
            .risk
            .apply_partial_close(symbol, close.level, quantity, price);

        match &remaining {
            Some(updated) => self.resize_protection(updated).await?,
            None => self.cancel_protection(&position).await,
        }

        notify_detached(
            &self.notifier,
            format!(
                "Partial close {} {:.0}% at +{:.2}%: {} closed",
                symbol,
                close.close_fraction * 100.0,
                close.profit_percent,
                quantity
            ),
        );

        Ok(PartialOutcome::Closed {
            quantity,
            remaining,
        })
    }

    /// Replace both protective orders to cover the current quantity
    pub async fn resize_protection(&self, position: &Position) -> crate::Result<()> {
        let symbol = position.symbol.as_str();
        self.cancel_protection(position).await;

        let exit = position.side.exit_order();
        let stop = self
            .gateway
            .place_stop_order(
                symbol,
                exit,
                position.stop_loss_price,
                position.quantity,
                StopKind::StopLoss,
            )
            .await;
        let take_profit = self
            .gateway
            .place_stop_order(
                symbol,
                exit,
                position.take_profit_price,
                position.quantity,
                StopKind::TakeProfit,
            )
            .await;

        let failure = match (&stop, &take_profit) {
            (Ok(_), Ok(_)) => None,
            (Err(e), _) | (_, Err(e)) => Some(format!("protective order resize failed: {}", e)),
        };
        self.risk
            .set_protection(symbol, stop.ok(), take_profit.ok());

        match failure {
            None => {
                tracing::debug!(
                    symbol = %symbol,
                    quantity = position.quantity,
                    "Protective orders resized"
                );
                Ok(())
            }
            Some(reason) => {
                self.alert_unprotected(symbol, &reason);
                Err(EngineError::Unprotected {
                    symbol: symbol.to_string(),
                    reason,
                })
            }
        }
    }

    /// Best-effort cancel of both protective orders
    async fn cancel_protection(&self, position: &Position) {
        for order_id in [&position.stop_order, &position.take_profit_order]
            .into_iter()
            .flatten()
        {
            self.cancel_quietly(&position.symbol, order_id).await;
        }
    }

    async fn cancel_quietly(&self, symbol: &str, order_id: &OrderId) {
        if let Err(e) = self.gateway.cancel_order(symbol, order_id).await {
            tracing::warn!(symbol = %symbol, order_id = %order_id, "Cancel failed: {}", e);
        }
    }

    /// A protective order filled: drop the position and cancel the other leg
    pub async fn close_on_exit(
        &self,
        symbol: &str,
        reason: ExitReason,
        price: f64,
    ) -> Option<ClosedTrade> {
        let trade = self.risk.close_position(symbol, price, reason)?;

        let sibling = match reason {
            ExitReason::StopLoss => &trade.position.take_profit_order,
            ExitReason::TakeProfit => &trade.position.stop_order,
        };
        if let Some(order_id) = sibling {
            self.cancel_quietly(symbol, order_id).await;
        }

        notify_detached(
            &self.notifier,
            format!(
                "Closed {} {} by {:?} @ {} (P&L ${:.2})",
                trade.position.side, symbol, reason, price, trade.pnl
            ),
        );
        Some(trade)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::PriceAnalyzer;
    use crate::api::{LogNotifier, PaperExchange, PaperOp, PaperOrderType};
    use crate::config::{EngineConfig, TradingPolicy};

    fn setup() -> (PositionController, Arc<RiskManager>, PaperExchange) {
        let exchange = PaperExchange::new(10_000.0);
        exchange.list_symbol("BTCUSDT", 100.0);
        exchange.set_filters(
            "BTCUSDT",
            SymbolFilters {
                tick_size: 0.01,
                lot_size: 0.1,
            },
        );
        let gateway: Arc<dyn ExchangeGateway> = Arc::new(exchange.clone());
        let risk = Arc::new(RiskManager::new(
            TradingPolicy::default(),
            &EngineConfig::default(),
            gateway.clone(),
            PriceAnalyzer::default(),
        ));
        let controller = PositionController::new(gateway, risk.clone(), Arc::new(LogNotifier));
        (controller, risk, exchange)
    }

    fn plan(quantity: f64) -> EntryPlan {
        EntryPlan {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            quantity,
            entry_price: 100.0,
            stop_loss_price: 98.0,
            take_profit_price: 103.0,
            notional: quantity * 100.0,
        }
    }

    #[tokio::test]
    async fn test_open_places_entry_and_protection() {
        let (controller, risk, exchange) = setup();
        let reservation = risk.reserve_entry("BTCUSDT").unwrap();

        let position = controller.open(&plan(10.0), reservation).await.unwrap();

        assert!(position.is_protected());
        assert_eq!(exchange.market_orders("BTCUSDT").len(), 1);
        assert_eq!(exchange.open_stop_orders("BTCUSDT").len(), 2);
        assert_eq!(exchange.leverage("BTCUSDT"), Some(3));
        assert!(risk.has_position("BTCUSDT"));
        // Reservation released once recorded
        assert!(risk.reserve_entry("ETHUSDT").is_some());
    }

    #[tokio::test]
    async fn test_failed_entry_records_nothing() {
        let (controller, risk, exchange) = setup();
        exchange.fail_next(PaperOp::MarketOrder, 1);
        let reservation = risk.reserve_entry("BTCUSDT").unwrap();

        assert!(controller.open(&plan(10.0), reservation).await.is_err());
        assert!(!risk.has_position("BTCUSDT"));
        assert!(exchange.open_stop_orders("BTCUSDT").is_empty());
        assert!(risk.reserve_entry("BTCUSDT").is_some());
    }

    #[tokio::test]
    async fn test_failed_protection_marks_unprotected() {
        let (controller, risk, exchange) = setup();
        exchange.fail_next(PaperOp::StopOrder(StopKind::TakeProfit), 1);
        let reservation = risk.reserve_entry("BTCUSDT").unwrap();

        let position = controller.open(&plan(10.0), reservation).await.unwrap();

        assert_eq!(position.protection, Protection::Unprotected);
        assert!(position.stop_order.is_some());
        assert!(position.take_profit_order.is_none());
        assert!(!risk.position("BTCUSDT").unwrap().is_protected());
    }

    #[tokio::test]
    async fn test_partial_close_resizes_protection() {
        let (controller, risk, exchange) = setup();
        let reservation = risk.reserve_entry("BTCUSDT").unwrap();
        controller.open(&plan(10.0), reservation).await.unwrap();

        let close = risk.check_partial_close("BTCUSDT", 101.0).unwrap();
        let outcome = controller
            .partial_close("BTCUSDT", close, 101.0)
            .await
            .unwrap();

        let PartialOutcome::Closed { quantity, remaining } = outcome else {
            panic!("expected a close");
        };
        assert!((quantity - 3.0).abs() < 1e-9);
        let remaining = remaining.unwrap();
        assert!((remaining.quantity - 7.0).abs() < 1e-9);

        let stops = exchange.open_stop_orders("BTCUSDT");
        assert_eq!(stops.len(), 2);
        assert!(stops.iter().all(|o| (o.quantity - 7.0).abs() < 1e-9));

        let market = exchange.market_orders("BTCUSDT");
        assert_eq!(market.len(), 2);
        assert_eq!(market[1].side, crate::models::OrderSide::Sell);
    }

    #[tokio::test]
    async fn test_partial_close_below_lot_consumes_level() {
        let (controller, risk, exchange) = setup();
        let reservation = risk.reserve_entry("BTCUSDT").unwrap();
        controller.open(&plan(0.2), reservation).await.unwrap();

        // 0.3 * 0.2 = 0.06, under the 0.1 lot
        let close = risk.check_partial_close("BTCUSDT", 101.0).unwrap();
        let outcome = controller
            .partial_close("BTCUSDT", close, 101.0)
            .await
            .unwrap();

        assert_eq!(outcome, PartialOutcome::Skipped);
        assert_eq!(exchange.market_orders("BTCUSDT").len(), 1);
        assert_eq!(risk.position("BTCUSDT").unwrap().fired_levels, vec![0]);
    }

    #[tokio::test]
    async fn test_replace_stop_two_phase() {
        let (controller, risk, exchange) = setup();
        let reservation = risk.reserve_entry("BTCUSDT").unwrap();
        controller.open(&plan(1.0), reservation).await.unwrap();

        assert!(controller.replace_stop("BTCUSDT", 99.504, 101.0).await.unwrap());
        let position = risk.position("BTCUSDT").unwrap();
        assert!((position.stop_loss_price - 99.5).abs() < 1e-9);

        let stops: Vec<_> = exchange
            .open_stop_orders("BTCUSDT")
            .into_iter()
            .filter(|o| o.order_type == PaperOrderType::Stop(StopKind::StopLoss))
            .collect();
        assert_eq!(stops.len(), 1);
        assert_eq!(Some(stops[0].id.clone()), position.stop_order);

        // Never moves against the position
        assert!(!controller.replace_stop("BTCUSDT", 99.0, 100.5).await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_stop_failure_leaves_unprotected() {
        let (controller, risk, exchange) = setup();
        let reservation = risk.reserve_entry("BTCUSDT").unwrap();
        controller.open(&plan(1.0), reservation).await.unwrap();

        exchange.fail_next(PaperOp::StopOrder(StopKind::StopLoss), 1);
        let result = controller.replace_stop("BTCUSDT", 99.5, 101.0).await;

        assert!(matches!(result, Err(EngineError::Unprotected { .. })));
        let position = risk.position("BTCUSDT").unwrap();
        assert!(!position.is_protected());
        assert!(position.stop_order.is_none());
        assert_eq!(position.stop_loss_price, 98.0);
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_trailing_best_price() {
        let (controller, risk, exchange) = setup();
        let reservation = risk.reserve_entry("BTCUSDT").unwrap();
        controller.open(&plan(1.0), reservation).await.unwrap();
        assert!(risk.trailing_candidate("BTCUSDT", 101.0).is_none());

        let candidate = risk.trailing_candidate("BTCUSDT", 104.0).unwrap();
        exchange.fail_next(PaperOp::StopOrder(StopKind::StopLoss), 1);
        assert!(controller.replace_stop("BTCUSDT", candidate, 104.0).await.is_err());
        assert_eq!(risk.trailing_stop("BTCUSDT").unwrap().best_price, 101.0);

        // The next tick at the same price retries the same stop
        assert_eq!(risk.trailing_candidate("BTCUSDT", 104.0), Some(candidate));
        assert!(controller.replace_stop("BTCUSDT", candidate, 104.0).await.unwrap());
        let trailing = risk.trailing_stop("BTCUSDT").unwrap();
        assert_eq!(trailing.best_price, 104.0);
        assert!(risk.position("BTCUSDT").unwrap().stop_order.is_some());
    }

    #[tokio::test]
    async fn test_close_on_exit_cancels_sibling() {
        let (controller, risk, exchange) = setup();
        let reservation = risk.reserve_entry("BTCUSDT").unwrap();
        controller.open(&plan(1.0), reservation).await.unwrap();

        let trade = controller
            .close_on_exit("BTCUSDT", ExitReason::TakeProfit, 103.0)
            .await
            .unwrap();

        assert!((trade.pnl - 3.0).abs() < 1e-9);
        assert!(!risk.has_position("BTCUSDT"));
        // Take-profit filled on the exchange; only the stop-loss was ours to cancel
        let open = exchange.open_stop_orders("BTCUSDT");
        assert_eq!(open.len(), 1);
        assert_eq!(
            open[0].order_type,
            PaperOrderType::Stop(StopKind::TakeProfit)
        );
        assert_eq!(risk.session().win_rate(), 100.0);
    }
}
