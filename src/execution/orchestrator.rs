use super::position_controller::{PartialOutcome, PositionController};
use crate::analysis::PriceAnalyzer;
use crate::api::{notify_detached, ExchangeGateway, Notifier};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::feed::{FeedEvent, FeedEvents};
use crate::indicators::entry_target_price;
use crate::models::{Candle, PriceAlert, Side, Tick};
use crate::risk::{ExitReason, RiskManager, StatusReport};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Observable outcome of processing one feed event
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    EntryOpened {
        symbol: String,
        side: Side,
        quantity: f64,
        entry_price: f64,
    },
    EntryRejected {
        symbol: String,
        reason: String,
    },
    PartialClosed {
        symbol: String,
        level: usize,
        quantity: f64,
        remaining: f64,
    },
    StopMoved {
        symbol: String,
        stop_price: f64,
    },
    PositionClosed {
        symbol: String,
        reason: ExitReason,
        pnl: f64,
    },
    /// High severity: an open position has no working stop-loss or take-profit
    UnprotectedPosition {
        symbol: String,
        reason: String,
    },
    LiquidationWarning {
        symbol: String,
        liquidation_price: f64,
        distance: f64,
    },
    AlertTriggered(PriceAlert),
    FeedDegraded {
        symbol: String,
        attempt: u32,
    },
    FeedRecovered {
        symbol: String,
    },
    FeedFailed {
        symbol: String,
    },
}

#[derive(Debug, Default)]
struct SymbolState {
    last_price: Option<f64>,
    last_logged: Option<f64>,
    degraded: bool,
}

/// Wires feed events through the analyzer, risk manager and controller
pub struct Orchestrator {
    config: EngineConfig,
    analyzer: PriceAnalyzer,
    risk: Arc<RiskManager>,
    controller: Arc<PositionController>,
    gateway: Arc<dyn ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    symbols: Mutex<HashMap<String, SymbolState>>,
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        analyzer: PriceAnalyzer,
        risk: Arc<RiskManager>,
        controller: Arc<PositionController>,
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            analyzer,
            risk,
            controller,
            gateway,
            notifier,
            symbols: Mutex::new(HashMap::new()),
        }
    }

    fn symbols(&self) -> MutexGuard<'_, HashMap<String, SymbolState>> {
        self.symbols.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn risk(&self) -> &Arc<RiskManager> {
        &self.risk
    }

    pub fn is_degraded(&self, symbol: &str) -> bool {
        self.symbols()
            .get(symbol)
            .map(|s| s.degraded)
            .unwrap_or(false)
    }

    pub fn last_prices(&self) -> HashMap<String, f64> {
        self.symbols()
            .iter()
            .filter_map(|(symbol, state)| state.last_price.map(|p| (symbol.clone(), p)))
            .collect()
    }

    pub fn status(&self) -> StatusReport {
        self.risk.status(&self.last_prices())
    }

    /// Route one feed event
    pub async fn handle_event(&self, event: FeedEvent) -> Vec<EngineEvent> {
        match event {
            FeedEvent::Tick(tick) => self.process_tick(&tick).await,
            FeedEvent::ConnectionLost { symbol, attempt } => {
                self.symbols().entry(symbol.clone()).or_default().degraded = true;
                tracing::warn!(
                    symbol = %symbol,
                    attempt = attempt,
                    "Feed degraded, trailing and entries suspended"
                );
                vec![EngineEvent::FeedDegraded { symbol, attempt }]
            }
            FeedEvent::Reconnected { symbol } => {
                self.symbols().entry(symbol.clone()).or_default().degraded = false;
                tracing::info!(symbol = %symbol, "Feed recovered");
                vec![EngineEvent::FeedRecovered { symbol }]
            }
            FeedEvent::Failed { symbol } => {
                self.symbols().entry(symbol.clone()).or_default().degraded = true;
                tracing::error!(symbol = %symbol, "Feed failed, resubscribe required");
                notify_detached(
                    &self.notifier,
                    format!("Price feed for {} failed; resubscribe required", symbol),
                );
                vec![EngineEvent::FeedFailed { symbol }]
            }
        }
    }

    /// Record the tick; returns false for a repeated price
    fn observe(&self, tick: &Tick) -> bool {
        let mut symbols = self.symbols();
        let state = symbols.entry(tick.symbol.clone()).or_default();

        if state.last_price == Some(tick.price) {
            return false;
        }
        state.last_price = Some(tick.price);

        let moved = state.last_logged.map_or(true, |logged| {
            (tick.price - logged).abs() / logged * 100.0 >= self.config.price_log_threshold_percent
        });
        if moved {
            state.last_logged = Some(tick.price);
            tracing::info!(symbol = %tick.symbol, price = %tick.price, "Price update");
        }
        true
    }

    /// Analyzer, alerts, then position management or entry, in that order
    pub async fn process_tick(&self, tick: &Tick) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        if !self.observe(tick) {
            return events;
        }
        let symbol = tick.symbol.as_str();
        let price = tick.price;

        if let Some(alert) = self.analyzer.record(symbol, price, tick.timestamp) {
            self.risk.add_alert(alert);
        }
        for alert in self.risk.check_alerts(symbol, price) {
            tracing::warn!(symbol = %symbol, "🔔 {}", alert.message);
            notify_detached(&self.notifier, format!("{}: {}", symbol, alert.message));
            events.push(EngineEvent::AlertTriggered(alert));
        }

        if self.risk.has_position(symbol) {
            self.manage_position(symbol, price, &mut events).await;
        } else if !self.is_degraded(symbol) {
            self.consider_entry(symbol, price, &mut events).await;
        }
        events
    }

    async fn manage_position(&self, symbol: &str, price: f64, events: &mut Vec<EngineEvent>) {
        if let Some(reason) = self.risk.check_exit(symbol, price) {
            if let Some(trade) = self.controller.close_on_exit(symbol, reason, price).await {
                events.push(EngineEvent::PositionClosed {
                    symbol: symbol.to_string(),
                    reason,
                    pnl: trade.pnl,
                });
            }
            return;
        }

        if let Some(warning) = self.risk.check_liquidation(symbol, price) {
            tracing::warn!(
                symbol = %symbol,
                price = %price,
                liquidation_price = warning.liquidation_price,
                "⚠️ Price near liquidation"
            );
            events.push(EngineEvent::LiquidationWarning {
                symbol: symbol.to_string(),
                liquidation_price: warning.liquidation_price,
                distance: warning.distance,
            });
        }

        if let Some(close) = self.risk.check_partial_close(symbol, price) {
            match self.controller.partial_close(symbol, close, price).await {
                Ok(PartialOutcome::Closed {
                    quantity,
                    remaining,
                }) => {
                    let left = remaining.as_ref().map(|p| p.quantity).unwrap_or(0.0);
                    events.push(EngineEvent::PartialClosed {
                        symbol: symbol.to_string(),
                        level: close.level,
                        quantity,
                        remaining: left,
                    });
                    if remaining.is_none() {
                        return;
                    }
                }
                Ok(PartialOutcome::Skipped) => {}
                Err(e) => self.record_failure(symbol, "Partial close", e, events),
            }
        }

        if self.is_degraded(symbol) {
            return;
        }
        if let Some(candidate) = self.risk.trailing_candidate(symbol, price) {
            match self.controller.replace_stop(symbol, candidate, price).await {
                Ok(true) => {
                    let stop_price = self
                        .risk
                        .position(symbol)
                        .map(|p| p.stop_loss_price)
                        .unwrap_or(candidate);
                    events.push(EngineEvent::StopMoved {
                        symbol: symbol.to_string(),
                        stop_price,
                    });
                }
                Ok(false) => {}
                Err(e) => self.record_failure(symbol, "Trailing stop", e, events),
            }
        }
    }

    fn record_failure(
        &self,
        symbol: &str,
        what: &str,
        error: EngineError,
        events: &mut Vec<EngineEvent>,
    ) {
        match error {
            EngineError::Unprotected { symbol, reason } => {
                events.push(EngineEvent::UnprotectedPosition { symbol, reason });
            }
            other => tracing::warn!(symbol = %symbol, "{} abandoned: {}", what, other),
        }
    }

    async fn refresh_target(&self, symbol: &str) -> Option<Vec<Candle>> {
        let candles = match self
            .gateway
            .get_klines(symbol, &self.config.kline_interval, self.config.kline_limit)
            .await
        {
            Ok(candles) => candles,
            Err(e) => {
                tracing::warn!(symbol = %symbol, "Kline fetch failed: {}", e);
                return None;
            }
        };

        match entry_target_price(&candles) {
            Some(target) => {
                if self.risk.target(symbol) != Some(target) {
                    tracing::info!(symbol = %symbol, target = target, "🎯 Entry target set");
                }
                self.risk.set_target(symbol, target);
            }
            None => tracing::debug!(symbol = %symbol, "Not enough history for a target"),
        }
        Some(candles)
    }

    async fn consider_entry(&self, symbol: &str, price: f64, events: &mut Vec<EngineEvent>) {
        if self.risk.target(symbol).is_none() && self.refresh_target(symbol).await.is_none() {
            return;
        }
        if !self.risk.check_target(symbol, price) {
            return;
        }
        tracing::info!(symbol = %symbol, price = %price, "Entry target reached");

        let reject = |reason: String, events: &mut Vec<EngineEvent>| {
            tracing::info!(symbol = %symbol, "Entry skipped: {}", reason);
            events.push(EngineEvent::EntryRejected {
                symbol: symbol.to_string(),
                reason,
            });
        };

        if let Err(rejection) = self.risk.entry_check(symbol, price).await {
            reject(rejection.to_string(), events);
            return;
        }
        let Some(reservation) = self.risk.reserve_entry(symbol) else {
            reject("no free position slot".to_string(), events);
            return;
        };

        // Fresh history for the stop distance; also moves the target
        let Some(candles) = self.refresh_target(symbol).await else {
            reject("kline history unavailable".to_string(), events);
            return;
        };
        let balance = match self.gateway.get_account_state().await {
            Ok(account) => account.wallet_balance,
            Err(e) => {
                reject(format!("account unavailable: {}", e), events);
                return;
            }
        };
        let filters = match self.controller.filters(symbol).await {
            Ok(filters) => filters,
            Err(e) => {
                reject(format!("symbol filters unavailable: {}", e), events);
                return;
            }
        };

        let plan =
            match self
                .risk
                .plan_entry(symbol, Side::Long, price, &candles, balance, &filters)
            {
                Ok(plan) => plan,
                Err(e) => {
                    reject(e.to_string(), events);
                    return;
                }
            };

        match self.controller.open(&plan, reservation).await {
            Ok(position) => {
                events.push(EngineEvent::EntryOpened {
                    symbol: symbol.to_string(),
                    side: position.side,
                    quantity: position.quantity,
                    entry_price: position.entry_price,
                });
                if !position.is_protected() {
                    events.push(EngineEvent::UnprotectedPosition {
                        symbol: symbol.to_string(),
                        reason: "protective orders rejected at entry".to_string(),
                    });
                }
            }
            Err(e) => {
                tracing::error!(symbol = %symbol, "Entry order failed: {}", e);
                reject(format!("entry order failed: {}", e), events);
            }
        }
    }

    /// Fan feed events out to one worker per symbol until cancelled
    ///
    /// Each symbol's events are handled strictly in order by its worker, so
    /// slow exchange calls for one symbol never stall another. A tick that
    /// finds its symbol's queue full is dropped; a connection signal is held
    /// and retried, the newest one per symbol winning.
    pub async fn run(self: Arc<Self>, mut feed: FeedEvents, cancel: CancellationToken) {
        let mut queues: HashMap<String, mpsc::Sender<FeedEvent>> = HashMap::new();
        let mut held: HashMap<String, FeedEvent> = HashMap::new();
        let mut workers = JoinSet::new();
        let capacity = self.config.symbol_queue_capacity.max(1);
        let mut retry = tokio::time::interval(HELD_SIGNAL_RETRY);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = retry.tick(), if !held.is_empty() => {
                    flush_held(&queues, &mut held);
                    continue;
                }
                event = feed.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let symbol = event.symbol().to_string();
            let queue = queues.entry(symbol.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::channel(capacity);
                workers.spawn(Arc::clone(&self).worker(symbol.clone(), rx));
                tx
            });

            if !forward(queue, &mut held, &symbol, event) {
                tracing::error!(symbol = %symbol, "Symbol worker gone");
                queues.remove(&symbol);
                held.remove(&symbol);
            }
        }

        // Workers are still draining, so held signals can wait for room
        for (symbol, signal) in held.drain() {
            if let Some(queue) = queues.get(&symbol) {
                if queue.send(signal).await.is_err() {
                    tracing::error!(symbol = %symbol, "Symbol worker gone");
                }
            }
        }

        drop(queues);
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                tracing::error!("Symbol worker panicked: {}", e);
            }
        }
        tracing::info!("Orchestrator stopped");
    }

    async fn worker(self: Arc<Self>, symbol: String, mut rx: mpsc::Receiver<FeedEvent>) {
        tracing::debug!(symbol = %symbol, "Symbol worker started");
        while let Some(event) = rx.recv().await {
            for engine_event in self.handle_event(event).await {
                tracing::debug!(symbol = %symbol, event = ?engine_event, "Engine event");
            }
        }
    }
}

const HELD_SIGNAL_RETRY: Duration = Duration::from_millis(50);

/// Queue one event for its symbol's worker without waiting for room
///
/// A held connection signal for the symbol goes out before anything newer.
/// Returns false once the worker is gone.
fn forward(
    queue: &mpsc::Sender<FeedEvent>,
    held: &mut HashMap<String, FeedEvent>,
    symbol: &str,
    event: FeedEvent,
) -> bool {
    if let Some(signal) = held.remove(symbol) {
        match queue.try_send(signal) {
            Ok(()) => {}
            Err(TrySendError::Full(signal)) => {
                hold_or_drop(held, symbol, signal, event);
                return true;
            }
            Err(TrySendError::Closed(_)) => return false,
        }
    }

    match queue.try_send(event) {
        Ok(()) => true,
        Err(TrySendError::Full(event)) => {
            if let FeedEvent::Tick(tick) = &event {
                tracing::warn!(symbol = %symbol, price = %tick.price, "Tick queue full, dropping tick");
            } else {
                tracing::warn!(symbol = %symbol, "Tick queue full, holding connection signal");
                held.insert(symbol.to_string(), event);
            }
            true
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Queue still full: ticks are dropped, a newer signal replaces the held one
fn hold_or_drop(
    held: &mut HashMap<String, FeedEvent>,
    symbol: &str,
    signal: FeedEvent,
    event: FeedEvent,
) {
    match event {
        FeedEvent::Tick(tick) => {
            tracing::warn!(symbol = %symbol, price = %tick.price, "Tick queue full, dropping tick");
            held.insert(symbol.to_string(), signal);
        }
        newer => {
            tracing::debug!(symbol = %symbol, superseded = ?signal, "Held connection signal replaced");
            held.insert(symbol.to_string(), newer);
        }
    }
}

fn flush_held(
    queues: &HashMap<String, mpsc::Sender<FeedEvent>>,
    held: &mut HashMap<String, FeedEvent>,
) {
    let symbols: Vec<String> = held.keys().cloned().collect();
    for symbol in symbols {
        let (Some(queue), Some(signal)) = (queues.get(&symbol), held.remove(&symbol)) else {
            continue;
        };
        if let Err(TrySendError::Full(signal)) = queue.try_send(signal) {
            held.insert(symbol, signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{LogNotifier, PaperExchange, PaperOp};
    use crate::config::TradingPolicy;
    use crate::indicators::atr::tests::create_test_candles;
    use crate::models::SymbolFilters;
    use chrono::Utc;

    struct Harness {
        orchestrator: Orchestrator,
        exchange: PaperExchange,
    }

    fn harness() -> Harness {
        let exchange = PaperExchange::new(10_000.0);
        exchange.list_symbol("BTCUSDT", 100.0);
        exchange.set_filters(
            "BTCUSDT",
            SymbolFilters {
                tick_size: 0.01,
                lot_size: 0.001,
            },
        );
        // SMA20 = 100, mean range = 1 -> target 99, ATR 1 -> 2% stop
        exchange.set_klines(
            "BTCUSDT",
            create_test_candles(&[(100.0, 100.5, 99.5, 100.0); 30]),
        );

        let gateway: Arc<dyn ExchangeGateway> = Arc::new(exchange.clone());
        let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
        let analyzer = PriceAnalyzer::default();
        let risk = Arc::new(RiskManager::new(
            TradingPolicy::default(),
            &EngineConfig::default(),
            gateway.clone(),
            analyzer.clone(),
        ));
        let controller = Arc::new(PositionController::new(
            gateway.clone(),
            risk.clone(),
            notifier.clone(),
        ));
        let orchestrator = Orchestrator::new(
            EngineConfig::default(),
            analyzer,
            risk,
            controller,
            gateway,
            notifier,
        );
        Harness {
            orchestrator,
            exchange,
        }
    }

    fn tick(price: f64) -> Tick {
        Tick {
            symbol: "BTCUSDT".to_string(),
            price,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_entry_on_target() {
        let h = harness();

        assert!(h.orchestrator.process_tick(&tick(100.0)).await.is_empty());
        assert_eq!(h.orchestrator.risk().target("BTCUSDT"), Some(99.0));

        let events = h.orchestrator.process_tick(&tick(99.0)).await;
        assert!(matches!(
            events.as_slice(),
            [EngineEvent::EntryOpened { side: Side::Long, .. }]
        ));

        let position = h.orchestrator.risk().position("BTCUSDT").unwrap();
        assert!(position.is_protected());
        assert!((position.stop_loss_price - 97.0).abs() < 1e-9);
        assert!((position.quantity - 1.5).abs() < 1e-9);
        assert_eq!(h.exchange.open_stop_orders("BTCUSDT").len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_prices_ignored() {
        let h = harness();
        h.orchestrator.process_tick(&tick(100.0)).await;
        h.orchestrator.process_tick(&tick(100.0)).await;

        assert_eq!(h.orchestrator.analyzer.sample_count("BTCUSDT"), 1);
    }

    #[tokio::test]
    async fn test_degraded_feed_suspends_entries() {
        let h = harness();
        h.orchestrator.process_tick(&tick(100.0)).await;

        h.orchestrator
            .handle_event(FeedEvent::ConnectionLost {
                symbol: "BTCUSDT".into(),
                attempt: 1,
            })
            .await;
        assert!(h.orchestrator.process_tick(&tick(98.0)).await.is_empty());
        assert!(!h.orchestrator.risk().has_position("BTCUSDT"));

        h.orchestrator
            .handle_event(FeedEvent::Reconnected {
                symbol: "BTCUSDT".into(),
            })
            .await;
        let events = h.orchestrator.process_tick(&tick(98.5)).await;
        assert!(matches!(events[0], EngineEvent::EntryOpened { .. }));
    }

    #[tokio::test]
    async fn test_unprotected_entry_is_surfaced() {
        let h = harness();
        h.orchestrator.process_tick(&tick(100.0)).await;
        h.exchange.fail_next(PaperOp::StopOrder(crate::models::StopKind::StopLoss), 1);

        let events = h.orchestrator.process_tick(&tick(99.0)).await;
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::UnprotectedPosition { .. })));
    }

    #[tokio::test]
    async fn test_rejected_entry_reports_reason() {
        let h = harness();
        h.orchestrator.process_tick(&tick(100.0)).await;
        h.exchange.fail_next(PaperOp::Stats, 1);

        let events = h.orchestrator.process_tick(&tick(99.0)).await;
        match events.as_slice() {
            [EngineEvent::EntryRejected { reason, .. }] => {
                assert!(reason.contains("24h stats unavailable"))
            }
            other => panic!("unexpected events: {:?}", other),
        }

        // Target latched: no retry until price recovers above the reset level
        assert!(h.orchestrator.process_tick(&tick(98.9)).await.is_empty());
    }

    #[tokio::test]
    async fn test_feed_failure_event() {
        let h = harness();
        let events = h
            .orchestrator
            .handle_event(FeedEvent::Failed {
                symbol: "BTCUSDT".into(),
            })
            .await;

        assert_eq!(
            events,
            vec![EngineEvent::FeedFailed {
                symbol: "BTCUSDT".into()
            }]
        );
        assert!(h.orchestrator.is_degraded("BTCUSDT"));
    }

    #[tokio::test]
    async fn test_recovery_after_failed_resumes_entries() {
        let h = harness();
        h.orchestrator.process_tick(&tick(100.0)).await;
        h.orchestrator
            .handle_event(FeedEvent::Failed {
                symbol: "BTCUSDT".into(),
            })
            .await;
        assert!(h.orchestrator.process_tick(&tick(98.0)).await.is_empty());

        let events = h
            .orchestrator
            .handle_event(FeedEvent::Reconnected {
                symbol: "BTCUSDT".into(),
            })
            .await;
        assert_eq!(
            events,
            vec![EngineEvent::FeedRecovered {
                symbol: "BTCUSDT".into()
            }]
        );
        assert!(!h.orchestrator.is_degraded("BTCUSDT"));

        let events = h.orchestrator.process_tick(&tick(98.5)).await;
        assert!(matches!(events[0], EngineEvent::EntryOpened { .. }));
    }

    #[tokio::test]
    async fn test_full_queue_holds_connection_signal_without_waiting() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut held = HashMap::new();
        let lost = FeedEvent::ConnectionLost {
            symbol: "BTCUSDT".into(),
            attempt: 1,
        };
        let reconnected = FeedEvent::Reconnected {
            symbol: "BTCUSDT".into(),
        };

        assert!(forward(&tx, &mut held, "BTCUSDT", FeedEvent::Tick(tick(100.0))));
        assert!(forward(&tx, &mut held, "BTCUSDT", lost));
        assert!(held.contains_key("BTCUSDT"));

        // Ticks behind a held signal are dropped, a newer signal replaces it
        assert!(forward(&tx, &mut held, "BTCUSDT", FeedEvent::Tick(tick(101.0))));
        assert!(forward(&tx, &mut held, "BTCUSDT", reconnected.clone()));
        assert_eq!(held.get("BTCUSDT"), Some(&reconnected));

        assert!(matches!(rx.recv().await, Some(FeedEvent::Tick(t)) if t.price == 100.0));
        flush_held(&HashMap::from([("BTCUSDT".to_string(), tx.clone())]), &mut held);
        assert!(held.is_empty());
        assert_eq!(rx.recv().await, Some(reconnected));

        drop(rx);
        assert!(!forward(&tx, &mut held, "BTCUSDT", FeedEvent::Tick(tick(102.0))));
    }

    #[tokio::test]
    async fn test_run_dispatches_until_cancelled() {
        let h = harness();
        let orchestrator = Arc::new(h.orchestrator);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(Arc::clone(&orchestrator).run(rx, cancel.clone()));
        tx.send(FeedEvent::Tick(tick(100.0))).await.unwrap();
        tx.send(FeedEvent::Tick(tick(99.0))).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert!(orchestrator.risk().has_position("BTCUSDT"));
        assert_eq!(orchestrator.last_prices().get("BTCUSDT"), Some(&99.0));
    }
}
