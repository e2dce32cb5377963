use super::state::{ConnectionMachine, FeedState, Reconnect};
use super::transport::{FeedTransport, TransportFactory};
use crate::config::FeedConfig;
use crate::models::Tick;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything downstream consumers observe from the feed
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Tick(Tick),
    /// Connection dropped; `attempt` is the consecutive failure count
    ConnectionLost { symbol: String, attempt: u32 },
    Reconnected { symbol: String },
    /// Reconnects exhausted; the symbol must be resubscribed explicitly
    Failed { symbol: String },
}

impl FeedEvent {
    pub fn symbol(&self) -> &str {
        match self {
            FeedEvent::Tick(tick) => &tick.symbol,
            FeedEvent::ConnectionLost { symbol, .. }
            | FeedEvent::Reconnected { symbol }
            | FeedEvent::Failed { symbol } => symbol,
        }
    }
}

pub type FeedEvents = mpsc::Receiver<FeedEvent>;

struct Subscription {
    state: watch::Receiver<FeedState>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Live trade subscriptions, one task per symbol
///
/// Each subscription task is the single writer of its connection state;
/// readers observe it through a `watch` channel.
pub struct PriceFeed {
    config: FeedConfig,
    factory: Arc<dyn TransportFactory>,
    events: mpsc::Sender<FeedEvent>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
}

impl PriceFeed {
    pub fn new(config: FeedConfig, factory: Arc<dyn TransportFactory>) -> (Self, FeedEvents) {
        let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
        let feed = Self {
            config,
            factory,
            events: tx,
            subscriptions: Mutex::new(HashMap::new()),
        };
        (feed, rx)
    }

    fn subscriptions(&self) -> MutexGuard<'_, HashMap<String, Subscription>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start streaming a symbol. Idempotent while the subscription is alive;
    /// a Failed subscription is replaced.
    pub fn subscribe(&self, symbol: &str) -> watch::Receiver<FeedState> {
        let symbol = symbol.to_uppercase();
        let mut subscriptions = self.subscriptions();

        let mut machine = ConnectionMachine::from_config(&self.config);
        if let Some(existing) = subscriptions.get(&symbol) {
            let previous = *existing.state.borrow();
            if previous != FeedState::Failed && !existing.handle.is_finished() {
                return existing.state.clone();
            }
            if previous == FeedState::Failed {
                machine = machine.after_failure();
            }
        }

        let (state_tx, state_rx) = watch::channel(FeedState::Disconnected);
        let cancel = CancellationToken::new();
        let task = SubscriptionTask {
            symbol: symbol.clone(),
            transport: self.factory.create(),
            machine,
            state: state_tx,
            events: self.events.clone(),
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run());

        tracing::info!(symbol = %symbol, "Subscribed to price feed");
        subscriptions.insert(
            symbol,
            Subscription {
                state: state_rx.clone(),
                cancel,
                handle,
            },
        );
        state_rx
    }

    /// Tear down one subscription. Returns false if it was not subscribed.
    pub fn unsubscribe(&self, symbol: &str) -> bool {
        let symbol = symbol.to_uppercase();
        match self.subscriptions().remove(&symbol) {
            Some(subscription) => {
                subscription.cancel.cancel();
                tracing::info!(symbol = %symbol, "Unsubscribed from price feed");
                true
            }
            None => false,
        }
    }

    /// Cancel every subscription and wait for the tasks to close their sockets
    pub async fn unsubscribe_all(&self) {
        let drained: Vec<(String, Subscription)> = self.subscriptions().drain().collect();

        for (_, subscription) in &drained {
            subscription.cancel.cancel();
        }
        for (symbol, subscription) in drained {
            if let Err(e) = subscription.handle.await {
                tracing::warn!(symbol = %symbol, "Feed task ended abnormally: {}", e);
            }
        }
        tracing::info!("All price feed subscriptions closed");
    }

    pub fn state(&self, symbol: &str) -> Option<FeedState> {
        self.subscriptions()
            .get(&symbol.to_uppercase())
            .map(|s| *s.state.borrow())
    }

    pub fn symbols(&self) -> Vec<String> {
        self.subscriptions().keys().cloned().collect()
    }
}

struct SubscriptionTask {
    symbol: String,
    transport: Box<dyn FeedTransport>,
    machine: ConnectionMachine,
    state: watch::Sender<FeedState>,
    events: mpsc::Sender<FeedEvent>,
    cancel: CancellationToken,
}

impl SubscriptionTask {
    fn publish(&self) {
        self.state.send_replace(self.machine.state());
    }

    async fn emit(&self, event: FeedEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    async fn run(mut self) {
        self.machine.on_subscribe();
        self.publish();

        loop {
            let connected = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect(&self.symbol) => result,
            };

            match connected {
                Ok(()) => {
                    let recovered = self.machine.on_connected();
                    self.publish();
                    if recovered {
                        tracing::info!(symbol = %self.symbol, "Price feed reconnected");
                        if !self.emit(FeedEvent::Reconnected { symbol: self.symbol.clone() }).await {
                            break;
                        }
                    }

                    match self.stream().await {
                        Some(e) => {
                            tracing::warn!(symbol = %self.symbol, "Price feed connection lost: {}", e);
                            self.transport.close().await;
                        }
                        None => break,
                    }
                }
                Err(e) => {
                    tracing::warn!(symbol = %self.symbol, "Price feed connect failed: {}", e);
                }
            }

            match self.machine.on_failure() {
                Reconnect::Retry(delay) => {
                    self.publish();
                    let attempt = self.machine.attempts();
                    tracing::info!(
                        symbol = %self.symbol,
                        attempt = attempt,
                        "Reconnecting in {}ms",
                        delay.as_millis()
                    );
                    let lost = FeedEvent::ConnectionLost {
                        symbol: self.symbol.clone(),
                        attempt,
                    };
                    if !self.emit(lost).await {
                        break;
                    }

                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    self.machine.begin_reconnect();
                    self.publish();
                }
                Reconnect::Exhausted => {
                    self.publish();
                    tracing::error!(
                        symbol = %self.symbol,
                        "Price feed failed after {} reconnect attempts",
                        self.machine.attempts() - 1
                    );
                    self.emit(FeedEvent::Failed { symbol: self.symbol.clone() }).await;
                    self.transport.close().await;
                    return;
                }
            }
        }

        self.transport.close().await;
        self.machine.on_closed();
        self.publish();
    }

    /// Forward ticks until the connection errors (`Some`) or the task stops (`None`)
    async fn stream(&mut self) -> Option<crate::error::FeedError> {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return None,
                result = self.transport.next_trade() => result,
            };

            match next {
                Ok(tick) => {
                    self.machine.on_tick();
                    if !self.emit(FeedEvent::Tick(tick)).await {
                        return None;
                    }
                }
                Err(e) => return Some(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FeedError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::VecDeque;
    use std::time::Duration;

    #[derive(Debug, Clone, Copy)]
    enum Step {
        ConnectOk,
        ConnectErr,
        Trade(f64),
        Drop,
    }

    /// Plays back a shared script; blocks forever once it runs out
    struct ScriptedTransport {
        script: Arc<Mutex<VecDeque<Step>>>,
        symbol: String,
    }

    impl ScriptedTransport {
        fn pop(&self) -> Option<Step> {
            self.script.lock().unwrap().pop_front()
        }
    }

    #[async_trait]
    impl FeedTransport for ScriptedTransport {
        async fn connect(&mut self, symbol: &str) -> Result<(), FeedError> {
            self.symbol = symbol.to_string();
            match self.pop() {
                Some(Step::ConnectOk) => Ok(()),
                Some(Step::ConnectErr) => Err(FeedError::Connect("refused".into())),
                Some(other) => panic!("unexpected step on connect: {:?}", other),
                None => std::future::pending().await,
            }
        }

        async fn next_trade(&mut self) -> Result<Tick, FeedError> {
            match self.pop() {
                Some(Step::Trade(price)) => Ok(Tick {
                    symbol: self.symbol.clone(),
                    price,
                    timestamp: Utc::now(),
                }),
                Some(Step::Drop) => Err(FeedError::Transport("reset by peer".into())),
                Some(other) => panic!("unexpected step on read: {:?}", other),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    struct ScriptedFactory {
        script: Arc<Mutex<VecDeque<Step>>>,
    }

    impl TransportFactory for ScriptedFactory {
        fn create(&self) -> Box<dyn FeedTransport> {
            Box::new(ScriptedTransport {
                script: self.script.clone(),
                symbol: String::new(),
            })
        }
    }

    fn scripted_feed(steps: &[Step]) -> (PriceFeed, FeedEvents, Arc<Mutex<VecDeque<Step>>>) {
        let script = Arc::new(Mutex::new(steps.iter().copied().collect::<VecDeque<_>>()));
        let factory = Arc::new(ScriptedFactory {
            script: script.clone(),
        });
        let (feed, events) = PriceFeed::new(FeedConfig::default(), factory);
        (feed, events, script)
    }

    async fn next_event(events: &mut FeedEvents) -> Option<FeedEvent> {
        tokio::time::timeout(Duration::from_secs(600), events.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test(start_paused = true)]
    async fn test_six_disconnects_fail_exactly_once() {
        use Step::*;
        let (feed, mut events, _) = scripted_feed(&[
            ConnectOk, Trade(100.0), Drop, ConnectErr, ConnectErr, ConnectErr, ConnectErr,
            ConnectErr,
        ]);
        let mut state = feed.subscribe("btcusdt");

        let mut lost_attempts = Vec::new();
        let mut failed = 0;
        let mut ticks = 0;
        while let Some(event) = next_event(&mut events).await {
            match event {
                FeedEvent::Tick(_) => ticks += 1,
                FeedEvent::ConnectionLost { attempt, .. } => lost_attempts.push(attempt),
                FeedEvent::Failed { symbol } => {
                    assert_eq!(symbol, "BTCUSDT");
                    failed += 1;
                }
                FeedEvent::Reconnected { .. } => panic!("never reconnected"),
            }
        }

        assert_eq!(ticks, 1);
        assert_eq!(lost_attempts, vec![1, 2, 3, 4, 5]);
        assert_eq!(failed, 1);
        state.wait_for(|s| *s == FeedState::Failed).await.unwrap();
        assert_eq!(feed.state("BTCUSDT"), Some(FeedState::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_after_reconnect_resets_counter() {
        use Step::*;
        let (feed, mut events, _) =
            scripted_feed(&[ConnectOk, Drop, ConnectOk, Trade(101.0), Drop, ConnectOk]);
        feed.subscribe("ETHUSDT");

        let mut seen = Vec::new();
        while let Some(event) = next_event(&mut events).await {
            seen.push(event);
        }

        assert_eq!(
            seen,
            vec![
                FeedEvent::ConnectionLost {
                    symbol: "ETHUSDT".into(),
                    attempt: 1
                },
                FeedEvent::Reconnected {
                    symbol: "ETHUSDT".into()
                },
                seen[2].clone(),
                FeedEvent::ConnectionLost {
                    symbol: "ETHUSDT".into(),
                    attempt: 1
                },
                FeedEvent::Reconnected {
                    symbol: "ETHUSDT".into()
                },
            ]
        );
        assert!(matches!(&seen[2], FeedEvent::Tick(t) if t.price == 101.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_tears_down() {
        let (feed, _events, _) = scripted_feed(&[Step::ConnectOk]);
        let mut state = feed.subscribe("SOLUSDT");
        state.wait_for(|s| *s == FeedState::Subscribed).await.unwrap();

        assert!(feed.unsubscribe("SOLUSDT"));
        assert!(!feed.unsubscribe("SOLUSDT"));
        state
            .wait_for(|s| *s == FeedState::Disconnected)
            .await
            .unwrap();
        assert_eq!(feed.state("SOLUSDT"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resubscribe_after_failure() {
        use Step::*;
        let (feed, mut events, script) = scripted_feed(&[
            ConnectErr, ConnectErr, ConnectErr, ConnectErr, ConnectErr, ConnectErr,
        ]);
        let mut state = feed.subscribe("BTCUSDT");
        state.wait_for(|s| *s == FeedState::Failed).await.unwrap();
        while next_event(&mut events).await.is_some() {}

        // Subscribing while alive is a no-op; after Failed it starts over
        script.lock().unwrap().extend([ConnectOk, Trade(99.5)]);
        let mut state = feed.subscribe("BTCUSDT");
        state.wait_for(|s| *s == FeedState::Subscribed).await.unwrap();

        // Consumers that saw Failed learn the feed is back
        assert_eq!(
            next_event(&mut events).await,
            Some(FeedEvent::Reconnected {
                symbol: "BTCUSDT".into()
            })
        );
        let event = next_event(&mut events).await.unwrap();
        assert!(matches!(event, FeedEvent::Tick(t) if t.price == 99.5));

        feed.unsubscribe_all().await;
        assert!(feed.symbols().is_empty());
    }
}
