use crate::api::{notify_detached, ExchangeGateway, Notifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of one margin check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MarginCheck {
    Healthy(f64),
    /// Over the limit and a warning was emitted
    Warned(f64),
    /// Over the limit, warning suppressed by the warning interval
    Suppressed(f64),
    Unavailable,
}

/// Periodic account margin-ratio watchdog
pub struct MarginMonitor {
    gateway: Arc<dyn ExchangeGateway>,
    notifier: Arc<dyn Notifier>,
    max_ratio: f64,
    check_interval: Duration,
    warning_interval: Duration,
    last_warning: Option<Instant>,
}

impl MarginMonitor {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        notifier: Arc<dyn Notifier>,
        max_ratio: f64,
        check_interval: Duration,
        warning_interval: Duration,
    ) -> Self {
        Self {
            gateway,
            notifier,
            max_ratio,
            check_interval,
            warning_interval,
            last_warning: None,
        }
    }

    pub async fn check_once(&mut self) -> MarginCheck {
        let account = match self.gateway.get_account_state().await {
            Ok(account) => account,
            Err(e) => {
                tracing::warn!("Margin check skipped: {}", e);
                return MarginCheck::Unavailable;
            }
        };

        let Some(ratio) = account.margin_ratio() else {
            tracing::warn!("Margin check skipped: wallet balance is zero");
            return MarginCheck::Unavailable;
        };

        if ratio <= self.max_ratio {
            tracing::debug!(margin_ratio = ratio, "Margin ratio healthy");
            return MarginCheck::Healthy(ratio);
        }

        let now = Instant::now();
        let due = self
            .last_warning
            .map_or(true, |last| now.duration_since(last) >= self.warning_interval);
        if !due {
            return MarginCheck::Suppressed(ratio);
        }

        self.last_warning = Some(now);
        tracing::warn!(
            margin_ratio = ratio,
            max_ratio = self.max_ratio,
            "⚠️ Margin ratio above limit"
        );
        notify_detached(
            &self.notifier,
            format!(
                "Margin ratio {:.1}% exceeds {:.1}%",
                ratio * 100.0,
                self.max_ratio * 100.0
            ),
        );
        MarginCheck::Warned(ratio)
    }

    /// Check every `check_interval` until cancelled
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            self.check_once().await;
        }
        tracing::debug!("Margin monitor stopped");
    }
}
