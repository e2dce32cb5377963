use crate::models::PriceAlert;
use std::collections::{HashMap, VecDeque};

pub const MAX_ALERTS_PER_SYMBOL: usize = 50;

/// Generic price alerts, bounded per symbol
///
/// Alerts are edge-triggered and stay triggered; once the book for a symbol
/// is full, the oldest alert is dropped.
#[derive(Debug, Default)]
pub struct AlertBook {
    alerts: HashMap<String, VecDeque<PriceAlert>>,
}

impl AlertBook {
    pub fn add(&mut self, alert: PriceAlert) {
        let alerts = self.alerts.entry(alert.symbol.clone()).or_default();
        alerts.push_back(alert);
        while alerts.len() > MAX_ALERTS_PER_SYMBOL {
            alerts.pop_front();
        }
    }

    /// Trigger every untriggered alert crossed by `price`; returns the newly fired ones
    pub fn check(&mut self, symbol: &str, price: f64) -> Vec<PriceAlert> {
        let Some(alerts) = self.alerts.get_mut(symbol) else {
            return Vec::new();
        };

        alerts
            .iter_mut()
            .filter(|a| !a.triggered && a.is_crossed(price))
            .map(|a| {
                a.triggered = true;
                a.clone()
            })
            .collect()
    }
}

/// Entry trigger at the target price
///
/// Fires when price drops to the target, then stays latched until price
/// recovers above `target * (1 + reset_percent / 100)`. Unlike `PriceAlert`,
/// this one re-arms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetPriceAlert {
    pub target: f64,
    pub reset_percent: f64,
    pub triggered: bool,
}

impl TargetPriceAlert {
    pub fn new(target: f64, reset_percent: f64) -> Self {
        Self {
            target,
            reset_percent,
            triggered: false,
        }
    }

    pub fn reset_level(&self) -> f64 {
        self.target * (1.0 + self.reset_percent / 100.0)
    }

    /// Returns true on the tick that reaches the target
    pub fn update(&mut self, price: f64) -> bool {
        if self.triggered {
            if price > self.reset_level() {
                self.triggered = false;
            }
            return false;
        }

        if price <= self.target {
            self.triggered = true;
            return true;
        }
        false
    }
}
