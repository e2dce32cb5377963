use crate::indicators::log_return_volatility;
use crate::models::{AlertDirection, PriceAlert, PriceSample};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub const HISTORY_CAPACITY: usize = 1000;
pub const VOLATILITY_WINDOW: usize = 20;
pub const VOLATILITY_ALERT_THRESHOLD: f64 = 100.0;

#[derive(Default)]
struct SymbolHistory {
    samples: VecDeque<PriceSample>,
    volatility: Option<f64>,
}

/// Thread-safe rolling price history with derived volatility
///
/// Keeps the last `HISTORY_CAPACITY` samples per symbol; volatility is
/// recomputed from the most recent `VOLATILITY_WINDOW` samples on every record.
#[derive(Clone)]
pub struct PriceAnalyzer {
    data: Arc<RwLock<HashMap<String, SymbolHistory>>>,
    capacity: usize,
    alert_threshold: f64,
}

impl Default for PriceAnalyzer {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY, VOLATILITY_ALERT_THRESHOLD)
    }
}

impl PriceAnalyzer {
    pub fn new(capacity: usize, alert_threshold: f64) -> Self {
        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(VOLATILITY_WINDOW),
            alert_threshold,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SymbolHistory>> {
        self.data.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SymbolHistory>> {
        self.data.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a sample, evict beyond capacity and refresh volatility
    ///
    /// Returns an advisory `Both` alert when volatility exceeds the threshold
    pub fn record(&self, symbol: &str, price: f64, timestamp: DateTime<Utc>) -> Option<PriceAlert> {
        let mut data = self.write();
        let history = data.entry(symbol.to_string()).or_default();

        history.samples.push_back(PriceSample { price, timestamp });
        while history.samples.len() > self.capacity {
            history.samples.pop_front();
        }

        if history.samples.len() < VOLATILITY_WINDOW {
            return None;
        }

        let window: Vec<f64> = history
            .samples
            .iter()
            .skip(history.samples.len() - VOLATILITY_WINDOW)
            .map(|s| s.price)
            .collect();

        let volatility = log_return_volatility(&window)?;
        history.volatility = Some(volatility);

        if volatility > self.alert_threshold {
            tracing::warn!(
                symbol = %symbol,
                volatility = volatility,
                "High volatility"
            );
            return Some(PriceAlert::new(
                symbol,
                price,
                AlertDirection::Both,
                format!("High volatility: {:.1}%", volatility),
            ));
        }

        None
    }

    /// Latest volatility for a symbol, if enough samples were seen
    pub fn volatility(&self, symbol: &str) -> Option<f64> {
        self.read().get(symbol).and_then(|h| h.volatility)
    }

    pub fn sample_count(&self, symbol: &str) -> usize {
        self.read().get(symbol).map(|h| h.samples.len()).unwrap_or(0)
    }
}
