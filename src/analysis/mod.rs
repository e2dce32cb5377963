// Rolling price history and volatility
pub mod price_analyzer;

pub use price_analyzer::{
    PriceAnalyzer, HISTORY_CAPACITY, VOLATILITY_ALERT_THRESHOLD, VOLATILITY_WINDOW,
};
