use super::atr::average_range;
use crate::models::Candle;

const SMA_PERIOD: usize = 20;
const RANGE_PERIOD: usize = 14;

/// Simple moving average of the last `period` values
pub fn calculate_sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let sum: f64 = values.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Dip-entry target: SMA(20) of closes minus the mean 14-bar range
pub fn entry_target_price(candles: &[Candle]) -> Option<f64> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let sma = calculate_sma(&closes, SMA_PERIOD)?;
    let range = average_range(candles, RANGE_PERIOD)?;

    let target = sma - range;
    (target > 0.0).then_some(target)
}
