/// Average True Range (ATR)
///
/// True Range of a bar is the greatest of:
/// - High - Low
/// - Abs(High - Previous Close)
/// - Abs(Low - Previous Close)
///
/// The first bar has no previous close, so its range is High - Low.
/// ATR here is the simple mean of the last `period` true ranges.
use crate::models::Candle;

/// True range for every bar, aligned with `candles`
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let range = bar.high - bar.low;
            match i.checked_sub(1).map(|prev| candles[prev].close) {
                Some(prev_close) => range
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs()),
                None => range,
            }
        })
        .collect()
}

/// Simple-mean ATR over the last `period` bars
///
/// Returns None with fewer than `period` bars or non-finite input
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let ranges = true_ranges(candles);
    let atr = ranges.iter().rev().take(period).sum::<f64>() / period as f64;

    atr.is_finite().then_some(atr)
}

/// Mean of (high - low) over the last `period` bars, ignoring gaps
pub fn average_range(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let sum: f64 = candles
        .iter()
        .rev()
        .take(period)
        .map(|c| c.high - c.low)
        .sum();

    Some(sum / period as f64)
}
