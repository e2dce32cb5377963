/// Short-horizon volatility of a price window, in percent
///
/// `stdev(log returns) * sqrt(window) * 100` using population stdev.
/// This scales by sample count, not by elapsed time, so it is a rough
/// sample-based figure and not a true annualized volatility.
pub fn log_return_volatility(prices: &[f64]) -> Option<f64> {
    if prices.len() < 2 || prices.iter().any(|p| !(*p > 0.0) || !p.is_finite()) {
        return None;
    }

    let returns: Vec<f64> = prices.windows(2).map(|w| (w[1] / w[0]).ln()).collect();
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;

    Some(variance.sqrt() * (prices.len() as f64).sqrt() * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_series_has_zero_volatility() {
        let prices = vec![42.0; 20];
        assert_eq!(log_return_volatility(&prices), Some(0.0));
    }

    #[test]
    fn test_alternating_series() {
        // Returns alternate +r, -r so stdev is r
        let prices: Vec<f64> = (0..20)
            .map(|i| if i % 2 == 0 { 100.0 } else { 110.0 })
            .collect();
        let r = (110.0f64 / 100.0).ln();
        let expected = r * 20f64.sqrt() * 100.0;

        let vol = log_return_volatility(&prices).unwrap();
        assert!((vol - expected).abs() < 0.5, "vol {} vs {}", vol, expected);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(log_return_volatility(&[100.0]).is_none());
        assert!(log_return_volatility(&[100.0, 0.0, 101.0]).is_none());
    }
}
