use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// One rung of the partial-close ladder
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PartialCloseLevel {
    /// Profit threshold in percent of entry
    pub profit_percent: f64,
    /// Fraction of the remaining quantity to close (0, 1]
    pub close_fraction: f64,
}

impl PartialCloseLevel {
    pub fn new(profit_percent: f64, close_fraction: f64) -> Self {
        Self {
            profit_percent,
            close_fraction,
        }
    }
}

/// Immutable trading policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingPolicy {
    pub max_positions: usize,
    pub max_daily_trades: u32,
    pub min_volume_usd: f64,
    pub max_spread_percent: f64,
    pub leverage: u32,
    pub min_stop_loss: f64,
    pub max_stop_loss: f64,
    pub atr_multiplier: f64,
    pub atr_period: usize,
    pub risk_per_trade: f64,
    /// Cap on position notional as a fraction of balance
    pub max_position_fraction: f64,
    pub max_margin_ratio: f64,
    /// Volatility (percent) above which entries are suppressed
    pub max_volatility: f64,
    pub default_stop_loss_percent: f64,
    pub default_take_profit_percent: f64,
    /// Take-profit distance as a multiple of the stop distance
    pub reward_ratio: f64,
    pub partial_close_levels: Vec<PartialCloseLevel>,
}

impl Default for TradingPolicy {
    fn default() -> Self {
        Self {
            max_positions: 3,
            max_daily_trades: 10,
            min_volume_usd: 1_000_000.0,
            max_spread_percent: 0.1,
            leverage: 3,
            min_stop_loss: 0.5,
            max_stop_loss: 5.0,
            atr_multiplier: 2.0,
            atr_period: 14,
            risk_per_trade: 0.01,
            max_position_fraction: 0.1,
            max_margin_ratio: 0.8,
            max_volatility: 100.0,
            default_stop_loss_percent: 2.0,
            default_take_profit_percent: 2.0,
            reward_ratio: 1.5,
            partial_close_levels: vec![
                PartialCloseLevel::new(1.0, 0.3),
                PartialCloseLevel::new(1.5, 0.3),
                PartialCloseLevel::new(2.0, 0.4),
            ],
        }
    }
}

impl TradingPolicy {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.leverage == 0 {
            return Err(EngineError::Config("leverage must be at least 1".into()));
        }
        if self.min_stop_loss <= 0.0 || self.min_stop_loss > self.max_stop_loss {
            return Err(EngineError::Config(format!(
                "invalid stop-loss bounds [{}, {}]",
                self.min_stop_loss, self.max_stop_loss
            )));
        }
        if self.atr_period == 0 {
            return Err(EngineError::Config("atr_period must be positive".into()));
        }
        if self.risk_per_trade <= 0.0 || self.max_position_fraction <= 0.0 {
            return Err(EngineError::Config(
                "risk_per_trade and max_position_fraction must be positive".into(),
            ));
        }
        for level in &self.partial_close_levels {
            if !(level.close_fraction > 0.0 && level.close_fraction <= 1.0) {
                return Err(EngineError::Config(format!(
                    "close_fraction {} outside (0, 1]",
                    level.close_fraction
                )));
            }
        }
        let ascending = self
            .partial_close_levels
            .windows(2)
            .all(|w| w[0].profit_percent < w[1].profit_percent);
        if !ascending {
            return Err(EngineError::Config(
                "partial_close_levels must be sorted ascending by profit_percent".into(),
            ));
        }
        Ok(())
    }
}

/// Price feed connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub ws_base_url: String,
    pub max_reconnect_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
    pub channel_capacity: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "wss://fstream.binance.com/ws".to_string(),
            max_reconnect_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            ping_interval_secs: 20,
            pong_timeout_secs: 10,
            channel_capacity: 1_000,
        }
    }
}

impl FeedConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

/// Tick-processing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub session_hours: u64,
    /// Fractional price-to-liquidation distance that raises a warning
    pub liquidation_warning_ratio: f64,
    pub symbol_queue_capacity: usize,
    pub price_log_threshold_percent: f64,
    pub margin_check_interval_secs: u64,
    pub margin_warning_interval_secs: u64,
    pub status_interval_secs: u64,
    pub kline_interval: String,
    pub kline_limit: u32,
    /// Target alert re-arms once price moves this far (percent) past the target
    pub target_reset_percent: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            session_hours: 12,
            liquidation_warning_ratio: 0.2,
            symbol_queue_capacity: 64,
            price_log_threshold_percent: 0.1,
            margin_check_interval_secs: 60,
            margin_warning_interval_secs: 300,
            status_interval_secs: 300,
            kline_interval: "5m".to_string(),
            kline_limit: 100,
            target_reset_percent: 0.1,
        }
    }
}

impl EngineConfig {
    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_hours * 60 * 60)
    }
}

/// REST gateway settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub rest_base_url: String,
    pub recv_window: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub requests_per_minute: u32,
    pub timeout_secs: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            rest_base_url: "https://fapi.binance.com".to_string(),
            recv_window: 5_000,
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            requests_per_minute: 1_200,
            timeout_secs: 10,
        }
    }
}

/// Full application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub policy: TradingPolicy,
    pub feed: FeedConfig,
    pub engine: EngineConfig,
    pub exchange: ExchangeConfig,
}

impl AppConfig {
    /// Defaults, then an optional TOML file, then `PERPBOT__*` env vars
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::with_name("perpbot").required(false)),
        };

        let settings = builder
            .add_source(
                config::Environment::with_prefix("PERPBOT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let app: AppConfig = settings.try_deserialize()?;
        app.policy.validate()?;
        Ok(app)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = TradingPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.partial_close_levels.len(), 3);
        assert_eq!(policy.leverage, 3);
    }

    #[test]
    fn test_rejects_unsorted_ladder() {
        let policy = TradingPolicy {
            partial_close_levels: vec![
                PartialCloseLevel::new(2.0, 0.4),
                PartialCloseLevel::new(1.0, 0.3),
            ],
            ..TradingPolicy::default()
        };
        assert!(matches!(policy.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_rejects_bad_fraction_and_bounds() {
        let policy = TradingPolicy {
            partial_close_levels: vec![PartialCloseLevel::new(1.0, 1.5)],
            ..TradingPolicy::default()
        };
        assert!(policy.validate().is_err());

        let policy = TradingPolicy {
            min_stop_loss: 6.0,
            ..TradingPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_overrides_defaults() {
        let dir = std::env::temp_dir().join(format!("perpbot-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("perpbot.toml");
        std::fs::write(
            &path,
            r#"
[policy]
leverage = 5
max_positions = 2

[feed]
max_reconnect_attempts = 7
"#,
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.policy.leverage, 5);
        assert_eq!(config.policy.max_positions, 2);
        assert_eq!(config.policy.min_stop_loss, 0.5);
        assert_eq!(config.feed.max_reconnect_attempts, 7);
        assert_eq!(config.engine.session_hours, 12);

        std::fs::remove_dir_all(&dir).ok();
    }
}
