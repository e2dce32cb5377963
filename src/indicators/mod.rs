// Technical indicators used by the risk engine
// ATR for stop sizing, log-return volatility for entry suppression,
// SMA/range target for the dip-entry signal

pub mod atr;
pub mod target;
pub mod volatility;

pub use atr::{average_range, calculate_atr, true_ranges};
pub use target::{calculate_sma, entry_target_price};
pub use volatility::log_return_volatility;
