use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Trade counters for the running session
///
/// Daily counters roll over at the UTC day boundary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionStats {
    pub total_trades: u32,
    pub profitable_trades: u32,
    pub daily_trades: u32,
    pub realized_pnl: f64,
    pub daily_pnl: f64,
    pub day: NaiveDate,
    pub started_at: DateTime<Utc>,
}

impl SessionStats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            total_trades: 0,
            profitable_trades: 0,
            daily_trades: 0,
            realized_pnl: 0.0,
            daily_pnl: 0.0,
            day: now.date_naive(),
            started_at: now,
        }
    }

    /// Reset daily counters if `now` is on a later day
    pub fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today > self.day {
            tracing::info!(
                "New trading day {}: resetting daily counters ({} trades, P&L ${:.2})",
                today,
                self.daily_trades,
                self.daily_pnl
            );
            self.day = today;
            self.daily_trades = 0;
            self.daily_pnl = 0.0;
        }
    }

    pub fn record_entry(&mut self, now: DateTime<Utc>) {
        self.roll_day(now);
        self.daily_trades += 1;
    }

    /// Count a fully closed trade
    ///
    /// `leg_pnl` is what the final close realized; `trade_pnl` includes the
    /// earlier partial closes and decides whether the trade was a win.
    pub fn record_close(&mut self, leg_pnl: f64, trade_pnl: f64, now: DateTime<Utc>) {
        self.roll_day(now);
        self.total_trades += 1;
        if trade_pnl > 0.0 {
            self.profitable_trades += 1;
        }
        self.realized_pnl += leg_pnl;
        self.daily_pnl += leg_pnl;
    }

    /// Realized pnl from a partial close; not a completed trade
    pub fn record_partial(&mut self, pnl: f64, now: DateTime<Utc>) {
        self.roll_day(now);
        self.realized_pnl += pnl;
        self.daily_pnl += pnl;
    }

    /// Percentage of closed trades that were profitable
    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        self.profitable_trades as f64 / self.total_trades as f64 * 100.0
    }

    pub fn daily_limit_reached(&self, max_daily_trades: u32, now: DateTime<Utc>) -> bool {
        // A stale day means today's count is zero
        now.date_naive() == self.day && self.daily_trades >= max_daily_trades
    }
}
