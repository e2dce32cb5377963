use crate::config::FeedConfig;
use std::time::Duration;

/// Connection state of one symbol subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Disconnected,
    Connecting,
    Subscribed,
    Degraded,
    /// Reconnect attempts exhausted; only an explicit resubscribe leaves this state
    Failed,
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FeedState::Disconnected => "disconnected",
            FeedState::Connecting => "connecting",
            FeedState::Subscribed => "subscribed",
            FeedState::Degraded => "degraded",
            FeedState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// What to do after a connection failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconnect {
    Retry(Duration),
    Exhausted,
}

/// Reconnect/backoff bookkeeping for a single subscription
///
/// Pure state; the subscription task drives it and owns the only instance,
/// so transitions never race.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: FeedState,
    attempts: u32,
    /// Set when resubscribing after Failed; the next connection is a recovery
    recovering: bool,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl ConnectionMachine {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            state: FeedState::Disconnected,
            attempts: 0,
            recovering: false,
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self::new(
            config.max_reconnect_attempts,
            config.initial_backoff(),
            config.max_backoff(),
        )
    }

    /// Machine for a subscription replacing one that ended Failed
    pub fn after_failure(mut self) -> Self {
        self.state = FeedState::Failed;
        self
    }

    pub fn state(&self) -> FeedState {
        self.state
    }

    /// Consecutive failures since the last connection that delivered a tick
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Disconnected (or Failed, on explicit resubscribe) -> Connecting
    pub fn on_subscribe(&mut self) {
        if matches!(self.state, FeedState::Disconnected | FeedState::Failed) {
            self.recovering = self.state == FeedState::Failed;
            self.attempts = 0;
            self.state = FeedState::Connecting;
        }
    }

    /// Connecting -> Subscribed. Returns true when this recovers a degraded feed.
    pub fn on_connected(&mut self) -> bool {
        if self.state != FeedState::Connecting {
            return false;
        }
        self.state = FeedState::Subscribed;
        let recovered = self.attempts > 0 || self.recovering;
        self.recovering = false;
        recovered
    }

    /// First tick on a connection proves it healthy
    pub fn on_tick(&mut self) {
        if self.state == FeedState::Subscribed {
            self.attempts = 0;
        }
    }

    /// Connect failure or lost connection -> Degraded, or Failed past the bound
    pub fn on_failure(&mut self) -> Reconnect {
        if self.state == FeedState::Failed {
            return Reconnect::Exhausted;
        }
        self.attempts += 1;
        if self.attempts > self.max_attempts {
            self.state = FeedState::Failed;
            return Reconnect::Exhausted;
        }
        self.state = FeedState::Degraded;
        Reconnect::Retry(self.backoff())
    }

    /// Degraded -> Connecting after the backoff delay
    pub fn begin_reconnect(&mut self) {
        if self.state == FeedState::Degraded {
            self.state = FeedState::Connecting;
        }
    }

    /// Unsubscribe from any non-terminal state
    pub fn on_closed(&mut self) {
        if self.state != FeedState::Failed {
            self.state = FeedState::Disconnected;
        }
    }

    fn backoff(&self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempts.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}
