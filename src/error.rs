use thiserror::Error;

/// Errors returned by exchange gateway calls
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Network failure or connection reset
    #[error("Network error: {0}")]
    Network(String),

    /// Too many requests (HTTP 429/418)
    #[error("Rate limit exceeded")]
    RateLimited,

    /// Exchange-side 5xx
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Request rejected by the exchange (bad params, insufficient margin...)
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },

    /// Response could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Response was valid but lacked the required market data
    #[error("Missing data: {0}")]
    MissingData(String),
}

impl GatewayError {
    /// Whether the call may succeed if retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_) | GatewayError::RateLimited | GatewayError::Server { .. }
        )
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Network(e.to_string())
        }
    }
}

/// Price feed transport errors
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Keepalive timed out")]
    KeepaliveTimeout,

    #[error("Stream closed by server")]
    Closed,
}

/// Engine-level errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Entry or update rejected for the current tick; not retried
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Irrecoverable configuration problem; aborts startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Position is open but its protective orders are not in place
    #[error("Position {symbol} is unprotected: {reason}")]
    Unprotected { symbol: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(GatewayError::Network("reset".into()).is_transient());
        assert!(GatewayError::RateLimited.is_transient());
        assert!(GatewayError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_transient());

        assert!(!GatewayError::Api {
            code: -2019,
            message: "Margin is insufficient".into()
        }
        .is_transient());
        assert!(!GatewayError::MissingData("no bids".into()).is_transient());
    }
}
