use crate::error::FeedError;
use crate::models::Tick;
use async_trait::async_trait;

/// One live trade stream connection
///
/// A transport is reused across reconnects of the same subscription:
/// `connect` may be called again after any error.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&mut self, symbol: &str) -> Result<(), FeedError>;

    /// Next trade price; errors mean the connection is gone
    async fn next_trade(&mut self) -> Result<Tick, FeedError>;

    async fn close(&mut self);
}

/// Creates a fresh transport for each subscription
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Box<dyn FeedTransport>;
}
