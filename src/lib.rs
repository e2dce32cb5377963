// Core modules
pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod indicators;
pub mod models;
pub mod risk;

// Re-export commonly used types
pub use api::{ExchangeGateway, Notifier};
pub use error::{EngineError, FeedError, GatewayError};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, EngineError>;
