pub mod binance_ws;
pub mod price_feed;
pub mod state;
pub mod transport;

pub use binance_ws::{parse_agg_trade, BinanceAggTradeTransport, BinanceTransportFactory};
pub use price_feed::{FeedEvent, FeedEvents, PriceFeed};
pub use state::{ConnectionMachine, FeedState, Reconnect};
pub use transport::{FeedTransport, TransportFactory};
