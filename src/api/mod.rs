pub mod binance;
pub mod gateway;
pub mod notifier;
pub mod paper;
pub mod retry;

pub use binance::{BinanceFuturesClient, Credentials};
pub use gateway::{ExchangeGateway, GatewayResult};
pub use notifier::{notify_detached, LogNotifier, Notifier};
pub use paper::{
    PaperExchange, PaperOp, PaperOrder, PaperOrderStatus, PaperOrderType, PaperPosition,
};
pub use retry::RetryPolicy;
