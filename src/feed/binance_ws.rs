use super::transport::{FeedTransport, TransportFactory};
use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::models::Tick;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Binance futures aggregate trade event
#[derive(Debug, Deserialize)]
struct WsAggTrade {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "T")]
    trade_time: i64,
}

/// Parse an `aggTrade` frame; other payloads (subscription acks etc.) yield `None`
pub fn parse_agg_trade(text: &str) -> Result<Option<Tick>, FeedError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|e| FeedError::Transport(e.to_string()))?;

    if value.get("e").and_then(|e| e.as_str()) != Some("aggTrade") {
        return Ok(None);
    }

    let trade: WsAggTrade =
        serde_json::from_value(value).map_err(|e| FeedError::Transport(e.to_string()))?;
    let price: f64 = trade
        .price
        .parse()
        .map_err(|_| FeedError::Transport(format!("invalid price '{}'", trade.price)))?;
    let timestamp = Utc
        .timestamp_millis_opt(trade.trade_time)
        .single()
        .unwrap_or_else(Utc::now);

    Ok(Some(Tick {
        symbol: trade.symbol,
        price,
        timestamp,
    }))
}

/// `<symbol>@aggTrade` stream over tokio-tungstenite with ping keepalive
pub struct BinanceAggTradeTransport {
    base_url: String,
    ping_interval: Duration,
    pong_timeout: Duration,
    ws: Option<WsStream>,
    awaiting_pong: bool,
}

impl BinanceAggTradeTransport {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            base_url: config.ws_base_url.trim_end_matches('/').to_string(),
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
            ws: None,
            awaiting_pong: false,
        }
    }

    fn stream_url(&self, symbol: &str) -> String {
        format!("{}/{}@aggTrade", self.base_url, symbol.to_lowercase())
    }
}

#[async_trait]
impl FeedTransport for BinanceAggTradeTransport {
    async fn connect(&mut self, symbol: &str) -> Result<(), FeedError> {
        self.close().await;

        let url = self.stream_url(symbol);
        tracing::info!("Connecting to Binance WebSocket: {}", url);

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| FeedError::Connect(e.to_string()))?;

        self.ws = Some(ws);
        self.awaiting_pong = false;
        Ok(())
    }

    async fn next_trade(&mut self) -> Result<Tick, FeedError> {
        loop {
            let wait = if self.awaiting_pong {
                self.pong_timeout
            } else {
                self.ping_interval
            };
            let ws = self.ws.as_mut().ok_or(FeedError::Closed)?;

            let frame = match timeout(wait, ws.next()).await {
                Ok(frame) => frame,
                Err(_) if self.awaiting_pong => return Err(FeedError::KeepaliveTimeout),
                Err(_) => {
                    ws.send(Message::Ping(Vec::new().into()))
                        .await
                        .map_err(|e| FeedError::Transport(e.to_string()))?;
                    self.awaiting_pong = true;
                    continue;
                }
            };

            // Any frame proves the connection is alive
            self.awaiting_pong = false;

            match frame {
                None => return Err(FeedError::Closed),
                Some(Err(e)) => return Err(FeedError::Transport(e.to_string())),
                Some(Ok(Message::Text(text))) => {
                    if let Some(tick) = parse_agg_trade(&text)? {
                        return Ok(tick);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    ws.send(Message::Pong(payload))
                        .await
                        .map_err(|e| FeedError::Transport(e.to_string()))?;
                }
                Some(Ok(Message::Close(_))) => return Err(FeedError::Closed),
                Some(Ok(_)) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            if let Err(e) = ws.close(None).await {
                tracing::debug!("WebSocket close failed: {}", e);
            }
        }
    }
}

/// Builds Binance transports from the feed configuration
#[derive(Debug, Clone)]
pub struct BinanceTransportFactory {
    config: FeedConfig,
}

impl BinanceTransportFactory {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for BinanceTransportFactory {
    fn create(&self) -> Box<dyn FeedTransport> {
        Box::new(BinanceAggTradeTransport::new(&self.config))
    }
}
