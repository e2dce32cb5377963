use super::gateway::{ExchangeGateway, GatewayResult};
use super::retry::RetryPolicy;
use crate::config::ExchangeConfig;
use crate::error::GatewayError;
use crate::models::{
    AccountState, Candle, OrderBookTop, OrderId, OrderSide, Stats24h, StopKind, SymbolFilters,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Duration;

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// API credentials for signed endpoints
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    /// Read `BINANCE_API_KEY` / `BINANCE_API_SECRET`
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("BINANCE_API_KEY").ok()?;
        let api_secret = std::env::var("BINANCE_API_SECRET").ok()?;
        if api_key.is_empty() || api_secret.is_empty() {
            return None;
        }
        Some(Self {
            api_key,
            api_secret,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .finish()
    }
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    order_id: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    total_wallet_balance: String,
    total_margin_balance: String,
    total_unrealized_profit: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    filters: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct DepthResponse {
    bids: Vec<[String; 2]>,
    asks: Vec<[String; 2]>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerResponse {
    volume: String,
    last_price: String,
}

fn parse_f64(raw: &str, field: &str) -> GatewayResult<f64> {
    raw.parse::<f64>()
        .map_err(|_| GatewayError::Decode(format!("{} is not a number: {}", field, raw)))
}

fn value_f64(value: &Value, field: &str) -> GatewayResult<f64> {
    match value {
        Value::String(s) => parse_f64(s, field),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| GatewayError::Decode(format!("{} out of range", field))),
        _ => Err(GatewayError::Decode(format!("{} has unexpected type", field))),
    }
}

/// Format a price/quantity without float noise (e.g. 0.30000000000000004)
fn format_decimal(value: f64) -> String {
    let formatted = format!("{:.8}", value);
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

/// Binance USDⓈ-M futures REST client
///
/// Every call goes through the shared rate limiter and the retry policy.
/// Symbol filters are cached after the first exchangeInfo lookup.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
    recv_window: u64,
    credentials: Option<Credentials>,
    retry: RetryPolicy,
    rate_limiter: Arc<BinanceRateLimiter>,
    filters_cache: Arc<RwLock<HashMap<String, SymbolFilters>>>,
}

impl BinanceFuturesClient {
    pub fn new(config: &ExchangeConfig, credentials: Option<Credentials>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let rpm = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_minute(rpm)));

        Ok(Self {
            client,
            base_url: config.rest_base_url.trim_end_matches('/').to_string(),
            recv_window: config.recv_window,
            credentials,
            retry: RetryPolicy {
                max_attempts: config.max_retries,
                initial_backoff: Duration::from_millis(config.initial_backoff_ms),
                max_backoff: Duration::from_millis(config.max_backoff_ms),
            },
            rate_limiter,
            filters_cache: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn sign(secret: &str, query: &str) -> GatewayResult<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| GatewayError::Decode(format!("invalid API secret: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Single request without retry
    async fn request_once<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        signed: bool,
    ) -> GatewayResult<T> {
        self.rate_limiter.until_ready().await;

        let mut query = Self::build_query(params);
        let mut request = if signed {
            let credentials = self.credentials.as_ref().ok_or_else(|| GatewayError::Api {
                code: -2014,
                message: "API credentials not configured".to_string(),
            })?;
            let timestamp = format!(
                "timestamp={}&recvWindow={}",
                Utc::now().timestamp_millis(),
                self.recv_window
            );
            query = if query.is_empty() {
                timestamp
            } else {
                format!("{}&{}", query, timestamp)
            };
            let signature = Self::sign(&credentials.api_secret, &query)?;
            query = format!("{}&signature={}", query, signature);

            self.client
                .request(method.clone(), format!("{}{}?{}", self.base_url, endpoint, query))
                .header("X-MBX-APIKEY", &credentials.api_key)
        } else if query.is_empty() {
            self.client
                .request(method.clone(), format!("{}{}", self.base_url, endpoint))
        } else {
            self.client
                .request(method.clone(), format!("{}{}?{}", self.base_url, endpoint, query))
        };

        if method == Method::POST {
            request = request.header("Content-Type", "application/x-www-form-urlencoded");
        }

        tracing::debug!("{} {}", method, endpoint);
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(GatewayError::RateLimited);
        }
        if status.is_server_error() {
            return Err(GatewayError::Server {
                status: status.as_u16(),
                message: body,
            });
        }
        if !status.is_success() {
            return Err(match serde_json::from_str::<ApiErrorBody>(&body) {
                Ok(err) => GatewayError::Api {
                    code: err.code,
                    message: err.msg,
                },
                Err(_) => GatewayError::Api {
                    code: status.as_u16() as i64,
                    message: body,
                },
            });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn request<T: DeserializeOwned>(
        &self,
        what: &str,
        method: Method,
        endpoint: &str,
        params: Vec<(&str, String)>,
        signed: bool,
    ) -> GatewayResult<T> {
        let params = &params;
        self.retry
            .run(what, move || {
                self.request_once(method.clone(), endpoint, params, signed)
            })
            .await
    }

    async fn fetch_filters(&self, symbol: &str) -> GatewayResult<SymbolFilters> {
        let info: ExchangeInfoResponse = self
            .request("exchangeInfo", Method::GET, "/fapi/v1/exchangeInfo", vec![], false)
            .await?;

        let entry = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| GatewayError::MissingData(format!("unknown symbol {}", symbol)))?;

        let mut tick_size = None;
        let mut lot_size = None;
        for filter in &entry.filters {
            match filter.get("filterType").and_then(Value::as_str) {
                Some("PRICE_FILTER") => {
                    if let Some(v) = filter.get("tickSize") {
                        tick_size = Some(value_f64(v, "tickSize")?);
                    }
                }
                Some("LOT_SIZE") => {
                    if let Some(v) = filter.get("stepSize") {
                        lot_size = Some(value_f64(v, "stepSize")?);
                    }
                }
                _ => {}
            }
        }

        match (tick_size, lot_size) {
            (Some(tick_size), Some(lot_size)) if tick_size > 0.0 && lot_size > 0.0 => {
                Ok(SymbolFilters {
                    tick_size,
                    lot_size,
                })
            }
            _ => Err(GatewayError::MissingData(format!(
                "incomplete filters for {}",
                symbol
            ))),
        }
    }
}

#[async_trait]
impl ExchangeGateway for BinanceFuturesClient {
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> GatewayResult<OrderId> {
        // Fixed client id makes a retried submission idempotent
        let client_id = uuid::Uuid::new_v4().simple().to_string();
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", format_decimal(quantity)),
            ("newClientOrderId", client_id),
        ];
        let response: OrderResponse = self
            .request("market order", Method::POST, "/fapi/v1/order", params, true)
            .await?;
        Ok(OrderId(response.order_id.to_string()))
    }

    async fn place_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        stop_price: f64,
        quantity: f64,
        kind: StopKind,
    ) -> GatewayResult<OrderId> {
        let client_id = uuid::Uuid::new_v4().simple().to_string();
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", kind.order_type().to_string()),
            ("stopPrice", format_decimal(stop_price)),
            ("quantity", format_decimal(quantity)),
            ("reduceOnly", "true".to_string()),
            ("newClientOrderId", client_id),
        ];
        let response: OrderResponse = self
            .request("stop order", Method::POST, "/fapi/v1/order", params, true)
            .await?;
        Ok(OrderId(response.order_id.to_string()))
    }

    async fn cancel_order(&self, symbol: &str, order_id: &OrderId) -> GatewayResult<()> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("orderId", order_id.0.clone()),
        ];
        let _: Value = self
            .request("cancel order", Method::DELETE, "/fapi/v1/order", params, true)
            .await?;
        Ok(())
    }

    async fn get_account_state(&self) -> GatewayResult<AccountState> {
        let account: AccountResponse = self
            .request("account", Method::GET, "/fapi/v2/account", vec![], true)
            .await?;
        Ok(AccountState {
            wallet_balance: parse_f64(&account.total_wallet_balance, "totalWalletBalance")?,
            margin_balance: parse_f64(&account.total_margin_balance, "totalMarginBalance")?,
            unrealized_pnl: parse_f64(&account.total_unrealized_profit, "totalUnrealizedProfit")?,
        })
    }

    async fn get_symbol_filters(&self, symbol: &str) -> GatewayResult<SymbolFilters> {
        if let Some(filters) = self.filters_cache.read().await.get(symbol) {
            return Ok(*filters);
        }

        let filters = self.fetch_filters(symbol).await?;
        self.filters_cache
            .write()
            .await
            .insert(symbol.to_string(), filters);
        Ok(filters)
    }

    async fn get_order_book_top(&self, symbol: &str) -> GatewayResult<OrderBookTop> {
        let params = vec![("symbol", symbol.to_string()), ("limit", "5".to_string())];
        let depth: DepthResponse = self
            .request("depth", Method::GET, "/fapi/v1/depth", params, false)
            .await?;

        let best_bid = depth
            .bids
            .first()
            .ok_or_else(|| GatewayError::MissingData(format!("no bids for {}", symbol)))?;
        let best_ask = depth
            .asks
            .first()
            .ok_or_else(|| GatewayError::MissingData(format!("no asks for {}", symbol)))?;

        Ok(OrderBookTop {
            best_bid: parse_f64(&best_bid[0], "bid")?,
            best_ask: parse_f64(&best_ask[0], "ask")?,
        })
    }

    async fn get_24h_stats(&self, symbol: &str) -> GatewayResult<Stats24h> {
        let params = vec![("symbol", symbol.to_string())];
        let ticker: TickerResponse = self
            .request("24h ticker", Method::GET, "/fapi/v1/ticker/24hr", params, false)
            .await?;
        Ok(Stats24h {
            volume: parse_f64(&ticker.volume, "volume")?,
            last_price: parse_f64(&ticker.last_price, "lastPrice")?,
        })
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> GatewayResult<Vec<Candle>> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        let rows: Vec<Vec<Value>> = self
            .request("klines", Method::GET, "/fapi/v1/klines", params, false)
            .await?;

        rows.iter()
            .map(|row| {
                if row.len() < 6 {
                    return Err(GatewayError::Decode("short kline row".to_string()));
                }
                let open_time = row[0]
                    .as_i64()
                    .ok_or_else(|| GatewayError::Decode("kline open time".to_string()))?;
                let timestamp = Utc
                    .timestamp_millis_opt(open_time)
                    .single()
                    .ok_or_else(|| GatewayError::Decode("kline timestamp".to_string()))?;
                Ok(Candle {
                    timestamp,
                    open: value_f64(&row[1], "open")?,
                    high: value_f64(&row[2], "high")?,
                    low: value_f64(&row[3], "low")?,
                    close: value_f64(&row[4], "close")?,
                    volume: value_f64(&row[5], "volume")?,
                })
            })
            .collect()
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> GatewayResult<()> {
        let params = vec![
            ("symbol", symbol.to_string()),
            ("leverage", leverage.to_string()),
        ];
        let _: Value = self
            .request("leverage", Method::POST, "/fapi/v1/leverage", params, true)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn test_client(server: &mockito::Server, credentials: Option<Credentials>) -> BinanceFuturesClient {
        let config = ExchangeConfig {
            rest_base_url: server.url(),
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            ..ExchangeConfig::default()
        };
        BinanceFuturesClient::new(&config, credentials).unwrap()
    }

    fn creds() -> Credentials {
        Credentials {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
        }
    }

    #[test]
    fn test_sign_matches_reference_vector() {
        // Example from the Binance API docs
        let secret = "NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j";
        let query = "symbol=LTCBTC&side=BUY&type=LIMIT&timeInForce=GTC&quantity=1&price=0.1&recvWindow=5000&timestamp=1499827319559";
        let signature = BinanceFuturesClient::sign(secret, query).unwrap();
        assert_eq!(
            signature,
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(0.1 + 0.2), "0.3");
        assert_eq!(format_decimal(150.0), "150");
        assert_eq!(format_decimal(0.00012), "0.00012");
    }

    #[tokio::test]
    async fn test_order_book_top() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fapi/v1/depth")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("symbol".into(), "BTCUSDT".into()),
                Matcher::UrlEncoded("limit".into(), "5".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"lastUpdateId":1,"bids":[["100.0","3"]],"asks":[["100.1","2"]]}"#)
            .create_async()
            .await;

        let client = test_client(&server, None);
        let top = client.get_order_book_top("BTCUSDT").await.unwrap();

        assert_eq!(top.best_bid, 100.0);
        assert_eq!(top.best_ask, 100.1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_book_is_missing_data() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/depth")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"lastUpdateId":1,"bids":[],"asks":[]}"#)
            .create_async()
            .await;

        let client = test_client(&server, None);
        let result = client.get_order_book_top("BTCUSDT").await;

        assert!(matches!(result, Err(GatewayError::MissingData(_))));
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fapi/v1/ticker/24hr")
            .match_query(Matcher::Any)
            .with_status(503)
            .with_body("busy")
            .expect(3)
            .create_async()
            .await;

        let client = test_client(&server, None);
        let result = client.get_24h_stats("ETHUSDT").await;

        assert!(matches!(result, Err(GatewayError::Server { status: 503, .. })));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::Any)
            .match_header("X-MBX-APIKEY", "key")
            .with_status(400)
            .with_body(r#"{"code":-2019,"msg":"Margin is insufficient."}"#)
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server, Some(creds()));
        let result = client
            .place_market_order("BTCUSDT", OrderSide::Buy, 0.01)
            .await;

        match result {
            Err(GatewayError::Api { code, .. }) => assert_eq!(code, -2019),
            other => panic!("unexpected result: {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_signed_request_requires_credentials() {
        let server = mockito::Server::new_async().await;
        let client = test_client(&server, None);

        let result = client.get_account_state().await;
        assert!(matches!(result, Err(GatewayError::Api { code: -2014, .. })));
    }

    #[tokio::test]
    async fn test_stop_order_params() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/fapi/v1/order")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "STOP_MARKET".into()),
                Matcher::UrlEncoded("side".into(), "SELL".into()),
                Matcher::UrlEncoded("stopPrice".into(), "98.5".into()),
                Matcher::UrlEncoded("reduceOnly".into(), "true".into()),
                Matcher::Regex("signature=[0-9a-f]{64}".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"orderId":42,"status":"NEW"}"#)
            .create_async()
            .await;

        let client = test_client(&server, Some(creds()));
        let id = client
            .place_stop_order("BTCUSDT", OrderSide::Sell, 98.5, 1.5, StopKind::StopLoss)
            .await
            .unwrap();

        assert_eq!(id, OrderId("42".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_symbol_filters_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/fapi/v1/exchangeInfo")
            .with_status(200)
            .with_body(
                r#"{"symbols":[{"symbol":"BTCUSDT","filters":[
                    {"filterType":"PRICE_FILTER","tickSize":"0.10","minPrice":"556.80"},
                    {"filterType":"LOT_SIZE","stepSize":"0.001","minQty":"0.001"}
                ]}]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server, None);
        let first = client.get_symbol_filters("BTCUSDT").await.unwrap();
        let second = client.get_symbol_filters("BTCUSDT").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.tick_size, 0.1);
        assert_eq!(first.lot_size, 0.001);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_klines_parsing() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/fapi/v1/klines")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                r#"[[1700000000000,"100.0","101.0","99.0","100.5","12.5",1700000299999,"0",10,"0","0","0"]]"#,
            )
            .create_async()
            .await;

        let client = test_client(&server, None);
        let candles = client.get_klines("BTCUSDT", "5m", 1).await.unwrap();

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].high, 101.0);
        assert_eq!(candles[0].close, 100.5);
        assert_eq!(candles[0].timestamp.timestamp_millis(), 1_700_000_000_000);
    }
}
