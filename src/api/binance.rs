use crate::api::{ExchangeError, ExchangeGateway, ExchangeResult};
use crate::execution::sizing::{format_quantity, lot_precision_from_step};
use crate::models::{
    OrderFill, OrderSide, OrderStatus, PlacedOrder, PriceSnapshot, SymbolPrice, TradingRules,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const RECV_WINDOW_MS: u64 = 50_000;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const ORDER_RETRY_BACKOFF_MS: u64 = 250;
const INVALID_SYMBOL_CODE: &str = "-1121";

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
}

/// Binance spot REST client
///
/// Cloneable; all clones share the HTTP pool and the request-rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Credentials,
    rate_limiter: Arc<BinanceRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TickerResponse {
    Many(Vec<TickerPrice>),
    One(TickerPrice),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    symbol: String,
    order_id: i64,
    #[serde(default)]
    client_order_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponse {
    symbol: String,
    order_id: i64,
    status: OrderStatus,
    side: OrderSide,
    executed_qty: String,
    cummulative_quote_qty: String,
    #[serde(default)]
    update_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ExchangeInfo {
    symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Deserialize)]
struct SymbolInfo {
    symbol: String,
    #[serde(default)]
    filters: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
    msg: String,
}

// ============== Implementation ==============

impl BinanceClient {
    pub fn new(
        credentials: Credentials,
        proxy_url: Option<&str>,
        requests_per_minute: u32,
    ) -> ExchangeResult<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));
        if let Some(proxy_url) = proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        let quota = Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client: builder.build()?,
            base_url: crate::config::DEFAULT_BASE_URL.to_string(),
            credentials,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    /// Point the client at another endpoint (testnet, mock server)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// HMAC-SHA256 signature of a query string, hex encoded
    fn sign(&self, query: &str) -> String {
        match HmacSha256::new_from_slice(self.credentials.secret_key.as_bytes()) {
            Ok(mut mac) => {
                mac.update(query.as_bytes());
                hex::encode(mac.finalize().into_bytes())
            }
            // HMAC accepts keys of any length
            Err(_) => String::new(),
        }
    }

    async fn send_public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> ExchangeResult<T> {
        self.rate_limiter.until_ready().await;

        let mut url = format!("{}{}", self.base_url, path);
        if !params.is_empty() {
            url.push('?');
            url.push_str(&encode_query(params));
        }

        let response = self.client.get(&url).send().await?;
        parse_response(response).await
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        mut params: Vec<(&str, String)>,
    ) -> ExchangeResult<T> {
        self.rate_limiter.until_ready().await;

        params.push(("recvWindow", RECV_WINDOW_MS.to_string()));
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));

        let query = encode_query(&params);
        let signature = self.sign(&query);
        let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.credentials.api_key)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn query_order_once(&self, symbol: &str, order_id: i64) -> ExchangeResult<OrderFill> {
        let params = vec![("symbol", symbol.to_string()), ("orderId", order_id.to_string())];
        let order: OrderResponse = self.send_signed(Method::GET, "/api/v3/order", params).await?;

        let updated_at = order
            .update_time
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            .unwrap_or_else(Utc::now);

        Ok(OrderFill {
            symbol: order.symbol,
            order_id: order.order_id,
            side: order.side,
            status: order.status,
            executed_quantity: order.executed_qty.parse().unwrap_or(0.0),
            cumulative_quote_quantity: order.cummulative_quote_qty.parse().unwrap_or(0.0),
            updated_at,
        })
    }
}

fn encode_query(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> ExchangeResult<T> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        let message = match serde_json::from_str::<ApiErrorBody>(&body) {
            Ok(err) => format!("{} {}", err.code, err.msg),
            Err(_) => body,
        };
        return Err(ExchangeError::Api {
            code: i64::from(status.as_u16()),
            message,
        });
    }

    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl ExchangeGateway for BinanceClient {
    async fn fetch_prices(&self, symbol: Option<&str>) -> ExchangeResult<PriceSnapshot> {
        let params: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", s.to_string())])
            .unwrap_or_default();

        let response: TickerResponse = self.send_public("/api/v3/ticker/price", &params).await?;
        let tickers = match response {
            TickerResponse::Many(tickers) => tickers,
            TickerResponse::One(ticker) => vec![ticker],
        };

        let now = Utc::now();
        let mut prices = PriceSnapshot::with_capacity(tickers.len());
        for ticker in tickers {
            match ticker.price.parse::<f64>() {
                Ok(price) if price > 0.0 => {
                    prices.insert(
                        ticker.symbol.clone(),
                        SymbolPrice {
                            symbol: ticker.symbol,
                            price,
                            timestamp: now,
                        },
                    );
                }
                _ => {
                    tracing::debug!(symbol = %ticker.symbol, price = %ticker.price, "Skipping unusable ticker price");
                }
            }
        }

        Ok(prices)
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> ExchangeResult<PlacedOrder> {
        if !(quantity > 0.0) {
            return Err(ExchangeError::InvalidQuantity {
                symbol: symbol.to_string(),
                quantity,
            });
        }

        let client_order_id = uuid::Uuid::new_v4().simple().to_string();
        let params = vec![
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", format_quantity(quantity)),
            ("newClientOrderId", client_order_id),
            ("newOrderRespType", "ACK".to_string()),
        ];

        let ack: OrderAck = self.send_signed(Method::POST, "/api/v3/order", params).await?;

        tracing::info!(
            symbol = %ack.symbol,
            order_id = ack.order_id,
            side = side.as_str(),
            quantity,
            "Order accepted"
        );

        Ok(PlacedOrder {
            symbol: ack.symbol,
            order_id: ack.order_id,
            client_order_id: ack.client_order_id,
        })
    }

    async fn get_order_status(
        &self,
        symbol: &str,
        order_id: i64,
        max_retries: u32,
    ) -> ExchangeResult<OrderFill> {
        let attempts = max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.query_order_once(symbol, order_id).await {
                Ok(fill) => return Ok(fill),
                Err(e) => {
                    tracing::warn!(
                        "Order query {}/{} failed for {} #{}: {}",
                        attempt,
                        attempts,
                        symbol,
                        order_id,
                        e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        sleep(Duration::from_millis(ORDER_RETRY_BACKOFF_MS * u64::from(attempt))).await;
                    }
                }
            }
        }

        Err(ExchangeError::RetriesExhausted {
            symbol: symbol.to_string(),
            order_id,
            attempts,
            last_error: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn get_symbol_trading_rules(&self, symbol: &str) -> ExchangeResult<TradingRules> {
        let params = [("symbol", symbol.to_string())];
        let info: ExchangeInfo = match self.send_public("/api/v3/exchangeInfo", &params).await {
            Ok(info) => info,
            Err(ExchangeError::Api { message, .. }) if message.contains(INVALID_SYMBOL_CODE) => {
                return Err(ExchangeError::SymbolNotFound(symbol.to_string()));
            }
            Err(e) => return Err(e),
        };

        let symbol_info = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))?;

        let step_size = symbol_info
            .filters
            .iter()
            .filter(|f| f.get("filterType").and_then(|v| v.as_str()) == Some("LOT_SIZE"))
            .find_map(|f| f.get("stepSize").and_then(|v| v.as_str()).map(str::to_string))
            .ok_or_else(|| ExchangeError::MissingLotSize(symbol.to_string()))?;

        let lot_precision = lot_precision_from_step(&step_size)
            .ok_or_else(|| ExchangeError::MissingLotSize(symbol.to_string()))?;

        Ok(TradingRules {
            symbol: symbol_info.symbol,
            step_size: step_size.parse().unwrap_or(0.0),
            lot_precision,
        })
    }
}
