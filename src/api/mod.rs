pub mod binance;
pub mod error;
pub mod simulated;

pub use binance::{BinanceClient, Credentials};
pub use error::{ExchangeError, ExchangeResult};
pub use simulated::SimulatedExchange;

use crate::models::{OrderFill, OrderSide, PlacedOrder, PriceSnapshot, TradingRules};
use async_trait::async_trait;

/// Everything the trading loops need from an exchange.
///
/// Implementations must be safe to share between the watcher, the
/// evaluator and both executors.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Latest prices for every symbol, or only `symbol` when given
    async fn fetch_prices(&self, symbol: Option<&str>) -> ExchangeResult<PriceSnapshot>;

    /// Place a market order for `quantity` base units
    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> ExchangeResult<PlacedOrder>;

    /// Query an order, retrying failed requests up to `max_retries` times
    async fn get_order_status(
        &self,
        symbol: &str,
        order_id: i64,
        max_retries: u32,
    ) -> ExchangeResult<OrderFill>;

    /// Quantity precision rules for `symbol`
    async fn get_symbol_trading_rules(&self, symbol: &str) -> ExchangeResult<TradingRules>;
}

/// Fetch the full market once to make sure the exchange is reachable.
///
/// Returns the number of symbols quoted.
pub async fn check_connection(gateway: &dyn ExchangeGateway) -> ExchangeResult<usize> {
    let prices = gateway.fetch_prices(None).await?;
    Ok(prices.len())
}
