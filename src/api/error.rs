/// Failures talking to the exchange
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("exchange api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("failed to decode exchange response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),
    #[error("no lot size rule for symbol: {0}")]
    MissingLotSize(String),
    #[error("invalid order quantity {quantity} for {symbol}")]
    InvalidQuantity { symbol: String, quantity: f64 },
    #[error("order {order_id} for {symbol} ended as {status:?} without a fill")]
    OrderNotFilled {
        symbol: String,
        order_id: i64,
        status: crate::models::OrderStatus,
    },
    #[error("gave up on order {order_id} for {symbol} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        symbol: String,
        order_id: i64,
        attempts: u32,
        last_error: String,
    },
    #[error("{0}")]
    Rejected(String),
}

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;
