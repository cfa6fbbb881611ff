use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Last traded price of a symbol at a specific point in time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolPrice {
    pub symbol: String,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Whole-market price sample, replaced wholesale on every fetch
pub type PriceSnapshot = HashMap<String, SymbolPrice>;

/// Symbol whose short-window move crossed a buy threshold
#[derive(Debug, Clone, PartialEq)]
pub struct BuyCandidate {
    pub symbol: String,
    pub last_price: f64,
    pub now_price: f64,
    /// Percentage change between the two samples
    pub change: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    PendingCancel,
    Rejected,
    Expired,
    #[serde(other)]
    Unknown,
}

impl OrderStatus {
    /// The order will not change state any more
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// Acknowledgement of an order accepted by the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub symbol: String,
    pub order_id: i64,
    pub client_order_id: Option<String>,
}

/// Fill details of an order as reported by the exchange
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderFill {
    pub symbol: String,
    pub order_id: i64,
    pub side: OrderSide,
    pub status: OrderStatus,
    pub executed_quantity: f64,
    pub cumulative_quote_quantity: f64,
    pub updated_at: DateTime<Utc>,
}

/// Quantity rules the exchange enforces for a symbol
#[derive(Debug, Clone, PartialEq)]
pub struct TradingRules {
    pub symbol: String,
    pub step_size: f64,
    /// Number of decimals allowed in an order quantity
    pub lot_precision: u32,
}

/// An open position in the ledger, one per held symbol
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub symbol: String,
    pub order_id: i64,
    pub opened_at: DateTime<Utc>,
    pub executed_quantity: f64,
    pub cumulative_quote_quantity: f64,
    /// Fractional profit target, raised by trailing take-profit
    pub take_profit: f64,
    /// Fractional soft loss floor; `None` means no soft stop
    pub stop_loss: Option<f64>,
    /// Fractional hard loss floor; `None` means no forced stop
    pub force_stop_loss: Option<f64>,
    pub volume: f64,
    pub lot_precision: u32,
}

impl Position {
    /// Average price paid per unit.
    ///
    /// Returns `None` when nothing was executed, so a broken fill can never
    /// look like a profitable position.
    pub fn cost_basis(&self) -> Option<f64> {
        if self.executed_quantity > 0.0 {
            Some(self.cumulative_quote_quantity / self.executed_quantity)
        } else {
            None
        }
    }

    /// Time elapsed since the opening fill
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.opened_at
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SellReason {
    TakeProfit,
    StopLoss,
    ForceStopLoss,
}

impl fmt::Display for SellReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SellReason::TakeProfit => "order reached take profit price",
            SellReason::StopLoss => "order reached stop loss price",
            SellReason::ForceStopLoss => "order reached force stop loss price",
        };
        f.write_str(text)
    }
}

/// Instruction to close a position, consumed exactly once by the sell executor
#[derive(Debug, Clone, PartialEq)]
pub struct SellBill {
    pub position: Position,
    pub reason: SellReason,
    /// Percentage change of the current price against the cost basis
    pub price_change: f64,
    pub price: f64,
}
