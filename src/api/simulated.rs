use crate::api::{ExchangeError, ExchangeGateway, ExchangeResult};
use crate::models::{
    OrderFill, OrderSide, OrderStatus, PlacedOrder, PriceSnapshot, SymbolPrice, TradingRules,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

const DEFAULT_LOT_PRECISION: u32 = 2;

#[derive(Default)]
struct Book {
    prices: HashMap<String, f64>,
    lot_precisions: HashMap<String, u32>,
    orders: HashMap<i64, OrderFill>,
    expiring: u32,
    expired_fraction: f64,
}

/// In-memory exchange that fills market orders at the last known price.
///
/// With an upstream gateway attached, prices and trading rules come from
/// upstream while orders stay local (dry run).
#[derive(Clone, Default)]
pub struct SimulatedExchange {
    book: Arc<Mutex<Book>>,
    next_order_id: Arc<AtomicI64>,
    failing_orders: Arc<AtomicU32>,
    upstream: Option<Arc<dyn ExchangeGateway>>,
}

impl SimulatedExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paper trade against prices of a live exchange
    pub fn with_upstream(upstream: Arc<dyn ExchangeGateway>) -> Self {
        Self {
            upstream: Some(upstream),
            ..Self::default()
        }
    }

    fn book(&self) -> std::sync::MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.book().prices.insert(symbol.to_string(), price);
    }

    pub fn set_lot_precision(&self, symbol: &str, precision: u32) {
        self.book().lot_precisions.insert(symbol.to_string(), precision);
    }

    /// Make the next `count` order placements fail
    pub fn fail_next_orders(&self, count: u32) {
        self.failing_orders.store(count, Ordering::SeqCst);
    }

    /// Let the next `count` orders expire with only `fraction` of the
    /// requested quantity executed
    pub fn expire_next_orders(&self, count: u32, fraction: f64) {
        let mut book = self.book();
        book.expiring = count;
        book.expired_fraction = fraction.clamp(0.0, 1.0);
    }

    /// Every order placed so far, oldest first
    pub fn orders(&self) -> Vec<OrderFill> {
        let mut orders: Vec<OrderFill> = self.book().orders.values().cloned().collect();
        orders.sort_by_key(|o| o.order_id);
        orders
    }

    fn take_failure(&self) -> bool {
        self.failing_orders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ExchangeGateway for SimulatedExchange {
    async fn fetch_prices(&self, symbol: Option<&str>) -> ExchangeResult<PriceSnapshot> {
        if let Some(upstream) = &self.upstream {
            let prices = upstream.fetch_prices(symbol).await?;
            let mut book = self.book();
            for (name, sample) in &prices {
                book.prices.insert(name.clone(), sample.price);
            }
            return Ok(prices);
        }

        let now = Utc::now();
        let book = self.book();
        Ok(book
            .prices
            .iter()
            .filter(|(name, _)| symbol.map_or(true, |s| s == name.as_str()))
            .map(|(name, &price)| {
                (
                    name.clone(),
                    SymbolPrice {
                        symbol: name.clone(),
                        price,
                        timestamp: now,
                    },
                )
            })
            .collect())
    }

    async fn place_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> ExchangeResult<PlacedOrder> {
        if self.take_failure() {
            return Err(ExchangeError::Rejected(format!(
                "simulated rejection of {} {}",
                side.as_str(),
                symbol
            )));
        }
        if !(quantity > 0.0) {
            return Err(ExchangeError::InvalidQuantity {
                symbol: symbol.to_string(),
                quantity,
            });
        }

        let mut book = self.book();
        let price = *book
            .prices
            .get(symbol)
            .ok_or_else(|| ExchangeError::SymbolNotFound(symbol.to_string()))?;

        let (status, executed) = if book.expiring > 0 {
            book.expiring -= 1;
            (OrderStatus::Expired, quantity * book.expired_fraction)
        } else {
            (OrderStatus::Filled, quantity)
        };

        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst) + 1;
        book.orders.insert(
            order_id,
            OrderFill {
                symbol: symbol.to_string(),
                order_id,
                side,
                status,
                executed_quantity: executed,
                cumulative_quote_quantity: executed * price,
                updated_at: Utc::now(),
            },
        );

        tracing::info!(
            symbol,
            order_id,
            side = side.as_str(),
            quantity,
            executed,
            price,
            status = ?status,
            "Simulated order"
        );

        Ok(PlacedOrder {
            symbol: symbol.to_string(),
            order_id,
            client_order_id: Some(format!("sim-{}", order_id)),
        })
    }

    async fn get_order_status(
        &self,
        symbol: &str,
        order_id: i64,
        max_retries: u32,
    ) -> ExchangeResult<OrderFill> {
        self.book()
            .orders
            .get(&order_id)
            .filter(|o| o.symbol == symbol)
            .cloned()
            .ok_or_else(|| ExchangeError::RetriesExhausted {
                symbol: symbol.to_string(),
                order_id,
                attempts: max_retries.max(1),
                last_error: "unknown order".to_string(),
            })
    }

    async fn get_symbol_trading_rules(&self, symbol: &str) -> ExchangeResult<TradingRules> {
        let local = {
            let book = self.book();
            book.lot_precisions
                .get(symbol)
                .copied()
                .or_else(|| book.prices.contains_key(symbol).then_some(DEFAULT_LOT_PRECISION))
        };

        match (local, &self.upstream) {
            (Some(lot_precision), _) => Ok(TradingRules {
                symbol: symbol.to_string(),
                step_size: 10f64.powi(-(lot_precision as i32)),
                lot_precision,
            }),
            (None, Some(upstream)) => upstream.get_symbol_trading_rules(symbol).await,
            (None, None) => Err(ExchangeError::SymbolNotFound(symbol.to_string())),
        }
    }
}
