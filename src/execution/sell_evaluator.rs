use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::SellOptions;
use crate::execution::TradingContext;
use crate::models::{Position, PriceSnapshot, SellBill, SellReason};

/// Outcome of checking one position against the current price
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitDecision {
    Hold,
    /// Take profit reached with trailing on: raise the targets instead of selling
    Trail,
    Sell(SellReason),
}

/// Check take profit first, then the forced stop, then the soft stop
pub fn evaluate_exit(
    position: &Position,
    price: f64,
    options: &SellOptions,
    now: DateTime<Utc>,
) -> ExitDecision {
    let cost = match position.cost_basis() {
        Some(cost) => cost,
        None => return ExitDecision::Hold,
    };

    let take_profit_price = cost * (1.0 + position.take_profit);
    if price >= take_profit_price {
        return if options.enable_trailing_take_profit {
            ExitDecision::Trail
        } else {
            ExitDecision::Sell(SellReason::TakeProfit)
        };
    }

    if let Some(force) = position.force_stop_loss {
        if price <= cost * (1.0 + force) {
            return ExitDecision::Sell(SellReason::ForceStopLoss);
        }
    }

    if let Some(stop) = position.stop_loss {
        if price < cost * (1.0 + stop) {
            let grace = chrono::Duration::from_std(options.stop_loss_duration())
                .unwrap_or(chrono::Duration::MAX);
            if position.age_at(now) > grace {
                return ExitDecision::Sell(SellReason::StopLoss);
            }
        }
    }

    ExitDecision::Hold
}

/// Raise the profit target by one step and drag the soft stop along with it
pub fn apply_trailing(position: &mut Position, options: &SellOptions) {
    position.take_profit += options.trailing_take_profit;
    if let Some(stop) = position.stop_loss {
        position.stop_loss = Some(position.take_profit - options.trailing_stop_loss + stop);
    }
}

/// Percentage change of `price` against the position's cost basis
pub fn price_change(position: &Position, price: f64) -> f64 {
    match position.cost_basis() {
        Some(cost) if cost > 0.0 => (price - cost) / cost * 100.0,
        _ => 0.0,
    }
}

/// Watches open positions and issues sell bills
pub struct SellEvaluator {
    ctx: TradingContext,
}

impl SellEvaluator {
    pub fn new(ctx: TradingContext) -> Self {
        Self { ctx }
    }

    /// Check every open position against `prices`.
    ///
    /// Trailing adjustments are applied to the ledger directly. Returns the
    /// bills to send and how many positions were trailed.
    pub fn evaluate(&self, prices: &PriceSnapshot, now: DateTime<Utc>) -> (Vec<SellBill>, usize) {
        let options = self.ctx.options.snapshot();
        let mut bills = Vec::new();
        let mut trailed = 0;

        for (symbol, position) in self.ctx.ledger.snapshot() {
            let price = match prices.get(&symbol) {
                Some(sample) => sample.price,
                None => continue,
            };

            match evaluate_exit(&position, price, &options.sell, now) {
                ExitDecision::Hold => {}
                ExitDecision::Trail => {
                    let order_id = position.order_id;
                    let updated = self.ctx.ledger.update(&symbol, |p| {
                        if p.order_id == order_id {
                            apply_trailing(p, &options.sell);
                        }
                    });
                    if let Some(updated) = updated.filter(|p| p.order_id == order_id) {
                        tracing::info!(
                            "📈 Trailing {}: take_profit={:.4} stop_loss={:?}",
                            symbol,
                            updated.take_profit,
                            updated.stop_loss
                        );
                        self.ctx.hooks.trailing_adjusted(&updated);
                        trailed += 1;
                    }
                }
                ExitDecision::Sell(reason) => {
                    let change = price_change(&position, price);
                    tracing::info!("🔴 SELL signal {} at {} ({:.3}%): {}", symbol, price, change, reason);
                    bills.push(SellBill {
                        position,
                        reason,
                        price_change: change,
                        price,
                    });
                }
            }
        }

        (bills, trailed)
    }

    /// One pass: fetch prices, evaluate, persist trailing changes, send bills.
    ///
    /// Returns false once the sell queue is gone or shutdown was requested.
    pub async fn tick(&self, bills_tx: &mpsc::Sender<SellBill>, shutdown: &CancellationToken) -> bool {
        if self.ctx.ledger.is_empty() {
            return true;
        }

        let prices = match self.ctx.gateway.fetch_prices(None).await {
            Ok(prices) => prices,
            Err(e) => {
                tracing::warn!("Price fetch failed, skipping sell check: {}", e);
                return true;
            }
        };

        let (bills, trailed) = self.evaluate(&prices, Utc::now());

        if trailed > 0 {
            if let Err(e) = self.ctx.ledger.persist().await {
                tracing::error!("Failed to persist trailing adjustments: {}", e);
            }
        }

        for bill in bills {
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                sent = bills_tx.send(bill) => {
                    if sent.is_err() {
                        tracing::warn!("Sell queue closed");
                        return false;
                    }
                }
            }
        }

        true
    }

    pub async fn run(self, bills_tx: mpsc::Sender<SellBill>, shutdown: CancellationToken) {
        let period = self.ctx.options.snapshot().sell.interval();
        tracing::info!("🎯 Sell evaluator starting (every {:?})", period);

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if !self.tick(&bills_tx, &shutdown).await {
                break;
            }
        }

        tracing::info!("Sell evaluator stopped");
    }
}
