use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::ExchangeError;
use crate::execution::fills::await_fill;
use crate::execution::sizing::{float_trunc, sell_quantity};
use crate::execution::TradingContext;
use crate::models::{OrderSide, OrderStatus, SellBill};

/// What happened to a sell bill
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SellOutcome {
    Sold,
    /// The order ended early; the position stays open with what is left
    PartiallySold { remaining: f64 },
    /// The position was already closed or replaced
    Stale,
}

/// Single consumer of the sell queue; closes positions and starts their cooldown
pub struct SellExecutor {
    ctx: TradingContext,
}

impl SellExecutor {
    pub fn new(ctx: TradingContext) -> Self {
        Self { ctx }
    }

    pub async fn execute(&self, bill: &SellBill) -> anyhow::Result<SellOutcome> {
        let symbol = bill.position.symbol.as_str();

        let position = match self.ctx.ledger.get(symbol) {
            Some(p) if p.order_id == bill.position.order_id => p,
            _ => return Ok(SellOutcome::Stale),
        };

        let quantity = sell_quantity(position.volume, position.lot_precision);
        if quantity <= 0.0 {
            return Err(ExchangeError::InvalidQuantity {
                symbol: symbol.to_string(),
                quantity,
            }
            .into());
        }

        let options = self.ctx.options.snapshot();
        let order = self
            .ctx
            .gateway
            .place_market_order(symbol, OrderSide::Sell, quantity)
            .await
            .with_context(|| format!("Failed to place sell order for {} qty={}", symbol, quantity))?;

        tracing::debug!(
            "Sell order {} #{} accepted (client id {:?})",
            symbol,
            order.order_id,
            order.client_order_id
        );

        // Nothing executed means nothing changed: no cooldown, position stays
        let fill = await_fill(
            self.ctx.gateway.as_ref(),
            symbol,
            order.order_id,
            options.system.order_status_retries,
        )
        .await
        .with_context(|| format!("Sell order for {} was not filled", symbol))?;

        let remaining = float_trunc(position.volume - fill.executed_quantity, position.lot_precision);
        if fill.status != OrderStatus::Filled && remaining > 0.0 {
            self.ctx.ledger.update(symbol, |p| {
                if p.order_id == position.order_id {
                    p.volume = remaining;
                }
            });
            if let Err(e) = self.ctx.ledger.persist().await {
                tracing::error!("Failed to persist ledger after partial sell of {}: {}", symbol, e);
            }
            return Ok(SellOutcome::PartiallySold { remaining });
        }

        self.ctx.hooks.sell_confirmed(bill);

        // Block before removing so the buyer never sees the symbol free
        if let Some(until) = self.ctx.cooldown.block(symbol, options.buy.same_coin_block()) {
            tracing::debug!("{} blocked from re-entry until {}", symbol, until);
        }
        self.ctx.ledger.remove_order(symbol, position.order_id);

        if let Err(e) = self.ctx.ledger.persist().await {
            tracing::error!("Failed to persist ledger after selling {}: {}", symbol, e);
        }

        Ok(SellOutcome::Sold)
    }

    pub async fn run(self, mut bills_rx: mpsc::Receiver<SellBill>, shutdown: CancellationToken) {
        tracing::info!("💰 Sell executor started");

        loop {
            let bill = tokio::select! {
                _ = shutdown.cancelled() => break,
                bill = bills_rx.recv() => match bill {
                    Some(bill) => bill,
                    None => break,
                },
            };

            match self.execute(&bill).await {
                Ok(SellOutcome::Sold) => tracing::info!(
                    "✅ SOLD {} at {} ({:+.2}%): {}",
                    bill.position.symbol,
                    bill.price,
                    bill.price_change,
                    bill.reason
                ),
                Ok(SellOutcome::PartiallySold { remaining }) => tracing::warn!(
                    "⚠️ Partial sell of {}: {} left open",
                    bill.position.symbol,
                    remaining
                ),
                Ok(SellOutcome::Stale) => tracing::debug!(
                    "Ignoring sell bill for {} #{}: position no longer open",
                    bill.position.symbol,
                    bill.position.order_id
                ),
                Err(e) => tracing::error!(
                    symbol = %bill.position.symbol,
                    price_change = bill.price_change,
                    reason = %bill.reason,
                    "Sell failed: {:#}",
                    e
                ),
            }
        }

        tracing::info!("Sell executor stopped");
    }
}
