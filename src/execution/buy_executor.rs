use anyhow::Context;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::ExchangeError;
use crate::config::Options;
use crate::execution::fills::await_fill;
use crate::execution::sizing::buy_quantity;
use crate::execution::TradingContext;
use crate::models::{BuyCandidate, OrderSide, Position};

#[derive(Debug, Clone, PartialEq)]
pub enum BuyAction {
    Execute,
    Skip,
}

#[derive(Debug, Clone)]
pub struct BuyDecision {
    pub action: BuyAction,
    pub reason: String,
}

impl BuyDecision {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            action: BuyAction::Skip,
            reason: reason.into(),
        }
    }
}

/// Turns candidate batches into open positions, one order at a time
pub struct BuyExecutor {
    ctx: TradingContext,
}

impl BuyExecutor {
    pub fn new(ctx: TradingContext) -> Self {
        Self { ctx }
    }

    /// Decide whether a candidate may be bought right now
    pub fn admit(&self, candidate: &BuyCandidate, options: &Options) -> BuyDecision {
        let symbol = &candidate.symbol;

        // Check 1: position cap
        let open = self.ctx.ledger.len();
        if open >= options.buy.max_buy {
            return BuyDecision::skip(format!(
                "Position cap reached ({}/{})",
                open, options.buy.max_buy
            ));
        }

        // Check 2: one position per symbol
        if self.ctx.ledger.contains(symbol) {
            return BuyDecision::skip("Already have open position");
        }

        // Check 3: filters may have changed since the candidate was found
        if !options.buy.is_tradable(symbol) {
            return BuyDecision::skip("Symbol filtered out");
        }

        if self.ctx.cooldown.is_blocked(symbol) {
            return BuyDecision::skip("Symbol cooling down after a recent sell");
        }

        BuyDecision {
            action: BuyAction::Execute,
            reason: format!("Price moved {:.3}%", candidate.change),
        }
    }

    /// Work through one batch in order, then persist if anything was bought.
    ///
    /// Returns the number of positions opened.
    pub async fn process_batch(&self, batch: Vec<BuyCandidate>) -> usize {
        let options = self.ctx.options.snapshot();
        let mut opened = 0;

        for candidate in &batch {
            let decision = self.admit(candidate, &options);
            if decision.action == BuyAction::Skip {
                tracing::debug!("Skipping {}: {}", candidate.symbol, decision.reason);
                continue;
            }

            match self.buy(candidate, &options).await {
                Ok(position) => {
                    tracing::info!(
                        "🟢 BUY {} qty={} cost={:.8} ({})",
                        position.symbol,
                        position.executed_quantity,
                        position.cumulative_quote_quantity,
                        decision.reason
                    );
                    opened += 1;
                }
                Err(e) => {
                    tracing::error!(
                        symbol = %candidate.symbol,
                        price = candidate.now_price,
                        change = candidate.change,
                        "Buy failed: {:#}",
                        e
                    );
                }
            }
        }

        if opened > 0 {
            if let Err(e) = self.ctx.ledger.persist().await {
                tracing::error!("Failed to persist ledger after buying: {}", e);
            }
        }

        opened
    }

    async fn buy(&self, candidate: &BuyCandidate, options: &Options) -> anyhow::Result<Position> {
        let symbol = candidate.symbol.as_str();
        let gateway = &self.ctx.gateway;

        let rules = gateway
            .get_symbol_trading_rules(symbol)
            .await
            .with_context(|| format!("Failed to load trading rules for {}", symbol))?;

        let quantity = buy_quantity(
            options.buy.money_per_order,
            candidate.now_price,
            rules.lot_precision,
        );
        if quantity <= 0.0 {
            return Err(ExchangeError::InvalidQuantity {
                symbol: symbol.to_string(),
                quantity,
            }
            .into());
        }

        let order = gateway
            .place_market_order(symbol, OrderSide::Buy, quantity)
            .await
            .with_context(|| format!("Failed to place buy order for {} qty={}", symbol, quantity))?;

        tracing::debug!(
            "Buy order {} #{} accepted (client id {:?})",
            symbol,
            order.order_id,
            order.client_order_id
        );

        let fill = await_fill(
            gateway.as_ref(),
            symbol,
            order.order_id,
            options.system.order_status_retries,
        )
        .await?;

        let position = Position {
            symbol: symbol.to_string(),
            order_id: fill.order_id,
            opened_at: fill.updated_at,
            executed_quantity: fill.executed_quantity,
            cumulative_quote_quantity: fill.cumulative_quote_quantity,
            take_profit: options.sell.take_profit,
            stop_loss: options.sell.stop_loss,
            force_stop_loss: options.sell.force_stop_loss,
            volume: fill.executed_quantity,
            lot_precision: rules.lot_precision,
        };

        self.ctx.ledger.insert(position.clone())?;
        self.ctx.hooks.buy_confirmed(&fill);

        Ok(position)
    }

    pub async fn run(self, mut candidates_rx: mpsc::Receiver<Vec<BuyCandidate>>, shutdown: CancellationToken) {
        tracing::info!("🛒 Buy executor started");

        loop {
            let batch = tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = candidates_rx.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            self.process_batch(batch).await;
        }

        tracing::info!("Buy executor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SimulatedExchange;
    use crate::config::OptionsHandle;
    use crate::execution::PositionLedger;
    use std::sync::Arc;
    use std::time::Duration;

    fn create_test_candidate(symbol: &str, price: f64) -> BuyCandidate {
        BuyCandidate {
            symbol: symbol.to_string(),
            last_price: price * 0.98,
            now_price: price,
            change: 2.0,
        }
    }

    fn create_test_executor(exchange: &SimulatedExchange, options: Options) -> (BuyExecutor, TradingContext) {
        let ctx = TradingContext::new(
            Arc::new(exchange.clone()),
            OptionsHandle::new(options),
            Arc::new(PositionLedger::new(None)),
        );
        (BuyExecutor::new(ctx.clone()), ctx)
    }

    fn options_with(max_buy: usize, money: f64) -> Options {
        let mut options = Options::default();
        options.buy.max_buy = max_buy;
        options.buy.money_per_order = money;
        options.sell.stop_loss = Some(-0.01);
        options
    }

    #[tokio::test]
    async fn test_buy_opens_position() {
        let exchange = SimulatedExchange::new();
        exchange.set_price("ABCUSDT", 3.0);
        exchange.set_lot_precision("ABCUSDT", 2);
        let (executor, ctx) = create_test_executor(&exchange, options_with(4, 11.0));

        let opened = executor
            .process_batch(vec![create_test_candidate("ABCUSDT", 3.0)])
            .await;
        assert_eq!(opened, 1);

        let position = ctx.ledger.get("ABCUSDT").unwrap();
        // 11 / 3 = 3.666.. truncated to 2 decimals
        assert_eq!(position.executed_quantity, 3.66);
        assert_eq!(position.volume, 3.66);
        assert_eq!(position.take_profit, 0.02);
        assert_eq!(position.stop_loss, Some(-0.01));
        assert_eq!(position.lot_precision, 2);
        assert_eq!(exchange.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_cap_is_enforced_within_batch() {
        let exchange = SimulatedExchange::new();
        for symbol in ["AUSDT", "BUSDT", "CUSDT"] {
            exchange.set_price(symbol, 1.0);
        }
        let (executor, ctx) = create_test_executor(&exchange, options_with(2, 10.0));

        let opened = executor
            .process_batch(vec![
                create_test_candidate("AUSDT", 1.0),
                create_test_candidate("BUSDT", 1.0),
                create_test_candidate("CUSDT", 1.0),
            ])
            .await;

        assert_eq!(opened, 2);
        assert_eq!(ctx.ledger.len(), 2);
        assert!(!ctx.ledger.contains("CUSDT"));
        assert_eq!(exchange.orders().len(), 2);
    }

    #[tokio::test]
    async fn test_skips_held_and_cooling_symbols() {
        let exchange = SimulatedExchange::new();
        exchange.set_price("AUSDT", 1.0);
        exchange.set_price("BUSDT", 1.0);
        let (executor, ctx) = create_test_executor(&exchange, options_with(4, 10.0));

        executor
            .process_batch(vec![create_test_candidate("AUSDT", 1.0)])
            .await;
        ctx.cooldown.block("BUSDT", Duration::from_secs(60));

        let opened = executor
            .process_batch(vec![
                create_test_candidate("AUSDT", 1.0),
                create_test_candidate("BUSDT", 1.0),
            ])
            .await;

        assert_eq!(opened, 0);
        assert_eq!(exchange.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_order_failure_leaves_ledger_untouched() {
        let exchange = SimulatedExchange::new();
        exchange.set_price("AUSDT", 1.0);
        exchange.set_price("BUSDT", 1.0);
        exchange.fail_next_orders(1);
        let (executor, ctx) = create_test_executor(&exchange, options_with(4, 10.0));

        let opened = executor
            .process_batch(vec![
                create_test_candidate("AUSDT", 1.0),
                create_test_candidate("BUSDT", 1.0),
            ])
            .await;

        // First failure does not stop the rest of the batch
        assert_eq!(opened, 1);
        assert!(!ctx.ledger.contains("AUSDT"));
        assert!(ctx.ledger.contains("BUSDT"));
    }

    #[tokio::test]
    async fn test_expired_buy_opens_nothing() {
        let exchange = SimulatedExchange::new();
        exchange.set_price("AUSDT", 1.0);
        exchange.expire_next_orders(1, 0.0);
        let (executor, ctx) = create_test_executor(&exchange, options_with(4, 10.0));

        let opened = executor
            .process_batch(vec![create_test_candidate("AUSDT", 1.0)])
            .await;

        assert_eq!(opened, 0);
        assert!(ctx.ledger.is_empty());
        assert_eq!(exchange.orders().len(), 1);
    }

    #[tokio::test]
    async fn test_quantity_below_lot_is_rejected() {
        let exchange = SimulatedExchange::new();
        exchange.set_price("BIGUSDT", 50_000.0);
        exchange.set_lot_precision("BIGUSDT", 0);
        let (executor, ctx) = create_test_executor(&exchange, options_with(4, 11.0));

        let opened = executor
            .process_batch(vec![create_test_candidate("BIGUSDT", 50_000.0)])
            .await;

        assert_eq!(opened, 0);
        assert!(ctx.ledger.is_empty());
        assert!(exchange.orders().is_empty());
    }

    #[test]
    fn test_admit_reports_cap() {
        let exchange = SimulatedExchange::new();
        let (executor, _ctx) = create_test_executor(&exchange, options_with(1, 10.0));
        let options = options_with(0, 10.0);

        let decision = executor.admit(&create_test_candidate("AUSDT", 1.0), &options);
        assert_eq!(decision.action, BuyAction::Skip);
        assert!(decision.reason.contains("Position cap"));
    }
}
