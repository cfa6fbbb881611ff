use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::BuyOptions;
use crate::execution::{CooldownCache, TradingContext};
use crate::models::{BuyCandidate, PriceSnapshot};

/// Percentage move from `prev` to `now`
pub fn price_change(prev: f64, now: f64) -> Option<f64> {
    if prev > 0.0 && now.is_finite() {
        Some((now - prev) / prev * 100.0)
    } else {
        None
    }
}

/// Whether a move crosses the rise threshold or, when set, the dip threshold
pub fn crosses_threshold(change: f64, up: Option<f64>, down: Option<f64>) -> bool {
    let rose = up.map_or(false, |up| change > up);
    let dipped = down.map_or(false, |down| change < 0.0 && change.abs() > down);
    rose || dipped
}

/// Compare two samples and collect the symbols worth buying, strongest move first
pub fn find_candidates(
    previous: &PriceSnapshot,
    current: &PriceSnapshot,
    options: &BuyOptions,
    cooldown: &CooldownCache,
    now: DateTime<Utc>,
) -> Vec<BuyCandidate> {
    let mut candidates: Vec<BuyCandidate> = previous
        .iter()
        .filter(|(symbol, _)| options.is_tradable(symbol))
        .filter_map(|(symbol, prev)| {
            let current = current.get(symbol)?;
            if cooldown.is_blocked_at(symbol, now) {
                return None;
            }
            let change = price_change(prev.price, current.price)?;
            crosses_threshold(change, options.price_up_change, options.price_down_change).then(
                || BuyCandidate {
                    symbol: symbol.clone(),
                    last_price: prev.price,
                    now_price: current.price,
                    change,
                },
            )
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.change
            .abs()
            .partial_cmp(&a.change.abs())
            .unwrap_or(Ordering::Equal)
    });
    candidates
}

/// Samples the whole market every buy interval and hands movers to the buy executor
pub struct PriceWatcher {
    ctx: TradingContext,
    last_prices: Option<PriceSnapshot>,
}

impl PriceWatcher {
    pub fn new(ctx: TradingContext) -> Self {
        Self {
            ctx,
            last_prices: None,
        }
    }

    /// Take one sample. The first sample only sets the baseline.
    ///
    /// A failed fetch keeps the previous baseline.
    pub async fn tick(&mut self) -> Vec<BuyCandidate> {
        let current = match self.ctx.gateway.fetch_prices(None).await {
            Ok(prices) => prices,
            Err(e) => {
                tracing::warn!("Price fetch failed, keeping previous sample: {}", e);
                return Vec::new();
            }
        };

        let options = self.ctx.options.snapshot();
        let candidates = match &self.last_prices {
            Some(previous) => find_candidates(
                previous,
                &current,
                &options.buy,
                &self.ctx.cooldown,
                Utc::now(),
            ),
            None => {
                tracing::info!("Baseline sample of {} symbols taken", current.len());
                Vec::new()
            }
        };

        self.last_prices = Some(current);
        candidates
    }

    pub async fn run(
        mut self,
        candidates_tx: mpsc::Sender<Vec<BuyCandidate>>,
        shutdown: CancellationToken,
    ) {
        let period = self.ctx.options.snapshot().buy.interval();
        tracing::info!("🔄 Price watcher starting (every {:?})", period);

        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let candidates = self.tick().await;
            if candidates.is_empty() {
                continue;
            }

            for c in &candidates {
                tracing::info!(
                    symbol = %c.symbol,
                    last_price = c.last_price,
                    now_price = c.now_price,
                    change = format!("{:.3}%", c.change),
                    "Buy candidate"
                );
            }

            match candidates_tx.try_send(candidates) {
                Ok(()) => {}
                Err(TrySendError::Full(batch)) => {
                    tracing::warn!("Buy queue full, dropping {} candidates", batch.len());
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::warn!("Buy queue closed, price watcher stopping");
                    break;
                }
            }
        }

        tracing::info!("Price watcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SimulatedExchange;
    use crate::config::{Options, OptionsHandle};
    use crate::execution::PositionLedger;
    use crate::api::{ExchangeGateway, ExchangeResult};
    use crate::models::{OrderFill, OrderSide, PlacedOrder, SymbolPrice, TradingRules};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;
    use std::time::Duration;

    fn snapshot(prices: &[(&str, f64)]) -> PriceSnapshot {
        prices
            .iter()
            .map(|(symbol, price)| {
                (
                    symbol.to_string(),
                    SymbolPrice {
                        symbol: symbol.to_string(),
                        price: *price,
                        timestamp: Utc::now(),
                    },
                )
            })
            .collect()
    }

    fn buy_options(up: Option<f64>, down: Option<f64>) -> BuyOptions {
        BuyOptions {
            price_up_change: up,
            price_down_change: down,
            ..Default::default()
        }
    }

    #[test]
    fn test_price_change() {
        assert_eq!(price_change(100.0, 102.0), Some(2.0));
        assert_eq!(price_change(100.0, 97.0), Some(-3.0));
        assert_eq!(price_change(0.0, 1.0), None);
    }

    #[test]
    fn test_crosses_threshold() {
        assert!(crosses_threshold(1.0, Some(0.5), None));
        assert!(!crosses_threshold(0.5, Some(0.5), None));
        assert!(!crosses_threshold(-3.0, Some(0.5), None));
        assert!(crosses_threshold(-3.0, Some(0.5), Some(2.0)));
        assert!(!crosses_threshold(-1.0, Some(0.5), Some(2.0)));
        assert!(!crosses_threshold(5.0, None, None));
    }

    #[test]
    fn test_candidates_sorted_by_strength() {
        let previous = snapshot(&[("AUSDT", 100.0), ("BUSDT", 100.0), ("CUSDT", 100.0), ("DUSDT", 100.0)]);
        let current = snapshot(&[("AUSDT", 101.0), ("BUSDT", 96.0), ("CUSDT", 103.0), ("DUSDT", 100.2)]);

        let found = find_candidates(
            &previous,
            &current,
            &buy_options(Some(0.5), Some(2.0)),
            &CooldownCache::default(),
            Utc::now(),
        );

        let symbols: Vec<&str> = found.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["BUSDT", "CUSDT", "AUSDT"]);
        assert_eq!(found[0].change, -4.0);
        assert_eq!(found[1].now_price, 103.0);
    }

    #[test]
    fn test_candidates_respect_gates() {
        let previous = snapshot(&[("AUSDT", 100.0), ("BBTC", 100.0), ("CUSDT", 100.0), ("NEWUSDT", 1.0)]);
        let current = snapshot(&[("AUSDT", 110.0), ("BBTC", 110.0), ("CUSDT", 110.0)]);

        let cooldown = CooldownCache::default();
        let now = Utc::now();
        cooldown.block_at("CUSDT", Duration::from_secs(60), now);

        let found = find_candidates(&previous, &current, &buy_options(Some(0.5), None), &cooldown, now);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].symbol, "AUSDT");

        // Once the block lapses the symbol is eligible again
        let later = now + chrono::Duration::seconds(61);
        let found = find_candidates(&previous, &current, &buy_options(Some(0.5), None), &cooldown, later);
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_first_tick_sets_baseline() {
        let exchange = SimulatedExchange::new();
        exchange.set_price("AUSDT", 100.0);

        let ctx = TradingContext::new(
            Arc::new(exchange.clone()),
            OptionsHandle::new(Options::default()),
            Arc::new(PositionLedger::new(None)),
        );
        let mut watcher = PriceWatcher::new(ctx);

        assert!(watcher.tick().await.is_empty());

        exchange.set_price("AUSDT", 101.0);
        let found = watcher.tick().await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].change, 1.0);

        // Baseline moved to 101, a flat tick yields nothing
        assert!(watcher.tick().await.is_empty());
    }

    /// Counts market samples while delegating to a simulated exchange
    struct CountingGateway {
        inner: SimulatedExchange,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl ExchangeGateway for CountingGateway {
        async fn fetch_prices(&self, symbol: Option<&str>) -> ExchangeResult<PriceSnapshot> {
            self.fetches.fetch_add(1, AtomicOrdering::SeqCst);
            self.inner.fetch_prices(symbol).await
        }

        async fn place_market_order(
            &self,
            symbol: &str,
            side: OrderSide,
            quantity: f64,
        ) -> ExchangeResult<PlacedOrder> {
            self.inner.place_market_order(symbol, side, quantity).await
        }

        async fn get_order_status(
            &self,
            symbol: &str,
            order_id: i64,
            max_retries: u32,
        ) -> ExchangeResult<OrderFill> {
            self.inner.get_order_status(symbol, order_id, max_retries).await
        }

        async fn get_symbol_trading_rules(&self, symbol: &str) -> ExchangeResult<TradingRules> {
            self.inner.get_symbol_trading_rules(symbol).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_keeps_sampling() {
        let exchange = SimulatedExchange::new();
        exchange.set_price("AUSDT", 100.0);
        let gateway = Arc::new(CountingGateway {
            inner: exchange.clone(),
            fetches: AtomicUsize::new(0),
        });

        let ctx = TradingContext::new(
            gateway.clone(),
            OptionsHandle::new(Options::default()),
            Arc::new(PositionLedger::new(None)),
        );

        // Nobody drains the queue: only the first batch fits
        let (tx, mut rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();
        let watcher = tokio::spawn(PriceWatcher::new(ctx).run(tx, shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(500)).await;
        for step in 1..=5 {
            exchange.set_price("AUSDT", 100.0 + 10.0 * step as f64);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        // Baseline plus one sample per second, none lost to the full queue
        assert!(gateway.fetches.load(AtomicOrdering::SeqCst) >= 5);

        shutdown.cancel();
        let stopped = tokio::time::timeout(Duration::from_secs(1), watcher).await;
        assert!(stopped.is_ok(), "watcher did not stop after shutdown");

        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].now_price, 110.0);
        assert!(rx.try_recv().is_err());
    }
}
