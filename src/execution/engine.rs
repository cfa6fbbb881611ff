use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::execution::{BuyExecutor, PriceWatcher, SellEvaluator, SellExecutor, TradingContext};

/// Wires the four trading loops together over bounded queues
pub struct Engine {
    ctx: TradingContext,
}

impl Engine {
    pub fn new(ctx: TradingContext) -> Self {
        Self { ctx }
    }

    /// Run every loop until `shutdown` fires, then wait for all of them to stop
    pub async fn run(self, shutdown: CancellationToken) {
        let options = self.ctx.options.snapshot();
        let (candidates_tx, candidates_rx) = mpsc::channel(options.buy.candidate_queue);
        let (bills_tx, bills_rx) = mpsc::channel(options.sell.sell_queue);

        let mut tasks = JoinSet::new();
        tasks.spawn(PriceWatcher::new(self.ctx.clone()).run(candidates_tx, shutdown.clone()));
        tasks.spawn(BuyExecutor::new(self.ctx.clone()).run(candidates_rx, shutdown.clone()));
        tasks.spawn(SellEvaluator::new(self.ctx.clone()).run(bills_tx, shutdown.clone()));
        tasks.spawn(SellExecutor::new(self.ctx).run(bills_rx, shutdown.clone()));

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Trading task ended abnormally: {}", e);
                // One dead loop leaves the rest inconsistent
                shutdown.cancel();
            }
        }

        tracing::info!("All trading loops stopped");
    }
}
