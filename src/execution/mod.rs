// Trading loops and the shared state they coordinate through
pub mod buy_executor;
pub mod context;
pub mod cooldown;
pub mod engine;
pub mod fills;
pub mod hooks;
pub mod ledger;
pub mod price_watcher;
pub mod sell_evaluator;
pub mod sell_executor;
pub mod sizing;

pub use buy_executor::{BuyAction, BuyDecision, BuyExecutor};
pub use context::TradingContext;
pub use cooldown::CooldownCache;
pub use engine::Engine;
pub use hooks::TradeHooks;
pub use ledger::PositionLedger;
pub use price_watcher::PriceWatcher;
pub use sell_evaluator::{ExitDecision, SellEvaluator};
pub use sell_executor::{SellExecutor, SellOutcome};
