use std::sync::Arc;

use crate::api::ExchangeGateway;
use crate::config::OptionsHandle;
use crate::execution::{CooldownCache, PositionLedger, TradeHooks};

/// Everything a trading loop needs, built once at startup and cloned into each task
#[derive(Clone)]
pub struct TradingContext {
    pub gateway: Arc<dyn ExchangeGateway>,
    pub options: OptionsHandle,
    pub ledger: Arc<PositionLedger>,
    pub cooldown: Arc<CooldownCache>,
    pub hooks: TradeHooks,
}

impl TradingContext {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        options: OptionsHandle,
        ledger: Arc<PositionLedger>,
    ) -> Self {
        Self {
            gateway,
            options,
            ledger,
            cooldown: Arc::new(CooldownCache::default()),
            hooks: TradeHooks::default(),
        }
    }

    pub fn with_hooks(mut self, hooks: TradeHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Arc<CooldownCache>) -> Self {
        self.cooldown = cooldown;
        self
    }
}
