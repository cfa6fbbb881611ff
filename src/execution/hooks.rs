use std::fmt;
use std::sync::Arc;

use crate::models::{OrderFill, Position, SellBill};

pub type Hook<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Optional side-effect callbacks for outside observers.
///
/// Hooks are plain synchronous callbacks, so each call runs on the blocking
/// pool and a slow observer never holds up a runtime worker.
#[derive(Clone, Default)]
pub struct TradeHooks {
    on_buy_confirmed: Option<Hook<OrderFill>>,
    on_sell_confirmed: Option<Hook<SellBill>>,
    on_trailing_adjustment: Option<Hook<Position>>,
}

impl TradeHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_buy_confirmed(mut self, hook: impl Fn(OrderFill) + Send + Sync + 'static) -> Self {
        self.on_buy_confirmed = Some(Arc::new(hook));
        self
    }

    pub fn on_sell_confirmed(mut self, hook: impl Fn(SellBill) + Send + Sync + 'static) -> Self {
        self.on_sell_confirmed = Some(Arc::new(hook));
        self
    }

    pub fn on_trailing_adjustment(
        mut self,
        hook: impl Fn(Position) + Send + Sync + 'static,
    ) -> Self {
        self.on_trailing_adjustment = Some(Arc::new(hook));
        self
    }

    pub fn buy_confirmed(&self, fill: &OrderFill) {
        fire(&self.on_buy_confirmed, fill.clone());
    }

    pub fn sell_confirmed(&self, bill: &SellBill) {
        fire(&self.on_sell_confirmed, bill.clone());
    }

    pub fn trailing_adjusted(&self, position: &Position) {
        fire(&self.on_trailing_adjustment, position.clone());
    }
}

fn fire<T: Send + 'static>(hook: &Option<Hook<T>>, value: T) {
    if let Some(hook) = hook {
        let hook = hook.clone();
        tokio::task::spawn_blocking(move || hook(value));
    }
}

impl fmt::Debug for TradeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TradeHooks")
            .field("on_buy_confirmed", &self.on_buy_confirmed.is_some())
            .field("on_sell_confirmed", &self.on_sell_confirmed.is_some())
            .field("on_trailing_adjustment", &self.on_trailing_adjustment.is_some())
            .finish()
    }
}
