use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::models::Position;
use crate::persistence::{LedgerRecord, LedgerStore};

/// Authoritative record of open positions, one per symbol.
///
/// Shared by the buy executor (insert), the sell evaluator (trailing
/// updates) and the sell executor (remove). Every access goes through one
/// lock; readers get copies.
pub struct PositionLedger {
    positions: Mutex<HashMap<String, Position>>,
    store: Option<Arc<dyn LedgerStore>>,
    persist_lock: tokio::sync::Mutex<()>,
}

impl PositionLedger {
    pub fn new(store: Option<Arc<dyn LedgerStore>>) -> Self {
        Self::with_positions(store, HashMap::new())
    }

    pub fn with_positions(
        store: Option<Arc<dyn LedgerStore>>,
        positions: HashMap<String, Position>,
    ) -> Self {
        Self {
            positions: Mutex::new(positions),
            store,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Create a ledger holding whatever `store` has persisted
    pub async fn restore(store: Arc<dyn LedgerStore>) -> crate::Result<Self> {
        let positions = store.load().await?;

        tracing::info!("Restored {} open positions from persistence", positions.len());
        for position in positions.values() {
            tracing::info!(
                symbol = %position.symbol,
                order_id = position.order_id,
                volume = position.volume,
                "  resuming position"
            );
        }

        Ok(Self::with_positions(Some(store), positions))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Position>> {
        self.positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Consistent copy of every open position
    pub fn snapshot(&self) -> HashMap<String, Position> {
        self.lock().clone()
    }

    pub fn get(&self, symbol: &str) -> Option<Position> {
        self.lock().get(symbol).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.lock().contains_key(symbol)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Add a freshly opened position
    pub fn insert(&self, position: Position) -> anyhow::Result<()> {
        let mut positions = self.lock();
        if positions.contains_key(&position.symbol) {
            anyhow::bail!("Already have open position for {}", position.symbol);
        }
        positions.insert(position.symbol.clone(), position);
        Ok(())
    }

    /// Remove the position for `symbol` if it still belongs to `order_id`
    pub fn remove_order(&self, symbol: &str, order_id: i64) -> Option<Position> {
        let mut positions = self.lock();
        match positions.get(symbol) {
            Some(p) if p.order_id == order_id => positions.remove(symbol),
            _ => None,
        }
    }

    /// Mutate a position in place under the ledger lock, returning the updated copy
    pub fn update<F>(&self, symbol: &str, f: F) -> Option<Position>
    where
        F: FnOnce(&mut Position),
    {
        let mut positions = self.lock();
        let position = positions.get_mut(symbol)?;
        f(position);
        Some(position.clone())
    }

    /// Write the current ledger to the store.
    ///
    /// Persists are serialized and each one snapshots after taking its turn,
    /// so the store always ends with the latest state.
    pub async fn persist(&self) -> crate::Result<()> {
        let store = match &self.store {
            Some(store) => store,
            None => return Ok(()),
        };

        let _turn = self.persist_lock.lock().await;
        let record: LedgerRecord = self.snapshot();
        store.save(&record).await
    }
}
