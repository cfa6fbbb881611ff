use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub const DEFAULT_COOLDOWN_CAPACITY: usize = 1024;

/// Re-entry block for symbols that were just sold.
///
/// Entries expire lazily on lookup; the LRU bound keeps memory flat no
/// matter how many symbols churn through.
pub struct CooldownCache {
    entries: Mutex<LruCache<String, DateTime<Utc>>>,
}

impl CooldownCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, DateTime<Utc>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Block `symbol` for `duration` from now. A zero duration blocks nothing.
    pub fn block(&self, symbol: &str, duration: Duration) -> Option<DateTime<Utc>> {
        self.block_at(symbol, duration, Utc::now())
    }

    pub fn block_at(
        &self,
        symbol: &str,
        duration: Duration,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if duration.is_zero() {
            return None;
        }
        let span = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(span).unwrap_or(DateTime::<Utc>::MAX_UTC);

        self.lock().put(symbol.to_string(), expires_at);
        Some(expires_at)
    }

    pub fn is_blocked(&self, symbol: &str) -> bool {
        self.is_blocked_at(symbol, Utc::now())
    }

    /// Whether `symbol` is still cooling down at `now`; expired entries are dropped
    pub fn is_blocked_at(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        let mut entries = self.lock();
        match entries.get(symbol).copied() {
            Some(expires_at) if expires_at > now => true,
            Some(_) => {
                entries.pop(symbol);
                false
            }
            None => false,
        }
    }

    /// Expiry of an entry, even if it already lapsed
    pub fn expires_at(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.lock().peek(symbol).copied()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for CooldownCache {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_CAPACITY)
    }
}
