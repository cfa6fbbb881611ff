use crate::models::Position;
use crate::Result;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::time::{timeout, Duration};

/// Symbol-keyed set of open positions as stored on disk
pub type LedgerRecord = HashMap<String, Position>;

/// Durable home of the position ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load every stored position; an empty store yields an empty record
    async fn load(&self) -> Result<LedgerRecord>;

    /// Replace the stored record with `positions`
    async fn save(&self, positions: &LedgerRecord) -> Result<()>;
}

/// JSON file persistence
///
/// Writes go to a sibling temp file that is renamed into place, so a crash
/// mid-write leaves the previous file intact.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl LedgerStore for JsonFileStore {
    async fn load(&self) -> Result<LedgerRecord> {
        match tokio::fs::read(&self.path).await {
            Ok(data) if data.iter().all(u8::is_ascii_whitespace) => Ok(LedgerRecord::new()),
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LedgerRecord::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, positions: &LedgerRecord) -> Result<()> {
        let data = serde_json::to_vec_pretty(positions)?;
        let temp = self.temp_path();

        tokio::fs::write(&temp, &data).await?;
        tokio::fs::rename(&temp, &self.path).await?;

        tracing::debug!("Saved {} positions to {}", positions.len(), self.path.display());
        Ok(())
    }
}

const REDIS_POSITIONS_KEY: &str = "spotbot:positions";

/// Redis persistence for the ledger
///
/// Uses one hash, field = symbol, value = JSON position.
pub struct RedisStore {
    conn: ConnectionManager,
    key: String,
}

impl RedisStore {
    /// Connect to Redis
    ///
    /// # Arguments
    /// * `redis_url` - Redis connection URL (e.g., "redis://127.0.0.1:6379")
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;

        let conn = timeout(Duration::from_secs(5), ConnectionManager::new(client))
            .await
            .map_err(|_| "Redis connection timeout after 5 seconds")??;

        tracing::info!("Connected to Redis at {}", redis_url);

        Ok(Self {
            conn,
            key: REDIS_POSITIONS_KEY.to_string(),
        })
    }

    /// Use another hash key (separate bots sharing one Redis)
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }
}

#[async_trait]
impl LedgerStore for RedisStore {
    async fn load(&self) -> Result<LedgerRecord> {
        let mut conn = self.conn.clone();
        let raw: HashMap<String, String> = conn.hgetall(&self.key).await?;

        let mut positions = LedgerRecord::with_capacity(raw.len());
        for (symbol, json) in raw {
            positions.insert(symbol, serde_json::from_str(&json)?);
        }

        tracing::info!("Loaded {} positions from Redis", positions.len());
        Ok(positions)
    }

    async fn save(&self, positions: &LedgerRecord) -> Result<()> {
        let mut entries = Vec::with_capacity(positions.len());
        for (symbol, position) in positions {
            entries.push((symbol.clone(), serde_json::to_string(position)?));
        }

        let mut pipe = redis::pipe();
        pipe.atomic().del(&self.key).ignore();
        if !entries.is_empty() {
            pipe.hset_multiple(&self.key, &entries).ignore();
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        tracing::debug!("Saved {} positions to Redis", positions.len());
        Ok(())
    }
}
