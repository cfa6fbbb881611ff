use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const ENV_PREFIX: &str = "SPOTBOT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("exchange credentials are missing (system.access_key / system.secret_key)")]
    MissingCredentials,
    #[error("invalid option {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Full option tree of the bot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Options {
    pub buy: BuyOptions,
    pub sell: SellOptions,
    pub system: SystemOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BuyOptions {
    /// Seconds between two price samples
    pub interval_secs: u64,
    /// Buy when the price rose by more than this many percent within one interval
    pub price_up_change: Option<f64>,
    /// Buy the dip when the price fell by more than this many percent within one interval
    pub price_down_change: Option<f64>,
    /// Maximum number of positions held at once
    pub max_buy: usize,
    /// Quote amount spent per order
    pub money_per_order: f64,
    /// Quote asset, like USDT
    pub main_coin: String,
    /// When non-empty, only these assets are bought
    pub white_list: Vec<String>,
    /// Assets that are never bought
    pub black_list: Vec<String>,
    /// File the position ledger is saved to
    pub bought_file: String,
    /// After selling a coin, how long before it may be bought again. 0 disables the block.
    pub same_coin_block_secs: u64,
    pub candidate_queue: usize,
}

impl Default for BuyOptions {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            price_up_change: Some(0.5),
            price_down_change: None,
            max_buy: 4,
            money_per_order: 11.0,
            main_coin: "USDT".to_string(),
            white_list: Vec::new(),
            black_list: Vec::new(),
            bought_file: "trade.json".to_string(),
            same_coin_block_secs: 60,
            candidate_queue: 16,
        }
    }
}

impl BuyOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn same_coin_block(&self) -> Duration {
        Duration::from_secs(self.same_coin_block_secs)
    }

    /// Whether a symbol may be bought at all: quoted in the main coin,
    /// not black-listed, and white-listed when a white list is set.
    pub fn is_tradable(&self, symbol: &str) -> bool {
        let base = match symbol.strip_suffix(self.main_coin.as_str()) {
            Some(base) if !base.is_empty() => base,
            _ => return false,
        };

        let listed = |list: &[String]| {
            list.iter()
                .any(|entry| entry.eq_ignore_ascii_case(base) || entry.eq_ignore_ascii_case(symbol))
        };

        if listed(&self.black_list) {
            return false;
        }

        self.white_list.is_empty() || listed(&self.white_list)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SellOptions {
    /// Seconds between two take-profit / stop-loss checks
    pub interval_secs: u64,
    /// Fractional soft stop relative to cost basis, e.g. -0.015
    pub stop_loss: Option<f64>,
    /// A position below its soft stop is only sold once it is older than this
    pub stop_loss_duration_secs: u64,
    /// Fractional profit target relative to cost basis, e.g. 0.02
    pub take_profit: f64,
    /// Fractional hard stop; breaching it sells immediately
    pub force_stop_loss: Option<f64>,
    pub enable_trailing_take_profit: bool,
    /// On reaching take profit, take_profit += trailing_take_profit
    pub trailing_take_profit: f64,
    /// On reaching take profit, stop_loss = take_profit - trailing_stop_loss + stop_loss
    pub trailing_stop_loss: f64,
    pub sell_queue: usize,
}

impl Default for SellOptions {
    fn default() -> Self {
        Self {
            interval_secs: 1,
            stop_loss: None,
            stop_loss_duration_secs: 0,
            take_profit: 0.02,
            force_stop_loss: None,
            enable_trailing_take_profit: false,
            trailing_take_profit: 0.0,
            trailing_stop_loss: 0.0,
            sell_queue: 60,
        }
    }
}

impl SellOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stop_loss_duration(&self) -> Duration {
        Duration::from_secs(self.stop_loss_duration_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SystemOptions {
    pub access_key: String,
    pub secret_key: String,
    pub proxy_url: Option<String>,
    pub log_file: Option<String>,
    pub debug: bool,
    /// Trade against a simulated book fed with real prices
    pub dry_run: bool,
    /// Store the ledger in Redis instead of `buy.bought_file`
    pub redis_url: Option<String>,
    pub base_url: String,
    pub order_status_retries: u32,
    pub shutdown_grace_secs: u64,
    pub requests_per_minute: u32,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            access_key: String::new(),
            secret_key: String::new(),
            proxy_url: None,
            log_file: None,
            debug: false,
            dry_run: false,
            redis_url: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            order_status_retries: 10,
            shutdown_grace_secs: 3,
            requests_per_minute: 1200,
        }
    }
}

impl Options {
    /// Load and validate options from a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let options = Self::read(path)?;
        options.validate()?;
        Ok(options)
    }

    /// Read a config file overlaid with `SPOTBOT__*` environment variables, without validating
    pub fn read(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("buy.white_list")
                    .with_list_parse_key("buy.black_list"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buy.interval_secs == 0 {
            return Err(invalid("buy.interval_secs", "must be greater than zero"));
        }
        if self.sell.interval_secs == 0 {
            return Err(invalid("sell.interval_secs", "must be greater than zero"));
        }
        if self.buy.max_buy == 0 {
            return Err(invalid("buy.max_buy", "must be greater than zero"));
        }
        if !(self.buy.money_per_order > 0.0) {
            return Err(invalid("buy.money_per_order", "must be greater than zero"));
        }
        if self.buy.main_coin.trim().is_empty() {
            return Err(invalid("buy.main_coin", "must not be empty"));
        }
        if self.buy.candidate_queue == 0 || self.sell.sell_queue == 0 {
            return Err(invalid("queue size", "must be greater than zero"));
        }
        if self.sell.enable_trailing_take_profit && !(self.sell.trailing_take_profit > 0.0) {
            return Err(invalid(
                "sell.trailing_take_profit",
                "must be positive when trailing take profit is enabled",
            ));
        }
        if !self.system.dry_run
            && (self.system.access_key.is_empty() || self.system.secret_key.is_empty())
        {
            return Err(ConfigError::MissingCredentials);
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// Shared, swappable options.
///
/// Readers take an `Arc` snapshot and work on it for a whole tick.
#[derive(Debug, Clone)]
pub struct OptionsHandle {
    inner: Arc<RwLock<Arc<Options>>>,
}

impl OptionsHandle {
    pub fn new(options: Options) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(options))),
        }
    }

    pub fn snapshot(&self) -> Arc<Options> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn replace(&self, options: Options) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(options);
    }

    /// Re-read trading options from `path` and swap them in.
    ///
    /// The running `system` section is kept since clients and stores are
    /// built from it once at startup. On error the current options stay.
    pub fn reload(&self, path: impl AsRef<Path>) -> Result<Arc<Options>, ConfigError> {
        let mut options = Options::read(path)?;
        options.system = self.snapshot().system.clone();
        options.validate()?;
        self.replace(options);
        Ok(self.snapshot())
    }
}
