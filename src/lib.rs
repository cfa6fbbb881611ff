// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod models;
pub mod persistence;

// Re-export commonly used types
pub use api::{BinanceClient, ExchangeError, ExchangeGateway, SimulatedExchange};
pub use config::{Options, OptionsHandle};
pub use execution::{Engine, TradingContext};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
