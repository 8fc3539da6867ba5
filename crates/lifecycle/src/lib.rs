pub mod config;
pub mod manager;

pub use config::TradingConfig;
pub use manager::{LifecycleManager, PriceAction};
