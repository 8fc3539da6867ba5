use std::time::Duration;

use serde::{Deserialize, Serialize};

use analyzer::AnalyzerConfig;
use common::{Error, Resolution, Result};
use lifecycle::TradingConfig;

/// Cadence and universe settings for the background scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Instruments evaluated on every pass.
    pub symbols: Vec<String>,
    pub resolution: Resolution,
    /// History window fetched for each discovery scan, in minutes.
    pub history_window_minutes: i64,
    /// Discovery pass cadence, in seconds.
    pub discovery_interval_secs: u64,
    /// Price-refresh pass cadence, in seconds.
    pub refresh_interval_secs: u64,
    /// How long a stop waits for an in-flight pass before abandoning it.
    pub shutdown_grace_secs: u64,
    /// Ceiling for the transient-failure backoff.
    pub max_backoff_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            resolution: Resolution::FiveMinute,
            history_window_minutes: 2 * 24 * 60,
            discovery_interval_secs: 180,
            refresh_interval_secs: 10,
            shutdown_grace_secs: 5,
            max_backoff_secs: 60,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbols.is_empty() {
            return Err(Error::Config(
                "scan.symbols must name at least one instrument".to_string(),
            ));
        }
        if self.history_window_minutes <= 0 {
            return Err(Error::Config(format!(
                "history_window_minutes must be positive, got {}",
                self.history_window_minutes
            )));
        }
        if self.discovery_interval_secs == 0 || self.refresh_interval_secs == 0 {
            return Err(Error::Config(
                "pass intervals must be at least one second".to_string(),
            ));
        }
        if self.max_backoff_secs == 0 {
            return Err(Error::Config(
                "max_backoff_secs must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

/// Top-level scanner config file (TOML).
///
/// Example `config/scanner.toml`:
/// ```toml
/// [scan]
/// symbols = ["NSE:NIFTY25AUG24000CE"]
/// resolution = "five_minute"
/// discovery_interval_secs = 180
/// refresh_interval_secs = 10
///
/// [analyzer]
/// price_floor = 30.0
/// price_ceiling = 250.0
/// min_reward_ratio = 4.0
///
/// [trading]
/// capital = 100000.0
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerFileConfig {
    pub scan: ScanConfig,
    pub analyzer: AnalyzerConfig,
    pub trading: TradingConfig,
}

impl ScannerFileConfig {
    /// Load from a TOML file. Exits process on error.
    pub fn load(path: &str) -> Self {
        let content = std::fs::read_to_string(path)
            .unwrap_or_else(|e| panic!("Failed to read scanner config at '{path}': {e}"));
        toml::from_str(&content)
            .unwrap_or_else(|e| panic!("Failed to parse scanner config at '{path}': {e}"))
    }

    /// Semantic validation of every section. Must pass before the scheduler
    /// is allowed to start.
    pub fn validate(&self) -> Result<()> {
        self.scan.validate()?;
        self.analyzer.validate()?;
        self.trading.validate()
    }
}
