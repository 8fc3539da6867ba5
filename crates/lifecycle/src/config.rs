use serde::{Deserialize, Serialize};

use common::{Error, Result};

/// User-configurable trading parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    /// Capital available to one entry, in account currency.
    pub capital: f64,
    /// Price may sit this far above the entry level and still count as
    /// inside the zone (0.01 = 1%).
    pub entry_tolerance_pct: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            capital: 100_000.0,
            entry_tolerance_pct: 0.01,
        }
    }
}

impl TradingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capital <= 0.0 {
            return Err(Error::Config(format!(
                "capital must be positive, got {}",
                self.capital
            )));
        }
        if !(0.0..1.0).contains(&self.entry_tolerance_pct) {
            return Err(Error::Config(format!(
                "entry_tolerance_pct must be in [0, 1), got {}",
                self.entry_tolerance_pct
            )));
        }
        Ok(())
    }
}
