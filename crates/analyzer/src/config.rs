use serde::{Deserialize, Serialize};

use common::{Error, Result};

/// Every constant the detector consumes, in one place.
///
/// Earlier drafts of this scanner drifted apart on lookback windows, minimum
/// candle counts and band bounds. This struct is the single source of truth;
/// detection logic never hardcodes a threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Minimum candles required before detection is attempted.
    pub min_candles: usize,
    /// Reference low must fall strictly inside `(price_floor, price_ceiling)`.
    /// Instruments trading outside this band don't fit the strategy.
    pub price_floor: f64,
    pub price_ceiling: f64,
    /// How many candles immediately before the reference low are scanned
    /// for resistance peaks.
    pub lookback: usize,
    /// The second resistance should clear the first by this factor; the
    /// next-newest peak is used when none does.
    pub resistance_multiplier: f64,
    /// Signals must beat this reward ratio (strict `>`).
    pub min_reward_ratio: f64,
    /// Stop distance below the reference low (0.02 = 2%).
    pub stop_pct: f64,
    /// Entry markup over the reference low when no fair-value gap exists.
    pub entry_markup_pct: f64,
    /// Reject when fewer than this many candles follow the reference low.
    /// The gap needs a full 3-candle window to print.
    pub tail_guard: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_candles: 20,
            price_floor: 30.0,
            price_ceiling: 250.0,
            lookback: 300,
            resistance_multiplier: 1.5,
            min_reward_ratio: 4.0,
            stop_pct: 0.02,
            entry_markup_pct: 0.05,
            tail_guard: 3,
        }
    }
}

impl AnalyzerConfig {
    /// Reject impossible constants before the scheduler is allowed to start.
    pub fn validate(&self) -> Result<()> {
        if self.min_candles < 20 {
            return Err(Error::Config(format!(
                "min_candles must be >= 20, got {}",
                self.min_candles
            )));
        }
        if !(self.price_floor > 0.0 && self.price_ceiling > self.price_floor) {
            return Err(Error::Config(format!(
                "price band ({}, {}) must satisfy 0 < floor < ceiling",
                self.price_floor, self.price_ceiling
            )));
        }
        if self.lookback < 5 {
            return Err(Error::Config(format!(
                "lookback must be >= 5 candles, got {}",
                self.lookback
            )));
        }
        if self.resistance_multiplier <= 1.0 {
            return Err(Error::Config(format!(
                "resistance_multiplier must exceed 1.0, got {}",
                self.resistance_multiplier
            )));
        }
        if self.min_reward_ratio <= 0.0 {
            return Err(Error::Config(format!(
                "min_reward_ratio must be positive, got {}",
                self.min_reward_ratio
            )));
        }
        if !(self.stop_pct > 0.0 && self.stop_pct < 1.0) {
            return Err(Error::Config(format!(
                "stop_pct must be in (0, 1), got {}",
                self.stop_pct
            )));
        }
        if self.entry_markup_pct <= 0.0 {
            return Err(Error::Config(format!(
                "entry_markup_pct must be positive, got {}",
                self.entry_markup_pct
            )));
        }
        if self.tail_guard == 0 {
            return Err(Error::Config("tail_guard must be at least 1".to_string()));
        }
        Ok(())
    }
}
