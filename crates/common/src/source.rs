use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{Candle, InstrumentMeta, Resolution, Result};

/// Abstraction over the market-data provider.
///
/// `BrokerClient` implements this against the broker's REST API.
/// `ReplaySource` implements this for virtual sessions and tests.
///
/// An empty history window is valid data, not an error. Implementations
/// must reserve `Err` for transport/auth failures so callers can tell
/// "nothing to analyze" apart from "retry next tick".
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Ordered OHLCV candles for `symbol` over `[from, to]`.
    async fn fetch_history(
        &self,
        symbol: &str,
        resolution: Resolution,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// Latest traded price for `symbol`.
    async fn fetch_quote(&self, symbol: &str) -> Result<f64>;

    /// Contract metadata for `symbol` (lot size).
    async fn instrument(&self, symbol: &str) -> Result<InstrumentMeta>;
}
