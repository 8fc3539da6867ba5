use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use common::{Candle, CandleSource, Error, InstrumentMeta, Resolution, Result};

struct QuoteScript {
    ticks: Vec<f64>,
    next: usize,
}

/// In-memory candle source for virtual sessions and tests.
///
/// History is preloaded per symbol. Quotes step through a scripted sequence
/// and then hold the final value, so a scenario can walk price into the
/// entry zone and through an exit without a live feed. Symbols that were
/// never loaded behave like a broken feed: both calls return a fetch error.
#[derive(Default)]
pub struct ReplaySource {
    history: RwLock<HashMap<String, Vec<Candle>>>,
    quotes: RwLock<HashMap<String, QuoteScript>>,
    meta: RwLock<HashMap<String, InstrumentMeta>>,
}

impl ReplaySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Preload the candle history served for `symbol`.
    pub async fn load_history(&self, symbol: &str, candles: Vec<Candle>) {
        debug!(symbol, candles = candles.len(), "Replay history loaded");
        self.history.write().await.insert(symbol.to_string(), candles);
    }

    /// Script the quote sequence for `symbol`. Each fetch returns the next
    /// tick; the final tick repeats forever.
    pub async fn script_quotes(&self, symbol: &str, ticks: Vec<f64>) {
        self.quotes
            .write()
            .await
            .insert(symbol.to_string(), QuoteScript { ticks, next: 0 });
    }

    pub async fn set_meta(&self, symbol: &str, meta: InstrumentMeta) {
        self.meta.write().await.insert(symbol.to_string(), meta);
    }
}

#[async_trait]
impl CandleSource for ReplaySource {
    async fn fetch_history(
        &self,
        symbol: &str,
        _resolution: Resolution,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let history = self.history.read().await;
        let candles = history
            .get(symbol)
            .ok_or_else(|| Error::Fetch(format!("no replay history for {symbol}")))?;
        Ok(candles
            .iter()
            .filter(|c| c.time >= from && c.time <= to)
            .copied()
            .collect())
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<f64> {
        let mut quotes = self.quotes.write().await;
        let script = quotes
            .get_mut(symbol)
            .ok_or_else(|| Error::Fetch(format!("no replay quotes for {symbol}")))?;
        if script.ticks.is_empty() {
            return Err(Error::Fetch(format!("replay quote script for {symbol} is empty")));
        }
        let tick = script.ticks[script.next];
        if script.next + 1 < script.ticks.len() {
            script.next += 1;
        }
        Ok(tick)
    }

    async fn instrument(&self, symbol: &str) -> Result<InstrumentMeta> {
        Ok(self
            .meta
            .read()
            .await
            .get(symbol)
            .copied()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle_at(secs: i64) -> Candle {
        Candle {
            time: Utc.timestamp_opt(secs, 0).unwrap(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
        }
    }

    #[tokio::test]
    async fn history_is_windowed_inclusively() {
        let source = ReplaySource::new();
        source
            .load_history(
                "SYM",
                vec![candle_at(100), candle_at(160), candle_at(220)],
            )
            .await;

        let from = Utc.timestamp_opt(100, 0).unwrap();
        let to = Utc.timestamp_opt(160, 0).unwrap();
        let window = source
            .fetch_history("SYM", Resolution::OneMinute, from, to)
            .await
            .unwrap();
        assert_eq!(window.len(), 2);
    }

    #[tokio::test]
    async fn unknown_symbol_is_a_fetch_error() {
        let source = ReplaySource::new();
        let now = Utc::now();
        assert!(matches!(
            source
                .fetch_history("NOPE", Resolution::OneMinute, now, now)
                .await,
            Err(Error::Fetch(_))
        ));
        assert!(matches!(
            source.fetch_quote("NOPE").await,
            Err(Error::Fetch(_))
        ));
    }

    #[tokio::test]
    async fn quotes_step_then_hold_the_last_tick() {
        let source = ReplaySource::new();
        source.script_quotes("SYM", vec![101.0, 102.0]).await;

        assert_eq!(source.fetch_quote("SYM").await.unwrap(), 101.0);
        assert_eq!(source.fetch_quote("SYM").await.unwrap(), 102.0);
        assert_eq!(source.fetch_quote("SYM").await.unwrap(), 102.0);
    }

    #[tokio::test]
    async fn instrument_defaults_to_single_unit_lots() {
        let source = ReplaySource::new();
        source.set_meta("BIG", InstrumentMeta { lot_size: 65 }).await;

        assert_eq!(source.instrument("BIG").await.unwrap().lot_size, 65);
        assert_eq!(source.instrument("SMALL").await.unwrap().lot_size, 1);
    }
}
