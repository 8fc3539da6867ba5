use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use analyzer::AnalyzerConfig;
use common::{CandleSource, InstrumentMeta, Result, Tenant};
use lifecycle::LifecycleManager;
use store::SignalStore;

use crate::ScanConfig;

/// Outcome counts for one pass over the symbol universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PassStats {
    pub succeeded: usize,
    pub failed: usize,
}

impl PassStats {
    /// A pass where every symbol failed; the trigger for backing off.
    pub fn all_failed(&self) -> bool {
        self.succeeded == 0 && self.failed > 0
    }
}

/// Executes one discovery or price-refresh pass at a time.
///
/// Failures are isolated per symbol: a fetch or analysis error leaves that
/// symbol's stored state untouched and the pass moves on to the next one.
/// Nothing here retries within a tick; the next scheduled pass is the retry.
pub struct ScanWorker {
    tenant: Tenant,
    config: ScanConfig,
    analyzer_config: AnalyzerConfig,
    source: Arc<dyn CandleSource>,
    signals: SignalStore,
    manager: Arc<LifecycleManager>,
    /// Lot sizes don't change intraday; fetched once per symbol.
    meta_cache: RwLock<HashMap<String, InstrumentMeta>>,
}

impl ScanWorker {
    pub fn new(
        tenant: Tenant,
        config: ScanConfig,
        analyzer_config: AnalyzerConfig,
        source: Arc<dyn CandleSource>,
        signals: SignalStore,
        manager: Arc<LifecycleManager>,
    ) -> Self {
        Self {
            tenant,
            config,
            analyzer_config,
            source,
            signals,
            manager,
            meta_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Fetch history and re-run detection for every tracked symbol.
    pub async fn discovery_pass(&self) -> PassStats {
        let to = Utc::now();
        let from = to - ChronoDuration::minutes(self.config.history_window_minutes);

        let mut stats = PassStats::default();
        for symbol in &self.config.symbols {
            match self.scan_symbol(symbol, from, to).await {
                Ok(()) => stats.succeeded += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(symbol, error = %e, "Discovery scan failed; prior state retained");
                }
            }
        }
        debug!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            "Discovery pass finished"
        );
        stats
    }

    async fn scan_symbol(
        &self,
        symbol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<()> {
        self.signals.track(&self.tenant, symbol).await?;
        let candles = self
            .source
            .fetch_history(symbol, self.config.resolution, from, to)
            .await?;
        let levels = analyzer::analyze(&candles, &self.analyzer_config);
        self.manager.record_scan(symbol, levels).await
    }

    /// Refresh the latest price and evaluate lifecycle transitions for
    /// every tracked symbol, watching and entered alike.
    pub async fn refresh_pass(&self) -> PassStats {
        let mut stats = PassStats::default();
        for symbol in &self.config.symbols {
            match self.refresh_symbol(symbol).await {
                Ok(()) => stats.succeeded += 1,
                Err(e) => {
                    stats.failed += 1;
                    warn!(symbol, error = %e, "Price refresh failed");
                }
            }
        }
        stats
    }

    async fn refresh_symbol(&self, symbol: &str) -> Result<()> {
        let price = self.source.fetch_quote(symbol).await?;
        let meta = self.instrument_meta(symbol).await?;
        self.manager.on_price(symbol, price, meta).await?;
        Ok(())
    }

    async fn instrument_meta(&self, symbol: &str) -> Result<InstrumentMeta> {
        if let Some(meta) = self.meta_cache.read().await.get(symbol) {
            return Ok(*meta);
        }
        let meta = self.source.instrument(symbol).await?;
        self.meta_cache
            .write()
            .await
            .insert(symbol.to_string(), meta);
        Ok(meta)
    }
}
