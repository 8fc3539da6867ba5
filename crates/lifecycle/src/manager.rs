use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use analyzer::SignalLevels;
use common::{
    ActiveTrade, HistoryRecord, InstrumentMeta, LifecycleState, PatternSignal, Result, Tenant,
    TradeMode, TradeOutcome,
};
use store::{SignalStore, TradeStore};

use crate::TradingConfig;

/// What one price observation did to a symbol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceAction {
    /// No transition fired.
    None,
    /// A new trade was opened.
    Entered { quantity: i64 },
    /// The open trade was closed.
    Closed { outcome: TradeOutcome, pnl: f64 },
}

/// Owns every lifecycle transition for tracked symbols.
///
/// The analyzer decides what a signal looks like; this manager decides when
/// a symbol moves between watching, found, entered and closed, and it is
/// the only writer of those transitions. Writes to one symbol are totally
/// ordered through a per-symbol lock; different symbols proceed in parallel.
pub struct LifecycleManager {
    tenant: Tenant,
    mode: TradeMode,
    config: TradingConfig,
    signals: SignalStore,
    trades: TradeStore,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LifecycleManager {
    pub fn new(
        tenant: Tenant,
        mode: TradeMode,
        config: TradingConfig,
        signals: SignalStore,
        trades: TradeStore,
    ) -> Self {
        Self {
            tenant,
            mode,
            config,
            signals,
            trades,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn symbol_lock(&self, symbol: &str) -> Arc<Mutex<()>> {
        let mut map = self.locks.lock().await;
        map.entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Persist one discovery-pass result.
    ///
    /// A detection replaces whatever signal was stored before and marks the
    /// symbol `found`. No detection leaves the stored signal untouched; the
    /// only state change is moving freshly tracked (`unscanned`) and
    /// recently closed symbols back to `watching`, which makes a closed
    /// symbol eligible for re-discovery on the next pass.
    pub async fn record_scan(&self, symbol: &str, levels: Option<SignalLevels>) -> Result<()> {
        let lock = self.symbol_lock(symbol).await;
        let _guard = lock.lock().await;

        match levels {
            Some(l) => {
                // Never replace the levels under an open trade; the refreshed
                // signal would disagree with the trade's stop and target.
                if self.signals.state(&self.tenant, symbol).await?
                    == Some(LifecycleState::Entered)
                {
                    debug!(symbol, "Scan result ignored while a trade is open");
                    return Ok(());
                }
                let signal = PatternSignal {
                    symbol: symbol.to_string(),
                    reference_low: l.reference_low,
                    resistance_1: l.resistance_1,
                    resistance_2: l.resistance_2,
                    entry_price: l.entry_price,
                    stop_price: l.stop_price,
                    reward_ratio: l.reward_ratio,
                    reference_low_time: l.reference_low_time,
                    last_price: l.last_price,
                    state: LifecycleState::Found,
                };
                info!(
                    symbol,
                    entry = signal.entry_price,
                    stop = signal.stop_price,
                    target = signal.resistance_2,
                    rr = signal.reward_ratio,
                    "Pattern found"
                );
                self.signals.put_signal(&self.tenant, &signal).await
            }
            None => {
                match self.signals.state(&self.tenant, symbol).await? {
                    Some(LifecycleState::Unscanned) | Some(LifecycleState::Closed) => {
                        self.signals
                            .set_state(&self.tenant, symbol, LifecycleState::Watching)
                            .await?;
                    }
                    _ => {}
                }
                Ok(())
            }
        }
    }

    /// Advance the state machine for one price observation.
    ///
    /// Entry requires all three conditions on the same refresh: price has
    /// broken above the first resistance, retraced into the entry zone, and
    /// is still above the stop. An open trade is checked stop-first; when a
    /// gapped tick satisfies both exits at once, the stop wins.
    pub async fn on_price(
        &self,
        symbol: &str,
        price: f64,
        meta: InstrumentMeta,
    ) -> Result<PriceAction> {
        let lock = self.symbol_lock(symbol).await;
        let _guard = lock.lock().await;

        self.signals
            .set_last_price(&self.tenant, symbol, price)
            .await?;

        match self.signals.state(&self.tenant, symbol).await? {
            Some(LifecycleState::Found) => self.try_enter(symbol, price, meta).await,
            Some(LifecycleState::Entered) => self.try_close(symbol, price).await,
            _ => Ok(PriceAction::None),
        }
    }

    async fn try_enter(
        &self,
        symbol: &str,
        price: f64,
        meta: InstrumentMeta,
    ) -> Result<PriceAction> {
        let Some(signal) = self.signals.get(&self.tenant, symbol).await? else {
            warn!(symbol, "Symbol is 'found' but has no stored signal");
            return Ok(PriceAction::None);
        };

        let zone_ceiling = signal.entry_price * (1.0 + self.config.entry_tolerance_pct);
        let in_zone = price >= signal.resistance_1
            && price <= zone_ceiling
            && price > signal.stop_price;
        if !in_zone {
            return Ok(PriceAction::None);
        }

        let quantity = size_quantity(self.config.capital, signal.entry_price, meta.lot_size);
        if quantity == 0 {
            debug!(
                symbol,
                capital = self.config.capital,
                lot_size = meta.lot_size,
                "Entry skipped: capital buys zero lots"
            );
            return Ok(PriceAction::None);
        }

        let trade = ActiveTrade {
            symbol: symbol.to_string(),
            entry_price: signal.entry_price,
            stop_price: signal.stop_price,
            target_price: signal.resistance_2,
            quantity,
            mode: self.mode,
        };

        // Conflict on the primary key means a trade already exists; entry is
        // a no-op then, not an error.
        if !self.trades.open(&self.tenant, &trade).await? {
            return Ok(PriceAction::None);
        }
        self.signals
            .set_state(&self.tenant, symbol, LifecycleState::Entered)
            .await?;
        info!(
            symbol,
            entry = trade.entry_price,
            stop = trade.stop_price,
            target = trade.target_price,
            quantity,
            mode = %trade.mode,
            "Trade entered"
        );
        Ok(PriceAction::Entered { quantity })
    }

    async fn try_close(&self, symbol: &str, price: f64) -> Result<PriceAction> {
        let Some(trade) = self.trades.get(&self.tenant, symbol).await? else {
            warn!(symbol, "Symbol is 'entered' but has no active trade; resetting");
            self.signals
                .set_state(&self.tenant, symbol, LifecycleState::Watching)
                .await?;
            return Ok(PriceAction::None);
        };

        // Stop before target: on a gapped tick that crosses both levels,
        // assume the worse fill.
        let (outcome, exit_price) = if price <= trade.stop_price {
            (TradeOutcome::Stop, trade.stop_price)
        } else if price >= trade.target_price {
            (TradeOutcome::Target, trade.target_price)
        } else {
            return Ok(PriceAction::None);
        };

        let pnl = (exit_price - trade.entry_price) * trade.quantity as f64;
        let record = HistoryRecord {
            symbol: symbol.to_string(),
            entry_price: trade.entry_price,
            exit_price,
            outcome,
            realized_pnl: pnl,
            closed_at: Utc::now(),
        };
        self.trades.close(&self.tenant, symbol, &record).await?;
        info!(
            symbol,
            outcome = %outcome,
            exit = exit_price,
            pnl,
            "Trade closed"
        );
        Ok(PriceAction::Closed { outcome, pnl })
    }
}

/// Whole-lot position sizing: as many full lots as capital covers at the
/// entry price. Zero when even one lot is unaffordable.
fn size_quantity(capital: f64, entry_price: f64, lot_size: u32) -> i64 {
    if entry_price <= 0.0 || lot_size == 0 {
        return 0;
    }
    let lot_value = entry_price * lot_size as f64;
    let lots = (capital / lot_value).floor() as i64;
    lots.max(0) * lot_size as i64
}
