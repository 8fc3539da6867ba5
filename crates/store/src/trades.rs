use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use common::{ActiveTrade, Error, HistoryRecord, LifecycleState, Result, Tenant};

/// Open positions and the append-only close history, keyed by
/// `(tenant, symbol)`.
#[derive(Clone)]
pub struct TradeStore {
    db: SqlitePool,
}

impl TradeStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Open a trade. Returns `false` when one already exists for the symbol;
    /// re-entry is a no-op, never an error.
    pub async fn open(&self, tenant: &Tenant, trade: &ActiveTrade) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO active_trades
                (tenant, symbol, entry_price, stop_price, target_price, quantity, mode)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(tenant, symbol) DO NOTHING
            "#,
        )
        .bind(tenant.as_str())
        .bind(&trade.symbol)
        .bind(trade.entry_price)
        .bind(trade.stop_price)
        .bind(trade.target_price)
        .bind(trade.quantity)
        .bind(trade.mode)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, tenant: &Tenant, symbol: &str) -> Result<Option<ActiveTrade>> {
        let row = sqlx::query(
            r#"
            SELECT symbol, entry_price, stop_price, target_price, quantity, mode
            FROM active_trades
            WHERE tenant = ?1 AND symbol = ?2
            "#,
        )
        .bind(tenant.as_str())
        .bind(symbol)
        .fetch_optional(&self.db)
        .await?;
        row.map(|r| trade_from_row(&r)).transpose()
    }

    pub async fn list(&self, tenant: &Tenant) -> Result<Vec<ActiveTrade>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, entry_price, stop_price, target_price, quantity, mode
            FROM active_trades
            WHERE tenant = ?1
            ORDER BY symbol
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(trade_from_row).collect()
    }

    /// Close a trade atomically: append the history record, remove the
    /// active row, and mark the symbol `closed`. The next discovery pass
    /// returns it to circulation. Readers never see a partially applied
    /// close.
    pub async fn close(
        &self,
        tenant: &Tenant,
        symbol: &str,
        record: &HistoryRecord,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO trade_history
                (tenant, symbol, entry_price, exit_price, outcome, realized_pnl, closed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(tenant.as_str())
        .bind(&record.symbol)
        .bind(record.entry_price)
        .bind(record.exit_price)
        .bind(record.outcome)
        .bind(record.realized_pnl)
        .bind(record.closed_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM active_trades WHERE tenant = ?1 AND symbol = ?2")
            .bind(tenant.as_str())
            .bind(symbol)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE tracked_symbols SET state = ?3 WHERE tenant = ?1 AND symbol = ?2",
        )
        .bind(tenant.as_str())
        .bind(symbol)
        .bind(LifecycleState::Closed)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Closed trades, most recent first.
    pub async fn history(&self, tenant: &Tenant) -> Result<Vec<HistoryRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, entry_price, exit_price, outcome, realized_pnl, closed_at
            FROM trade_history
            WHERE tenant = ?1
            ORDER BY closed_at DESC
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(record_from_row).collect()
    }
}

fn trade_from_row(row: &SqliteRow) -> Result<ActiveTrade> {
    Ok(ActiveTrade {
        symbol: row.try_get("symbol")?,
        entry_price: row.try_get("entry_price")?,
        stop_price: row.try_get("stop_price")?,
        target_price: row.try_get("target_price")?,
        quantity: row.try_get("quantity")?,
        mode: row.try_get("mode")?,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<HistoryRecord> {
    let closed_raw: String = row.try_get("closed_at")?;
    let closed_at = DateTime::parse_from_rfc3339(&closed_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad closed_at '{closed_raw}': {e}")))?;

    Ok(HistoryRecord {
        symbol: row.try_get("symbol")?,
        entry_price: row.try_get("entry_price")?,
        exit_price: row.try_get("exit_price")?,
        outcome: row.try_get("outcome")?,
        realized_pnl: row.try_get("realized_pnl")?,
        closed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{TradeMode, TradeOutcome};

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_trade(symbol: &str) -> ActiveTrade {
        ActiveTrade {
            symbol: symbol.to_string(),
            entry_price: 100.0,
            stop_price: 90.0,
            target_price: 150.0,
            quantity: 10,
            mode: TradeMode::Virtual,
        }
    }

    #[tokio::test]
    async fn second_open_for_same_symbol_is_a_noop() {
        let store = TradeStore::new(test_pool().await);
        let tenant = Tenant::new("t1");

        assert!(store.open(&tenant, &sample_trade("SYM")).await.unwrap());
        let mut second = sample_trade("SYM");
        second.entry_price = 101.0;
        assert!(!store.open(&tenant, &second).await.unwrap());

        // Original row untouched, still exactly one.
        let trades = store.list(&tenant).await.unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].entry_price, 100.0);
    }

    #[tokio::test]
    async fn same_symbol_under_other_tenant_is_independent() {
        let store = TradeStore::new(test_pool().await);
        let a = Tenant::new("a");
        let b = Tenant::new("b");

        assert!(store.open(&a, &sample_trade("SYM")).await.unwrap());
        assert!(store.open(&b, &sample_trade("SYM")).await.unwrap());
        assert_eq!(store.list(&a).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn close_moves_trade_to_history_and_marks_closed() {
        let pool = test_pool().await;
        let signals = crate::SignalStore::new(pool.clone());
        let store = TradeStore::new(pool);
        let tenant = Tenant::new("t1");

        signals.track(&tenant, "SYM").await.unwrap();
        signals
            .set_state(&tenant, "SYM", LifecycleState::Entered)
            .await
            .unwrap();
        store.open(&tenant, &sample_trade("SYM")).await.unwrap();

        let record = HistoryRecord {
            symbol: "SYM".to_string(),
            entry_price: 100.0,
            exit_price: 150.0,
            outcome: TradeOutcome::Target,
            realized_pnl: 500.0,
            closed_at: Utc::now(),
        };
        store.close(&tenant, "SYM", &record).await.unwrap();

        assert!(store.get(&tenant, "SYM").await.unwrap().is_none());
        let history = store.history(&tenant).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outcome, TradeOutcome::Target);
        assert_eq!(history[0].realized_pnl, 500.0);
        assert_eq!(
            signals.state(&tenant, "SYM").await.unwrap(),
            Some(LifecycleState::Closed)
        );
    }

    #[tokio::test]
    async fn history_is_append_only_across_closes() {
        let pool = test_pool().await;
        let store = TradeStore::new(pool);
        let tenant = Tenant::new("t1");

        for (i, outcome) in [TradeOutcome::Stop, TradeOutcome::Target].iter().enumerate() {
            store.open(&tenant, &sample_trade("SYM")).await.unwrap();
            let record = HistoryRecord {
                symbol: "SYM".to_string(),
                entry_price: 100.0,
                exit_price: 90.0,
                outcome: *outcome,
                realized_pnl: -100.0,
                closed_at: Utc::now() + chrono::Duration::seconds(i as i64),
            };
            store.close(&tenant, "SYM", &record).await.unwrap();
        }

        assert_eq!(store.history(&tenant).await.unwrap().len(), 2);
        assert!(store.get(&tenant, "SYM").await.unwrap().is_none());
    }
}
