use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use common::{Error, LifecycleState, PatternSignal, Result, Tenant};

/// Latest analyzer output per tracked symbol, keyed by `(tenant, symbol)`.
///
/// Writes are latest-wins upserts. Rows exist from the moment a symbol is
/// tracked; signal columns stay NULL until the first detection succeeds.
#[derive(Clone)]
pub struct SignalStore {
    db: SqlitePool,
}

impl SignalStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Start tracking a symbol. A no-op if it is already tracked.
    pub async fn track(&self, tenant: &Tenant, symbol: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tracked_symbols (tenant, symbol, state)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(tenant, symbol) DO NOTHING
            "#,
        )
        .bind(tenant.as_str())
        .bind(symbol)
        .bind(LifecycleState::Unscanned)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// All symbols tracked for a tenant.
    pub async fn symbols(&self, tenant: &Tenant) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT symbol FROM tracked_symbols WHERE tenant = ?1")
            .bind(tenant.as_str())
            .fetch_all(&self.db)
            .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("symbol").map_err(Error::from))
            .collect()
    }

    /// Lifecycle stage of a symbol, `None` if untracked.
    pub async fn state(&self, tenant: &Tenant, symbol: &str) -> Result<Option<LifecycleState>> {
        let row = sqlx::query(
            "SELECT state FROM tracked_symbols WHERE tenant = ?1 AND symbol = ?2",
        )
        .bind(tenant.as_str())
        .bind(symbol)
        .fetch_optional(&self.db)
        .await?;
        match row {
            Some(r) => Ok(Some(r.try_get("state")?)),
            None => Ok(None),
        }
    }

    /// The stored signal for a symbol, `None` until a detection has landed.
    pub async fn get(&self, tenant: &Tenant, symbol: &str) -> Result<Option<PatternSignal>> {
        let row = sqlx::query(
            r#"
            SELECT symbol, reference_low, resistance_1, resistance_2, entry_price,
                   stop_price, reward_ratio, reference_low_time, last_price, state
            FROM tracked_symbols
            WHERE tenant = ?1 AND symbol = ?2 AND reference_low IS NOT NULL
            "#,
        )
        .bind(tenant.as_str())
        .bind(symbol)
        .fetch_optional(&self.db)
        .await?;
        row.map(|r| signal_from_row(&r)).transpose()
    }

    /// Every stored signal for a tenant, for the read side.
    pub async fn list(&self, tenant: &Tenant) -> Result<Vec<PatternSignal>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, reference_low, resistance_1, resistance_2, entry_price,
                   stop_price, reward_ratio, reference_low_time, last_price, state
            FROM tracked_symbols
            WHERE tenant = ?1 AND reference_low IS NOT NULL
            ORDER BY symbol
            "#,
        )
        .bind(tenant.as_str())
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(signal_from_row).collect()
    }

    /// Latest-wins upsert of a detection result. Replaces any prior signal
    /// for the symbol and moves it to `found`.
    pub async fn put_signal(&self, tenant: &Tenant, signal: &PatternSignal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tracked_symbols
                (tenant, symbol, reference_low, resistance_1, resistance_2,
                 entry_price, stop_price, reward_ratio, reference_low_time,
                 last_price, state)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(tenant, symbol) DO UPDATE SET
                reference_low      = excluded.reference_low,
                resistance_1       = excluded.resistance_1,
                resistance_2       = excluded.resistance_2,
                entry_price        = excluded.entry_price,
                stop_price         = excluded.stop_price,
                reward_ratio       = excluded.reward_ratio,
                reference_low_time = excluded.reference_low_time,
                last_price         = excluded.last_price,
                state              = excluded.state
            "#,
        )
        .bind(tenant.as_str())
        .bind(&signal.symbol)
        .bind(signal.reference_low)
        .bind(signal.resistance_1)
        .bind(signal.resistance_2)
        .bind(signal.entry_price)
        .bind(signal.stop_price)
        .bind(signal.reward_ratio)
        .bind(signal.reference_low_time.to_rfc3339())
        .bind(signal.last_price)
        .bind(signal.state)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    pub async fn set_state(
        &self,
        tenant: &Tenant,
        symbol: &str,
        state: LifecycleState,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE tracked_symbols SET state = ?3 WHERE tenant = ?1 AND symbol = ?2",
        )
        .bind(tenant.as_str())
        .bind(symbol)
        .bind(state)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Refresh the displayed last-traded price without touching the levels.
    pub async fn set_last_price(&self, tenant: &Tenant, symbol: &str, price: f64) -> Result<()> {
        sqlx::query(
            "UPDATE tracked_symbols SET last_price = ?3 WHERE tenant = ?1 AND symbol = ?2",
        )
        .bind(tenant.as_str())
        .bind(symbol)
        .bind(price)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}

fn signal_from_row(row: &SqliteRow) -> Result<PatternSignal> {
    let time_raw: String = row.try_get("reference_low_time")?;
    let reference_low_time = DateTime::parse_from_rfc3339(&time_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Other(format!("bad reference_low_time '{time_raw}': {e}")))?;

    Ok(PatternSignal {
        symbol: row.try_get("symbol")?,
        reference_low: row.try_get("reference_low")?,
        resistance_1: row.try_get("resistance_1")?,
        resistance_2: row.try_get("resistance_2")?,
        entry_price: row.try_get("entry_price")?,
        stop_price: row.try_get("stop_price")?,
        reward_ratio: row.try_get("reward_ratio")?,
        reference_low_time,
        last_price: row.try_get("last_price")?,
        state: row.try_get("state")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    async fn test_pool() -> SqlitePool {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("../../migrations").run(&pool).await.unwrap();
        pool
    }

    fn sample_signal(symbol: &str) -> PatternSignal {
        PatternSignal {
            symbol: symbol.to_string(),
            reference_low: 100.0,
            resistance_1: 120.0,
            resistance_2: 200.0,
            entry_price: 105.0,
            stop_price: 98.0,
            reward_ratio: 13.6,
            reference_low_time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            last_price: 108.0,
            state: LifecycleState::Found,
        }
    }

    #[tokio::test]
    async fn tracked_symbol_starts_unscanned_without_signal() {
        let store = SignalStore::new(test_pool().await);
        let tenant = Tenant::new("t1");

        store.track(&tenant, "NIFTY25AUG24000CE").await.unwrap();

        assert_eq!(
            store.state(&tenant, "NIFTY25AUG24000CE").await.unwrap(),
            Some(LifecycleState::Unscanned)
        );
        assert!(store.get(&tenant, "NIFTY25AUG24000CE").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_signal_is_latest_wins() {
        let store = SignalStore::new(test_pool().await);
        let tenant = Tenant::new("t1");
        store.track(&tenant, "SYM").await.unwrap();

        store.put_signal(&tenant, &sample_signal("SYM")).await.unwrap();
        let mut updated = sample_signal("SYM");
        updated.entry_price = 106.0;
        store.put_signal(&tenant, &updated).await.unwrap();

        let stored = store.get(&tenant, "SYM").await.unwrap().unwrap();
        assert_eq!(stored.entry_price, 106.0);
        assert_eq!(stored.state, LifecycleState::Found);
        assert_eq!(store.list(&tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let store = SignalStore::new(test_pool().await);
        let a = Tenant::new("a");
        let b = Tenant::new("b");

        store.put_signal(&a, &sample_signal("SYM")).await.unwrap();

        assert!(store.get(&b, "SYM").await.unwrap().is_none());
        assert!(store.symbols(&b).await.unwrap().is_empty());
        assert_eq!(store.symbols(&a).await.unwrap(), vec!["SYM".to_string()]);
    }

    #[tokio::test]
    async fn set_last_price_keeps_levels() {
        let store = SignalStore::new(test_pool().await);
        let tenant = Tenant::new("t1");
        store.put_signal(&tenant, &sample_signal("SYM")).await.unwrap();

        store.set_last_price(&tenant, "SYM", 111.5).await.unwrap();

        let stored = store.get(&tenant, "SYM").await.unwrap().unwrap();
        assert_eq!(stored.last_price, 111.5);
        assert_eq!(stored.entry_price, 105.0);
    }

    #[tokio::test]
    async fn signal_round_trips_timestamp() {
        let store = SignalStore::new(test_pool().await);
        let tenant = Tenant::new("t1");
        let signal = sample_signal("SYM");
        store.put_signal(&tenant, &signal).await.unwrap();

        let stored = store.get(&tenant, "SYM").await.unwrap().unwrap();
        assert_eq!(stored.reference_low_time, signal.reference_low_time);
    }
}
