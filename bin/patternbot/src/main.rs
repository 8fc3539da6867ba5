use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::SqlitePool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use common::{CandleSource, Config, Tenant};
use feed::{BrokerClient, ReplaySource};
use lifecycle::LifecycleManager;
use scheduler::{ScanWorker, Scheduler, SchedulerCommand, SchedulerState, ScannerFileConfig};
use store::{SignalStore, TradeStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env();
    let scanner_cfg = ScannerFileConfig::load(&cfg.scanner_config_path);
    scanner_cfg
        .validate()
        .context("Scanner configuration rejected — refusing to start")?;
    info!(mode = %cfg.trade_mode, tenant = %cfg.tenant, "PatternBot starting");

    // ── Database ──────────────────────────────────────────────────────────────
    let db = SqlitePool::connect(&cfg.database_url)
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!("../../migrations")
        .run(&db)
        .await
        .context("Database migration failed")?;
    info!("Database ready");

    // ── Stores ────────────────────────────────────────────────────────────────
    let signals = SignalStore::new(db.clone());
    let trades = TradeStore::new(db.clone());

    // ── Candle source ─────────────────────────────────────────────────────────
    // Trade mode tags the trades; the data source follows the credentials.
    // A virtual session with broker credentials trades on live data; without
    // them it runs fully offline against the replay feed.
    let source: Arc<dyn CandleSource> = if cfg.broker_access_token.is_empty() {
        info!("No broker credentials — using offline replay feed");
        Arc::new(ReplaySource::new())
    } else {
        info!(base_url = %cfg.broker_base_url, "Using broker REST feed");
        Arc::new(BrokerClient::new(
            &cfg.broker_base_url,
            &cfg.broker_client_id,
            &cfg.broker_access_token,
        ))
    };

    // ── Lifecycle manager ─────────────────────────────────────────────────────
    let tenant = Tenant::new(&cfg.tenant);
    let manager = Arc::new(LifecycleManager::new(
        tenant.clone(),
        cfg.trade_mode,
        scanner_cfg.trading.clone(),
        signals.clone(),
        trades,
    ));

    // ── Scheduler ─────────────────────────────────────────────────────────────
    let worker = ScanWorker::new(
        tenant,
        scanner_cfg.scan.clone(),
        scanner_cfg.analyzer.clone(),
        source,
        signals,
        manager,
    );
    let (sched, handle) = Scheduler::new(worker);
    tokio::spawn(sched.run());
    handle.send(SchedulerCommand::Start).await;

    info!("Scanner running. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received — stopping scheduler");
    handle.send(SchedulerCommand::Stop).await;
    let grace = Duration::from_secs(scanner_cfg.scan.shutdown_grace_secs + 1);
    let _ = tokio::time::timeout(grace, async {
        while handle.state().await != SchedulerState::Stopped {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    info!("Exiting.");
    Ok(())
}
