use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::worker::ScanWorker;

/// Commands accepted over the scheduler's command channel.
#[derive(Debug, Clone)]
pub enum SchedulerCommand {
    Start,
    Stop,
}

/// Current state of the background scanner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerState {
    #[default]
    Stopped,
    Running,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Stopped => write!(f, "stopped"),
            SchedulerState::Running => write!(f, "running"),
        }
    }
}

/// Cloneable handle passed to other components.
#[derive(Clone)]
pub struct SchedulerHandle {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: Arc<RwLock<SchedulerState>>,
}

impl SchedulerHandle {
    pub async fn send(&self, cmd: SchedulerCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }
}

/// Owns the two periodic passes for one tenant session.
///
/// Constructed once per session and referenced through its handle, never
/// re-created across requests. Stopping signals both pass loops, lets an
/// in-flight pass drain within the grace period, then abandons it; no pass
/// writes to the stores after the grace period expires.
pub struct Scheduler {
    worker: Arc<ScanWorker>,
    state: Arc<RwLock<SchedulerState>>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    #[allow(dead_code)] // kept to prevent channel close
    command_tx: mpsc::Sender<SchedulerCommand>,
}

impl Scheduler {
    pub fn new(worker: ScanWorker) -> (Self, SchedulerHandle) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(SchedulerState::Stopped));

        let handle = SchedulerHandle {
            command_tx: command_tx.clone(),
            state: state.clone(),
        };

        let scheduler = Scheduler {
            worker: Arc::new(worker),
            state,
            command_rx,
            command_tx,
        };

        (scheduler, handle)
    }

    /// Run the command loop. Call from `tokio::spawn`.
    pub async fn run(mut self) {
        info!("Scheduler initialized in Stopped state. Waiting for Start command.");

        let mut shutdown: Option<watch::Sender<bool>> = None;
        let mut pass_handles: Vec<tokio::task::JoinHandle<()>> = Vec::new();

        loop {
            match self.command_rx.recv().await {
                Some(SchedulerCommand::Start) => {
                    if *self.state.read().await == SchedulerState::Running {
                        info!("Scheduler already running");
                        continue;
                    }
                    info!(
                        symbols = self.worker.config().symbols.len(),
                        "Starting discovery and price-refresh passes"
                    );
                    *self.state.write().await = SchedulerState::Running;

                    let (tx, rx) = watch::channel(false);
                    pass_handles.push(tokio::spawn(pass_loop(
                        self.worker.clone(),
                        PassKind::Discovery,
                        rx.clone(),
                    )));
                    pass_handles.push(tokio::spawn(pass_loop(
                        self.worker.clone(),
                        PassKind::Refresh,
                        rx,
                    )));
                    shutdown = Some(tx);
                }

                Some(SchedulerCommand::Stop) => {
                    if *self.state.read().await == SchedulerState::Stopped {
                        continue;
                    }
                    info!("Scheduler stopping — draining in-flight passes");
                    *self.state.write().await = SchedulerState::Stopped;
                    if let Some(tx) = shutdown.take() {
                        let _ = tx.send(true);
                    }

                    let grace =
                        Duration::from_secs(self.worker.config().shutdown_grace_secs);
                    for mut handle in pass_handles.drain(..) {
                        if tokio::time::timeout(grace, &mut handle).await.is_err() {
                            warn!("Pass did not drain within grace period — aborting");
                            handle.abort();
                        }
                    }
                }

                None => {
                    warn!("Scheduler command channel closed — shutting down");
                    if let Some(tx) = shutdown.take() {
                        let _ = tx.send(true);
                    }
                    for handle in pass_handles.drain(..) {
                        handle.abort();
                    }
                    break;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PassKind {
    Discovery,
    Refresh,
}

impl PassKind {
    fn name(self) -> &'static str {
        match self {
            PassKind::Discovery => "discovery",
            PassKind::Refresh => "refresh",
        }
    }
}

/// One periodic pass loop.
///
/// The loop body awaits the pass and the ticker skips missed ticks, so at
/// most one pass of a kind is ever in flight: a pass that outruns its
/// interval finishes and the overdue tick is dropped, never overlapped.
async fn pass_loop(
    worker: Arc<ScanWorker>,
    kind: PassKind,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = match kind {
        PassKind::Discovery => worker.config().discovery_interval(),
        PassKind::Refresh => worker.config().refresh_interval(),
    };
    let max_backoff = Duration::from_secs(worker.config().max_backoff_secs);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!(pass = kind.name(), "Pass loop stopped");
                return;
            }
        }

        let stats = match kind {
            PassKind::Discovery => worker.discovery_pass().await,
            PassKind::Refresh => worker.refresh_pass().await,
        };

        if stats.all_failed() {
            consecutive_failures += 1;
            let delay = backoff_delay(consecutive_failures, max_backoff);
            warn!(
                pass = kind.name(),
                failures = consecutive_failures,
                delay_ms = delay.as_millis() as u64,
                "Every symbol failed — backing off before the next attempt"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!(pass = kind.name(), "Pass loop stopped during backoff");
                    return;
                }
            }
        } else {
            consecutive_failures = 0;
        }
    }
}

/// Exponential backoff with a random jitter so stalled sessions don't
/// re-poll the feed in lockstep.
fn backoff_delay(consecutive_failures: u32, max: Duration) -> Duration {
    let shift = consecutive_failures.saturating_sub(1).min(6);
    let base = Duration::from_secs(1u64 << shift).min(max);
    let quarter = (base.as_millis() / 4) as u64;
    let jitter = rand::thread_rng().gen_range(0..=quarter);
    base + Duration::from_millis(jitter)
}
