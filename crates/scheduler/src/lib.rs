pub mod config;
pub mod runner;
pub mod worker;

pub use config::{ScanConfig, ScannerFileConfig};
pub use runner::{Scheduler, SchedulerCommand, SchedulerHandle, SchedulerState};
pub use worker::{PassStats, ScanWorker};
