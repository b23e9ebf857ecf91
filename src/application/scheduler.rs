//! Recurring sweeps.
//!
//! Deposit polling and subscription expiry run on their own intervals, independent of
//! user requests, until the handle is shut down or dropped.

use super::engine::{DepositSweepReport, ReconciliationEngine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

/// Sweep intervals
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_deposit_interval")]
    pub deposit_sweep_interval_secs: u64,
    #[serde(default = "default_expiry_interval")]
    pub expiry_sweep_interval_secs: u64,
}

fn default_deposit_interval() -> u64 {
    30
}

fn default_expiry_interval() -> u64 {
    300
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            deposit_sweep_interval_secs: default_deposit_interval(),
            expiry_sweep_interval_secs: default_expiry_interval(),
        }
    }
}

/// Running sweep loops.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stops both loops and waits for the current iterations to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Sweep task ended abnormally: {}", e);
            }
        }
    }
}

/// Starts the deposit and expiry sweeps.
///
/// Each non-empty deposit sweep report is forwarded on `reports`, so a front-end can
/// tell users about credited and failed deposits. A loop never runs two iterations at
/// once; late ticks are skipped rather than bunched.
pub fn spawn(
    engine: Arc<ReconciliationEngine>,
    config: &ScheduleConfig,
    reports: Option<mpsc::Sender<DepositSweepReport>>,
) -> SchedulerHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);

    let deposit_engine = engine.clone();
    let deposit_every = Duration::from_secs(config.deposit_sweep_interval_secs.max(1));
    let mut deposit_stop = shutdown_rx.clone();
    let deposit_task = tokio::spawn(async move {
        info!(every = ?deposit_every, "Starting deposit sweep");
        let mut interval = tokio::time::interval(deposit_every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = deposit_stop.changed() => break,
            }
            match deposit_engine.run_deposit_sweep().await {
                Ok(report) => {
                    let noteworthy = !report.credited.is_empty() || !report.failed.is_empty();
                    if noteworthy
                        && let Some(tx) = &reports
                        && tx.send(report).await.is_err()
                    {
                        warn!("Deposit report receiver dropped");
                    }
                }
                Err(e) => warn!("Deposit sweep failed: {}", e),
            }
        }
    });

    let expiry_every = Duration::from_secs(config.expiry_sweep_interval_secs.max(1));
    let mut expiry_stop = shutdown_rx;
    let expiry_task = tokio::spawn(async move {
        info!(every = ?expiry_every, "Starting expiry sweep");
        let mut interval = tokio::time::interval(expiry_every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = expiry_stop.changed() => break,
            }
            if let Err(e) = engine.run_expiry_sweep().await {
                warn!("Expiry sweep failed: {}", e);
            }
        }
    });

    SchedulerHandle {
        shutdown,
        tasks: vec![deposit_task, expiry_task],
    }
}
