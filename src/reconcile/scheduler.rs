//! Reconciliation Scheduler
//!
//! Owns the background task and its stop signal. Cycles run inline in
//! the timer loop, so two cycles (and two settlements) never overlap; ticks
//! missed while a cycle is running are skipped.

use super::cycle::Reconciler;
use crate::accrual::AccrualAuthority;
use crate::ledger::ReconciliationStore;
use crate::shutdown::Shutdown;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Shortest period the timer accepts; a zero interval is raised to this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub poll_interval: Duration,
    /// Upper bound on concurrent verdict queries within one cycle
    pub max_in_flight: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_in_flight: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Stopped,
}

/// Handle to a running reconciliation loop.
///
/// `stop` is terminal. Dropping the handle without stopping detaches the loop.
pub struct ReconciliationHandle {
    shutdown: Shutdown,
    task: JoinHandle<()>,
}

impl ReconciliationHandle {
    pub fn state(&self) -> SchedulerState {
        if self.shutdown.is_triggered() {
            SchedulerState::Stopped
        } else {
            SchedulerState::Running
        }
    }

    /// Signal the loop to stop. No new cycle starts afterwards; in-flight
    /// verdict queries are cancelled. Calling it again is a no-op.
    pub fn stop(&self) {
        if !self.shutdown.is_triggered() {
            info!("Stopping reconciliation");
            self.shutdown.trigger();
        }
    }

    /// Wait for the loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(error = %e, "Reconciliation task terminated abnormally");
        }
    }
}

/// Spawn the reconciliation loop on the current tokio runtime.
pub fn start_reconciliation(
    store: Arc<dyn ReconciliationStore>,
    authority: Arc<dyn AccrualAuthority>,
    config: ReconcilerConfig,
) -> ReconciliationHandle {
    let reconciler = Reconciler::new(store, authority, config.max_in_flight);
    let shutdown = Shutdown::new();
    let task = tokio::spawn(run_loop(reconciler, config, shutdown.clone()));
    ReconciliationHandle { shutdown, task }
}

async fn run_loop(reconciler: Reconciler, config: ReconcilerConfig, shutdown: Shutdown) {
    info!(
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        max_in_flight = config.max_in_flight,
        "Reconciliation started"
    );

    let mut ticker = tokio::time::interval(config.poll_interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.triggered() => break,
            _ = ticker.tick() => {}
        }

        if let Err(e) = reconciler.run_cycle(&shutdown).await {
            error!(error = %e, "Reconciliation cycle failed, orders stay unfinished");
        }
    }

    info!("Reconciliation stopped");
}
