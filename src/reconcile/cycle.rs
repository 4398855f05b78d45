//! One reconciliation cycle
//!
//! fetch unfinished → query authority (bounded fan-out) → wait for all →
//! classify → one settlement transaction.

use crate::accrual::{AccrualAuthority, AuthorityError, Verdict, classify};
use crate::ledger::{
    LedgerError, Order, OrderStatus, OrderUpdate, ReconciliationStore, SettlementBatch,
};
use crate::money::Amount;
use crate::shutdown::Shutdown;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Ledger store error: {0}")]
    Store(#[from] LedgerError),
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Unfinished orders queried
    pub polled: usize,
    /// Queries that produced no usable verdict
    pub failed: usize,
    /// Orders whose status or accrual was written
    pub updated: usize,
    pub processed: usize,
    pub invalid: usize,
    pub credited_users: usize,
    pub credited_total: Amount,
}

pub struct Reconciler {
    store: Arc<dyn ReconciliationStore>,
    authority: Arc<dyn AccrualAuthority>,
    max_in_flight: usize,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        authority: Arc<dyn AccrualAuthority>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            store,
            authority,
            max_in_flight: max_in_flight.max(1),
        }
    }

    /// Run one cycle to completion.
    ///
    /// Verdict failures only exclude the affected orders. A store failure
    /// aborts the cycle and nothing from it is committed.
    pub async fn run_cycle(
        &self,
        shutdown: &Shutdown,
    ) -> Result<CycleReport, ReconcileError> {
        let orders = self.store.list_unfinished_orders().await?;
        if orders.is_empty() {
            info!("No orders to update");
            return Ok(CycleReport::default());
        }

        let mut report = CycleReport {
            polled: orders.len(),
            ..CycleReport::default()
        };

        // Fan-in barrier: settlement starts only after every query has finished
        let results: Vec<(Order, Result<Verdict, AuthorityError>)> = stream::iter(orders)
            .map(|order| {
                let authority = &self.authority;
                async move {
                    let verdict = authority.query_verdict(order.number, shutdown).await;
                    (order, verdict)
                }
            })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        let mut updates = Vec::with_capacity(results.len());
        for (order, verdict) in results {
            match verdict.and_then(|v| classify(&order, &v)) {
                Ok(update) if is_unchanged(&order, &update) => {}
                Ok(update) => updates.push(update),
                Err(AuthorityError::Cancelled) => {
                    report.failed += 1;
                    debug!(order = %order.number, "Verdict query cancelled");
                }
                Err(e) => {
                    report.failed += 1;
                    error!(order = %order.number, error = %e, "Failed to get order verdict");
                }
            }
        }

        updates.sort_by_key(|u| u.number);
        let batch = SettlementBatch::from_updates(updates);
        if batch.is_empty() {
            info!(
                polled = report.polled,
                failed = report.failed,
                "Reconciliation cycle complete, nothing to settle"
            );
            return Ok(report);
        }

        self.store.settle_orders(&batch).await?;

        report.updated = batch.updates.len();
        report.processed = count_status(&batch, OrderStatus::Processed);
        report.invalid = count_status(&batch, OrderStatus::Invalid);
        report.credited_users = batch.credits.len();
        report.credited_total = batch.total_credit();

        info!(
            polled = report.polled,
            failed = report.failed,
            updated = report.updated,
            processed = report.processed,
            invalid = report.invalid,
            credited_users = report.credited_users,
            credited_total = %report.credited_total,
            "Reconciliation cycle complete"
        );
        Ok(report)
    }
}

fn is_unchanged(order: &Order, update: &OrderUpdate) -> bool {
    order.status == update.status && order.accrual == update.accrual
}

fn count_status(batch: &SettlementBatch, status: OrderStatus) -> usize {
    batch.updates.iter().filter(|u| u.status == status).count()
}
