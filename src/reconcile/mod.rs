//! Reconciliation engine
//!
//! Periodically settles unfinished orders against the accrual authority.
//! Correctness rests on the ledger's terminal-state rule: once an order is
//! `Processed` it leaves the unfinished set, so repeating a cycle can never
//! credit it twice.

pub mod cycle;
pub mod scheduler;

pub use cycle::{CycleReport, ReconcileError, Reconciler};
pub use scheduler::{
    ReconcilerConfig, ReconciliationHandle, SchedulerState, start_reconciliation,
};
