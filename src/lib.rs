//! Loyalty Ledger
//!
//! Loyalty points for purchase orders. Users register orders; an external
//! accrual authority decides asynchronously whether each order is valid and
//! how many points it earns. The reconciliation engine polls the authority
//! and settles verdicts into the ledger, which guarantees points are never
//! double-credited and balances never go negative.
//!
//! # Modules
//!
//! - [`order_number`] - Luhn-validated order identifiers
//! - [`money`] - Fixed-scale point amounts
//! - [`ledger`] - Orders, balances, withdrawals (PostgreSQL and in-memory stores)
//! - [`accrual`] - Accrual authority protocol, verdict classifier, HTTP client
//! - [`reconcile`] - Reconciliation cycle and scheduler
//! - [`shutdown`] - Stop signal for the reconciliation loop
//! - [`db`] - Connection pool and schema migrations
//! - [`config`] - YAML configuration with environment overrides
//! - [`logging`] - tracing subscriber setup

// Domain types
pub mod money;
pub mod order_number;

// Storage
pub mod db;
pub mod ledger;

// Reconciliation
pub mod accrual;
pub mod reconcile;
pub mod shutdown;

// Runtime
pub mod config;
pub mod logging;

// Convenient re-exports at crate root
pub use accrual::{AccrualAuthority, AuthorityError, HttpAccrualClient, Verdict};
pub use ledger::{
    BalanceInfo, BalanceLedger, InMemoryLedger, LedgerError, LedgerService, Order,
    OrderRegistry, OrderStatus, PgLedgerStore, ReconciliationStore, UserId, Withdrawal,
};
pub use money::Amount;
pub use order_number::OrderNumber;
pub use reconcile::{
    CycleReport, ReconcilerConfig, Reconciler, ReconciliationHandle, SchedulerState,
    start_reconciliation,
};
pub use shutdown::Shutdown;
