//! Ledger Store
//!
//! Orders, balances and withdrawals, with the consistency rules the rest of
//! the system relies on:
//!
//! - `balance.current >= 0` in every committed state
//! - an order number exists at most once
//! - a terminal order (`Invalid`/`Processed`) never changes again and is
//!   never returned by [`ReconciliationStore::list_unfinished_orders`]
//! - a settlement batch is applied all-or-nothing
//!
//! Capabilities are split into narrow traits so each component only sees
//! what it uses: the reconciliation engine gets a [`ReconciliationStore`],
//! the API facade gets an [`OrderRegistry`] and a [`BalanceLedger`].

pub mod error;
pub mod memory;
pub mod postgres;
pub mod service;
pub mod types;

use crate::money::Amount;
use crate::order_number::OrderNumber;
use async_trait::async_trait;

pub use error::LedgerError;
pub use memory::InMemoryLedger;
pub use postgres::PgLedgerStore;
pub use service::LedgerService;
pub use types::{
    BalanceInfo, Order, OrderStatus, OrderUpdate, SettlementBatch, UserId, Withdrawal,
};

/// What the reconciliation engine needs from storage
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    /// All `Pending`/`Processing` orders across all users
    async fn list_unfinished_orders(&self) -> Result<Vec<Order>, LedgerError>;

    /// Apply every status write and every credit in one transaction.
    ///
    /// Fails with [`LedgerError::StaleSettlement`] and changes nothing if any
    /// order in the batch is no longer unfinished.
    async fn settle_orders(&self, batch: &SettlementBatch) -> Result<(), LedgerError>;
}

/// Order ingestion and lookup
#[async_trait]
pub trait OrderRegistry: Send + Sync {
    /// Register a new order in `Pending`.
    async fn register_order(
        &self,
        user_id: UserId,
        number: OrderNumber,
    ) -> Result<Order, LedgerError>;

    /// A user's orders, oldest upload first
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, LedgerError>;
}

/// Balance mutation and lookup, serialized per user row
#[async_trait]
pub trait BalanceLedger: Send + Sync {
    /// Debit `amount` and record the withdrawal, or fail with
    /// [`LedgerError::InsufficientBalance`] without mutating anything.
    async fn withdraw(
        &self,
        user_id: UserId,
        withdrawal: OrderNumber,
        amount: Amount,
    ) -> Result<(), LedgerError>;

    /// Atomically increase `current` by `amount`.
    async fn credit(&self, user_id: UserId, amount: Amount) -> Result<(), LedgerError>;

    async fn balance(&self, user_id: UserId) -> Result<BalanceInfo, LedgerError>;

    /// A user's withdrawals, oldest first
    async fn withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, LedgerError>;
}
