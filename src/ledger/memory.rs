//! In-memory ledger
//!
//! Same contract as [`PgLedgerStore`](super::PgLedgerStore), with one async
//! mutex standing in for transactions: every operation takes the lock once,
//! validates against the locked state, and only then mutates. Used by tests
//! and for dry runs without PostgreSQL.

use super::error::LedgerError;
use super::types::{BalanceInfo, Order, OrderStatus, SettlementBatch, UserId, Withdrawal};
use super::{BalanceLedger, OrderRegistry, ReconciliationStore};
use crate::money::Amount;
use crate::order_number::OrderNumber;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    next_user_id: i64,
    logins: HashMap<String, UserId>,
    balances: HashMap<UserId, BalanceInfo>,
    /// Insertion order doubles as upload order
    orders: Vec<Order>,
    order_index: HashMap<OrderNumber, usize>,
    withdrawals: Vec<Withdrawal>,
    settlements: u64,
}

impl State {
    fn balance_mut(&mut self, user_id: UserId) -> Result<&mut BalanceInfo, LedgerError> {
        self.balances
            .get_mut(&user_id)
            .ok_or(LedgerError::UnknownUser(user_id))
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a user with a zero balance
    pub async fn create_user(&self, login: &str) -> Result<UserId, LedgerError> {
        let mut state = self.state.lock().await;
        if state.logins.contains_key(login) {
            return Err(LedgerError::DuplicateUser(login.to_string()));
        }
        state.next_user_id += 1;
        let user_id = UserId(state.next_user_id);
        state.logins.insert(login.to_string(), user_id);
        state.balances.insert(user_id, BalanceInfo::default());
        Ok(user_id)
    }

    pub async fn order(&self, number: OrderNumber) -> Option<Order> {
        let state = self.state.lock().await;
        state
            .order_index
            .get(&number)
            .map(|&idx| state.orders[idx].clone())
    }

    /// Number of settlement batches committed so far
    pub async fn settlement_count(&self) -> u64 {
        self.state.lock().await.settlements
    }
}

#[async_trait]
impl ReconciliationStore for InMemoryLedger {
    async fn list_unfinished_orders(&self) -> Result<Vec<Order>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn settle_orders(&self, batch: &SettlementBatch) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;

        // Validate the whole batch before touching anything
        for update in &batch.updates {
            let current = state
                .order_index
                .get(&update.number)
                .map(|&idx| state.orders[idx].status)
                .ok_or(LedgerError::StaleSettlement(update.number))?;
            if !current.can_transition_to(update.status) {
                return Err(LedgerError::StaleSettlement(update.number));
            }
        }
        let mut new_balances = Vec::with_capacity(batch.credits.len());
        for (&user_id, &amount) in &batch.credits {
            let balance = *state
                .balances
                .get(&user_id)
                .ok_or(LedgerError::UnknownUser(user_id))?;
            let current = balance
                .current
                .checked_add(amount)
                .ok_or(LedgerError::InvalidAmount)?;
            new_balances.push((user_id, current));
        }

        let now = Utc::now();
        for update in &batch.updates {
            let idx = state.order_index[&update.number];
            let order = &mut state.orders[idx];
            order.status = update.status;
            order.accrual = update.accrual;
            order.updated_at = now;
        }
        for (user_id, current) in new_balances {
            state.balance_mut(user_id)?.current = current;
        }
        state.settlements += 1;

        Ok(())
    }
}

#[async_trait]
impl OrderRegistry for InMemoryLedger {
    async fn register_order(
        &self,
        user_id: UserId,
        number: OrderNumber,
    ) -> Result<Order, LedgerError> {
        let mut state = self.state.lock().await;
        if !state.balances.contains_key(&user_id) {
            return Err(LedgerError::UnknownUser(user_id));
        }
        if let Some(&idx) = state.order_index.get(&number) {
            return Err(if state.orders[idx].user_id == user_id {
                LedgerError::OrderAlreadyRegistered(number)
            } else {
                LedgerError::OrderOwnedByAnotherUser(number)
            });
        }

        let now = Utc::now();
        let order = Order {
            number,
            user_id,
            status: OrderStatus::Pending,
            accrual: Amount::ZERO,
            uploaded_at: now,
            updated_at: now,
        };
        let idx = state.orders.len();
        state.orders.push(order.clone());
        state.order_index.insert(number, idx);
        Ok(order)
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .iter()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl BalanceLedger for InMemoryLedger {
    async fn withdraw(
        &self,
        user_id: UserId,
        withdrawal: OrderNumber,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }

        let mut state = self.state.lock().await;
        let balance = *state
            .balances
            .get(&user_id)
            .ok_or(LedgerError::UnknownUser(user_id))?;
        let current = balance
            .current
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientBalance)?;
        if state.withdrawals.iter().any(|w| w.order == withdrawal) {
            return Err(LedgerError::DuplicateWithdrawal(withdrawal));
        }
        let withdrawn = balance
            .withdrawn
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount)?;

        state.withdrawals.push(Withdrawal {
            order: withdrawal,
            user_id,
            sum: amount,
            processed_at: Utc::now(),
        });
        *state.balance_mut(user_id)? = BalanceInfo { current, withdrawn };
        Ok(())
    }

    async fn credit(&self, user_id: UserId, amount: Amount) -> Result<(), LedgerError> {
        let mut state = self.state.lock().await;
        let balance = state.balance_mut(user_id)?;
        if amount.is_zero() {
            return Ok(());
        }
        balance.current = balance
            .current
            .checked_add(amount)
            .ok_or(LedgerError::InvalidAmount)?;
        Ok(())
    }

    async fn balance(&self, user_id: UserId) -> Result<BalanceInfo, LedgerError> {
        let state = self.state.lock().await;
        state
            .balances
            .get(&user_id)
            .copied()
            .ok_or(LedgerError::UnknownUser(user_id))
    }

    async fn withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .iter()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::OrderUpdate;

    fn num(s: &str) -> OrderNumber {
        s.parse().unwrap()
    }

    fn points(p: i64) -> Amount {
        Amount::from_major(p).unwrap()
    }

    #[tokio::test]
    async fn test_register_order_conflicts() {
        let ledger = InMemoryLedger::new();
        let alice = ledger.create_user("alice").await.unwrap();
        let bob = ledger.create_user("bob").await.unwrap();

        let order = ledger.register_order(alice, num("79927398713")).await.unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.accrual, Amount::ZERO);

        assert!(matches!(
            ledger.register_order(alice, num("79927398713")).await,
            Err(LedgerError::OrderAlreadyRegistered(_))
        ));
        assert!(matches!(
            ledger.register_order(bob, num("79927398713")).await,
            Err(LedgerError::OrderOwnedByAnotherUser(_))
        ));
        assert!(matches!(
            ledger.register_order(UserId(99), num("12345678903")).await,
            Err(LedgerError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_login_rejected() {
        let ledger = InMemoryLedger::new();
        ledger.create_user("alice").await.unwrap();
        assert!(matches!(
            ledger.create_user("alice").await,
            Err(LedgerError::DuplicateUser(_))
        ));
    }

    #[tokio::test]
    async fn test_settle_rejects_terminal_order_and_rolls_back() {
        let ledger = InMemoryLedger::new();
        let alice = ledger.create_user("alice").await.unwrap();
        ledger.register_order(alice, num("79927398713")).await.unwrap();
        ledger.register_order(alice, num("12345678903")).await.unwrap();

        let first = SettlementBatch::from_updates(vec![OrderUpdate {
            number: num("79927398713"),
            user_id: alice,
            status: OrderStatus::Processed,
            accrual: points(500),
        }]);
        ledger.settle_orders(&first).await.unwrap();

        // Replaying the same batch plus a fresh order must change nothing
        let mut replay = first.updates.clone();
        replay.push(OrderUpdate {
            number: num("12345678903"),
            user_id: alice,
            status: OrderStatus::Processing,
            accrual: Amount::ZERO,
        });
        let err = ledger
            .settle_orders(&SettlementBatch::from_updates(replay))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::StaleSettlement(_)));

        assert_eq!(ledger.balance(alice).await.unwrap().current, points(500));
        assert_eq!(
            ledger.order(num("12345678903")).await.unwrap().status,
            OrderStatus::Pending
        );
        assert_eq!(ledger.settlement_count().await, 1);
    }

    #[tokio::test]
    async fn test_withdraw_duplicate_number_changes_nothing() {
        let ledger = InMemoryLedger::new();
        let alice = ledger.create_user("alice").await.unwrap();
        ledger.credit(alice, points(100)).await.unwrap();

        ledger.withdraw(alice, num("2377225624"), points(10)).await.unwrap();
        assert!(matches!(
            ledger.withdraw(alice, num("2377225624"), points(10)).await,
            Err(LedgerError::DuplicateWithdrawal(_))
        ));

        let balance = ledger.balance(alice).await.unwrap();
        assert_eq!(balance.current, points(90));
        assert_eq!(balance.withdrawn, points(10));
        assert_eq!(ledger.withdrawals(alice).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_withdraw_zero_rejected() {
        let ledger = InMemoryLedger::new();
        let alice = ledger.create_user("alice").await.unwrap();
        assert!(matches!(
            ledger.withdraw(alice, num("2377225624"), Amount::ZERO).await,
            Err(LedgerError::InvalidAmount)
        ));
    }
}
