//! Ledger invariants against a real PostgreSQL
//!
//! Run with: TEST_DATABASE_URL=postgres://... cargo test --test postgres_ledger -- --ignored
//!
//! Tests share one database, so every test uses fresh logins and order numbers.

use chrono::Utc;
use loyalty_ledger::config::DatabaseConfig;
use loyalty_ledger::db::Database;
use loyalty_ledger::ledger::{
    BalanceLedger, LedgerError, OrderRegistry, OrderStatus, OrderUpdate, PgLedgerStore,
    ReconciliationStore, SettlementBatch, UserId,
};
use loyalty_ledger::money::Amount;
use loyalty_ledger::order_number::{OrderNumber, is_valid_luhn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Barrier;

static SEQ: AtomicU64 = AtomicU64::new(0);

fn unique_base() -> u64 {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    (nanos % 1_000_000_000_000) * 100 + SEQ.fetch_add(1, Ordering::SeqCst) % 100
}

fn unique_number() -> OrderNumber {
    let base = unique_base();
    (0..10)
        .map(|check| format!("{}{}", base, check))
        .find(|candidate| is_valid_luhn(candidate))
        .unwrap()
        .parse()
        .unwrap()
}

fn points(p: i64) -> Amount {
    Amount::from_major(p).unwrap()
}

async fn store() -> PgLedgerStore {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL not set");
    let config = DatabaseConfig {
        url,
        max_connections: 10,
        acquire_timeout_ms: 3000,
        operation_timeout_ms: 5000,
    };
    let db = Database::connect(&config).await.expect("Failed to connect");
    db.migrate().await.expect("Migrations should apply");
    PgLedgerStore::new(db.pool().clone(), config.operation_timeout())
}

async fn new_user(store: &PgLedgerStore) -> UserId {
    store
        .create_user(&format!("user-{}", unique_base()))
        .await
        .unwrap()
}

#[tokio::test]
#[ignore] // Requires PostgreSQL running
async fn test_new_user_has_zero_balance_row() {
    let store = store().await;
    let login = format!("user-{}", unique_base());
    let user = store.create_user(&login).await.unwrap();

    let balance = store.balance(user).await.unwrap();
    assert_eq!(balance.current, Amount::ZERO);
    assert_eq!(balance.withdrawn, Amount::ZERO);

    assert!(matches!(
        store.create_user(&login).await,
        Err(LedgerError::DuplicateUser(_))
    ));
}

#[tokio::test]
#[ignore]
async fn test_register_order_conflicts() {
    let store = store().await;
    let alice = new_user(&store).await;
    let bob = new_user(&store).await;
    let number = unique_number();

    let order = store.register_order(alice, number).await.unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.accrual, Amount::ZERO);

    assert!(matches!(
        store.register_order(alice, number).await,
        Err(LedgerError::OrderAlreadyRegistered(_))
    ));
    assert!(matches!(
        store.register_order(bob, number).await,
        Err(LedgerError::OrderOwnedByAnotherUser(_))
    ));
    assert!(matches!(
        store.register_order(UserId(-1), unique_number()).await,
        Err(LedgerError::UnknownUser(_))
    ));

    let orders = store.orders_for_user(alice).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].number, number);
}

#[tokio::test]
#[ignore]
async fn test_settlement_is_atomic_and_never_recredits() {
    let store = store().await;
    let alice = new_user(&store).await;
    let first = unique_number();
    let second = unique_number();
    store.register_order(alice, first).await.unwrap();
    store.register_order(alice, second).await.unwrap();

    let processed = OrderUpdate {
        number: first,
        user_id: alice,
        status: OrderStatus::Processed,
        accrual: points(500),
    };
    store
        .settle_orders(&SettlementBatch::from_updates(vec![processed.clone()]))
        .await
        .unwrap();
    assert_eq!(store.balance(alice).await.unwrap().current, points(500));

    let unfinished = store.list_unfinished_orders().await.unwrap();
    assert!(unfinished.iter().all(|o| o.number != first));
    assert!(unfinished.iter().any(|o| o.number == second));

    // A stale replay must roll back the fresh update that rides along with it
    let replay = SettlementBatch::from_updates(vec![
        OrderUpdate {
            number: second,
            user_id: alice,
            status: OrderStatus::Processed,
            accrual: points(1),
        },
        processed,
    ]);
    assert!(matches!(
        store.settle_orders(&replay).await,
        Err(LedgerError::StaleSettlement(n)) if n == first
    ));
    assert_eq!(store.balance(alice).await.unwrap().current, points(500));
    assert_eq!(
        store.order(second).await.unwrap().unwrap().status,
        OrderStatus::Pending
    );
}

#[tokio::test]
#[ignore]
async fn test_withdraw_insufficient_and_duplicate() {
    let store = store().await;
    let alice = new_user(&store).await;
    store.credit(alice, points(50)).await.unwrap();
    let number = unique_number();

    assert!(matches!(
        store.withdraw(alice, number, points(100)).await,
        Err(LedgerError::InsufficientBalance)
    ));
    assert!(store.withdrawals(alice).await.unwrap().is_empty());

    store.withdraw(alice, number, points(20)).await.unwrap();
    assert!(matches!(
        store.withdraw(alice, number, points(1)).await,
        Err(LedgerError::DuplicateWithdrawal(_))
    ));

    let balance = store.balance(alice).await.unwrap();
    assert_eq!(balance.current, points(30));
    assert_eq!(balance.withdrawn, points(20));
    assert_eq!(store.withdrawals(alice).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_withdraw_race_exactly_one_succeeds() {
    let store = Arc::new(store().await);

    for _ in 0..10 {
        let user = new_user(&store).await;
        store.credit(user, points(150)).await.unwrap();
        let barrier = Arc::new(Barrier::new(2));

        let mut tasks = Vec::new();
        for _ in 0..2 {
            let store = store.clone();
            let barrier = barrier.clone();
            let number = unique_number();
            tasks.push(tokio::spawn(async move {
                barrier.wait().await;
                store.withdraw(user, number, points(100)).await
            }));
        }

        let mut ok = 0;
        let mut insufficient = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => ok += 1,
                Err(LedgerError::InsufficientBalance) => insufficient += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!((ok, insufficient), (1, 1));
        assert_eq!(store.balance(user).await.unwrap().current, points(50));
    }
}
