//! PostgreSQL ledger store
//!
//! Every operation runs under `operation_timeout`. Writes happen inside a
//! transaction; returning early on any error drops the transaction, which
//! rolls it back.

use super::error::{FOREIGN_KEY_VIOLATION, LedgerError, UNIQUE_VIOLATION, is_violation};
use super::types::{BalanceInfo, Order, SettlementBatch, UserId, Withdrawal};
use super::{BalanceLedger, OrderRegistry, ReconciliationStore};
use crate::money::Amount;
use crate::order_number::OrderNumber;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const ORDER_COLUMNS: &str =
    "number, user_id, status::text AS status, accrual, uploaded_at, updated_at";

pub struct PgLedgerStore {
    pool: PgPool,
    operation_timeout: Duration,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, operation_timeout: Duration) -> Self {
        Self {
            pool,
            operation_timeout,
        }
    }

    async fn bounded<T, F>(&self, op: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        tokio::time::timeout(self.operation_timeout, op)
            .await
            .map_err(|_| LedgerError::Timeout)?
    }

    /// Create a user; the `users_create_balance` trigger adds the zero balance row.
    pub async fn create_user(&self, login: &str) -> Result<UserId, LedgerError> {
        self.bounded(async {
            let id: i64 = sqlx::query_scalar("INSERT INTO users (login) VALUES ($1) RETURNING id")
                .bind(login)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    if is_violation(&e, UNIQUE_VIOLATION, "users_login_key") {
                        LedgerError::DuplicateUser(login.to_string())
                    } else {
                        LedgerError::Database(e)
                    }
                })?;
            Ok(UserId(id))
        })
        .await
    }

    pub async fn order(&self, number: OrderNumber) -> Result<Option<Order>, LedgerError> {
        self.bounded(async {
            let row = sqlx::query(&format!(
                "SELECT {} FROM orders WHERE number = $1",
                ORDER_COLUMNS
            ))
            .bind(number.get())
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(row_to_order).transpose()
        })
        .await
    }
}

fn row_to_order(row: &PgRow) -> Result<Order, LedgerError> {
    let status: String = row.try_get("status")?;
    Ok(Order {
        number: OrderNumber::from_trusted(row.try_get("number")?),
        user_id: UserId(row.try_get("user_id")?),
        status: status.parse().map_err(LedgerError::CorruptRow)?,
        accrual: Amount::from_trusted(row.try_get("accrual")?),
        uploaded_at: row.try_get("uploaded_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_withdrawal(row: &PgRow) -> Result<Withdrawal, LedgerError> {
    Ok(Withdrawal {
        order: OrderNumber::from_trusted(row.try_get("number")?),
        user_id: UserId(row.try_get("user_id")?),
        sum: Amount::from_trusted(row.try_get("amount")?),
        processed_at: row.try_get("processed_at")?,
    })
}

#[async_trait]
impl ReconciliationStore for PgLedgerStore {
    async fn list_unfinished_orders(&self) -> Result<Vec<Order>, LedgerError> {
        self.bounded(async {
            let rows = sqlx::query(&format!(
                "SELECT {} FROM orders WHERE status IN ('NEW', 'PROCESSING') ORDER BY uploaded_at, number",
                ORDER_COLUMNS
            ))
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(row_to_order).collect()
        })
        .await
    }

    async fn settle_orders(&self, batch: &SettlementBatch) -> Result<(), LedgerError> {
        self.bounded(async {
            let mut tx = self.pool.begin().await?;

            // The status guard makes terminal rows invisible to this UPDATE, so a
            // batch built from a stale read cannot move or re-credit them.
            for update in &batch.updates {
                let result = sqlx::query(
                    r#"UPDATE orders
                       SET status = $1::order_status, accrual = $2, updated_at = NOW()
                       WHERE number = $3
                         AND status IN ('NEW', 'PROCESSING')
                         AND $1::order_status <> 'NEW'"#,
                )
                .bind(update.status.as_db_str())
                .bind(update.accrual.minor_units())
                .bind(update.number.get())
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(LedgerError::StaleSettlement(update.number));
                }
            }

            for (user_id, amount) in &batch.credits {
                let result = sqlx::query(
                    r#"UPDATE balance
                       SET current = current + $1, updated_at = NOW()
                       WHERE user_id = $2"#,
                )
                .bind(amount.minor_units())
                .bind(user_id.0)
                .execute(&mut *tx)
                .await?;

                if result.rows_affected() == 0 {
                    return Err(LedgerError::UnknownUser(*user_id));
                }
            }

            tx.commit().await?;
            debug!(
                updates = batch.updates.len(),
                credited_users = batch.credits.len(),
                "Settlement committed"
            );
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl OrderRegistry for PgLedgerStore {
    async fn register_order(
        &self,
        user_id: UserId,
        number: OrderNumber,
    ) -> Result<Order, LedgerError> {
        self.bounded(async {
            let inserted = sqlx::query(&format!(
                r#"INSERT INTO orders (number, user_id)
                   VALUES ($1, $2)
                   ON CONFLICT (number) DO NOTHING
                   RETURNING {}"#,
                ORDER_COLUMNS
            ))
            .bind(number.get())
            .bind(user_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if is_violation(&e, FOREIGN_KEY_VIOLATION, "orders_user_id_fkey") {
                    LedgerError::UnknownUser(user_id)
                } else {
                    LedgerError::Database(e)
                }
            })?;

            if let Some(row) = inserted {
                return row_to_order(&row);
            }

            let owner: i64 = sqlx::query_scalar("SELECT user_id FROM orders WHERE number = $1")
                .bind(number.get())
                .fetch_one(&self.pool)
                .await?;

            if owner == user_id.0 {
                Err(LedgerError::OrderAlreadyRegistered(number))
            } else {
                Err(LedgerError::OrderOwnedByAnotherUser(number))
            }
        })
        .await
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>, LedgerError> {
        self.bounded(async {
            let rows = sqlx::query(&format!(
                "SELECT {} FROM orders WHERE user_id = $1 ORDER BY uploaded_at, number",
                ORDER_COLUMNS
            ))
            .bind(user_id.0)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(row_to_order).collect()
        })
        .await
    }
}

#[async_trait]
impl BalanceLedger for PgLedgerStore {
    async fn withdraw(
        &self,
        user_id: UserId,
        withdrawal: OrderNumber,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount);
        }

        self.bounded(async {
            let mut tx = self.pool.begin().await?;

            // Row lock: a concurrent withdraw or credit on this user waits here until commit
            let current: Option<i64> =
                sqlx::query_scalar("SELECT current FROM balance WHERE user_id = $1 FOR UPDATE")
                    .bind(user_id.0)
                    .fetch_optional(&mut *tx)
                    .await?;

            let Some(current) = current else {
                return Err(LedgerError::UnknownUser(user_id));
            };

            if current < amount.minor_units() {
                return Err(LedgerError::InsufficientBalance);
            }

            sqlx::query("INSERT INTO withdrawals (number, user_id, amount) VALUES ($1, $2, $3)")
                .bind(withdrawal.get())
                .bind(user_id.0)
                .bind(amount.minor_units())
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    if is_violation(&e, UNIQUE_VIOLATION, "withdrawals_number_key") {
                        LedgerError::DuplicateWithdrawal(withdrawal)
                    } else {
                        LedgerError::Database(e)
                    }
                })?;

            sqlx::query(
                r#"UPDATE balance
                   SET current = current - $1, withdrawn = withdrawn + $1, updated_at = NOW()
                   WHERE user_id = $2"#,
            )
            .bind(amount.minor_units())
            .bind(user_id.0)
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
            Ok(())
        })
        .await
    }

    async fn credit(&self, user_id: UserId, amount: Amount) -> Result<(), LedgerError> {
        self.bounded(async {
            let result = sqlx::query(
                r#"UPDATE balance
                   SET current = current + $1, updated_at = NOW()
                   WHERE user_id = $2"#,
            )
            .bind(amount.minor_units())
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(LedgerError::UnknownUser(user_id));
            }
            Ok(())
        })
        .await
    }

    async fn balance(&self, user_id: UserId) -> Result<BalanceInfo, LedgerError> {
        self.bounded(async {
            let row = sqlx::query("SELECT current, withdrawn FROM balance WHERE user_id = $1")
                .bind(user_id.0)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(LedgerError::UnknownUser(user_id))?;

            Ok(BalanceInfo {
                current: Amount::from_trusted(row.try_get("current")?),
                withdrawn: Amount::from_trusted(row.try_get("withdrawn")?),
            })
        })
        .await
    }

    async fn withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
        self.bounded(async {
            let rows = sqlx::query(
                r#"SELECT number, user_id, amount, processed_at
                   FROM withdrawals
                   WHERE user_id = $1
                   ORDER BY processed_at, id"#,
            )
            .bind(user_id.0)
            .fetch_all(&self.pool)
            .await?;
            rows.iter().map(row_to_withdrawal).collect()
        })
        .await
    }
}
