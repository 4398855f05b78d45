use super::types::UserId;
use crate::order_number::OrderNumber;
use thiserror::Error;

/// PostgreSQL unique_violation
pub(crate) const UNIQUE_VIOLATION: &str = "23505";
/// PostgreSQL foreign_key_violation
pub(crate) const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Ledger operation timed out")]
    Timeout,

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Invalid amount: must be positive")]
    InvalidAmount,

    #[error("Withdrawal {0} already exists")]
    DuplicateWithdrawal(OrderNumber),

    #[error("Order {0} already registered by this user")]
    OrderAlreadyRegistered(OrderNumber),

    #[error("Order {0} registered by another user")]
    OrderOwnedByAnotherUser(OrderNumber),

    #[error("Unknown user: {0}")]
    UnknownUser(UserId),

    #[error("User already exists: {0}")]
    DuplicateUser(String),

    #[error("Order {0} is no longer unfinished; settlement rolled back")]
    StaleSettlement(OrderNumber),

    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl LedgerError {
    /// Business outcomes the caller can act on, as opposed to infrastructure failures
    pub fn is_business(&self) -> bool {
        !matches!(
            self,
            LedgerError::Database(_) | LedgerError::Timeout | LedgerError::CorruptRow(_)
        )
    }
}

/// True if `err` is a violation with SQLSTATE `code` on `constraint`.
pub(crate) fn is_violation(err: &sqlx::Error, code: &str, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some(code) && db.constraint() == Some(constraint)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_business_classification() {
        assert!(LedgerError::InsufficientBalance.is_business());
        assert!(LedgerError::UnknownUser(UserId(7)).is_business());
        assert!(!LedgerError::Timeout.is_business());
        assert!(!LedgerError::Database(sqlx::Error::PoolTimedOut).is_business());
    }

    #[test]
    fn test_unique_violation_ignores_other_errors() {
        assert!(!is_violation(
            &sqlx::Error::RowNotFound,
            UNIQUE_VIOLATION,
            "withdrawals_number_key"
        ));
    }
}
