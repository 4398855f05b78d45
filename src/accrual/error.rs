use crate::money::MoneyError;
use crate::order_number::OrderNumber;
use thiserror::Error;

/// Failure to obtain a usable verdict for one order.
///
/// Every variant is transient from the ledger's point of view: the order
/// stays unfinished and is queried again next cycle.
#[derive(Debug, Error)]
pub enum AuthorityError {
    #[error("Accrual authority request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Accrual authority returned status {0}")]
    UnexpectedStatus(u16),

    #[error("Accrual authority still rate limiting after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("Malformed verdict: {0}")]
    Malformed(String),

    #[error("Verdict for order {got} does not match queried order {expected}")]
    OrderMismatch {
        expected: OrderNumber,
        got: OrderNumber,
    },

    #[error("Verdict query cancelled")]
    Cancelled,

    #[error("Invalid accrual in verdict: {0}")]
    InvalidAccrual(#[from] MoneyError),
}
