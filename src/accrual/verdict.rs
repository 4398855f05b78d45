use super::error::AuthorityError;
use crate::ledger::{Order, OrderStatus, OrderUpdate};
use crate::money::{Amount, MoneyError, SCALE};
use crate::order_number::OrderNumber;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Order status as reported by the accrual authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorityStatus {
    Registered,
    Invalid,
    Processing,
    Processed,
}

/// Body of `GET /api/orders/{number}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub order: OrderNumber,
    pub status: AuthorityStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
}

/// Map a verdict onto the order's next state.
///
/// | authority    | ledger       | credit  |
/// |--------------|--------------|---------|
/// | `REGISTERED` | `Processing` | no      |
/// | `PROCESSING` | `Processing` | no      |
/// | `INVALID`    | `Invalid`    | no      |
/// | `PROCESSED`  | `Processed`  | accrual |
///
/// A `PROCESSED` verdict without an accrual earns zero points. Accruals finer
/// than the ledger scale are rounded half-to-even; negative ones are rejected.
pub fn classify(order: &Order, verdict: &Verdict) -> Result<OrderUpdate, AuthorityError> {
    if verdict.order != order.number {
        return Err(AuthorityError::OrderMismatch {
            expected: order.number,
            got: verdict.order,
        });
    }

    let (status, accrual) = match verdict.status {
        AuthorityStatus::Registered | AuthorityStatus::Processing => {
            (OrderStatus::Processing, Amount::ZERO)
        }
        AuthorityStatus::Invalid => (OrderStatus::Invalid, Amount::ZERO),
        AuthorityStatus::Processed => {
            let accrual = ledger_accrual(order.number, verdict.accrual.unwrap_or_default())?;
            (OrderStatus::Processed, accrual)
        }
    };

    Ok(OrderUpdate {
        number: order.number,
        user_id: order.user_id,
        status,
        accrual,
    })
}

fn ledger_accrual(number: OrderNumber, reported: Decimal) -> Result<Amount, AuthorityError> {
    if reported.is_sign_negative() && !reported.is_zero() {
        return Err(MoneyError::Negative.into());
    }

    let rounded = reported.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointNearestEven);
    if rounded != reported {
        warn!(order = %number, reported = %reported, credited = %rounded, "Accrual rounded to ledger scale");
    }
    Ok(Amount::from_decimal(rounded)?)
}
