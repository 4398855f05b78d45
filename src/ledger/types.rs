use crate::money::Amount;
use crate::order_number::OrderNumber;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// User identifier (the `users.id` column)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order lifecycle
///
/// ```text
/// Pending ──▶ Processing ──▶ Processed
///    │            │
///    └────────────┴───────▶ Invalid
/// ```
///
/// `Invalid` and `Processed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Registered, never queried. Stored as `NEW`.
    #[serde(rename = "NEW")]
    Pending,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "INVALID")]
    Invalid,
    #[serde(rename = "PROCESSED")]
    Processed,
}

impl OrderStatus {
    pub fn as_db_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Invalid => "INVALID",
            OrderStatus::Processed => "PROCESSED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Invalid | OrderStatus::Processed)
    }

    /// Whether a settlement may move an order from `self` to `next`.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        match self {
            OrderStatus::Pending => next != OrderStatus::Pending,
            OrderStatus::Processing => next != OrderStatus::Pending,
            OrderStatus::Invalid | OrderStatus::Processed => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::Pending),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "INVALID" => Ok(OrderStatus::Invalid),
            "PROCESSED" => Ok(OrderStatus::Processed),
            _ => Err(format!("Invalid order status: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub number: OrderNumber,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub accrual: Amount,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BalanceInfo {
    pub current: Amount,
    pub withdrawn: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Withdrawal {
    pub order: OrderNumber,
    pub user_id: UserId,
    pub sum: Amount,
    pub processed_at: DateTime<Utc>,
}

/// New status for one order, produced by the verdict classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    pub number: OrderNumber,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub accrual: Amount,
}

impl OrderUpdate {
    /// Amount this update adds to the owner's balance
    pub fn credit(&self) -> Amount {
        if self.status == OrderStatus::Processed {
            self.accrual
        } else {
            Amount::ZERO
        }
    }
}

/// Everything one reconciliation cycle commits in a single transaction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettlementBatch {
    pub updates: Vec<OrderUpdate>,
    /// Summed accrual per user. Ordered so row locks are always taken in the same order.
    pub credits: BTreeMap<UserId, Amount>,
}

impl SettlementBatch {
    /// Aggregate credits by owner; zero credits are dropped.
    pub fn from_updates(updates: Vec<OrderUpdate>) -> Self {
        let mut credits: BTreeMap<UserId, Amount> = BTreeMap::new();
        for update in &updates {
            let credit = update.credit();
            if credit.is_zero() {
                continue;
            }
            let entry = credits.entry(update.user_id).or_default();
            *entry = [*entry, credit].into_iter().sum();
        }
        Self { updates, credits }
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn total_credit(&self) -> Amount {
        self.credits.values().copied().sum()
    }
}
