//! Ledger service
//!
//! Entry point for request handlers. Takes raw user input (order number
//! strings, decimal amounts), validates it once, and delegates to the
//! injected capabilities.

use super::error::LedgerError;
use super::types::{BalanceInfo, Order, UserId, Withdrawal};
use super::{BalanceLedger, OrderRegistry};
use crate::money::{Amount, MoneyError};
use crate::order_number::{OrderNumber, OrderNumberError};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid order number: {0}")]
    InvalidOrderNumber(#[from] OrderNumberError),

    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] MoneyError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct LedgerService {
    orders: Arc<dyn OrderRegistry>,
    balances: Arc<dyn BalanceLedger>,
}

impl LedgerService {
    pub fn new(orders: Arc<dyn OrderRegistry>, balances: Arc<dyn BalanceLedger>) -> Self {
        Self { orders, balances }
    }

    /// Register an uploaded order number for `user_id`.
    pub async fn register_order(
        &self,
        user_id: UserId,
        raw_number: &str,
    ) -> Result<Order, ServiceError> {
        let number: OrderNumber = raw_number.parse()?;
        let order = self.orders.register_order(user_id, number).await?;
        info!(user_id = %user_id, order = %number, "Order registered");
        Ok(order)
    }

    pub async fn orders(&self, user_id: UserId) -> Result<Vec<Order>, ServiceError> {
        Ok(self.orders.orders_for_user(user_id).await?)
    }

    pub async fn balance(&self, user_id: UserId) -> Result<BalanceInfo, ServiceError> {
        Ok(self.balances.balance(user_id).await?)
    }

    pub async fn withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>, ServiceError> {
        Ok(self.balances.withdrawals(user_id).await?)
    }

    /// Debit `sum` points against withdrawal number `raw_number`.
    pub async fn withdraw(
        &self,
        user_id: UserId,
        raw_number: &str,
        sum: Decimal,
    ) -> Result<(), ServiceError> {
        let number: OrderNumber = raw_number.parse()?;
        let amount = Amount::from_decimal(sum)?;
        if amount.is_zero() {
            return Err(LedgerError::InvalidAmount.into());
        }

        match self.balances.withdraw(user_id, number, amount).await {
            Ok(()) => {
                info!(user_id = %user_id, order = %number, amount = %amount, "Withdrawal committed");
                Ok(())
            }
            Err(e) if e.is_business() => {
                warn!(user_id = %user_id, order = %number, amount = %amount, error = %e, "Withdrawal rejected");
                Err(e.into())
            }
            Err(e) => {
                error!(user_id = %user_id, order = %number, amount = %amount, error = %e, "Withdrawal failed");
                Err(e.into())
            }
        }
    }

    pub async fn credit(&self, user_id: UserId, amount: Amount) -> Result<(), ServiceError> {
        self.balances.credit(user_id, amount).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{InMemoryLedger, OrderStatus};
    use std::str::FromStr;

    async fn setup() -> (Arc<InMemoryLedger>, LedgerService, UserId) {
        let ledger = Arc::new(InMemoryLedger::new());
        let user = ledger.create_user("alice").await.unwrap();
        let service = LedgerService::new(ledger.clone(), ledger.clone());
        (ledger, service, user)
    }

    #[tokio::test]
    async fn test_register_order_parses_number() {
        let (_, service, user) = setup().await;

        let order = service.register_order(user, " 79927398713 ").await.unwrap();
        assert_eq!(order.number.to_string(), "79927398713");
        assert_eq!(order.status, OrderStatus::Pending);

        assert!(matches!(
            service.register_order(user, "79927398710").await,
            Err(ServiceError::InvalidOrderNumber(OrderNumberError::BadChecksum(_)))
        ));
        assert!(matches!(
            service.register_order(user, "79927398713").await,
            Err(ServiceError::Ledger(LedgerError::OrderAlreadyRegistered(_)))
        ));
        assert_eq!(service.orders(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_withdraw_validates_input() {
        let (_, service, user) = setup().await;
        service
            .credit(user, Amount::from_major(50).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            service.withdraw(user, "2377225624", Decimal::ZERO).await,
            Err(ServiceError::Ledger(LedgerError::InvalidAmount))
        ));
        assert!(matches!(
            service
                .withdraw(user, "2377225624", Decimal::from_str("-1").unwrap())
                .await,
            Err(ServiceError::InvalidAmount(MoneyError::Negative))
        ));
        assert!(matches!(
            service
                .withdraw(user, "2377225624", Decimal::from_str("1.005").unwrap())
                .await,
            Err(ServiceError::InvalidAmount(MoneyError::PrecisionOverflow { .. }))
        ));
        assert!(matches!(
            service
                .withdraw(user, "abc", Decimal::from_str("1").unwrap())
                .await,
            Err(ServiceError::InvalidOrderNumber(_))
        ));

        // Nothing above touched the balance
        let balance = service.balance(user).await.unwrap();
        assert_eq!(balance.current, Amount::from_major(50).unwrap());
        assert!(service.withdrawals(user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_withdraw_insufficient_balance() {
        let (_, service, user) = setup().await;
        service
            .credit(user, Amount::from_major(50).unwrap())
            .await
            .unwrap();

        assert!(matches!(
            service
                .withdraw(user, "2377225624", Decimal::from(100))
                .await,
            Err(ServiceError::Ledger(LedgerError::InsufficientBalance))
        ));

        service
            .withdraw(user, "2377225624", Decimal::from_str("12.50").unwrap())
            .await
            .unwrap();
        let balance = service.balance(user).await.unwrap();
        assert_eq!(balance.current, Amount::from_minor(3750).unwrap());
        assert_eq!(balance.withdrawn, Amount::from_minor(1250).unwrap());
    }

    /// Balance store whose every call times out
    struct UnreachableBalances;

    #[async_trait::async_trait]
    impl BalanceLedger for UnreachableBalances {
        async fn withdraw(&self, _: UserId, _: OrderNumber, _: Amount) -> Result<(), LedgerError> {
            Err(LedgerError::Timeout)
        }

        async fn credit(&self, _: UserId, _: Amount) -> Result<(), LedgerError> {
            Err(LedgerError::Timeout)
        }

        async fn balance(&self, _: UserId) -> Result<BalanceInfo, LedgerError> {
            Err(LedgerError::Timeout)
        }

        async fn withdrawals(&self, _: UserId) -> Result<Vec<Withdrawal>, LedgerError> {
            Err(LedgerError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_withdraw_surfaces_store_failure() {
        let ledger = Arc::new(InMemoryLedger::new());
        let user = ledger.create_user("alice").await.unwrap();
        let service = LedgerService::new(ledger, Arc::new(UnreachableBalances));

        let err = service
            .withdraw(user, "2377225624", Decimal::from(10))
            .await
            .unwrap_err();
        match err {
            ServiceError::Ledger(e) => {
                assert!(matches!(e, LedgerError::Timeout));
                assert!(!e.is_business());
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
