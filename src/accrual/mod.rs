//! Accrual Authority
//!
//! The external service that decides, per order, whether it is valid and
//! how many points it earns. [`AccrualAuthority`] is the seam the
//! reconciliation engine depends on; [`HttpAccrualClient`] is the
//! production implementation.

pub mod client;
pub mod error;
pub mod verdict;

use crate::order_number::OrderNumber;
use crate::shutdown::Shutdown;
use async_trait::async_trait;

pub use client::{ClientConfig, HttpAccrualClient};
pub use error::AuthorityError;
pub use verdict::{AuthorityStatus, Verdict, classify};

/// One verdict query per order
#[async_trait]
pub trait AccrualAuthority: Send + Sync {
    /// Fetch the authority's current verdict for `number`.
    ///
    /// Must return [`AuthorityError::Cancelled`] promptly once `shutdown` is triggered.
    async fn query_verdict(
        &self,
        number: OrderNumber,
        shutdown: &Shutdown,
    ) -> Result<Verdict, AuthorityError>;
}
