//! Money Conversion Module
//!
//! Loyalty points are stored as `i64` minor units with a fixed scale of 2
//! (1 point = 100 minor units). All conversions between the authority's
//! decimal numbers and the ledger's integers go through [`Amount`].
//!
//! ## Design Principles
//! 1. Explicit Error Handling: No silent truncation
//! 2. Type Safety: Ledger code never handles raw integers or floats
//!
//! ```rust
//! use loyalty_ledger::money::Amount;
//! use rust_decimal::Decimal;
//!
//! let accrual = Amount::from_decimal(Decimal::new(72998, 2)).unwrap();
//! assert_eq!(accrual.minor_units(), 72998);
//! assert_eq!(accrual.to_string(), "729.98");
//! ```

use rust_decimal::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use thiserror::Error;

/// Number of fractional digits kept for points
pub const SCALE: u32 = 2;

const MINOR_PER_MAJOR: i64 = 100;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("Amount must not be negative")]
    Negative,

    #[error("Amount too large, would overflow")]
    Overflow,
}

// ============================================================================
// Amount
// ============================================================================

/// Non-negative amount of loyalty points in minor units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Build from minor units (1/100 of a point)
    pub fn from_minor(minor: i64) -> Result<Self, MoneyError> {
        if minor < 0 {
            return Err(MoneyError::Negative);
        }
        Ok(Self(minor))
    }

    /// Build from whole points
    pub fn from_major(major: i64) -> Result<Self, MoneyError> {
        let minor = major
            .checked_mul(MINOR_PER_MAJOR)
            .ok_or(MoneyError::Overflow)?;
        Self::from_minor(minor)
    }

    /// Convert an external decimal, rejecting anything that would need rounding.
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(MoneyError::Negative);
        }

        let normalized = value.normalize();
        if normalized.scale() > SCALE {
            return Err(MoneyError::PrecisionOverflow {
                provided: normalized.scale(),
                max: SCALE,
            });
        }

        let scaled = normalized
            .checked_mul(Decimal::from(MINOR_PER_MAJOR))
            .ok_or(MoneyError::Overflow)?;
        let minor = scaled.to_i64().ok_or(MoneyError::Overflow)?;
        Self::from_minor(minor)
    }

    pub fn minor_units(self) -> i64 {
        self.0
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, SCALE)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Subtract, returning `None` if the result would go negative
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0
            .checked_sub(other.0)
            .filter(|v| *v >= 0)
            .map(Amount)
    }

    /// Build from a database column that carries a `>= 0` check constraint.
    pub(crate) fn from_trusted(minor: i64) -> Self {
        Self(minor)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        // Saturate rather than wrap; a ledger never holds i64::MAX minor units.
        Amount(iter.fold(0i64, |acc, a| acc.saturating_add(a.0)))
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let value = self.to_decimal().to_f64().unwrap_or_default();
        serializer.serialize_f64(value)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <Decimal as Deserialize>::deserialize(deserializer)?;
        Amount::from_decimal(value).map_err(serde::de::Error::custom)
    }
}
