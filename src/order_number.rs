//! Order Number
//!
//! Checksum-validated numeric identifier shared by purchase orders and
//! withdrawal requests. Parsing is the only way to build one from external
//! input, so every `OrderNumber` in the system has passed the Luhn check.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderNumberError {
    #[error("Order number is empty")]
    Empty,

    #[error("Order number contains non-digit characters: {0}")]
    NotNumeric(String),

    #[error("Order number is too large: {0}")]
    Overflow(String),

    #[error("Order number fails checksum: {0}")]
    BadChecksum(String),
}

/// Luhn checksum over a string of ASCII digits.
///
/// Returns false for empty input or any non-digit character.
pub fn is_valid_luhn(number: &str) -> bool {
    if number.is_empty() {
        return false;
    }

    let mut sum = 0u32;
    for (i, c) in number.bytes().rev().enumerate() {
        if !c.is_ascii_digit() {
            return false;
        }
        let mut d = (c - b'0') as u32;
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }

    sum % 10 == 0
}

/// Checksum-valid order identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OrderNumber(i64);

impl OrderNumber {
    /// Build from a raw database value without re-validating.
    ///
    /// Only the stores use this; rows were validated on insert.
    pub(crate) fn from_trusted(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl FromStr for OrderNumber {
    type Err = OrderNumberError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(OrderNumberError::Empty);
        }
        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(OrderNumberError::NotNumeric(s.to_string()));
        }
        let value: i64 = s
            .parse()
            .map_err(|_| OrderNumberError::Overflow(s.to_string()))?;
        if !is_valid_luhn(s) {
            return Err(OrderNumberError::BadChecksum(s.to_string()));
        }
        Ok(Self(value))
    }
}

impl TryFrom<i64> for OrderNumber {
    type Error = OrderNumberError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value < 0 {
            return Err(OrderNumberError::NotNumeric(value.to_string()));
        }
        value.to_string().parse()
    }
}

impl fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// The accrual authority and the API layer both carry order numbers as strings.
impl Serialize for OrderNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OrderNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(i64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => OrderNumber::try_from(n).map_err(serde::de::Error::custom),
        }
    }
}
