//! Amount and Balance types
//!
//! Fixed-point monetary primitives. Every value is validated at construction,
//! so a negative balance or a non-positive amount cannot be represented.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest balance an account may hold (1 trillion)
const MAX_BALANCE_UNITS: i64 = 1_000_000_000_000;

/// Maximum decimal places (8)
const MAX_SCALE: u32 = 8;

/// A strictly positive amount moved by a deposit, withdrawal or transfer.
///
/// # Invariants
/// - Value is always positive (> 0)
/// - At most 8 decimal places
/// - Never larger than the maximum balance
///
/// # Example
/// ```
/// use rust_decimal::Decimal;
/// use ledger_engine::domain::Amount;
///
/// let amount: Amount = "12.50".parse().unwrap();
/// assert_eq!(amount.value(), Decimal::new(1250, 2));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

/// Errors raised while constructing an Amount or Balance
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AmountError {
    #[error("amount must be positive (got {0})")]
    NotPositive(Decimal),

    #[error("balance cannot be negative (got {0})")]
    Negative(Decimal),

    #[error("amount has too many decimal places (max {MAX_SCALE}, got {0})")]
    TooManyDecimals(u32),

    #[error("value exceeds maximum allowed balance ({MAX_BALANCE_UNITS})")]
    Overflow,

    #[error("invalid amount format: {0}")]
    ParseError(String),
}

fn max_balance() -> Decimal {
    Decimal::from(MAX_BALANCE_UNITS)
}

impl Amount {
    /// Create a new Amount with validation.
    ///
    /// # Errors
    /// - `AmountError::NotPositive` if value <= 0
    /// - `AmountError::TooManyDecimals` if more than 8 decimal places
    /// - `AmountError::Overflow` if value exceeds the maximum balance
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value <= Decimal::ZERO {
            return Err(AmountError::NotPositive(value));
        }

        // Trailing zeros carry no value: "12.50" and "12.5" are the same amount
        let value = value.normalize();

        if value.scale() > MAX_SCALE {
            return Err(AmountError::TooManyDecimals(value.scale()));
        }

        if value > max_balance() {
            return Err(AmountError::Overflow);
        }

        Ok(Self(value))
    }

    /// Create an Amount from an integer (no decimal places).
    pub fn from_integer(value: i64) -> Result<Self, AmountError> {
        Self::new(Decimal::from(value))
    }

    /// Get the underlying Decimal value.
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decimal =
            Decimal::from_str(s.trim()).map_err(|e| AmountError::ParseError(e.to_string()))?;
        Amount::new(decimal)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

/// Balance represents an account balance (zero or positive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Balance(Decimal);

impl Balance {
    /// Create a new balance (zero or positive)
    pub fn new(value: Decimal) -> Result<Self, AmountError> {
        if value < Decimal::ZERO {
            return Err(AmountError::Negative(value));
        }

        let value = value.normalize();

        if value.scale() > MAX_SCALE {
            return Err(AmountError::TooManyDecimals(value.scale()));
        }

        if value > max_balance() {
            return Err(AmountError::Overflow);
        }

        Ok(Self(value))
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Check if balance covers the amount
    pub fn is_sufficient_for(&self, amount: &Amount) -> bool {
        self.0 >= amount.value()
    }

    /// Add amount to balance
    pub fn credit(&self, amount: &Amount) -> Result<Balance, AmountError> {
        let new_value = self
            .0
            .checked_add(amount.value())
            .ok_or(AmountError::Overflow)?;
        Balance::new(new_value)
    }

    /// Subtract amount from balance
    pub fn debit(&self, amount: &Amount) -> Result<Balance, AmountError> {
        Balance::new(self.0 - amount.value())
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Default for Balance {
    fn default() -> Self {
        Self::zero()
    }
}

impl TryFrom<Decimal> for Balance {
    type Error = AmountError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Balance::new(value)
    }
}

impl From<Balance> for Decimal {
    fn from(balance: Balance) -> Self {
        balance.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_positive() {
        let amount = Amount::new(dec!(100)).unwrap();
        assert_eq!(amount.value(), dec!(100));
    }

    #[test]
    fn test_amount_zero_and_negative_rejected() {
        assert!(matches!(Amount::new(Decimal::ZERO), Err(AmountError::NotPositive(_))));
        assert!(matches!(Amount::new(dec!(-5)), Err(AmountError::NotPositive(_))));
    }

    #[test]
    fn test_amount_too_many_decimals() {
        let amount = Amount::new(Decimal::new(123456789, 9));
        assert!(matches!(amount, Err(AmountError::TooManyDecimals(9))));
        assert!(Amount::new(Decimal::new(12345678, 8)).is_ok());
    }

    #[test]
    fn test_amount_overflow() {
        assert!(Amount::new(max_balance()).is_ok());
        let too_big = max_balance() + dec!(0.00000001);
        assert!(matches!(Amount::new(too_big), Err(AmountError::Overflow)));
    }

    #[test]
    fn test_max_balance_is_one_trillion() {
        assert_eq!(max_balance(), dec!(1000000000000));
    }

    #[test]
    fn test_amount_from_str() {
        let amount: Amount = " 123.456 ".parse().unwrap();
        assert_eq!(amount.value(), dec!(123.456));

        let garbage: Result<Amount, _> = "abc".parse();
        assert!(matches!(garbage, Err(AmountError::ParseError(_))));

        let nan: Result<Amount, _> = "NaN".parse();
        assert!(nan.is_err());
    }

    #[test]
    fn test_amount_serde_from_json_string() {
        let amount: Amount = serde_json::from_str(r#""0.1""#).unwrap();
        assert_eq!(amount.value(), dec!(0.1));

        let rejected: Result<Amount, _> = serde_json::from_str(r#""-3""#);
        assert!(rejected.is_err());
    }

    #[test]
    fn test_balance_credit_debit_is_exact() {
        let mut balance = Balance::zero();
        let tenth = Amount::new(dec!(0.1)).unwrap();
        for _ in 0..10 {
            balance = balance.credit(&tenth).unwrap();
        }
        assert_eq!(balance.value(), dec!(1.0));

        let balance = balance.debit(&Amount::new(dec!(0.3)).unwrap()).unwrap();
        assert_eq!(balance.value(), dec!(0.7));
    }

    #[test]
    fn test_balance_insufficient() {
        let balance = Balance::new(dec!(50)).unwrap();
        let amount = Amount::new(dec!(100)).unwrap();

        assert!(!balance.is_sufficient_for(&amount));
        assert!(matches!(balance.debit(&amount), Err(AmountError::Negative(_))));
    }

    #[test]
    fn test_balance_credit_overflow() {
        let balance = Balance::new(max_balance()).unwrap();
        let one = Amount::from_integer(1).unwrap();
        assert!(matches!(balance.credit(&one), Err(AmountError::Overflow)));
    }

    #[test]
    fn test_trailing_zeros_are_dropped() {
        let balance = Balance::new(dec!(100.00000000)).unwrap();
        assert_eq!(balance.value().to_string(), "100");
        assert_eq!(Amount::new(dec!(12.50)).unwrap().value().to_string(), "12.5");
    }
}
