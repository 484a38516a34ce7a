//! Money
//!
//! Minor-unit monetary values tagged with a currency code and an explicit
//! precision. The minor-unit integer is the sole source of truth; major-unit
//! views are always derived.

use std::fmt;

use rust_decimal::{Decimal, RoundingStrategy, prelude::ToPrimitive};
use rusty_money::iso;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default number of decimal places when none is given.
pub const DEFAULT_PRECISION: u8 = 2;

/// Errors raised by money construction and arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    /// Arithmetic between two different currencies.
    #[error("currency mismatch: {left} vs {right}")]
    CurrencyMismatch {
        /// Currency of the left operand.
        left: String,

        /// Currency of the right operand.
        right: String,
    },

    /// Arithmetic between two different precisions of the same currency.
    #[error("precision mismatch: {left} vs {right}")]
    PrecisionMismatch {
        /// Precision of the left operand.
        left: u8,

        /// Precision of the right operand.
        right: u8,
    },

    /// Division by a zero divisor.
    #[error("division by zero")]
    DivisionByZero,

    /// The amount cannot be represented in minor units.
    #[error("amount overflowed the minor-unit range")]
    AmountOverflow,

    /// No items provided, so a currency cannot be determined.
    #[error("no items provided; cannot determine a currency")]
    NoItems,
}

/// An immutable monetary value.
///
/// Every operation returns a new value; all rounding happens half-up at the
/// minor-unit boundary so repeated operations never accumulate drift.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    minor: i64,
    currency: String,
    precision: u8,
}

impl Money {
    /// Create a value from minor units at the default precision.
    #[must_use]
    pub fn from_minor(minor: i64, currency: &str) -> Self {
        Self::from_minor_precise(minor, currency, DEFAULT_PRECISION)
    }

    /// Create a value from minor units at an explicit precision.
    #[must_use]
    pub fn from_minor_precise(minor: i64, currency: &str, precision: u8) -> Self {
        Self {
            minor,
            currency: currency.to_string(),
            precision,
        }
    }

    /// Create a value from a major-unit decimal at the default precision.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::AmountOverflow`] if the scaled amount does not
    /// fit the minor-unit range.
    pub fn from_major(amount: Decimal, currency: &str) -> Result<Self, MoneyError> {
        Self::from_major_precise(amount, currency, DEFAULT_PRECISION)
    }

    /// Create a value from a major-unit decimal, rounding half-up to
    /// `precision` decimal places.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::AmountOverflow`] if the scaled amount does not
    /// fit the minor-unit range.
    pub fn from_major_precise(
        amount: Decimal,
        currency: &str,
        precision: u8,
    ) -> Result<Self, MoneyError> {
        let minor = amount
            .checked_mul(scale_factor(precision)?)
            .ok_or(MoneyError::AmountOverflow)
            .and_then(round_to_minor)?;

        Ok(Self::from_minor_precise(minor, currency, precision))
    }

    /// The zero value for a currency at the default precision.
    #[must_use]
    pub fn zero(currency: &str) -> Self {
        Self::from_minor(0, currency)
    }

    /// The amount in minor units.
    #[must_use]
    pub const fn minor_units(&self) -> i64 {
        self.minor
    }

    /// The currency code.
    #[must_use]
    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// The number of decimal places.
    #[must_use]
    pub const fn precision(&self) -> u8 {
        self.precision
    }

    /// The derived major-unit view of the amount.
    #[must_use]
    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.minor, u32::from(self.precision))
    }

    /// Add another value of the same currency.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::CurrencyMismatch`] or
    /// [`MoneyError::PrecisionMismatch`] when the operands disagree, and
    /// [`MoneyError::AmountOverflow`] when the sum leaves the minor-unit
    /// range.
    pub fn add(&self, other: &Self) -> Result<Self, MoneyError> {
        self.check_compatible(other)?;

        let minor = self
            .minor
            .checked_add(other.minor)
            .ok_or(MoneyError::AmountOverflow)?;

        Ok(self.with_minor(minor))
    }

    /// Subtract another value of the same currency.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Money::add`].
    pub fn subtract(&self, other: &Self) -> Result<Self, MoneyError> {
        self.check_compatible(other)?;

        let minor = self
            .minor
            .checked_sub(other.minor)
            .ok_or(MoneyError::AmountOverflow)?;

        Ok(self.with_minor(minor))
    }

    /// Multiply by a decimal factor, rounding half-up at the minor-unit
    /// boundary.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::AmountOverflow`] if the product cannot be
    /// represented.
    pub fn multiply(&self, factor: Decimal) -> Result<Self, MoneyError> {
        let minor = Decimal::from(self.minor)
            .checked_mul(factor)
            .ok_or(MoneyError::AmountOverflow)
            .and_then(round_to_minor)?;

        Ok(self.with_minor(minor))
    }

    /// Divide by a decimal divisor, rounding half-up at the minor-unit
    /// boundary.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::DivisionByZero`] for a zero divisor and
    /// [`MoneyError::AmountOverflow`] if the quotient cannot be represented.
    pub fn divide(&self, divisor: Decimal) -> Result<Self, MoneyError> {
        if divisor.is_zero() {
            return Err(MoneyError::DivisionByZero);
        }

        let minor = Decimal::from(self.minor)
            .checked_div(divisor)
            .ok_or(MoneyError::AmountOverflow)
            .and_then(round_to_minor)?;

        Ok(self.with_minor(minor))
    }

    /// The given percentage of this amount (e.g. `percentage(20)` is 20% of
    /// self), rounded half-up at the minor-unit boundary.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::AmountOverflow`] if the result cannot be
    /// represented.
    pub fn percentage(&self, rate: Decimal) -> Result<Self, MoneyError> {
        let minor = Decimal::from(self.minor)
            .checked_mul(rate)
            .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
            .ok_or(MoneyError::AmountOverflow)
            .and_then(round_to_minor)?;

        Ok(self.with_minor(minor))
    }

    /// Whether this amount is strictly greater than another.
    ///
    /// # Errors
    ///
    /// Cross-currency comparison returns [`MoneyError::CurrencyMismatch`].
    pub fn greater_than(&self, other: &Self) -> Result<bool, MoneyError> {
        self.check_compatible(other)?;

        Ok(self.minor > other.minor)
    }

    /// Whether this amount is strictly less than another.
    ///
    /// # Errors
    ///
    /// Cross-currency comparison returns [`MoneyError::CurrencyMismatch`].
    pub fn less_than(&self, other: &Self) -> Result<bool, MoneyError> {
        self.check_compatible(other)?;

        Ok(self.minor < other.minor)
    }

    /// Whether the amount is strictly positive.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.minor > 0
    }

    /// Whether the amount is zero or negative.
    #[must_use]
    pub const fn is_zero_or_negative(&self) -> bool {
        self.minor <= 0
    }

    /// Render the amount with its currency symbol where the code is a known
    /// ISO-4217 currency, falling back to `"CODE 1.23"` otherwise.
    #[must_use]
    pub fn format(&self) -> String {
        let magnitude = Decimal::new(self.minor.abs(), u32::from(self.precision));
        let sign = if self.minor < 0 { "-" } else { "" };

        match iso::find(&self.currency) {
            Some(currency) => format!("{sign}{}{magnitude}", currency.symbol),
            None => format!("{sign}{} {magnitude}", self.currency),
        }
    }

    fn with_minor(&self, minor: i64) -> Self {
        Self {
            minor,
            currency: self.currency.clone(),
            precision: self.precision,
        }
    }

    fn check_compatible(&self, other: &Self) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch {
                left: self.currency.clone(),
                right: other.currency.clone(),
            });
        }

        if self.precision != other.precision {
            return Err(MoneyError::PrecisionMismatch {
                left: self.precision,
                right: other.precision,
            });
        }

        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

fn scale_factor(precision: u8) -> Result<Decimal, MoneyError> {
    10_i64
        .checked_pow(u32::from(precision))
        .map(Decimal::from)
        .ok_or(MoneyError::AmountOverflow)
}

fn round_to_minor(amount: Decimal) -> Result<i64, MoneyError> {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(MoneyError::AmountOverflow)
}
