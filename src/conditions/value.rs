//! Condition value grammar
//!
//! Textual adjustment expressions (`"-20%"`, `"+15.00"`, `"*1.5"`, `"/2"`)
//! parsed once into a tagged variant. The string form only reappears at the
//! storage boundary.

use std::{fmt, str::FromStr};

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

use crate::money::{Money, MoneyError};

/// Errors raised while parsing a condition value expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueError {
    /// The expression was empty.
    #[error("condition value is empty")]
    Empty,

    /// The magnitude was not a valid decimal.
    #[error("malformed condition value: {0:?}")]
    Malformed(String),

    /// A divisive expression with a zero divisor.
    #[error("condition value divides by zero")]
    ZeroDivisor,
}

/// A parsed monetary adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionValue {
    /// Add a signed fixed amount in major units.
    Flat(Decimal),

    /// Add a signed percentage of the running amount.
    Percentage(Decimal),

    /// Multiply the running amount by a factor.
    Times(Decimal),

    /// Divide the running amount by a divisor.
    DividedBy(Decimal),
}

impl ConditionValue {
    /// Apply this adjustment to a base amount.
    ///
    /// Percentages compute against the amount as given, so successive
    /// percentage values compound on each other's output.
    ///
    /// # Errors
    ///
    /// Propagates [`MoneyError`] from the underlying arithmetic.
    pub fn apply(&self, base: &Money) -> Result<Money, MoneyError> {
        match self {
            Self::Flat(amount) => {
                let delta = Money::from_major_precise(*amount, base.currency(), base.precision())?;
                base.add(&delta)
            }
            Self::Percentage(rate) => base.add(&base.percentage(*rate)?),
            Self::Times(factor) => base.multiply(*factor),
            Self::DividedBy(divisor) => base.divide(*divisor),
        }
    }

    /// Normalize to a discount: flat and percentage magnitudes become
    /// negative, multiplicative transforms are left alone.
    #[must_use]
    pub fn as_discount(self) -> Self {
        match self {
            Self::Flat(amount) => Self::Flat(-amount.abs()),
            Self::Percentage(rate) => Self::Percentage(-rate.abs()),
            other => other,
        }
    }

    /// Normalize to a charge: flat and percentage magnitudes become
    /// positive, multiplicative transforms are left alone.
    #[must_use]
    pub fn as_charge(self) -> Self {
        match self {
            Self::Flat(amount) => Self::Flat(amount.abs()),
            Self::Percentage(rate) => Self::Percentage(rate.abs()),
            other => other,
        }
    }

    /// Whether this value is a percentage-of-base adjustment.
    #[must_use]
    pub const fn is_percentage(&self) -> bool {
        matches!(self, Self::Percentage(_))
    }
}

impl FromStr for ConditionValue {
    type Err = ValueError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(ValueError::Empty);
        }

        let parse_magnitude = |text: &str| {
            Decimal::from_str(text.trim()).map_err(|_| ValueError::Malformed(raw.to_string()))
        };

        if let Some(rest) = trimmed.strip_prefix('*') {
            return Ok(Self::Times(parse_magnitude(rest)?));
        }

        if let Some(rest) = trimmed.strip_prefix('/') {
            let divisor = parse_magnitude(rest)?;

            if divisor.is_zero() {
                return Err(ValueError::ZeroDivisor);
            }

            return Ok(Self::DividedBy(divisor));
        }

        // A bare magnitude with no leading sign defaults to additive.
        let (sign, unsigned) = match trimmed.strip_prefix('-') {
            Some(rest) => (Decimal::NEGATIVE_ONE, rest),
            None => (Decimal::ONE, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };

        match unsigned.strip_suffix('%') {
            Some(rest) => Ok(Self::Percentage(sign * parse_magnitude(rest)?)),
            None => Ok(Self::Flat(sign * parse_magnitude(unsigned)?)),
        }
    }
}

impl fmt::Display for ConditionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat(amount) => write!(f, "{}{}", sign_of(*amount), amount.abs()),
            Self::Percentage(rate) => write!(f, "{}{}%", sign_of(*rate), rate.abs()),
            Self::Times(factor) => write!(f, "*{factor}"),
            Self::DividedBy(divisor) => write!(f, "/{divisor}"),
        }
    }
}

fn sign_of(magnitude: Decimal) -> &'static str {
    if magnitude.is_sign_negative() { "-" } else { "+" }
}

impl Serialize for ConditionValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ConditionValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;

        raw.parse().map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[test]
    fn bare_magnitude_defaults_to_additive() -> TestResult {
        assert_eq!(
            "15.00".parse::<ConditionValue>()?,
            ConditionValue::Flat(Decimal::from_str("15.00")?)
        );

        Ok(())
    }

    #[test]
    fn percent_suffix_parses_as_percentage() -> TestResult {
        assert_eq!(
            "-20%".parse::<ConditionValue>()?,
            ConditionValue::Percentage(Decimal::from_str("-20")?)
        );
        assert_eq!(
            "10%".parse::<ConditionValue>()?,
            ConditionValue::Percentage(Decimal::from_str("10")?)
        );

        Ok(())
    }

    #[test]
    fn multiplicative_forms_parse() -> TestResult {
        assert_eq!(
            "*1.5".parse::<ConditionValue>()?,
            ConditionValue::Times(Decimal::from_str("1.5")?)
        );
        assert_eq!(
            "/2".parse::<ConditionValue>()?,
            ConditionValue::DividedBy(Decimal::TWO)
        );

        Ok(())
    }

    #[test]
    fn zero_divisor_is_rejected_at_parse_time() {
        assert_eq!(
            "/0".parse::<ConditionValue>(),
            Err(ValueError::ZeroDivisor)
        );
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            "twenty".parse::<ConditionValue>(),
            Err(ValueError::Malformed(_))
        ));
        assert_eq!("".parse::<ConditionValue>(), Err(ValueError::Empty));
    }

    #[test]
    fn apply_flat_adds_major_units() -> TestResult {
        let base = Money::from_minor(10_000, "USD");
        let result = "-15.00".parse::<ConditionValue>()?.apply(&base)?;

        assert_eq!(result.minor_units(), 8_500);

        Ok(())
    }

    #[test]
    fn apply_percentage_compounds_on_running_amount() -> TestResult {
        let base = Money::from_minor(10_000, "USD");
        let taxed = "+10%".parse::<ConditionValue>()?.apply(&base)?;
        let total = "-5%".parse::<ConditionValue>()?.apply(&taxed)?;

        assert_eq!(taxed.minor_units(), 11_000);
        assert_eq!(total.minor_units(), 10_450);

        Ok(())
    }

    #[test]
    fn discount_normalization_flips_sign() -> TestResult {
        let value: ConditionValue = "20%".parse()?;

        assert_eq!(
            value.as_discount(),
            ConditionValue::Percentage(Decimal::from_str("-20")?)
        );
        assert_eq!(
            value.as_discount().as_charge(),
            ConditionValue::Percentage(Decimal::from_str("20")?)
        );

        Ok(())
    }

    #[test]
    fn display_round_trips_through_parse() -> TestResult {
        for raw in ["-20%", "+15.00", "*1.5", "/2"] {
            let value: ConditionValue = raw.parse()?;
            let reparsed: ConditionValue = value.to_string().parse()?;

            assert_eq!(reparsed, value, "{raw} should survive a round trip");
        }

        Ok(())
    }
}
