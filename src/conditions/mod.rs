//! Cart Conditions
//!
//! Named, typed, targeted monetary adjustments. Conditions are attached to a
//! cart or to a single item, are replaced by name rather than mutated in
//! place, and may carry rule specs that gate their applicability.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::{
    money::{Money, MoneyError},
    rules::RuleSpec,
    storage::Metadata,
};

pub mod value;

pub use value::{ConditionValue, ValueError};

/// Errors raised while constructing or attaching a condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidCartCondition {
    /// The condition name was empty.
    #[error("condition name must not be empty")]
    EmptyName,

    /// The value expression could not be parsed.
    #[error(transparent)]
    Value(#[from] ValueError),

    /// A cart-level condition must target the subtotal or the total.
    #[error("condition {name:?} targets {target}, which is not a cart-level target")]
    CartTarget {
        /// Name of the offending condition.
        name: String,

        /// The rejected target.
        target: Target,
    },

    /// An item-level condition must target the item price.
    #[error("condition {name:?} targets {target}, which is not an item-level target")]
    ItemTarget {
        /// Name of the offending condition.
        name: String,

        /// The rejected target.
        target: Target,
    },

    /// A rule spec referenced a factory key nobody registered.
    #[error("unknown rule factory key {key:?}")]
    UnknownRuleKey {
        /// The unresolved key.
        key: String,
    },

    /// A rule spec's context was missing or malformed.
    #[error("invalid context for rule {key:?}: {detail}")]
    RuleContext {
        /// The rule factory key.
        key: String,

        /// What was wrong with the context.
        detail: String,
    },

    /// An enum label (type or target) was not recognised.
    #[error("unknown label {0:?}")]
    UnknownLabel(String),
}

/// The kind of adjustment a condition represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionType {
    /// Reduces the amount owed.
    Discount,

    /// A tax charge.
    Tax,

    /// A service or handling fee.
    Fee,

    /// A shipping charge.
    Shipping,

    /// A generic extra charge.
    Surcharge,

    /// Store credit applied against the total.
    Credit,

    /// A neutral adjustment.
    Adjustment,
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Discount => "discount",
            Self::Tax => "tax",
            Self::Fee => "fee",
            Self::Shipping => "shipping",
            Self::Surcharge => "surcharge",
            Self::Credit => "credit",
            Self::Adjustment => "adjustment",
        };

        write!(f, "{label}")
    }
}

impl FromStr for ConditionType {
    type Err = InvalidCartCondition;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.to_ascii_lowercase().as_str() {
            "discount" => Ok(Self::Discount),
            "tax" => Ok(Self::Tax),
            "fee" => Ok(Self::Fee),
            "shipping" => Ok(Self::Shipping),
            "surcharge" => Ok(Self::Surcharge),
            "credit" => Ok(Self::Credit),
            "adjustment" => Ok(Self::Adjustment),
            _ => Err(InvalidCartCondition::UnknownLabel(label.to_string())),
        }
    }
}

/// The amount a condition applies against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// The cart subtotal.
    Subtotal,

    /// The cart total.
    Total,

    /// A single item's price × quantity.
    Price,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Subtotal => "subtotal",
            Self::Total => "total",
            Self::Price => "price",
        };

        write!(f, "{label}")
    }
}

impl FromStr for Target {
    type Err = InvalidCartCondition;

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.to_ascii_lowercase().as_str() {
            "subtotal" => Ok(Self::Subtotal),
            "total" => Ok(Self::Total),
            "price" => Ok(Self::Price),
            _ => Err(InvalidCartCondition::UnknownLabel(label.to_string())),
        }
    }
}

/// A named monetary adjustment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartCondition {
    name: String,

    #[serde(rename = "type")]
    kind: ConditionType,

    target: Target,

    value: ConditionValue,

    #[serde(default)]
    order: i32,

    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    attributes: Metadata,

    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    rules: SmallVec<[RuleSpec; 2]>,
}

impl CartCondition {
    /// Create a condition.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCartCondition::EmptyName`] when the name is blank.
    pub fn new(
        name: impl Into<String>,
        kind: ConditionType,
        target: Target,
        value: ConditionValue,
    ) -> Result<Self, InvalidCartCondition> {
        let name = name.into();

        if name.trim().is_empty() {
            return Err(InvalidCartCondition::EmptyName);
        }

        Ok(Self {
            name,
            kind,
            target,
            value,
            order: 0,
            attributes: Metadata::default(),
            rules: SmallVec::new(),
        })
    }

    /// Parse the value expression and create a condition in one step.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCartCondition`] for a blank name or a malformed
    /// value expression.
    pub fn parsed(
        name: impl Into<String>,
        kind: ConditionType,
        target: Target,
        value: &str,
    ) -> Result<Self, InvalidCartCondition> {
        Self::new(name, kind, target, value.parse::<ConditionValue>()?)
    }

    /// Set the application-order tie-break (ascending).
    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Attach free-form attributes.
    #[must_use]
    pub fn with_attributes(mut self, attributes: Metadata) -> Self {
        self.attributes = attributes;
        self
    }

    /// Attach a single attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Attach rule specs, making the condition dynamic.
    #[must_use]
    pub fn with_rules(mut self, rules: impl IntoIterator<Item = RuleSpec>) -> Self {
        self.rules = rules.into_iter().collect();
        self
    }

    /// The unique-within-scope name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The condition kind.
    #[must_use]
    pub const fn kind(&self) -> ConditionType {
        self.kind
    }

    /// The target amount.
    #[must_use]
    pub const fn target(&self) -> Target {
        self.target
    }

    /// The parsed value expression.
    #[must_use]
    pub const fn value(&self) -> &ConditionValue {
        &self.value
    }

    /// The application-order tie-break.
    #[must_use]
    pub const fn order(&self) -> i32 {
        self.order
    }

    /// Free-form attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Metadata {
        &self.attributes
    }

    /// The rule specs gating this condition, empty for static conditions.
    #[must_use]
    pub fn rules(&self) -> &[RuleSpec] {
        &self.rules
    }

    /// Whether this condition carries rule specs for re-evaluation.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        !self.rules.is_empty()
    }

    /// Apply the condition's value to a base amount.
    ///
    /// # Errors
    ///
    /// Propagates [`MoneyError`] from the underlying arithmetic.
    pub fn apply(&self, base: &Money) -> Result<Money, MoneyError> {
        self.value.apply(base)
    }
}

/// Sort conditions for application: `order` ascending, ties broken by
/// insertion order (the sort is stable over the input slice).
#[must_use]
pub fn ordered(conditions: &[CartCondition]) -> Vec<&CartCondition> {
    let mut sorted: Vec<&CartCondition> = conditions.iter().collect();
    sorted.sort_by_key(|condition| condition.order);

    sorted
}
