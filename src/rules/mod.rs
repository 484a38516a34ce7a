//! Condition rule engine
//!
//! Rule predicates are data (`RuleSpec`: factory key + context map) resolved
//! by a [`RulesFactory`] into typed [`Rule`] values. Resolution fails on an
//! unknown key before any rule is constructed, and evaluation is a pure
//! function of the rule, the cart, an optional item and the evaluator's
//! clock.

use std::{fmt, sync::Arc};

use jiff::{Zoned, civil};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;

use crate::{
    cart::Cart,
    conditions::{ConditionType, InvalidCartCondition},
    items::CartItem,
    storage::Metadata,
};

/// Metadata key holding the customer's tag list.
pub const CUSTOMER_TAGS_KEY: &str = "customer_tags";

/// A rule predicate as inspectable data: a factory key plus its context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    /// The factory key (e.g. `min-items`).
    pub key: String,

    /// Free-form context consumed by the factory.
    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    pub context: Metadata,
}

impl RuleSpec {
    /// Create a spec from a key and context pairs.
    #[must_use]
    pub fn new(key: impl Into<String>, context: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            key: key.into(),
            context: context.into_iter().collect(),
        }
    }

    /// Create a spec with an empty context.
    #[must_use]
    pub fn bare(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            context: Metadata::default(),
        }
    }
}

/// A custom predicate registered on a [`RulesFactory`].
pub trait Predicate: fmt::Debug + Send + Sync {
    /// Evaluate against cart state at the given civil datetime.
    fn evaluate(&self, cart: &Cart, item: Option<&CartItem>, now: civil::DateTime) -> bool;
}

/// A resolved, evaluable rule.
#[derive(Debug, Clone)]
pub enum Rule {
    /// Total cart quantity must be at least `min`.
    MinItems {
        /// Minimum total quantity.
        min: u64,
    },

    /// Cart metadata `key` must equal `expected`.
    MetadataEquals {
        /// Metadata key.
        key: String,

        /// Expected value.
        expected: Value,
    },

    /// The local time must fall inside the window; `start > end` wraps past
    /// midnight.
    TimeWindow {
        /// Window start (inclusive).
        start: civil::Time,

        /// Window end (inclusive).
        end: civil::Time,
    },

    /// The local weekday must be listed.
    DayOfWeek {
        /// Accepted weekdays.
        days: SmallVec<[civil::Weekday; 7]>,
    },

    /// The cart's customer tags must contain `tag`.
    CustomerTag {
        /// Required tag.
        tag: String,
    },

    /// An item attribute must equal `expected` (the given item, else any
    /// item in the cart).
    ItemAttributeEquals {
        /// Attribute key.
        key: String,

        /// Expected value.
        expected: Value,
    },

    /// A cart-level condition of the given kind must be attached.
    CartConditionTypeExists {
        /// Required condition kind.
        kind: ConditionType,
    },

    /// Quantity must not exceed `max` (the given item, else every item).
    ItemQuantityAtMost {
        /// Maximum quantity.
        max: u64,
    },

    /// A caller-registered predicate.
    Custom(Arc<dyn Predicate>),
}

/// Resolves rule specs into rules, with room for caller-registered keys.
#[derive(Clone, Default)]
pub struct RulesFactory {
    custom: rustc_hash::FxHashMap<String, Arc<Builder>>,
}

type Builder = dyn Fn(&RuleSpec) -> Result<Rule, InvalidCartCondition> + Send + Sync;

impl fmt::Debug for RulesFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RulesFactory")
            .field("custom_keys", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl RulesFactory {
    /// Create a factory with only the built-in keys.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom factory key. Custom keys shadow built-ins.
    pub fn register<F>(&mut self, key: impl Into<String>, builder: F)
    where
        F: Fn(&RuleSpec) -> Result<Rule, InvalidCartCondition> + Send + Sync + 'static,
    {
        self.custom.insert(key.into(), Arc::new(builder));
    }

    /// Resolve a spec into a rule.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCartCondition::UnknownRuleKey`] for an unregistered
    /// key and [`InvalidCartCondition::RuleContext`] for a malformed
    /// context. Nothing is constructed on failure.
    pub fn build(&self, spec: &RuleSpec) -> Result<Rule, InvalidCartCondition> {
        if let Some(builder) = self.custom.get(&spec.key) {
            return builder(spec);
        }

        match spec.key.as_str() {
            "min-items" => Ok(Rule::MinItems {
                min: require_u64(spec, "min")?,
            }),
            "metadata-equals" => Ok(Rule::MetadataEquals {
                key: require_str(spec, "key")?.to_string(),
                expected: require_value(spec, "value")?.clone(),
            }),
            "time-window" => Ok(Rule::TimeWindow {
                start: require_time(spec, "start")?,
                end: require_time(spec, "end")?,
            }),
            "day-of-week" => Ok(Rule::DayOfWeek {
                days: require_days(spec)?,
            }),
            "customer-tag" => Ok(Rule::CustomerTag {
                tag: require_str(spec, "tag")?.to_string(),
            }),
            "item-attribute-equals" => Ok(Rule::ItemAttributeEquals {
                key: require_str(spec, "key")?.to_string(),
                expected: require_value(spec, "value")?.clone(),
            }),
            "cart-condition-type-exists" => Ok(Rule::CartConditionTypeExists {
                kind: require_str(spec, "type")?.parse()?,
            }),
            "item-quantity-at-most" => Ok(Rule::ItemQuantityAtMost {
                max: require_u64(spec, "max")?,
            }),
            _ => Err(InvalidCartCondition::UnknownRuleKey {
                key: spec.key.clone(),
            }),
        }
    }

    /// Resolve every spec, failing fast on the first bad one.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`RulesFactory::build`].
    pub fn build_all(&self, specs: &[RuleSpec]) -> Result<Vec<Rule>, InvalidCartCondition> {
        specs.iter().map(|spec| self.build(spec)).collect()
    }
}

fn require_value<'a>(spec: &'a RuleSpec, key: &str) -> Result<&'a Value, InvalidCartCondition> {
    spec.context
        .get(key)
        .ok_or_else(|| InvalidCartCondition::RuleContext {
            key: spec.key.clone(),
            detail: format!("missing {key:?}"),
        })
}

fn require_str<'a>(spec: &'a RuleSpec, key: &str) -> Result<&'a str, InvalidCartCondition> {
    require_value(spec, key)?
        .as_str()
        .ok_or_else(|| InvalidCartCondition::RuleContext {
            key: spec.key.clone(),
            detail: format!("{key:?} must be a string"),
        })
}

fn require_u64(spec: &RuleSpec, key: &str) -> Result<u64, InvalidCartCondition> {
    require_value(spec, key)?
        .as_u64()
        .ok_or_else(|| InvalidCartCondition::RuleContext {
            key: spec.key.clone(),
            detail: format!("{key:?} must be a non-negative integer"),
        })
}

fn require_time(spec: &RuleSpec, key: &str) -> Result<civil::Time, InvalidCartCondition> {
    let raw = require_str(spec, key)?;

    raw.parse()
        .map_err(|_| InvalidCartCondition::RuleContext {
            key: spec.key.clone(),
            detail: format!("{key:?} must be a time of day, got {raw:?}"),
        })
}

fn require_days(spec: &RuleSpec) -> Result<SmallVec<[civil::Weekday; 7]>, InvalidCartCondition> {
    let raw = require_value(spec, "days")?
        .as_array()
        .ok_or_else(|| InvalidCartCondition::RuleContext {
            key: spec.key.clone(),
            detail: "\"days\" must be an array of weekday names".to_string(),
        })?;

    raw.iter()
        .map(|day| {
            day.as_str()
                .and_then(parse_weekday)
                .ok_or_else(|| InvalidCartCondition::RuleContext {
                    key: spec.key.clone(),
                    detail: format!("unrecognised weekday {day}"),
                })
        })
        .collect()
}

/// Parse a weekday from its full name or 3-letter abbreviation,
/// case-insensitively.
#[must_use]
pub fn parse_weekday(label: &str) -> Option<civil::Weekday> {
    match label.to_ascii_lowercase().as_str() {
        "monday" | "mon" => Some(civil::Weekday::Monday),
        "tuesday" | "tue" => Some(civil::Weekday::Tuesday),
        "wednesday" | "wed" => Some(civil::Weekday::Wednesday),
        "thursday" | "thu" => Some(civil::Weekday::Thursday),
        "friday" | "fri" => Some(civil::Weekday::Friday),
        "saturday" | "sat" => Some(civil::Weekday::Saturday),
        "sunday" | "sun" => Some(civil::Weekday::Sunday),
        _ => None,
    }
}

/// A stateless rule evaluation pass pinned to a civil datetime.
#[derive(Debug, Clone, Copy)]
pub struct Evaluator {
    now: civil::DateTime,
}

impl Evaluator {
    /// An evaluator pinned to the current local datetime.
    #[must_use]
    pub fn now() -> Self {
        Self {
            now: Zoned::now().datetime(),
        }
    }

    /// An evaluator pinned to an explicit datetime.
    #[must_use]
    pub const fn at(now: civil::DateTime) -> Self {
        Self { now }
    }

    /// Evaluate one rule against cart state.
    #[must_use]
    pub fn evaluate(&self, rule: &Rule, cart: &Cart, item: Option<&CartItem>) -> bool {
        match rule {
            Rule::MinItems { min } => cart.count() >= *min,
            Rule::MetadataEquals { key, expected } => cart.metadata(key) == Some(expected),
            Rule::TimeWindow { start, end } => {
                let time = self.now.time();

                if start <= end {
                    *start <= time && time <= *end
                } else {
                    // Overnight window wrapping past midnight.
                    time >= *start || time <= *end
                }
            }
            Rule::DayOfWeek { days } => days.contains(&self.now.weekday()),
            Rule::CustomerTag { tag } => cart
                .metadata(CUSTOMER_TAGS_KEY)
                .and_then(Value::as_array)
                .is_some_and(|tags| tags.iter().any(|entry| entry.as_str() == Some(tag))),
            Rule::ItemAttributeEquals { key, expected } => match item {
                Some(item) => item.attributes().get(key) == Some(expected),
                None => cart
                    .items()
                    .iter()
                    .any(|item| item.attributes().get(key) == Some(expected)),
            },
            Rule::CartConditionTypeExists { kind } => cart
                .conditions()
                .iter()
                .any(|condition| condition.kind() == *kind),
            Rule::ItemQuantityAtMost { max } => match item {
                Some(item) => u64::from(item.quantity()) <= *max,
                None => cart
                    .items()
                    .iter()
                    .all(|item| u64::from(item.quantity()) <= *max),
            },
            Rule::Custom(predicate) => predicate.evaluate(cart, item, self.now),
        }
    }

    /// Evaluate a conjunction of rules; empty input matches everything.
    #[must_use]
    pub fn evaluate_all(&self, rules: &[Rule], cart: &Cart, item: Option<&CartItem>) -> bool {
        rules.iter().all(|rule| self.evaluate(rule, cart, item))
    }
}
