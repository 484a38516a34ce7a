//! Cart Fixtures
//!
//! YAML-driven fixture sets for conformance tests and examples, plus an
//! event-recording sink for assertions. Fixture files live under
//! `fixtures/` at the crate root.

use std::{
    path::PathBuf,
    str::FromStr,
    sync::{Arc, Mutex, PoisonError},
};

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    cart::{Cart, CartError},
    conditions::{CartCondition, ConditionType, InvalidCartCondition, Target},
    events::{CartEvent, EventSink},
    identity::Identity,
    items::{InvalidCartItem, NewItem},
    money::{Money, MoneyError},
    storage::{Metadata, SessionStore},
};

/// Errors raised while loading a fixture set.
#[derive(Debug, Error)]
pub enum FixtureError {
    /// The fixture file could not be read.
    #[error("could not read fixture set {name:?}")]
    Io {
        /// The requested set name.
        name: String,

        /// The underlying filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// The fixture file was not valid YAML.
    #[error(transparent)]
    Yaml(#[from] serde_norway::Error),

    /// A price string could not be parsed.
    #[error("malformed fixture price {0:?}")]
    Price(String),

    /// Building the cart from the fixture failed.
    #[error(transparent)]
    Cart(#[from] CartError),
}

impl From<MoneyError> for FixtureError {
    fn from(error: MoneyError) -> Self {
        Self::Cart(error.into())
    }
}

impl From<InvalidCartItem> for FixtureError {
    fn from(error: InvalidCartItem) -> Self {
        Self::Cart(error.into())
    }
}

impl From<InvalidCartCondition> for FixtureError {
    fn from(error: InvalidCartCondition) -> Self {
        Self::Cart(error.into())
    }
}

/// One item in YAML.
#[derive(Debug, Deserialize)]
pub struct ItemFixture {
    /// Item id.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Major-unit price (e.g. `"100.00"`).
    pub price: String,

    /// Quantity.
    pub quantity: u32,

    /// Free-form attributes.
    #[serde(default)]
    pub attributes: Metadata,

    /// Item-level conditions.
    #[serde(default)]
    pub conditions: Vec<ConditionFixture>,
}

/// One condition in YAML.
#[derive(Debug, Deserialize)]
pub struct ConditionFixture {
    /// Condition name.
    pub name: String,

    /// Condition kind label (e.g. `discount`).
    #[serde(rename = "type")]
    pub kind: String,

    /// Target label (e.g. `subtotal`).
    pub target: String,

    /// Value expression (e.g. `"-20%"`).
    pub value: String,

    /// Application-order tie-break.
    #[serde(default)]
    pub order: i32,
}

impl ConditionFixture {
    fn build(&self) -> Result<CartCondition, FixtureError> {
        Ok(CartCondition::parsed(
            self.name.clone(),
            ConditionType::from_str(&self.kind)?,
            Target::from_str(&self.target)?,
            &self.value,
        )?
        .with_order(self.order))
    }
}

/// A fixture set parsed from YAML.
#[derive(Debug, Deserialize)]
pub struct Fixture {
    /// Currency for every price in the set.
    pub currency: String,

    /// Items to add, in order.
    pub items: Vec<ItemFixture>,

    /// Cart-level conditions to attach, in order.
    #[serde(default)]
    pub conditions: Vec<ConditionFixture>,
}

impl Fixture {
    /// Load `fixtures/<name>.yaml` from the crate root.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError`] when the file is missing or malformed.
    pub fn from_set(name: &str) -> Result<Self, FixtureError> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("fixtures")
            .join(format!("{name}.yaml"));

        let raw = std::fs::read_to_string(&path).map_err(|source| FixtureError::Io {
            name: name.to_string(),
            source,
        })?;

        Ok(serde_norway::from_str(&raw)?)
    }

    /// Build a live, session-backed cart from the set.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError`] when a price, item or condition in the set
    /// is invalid.
    pub fn cart(&self) -> Result<Cart, FixtureError> {
        let mut cart = Cart::new(
            Identity::guest("fixture-session"),
            Arc::new(SessionStore::new()),
        )?;

        for item in &self.items {
            let price = parse_price(&item.price, &self.currency)?;
            let mut new_item =
                NewItem::new(item.id.clone(), item.name.clone(), price, item.quantity)
                    .attributes(item.attributes.clone());

            for condition in &item.conditions {
                new_item = new_item.condition(condition.build()?);
            }

            cart.add(new_item)?;
        }

        for condition in &self.conditions {
            cart.condition(condition.build()?)?;
        }

        Ok(cart)
    }
}

/// Parse a major-unit price string into [`Money`].
///
/// # Errors
///
/// Returns [`FixtureError::Price`] when the string is not a decimal.
pub fn parse_price(raw: &str, currency: &str) -> Result<Money, FixtureError> {
    let amount = Decimal::from_str(raw.trim()).map_err(|_| FixtureError::Price(raw.to_string()))?;

    Ok(Money::from_major(amount, currency)?)
}

/// An [`EventSink`] that records everything it sees.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<CartEvent>>,
}

impl RecordingSink {
    /// An empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every recorded event, in dispatch order.
    #[must_use]
    pub fn events(&self) -> Vec<CartEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The recorded event names, in dispatch order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(CartEvent::name).collect()
    }

    /// How many recorded events carry the given name.
    #[must_use]
    pub fn count(&self, name: &str) -> usize {
        self.names().iter().filter(|seen| **seen == name).count()
    }
}

impl EventSink for RecordingSink {
    fn handle(&self, event: &CartEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
