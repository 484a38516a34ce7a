//! Cart Items
//!
//! A validated line item: identity, unit price, quantity, free-form
//! attributes and its own condition set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    conditions::{self, CartCondition, InvalidCartCondition, Target},
    money::{Money, MoneyError},
    storage::Metadata,
};

/// Errors raised by item validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidCartItem {
    /// The item id was empty.
    #[error("item id must not be empty")]
    EmptyId,

    /// The item name was empty.
    #[error("item name must not be empty")]
    EmptyName,

    /// The unit price was zero or negative.
    #[error("item {id:?} has a non-positive price")]
    NonPositivePrice {
        /// The offending item id.
        id: String,
    },

    /// The quantity was zero, or an update drove it below one.
    #[error("item {id:?} quantity must stay at least 1")]
    Quantity {
        /// The offending item id.
        id: String,
    },
}

/// Input for adding an item to a cart.
///
/// `attributes` distinguishes "not supplied" from "supplied empty": a
/// supplied map replaces the stored attributes wholesale when the id already
/// exists in the cart.
#[derive(Debug, Clone)]
pub struct NewItem {
    /// Unique id within the cart.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Unit price.
    pub price: Money,

    /// Quantity, at least 1.
    pub quantity: u32,

    /// Free-form attributes, if supplied.
    pub attributes: Option<Metadata>,

    /// Item-level conditions to attach.
    pub conditions: Vec<CartCondition>,

    /// Opaque associated payload carried through serialization untouched.
    pub associated: Option<serde_json::Value>,
}

impl NewItem {
    /// Start building a new item.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, price: Money, quantity: u32) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            price,
            quantity,
            attributes: None,
            conditions: Vec::new(),
            associated: None,
        }
    }

    /// Supply the full attribute map.
    #[must_use]
    pub fn attributes(mut self, attributes: Metadata) -> Self {
        self.attributes = Some(attributes);
        self
    }

    /// Supply a single attribute.
    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attributes
            .get_or_insert_with(Metadata::default)
            .insert(key.into(), value);
        self
    }

    /// Attach an item-level condition.
    #[must_use]
    pub fn condition(mut self, condition: CartCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Attach an opaque associated payload.
    #[must_use]
    pub fn associated(mut self, associated: serde_json::Value) -> Self {
        self.associated = Some(associated);
        self
    }
}

impl From<CartItem> for NewItem {
    fn from(item: CartItem) -> Self {
        Self {
            id: item.id,
            name: item.name,
            price: item.price,
            quantity: item.quantity,
            attributes: Some(item.attributes),
            conditions: item.conditions,
            associated: item.associated,
        }
    }
}

/// A quantity change in an [`ItemUpdate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityChange {
    /// Set the quantity outright.
    Absolute(u32),

    /// Adjust the quantity by a signed delta.
    Relative(i64),
}

/// A partial item update.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    /// New display name.
    pub name: Option<String>,

    /// Quantity change.
    pub quantity: Option<QuantityChange>,

    /// Replacement attribute map.
    pub attributes: Option<Metadata>,
}

impl ItemUpdate {
    /// An update that sets the quantity outright.
    #[must_use]
    pub const fn quantity(quantity: u32) -> Self {
        Self {
            name: None,
            quantity: Some(QuantityChange::Absolute(quantity)),
            attributes: None,
        }
    }

    /// An update that adjusts the quantity by a signed delta.
    #[must_use]
    pub const fn quantity_delta(delta: i64) -> Self {
        Self {
            name: None,
            quantity: Some(QuantityChange::Relative(delta)),
            attributes: None,
        }
    }

    /// An update that renames the item.
    #[must_use]
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            quantity: None,
            attributes: None,
        }
    }

    /// An update that replaces the attribute map.
    #[must_use]
    pub fn attributes(attributes: Metadata) -> Self {
        Self {
            name: None,
            quantity: None,
            attributes: Some(attributes),
        }
    }
}

/// A validated cart line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    id: String,

    name: String,

    price: Money,

    quantity: u32,

    #[serde(default, skip_serializing_if = "Metadata::is_empty")]
    attributes: Metadata,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    conditions: Vec<CartCondition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    associated: Option<serde_json::Value>,
}

impl TryFrom<NewItem> for CartItem {
    type Error = InvalidCartItem;

    fn try_from(new_item: NewItem) -> Result<Self, Self::Error> {
        if new_item.id.trim().is_empty() {
            return Err(InvalidCartItem::EmptyId);
        }

        if new_item.name.trim().is_empty() {
            return Err(InvalidCartItem::EmptyName);
        }

        if !new_item.price.is_positive() {
            return Err(InvalidCartItem::NonPositivePrice { id: new_item.id });
        }

        if new_item.quantity == 0 {
            return Err(InvalidCartItem::Quantity { id: new_item.id });
        }

        Ok(Self {
            id: new_item.id,
            name: new_item.name,
            price: new_item.price,
            quantity: new_item.quantity,
            attributes: new_item.attributes.unwrap_or_default(),
            conditions: new_item.conditions,
            associated: new_item.associated,
        })
    }
}

impl CartItem {
    /// The id, unique within its cart.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unit price.
    #[must_use]
    pub const fn price(&self) -> &Money {
        &self.price
    }

    /// The quantity.
    #[must_use]
    pub const fn quantity(&self) -> u32 {
        self.quantity
    }

    /// Free-form attributes.
    #[must_use]
    pub const fn attributes(&self) -> &Metadata {
        &self.attributes
    }

    /// The item-level conditions, in insertion order.
    #[must_use]
    pub fn conditions(&self) -> &[CartCondition] {
        &self.conditions
    }

    /// The opaque associated payload, if any.
    #[must_use]
    pub const fn associated(&self) -> Option<&serde_json::Value> {
        self.associated.as_ref()
    }

    /// Price × quantity before any conditions.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::AmountOverflow`] if the line total cannot be
    /// represented.
    pub fn price_total(&self) -> Result<Money, MoneyError> {
        self.price.multiply(self.quantity.into())
    }

    /// Price × quantity with the item's own conditions applied in
    /// deterministic order, clamped at zero.
    ///
    /// # Errors
    ///
    /// Propagates [`MoneyError`] from the condition arithmetic.
    pub fn conditioned_total(&self) -> Result<Money, MoneyError> {
        let mut running = self.price_total()?;

        for condition in conditions::ordered(&self.conditions) {
            running = condition.apply(&running)?;
        }

        if running.is_zero_or_negative() {
            running = Money::from_minor_precise(0, self.price.currency(), self.price.precision());
        }

        Ok(running)
    }

    /// Merge a re-added item: quantities sum, a supplied attribute map
    /// replaces the stored one wholesale, supplied conditions attach by
    /// name.
    pub(crate) fn absorb(&mut self, new_item: NewItem) -> Result<(), InvalidCartItem> {
        if new_item.quantity == 0 {
            return Err(InvalidCartItem::Quantity {
                id: self.id.clone(),
            });
        }

        self.quantity = self
            .quantity
            .checked_add(new_item.quantity)
            .ok_or(InvalidCartItem::Quantity {
                id: self.id.clone(),
            })?;

        if let Some(attributes) = new_item.attributes {
            self.attributes = attributes;
        }

        for condition in new_item.conditions {
            self.attach_condition(condition);
        }

        Ok(())
    }

    /// Apply a partial update.
    pub(crate) fn apply_update(&mut self, update: ItemUpdate) -> Result<(), InvalidCartItem> {
        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(InvalidCartItem::EmptyName);
            }

            self.name = name;
        }

        if let Some(change) = update.quantity {
            let resolved = match change {
                QuantityChange::Absolute(quantity) => i64::from(quantity),
                QuantityChange::Relative(delta) => i64::from(self.quantity).saturating_add(delta),
            };

            self.quantity = u32::try_from(resolved)
                .ok()
                .filter(|quantity| *quantity >= 1)
                .ok_or(InvalidCartItem::Quantity {
                    id: self.id.clone(),
                })?;
        }

        if let Some(attributes) = update.attributes {
            self.attributes = attributes;
        }

        Ok(())
    }

    /// Attach a condition, replacing any existing one of the same name.
    pub(crate) fn attach_condition(&mut self, condition: CartCondition) {
        self.conditions
            .retain(|existing| existing.name() != condition.name());
        self.conditions.push(condition);
    }

    /// Remove a condition by name; true if one was removed.
    pub(crate) fn remove_condition(&mut self, name: &str) -> bool {
        let before = self.conditions.len();
        self.conditions.retain(|condition| condition.name() != name);

        self.conditions.len() != before
    }

    /// Drop every item-level condition; true if any were attached.
    pub(crate) fn clear_conditions(&mut self) -> bool {
        let had_any = !self.conditions.is_empty();
        self.conditions.clear();

        had_any
    }

    /// Check that a condition is valid at item level.
    pub(crate) fn check_item_target(condition: &CartCondition) -> Result<(), InvalidCartCondition> {
        if condition.target() == Target::Price {
            Ok(())
        } else {
            Err(InvalidCartCondition::ItemTarget {
                name: condition.name().to_string(),
                target: condition.target(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;
    use testresult::TestResult;

    use crate::conditions::ConditionType;

    use super::*;

    fn widget(quantity: u32) -> NewItem {
        NewItem::new("p1", "Widget", Money::from_minor(10_00, "USD"), quantity)
    }

    #[test]
    fn empty_id_and_name_are_rejected() {
        let missing_id = NewItem::new("", "Widget", Money::from_minor(100, "USD"), 1);
        let missing_name = NewItem::new("p1", " ", Money::from_minor(100, "USD"), 1);

        assert!(matches!(
            CartItem::try_from(missing_id),
            Err(InvalidCartItem::EmptyId)
        ));
        assert!(matches!(
            CartItem::try_from(missing_name),
            Err(InvalidCartItem::EmptyName)
        ));
    }

    #[test]
    fn non_positive_price_is_rejected() {
        let free = NewItem::new("p1", "Widget", Money::zero("USD"), 1);

        assert!(matches!(
            CartItem::try_from(free),
            Err(InvalidCartItem::NonPositivePrice { .. })
        ));
    }

    #[test]
    fn zero_quantity_is_rejected() {
        assert!(matches!(
            CartItem::try_from(widget(0)),
            Err(InvalidCartItem::Quantity { .. })
        ));
    }

    #[test]
    fn price_total_is_exact() -> TestResult {
        let item = CartItem::try_from(widget(3))?;

        assert_eq!(item.price_total()?.minor_units(), 30_00);

        Ok(())
    }

    #[test]
    fn conditioned_total_applies_conditions_in_order() -> TestResult {
        let half = CartCondition::parsed("HALF", ConditionType::Discount, Target::Price, "-50%")?
            .with_order(1);
        let extra = CartCondition::parsed("EXTRA", ConditionType::Discount, Target::Price, "-1.00")?
            .with_order(0);

        let item = CartItem::try_from(widget(1).condition(half).condition(extra))?;

        // 10.00 - 1.00 = 9.00, then -50% = 4.50.
        assert_eq!(item.conditioned_total()?.minor_units(), 4_50);

        Ok(())
    }

    #[test]
    fn conditioned_total_clamps_at_zero() -> TestResult {
        let wipeout =
            CartCondition::parsed("WIPE", ConditionType::Discount, Target::Price, "-99.00")?;
        let item = CartItem::try_from(widget(1).condition(wipeout))?;

        assert_eq!(item.conditioned_total()?.minor_units(), 0);

        Ok(())
    }

    #[test]
    fn absorb_sums_quantity_and_replaces_attributes() -> TestResult {
        let mut item = CartItem::try_from(widget(2).attribute("size", json!("M")))?;

        item.absorb(widget(3).attribute("color", json!("red")))?;

        assert_eq!(item.quantity(), 5);
        assert_eq!(item.attributes().get("color"), Some(&json!("red")));
        assert!(
            !item.attributes().contains_key("size"),
            "attributes replace wholesale, they do not merge"
        );

        Ok(())
    }

    #[test]
    fn absorb_without_attributes_keeps_existing_ones() -> TestResult {
        let mut item = CartItem::try_from(widget(2).attribute("size", json!("M")))?;

        item.absorb(widget(1))?;

        assert_eq!(item.attributes().get("size"), Some(&json!("M")));

        Ok(())
    }

    #[test]
    fn relative_update_below_one_is_rejected() -> TestResult {
        let mut item = CartItem::try_from(widget(2))?;

        item.apply_update(ItemUpdate::quantity_delta(-1))?;
        assert_eq!(item.quantity(), 1);

        let result = item.apply_update(ItemUpdate::quantity_delta(-1));
        assert!(matches!(result, Err(InvalidCartItem::Quantity { .. })));
        assert_eq!(item.quantity(), 1);

        Ok(())
    }

    #[test]
    fn multiply_by_quantity_has_no_float_drift() -> TestResult {
        let price = Money::from_major(Decimal::new(1999, 2), "USD")?;
        let item = CartItem::try_from(NewItem::new("p2", "Gadget", price, 7))?;

        assert_eq!(item.price_total()?.minor_units(), 139_93);

        Ok(())
    }
}
