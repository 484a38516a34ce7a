//! Cart
//!
//! The aggregate root: owns an item collection and a cart-level condition
//! collection, computes totals through a deterministic condition pipeline,
//! persists through a [`Storage`] driver after every mutation and dispatches
//! events for listeners.
//!
//! Totals are recomputed on demand; nothing derived is cached.

use std::{fmt, sync::Arc};

use jiff::Timestamp;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

use crate::{
    conditions::{self, CartCondition, ConditionType, ConditionValue, InvalidCartCondition, Target},
    events::{CartEvent, EventDispatcher, EventSink},
    formatting,
    identity::Identity,
    items::{CartItem, InvalidCartItem, ItemUpdate, NewItem},
    money::{Money, MoneyError},
    rules::{Evaluator, RulesFactory},
    storage::{Metadata, Storage, StorageError},
};

/// The instance partition used when none is named.
pub const DEFAULT_INSTANCE: &str = "default";

/// Anything a cart operation can fail with.
#[derive(Debug, Error)]
pub enum CartError {
    /// Item validation failed.
    #[error(transparent)]
    Item(#[from] InvalidCartItem),

    /// Condition validation failed.
    #[error(transparent)]
    Condition(#[from] InvalidCartCondition),

    /// Monetary arithmetic failed.
    #[error(transparent)]
    Money(#[from] MoneyError),

    /// The storage driver failed (including version conflicts).
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A shopping cart bound to one (identifier, instance) pair.
pub struct Cart {
    identity: Identity,
    instance: String,
    storage: Arc<dyn Storage>,
    dispatcher: EventDispatcher,
    factory: RulesFactory,
    items: Vec<CartItem>,
    conditions: Vec<CartCondition>,
    metadata: Metadata,
    dynamic: Vec<CartCondition>,
    version: u64,
}

impl fmt::Debug for Cart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cart")
            .field("identity", &self.identity)
            .field("instance", &self.instance)
            .field("items", &self.items.len())
            .field("conditions", &self.conditions.len())
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl Cart {
    /// Open (or implicitly create) the default-instance cart for an
    /// identity.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from loading persisted state.
    pub fn new(identity: Identity, storage: Arc<dyn Storage>) -> Result<Self, CartError> {
        Self::with_instance(identity, DEFAULT_INSTANCE, storage)
    }

    /// Open (or implicitly create) a named-instance cart for an identity.
    ///
    /// The instance name partitions carts under the identifier; it never
    /// influences the identifier itself.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from loading persisted state.
    pub fn with_instance(
        identity: Identity,
        instance: impl Into<String>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, CartError> {
        let instance = instance.into();

        let items = storage.get_items(identity.identifier(), &instance)?;
        let conditions = storage.get_conditions(identity.identifier(), &instance)?;
        let metadata = storage.get_metadata(identity.identifier(), &instance)?;
        let version = storage.version(identity.identifier(), &instance)?;

        Ok(Self {
            identity,
            instance,
            storage,
            dispatcher: EventDispatcher::new(),
            factory: RulesFactory::new(),
            items,
            conditions,
            metadata,
            dynamic: Vec::new(),
            version,
        })
    }

    /// A cart bound to the same identity and storage but a different
    /// instance partition. Sinks, switches and the rules factory carry
    /// over; `self` is left untouched.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from loading the other partition.
    pub fn set_instance(&self, instance: impl Into<String>) -> Result<Self, CartError> {
        let mut cart =
            Self::with_instance(self.identity.clone(), instance, Arc::clone(&self.storage))?;

        cart.dispatcher = self.dispatcher.clone();
        cart.factory = self.factory.clone();

        Ok(cart)
    }

    /// Re-read persisted state, discarding unseen local changes. This is
    /// the refresh half of conflict recovery after a
    /// [`CartConflict`](crate::storage::CartConflict).
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the re-read.
    pub fn reload(&mut self) -> Result<(), CartError> {
        self.items = self
            .storage
            .get_items(self.identity.identifier(), &self.instance)?;
        self.conditions = self
            .storage
            .get_conditions(self.identity.identifier(), &self.instance)?;
        self.metadata = self
            .storage
            .get_metadata(self.identity.identifier(), &self.instance)?;
        self.version = self
            .storage
            .version(self.identity.identifier(), &self.instance)?;

        Ok(())
    }

    /// Subscribe an event sink.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.dispatcher.subscribe(sink);
    }

    /// Enable or suppress event dispatch for this cart.
    pub fn set_events_enabled(&mut self, enabled: bool) {
        self.dispatcher.set_enabled(enabled);
    }

    /// Replace the rules factory used to validate and evaluate dynamic
    /// conditions.
    pub fn set_rules_factory(&mut self, factory: RulesFactory) {
        self.factory = factory;
    }

    /// The owning identity.
    #[must_use]
    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The storage identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.identity.identifier()
    }

    /// The instance partition name.
    #[must_use]
    pub fn instance(&self) -> &str {
        &self.instance
    }

    /// The version token of the last read or write (0 on unversioned
    /// drivers).
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// The items, in insertion order.
    #[must_use]
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// The cart-level conditions, in insertion order.
    #[must_use]
    pub fn conditions(&self) -> &[CartCondition] {
        &self.conditions
    }

    /// Look up an item by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CartItem> {
        self.items.iter().find(|item| item.id() == id)
    }

    /// Look up a cart-level condition by name.
    #[must_use]
    pub fn get_condition(&self, name: &str) -> Option<&CartCondition> {
        self.conditions
            .iter()
            .find(|condition| condition.name() == name)
    }

    /// Whether the cart holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The sum of item quantities.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.items
            .iter()
            .map(|item| u64::from(item.quantity()))
            .sum()
    }

    /// The number of distinct item ids.
    #[must_use]
    pub fn count_items(&self) -> usize {
        self.items.len()
    }

    /// A metadata value by key.
    #[must_use]
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// The full metadata map.
    #[must_use]
    pub const fn metadata_map(&self) -> &Metadata {
        &self.metadata
    }

    // ------------------------------------------------------------------
    // Item operations
    // ------------------------------------------------------------------

    /// Add an item. Re-adding an existing id merges the quantity (sums)
    /// and replaces the attributes with the newly supplied ones.
    ///
    /// Dispatches [`CartEvent::ItemAdded`], preceded by
    /// [`CartEvent::CartCreated`] when this is the cart's first item.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCartItem`] for malformed input and propagates
    /// storage failures; state is untouched on failure.
    pub fn add(&mut self, new_item: NewItem) -> Result<CartItem, CartError> {
        let was_empty = self.items.is_empty();
        let id = new_item.id.clone();

        let mut items = self.items.clone();

        let item = match items.iter_mut().find(|item| item.id() == id) {
            Some(existing) => {
                existing.absorb(new_item)?;
                existing.clone()
            }
            None => {
                let created = CartItem::try_from(new_item)?;
                items.push(created.clone());
                created
            }
        };

        self.persist_items(items)?;

        debug!(
            identifier = self.identifier(),
            instance = %self.instance,
            item = %id,
            quantity = item.quantity(),
            "item added"
        );

        if was_empty {
            self.dispatch(CartEvent::CartCreated {
                identifier: self.identifier().to_string(),
                instance: self.instance.clone(),
                timestamp: Timestamp::now(),
            });
        }

        self.dispatch(CartEvent::ItemAdded {
            item: item.clone(),
            timestamp: Timestamp::now(),
        });

        Ok(item)
    }

    /// Partially update an item. Returns `None` when the id is absent.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCartItem`] for malformed changes and propagates
    /// storage failures; state is untouched on failure.
    pub fn update(&mut self, id: &str, update: ItemUpdate) -> Result<Option<CartItem>, CartError> {
        let mut items = self.items.clone();

        let Some(item) = items.iter_mut().find(|item| item.id() == id) else {
            return Ok(None);
        };

        item.apply_update(update)?;
        let updated = item.clone();

        self.persist_items(items)?;

        Ok(Some(updated))
    }

    /// Remove and return an item. Returns `None` when the id is absent.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; state is untouched on failure.
    pub fn remove(&mut self, id: &str) -> Result<Option<CartItem>, CartError> {
        let Some(position) = self.items.iter().position(|item| item.id() == id) else {
            return Ok(None);
        };

        let mut items = self.items.clone();
        let removed = items.remove(position);

        self.persist_items(items)?;

        debug!(
            identifier = self.identifier(),
            instance = %self.instance,
            item = id,
            "item removed"
        );

        Ok(Some(removed))
    }

    // ------------------------------------------------------------------
    // Cart-level conditions
    // ------------------------------------------------------------------

    /// Attach a cart-level condition, replacing any existing condition of
    /// the same name. Dispatches [`CartEvent::CartConditionAdded`].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCartCondition`] when the condition targets an item
    /// price or references an unknown rule key, and propagates storage
    /// failures.
    pub fn condition(&mut self, condition: CartCondition) -> Result<&mut Self, CartError> {
        Self::check_cart_target(&condition)?;
        self.factory.build_all(condition.rules())?;

        let before = compute_subtotal(&self.items, &self.conditions)?;

        let mut conditions = self.conditions.clone();
        conditions.retain(|existing| existing.name() != condition.name());
        conditions.push(condition.clone());

        self.persist_conditions(conditions)?;

        let impact = self.subtotal_delta(before)?;

        self.dispatch(CartEvent::CartConditionAdded {
            condition,
            impact,
            timestamp: Timestamp::now(),
        });

        Ok(self)
    }

    /// Attach several cart-level conditions.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::condition`]; conditions before the
    /// failing one stay attached.
    pub fn conditions_add(
        &mut self,
        conditions: impl IntoIterator<Item = CartCondition>,
    ) -> Result<&mut Self, CartError> {
        for condition in conditions {
            self.condition(condition)?;
        }

        Ok(self)
    }

    /// Attach a discount; the value is normalized to a leading `-`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::condition`] plus value parsing.
    pub fn add_discount(&mut self, name: &str, value: &str) -> Result<&mut Self, CartError> {
        let value = parse_value(value)?.as_discount();

        self.condition(CartCondition::new(
            name,
            ConditionType::Discount,
            Target::Subtotal,
            value,
        )?)
    }

    /// Attach a tax charge; the value is normalized to a leading `+`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::condition`] plus value parsing.
    pub fn add_tax(&mut self, name: &str, value: &str) -> Result<&mut Self, CartError> {
        let value = parse_value(value)?.as_charge();

        self.condition(CartCondition::new(
            name,
            ConditionType::Tax,
            Target::Total,
            value,
        )?)
    }

    /// Attach a fee; the value is normalized to a leading `+`.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::condition`] plus value parsing.
    pub fn add_fee(&mut self, name: &str, value: &str) -> Result<&mut Self, CartError> {
        let value = parse_value(value)?.as_charge();

        self.condition(CartCondition::new(
            name,
            ConditionType::Fee,
            Target::Total,
            value,
        )?)
    }

    /// Attach a shipping charge, dropping any pre-existing shipping
    /// condition first: a cart carries at most one. The method and
    /// description land in the condition's attributes.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::condition`] plus value parsing.
    pub fn add_shipping(
        &mut self,
        name: &str,
        value: &str,
        method: &str,
        description: Option<&str>,
    ) -> Result<&mut Self, CartError> {
        let value = parse_value(value)?.as_charge();

        let condition = CartCondition::new(name, ConditionType::Shipping, Target::Total, value)?
            .with_attribute("method", json!(method))
            .with_attribute("description", json!(description.unwrap_or(name)));

        let before = compute_subtotal(&self.items, &self.conditions)?;

        let mut conditions = self.conditions.clone();
        conditions.retain(|existing| existing.kind() != ConditionType::Shipping);
        conditions.retain(|existing| existing.name() != condition.name());
        conditions.push(condition.clone());

        self.persist_conditions(conditions)?;

        let impact = self.subtotal_delta(before)?;

        self.dispatch(CartEvent::CartConditionAdded {
            condition,
            impact,
            timestamp: Timestamp::now(),
        });

        Ok(self)
    }

    /// Remove a cart-level condition by name; false when absent.
    /// Dispatches [`CartEvent::CartConditionRemoved`].
    ///
    /// # Errors
    ///
    /// Propagates storage failures; state is untouched on failure.
    pub fn remove_condition(&mut self, name: &str) -> Result<bool, CartError> {
        let Some(removed) = self.get_condition(name).cloned() else {
            return Ok(false);
        };

        let before = compute_subtotal(&self.items, &self.conditions)?;
        let savings_before = compute_savings(&self.items, &self.conditions)?;

        let mut conditions = self.conditions.clone();
        conditions.retain(|condition| condition.name() != name);

        self.persist_conditions(conditions)?;

        let impact = self.subtotal_delta(before)?;
        let lost_savings = if removed.kind() == ConditionType::Discount {
            self.savings_delta(savings_before)?
        } else {
            None
        };

        self.dispatch(CartEvent::CartConditionRemoved {
            condition: removed,
            impact,
            lost_savings,
            timestamp: Timestamp::now(),
        });

        Ok(true)
    }

    /// Drop every cart-level condition.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; state is untouched on failure.
    pub fn clear_conditions(&mut self) -> Result<bool, CartError> {
        self.persist_conditions(Vec::new())?;

        Ok(true)
    }

    /// Drop every cart-level condition of one kind, returning how many
    /// were removed.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; state is untouched on failure.
    pub fn remove_conditions_by_type(&mut self, kind: ConditionType) -> Result<usize, CartError> {
        let mut conditions = self.conditions.clone();
        let before = conditions.len();
        conditions.retain(|condition| condition.kind() != kind);
        let removed = before - conditions.len();

        if removed > 0 {
            self.persist_conditions(conditions)?;
        }

        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Item-level conditions
    // ------------------------------------------------------------------

    /// Attach a condition to one item, replacing by name; false when the
    /// item is absent. Dispatches [`CartEvent::ItemConditionAdded`].
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCartCondition`] when the condition does not target
    /// the item price or references an unknown rule key, and propagates
    /// storage failures.
    pub fn add_item_condition(
        &mut self,
        item_id: &str,
        condition: CartCondition,
    ) -> Result<bool, CartError> {
        CartItem::check_item_target(&condition)?;
        self.factory.build_all(condition.rules())?;

        if self.get(item_id).is_none() {
            return Ok(false);
        }

        let before = compute_subtotal(&self.items, &self.conditions)?;

        let mut items = self.items.clone();

        if let Some(item) = items.iter_mut().find(|item| item.id() == item_id) {
            item.attach_condition(condition.clone());
        }

        self.persist_items(items)?;

        let impact = self.subtotal_delta(before)?;

        self.dispatch(CartEvent::ItemConditionAdded {
            item_id: item_id.to_string(),
            condition,
            impact,
            timestamp: Timestamp::now(),
        });

        Ok(true)
    }

    /// Remove one item-level condition by name; false when the item or
    /// condition is absent. Dispatches [`CartEvent::ItemConditionRemoved`].
    ///
    /// # Errors
    ///
    /// Propagates storage failures; state is untouched on failure.
    pub fn remove_item_condition(&mut self, item_id: &str, name: &str) -> Result<bool, CartError> {
        let Some(removed) = self.get(item_id).and_then(|item| {
            item.conditions()
                .iter()
                .find(|condition| condition.name() == name)
                .cloned()
        }) else {
            return Ok(false);
        };

        let before = compute_subtotal(&self.items, &self.conditions)?;
        let savings_before = compute_savings(&self.items, &self.conditions)?;

        let mut items = self.items.clone();

        if let Some(item) = items.iter_mut().find(|item| item.id() == item_id) {
            item.remove_condition(name);
        }

        self.persist_items(items)?;

        let impact = self.subtotal_delta(before)?;
        let lost_savings = if removed.kind() == ConditionType::Discount {
            self.savings_delta(savings_before)?
        } else {
            None
        };

        self.dispatch(CartEvent::ItemConditionRemoved {
            item_id: item_id.to_string(),
            condition: removed,
            impact,
            lost_savings,
            timestamp: Timestamp::now(),
        });

        Ok(true)
    }

    /// Drop every condition on one item; false when the item is absent or
    /// carried none.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; state is untouched on failure.
    pub fn clear_item_conditions(&mut self, item_id: &str) -> Result<bool, CartError> {
        if self.get(item_id).is_none() {
            return Ok(false);
        }

        let mut items = self.items.clone();
        let mut cleared = false;

        if let Some(item) = items.iter_mut().find(|item| item.id() == item_id) {
            cleared = item.clear_conditions();
        }

        if cleared {
            self.persist_items(items)?;
        }

        Ok(cleared)
    }

    // ------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------

    /// Set a metadata key. Dispatches [`CartEvent::MetadataAdded`].
    ///
    /// # Errors
    ///
    /// Propagates storage failures; state is untouched on failure.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) -> Result<(), CartError> {
        let key = key.into();

        let mut metadata = self.metadata.clone();
        metadata.insert(key.clone(), value.clone());

        self.persist_metadata(metadata)?;

        self.dispatch(CartEvent::MetadataAdded {
            key,
            value,
            timestamp: Timestamp::now(),
        });

        Ok(())
    }

    /// Remove a metadata key; false when absent. Dispatches
    /// [`CartEvent::MetadataRemoved`].
    ///
    /// # Errors
    ///
    /// Propagates storage failures; state is untouched on failure.
    pub fn remove_metadata(&mut self, key: &str) -> Result<bool, CartError> {
        if !self.metadata.contains_key(key) {
            return Ok(false);
        }

        let mut metadata = self.metadata.clone();
        metadata.remove(key);

        self.persist_metadata(metadata)?;

        self.dispatch(CartEvent::MetadataRemoved {
            key: key.to_string(),
            timestamp: Timestamp::now(),
        });

        Ok(true)
    }

    // ------------------------------------------------------------------
    // Dynamic conditions
    // ------------------------------------------------------------------

    /// Remember a rule-gated condition for [`Cart::refresh_dynamic`].
    /// Unknown rule keys are rejected here, before anything is evaluated.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidCartCondition`] for a bad target or rule spec.
    pub fn register_dynamic(&mut self, condition: CartCondition) -> Result<(), CartError> {
        Self::check_cart_target(&condition)?;
        self.factory.build_all(condition.rules())?;

        self.dynamic
            .retain(|existing| existing.name() != condition.name());
        self.dynamic.push(condition);

        Ok(())
    }

    /// The registered dynamic conditions.
    #[must_use]
    pub fn dynamic_conditions(&self) -> &[CartCondition] {
        &self.dynamic
    }

    /// Re-evaluate every registered dynamic condition: attach those whose
    /// rules hold, remove those whose rules no longer do.
    ///
    /// # Errors
    ///
    /// Propagates condition and storage failures from the attach/remove
    /// calls.
    pub fn refresh_dynamic(&mut self, evaluator: &Evaluator) -> Result<(), CartError> {
        let dynamic = self.dynamic.clone();

        for condition in dynamic {
            let rules = self.factory.build_all(condition.rules())?;
            let applies = evaluator.evaluate_all(&rules, self, None);
            let attached = self.get_condition(condition.name()).is_some();

            if applies && !attached {
                let name = condition.name().to_string();
                self.condition(condition)?;

                debug!(condition = %name, "dynamic condition attached");
            } else if !applies && attached {
                let name = condition.name().to_string();
                self.remove_condition(&name)?;

                debug!(condition = %name, "dynamic condition removed");
            }
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Totals
    // ------------------------------------------------------------------

    /// Σ price × quantity with no conditions at all.
    ///
    /// # Errors
    ///
    /// Returns [`MoneyError::NoItems`] on an empty cart and propagates
    /// monetary arithmetic failures.
    pub fn subtotal_without_conditions(&self) -> Result<Money, CartError> {
        require_amount(sum_raw(&self.items)?)
    }

    /// The item-conditioned sum with no cart-level conditions applied.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::subtotal_without_conditions`].
    pub fn total_without_conditions(&self) -> Result<Money, CartError> {
        require_amount(sum_conditioned(&self.items)?)
    }

    /// The item-conditioned sum with subtotal-target cart conditions
    /// applied in deterministic order.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::subtotal_without_conditions`].
    pub fn subtotal(&self) -> Result<Money, CartError> {
        require_amount(compute_subtotal(&self.items, &self.conditions)?)
    }

    /// The item-conditioned sum with every cart-level condition applied —
    /// subtotal and total targets interleaved purely by `order`, ties by
    /// insertion order.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::subtotal_without_conditions`].
    pub fn total(&self) -> Result<Money, CartError> {
        require_amount(compute_total(&self.items, &self.conditions)?)
    }

    /// How much the conditions saved: max(0, unconditioned subtotal −
    /// total).
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::subtotal_without_conditions`].
    pub fn savings(&self) -> Result<Money, CartError> {
        require_amount(compute_savings(&self.items, &self.conditions)?)
    }

    /// [`Cart::subtotal`] rendered through the display policy.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::subtotal`].
    pub fn display_subtotal(&self) -> Result<String, CartError> {
        Ok(formatting::display(&self.subtotal()?))
    }

    /// [`Cart::total`] rendered through the display policy.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::total`].
    pub fn display_total(&self) -> Result<String, CartError> {
        Ok(formatting::display(&self.total()?))
    }

    /// [`Cart::savings`] rendered through the display policy.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Cart::savings`].
    pub fn display_savings(&self) -> Result<String, CartError> {
        Ok(formatting::display(&self.savings()?))
    }

    // ------------------------------------------------------------------
    // Bulk operations
    // ------------------------------------------------------------------

    /// Copy every item from another instance under the same identifier
    /// into this cart, then clear the source instance. Returns how many
    /// items were copied.
    ///
    /// # Errors
    ///
    /// Propagates item validation and storage failures.
    pub fn merge(&mut self, source_instance: &str) -> Result<usize, CartError> {
        let source_items = self
            .storage
            .get_items(self.identity.identifier(), source_instance)?;
        let copied = source_items.len();

        for item in source_items {
            self.add(NewItem::from(item))?;
        }

        self.storage
            .forget(self.identity.identifier(), source_instance)?;

        debug!(
            identifier = self.identifier(),
            from = source_instance,
            to = %self.instance,
            copied,
            "merged cart instance"
        );

        Ok(copied)
    }

    /// Empty the cart's items and conditions (metadata survives). Always
    /// dispatches [`CartEvent::CartCleared`], even when already empty.
    ///
    /// # Errors
    ///
    /// Propagates storage failures; state is untouched on failure.
    pub fn clear(&mut self) -> Result<bool, CartError> {
        self.version = self.storage.put_both(
            self.identity.identifier(),
            &self.instance,
            &[],
            &[],
            self.version,
        )?;

        self.items.clear();
        self.conditions.clear();

        debug!(
            identifier = self.identifier(),
            instance = %self.instance,
            "cart cleared"
        );

        self.dispatch(CartEvent::CartCleared {
            identifier: self.identifier().to_string(),
            instance: self.instance.clone(),
            timestamp: Timestamp::now(),
        });

        Ok(true)
    }

    /// The cart rendered in its serialized array form.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        json!({
            "identifier": self.identifier(),
            "instance": &self.instance,
            "items": serde_json::to_value(&self.items).unwrap_or(Value::Null),
            "conditions": serde_json::to_value(&self.conditions).unwrap_or(Value::Null),
        })
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn check_cart_target(condition: &CartCondition) -> Result<(), InvalidCartCondition> {
        match condition.target() {
            Target::Subtotal | Target::Total => Ok(()),
            Target::Price => Err(InvalidCartCondition::CartTarget {
                name: condition.name().to_string(),
                target: Target::Price,
            }),
        }
    }

    fn persist_items(&mut self, items: Vec<CartItem>) -> Result<(), CartError> {
        self.version = self.storage.put_items(
            self.identity.identifier(),
            &self.instance,
            &items,
            self.version,
        )?;
        self.items = items;

        Ok(())
    }

    fn persist_conditions(&mut self, conditions: Vec<CartCondition>) -> Result<(), CartError> {
        self.version = self.storage.put_conditions(
            self.identity.identifier(),
            &self.instance,
            &conditions,
            self.version,
        )?;
        self.conditions = conditions;

        Ok(())
    }

    fn persist_metadata(&mut self, metadata: Metadata) -> Result<(), CartError> {
        self.version = self.storage.put_metadata(
            self.identity.identifier(),
            &self.instance,
            &metadata,
            self.version,
        )?;
        self.metadata = metadata;

        Ok(())
    }

    fn subtotal_delta(&self, before: Option<Money>) -> Result<Option<Money>, CartError> {
        let after = compute_subtotal(&self.items, &self.conditions)?;

        match (before, after) {
            (Some(before), Some(after)) => Ok(Some(after.subtract(&before)?)),
            _ => Ok(None),
        }
    }

    fn savings_delta(&self, before: Option<Money>) -> Result<Option<Money>, CartError> {
        let after = compute_savings(&self.items, &self.conditions)?;

        match (before, after) {
            (Some(before), Some(after)) => {
                let lost = before.subtract(&after)?;

                Ok(Some(if lost.is_zero_or_negative() {
                    Money::from_minor_precise(0, before.currency(), before.precision())
                } else {
                    lost
                }))
            }
            _ => Ok(None),
        }
    }

    fn dispatch(&self, event: CartEvent) {
        self.dispatcher.dispatch(&event);
    }
}

fn parse_value(raw: &str) -> Result<ConditionValue, InvalidCartCondition> {
    Ok(raw.parse::<ConditionValue>()?)
}

fn require_amount(amount: Option<Money>) -> Result<Money, CartError> {
    amount.ok_or(CartError::Money(MoneyError::NoItems))
}

fn sum_raw(items: &[CartItem]) -> Result<Option<Money>, CartError> {
    let mut total: Option<Money> = None;

    for item in items {
        let line = item.price_total()?;

        total = Some(match total {
            Some(sum) => sum.add(&line)?,
            None => line,
        });
    }

    Ok(total)
}

fn sum_conditioned(items: &[CartItem]) -> Result<Option<Money>, CartError> {
    let mut total: Option<Money> = None;

    for item in items {
        let line = item.conditioned_total()?;

        total = Some(match total {
            Some(sum) => sum.add(&line)?,
            None => line,
        });
    }

    Ok(total)
}

fn apply_cart_conditions(
    base: Money,
    cart_conditions: &[CartCondition],
    keep: impl Fn(&CartCondition) -> bool,
) -> Result<Money, CartError> {
    let mut running = base;

    for condition in conditions::ordered(cart_conditions) {
        if keep(condition) {
            running = condition.apply(&running)?;
        }
    }

    Ok(running)
}

fn compute_subtotal(
    items: &[CartItem],
    cart_conditions: &[CartCondition],
) -> Result<Option<Money>, CartError> {
    let Some(base) = sum_conditioned(items)? else {
        return Ok(None);
    };

    Ok(Some(apply_cart_conditions(base, cart_conditions, |c| {
        c.target() == Target::Subtotal
    })?))
}

fn compute_total(
    items: &[CartItem],
    cart_conditions: &[CartCondition],
) -> Result<Option<Money>, CartError> {
    let Some(base) = sum_conditioned(items)? else {
        return Ok(None);
    };

    Ok(Some(apply_cart_conditions(base, cart_conditions, |c| {
        c.target() != Target::Price
    })?))
}

fn compute_savings(
    items: &[CartItem],
    cart_conditions: &[CartCondition],
) -> Result<Option<Money>, CartError> {
    let Some(raw) = sum_raw(items)? else {
        return Ok(None);
    };
    let Some(total) = compute_total(items, cart_conditions)? else {
        return Ok(None);
    };

    let saved = raw.subtract(&total)?;

    if saved.is_zero_or_negative() {
        // Clamp at zero: surcharges never count as negative savings.
        Ok(Some(Money::from_minor_precise(
            0,
            raw.currency(),
            raw.precision(),
        )))
    } else {
        Ok(Some(saved))
    }
}
