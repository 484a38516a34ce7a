//! Cart Events
//!
//! Synchronous, in-process notifications of cart mutations. Dispatch can be
//! disabled per cart or process-wide; either switch fully suppresses
//! dispatch, not merely delivery.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use jiff::Timestamp;
use serde_json::{Value, json};

use crate::{conditions::CartCondition, items::CartItem, money::Money};

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Toggle the process-wide event kill switch.
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

/// Whether events are enabled process-wide.
#[must_use]
pub fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

/// A consumer of cart events.
pub trait EventSink: Send + Sync {
    /// Handle one event. Called synchronously on the mutating thread.
    fn handle(&self, event: &CartEvent);
}

/// A cart mutation notification.
#[derive(Debug, Clone)]
pub enum CartEvent {
    /// The cart received its first item.
    CartCreated {
        /// Storage identifier.
        identifier: String,

        /// Instance partition.
        instance: String,

        /// When the event was raised.
        timestamp: Timestamp,
    },

    /// An item was added (or merged into an existing id).
    ItemAdded {
        /// The resulting item.
        item: CartItem,

        /// When the event was raised.
        timestamp: Timestamp,
    },

    /// A cart-level condition was attached.
    CartConditionAdded {
        /// The attached condition.
        condition: CartCondition,

        /// Subtotal delta caused by the attachment, when computable.
        impact: Option<Money>,

        /// When the event was raised.
        timestamp: Timestamp,
    },

    /// A cart-level condition was removed.
    CartConditionRemoved {
        /// The removed condition.
        condition: CartCondition,

        /// Subtotal delta caused by the removal, when computable.
        impact: Option<Money>,

        /// Savings given up, for discount-kind removals.
        lost_savings: Option<Money>,

        /// When the event was raised.
        timestamp: Timestamp,
    },

    /// An item-level condition was attached.
    ItemConditionAdded {
        /// The owning item id.
        item_id: String,

        /// The attached condition.
        condition: CartCondition,

        /// Subtotal delta caused by the attachment, when computable.
        impact: Option<Money>,

        /// When the event was raised.
        timestamp: Timestamp,
    },

    /// An item-level condition was removed.
    ItemConditionRemoved {
        /// The owning item id.
        item_id: String,

        /// The removed condition.
        condition: CartCondition,

        /// Subtotal delta caused by the removal, when computable.
        impact: Option<Money>,

        /// Savings given up, for discount-kind removals.
        lost_savings: Option<Money>,

        /// When the event was raised.
        timestamp: Timestamp,
    },

    /// A metadata key was set.
    MetadataAdded {
        /// The key.
        key: String,

        /// The stored value.
        value: Value,

        /// When the event was raised.
        timestamp: Timestamp,
    },

    /// A metadata key was removed.
    MetadataRemoved {
        /// The key.
        key: String,

        /// When the event was raised.
        timestamp: Timestamp,
    },

    /// The cart was emptied (raised even when it was already empty).
    CartCleared {
        /// Storage identifier.
        identifier: String,

        /// Instance partition.
        instance: String,

        /// When the event was raised.
        timestamp: Timestamp,
    },
}

impl CartEvent {
    /// The event's wire name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CartCreated { .. } => "cart_created",
            Self::ItemAdded { .. } => "item_added",
            Self::CartConditionAdded { .. } => "cart_condition_added",
            Self::CartConditionRemoved { .. } => "cart_condition_removed",
            Self::ItemConditionAdded { .. } => "item_condition_added",
            Self::ItemConditionRemoved { .. } => "item_condition_removed",
            Self::MetadataAdded { .. } => "metadata_added",
            Self::MetadataRemoved { .. } => "metadata_removed",
            Self::CartCleared { .. } => "cart_cleared",
        }
    }

    /// When the event was raised.
    #[must_use]
    pub const fn timestamp(&self) -> Timestamp {
        match self {
            Self::CartCreated { timestamp, .. }
            | Self::ItemAdded { timestamp, .. }
            | Self::CartConditionAdded { timestamp, .. }
            | Self::CartConditionRemoved { timestamp, .. }
            | Self::ItemConditionAdded { timestamp, .. }
            | Self::ItemConditionRemoved { timestamp, .. }
            | Self::MetadataAdded { timestamp, .. }
            | Self::MetadataRemoved { timestamp, .. }
            | Self::CartCleared { timestamp, .. } => *timestamp,
        }
    }

    /// The event rendered for application listeners and API propagation.
    #[must_use]
    pub fn payload(&self) -> Value {
        let base = match self {
            Self::CartCreated {
                identifier,
                instance,
                ..
            }
            | Self::CartCleared {
                identifier,
                instance,
                ..
            } => json!({
                "identifier": identifier,
                "instance": instance,
            }),
            Self::ItemAdded { item, .. } => json!({
                "item": to_value(item),
            }),
            Self::CartConditionAdded {
                condition, impact, ..
            } => json!({
                "condition": to_value(condition),
                "impact": impact.as_ref().map(to_value),
            }),
            Self::CartConditionRemoved {
                condition,
                impact,
                lost_savings,
                ..
            } => json!({
                "condition": to_value(condition),
                "impact": impact.as_ref().map(to_value),
                "lost_savings": lost_savings.as_ref().map(to_value),
            }),
            Self::ItemConditionAdded {
                item_id,
                condition,
                impact,
                ..
            } => json!({
                "item_id": item_id,
                "condition": to_value(condition),
                "impact": impact.as_ref().map(to_value),
            }),
            Self::ItemConditionRemoved {
                item_id,
                condition,
                impact,
                lost_savings,
                ..
            } => json!({
                "item_id": item_id,
                "condition": to_value(condition),
                "impact": impact.as_ref().map(to_value),
                "lost_savings": lost_savings.as_ref().map(to_value),
            }),
            Self::MetadataAdded { key, value, .. } => json!({
                "key": key,
                "value": value,
            }),
            Self::MetadataRemoved { key, .. } => json!({
                "key": key,
            }),
        };

        let mut payload = base;

        if let Value::Object(map) = &mut payload {
            map.insert("event".to_string(), json!(self.name()));
            map.insert("timestamp".to_string(), json!(self.timestamp().to_string()));
        }

        payload
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Fans events out to subscribed sinks, honouring both kill switches.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    sinks: Vec<Arc<dyn EventSink>>,
    suppressed: bool,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("sinks", &self.sinks.len())
            .field("suppressed", &self.suppressed)
            .finish()
    }
}

impl EventDispatcher {
    /// A dispatcher with no sinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a sink.
    pub fn subscribe(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Suppress or re-enable dispatch for this dispatcher only.
    pub fn set_enabled(&mut self, dispatch_enabled: bool) {
        self.suppressed = !dispatch_enabled;
    }

    /// Whether this dispatcher would currently dispatch.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.suppressed && enabled()
    }

    /// Dispatch one event to every sink, unless suppressed.
    pub fn dispatch(&self, event: &CartEvent) {
        if !self.is_enabled() {
            return;
        }

        for sink in &self.sinks {
            sink.handle(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        seen: Mutex<Vec<String>>,
    }

    impl EventSink for Counter {
        fn handle(&self, event: &CartEvent) {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(event.name().to_string());
            }
        }
    }

    fn cleared() -> CartEvent {
        CartEvent::CartCleared {
            identifier: "42".to_string(),
            instance: "default".to_string(),
            timestamp: Timestamp::UNIX_EPOCH,
        }
    }

    #[test]
    fn dispatch_reaches_every_sink() {
        let first = Arc::new(Counter::default());
        let second = Arc::new(Counter::default());

        let mut dispatcher = EventDispatcher::new();
        dispatcher.subscribe(Arc::clone(&first) as Arc<dyn EventSink>);
        dispatcher.subscribe(Arc::clone(&second) as Arc<dyn EventSink>);

        dispatcher.dispatch(&cleared());

        for sink in [first, second] {
            let seen = sink.seen.lock().map(|seen| seen.clone()).unwrap_or_default();
            assert_eq!(seen, ["cart_cleared"]);
        }
    }

    #[test]
    fn local_suppression_stops_dispatch() {
        let sink = Arc::new(Counter::default());

        let mut dispatcher = EventDispatcher::new();
        dispatcher.subscribe(Arc::clone(&sink) as Arc<dyn EventSink>);
        dispatcher.set_enabled(false);

        dispatcher.dispatch(&cleared());

        assert!(
            sink.seen.lock().map(|seen| seen.is_empty()).unwrap_or(false),
            "suppressed dispatcher must not deliver"
        );
    }

    #[test]
    fn payload_carries_event_name_and_timestamp() {
        let payload = cleared().payload();

        assert_eq!(payload["event"], "cart_cleared");
        assert_eq!(payload["identifier"], "42");
        assert!(
            payload["timestamp"].is_string(),
            "timestamp should serialize as a string"
        );
    }
}
