//! Integration tests for event dispatch and suppression

use std::sync::Arc;

use serde_json::json;
use tally::{
    cart::Cart,
    conditions::{CartCondition, ConditionType, Target},
    events,
    fixtures::RecordingSink,
    identity::Identity,
    items::NewItem,
    money::Money,
    storage::SessionStore,
};
use testresult::TestResult;

fn observed_cart() -> TestResult<(Cart, Arc<RecordingSink>)> {
    let sink = Arc::new(RecordingSink::new());
    let mut cart = Cart::new(Identity::guest("sess-1"), Arc::new(SessionStore::new()))?;
    cart.subscribe(Arc::clone(&sink) as Arc<dyn events::EventSink>);

    Ok((cart, sink))
}

fn widget(price_minor: i64) -> NewItem {
    NewItem::new("p1", "Widget", Money::from_minor(price_minor, "USD"), 1)
}

#[test]
fn first_add_raises_cart_created_then_item_added() -> TestResult {
    let (mut cart, sink) = observed_cart()?;

    cart.add(widget(10_00))?;

    assert_eq!(sink.names(), ["cart_created", "item_added"]);

    // A second add is no longer a creation.
    cart.add(NewItem::new(
        "p2",
        "Gadget",
        Money::from_minor(5_00, "USD"),
        1,
    ))?;
    assert_eq!(sink.count("cart_created"), 1);
    assert_eq!(sink.count("item_added"), 2);

    Ok(())
}

#[test]
fn clear_is_idempotent_and_always_announces() -> TestResult {
    let (mut cart, sink) = observed_cart()?;

    cart.add(widget(10_00))?;

    assert!(cart.clear()?);
    assert!(cart.clear()?, "clearing an empty cart still succeeds");
    assert_eq!(sink.count("cart_cleared"), 2);

    Ok(())
}

#[test]
fn condition_events_carry_subtotal_impact() -> TestResult {
    let (mut cart, sink) = observed_cart()?;

    cart.add(widget(100_00))?;
    cart.condition(CartCondition::parsed(
        "SAVE20",
        ConditionType::Discount,
        Target::Subtotal,
        "-20%",
    )?)?;

    let added = sink
        .events()
        .into_iter()
        .find(|event| event.name() == "cart_condition_added");

    let impact = match added {
        Some(events::CartEvent::CartConditionAdded { impact, .. }) => impact,
        _ => None,
    };

    assert_eq!(
        impact.map(|impact| impact.minor_units()),
        Some(-20_00),
        "attaching a 20% discount on 100.00 should move the subtotal by -20.00"
    );

    Ok(())
}

#[test]
fn removing_a_discount_reports_lost_savings() -> TestResult {
    let (mut cart, sink) = observed_cart()?;

    cart.add(widget(100_00))?;
    cart.add_discount("SAVE20", "20%")?;

    assert!(cart.remove_condition("SAVE20")?);

    let removed = sink
        .events()
        .into_iter()
        .find(|event| event.name() == "cart_condition_removed");

    let lost = match removed {
        Some(events::CartEvent::CartConditionRemoved { lost_savings, .. }) => lost_savings,
        _ => None,
    };

    assert_eq!(lost.map(|lost| lost.minor_units()), Some(20_00));

    Ok(())
}

#[test]
fn metadata_mutations_are_announced() -> TestResult {
    let (mut cart, sink) = observed_cart()?;

    cart.set_metadata("gift_note", json!("Happy birthday"))?;
    cart.remove_metadata("gift_note")?;

    assert_eq!(sink.names(), ["metadata_added", "metadata_removed"]);

    Ok(())
}

#[test]
fn per_cart_suppression_silences_everything() -> TestResult {
    let (mut cart, sink) = observed_cart()?;

    cart.set_events_enabled(false);
    cart.add(widget(10_00))?;
    cart.clear()?;

    assert!(sink.events().is_empty(), "suppressed cart must stay silent");

    cart.set_events_enabled(true);
    cart.add(widget(10_00))?;
    assert!(!sink.events().is_empty());

    Ok(())
}

#[test]
fn event_payloads_are_json_with_timestamps() -> TestResult {
    let (mut cart, sink) = observed_cart()?;

    cart.add(widget(10_00))?;

    for event in sink.events() {
        let payload = event.payload();

        assert_eq!(payload["event"], event.name());
        assert!(
            payload["timestamp"].is_string(),
            "{} payload should carry a timestamp",
            event.name()
        );
    }

    Ok(())
}
