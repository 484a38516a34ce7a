//! Deterministic condition application order
//!
//! Order ascending, ties broken by insertion order; reordering insertions
//! without changing `order` values must not change the total.

use std::sync::Arc;

use tally::{
    cart::Cart,
    conditions::{CartCondition, ConditionType, Target},
    identity::Identity,
    items::NewItem,
    money::Money,
    storage::SessionStore,
};
use testresult::TestResult;

fn cart_with_item() -> TestResult<Cart> {
    let mut cart = Cart::new(Identity::guest("sess-1"), Arc::new(SessionStore::new()))?;
    cart.add(NewItem::new(
        "p1",
        "Widget",
        Money::from_minor(100_00, "USD"),
        1,
    ))?;

    Ok(cart)
}

fn flat_minus_ten(order: i32) -> TestResult<CartCondition> {
    Ok(
        CartCondition::parsed("FLAT", ConditionType::Discount, Target::Subtotal, "-10.00")?
            .with_order(order),
    )
}

fn half_off(order: i32) -> TestResult<CartCondition> {
    Ok(
        CartCondition::parsed("HALF", ConditionType::Discount, Target::Subtotal, "-50%")?
            .with_order(order),
    )
}

#[test]
fn ascending_order_decides_the_outcome() -> TestResult {
    // Flat first: (100 − 10) × 0.5 = 45.
    let mut flat_first = cart_with_item()?;
    flat_first.condition(flat_minus_ten(1)?)?;
    flat_first.condition(half_off(2)?)?;
    assert_eq!(flat_first.subtotal()?.minor_units(), 45_00);

    // Percentage first: 100 × 0.5 − 10 = 40.
    let mut half_first = cart_with_item()?;
    half_first.condition(flat_minus_ten(2)?)?;
    half_first.condition(half_off(1)?)?;
    assert_eq!(half_first.subtotal()?.minor_units(), 40_00);

    Ok(())
}

#[test]
fn insertion_order_is_irrelevant_when_orders_differ() -> TestResult {
    let mut forward = cart_with_item()?;
    forward.condition(flat_minus_ten(1)?)?;
    forward.condition(half_off(2)?)?;

    let mut reversed = cart_with_item()?;
    reversed.condition(half_off(2)?)?;
    reversed.condition(flat_minus_ten(1)?)?;

    assert_eq!(
        forward.total()?.minor_units(),
        reversed.total()?.minor_units(),
        "swapping insertion order with distinct order values must not change the total"
    );

    Ok(())
}

#[test]
fn equal_orders_fall_back_to_insertion_order() -> TestResult {
    let mut flat_inserted_first = cart_with_item()?;
    flat_inserted_first.condition(flat_minus_ten(5)?)?;
    flat_inserted_first.condition(half_off(5)?)?;

    let mut half_inserted_first = cart_with_item()?;
    half_inserted_first.condition(half_off(5)?)?;
    half_inserted_first.condition(flat_minus_ten(5)?)?;

    assert_eq!(flat_inserted_first.subtotal()?.minor_units(), 45_00);
    assert_eq!(half_inserted_first.subtotal()?.minor_units(), 40_00);

    Ok(())
}

#[test]
fn item_conditions_apply_before_cart_conditions() -> TestResult {
    let mut cart = Cart::new(Identity::guest("sess-1"), Arc::new(SessionStore::new()))?;

    // Item: 100 − 50% = 50, even though the cart-level flat has a lower
    // order value; levels never interleave.
    cart.add(
        NewItem::new("p1", "Widget", Money::from_minor(100_00, "USD"), 1).condition(
            CartCondition::parsed("SALE", ConditionType::Discount, Target::Price, "-50%")?
                .with_order(100),
        ),
    )?;
    cart.condition(flat_minus_ten(-100)?)?;

    assert_eq!(cart.subtotal()?.minor_units(), 40_00);

    Ok(())
}
