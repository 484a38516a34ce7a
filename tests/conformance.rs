//! Real-world conformance tests over YAML fixture sets

use tally::fixtures::Fixture;
use testresult::TestResult;

#[test]
fn subtotal_discount_conformance() -> TestResult {
    let cart = Fixture::from_set("conformance/subtotal-discount")?.cart()?;

    assert_eq!(cart.subtotal()?.minor_units(), 80_00);
    assert_eq!(cart.savings()?.minor_units(), 20_00);
    assert_eq!(cart.subtotal_without_conditions()?.minor_units(), 100_00);

    Ok(())
}

#[test]
fn percentage_stack_conformance() -> TestResult {
    let cart = Fixture::from_set("conformance/percentage-stack")?.cart()?;

    // 100 × 1.10 × 0.95: percentages compound on each other's output.
    assert_eq!(cart.total()?.minor_units(), 104_50);

    Ok(())
}

#[test]
fn mixed_basket_conformance() -> TestResult {
    let cart = Fixture::from_set("conformance/mixed-basket")?.cart()?;

    // Item level: 89.90 × 2 = 179.80; 120.00 − 25% = 90.00.
    assert_eq!(cart.total_without_conditions()?.minor_units(), 269_80);

    // MEMBER5 (order 1) before SST (order 10): 269.80 × 0.95 = 256.31.
    assert_eq!(cart.subtotal()?.minor_units(), 256_31);

    // 256.31 × 1.06 = 271.6886, rounded half-up at the minor boundary.
    assert_eq!(cart.total()?.minor_units(), 271_69);

    // Against the unconditioned 299.80.
    assert_eq!(cart.savings()?.minor_units(), 28_11);

    Ok(())
}
