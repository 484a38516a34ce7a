//! Price display policy
//!
//! Totals are always computed as [`Money`]; this module controls how the
//! `display_*` accessors render them. The policy is process-wide.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::money::Money;

static MODE: AtomicU8 = AtomicU8::new(0);

/// How monetary amounts are rendered for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    /// A plain decimal string with no currency marker (`"80.00"`).
    #[default]
    Numeric,

    /// A currency-formatted string (`"$80.00"`).
    Formatted,
}

/// Set the process-wide display mode.
pub fn set_display_mode(mode: DisplayMode) {
    MODE.store(mode as u8, Ordering::Relaxed);
}

/// The active display mode.
#[must_use]
pub fn display_mode() -> DisplayMode {
    if MODE.load(Ordering::Relaxed) == DisplayMode::Formatted as u8 {
        DisplayMode::Formatted
    } else {
        DisplayMode::Numeric
    }
}

/// Render an amount through the active policy.
#[must_use]
pub fn display(amount: &Money) -> String {
    match display_mode() {
        DisplayMode::Numeric => amount.to_decimal().to_string(),
        DisplayMode::Formatted => amount.format(),
    }
}
