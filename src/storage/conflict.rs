//! Optimistic-lock conflicts
//!
//! Raised by the database driver when a write's version token no longer
//! matches the stored row. The engine never retries on its own; this type
//! carries what the caller needs to decide between retrying with a refresh
//! and surfacing the conflict.

use jiff::Timestamp;
use serde_json::{Value, json};
use thiserror::Error;

/// Version drift at or below this is considered minor.
const MINOR_CONFLICT_THRESHOLD: u64 = 1;

/// A compare-and-swap failure on a cart row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cart write conflict: attempted version {attempted}, current version {current}")]
pub struct CartConflict {
    attempted: u64,
    current: u64,
}

impl CartConflict {
    /// Record a conflict between the version a writer read and the version
    /// it found at commit time.
    #[must_use]
    pub const fn new(attempted: u64, current: u64) -> Self {
        Self { attempted, current }
    }

    /// The version the failed writer based its write on.
    #[must_use]
    pub const fn attempted_version(&self) -> u64 {
        self.attempted
    }

    /// The version stored when the write was rejected.
    #[must_use]
    pub const fn current_version(&self) -> u64 {
        self.current
    }

    /// How far behind the failed writer was.
    #[must_use]
    pub const fn version_difference(&self) -> u64 {
        self.current.saturating_sub(self.attempted)
    }

    /// Whether the writer missed only a small number of rounds.
    #[must_use]
    pub const fn is_minor_conflict(&self) -> bool {
        self.version_difference() <= MINOR_CONFLICT_THRESHOLD
    }

    /// What the caller should consider doing about it.
    #[must_use]
    pub const fn resolution_suggestions(&self) -> &'static [&'static str] {
        if self.is_minor_conflict() {
            &["retry_with_refresh", "merge_changes"]
        } else {
            &["reload_cart", "manual_resolution_required"]
        }
    }

    /// The conflict rendered for API propagation.
    #[must_use]
    pub fn to_payload(&self) -> Value {
        json!({
            "error": "cart_conflict",
            "attempted_version": self.attempted,
            "current_version": self.current,
            "is_minor_conflict": self.is_minor_conflict(),
            "resolution_suggestions": self.resolution_suggestions(),
            "timestamp": Timestamp::now().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_difference_is_current_minus_attempted() {
        assert_eq!(CartConflict::new(3, 5).version_difference(), 2);
        assert_eq!(CartConflict::new(5, 5).version_difference(), 0);
    }

    #[test]
    fn one_round_behind_is_minor() {
        assert!(CartConflict::new(4, 5).is_minor_conflict());
        assert!(!CartConflict::new(2, 5).is_minor_conflict());
    }

    #[test]
    fn suggestions_depend_on_severity() {
        assert_eq!(
            CartConflict::new(4, 5).resolution_suggestions(),
            ["retry_with_refresh", "merge_changes"]
        );
        assert_eq!(
            CartConflict::new(1, 5).resolution_suggestions(),
            ["reload_cart", "manual_resolution_required"]
        );
    }

    #[test]
    fn payload_exposes_the_api_contract() {
        let payload = CartConflict::new(4, 5).to_payload();

        assert_eq!(payload["error"], "cart_conflict");
        assert_eq!(payload["attempted_version"], 4);
        assert_eq!(payload["current_version"], 5);
        assert_eq!(payload["is_minor_conflict"], true);
        assert!(
            payload["timestamp"].is_string(),
            "timestamp should be present"
        );
    }
}
