//! Cart Identity
//!
//! The storage identifier is derived strictly from who owns the cart: the
//! authenticated customer id, else the guest session id. Identity is an
//! explicit constructor input, never read from ambient state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The owner of a cart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Identity {
    /// An authenticated customer.
    Customer(String),

    /// A guest, keyed by session id.
    Guest(String),
}

impl Identity {
    /// Identity for an authenticated customer.
    #[must_use]
    pub fn customer(id: impl Into<String>) -> Self {
        Self::Customer(id.into())
    }

    /// Identity for a guest session.
    #[must_use]
    pub fn guest(session_id: impl Into<String>) -> Self {
        Self::Guest(session_id.into())
    }

    /// The storage identifier this identity resolves to.
    #[must_use]
    pub fn identifier(&self) -> &str {
        match self {
            Self::Customer(id) | Self::Guest(id) => id,
        }
    }

    /// Whether this identity belongs to an authenticated customer.
    #[must_use]
    pub const fn is_customer(&self) -> bool {
        matches!(self, Self::Customer(_))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Customer(id) => write!(f, "customer:{id}"),
            Self::Guest(id) => write!(f, "guest:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_ignores_the_identity_kind() {
        assert_eq!(Identity::customer("42").identifier(), "42");
        assert_eq!(Identity::guest("sess-9").identifier(), "sess-9");
    }

    #[test]
    fn display_tags_the_kind() {
        assert_eq!(Identity::customer("42").to_string(), "customer:42");
        assert_eq!(Identity::guest("sess-9").to_string(), "guest:sess-9");
    }
}
