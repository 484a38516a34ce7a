//! Cart Storage
//!
//! The persistence contract for items, conditions and metadata, keyed by an
//! (identifier, instance) pair. Session and cache drivers are
//! last-write-wins; the database driver adds per-row version control.

use mockall::automock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::{conditions::CartCondition, items::CartItem};

pub mod cache;
pub mod conflict;
pub mod database;
pub mod session;

pub use cache::CacheStore;
pub use conflict::CartConflict;
pub use database::DatabaseStore;
pub use session::SessionStore;

/// Free-form string-keyed values (cart metadata, attributes, rule contexts).
pub type Metadata = FxHashMap<String, Value>;

/// The version token reported by drivers without version control.
pub const UNVERSIONED: u64 = 0;

/// Errors raised by storage drivers.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A versioned write lost the compare-and-swap.
    #[error(transparent)]
    Conflict(#[from] CartConflict),

    /// A stored row could not be decoded.
    #[error("stored cart row could not be decoded")]
    Decode(#[source] serde_json::Error),

    /// A row could not be encoded for storage.
    #[error("cart row could not be encoded")]
    Encode(#[source] serde_json::Error),
}

/// The persistence contract consumed by [`Cart`](crate::cart::Cart).
///
/// Writes take the version token the writer last read and return the token
/// to use next. Drivers without version control ignore the token and return
/// [`UNVERSIONED`]; the database driver enforces compare-and-swap semantics
/// and any external backend plugged in here is expected to do the same.
#[automock]
pub trait Storage: Send + Sync {
    /// Whether a row exists for the pair.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the backend.
    fn has(&self, identifier: &str, instance: &str) -> Result<bool, StorageError>;

    /// The current version token for the pair (0 when absent or
    /// unversioned).
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the backend.
    fn version(&self, identifier: &str, instance: &str) -> Result<u64, StorageError>;

    /// Read the stored items (empty when absent).
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the backend.
    fn get_items(&self, identifier: &str, instance: &str) -> Result<Vec<CartItem>, StorageError>;

    /// Write the items.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when the token is stale on a
    /// versioned driver.
    fn put_items(
        &self,
        identifier: &str,
        instance: &str,
        items: &[CartItem],
        expected: u64,
    ) -> Result<u64, StorageError>;

    /// Read the stored conditions (empty when absent).
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the backend.
    fn get_conditions(
        &self,
        identifier: &str,
        instance: &str,
    ) -> Result<Vec<CartCondition>, StorageError>;

    /// Write the conditions.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when the token is stale on a
    /// versioned driver.
    fn put_conditions(
        &self,
        identifier: &str,
        instance: &str,
        conditions: &[CartCondition],
        expected: u64,
    ) -> Result<u64, StorageError>;

    /// Write items and conditions in one atomic round.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when the token is stale on a
    /// versioned driver.
    fn put_both(
        &self,
        identifier: &str,
        instance: &str,
        items: &[CartItem],
        conditions: &[CartCondition],
        expected: u64,
    ) -> Result<u64, StorageError>;

    /// Read the stored metadata (empty when absent).
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the backend.
    fn get_metadata(&self, identifier: &str, instance: &str) -> Result<Metadata, StorageError>;

    /// Write the metadata.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Conflict`] when the token is stale on a
    /// versioned driver.
    fn put_metadata(
        &self,
        identifier: &str,
        instance: &str,
        metadata: &Metadata,
        expected: u64,
    ) -> Result<u64, StorageError>;

    /// Drop the row for the pair; true if one existed.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the backend.
    fn forget(&self, identifier: &str, instance: &str) -> Result<bool, StorageError>;

    /// Drop every row held by the driver.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the backend.
    fn flush(&self) -> Result<(), StorageError>;

    /// The instance names stored under an identifier.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the backend.
    fn instances(&self, identifier: &str) -> Result<Vec<String>, StorageError>;

    /// Drop every row under an identifier, returning how many were dropped.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the backend.
    fn forget_identifier(&self, identifier: &str) -> Result<usize, StorageError>;

    /// Atomically rebind one instance's row from `old` to `new`. Returns
    /// false when no row exists under `old`. Any row already stored under
    /// `new` is replaced; the calling service owns the guard policy.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the backend.
    fn swap_identifier(&self, old: &str, new: &str, instance: &str) -> Result<bool, StorageError>;
}

/// The (identifier, instance) map key used by the in-memory drivers.
pub(crate) type RowKey = (String, String);

pub(crate) fn row_key(identifier: &str, instance: &str) -> RowKey {
    (identifier.to_string(), instance.to_string())
}

/// A plain in-memory row shared by the session and cache drivers.
#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryRow {
    pub(crate) items: Vec<CartItem>,
    pub(crate) conditions: Vec<CartCondition>,
    pub(crate) metadata: Metadata,
}
