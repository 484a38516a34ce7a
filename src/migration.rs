//! Identifier migration
//!
//! On login a guest cart (identifier = session id) is rebound to the
//! authenticated customer's identifier. The storage swap is atomic; the
//! guard policy lives here: an absent or empty guest cart is a no-op.

use std::{fmt, sync::Arc};

use tracing::debug;

use crate::{
    identity::Identity,
    storage::{Storage, StorageError},
};

/// Rebinds cart rows from one identifier to another.
pub struct Migration {
    storage: Arc<dyn Storage>,
}

impl fmt::Debug for Migration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migration").finish_non_exhaustive()
    }
}

impl Migration {
    /// A migration service over a storage driver.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Rebind one instance from `old` to `new`. Returns false without
    /// touching storage when no cart exists under `old` or it holds no
    /// items.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the driver.
    pub fn swap(&self, old: &str, new: &str, instance: &str) -> Result<bool, StorageError> {
        if !self.storage.has(old, instance)? {
            return Ok(false);
        }

        if self.storage.get_items(old, instance)?.is_empty() {
            return Ok(false);
        }

        let swapped = self.storage.swap_identifier(old, new, instance)?;

        if swapped {
            debug!(old, new, instance, "cart identifier swapped");
        }

        Ok(swapped)
    }

    /// Rebind every instance stored under `old`, returning how many were
    /// swapped. Empty instances are skipped, not dropped.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the driver.
    pub fn swap_all(&self, old: &str, new: &str) -> Result<usize, StorageError> {
        let mut swapped = 0;

        for instance in self.storage.instances(old)? {
            if self.swap(old, new, &instance)? {
                swapped += 1;
            }
        }

        Ok(swapped)
    }

    /// [`Migration::swap_all`] in identity terms: the login path.
    ///
    /// # Errors
    ///
    /// Propagates [`StorageError`] from the driver.
    pub fn on_login(&self, guest: &Identity, customer: &Identity) -> Result<usize, StorageError> {
        self.swap_all(guest.identifier(), customer.identifier())
    }
}
