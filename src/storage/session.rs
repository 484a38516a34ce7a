//! Session storage driver
//!
//! An in-memory, last-write-wins driver scoped to a single logical owner
//! (one session handling one request at a time). Provides no version
//! control; concurrent writers overwrite each other silently.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;

use crate::{
    conditions::CartCondition,
    items::CartItem,
    storage::{Metadata, MemoryRow, RowKey, Storage, StorageError, UNVERSIONED, row_key},
};

/// The session driver.
#[derive(Debug, Default)]
pub struct SessionStore {
    rows: Mutex<FxHashMap<RowKey, MemoryRow>>,
}

impl SessionStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, FxHashMap<RowKey, MemoryRow>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Storage for SessionStore {
    fn has(&self, identifier: &str, instance: &str) -> Result<bool, StorageError> {
        Ok(self.rows().contains_key(&row_key(identifier, instance)))
    }

    fn version(&self, _identifier: &str, _instance: &str) -> Result<u64, StorageError> {
        Ok(UNVERSIONED)
    }

    fn get_items(&self, identifier: &str, instance: &str) -> Result<Vec<CartItem>, StorageError> {
        Ok(self
            .rows()
            .get(&row_key(identifier, instance))
            .map(|row| row.items.clone())
            .unwrap_or_default())
    }

    fn put_items(
        &self,
        identifier: &str,
        instance: &str,
        items: &[CartItem],
        _expected: u64,
    ) -> Result<u64, StorageError> {
        self.rows()
            .entry(row_key(identifier, instance))
            .or_default()
            .items = items.to_vec();

        Ok(UNVERSIONED)
    }

    fn get_conditions(
        &self,
        identifier: &str,
        instance: &str,
    ) -> Result<Vec<CartCondition>, StorageError> {
        Ok(self
            .rows()
            .get(&row_key(identifier, instance))
            .map(|row| row.conditions.clone())
            .unwrap_or_default())
    }

    fn put_conditions(
        &self,
        identifier: &str,
        instance: &str,
        conditions: &[CartCondition],
        _expected: u64,
    ) -> Result<u64, StorageError> {
        self.rows()
            .entry(row_key(identifier, instance))
            .or_default()
            .conditions = conditions.to_vec();

        Ok(UNVERSIONED)
    }

    fn put_both(
        &self,
        identifier: &str,
        instance: &str,
        items: &[CartItem],
        conditions: &[CartCondition],
        _expected: u64,
    ) -> Result<u64, StorageError> {
        let mut rows = self.rows();
        let row = rows.entry(row_key(identifier, instance)).or_default();

        row.items = items.to_vec();
        row.conditions = conditions.to_vec();

        Ok(UNVERSIONED)
    }

    fn get_metadata(&self, identifier: &str, instance: &str) -> Result<Metadata, StorageError> {
        Ok(self
            .rows()
            .get(&row_key(identifier, instance))
            .map(|row| row.metadata.clone())
            .unwrap_or_default())
    }

    fn put_metadata(
        &self,
        identifier: &str,
        instance: &str,
        metadata: &Metadata,
        _expected: u64,
    ) -> Result<u64, StorageError> {
        self.rows()
            .entry(row_key(identifier, instance))
            .or_default()
            .metadata = metadata.clone();

        Ok(UNVERSIONED)
    }

    fn forget(&self, identifier: &str, instance: &str) -> Result<bool, StorageError> {
        Ok(self.rows().remove(&row_key(identifier, instance)).is_some())
    }

    fn flush(&self) -> Result<(), StorageError> {
        self.rows().clear();

        Ok(())
    }

    fn instances(&self, identifier: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .rows()
            .keys()
            .filter(|(id, _)| id == identifier)
            .map(|(_, instance)| instance.clone())
            .collect())
    }

    fn forget_identifier(&self, identifier: &str) -> Result<usize, StorageError> {
        let mut rows = self.rows();
        let before = rows.len();
        rows.retain(|(id, _), _| id != identifier);

        Ok(before - rows.len())
    }

    fn swap_identifier(&self, old: &str, new: &str, instance: &str) -> Result<bool, StorageError> {
        let mut rows = self.rows();

        match rows.remove(&row_key(old, instance)) {
            Some(row) => {
                rows.insert(row_key(new, instance), row);

                Ok(true)
            }
            None => Ok(false),
        }
    }
}
