//! Database storage driver
//!
//! Rows are JSON-encoded per (identifier, instance) and carry an integer
//! version. Every write compares the caller's version token against the
//! stored row under one lock and increments it on success; a stale token
//! raises [`CartConflict`]. Exactly one of any two racing writers per round
//! succeeds.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::{
    conditions::CartCondition,
    items::CartItem,
    storage::{CartConflict, Metadata, RowKey, Storage, StorageError, row_key},
};

const EMPTY_LIST: &str = "[]";
const EMPTY_MAP: &str = "{}";

#[derive(Debug, Clone)]
struct DatabaseRow {
    items: String,
    conditions: String,
    metadata: String,
    version: u64,
}

impl Default for DatabaseRow {
    fn default() -> Self {
        Self {
            items: EMPTY_LIST.to_string(),
            conditions: EMPTY_LIST.to_string(),
            metadata: EMPTY_MAP.to_string(),
            version: 0,
        }
    }
}

/// The database driver.
#[derive(Debug, Default)]
pub struct DatabaseStore {
    rows: Mutex<FxHashMap<RowKey, DatabaseRow>>,
}

impl DatabaseStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, FxHashMap<RowKey, DatabaseRow>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one compare-and-swap round: check the token, apply the write,
    /// bump the version. The whole round holds the row lock.
    fn commit(
        &self,
        identifier: &str,
        instance: &str,
        expected: u64,
        write: impl FnOnce(&mut DatabaseRow) -> Result<(), StorageError>,
    ) -> Result<u64, StorageError> {
        let mut rows = self.rows();
        let row = rows.entry(row_key(identifier, instance)).or_default();

        if row.version != expected {
            let conflict = CartConflict::new(expected, row.version);

            warn!(
                identifier,
                instance,
                attempted = conflict.attempted_version(),
                current = conflict.current_version(),
                "cart write lost the version check"
            );

            return Err(conflict.into());
        }

        write(row)?;
        row.version += 1;

        Ok(row.version)
    }

    fn decode_column<T: DeserializeOwned>(
        &self,
        identifier: &str,
        instance: &str,
        column: impl Fn(&DatabaseRow) -> &str,
    ) -> Result<Option<T>, StorageError> {
        self.rows()
            .get(&row_key(identifier, instance))
            .map(|row| serde_json::from_str(column(row)).map_err(StorageError::Decode))
            .transpose()
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<String, StorageError> {
    serde_json::to_string(value).map_err(StorageError::Encode)
}

impl Storage for DatabaseStore {
    fn has(&self, identifier: &str, instance: &str) -> Result<bool, StorageError> {
        Ok(self.rows().contains_key(&row_key(identifier, instance)))
    }

    fn version(&self, identifier: &str, instance: &str) -> Result<u64, StorageError> {
        Ok(self
            .rows()
            .get(&row_key(identifier, instance))
            .map_or(0, |row| row.version))
    }

    fn get_items(&self, identifier: &str, instance: &str) -> Result<Vec<CartItem>, StorageError> {
        Ok(self
            .decode_column(identifier, instance, |row| &row.items)?
            .unwrap_or_default())
    }

    fn put_items(
        &self,
        identifier: &str,
        instance: &str,
        items: &[CartItem],
        expected: u64,
    ) -> Result<u64, StorageError> {
        let encoded = encode(&items)?;

        self.commit(identifier, instance, expected, |row| {
            row.items = encoded;

            Ok(())
        })
    }

    fn get_conditions(
        &self,
        identifier: &str,
        instance: &str,
    ) -> Result<Vec<CartCondition>, StorageError> {
        Ok(self
            .decode_column(identifier, instance, |row| &row.conditions)?
            .unwrap_or_default())
    }

    fn put_conditions(
        &self,
        identifier: &str,
        instance: &str,
        conditions: &[CartCondition],
        expected: u64,
    ) -> Result<u64, StorageError> {
        let encoded = encode(&conditions)?;

        self.commit(identifier, instance, expected, |row| {
            row.conditions = encoded;

            Ok(())
        })
    }

    fn put_both(
        &self,
        identifier: &str,
        instance: &str,
        items: &[CartItem],
        conditions: &[CartCondition],
        expected: u64,
    ) -> Result<u64, StorageError> {
        let encoded_items = encode(&items)?;
        let encoded_conditions = encode(&conditions)?;

        self.commit(identifier, instance, expected, |row| {
            row.items = encoded_items;
            row.conditions = encoded_conditions;

            Ok(())
        })
    }

    fn get_metadata(&self, identifier: &str, instance: &str) -> Result<Metadata, StorageError> {
        Ok(self
            .decode_column(identifier, instance, |row| &row.metadata)?
            .unwrap_or_default())
    }

    fn put_metadata(
        &self,
        identifier: &str,
        instance: &str,
        metadata: &Metadata,
        expected: u64,
    ) -> Result<u64, StorageError> {
        let encoded = encode(metadata)?;

        self.commit(identifier, instance, expected, |row| {
            row.metadata = encoded;

            Ok(())
        })
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
