//! Cache storage driver
//!
//! Last-write-wins like the session driver, but rows may carry a time-to-live
//! consulted on every read; an expired row behaves exactly like an absent
//! one.

use std::sync::{Mutex, MutexGuard, PoisonError};

use jiff::{SignedDuration, Timestamp};
use rustc_hash::FxHashMap;

use crate::{
    conditions::CartCondition,
    items::CartItem,
    storage::{Metadata, MemoryRow, RowKey, Storage, StorageError, UNVERSIONED, row_key},
};

#[derive(Debug, Clone)]
struct CacheRow {
    row: MemoryRow,
    expires_at: Option<Timestamp>,
}

impl CacheRow {
    fn fresh(ttl: Option<SignedDuration>) -> Self {
        Self {
            row: MemoryRow::default(),
            expires_at: ttl
                .map(|ttl| Timestamp::now().saturating_add(ttl).unwrap_or(Timestamp::MAX)),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= Timestamp::now())
    }
}

/// The cache driver.
#[derive(Debug, Default)]
pub struct CacheStore {
    ttl: Option<SignedDuration>,
    rows: Mutex<FxHashMap<RowKey, CacheRow>>,
}

impl CacheStore {
    /// A store whose rows never expire.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose rows expire `ttl` after their last write.
    #[must_use]
    pub fn with_ttl(ttl: SignedDuration) -> Self {
        Self {
            ttl: Some(ttl),
            rows: Mutex::new(FxHashMap::default()),
        }
    }

    fn rows(&self) -> MutexGuard<'_, FxHashMap<RowKey, CacheRow>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read<T>(&self, identifier: &str, instance: &str, get: impl Fn(&MemoryRow) -> T) -> Option<T> {
        let mut rows = self.rows();
        let key = row_key(identifier, instance);

        match rows.get(&key) {
            Some(entry) if entry.is_expired() => {
                rows.remove(&key);

                None
            }
            Some(entry) => Some(get(&entry.row)),
            None => None,
        }
    }

    fn write(&self, identifier: &str, instance: &str, set: impl FnOnce(&mut MemoryRow)) {
        let mut rows = self.rows();
        let key = row_key(identifier, instance);

        let entry = rows.entry(key).or_insert_with(|| CacheRow::fresh(self.ttl));

        if entry.is_expired() {
            *entry = CacheRow::fresh(self.ttl);
        }

        // Every write refreshes the expiry.
        entry.expires_at = self
            .ttl
            .map(|ttl| Timestamp::now().saturating_add(ttl).unwrap_or(Timestamp::MAX));
        set(&mut entry.row);
    }
}

impl Storage for CacheStore {
    fn has(&self, identifier: &str, instance: &str) -> Result<bool, StorageError> {
        Ok(self.read(identifier, instance, |_| ()).is_some())
    }

    fn version(&self, _identifier: &str, _instance: &str) -> Result<u64, StorageError> {
        Ok(UNVERSIONED)
    }

    fn get_items(&self, identifier: &str, instance: &str) -> Result<Vec<CartItem>, StorageError> {
        Ok(self
            .read(identifier, instance, |row| row.items.clone())
            .unwrap_or_default())
    }

    fn put_items(
        &self,
        identifier: &str,
        instance: &str,
        items: &[CartItem],
        _expected: u64,
    ) -> Result<u64, StorageError> {
        self.write(identifier, instance, |row| row.items = items.to_vec());

        Ok(UNVERSIONED)
    }

    fn get_conditions(
        &self,
        identifier: &str,
        instance: &str,
    ) -> Result<Vec<CartCondition>, StorageError> {
        Ok(self
            .read(identifier, instance, |row| row.conditions.clone())
            .unwrap_or_default())
    }

    fn put_conditions(
        &self,
        identifier: &str,
        instance: &str,
        conditions: &[CartCondition],
        _expected: u64,
    ) -> Result<u64, StorageError> {
        self.write(identifier, instance, |row| {
            row.conditions = conditions.to_vec();
        });

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
        self.write(identifier, instance, |row| {
            row.items = items.to_vec();
            row.conditions = conditions.to_vec();
        });

        Ok(UNVERSIONED)
    }

    fn get_metadata(&self, identifier: &str, instance: &str) -> Result<Metadata, StorageError> {
        Ok(self
            .read(identifier, instance, |row| row.metadata.clone())
            .unwrap_or_default())
    }

    fn put_metadata(
        &self,
        identifier: &str,
        instance: &str,
        metadata: &Metadata,
        _expected: u64,
    ) -> Result<u64, StorageError> {
        self.write(identifier, instance, |row| {
            row.metadata = metadata.clone();
        });

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
            .iter()
            .filter(|((id, _), entry)| id == identifier && !entry.is_expired())
            .map(|((_, instance), _)| instance.clone())
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
            Some(entry) if !entry.is_expired() => {
                rows.insert(row_key(new, instance), entry);

                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use crate::{items::NewItem, money::Money};

    use super::*;

    fn item(id: &str) -> TestResult<CartItem> {
        Ok(CartItem::try_from(NewItem::new(
            id,
            "Widget",
            Money::from_minor(100, "USD"),
            1,
        ))?)
    }

    #[test]
    fn rows_without_ttl_never_expire() -> TestResult {
        let store = CacheStore::new();

        store.put_items("u1", "default", &[item("a")?], 0)?;

        assert!(store.has("u1", "default")?);

        Ok(())
    }

    #[test]
    fn expired_rows_read_as_absent() -> TestResult {
        // A negative ttl expires rows immediately.
        let store = CacheStore::with_ttl(SignedDuration::from_secs(-1));

        store.put_items("u1", "default", &[item("a")?], 0)?;

        assert!(!store.has("u1", "default")?);
        assert!(store.get_items("u1", "default")?.is_empty());

        Ok(())
    }

    #[test]
    fn live_ttl_keeps_rows_readable() -> TestResult {
        let store = CacheStore::with_ttl(SignedDuration::from_secs(3600));

        store.put_items("u1", "default", &[item("a")?], 0)?;

        assert!(store.has("u1", "default")?);
        assert_eq!(store.get_items("u1", "default")?.len(), 1);

        Ok(())
    }
}
