//! Key-value storage the sessions run their commands against.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

/// Default number of entries kept by [`MapBasedGlobalLockImpl`].
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("storage is not started")]
    Stopped,
    #[error("storage lock is poisoned")]
    Poisoned,
}

/// Operations every storage backend provides.
///
/// All operations fail with [`StorageError::Stopped`] outside of `start`/`stop`.
pub trait Storage {
    fn start(&self) -> Result<(), StorageError>;

    fn stop(&self) -> Result<(), StorageError>;

    /// Inserts or overwrites `key`.
    fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Inserts `key` only if it is missing. Returns true if it was inserted.
    fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StorageError>;

    /// Overwrites `key` only if it exists. Returns true if it was overwritten.
    fn set(&self, key: &str, value: &str) -> Result<bool, StorageError>;

    /// Removes `key`. Returns true if it existed.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
}

struct Entry {
    value: String,
    // Position in `Lru::order`.
    tick: u64,
}

/// Map with least recently used eviction.
#[derive(Default)]
struct Lru {
    entries: HashMap<String, Entry>,
    order: BTreeMap<u64, String>,
    next_tick: u64,
}

impl Lru {
    fn touch(&mut self, key: &str) -> Option<&mut Entry> {
        let tick = self.next_tick;
        let entry = self.entries.get_mut(key)?;
        self.next_tick += 1;
        if let Some(key) = self.order.remove(&entry.tick) {
            self.order.insert(tick, key);
        }
        entry.tick = tick;
        Some(entry)
    }

    fn insert(&mut self, key: &str, value: &str, capacity: usize) {
        if let Some(entry) = self.touch(key) {
            entry.value = value.to_owned();
            return;
        }
        while self.entries.len() >= capacity {
            match self.order.pop_first() {
                Some((_, oldest)) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        let tick = self.next_tick;
        self.next_tick += 1;
        self.order.insert(tick, key.to_owned());
        self.entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                tick,
            },
        );
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.order.remove(&entry.tick);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }
}

struct State {
    running: bool,
    map: Lru,
}

/// Storage guarded by one global lock. Holds at most `capacity` entries, inserting into a full map
/// evicts the least recently used one. Reads count as a use.
pub struct MapBasedGlobalLockImpl {
    capacity: usize,
    state: Mutex<State>,
}

impl Default for MapBasedGlobalLockImpl {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MapBasedGlobalLockImpl {
    pub fn new(capacity: usize) -> Self {
        MapBasedGlobalLockImpl {
            capacity: capacity.max(1),
            state: Mutex::new(State {
                running: false,
                map: Lru::default(),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of stored entries.
    pub fn len(&self) -> Result<usize, StorageError> {
        Ok(self.lock()?.map.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        self.state.lock().map_err(|_| StorageError::Poisoned)
    }

    fn running(&self) -> Result<MutexGuard<'_, State>, StorageError> {
        let state = self.lock()?;
        if !state.running {
            return Err(StorageError::Stopped);
        }
        Ok(state)
    }
}

impl Storage for MapBasedGlobalLockImpl {
    fn start(&self) -> Result<(), StorageError> {
        self.lock()?.running = true;
        Ok(())
    }

    /// Stops the storage and drops every entry.
    fn stop(&self) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        state.running = false;
        state.map.clear();
        Ok(())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.running()?;
        state.map.insert(key, value, self.capacity);
        Ok(())
    }

    fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let mut state = self.running()?;
        if state.map.entries.contains_key(key) {
            return Ok(false);
        }
        state.map.insert(key, value, self.capacity);
        Ok(true)
    }

    fn set(&self, key: &str, value: &str) -> Result<bool, StorageError> {
        let mut state = self.running()?;
        match state.map.touch(key) {
            Some(entry) => {
                entry.value = value.to_owned();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.running()?.map.remove(key))
    }

    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut state = self.running()?;
        Ok(state.map.touch(key).map(|entry| entry.value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started(capacity: usize) -> MapBasedGlobalLockImpl {
        let storage = MapBasedGlobalLockImpl::new(capacity);
        storage.start().unwrap();
        storage
    }

    #[test]
    fn rejects_operations_while_stopped() {
        let storage = MapBasedGlobalLockImpl::default();
        assert_eq!(storage.put("k", "v"), Err(StorageError::Stopped));
        storage.start().unwrap();
        storage.put("k", "v").unwrap();
        storage.stop().unwrap();
        assert_eq!(storage.get("k"), Err(StorageError::Stopped));

        storage.start().unwrap();
        assert_eq!(storage.get("k"), Ok(None));
    }

    #[test]
    fn poisoned_lock_is_reported_everywhere() {
        let storage = started(4);
        storage.put("k", "v").unwrap();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _state = storage.state.lock().unwrap();
            panic!("writer died holding the lock");
        }));
        assert!(result.is_err());

        assert_eq!(storage.len(), Err(StorageError::Poisoned));
        assert_eq!(storage.is_empty(), Err(StorageError::Poisoned));
        assert_eq!(storage.start(), Err(StorageError::Poisoned));
        assert_eq!(storage.stop(), Err(StorageError::Poisoned));
        assert_eq!(storage.get("k"), Err(StorageError::Poisoned));
        assert_eq!(storage.put("k", "w"), Err(StorageError::Poisoned));
    }

    #[test]
    fn conditional_writes() {
        let storage = started(8);
        assert_eq!(storage.set("k", "v"), Ok(false));
        assert_eq!(storage.get("k"), Ok(None));
        assert_eq!(storage.put_if_absent("k", "v1"), Ok(true));
        assert_eq!(storage.put_if_absent("k", "v2"), Ok(false));
        assert_eq!(storage.get("k"), Ok(Some("v1".to_owned())));
        assert_eq!(storage.set("k", "v3"), Ok(true));
        assert_eq!(storage.get("k"), Ok(Some("v3".to_owned())));
        assert_eq!(storage.delete("k"), Ok(true));
        assert_eq!(storage.delete("k"), Ok(false));
        assert_eq!(storage.is_empty(), Ok(true));
    }

    #[test]
    fn evicts_least_recently_used() {
        let storage = started(3);
        storage.put("a", "1").unwrap();
        storage.put("b", "2").unwrap();
        storage.put("c", "3").unwrap();
        // `a` becomes the most recently used one.
        storage.get("a").unwrap();
        storage.put("d", "4").unwrap();

        assert_eq!(storage.len(), Ok(3));
        assert_eq!(storage.get("b"), Ok(None));
        assert_eq!(storage.get("a"), Ok(Some("1".to_owned())));
        assert_eq!(storage.get("c"), Ok(Some("3".to_owned())));
        assert_eq!(storage.get("d"), Ok(Some("4".to_owned())));
    }

    #[test]
    fn overwrite_does_not_evict() {
        let storage = started(2);
        storage.put("a", "1").unwrap();
        storage.put("b", "2").unwrap();
        storage.put("a", "10").unwrap();
        assert_eq!(storage.len(), Ok(2));
        assert_eq!(storage.get("b"), Ok(Some("2".to_owned())));
        // `b` was just read, so `a` goes.
        storage.put("c", "3").unwrap();
        assert_eq!(storage.get("a"), Ok(None));
    }
}
