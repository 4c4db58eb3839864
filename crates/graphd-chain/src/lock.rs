//! Per-edge-key mutation lock, sharded to keep contention local. Locking
//! is fail-fast: a key already held returns `Conflict` immediately rather
//! than queuing the caller.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::error::ChainError;
use crate::prime::EdgeKey;

const SHARD_COUNT: usize = 16;

fn shard_of(key: &EdgeKey) -> usize {
    let mut hash: u64 = 1469598103934665603;
    for byte in key.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(1099511628211);
    }
    (hash as usize) % SHARD_COUNT
}

pub struct LockTable {
    shards: Vec<Mutex<HashSet<EdgeKey>>>,
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashSet::new())).collect(),
        }
    }

    /// Acquire locks on every key in `keys`, all-or-nothing. On partial
    /// failure, every lock taken so far in this call is released before
    /// returning `Conflict`.
    pub fn try_lock_all(&self, keys: &[&EdgeKey]) -> Result<LockGuard<'_>, ChainError> {
        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            let shard = shard_of(key);
            let mut set = self.shards[shard].lock().unwrap();
            if set.insert((*key).clone()) {
                held.push((*key).clone());
            } else {
                drop(set);
                self.release(&held);
                return Err(ChainError::Conflict);
            }
        }
        Ok(LockGuard { table: self, keys: held })
    }

    fn release(&self, keys: &[EdgeKey]) {
        for key in keys {
            let shard = shard_of(key);
            self.shards[shard].lock().unwrap().remove(key);
        }
    }
}

/// RAII handle releasing every key it holds on drop.
pub struct LockGuard<'a> {
    table: &'a LockTable,
    keys: Vec<EdgeKey>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.keys);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_on_same_key_conflicts() {
        let table = LockTable::new();
        let key = EdgeKey::new(b"a", 1, 0, b"b");
        let _guard = table.try_lock_all(&[&key]).unwrap();
        assert_eq!(table.try_lock_all(&[&key]).unwrap_err(), ChainError::Conflict);
    }

    #[test]
    fn lock_released_on_drop() {
        let table = LockTable::new();
        let key = EdgeKey::new(b"a", 1, 0, b"b");
        {
            let _guard = table.try_lock_all(&[&key]).unwrap();
        }
        assert!(table.try_lock_all(&[&key]).is_ok());
    }

    #[test]
    fn partial_conflict_releases_everything() {
        let table = LockTable::new();
        let a = EdgeKey::new(b"a", 1, 0, b"b");
        let b = EdgeKey::new(b"c", 1, 0, b"d");
        let _held_b = table.try_lock_all(&[&b]).unwrap();
        assert_eq!(table.try_lock_all(&[&a, &b]).unwrap_err(), ChainError::Conflict);
        // a must have been released even though it was acquired first.
        assert!(table.try_lock_all(&[&a]).is_ok());
    }
}
