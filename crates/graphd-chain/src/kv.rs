//! The key/value engine is an external collaborator: this module only
//! states the contract the coordinator needs from it — an opaque sorted
//! byte-string store with atomic batched writes — plus a minimal
//! in-memory implementation used by tests, mirroring how `graphd-wal`'s
//! own test suite stands in a [`tempfile`] directory for a real
//! filesystem.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// One write within a [`WriteBatch`].
#[derive(Debug, Clone)]
pub enum WriteOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// A set of writes that must be applied atomically: the coordinator always
/// writes a mutation's effect and its prime marker within one batch, so
/// a crash can never observe one without the other.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Put(key, value));
        self
    }

    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Delete(key));
        self
    }
}

/// Contract the coordinator relies on from the underlying storage engine.
pub trait KvStore: Send + Sync + 'static {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;

    /// All keys whose bytes start with `prefix`, in ascending key order.
    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)>;

    /// Apply `batch` atomically. Fails only on local-fatal conditions
    /// (disk full, engine closed).
    fn write_batch(&self, batch: WriteBatch) -> Result<(), crate::error::ChainError>;
}

/// An in-memory `KvStore` for tests.
#[derive(Default)]
pub struct MemoryKv {
    data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(key).cloned()
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.data
            .lock()
            .unwrap()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), crate::error::ChainError> {
        let mut data = self.data.lock().unwrap();
        for op in batch.ops {
            match op {
                WriteOp::Put(k, v) => {
                    data.insert(k, v);
                }
                WriteOp::Delete(k) => {
                    data.remove(&k);
                }
            }
        }
        Ok(())
    }
}
