//! C8: term registry. Tracks, per partition, the term this node currently
//! believes is live, used to fence stale coordinators out.

use std::collections::HashMap;
use std::sync::RwLock;

pub trait TermRegistry: Send + Sync {
    fn current_term(&self, partition_id: u32) -> u64;

    /// Advance the term for `partition_id` if `term` is newer. Returns the
    /// term now on record.
    fn observe_term(&self, partition_id: u32, term: u64) -> u64;
}

#[derive(Default)]
pub struct InMemoryTermRegistry {
    terms: RwLock<HashMap<u32, u64>>,
}

impl InMemoryTermRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TermRegistry for InMemoryTermRegistry {
    fn current_term(&self, partition_id: u32) -> u64 {
        *self.terms.read().unwrap().get(&partition_id).unwrap_or(&0)
    }

    fn observe_term(&self, partition_id: u32, term: u64) -> u64 {
        let mut terms = self.terms.write().unwrap();
        let entry = terms.entry(partition_id).or_insert(0);
        if term > *entry {
            *entry = term;
        }
        *entry
    }
}
