//! C5: prime marker store. Deterministic derivations on an edge key plus
//! small writes to the underlying KV; this module holds no state of its
//! own.

use crate::kv::KvStore;

/// The opaque identity of an edge within a partition:
/// `<srcVid><type><rank><dstVid>`, concatenated in field order. Never
/// interpreted by this crate — only used as a byte string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey(pub Vec<u8>);

impl EdgeKey {
    pub fn new(src_vid: &[u8], edge_type: i64, rank: i64, dst_vid: &[u8]) -> Self {
        let mut buf = Vec::with_capacity(src_vid.len() + 8 + 8 + dst_vid.len());
        buf.extend_from_slice(src_vid);
        buf.extend_from_slice(&edge_type.to_be_bytes());
        buf.extend_from_slice(&rank.to_be_bytes());
        buf.extend_from_slice(dst_vid);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn namespaced_key(namespace: &str, partition_id: u32, edge_key: &EdgeKey) -> Vec<u8> {
    let mut buf = Vec::with_capacity(namespace.len() + 1 + 4 + 1 + edge_key.0.len());
    buf.extend_from_slice(namespace.as_bytes());
    buf.push(b'/');
    buf.extend_from_slice(&partition_id.to_be_bytes());
    buf.push(b'/');
    buf.extend_from_slice(&edge_key.0);
    buf
}

pub fn edge_storage_key(partition_id: u32, edge_key: &EdgeKey) -> Vec<u8> {
    namespaced_key("edge", partition_id, edge_key)
}

/// `prime(K)`: "mutation started, peer outcome unknown."
pub fn prime_key(partition_id: u32, edge_key: &EdgeKey) -> Vec<u8> {
    namespaced_key("prime", partition_id, edge_key)
}

/// `doublePrime(K)`: "mutation applied locally, peer refused."
pub fn double_prime_key(partition_id: u32, edge_key: &EdgeKey) -> Vec<u8> {
    namespaced_key("doublePrime", partition_id, edge_key)
}

fn prime_namespace_prefix(partition_id: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6 + 4 + 1);
    buf.extend_from_slice(b"prime/");
    buf.extend_from_slice(&partition_id.to_be_bytes());
    buf.push(b'/');
    buf
}

fn double_prime_namespace_prefix(partition_id: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(12 + 4 + 1);
    buf.extend_from_slice(b"doublePrime/");
    buf.extend_from_slice(&partition_id.to_be_bytes());
    buf.push(b'/');
    buf
}

/// One marker found by [`scan_primes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerKind {
    Prime,
    DoublePrime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    pub edge_key: EdgeKey,
    pub kind: MarkerKind,
}

/// Enumerate all `prime`/`doublePrime` markers in `partition_id`, sorted by
/// edge key so repeated resume passes over the same state always visit
/// markers in the same order. `term_id` is accepted for interface parity
/// with the mutation-coordination entry points but does not affect which
/// markers are returned — the markers themselves carry no term, only the
/// edge they started.
pub fn scan_primes(kv: &dyn KvStore, partition_id: u32, _term_id: u64) -> Vec<Marker> {
    let mut out = Vec::new();

    let prime_prefix = prime_namespace_prefix(partition_id);
    for (key, _) in kv.scan_prefix(&prime_prefix) {
        let edge_key = EdgeKey(key[prime_prefix.len()..].to_vec());
        out.push(Marker {
            edge_key,
            kind: MarkerKind::Prime,
        });
    }

    let dprime_prefix = double_prime_namespace_prefix(partition_id);
    for (key, _) in kv.scan_prefix(&dprime_prefix) {
        let edge_key = EdgeKey(key[dprime_prefix.len()..].to_vec());
        out.push(Marker {
            edge_key,
            kind: MarkerKind::DoublePrime,
        });
    }

    out.sort_by(|a, b| a.edge_key.cmp(&b.edge_key).then(a.kind_order().cmp(&b.kind_order())));
    out
}

impl Marker {
    fn kind_order(&self) -> u8 {
        match self.kind {
            MarkerKind::Prime => 0,
            MarkerKind::DoublePrime => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvStore, MemoryKv, WriteBatch};

    #[test]
    fn scan_primes_finds_both_kinds_sorted() {
        let kv = MemoryKv::new();
        let a = EdgeKey::new(b"a", 1, 0, b"z");
        let b = EdgeKey::new(b"b", 1, 0, b"z");
        let mut batch = WriteBatch::new();
        batch.put(double_prime_key(1, &b), vec![]);
        batch.put(prime_key(1, &a), vec![]);
        kv.write_batch(batch).unwrap();

        let markers = scan_primes(&kv, 1, 42);
        assert_eq!(markers.len(), 2);
        assert_eq!(markers[0].edge_key, a);
        assert_eq!(markers[0].kind, MarkerKind::Prime);
        assert_eq!(markers[1].edge_key, b);
        assert_eq!(markers[1].kind, MarkerKind::DoublePrime);
    }
}
