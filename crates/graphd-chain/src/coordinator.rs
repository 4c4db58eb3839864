//! C6: the chain mutation coordinator. Drives one mutation through
//! `prepareLocal` (durable local effect + prime marker), `processRemote`
//! (hand off to the next link), and `processLocal` (commit or undo,
//! depending on what the peer said).

use std::sync::{Arc, Mutex};

use graphd_wal::Wal;
use tracing::{debug, warn};

use crate::error::ChainError;
use crate::kv::{KvStore, WriteBatch};
use crate::lock::LockTable;
use crate::marker::{decode_marker, encode_marker, MarkerPayload};
use crate::policy::ChainPolicy;
use crate::prime::{double_prime_key, edge_storage_key, prime_key, scan_primes, MarkerKind};
use crate::resume::ResumeReport;
use crate::rpc::{encode_mutation, ChainRequest, ChainResponse, Mutation, RemoteLeader};
use crate::term::TermRegistry;

pub struct ChainCoordinator<R, K, T>
where
    R: RemoteLeader,
    K: KvStore,
    T: TermRegistry,
{
    wal: Arc<Wal>,
    kv: Arc<K>,
    remote: Arc<R>,
    terms: Arc<T>,
    locks: LockTable,
    policy: ChainPolicy,
    append_cursor: Mutex<u64>,
}

impl<R, K, T> ChainCoordinator<R, K, T>
where
    R: RemoteLeader,
    K: KvStore,
    T: TermRegistry,
{
    pub fn new(wal: Arc<Wal>, kv: Arc<K>, remote: Arc<R>, terms: Arc<T>, policy: ChainPolicy) -> Self {
        let cursor = wal.last_log_id();
        Self {
            wal,
            kv,
            remote,
            terms,
            locks: LockTable::new(),
            policy,
            append_cursor: Mutex::new(cursor),
        }
    }

    /// Drive `mutation` through the full chain protocol. Returns once the
    /// mutation has either committed everywhere this node can confirm, or
    /// failed for a reason the caller can act on.
    pub async fn coordinate_mutation(
        &self,
        space_id: u64,
        partition_id: u32,
        term_id: u64,
        mutation: Mutation,
    ) -> Result<(), ChainError> {
        let current_term = self.terms.current_term(partition_id);
        if term_id < current_term {
            return Err(ChainError::OutdatedTerm);
        }
        self.terms.observe_term(partition_id, term_id);

        let keys = mutation.edge_keys();
        let _guard = self.locks.try_lock_all(&keys)?;

        self.prepare_local(space_id, partition_id, term_id, &mutation)?;
        debug!(partition_id, term_id, "prepared local effect, handing off to remote");

        let response = self.process_remote_with_retry(space_id, partition_id, term_id, &mutation).await?;

        match response {
            ChainResponse::Succeeded => {
                self.finalize_local(partition_id, &mutation)?;
                Ok(())
            }
            ChainResponse::OutdatedTerm => {
                self.rollback_local(partition_id, &mutation)?;
                Err(ChainError::OutdatedTerm)
            }
            ChainResponse::Conflict => {
                self.rollback_local(partition_id, &mutation)?;
                Err(ChainError::Conflict)
            }
            ChainResponse::InvalidPayload => {
                self.rollback_local(partition_id, &mutation)?;
                Err(ChainError::InvalidPayload)
            }
            ChainResponse::LeaderChanged { .. } => {
                unreachable!("LeaderChanged is resolved inside process_remote_with_retry")
            }
        }
    }

    async fn process_remote_with_retry(
        &self,
        space_id: u64,
        partition_id: u32,
        term_id: u64,
        mutation: &Mutation,
    ) -> Result<ChainResponse, ChainError> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            let request = ChainRequest {
                space_id,
                partition_id,
                term_id,
                mutation: mutation.clone(),
            };
            let outcome = self.remote.process_remote(request).await;
            match outcome {
                Ok(ChainResponse::LeaderChanged { hint }) => {
                    if attempts >= self.policy.max_retry_times_admin_op {
                        warn!(partition_id, hint = ?hint, "leader-changed retries exhausted, deferring to resume");
                        self.mark_double_prime(partition_id, term_id, mutation)?;
                        return Err(ChainError::LeaderUnreachable);
                    }
                    continue;
                }
                Ok(resp) => return Ok(resp),
                Err(ChainError::RpcFailure) => {
                    // Unlike LeaderChanged there is no hint to follow, and the
                    // peer's actual outcome is unknown: downgrade to
                    // doublePrime on the first failure and let the resume
                    // scanner settle it once the peer is reachable again.
                    warn!(partition_id, "rpc to peer leader failed, deferring to resume");
                    self.mark_double_prime(partition_id, term_id, mutation)?;
                    return Err(ChainError::RpcFailure);
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn next_log_id(&self) -> u64 {
        let mut cursor = self.append_cursor.lock().unwrap();
        *cursor + 1
    }

    fn commit_log_id(&self, id: u64) {
        let mut cursor = self.append_cursor.lock().unwrap();
        *cursor = id;
    }

    fn build_undo(&self, partition_id: u32, mutation: &Mutation) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        mutation
            .edge_keys()
            .into_iter()
            .map(|key| {
                let storage_key = edge_storage_key(partition_id, key);
                let old = self.kv.get(&storage_key);
                (storage_key, old)
            })
            .collect()
    }

    fn apply_effect_ops(batch: &mut WriteBatch, partition_id: u32, mutation: &Mutation) {
        match mutation {
            Mutation::AddEdges { edges } => {
                for (key, payload) in edges {
                    batch.put(edge_storage_key(partition_id, key), payload.clone());
                }
            }
            Mutation::UpdateEdge { edge, payload } => {
                batch.put(edge_storage_key(partition_id, edge), payload.clone());
            }
            Mutation::DeleteEdges { edges } => {
                for key in edges {
                    batch.delete(edge_storage_key(partition_id, key));
                }
            }
        }
    }

    fn prepare_local(&self, space_id: u64, partition_id: u32, term_id: u64, mutation: &Mutation) -> Result<(), ChainError> {
        let undo = self.build_undo(partition_id, mutation);
        let marker = encode_marker(&MarkerPayload {
            term_id,
            mutation: mutation.clone(),
            undo,
        });

        let id = self.next_log_id();
        let payload = encode_mutation(mutation);
        let outcome = self.wal.append_log(id, term_id, space_id, payload)?;
        if !outcome.is_ok() {
            return Err(ChainError::StorageFull);
        }
        self.commit_log_id(id);

        let mut batch = WriteBatch::new();
        Self::apply_effect_ops(&mut batch, partition_id, mutation);
        for key in mutation.edge_keys() {
            batch.put(prime_key(partition_id, key), marker.clone());
        }
        self.kv.write_batch(batch)
    }

    fn finalize_local(&self, partition_id: u32, mutation: &Mutation) -> Result<(), ChainError> {
        let mut batch = WriteBatch::new();
        for key in mutation.edge_keys() {
            batch.delete(prime_key(partition_id, key));
            batch.delete(double_prime_key(partition_id, key));
        }
        self.kv.write_batch(batch)
    }

    fn rollback_local(&self, partition_id: u32, mutation: &Mutation) -> Result<(), ChainError> {
        let mut batch = WriteBatch::new();
        for key in mutation.edge_keys() {
            let pkey = prime_key(partition_id, key);
            let dkey = double_prime_key(partition_id, key);
            let marker_bytes = self.kv.get(&pkey).or_else(|| self.kv.get(&dkey));
            if let Some(bytes) = marker_bytes {
                if let Some(marker) = decode_marker(&bytes) {
                    for (storage_key, old_value) in marker.undo {
                        match old_value {
                            Some(v) => {
                                batch.put(storage_key, v);
                            }
                            None => {
                                batch.delete(storage_key);
                            }
                        }
                    }
                }
            }
            batch.delete(pkey);
            batch.delete(dkey);
        }
        self.kv.write_batch(batch)
    }

    /// The local effect stays applied; the marker moves from `prime` to
    /// `doublePrime` so the resume scanner knows the peer's outcome is
    /// still unresolved.
    fn mark_double_prime(&self, partition_id: u32, term_id: u64, mutation: &Mutation) -> Result<(), ChainError> {
        let undo = self.build_undo(partition_id, mutation);
        let marker = encode_marker(&MarkerPayload {
            term_id,
            mutation: mutation.clone(),
            undo,
        });
        let mut batch = WriteBatch::new();
        for key in mutation.edge_keys() {
            batch.delete(prime_key(partition_id, key));
            batch.put(double_prime_key(partition_id, key), marker.clone());
        }
        self.kv.write_batch(batch)
    }

    /// C7: walk every outstanding `prime`/`doublePrime` marker in
    /// `partition_id` and try to drive it to a terminal outcome. Safe to
    /// call concurrently with live traffic and with itself: a marker whose
    /// edge keys are already locked by an in-flight mutation is skipped
    /// for this pass rather than waited on.
    pub async fn resume_partition(&self, space_id: u64, partition_id: u32) -> ResumeReport {
        let markers = scan_primes(self.kv.as_ref(), partition_id, 0);
        let mut seen_mutations = std::collections::HashSet::new();
        let mut report = ResumeReport::default();

        for marker in markers {
            let storage_key = match marker.kind {
                MarkerKind::Prime => prime_key(partition_id, &marker.edge_key),
                MarkerKind::DoublePrime => double_prime_key(partition_id, &marker.edge_key),
            };
            let bytes = match self.kv.get(&storage_key) {
                Some(b) => b,
                None => continue,
            };
            let payload = match decode_marker(&bytes) {
                Some(p) => p,
                None => continue,
            };

            if !seen_mutations.insert(encode_mutation(&payload.mutation)) {
                continue;
            }

            let keys = payload.mutation.edge_keys();
            let guard = match self.locks.try_lock_all(&keys) {
                Ok(g) => g,
                Err(_) => {
                    report.skipped_conflicts += 1;
                    continue;
                }
            };

            let resolved = match self
                .process_remote_with_retry(space_id, partition_id, payload.term_id, &payload.mutation)
                .await
            {
                Ok(ChainResponse::Succeeded) => self.finalize_local(partition_id, &payload.mutation).is_ok(),
                Ok(ChainResponse::OutdatedTerm | ChainResponse::Conflict | ChainResponse::InvalidPayload) => {
                    self.rollback_local(partition_id, &payload.mutation).is_ok()
                }
                Ok(ChainResponse::LeaderChanged { .. }) => unreachable!("resolved inside process_remote_with_retry"),
                Err(_) => false,
            };
            drop(guard);

            if resolved {
                report.resolved += 1;
            } else {
                report.still_pending += 1;
            }
        }

        report
    }

    pub(crate) fn kv(&self) -> &K {
        &self.kv
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::prime::EdgeKey;
    use crate::rpc::test_support::ScriptedLeader;
    use crate::term::InMemoryTermRegistry;
    use graphd_wal::{accept_all_clusters, Policy};
    use tempfile::tempdir;

    fn coordinator(
        dir: &std::path::Path,
        remote: ScriptedLeader,
        policy: ChainPolicy,
    ) -> ChainCoordinator<ScriptedLeader, MemoryKv, InMemoryTermRegistry> {
        let wal = Arc::new(Wal::open(dir, Policy::default(), accept_all_clusters()).unwrap());
        ChainCoordinator::new(wal, Arc::new(MemoryKv::new()), Arc::new(remote), Arc::new(InMemoryTermRegistry::new()), policy)
    }

    #[tokio::test]
    async fn succeeded_response_commits_and_clears_prime() {
        let dir = tempdir().unwrap();
        let coord = coordinator(dir.path(), ScriptedLeader::new(vec![ChainResponse::Succeeded]), ChainPolicy::default());
        let edge = EdgeKey::new(b"a", 1, 0, b"b");
        let mutation = Mutation::UpdateEdge {
            edge: edge.clone(),
            payload: vec![1, 2, 3],
        };
        coord.coordinate_mutation(1, 0, 1, mutation).await.unwrap();

        assert_eq!(coord.kv().get(&edge_storage_key(0, &edge)), Some(vec![1, 2, 3]));
        assert!(coord.kv().get(&prime_key(0, &edge)).is_none());
    }

    #[tokio::test]
    async fn outdated_term_response_rolls_back() {
        let dir = tempdir().unwrap();
        let coord = coordinator(dir.path(), ScriptedLeader::new(vec![ChainResponse::OutdatedTerm]), ChainPolicy::default());
        let edge = EdgeKey::new(b"a", 1, 0, b"b");
        let mutation = Mutation::UpdateEdge {
            edge: edge.clone(),
            payload: vec![9],
        };
        let err = coord.coordinate_mutation(1, 0, 1, mutation).await.unwrap_err();
        assert_eq!(err, ChainError::OutdatedTerm);
        assert!(coord.kv().get(&edge_storage_key(0, &edge)).is_none());
        assert!(coord.kv().get(&prime_key(0, &edge)).is_none());
    }

    #[tokio::test]
    async fn rollback_restores_prior_value() {
        let dir = tempdir().unwrap();
        let coord = coordinator(
            dir.path(),
            ScriptedLeader::new(vec![ChainResponse::Succeeded, ChainResponse::Conflict]),
            ChainPolicy::default(),
        );
        let edge = EdgeKey::new(b"a", 1, 0, b"b");
        coord
            .coordinate_mutation(
                1,
                0,
                1,
                Mutation::UpdateEdge {
                    edge: edge.clone(),
                    payload: vec![1],
                },
            )
            .await
            .unwrap();

        let err = coord
            .coordinate_mutation(
                1,
                0,
                1,
                Mutation::UpdateEdge {
                    edge: edge.clone(),
                    payload: vec![2],
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::Conflict);
        assert_eq!(coord.kv().get(&edge_storage_key(0, &edge)), Some(vec![1]));
    }

    #[tokio::test]
    async fn exhausted_retries_leave_double_prime_marker() {
        let dir = tempdir().unwrap();
        let policy = ChainPolicy { max_retry_times_admin_op: 2 };
        let coord = coordinator(dir.path(), ScriptedLeader::new(vec![ChainResponse::LeaderChanged { hint: None }]), policy);
        let edge = EdgeKey::new(b"a", 1, 0, b"b");
        let err = coord
            .coordinate_mutation(
                1,
                0,
                1,
                Mutation::UpdateEdge {
                    edge: edge.clone(),
                    payload: vec![7],
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, ChainError::LeaderUnreachable);
        assert!(coord.kv().get(&edge_storage_key(0, &edge)).is_some());
        assert!(coord.kv().get(&prime_key(0, &edge)).is_none());
        assert!(coord.kv().get(&double_prime_key(0, &edge)).is_some());
    }
}
