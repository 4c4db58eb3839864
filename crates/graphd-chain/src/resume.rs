//! C7: drives [`ChainCoordinator::resume_partition`] on a schedule, the
//! way `core::db::durability::DurabilityWorker` runs its own background
//! loop off a `tokio::spawn`'d task rather than blocking callers on it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use crate::coordinator::ChainCoordinator;
use crate::kv::KvStore;
use crate::rpc::RemoteLeader;
use crate::term::TermRegistry;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumeReport {
    /// Markers driven to a terminal outcome (committed or rolled back)
    /// this pass.
    pub resolved: usize,
    /// Markers whose edge keys were already locked by live traffic;
    /// left for the next pass.
    pub skipped_conflicts: usize,
    /// Markers that tried the remote hop and are still unresolved
    /// (peer unreachable, or a repeated leader-changed hint).
    pub still_pending: usize,
}

/// Spawn a task that calls [`ChainCoordinator::resume_partition`] for every
/// partition in `partition_ids` every `interval`, until the returned handle
/// is dropped or aborted. Safe to run alongside [`resume_once`] calls
/// triggered on demand (e.g. right after a leadership change), since
/// `resume_partition` itself is reentrant.
pub fn spawn_periodic<R, K, T>(
    coordinator: Arc<ChainCoordinator<R, K, T>>,
    space_id: u64,
    partition_ids: Vec<u32>,
    interval: Duration,
) -> JoinHandle<()>
where
    R: RemoteLeader + 'static,
    K: KvStore + 'static,
    T: TermRegistry + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for &partition_id in &partition_ids {
                let report = coordinator.resume_partition(space_id, partition_id).await;
                if report.resolved > 0 || report.still_pending > 0 {
                    info!(
                        partition_id,
                        resolved = report.resolved,
                        skipped_conflicts = report.skipped_conflicts,
                        still_pending = report.still_pending,
                        "resume pass completed"
                    );
                }
            }
        }
    })
}

/// Run a single resume pass over `partition_id` on demand (e.g. right
/// after observing a new term), without waiting for the periodic loop.
pub async fn resume_once<R, K, T>(coordinator: &ChainCoordinator<R, K, T>, space_id: u64, partition_id: u32) -> ResumeReport
where
    R: RemoteLeader,
    K: KvStore,
    T: TermRegistry,
{
    coordinator.resume_partition(space_id, partition_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::policy::ChainPolicy;
    use crate::prime::EdgeKey;
    use crate::rpc::test_support::ScriptedLeader;
    use crate::rpc::{ChainResponse, Mutation};
    use crate::term::InMemoryTermRegistry;
    use graphd_wal::{accept_all_clusters, Policy, Wal};
    use tempfile::tempdir;

    #[tokio::test]
    async fn resume_once_resolves_a_leftover_double_prime_marker() {
        let dir = tempdir().unwrap();
        let wal = Arc::new(Wal::open(dir.path(), Policy::default(), accept_all_clusters()).unwrap());
        let kv = Arc::new(MemoryKv::new());
        let edge = EdgeKey::new(b"a", 1, 0, b"b");

        let unreachable_coordinator = ChainCoordinator::new(
            Arc::clone(&wal),
            Arc::clone(&kv),
            Arc::new(ScriptedLeader::new(vec![ChainResponse::LeaderChanged { hint: None }])),
            Arc::new(InMemoryTermRegistry::new()),
            ChainPolicy { max_retry_times_admin_op: 1 },
        );
        let err = unreachable_coordinator
            .coordinate_mutation(
                1,
                0,
                1,
                Mutation::UpdateEdge {
                    edge: edge.clone(),
                    payload: vec![5],
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, crate::error::ChainError::LeaderUnreachable);
        assert!(kv.get(&crate::prime::double_prime_key(0, &edge)).is_some());

        // A fresh coordinator over the same durable state, now pointed at
        // a leader that answers Succeeded, as if the peer had come back.
        let recovered_coordinator = ChainCoordinator::new(
            wal,
            Arc::clone(&kv),
            Arc::new(ScriptedLeader::new(vec![ChainResponse::Succeeded])),
            Arc::new(InMemoryTermRegistry::new()),
            ChainPolicy::default(),
        );

        let report = resume_once(&recovered_coordinator, 1, 0).await;
        assert_eq!(report.resolved, 1);
        assert!(kv.get(&crate::prime::double_prime_key(0, &edge)).is_none());
        assert_eq!(kv.get(&crate::prime::edge_storage_key(0, &edge)), Some(vec![5]));
    }
}
