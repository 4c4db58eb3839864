//! End-to-end coordinator scenarios, each against a real temp-dir WAL and
//! an in-memory KV, with the remote peer stood in by a small scripted
//! `RemoteLeader`.

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use graphd_chain::error::ChainError;
use graphd_chain::{
    double_prime_key, edge_storage_key, prime_key, resume_once, ChainCoordinator, ChainPolicy, ChainRequest, ChainResponse, EdgeKey,
    InMemoryTermRegistry, MemoryKv, Mutation, RemoteLeader,
};
use tempfile::tempdir;

/// Replays a fixed script of responses, one per call, holding on the last
/// entry once exhausted. Mirrors the in-crate `ScriptedLeader` but lives
/// here since that one is test-only and not reachable from this crate.
struct ScriptedLeader {
    script: Mutex<Vec<ChainResponse>>,
}

impl ScriptedLeader {
    fn new(script: Vec<ChainResponse>) -> Self {
        Self {
            script: Mutex::new(script),
        }
    }
}

impl RemoteLeader for ScriptedLeader {
    fn process_remote<'a>(&'a self, _request: ChainRequest) -> BoxFuture<'a, Result<ChainResponse, ChainError>> {
        let mut script = self.script.lock().unwrap();
        let resp = if script.len() > 1 {
            script.remove(0)
        } else {
            script.first().cloned().unwrap_or(ChainResponse::Succeeded)
        };
        Box::pin(async move { Ok(resp) })
    }
}

/// Always fails the RPC itself, as if the peer were unreachable.
struct UnreachableLeader;

impl RemoteLeader for UnreachableLeader {
    fn process_remote<'a>(&'a self, _request: ChainRequest) -> BoxFuture<'a, Result<ChainResponse, ChainError>> {
        Box::pin(async { Err(ChainError::RpcFailure) })
    }
}

fn wal(dir: &std::path::Path) -> Arc<graphd_wal::Wal> {
    Arc::new(graphd_wal::Wal::open(dir, graphd_wal::Policy::default(), graphd_wal::accept_all_clusters()).unwrap())
}

#[tokio::test]
async fn scenario_5_coordinator_happy_path() {
    let dir = tempdir().unwrap();
    let kv = Arc::new(MemoryKv::new());
    let coord = ChainCoordinator::new(
        wal(dir.path()),
        Arc::clone(&kv),
        Arc::new(ScriptedLeader::new(vec![ChainResponse::Succeeded])),
        Arc::new(InMemoryTermRegistry::new()),
        ChainPolicy::default(),
    );

    let edge = EdgeKey::new(b"src", 1, 0, b"dst");
    coord
        .coordinate_mutation(
            7,
            0,
            1,
            Mutation::UpdateEdge {
                edge: edge.clone(),
                payload: b"v1".to_vec(),
            },
        )
        .await
        .unwrap();

    assert_eq!(kv.get(&edge_storage_key(0, &edge)), Some(b"v1".to_vec()));
    assert!(kv.get(&prime_key(0, &edge)).is_none());
    assert!(kv.get(&double_prime_key(0, &edge)).is_none());
}

#[tokio::test]
async fn scenario_6_coordinator_rpc_failure_then_resume() {
    let dir = tempdir().unwrap();
    let kv = Arc::new(MemoryKv::new());
    let shared_wal = wal(dir.path());
    let edge = EdgeKey::new(b"src", 1, 0, b"dst");

    let coord = ChainCoordinator::new(
        Arc::clone(&shared_wal),
        Arc::clone(&kv),
        Arc::new(UnreachableLeader),
        Arc::new(InMemoryTermRegistry::new()),
        ChainPolicy::default(),
    );

    let err = coord
        .coordinate_mutation(
            7,
            0,
            1,
            Mutation::UpdateEdge {
                edge: edge.clone(),
                payload: b"v1".to_vec(),
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err, ChainError::RpcFailure);

    // Local effect committed; peer outcome unresolved.
    assert_eq!(kv.get(&edge_storage_key(0, &edge)), Some(b"v1".to_vec()));
    assert!(kv.get(&prime_key(0, &edge)).is_none());
    assert!(kv.get(&double_prime_key(0, &edge)).is_some());

    // The peer is reachable again; a resume pass should settle the marker.
    let recovered = ChainCoordinator::new(
        shared_wal,
        Arc::clone(&kv),
        Arc::new(ScriptedLeader::new(vec![ChainResponse::Succeeded])),
        Arc::new(InMemoryTermRegistry::new()),
        ChainPolicy::default(),
    );
    let report = resume_once(&recovered, 7, 0).await;
    assert_eq!(report.resolved, 1);

    assert_eq!(kv.get(&edge_storage_key(0, &edge)), Some(b"v1".to_vec()));
    assert!(kv.get(&prime_key(0, &edge)).is_none());
    assert!(kv.get(&double_prime_key(0, &edge)).is_none());
}
