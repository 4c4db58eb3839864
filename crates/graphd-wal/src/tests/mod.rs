//! Whole-crate tests exercising [`crate::Wal`] through its public API.
//! Longer end-to-end scenarios live in `tests/scenarios.rs` (integration
//! tests, since they need a real temp directory and the full public
//! surface); these are unit-level sanity checks kept close to the code.


use tempfile::tempdir;

use crate::{accept_all_clusters, Policy, Wal};

fn open(dir: &std::path::Path, policy: Policy) -> Wal {
    Wal::open(dir, policy, accept_all_clusters()).unwrap()
}

#[test]
fn empty_wal_starts_at_one() {
    let dir = tempdir().unwrap();
    let wal = open(dir.path(), Policy::default());
    assert_eq!(wal.last_log_id(), 0);
    assert_eq!(wal.first_log_id(), 0);

    assert!(wal.append_log(1, 0, 0, b"a".to_vec()).unwrap().is_ok());
    assert_eq!(wal.last_log_id(), 1);
}

#[test]
fn reject_id_zero_on_empty_wal() {
    let dir = tempdir().unwrap();
    let wal = open(dir.path(), Policy::default());
    let outcome = wal.append_log(0, 0, 0, b"x".to_vec()).unwrap();
    assert_eq!(outcome, crate::error::AppendOutcome::OutOfSequence);
}

#[test]
fn reject_out_of_sequence() {
    let dir = tempdir().unwrap();
    let wal = open(dir.path(), Policy::default());
    wal.append_log(1, 0, 0, b"a".to_vec()).unwrap();
    let outcome = wal.append_log(3, 0, 0, b"b".to_vec()).unwrap();
    assert_eq!(outcome, crate::error::AppendOutcome::OutOfSequence);
}

#[test]
fn cluster_filter_rejects() {
    let dir = tempdir().unwrap();
    let wal = Wal::open(dir.path(), Policy::default(), std::sync::Arc::new(|c: u64| c == 1)).unwrap();
    let outcome = wal.append_log(1, 0, 2, b"a".to_vec()).unwrap();
    assert_eq!(outcome, crate::error::AppendOutcome::Rejected);
    let outcome = wal.append_log(1, 0, 1, b"a".to_vec()).unwrap();
    assert!(outcome.is_ok());
}
