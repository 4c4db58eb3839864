//! Chain-replication transaction protocol for cross-partition edge
//! mutations: drives a mutation through a durable local effect, a hand-off
//! to the next link in the chain, and a commit-or-undo decision once that
//! link answers, with a resume pass that reconciles anything left
//! in-flight after a crash or a stalled peer.

mod coordinator;
pub mod error;
mod kv;
mod lock;
mod marker;
mod policy;
mod prime;
mod resume;
mod rpc;
mod term;

pub use crate::coordinator::ChainCoordinator;
pub use crate::kv::{KvStore, MemoryKv, WriteBatch, WriteOp};
pub use crate::lock::{LockGuard, LockTable};
pub use crate::policy::{ChainPolicy, DEFAULT_MAX_RETRY_TIMES_ADMIN_OP};
pub use crate::prime::{double_prime_key, edge_storage_key, prime_key, scan_primes, EdgeKey, Marker, MarkerKind};
pub use crate::resume::{resume_once, spawn_periodic, ResumeReport};
pub use crate::rpc::{ChainRequest, ChainResponse, Mutation, RemoteLeader};
pub use crate::term::{InMemoryTermRegistry, TermRegistry};
