//! The peer leader is an external collaborator, reached over RPC: this
//! module only states the request/response shapes and the trait the
//! coordinator drives. No transport is implemented here.

use futures::future::BoxFuture;

use crate::error::ChainError;
use crate::prime::EdgeKey;

/// The mutation kinds a chain link can carry. Payloads are left as opaque
/// bytes — encoding them is a concern of the layer above this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    AddEdges { edges: Vec<(EdgeKey, Vec<u8>)> },
    UpdateEdge { edge: EdgeKey, payload: Vec<u8> },
    DeleteEdges { edges: Vec<EdgeKey> },
}

impl Mutation {
    /// The edge keys touched by this mutation, for locking and for
    /// deriving prime/doublePrime markers.
    pub fn edge_keys(&self) -> Vec<&EdgeKey> {
        match self {
            Mutation::AddEdges { edges } => edges.iter().map(|(k, _)| k).collect(),
            Mutation::UpdateEdge { edge, .. } => vec![edge],
            Mutation::DeleteEdges { edges } => edges.iter().collect(),
        }
    }
}

/// What is sent to the next link in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainRequest {
    pub space_id: u64,
    pub partition_id: u32,
    pub term_id: u64,
    pub mutation: Mutation,
}

/// What the next link answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainResponse {
    Succeeded,
    OutdatedTerm,
    LeaderChanged { hint: Option<String> },
    Conflict,
    InvalidPayload,
}

/// The coordinator's view of the next hop in the chain. A real
/// implementation talks gRPC/Thrift to a peer process; tests use an
/// in-memory stand-in. `BoxFuture` keeps the trait object-safe without
/// pulling in an `async-trait`-style macro the rest of the workspace
/// doesn't otherwise depend on.
pub trait RemoteLeader: Send + Sync {
    fn process_remote<'a>(&'a self, request: ChainRequest) -> BoxFuture<'a, Result<ChainResponse, ChainError>>;
}

fn push_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn take_bytes(buf: &[u8], at: &mut usize) -> Option<Vec<u8>> {
    let len = u32::from_be_bytes(buf.get(*at..*at + 4)?.try_into().ok()?) as usize;
    *at += 4;
    let out = buf.get(*at..*at + len)?.to_vec();
    *at += len;
    Some(out)
}

/// Durability payload for a [`Mutation`], written to the write-ahead log
/// before the remote hop is attempted. Deliberately hand-rolled rather
/// than pulled in via `serde`: the WAL treats this as an opaque blob and
/// only this module ever decodes it back.
pub fn encode_mutation(mutation: &Mutation) -> Vec<u8> {
    let mut buf = Vec::new();
    match mutation {
        Mutation::AddEdges { edges } => {
            buf.push(0);
            buf.extend_from_slice(&(edges.len() as u32).to_be_bytes());
            for (key, payload) in edges {
                push_bytes(&mut buf, key.as_bytes());
                push_bytes(&mut buf, payload);
            }
        }
        Mutation::UpdateEdge { edge, payload } => {
            buf.push(1);
            push_bytes(&mut buf, edge.as_bytes());
            push_bytes(&mut buf, payload);
        }
        Mutation::DeleteEdges { edges } => {
            buf.push(2);
            buf.extend_from_slice(&(edges.len() as u32).to_be_bytes());
            for key in edges {
                push_bytes(&mut buf, key.as_bytes());
            }
        }
    }
    buf
}

pub fn decode_mutation(buf: &[u8]) -> Option<Mutation> {
    let mut at = 0usize;
    let tag = *buf.first()?;
    at += 1;
    match tag {
        0 => {
            let count = u32::from_be_bytes(buf.get(at..at + 4)?.try_into().ok()?) as usize;
            at += 4;
            let mut edges = Vec::with_capacity(count);
            for _ in 0..count {
                let key = EdgeKey(take_bytes(buf, &mut at)?);
                let payload = take_bytes(buf, &mut at)?;
                edges.push((key, payload));
            }
            Some(Mutation::AddEdges { edges })
        }
        1 => {
            let edge = EdgeKey(take_bytes(buf, &mut at)?);
            let payload = take_bytes(buf, &mut at)?;
            Some(Mutation::UpdateEdge { edge, payload })
        }
        2 => {
            let count = u32::from_be_bytes(buf.get(at..at + 4)?.try_into().ok()?) as usize;
            at += 4;
            let mut edges = Vec::with_capacity(count);
            for _ in 0..count {
                edges.push(EdgeKey(take_bytes(buf, &mut at)?));
            }
            Some(Mutation::DeleteEdges { edges })
        }
        _ => None,
    }
}
