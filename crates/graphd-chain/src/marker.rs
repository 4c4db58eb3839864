//! Wire format stored at a `prime`/`doublePrime` key: what the coordinator
//! needs to either retry the remote hop or undo the local effect, without
//! re-deriving either from anything else in the system. The distilled
//! description of the marker only says it records "the mutation is
//! in flight" — this crate decides the payload has to be self-contained
//! so a crash-recovered resume pass never needs more than the KV store.

use crate::rpc::Mutation;

/// A single storage key's value before the local effect was applied,
/// `None` meaning the key did not exist.
pub type UndoEntry = (Vec<u8>, Option<Vec<u8>>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerPayload {
    pub term_id: u64,
    pub mutation: Mutation,
    pub undo: Vec<UndoEntry>,
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

pub fn encode_marker(payload: &MarkerPayload) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&payload.term_id.to_be_bytes());
    push_bytes(&mut buf, &crate::rpc::encode_mutation(&payload.mutation));
    buf.extend_from_slice(&(payload.undo.len() as u32).to_be_bytes());
    for (key, old) in &payload.undo {
        push_bytes(&mut buf, key);
        match old {
            Some(v) => {
                buf.push(1);
                push_bytes(&mut buf, v);
            }
            None => buf.push(0),
        }
    }
    buf
}

pub fn decode_marker(buf: &[u8]) -> Option<MarkerPayload> {
    let mut at = 0usize;
    let term_id = u64::from_be_bytes(buf.get(at..at + 8)?.try_into().ok()?);
    at += 8;
    let mutation_bytes = take_bytes(buf, &mut at)?;
    let mutation = crate::rpc::decode_mutation(&mutation_bytes)?;
    let count = u32::from_be_bytes(buf.get(at..at + 4)?.try_into().ok()?) as usize;
    at += 4;
    let mut undo = Vec::with_capacity(count);
    for _ in 0..count {
        let key = take_bytes(buf, &mut at)?;
        let has_value = *buf.get(at)?;
        at += 1;
        let value = if has_value == 1 { Some(take_bytes(buf, &mut at)?) } else { None };
        undo.push((key, value));
    }
    Some(MarkerPayload { term_id, mutation, undo })
}
