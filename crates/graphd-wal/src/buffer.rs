//! C3: the bounded in-memory staging area between appenders and the disk
//! flusher.
//!
//! Concurrency contract: appenders and the flusher serialize on the ring
//! under a single mutex; readers take a snapshot (a clone of the relevant
//! records) so they observe a consistent `[firstId, lastId]` even while a
//! concurrent append is in flight.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::record::LogRecord;

/// One fixed-capacity buffer; the newest buffer in a [`BufferRing`] is the
/// sole append target, all others are sealed and waiting to be flushed.
#[derive(Debug, Default)]
pub struct Buffer {
    records: Vec<Arc<LogRecord>>,
    size_bytes: usize,
}

impl Buffer {
    pub fn first_log_id(&self) -> Option<u64> {
        self.records.first().map(|r| r.log_id)
    }

    pub fn last_log_id(&self) -> Option<u64> {
        self.records.last().map(|r| r.log_id)
    }

    pub fn records(&self) -> &[Arc<LogRecord>] {
        &self.records
    }
}

struct Inner {
    buffers: VecDeque<Buffer>,
    capacity_bytes: usize,
    max_buffers: usize,
}

impl Inner {
    fn newest_len(&self) -> usize {
        self.buffers.back().map(|b| b.size_bytes).unwrap_or(0)
    }
}

/// A bounded sequence of fixed-capacity buffers absorbing writes ahead of
/// the flusher.
pub struct BufferRing {
    inner: Mutex<Inner>,
    room_available: Condvar,
}

impl BufferRing {
    /// `buffer_capacity_bytes` bounds a single buffer; `max_buffers` bounds
    /// how many sealed-but-unflushed buffers may accumulate before
    /// appenders block (backpressure).
    pub fn new(buffer_capacity_bytes: usize, max_buffers: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                buffers: VecDeque::new(),
                capacity_bytes: buffer_capacity_bytes,
                max_buffers: max_buffers.max(1),
            }),
            room_available: Condvar::new(),
        }
    }

    /// Append `record` to the newest buffer, sealing and rotating in a
    /// fresh one if it would overflow `buffer_capacity_bytes`. Blocks if the
    /// ring already holds `max_buffers` sealed buffers awaiting the
    /// flusher.
    ///
    /// Returns `true` if this append caused the *previous* newest buffer to
    /// seal (i.e. a flush should be triggered).
    pub fn append_record(&self, record: LogRecord) -> bool {
        self.append_record_inner(record, true).expect("blocking append never reports backpressure")
    }

    /// Non-blocking variant: returns `None` (backpressure) instead of
    /// waiting for the flusher if the ring is already at `max_buffers`.
    pub fn try_append_record(&self, record: LogRecord) -> Option<bool> {
        self.append_record_inner(record, false)
    }

    fn append_record_inner(&self, record: LogRecord, block: bool) -> Option<bool> {
        let record = Arc::new(record);
        let record_size = record.encoded_len() as usize;
        let mut guard = self.inner.lock().unwrap();
        let mut sealed = false;

        if guard.buffers.is_empty() {
            guard.buffers.push_back(Buffer::default());
        } else if guard.newest_len() + record_size > guard.capacity_bytes && guard.newest_len() > 0 {
            // Seal the current newest and roll a new one; block (or refuse)
            // if that would exceed `max_buffers` sealed-and-unflushed
            // buffers.
            if guard.buffers.len() >= guard.max_buffers {
                if !block {
                    return None;
                }
                while guard.buffers.len() >= guard.max_buffers {
                    guard = self.room_available.wait(guard).unwrap();
                }
            }
            guard.buffers.push_back(Buffer::default());
            sealed = true;
        }

        let newest = guard.buffers.back_mut().unwrap();
        newest.records.push(record);
        newest.size_bytes += record_size;
        Some(sealed)
    }

    /// Remove and return the oldest sealed buffer (i.e. any buffer except
    /// the current newest), if one exists. Called by the flusher; after a
    /// successful persist the caller should drop the returned buffer, which
    /// wakes any appenders blocked on backpressure.
    pub fn take_oldest_sealed(&self) -> Option<Buffer> {
        let mut guard = self.inner.lock().unwrap();
        if guard.buffers.len() > 1 {
            let buf = guard.buffers.pop_front();
            self.room_available.notify_all();
            buf
        } else {
            None
        }
    }

    /// Seal the current newest buffer even if it is under capacity (used
    /// when closing the WAL so the flusher can drain everything).
    pub fn seal_newest(&self) {
        let mut guard = self.inner.lock().unwrap();
        if !guard.buffers.is_empty() {
            guard.buffers.push_back(Buffer::default());
        }
    }

    /// The smallest `logId` currently buffered, if any.
    pub fn oldest_buffered_id(&self) -> Option<u64> {
        let guard = self.inner.lock().unwrap();
        guard.buffers.iter().find_map(|b| b.first_log_id())
    }

    /// The largest `logId` currently buffered, if any.
    pub fn newest_buffered_id(&self) -> Option<u64> {
        let guard = self.inner.lock().unwrap();
        guard.buffers.iter().rev().find_map(|b| b.last_log_id())
    }

    /// Snapshot every record with id in `[from_id, to_id]` currently held in
    /// the ring, in order. Empty if `from_id` precedes the oldest buffered
    /// id (the caller must fall back to segments).
    pub fn snapshot(&self, from_id: u64, to_id: u64) -> Vec<Arc<LogRecord>> {
        let guard = self.inner.lock().unwrap();
        guard
            .buffers
            .iter()
            .flat_map(|b| b.records.iter())
            .filter(|r| r.log_id >= from_id && r.log_id <= to_id)
            .cloned()
            .collect()
    }

    /// Drop all in-memory records with id >= `log_id` (used by rollback).
    pub fn discard_from(&self, log_id: u64) {
        let mut guard = self.inner.lock().unwrap();
        for buf in guard.buffers.iter_mut() {
            buf.records.retain(|r| r.log_id < log_id);
            buf.size_bytes = buf.records.iter().map(|r| r.encoded_len() as usize).sum();
        }
        guard.buffers.retain(|b| !b.records.is_empty());
        self.room_available.notify_all();
    }

    pub fn is_empty(&self) -> bool {
        let guard = self.inner.lock().unwrap();
        guard.buffers.iter().all(|b| b.records.is_empty())
    }
}
