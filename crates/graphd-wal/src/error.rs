use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can be surfaced to a caller of [`crate::Wal`].
///
/// [`Corrupt`] and [`OutOfRange`] are returned to the caller; a torn tail
/// on its own is repaired silently during recovery and never constructs
/// this type.
///
/// [`Corrupt`]: WalError::Corrupt
/// [`OutOfRange`]: WalError::OutOfRange
#[derive(Debug, Error)]
pub enum WalError {
    /// The segment sequence has a gap that torn-tail recovery could not
    /// close.
    #[error("wal is corrupt: gap before segment starting at {gap_before}")]
    Corrupt { gap_before: u64 },

    /// `rollbackToLog`/`iterator` was asked for an id outside the WAL's
    /// current range.
    #[error("log id {requested} is out of range [{first}, {last}]")]
    OutOfRange { requested: u64, first: u64, last: u64 },

    /// A segment append failed because the underlying filesystem is full,
    /// or the OS refused the write.
    #[error("storage full while writing segment {segment}")]
    StorageFull { segment: PathBuf, #[source] source: io::Error },

    /// Any other I/O failure (permissions, missing directory, ...).
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Outcome of a single [`crate::Wal::append_log`] call.
///
/// Modeled as a sum type rather than a boolean-plus-error, per the Design
/// Notes' "exceptions-for-control-flow" re-architecture: callers match on
/// the outcome instead of inspecting an error for control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Accepted; carries the assigned (i.e. requested) `logId`.
    Ok(u64),
    /// Rejected by the cluster-id predicate installed at `open`.
    Rejected,
    /// `id` did not equal `lastLogId + 1` (or `1` for an empty WAL).
    OutOfSequence,
    /// The buffer ring is saturated and the flusher could not keep up.
    Backpressure,
}

impl AppendOutcome {
    /// `true` iff the record was accepted.
    pub fn is_ok(&self) -> bool {
        matches!(self, AppendOutcome::Ok(_))
    }
}

/// Outcome of WAL recovery at `open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    Ok { first_id: u64, last_id: u64 },
    Corrupt { gap_before: u64 },
}

/// A record failed to decode because its tail (checksum and/or redundant
/// length suffix) did not match. Never surfaced to callers: segment
/// recovery truncates the file at `offset` and continues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TornTail {
    pub offset: u64,
}

/// Distinguishes a genuine decode failure from a clean end of the readable
/// range during forward iteration.
#[derive(Debug)]
pub(crate) enum DecodeForward {
    Record(crate::record::LogRecord),
    Torn(TornTail),
    EndOfStream,
}
