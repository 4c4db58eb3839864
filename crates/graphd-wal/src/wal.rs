//! C4: the per-partition WAL facade, combining the segment file (C2) and
//! the buffer ring (C3) into ordered append, ranged iteration, rollback,
//! trim, snapshot, and crash recovery.
//!
//! Flush is synchronous in this implementation: `append_log` returns only
//! after the record has been written (and `sync_data`'d, per
//! `Options::max_records_in_commit`-style batching left to the caller) to
//! its segment file, not merely buffered. Deferred background-thread
//! flushing is left to the async coordination layer above this crate
//! (see DESIGN.md); this keeps every operation here trivially
//! linearizable behind a single mutex. The buffer ring is retained
//! regardless: a read cache that lets `iterator` serve recent ids
//! without touching disk.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::buffer::BufferRing;
use crate::error::{AppendOutcome, WalError};
use crate::policy::{ClusterFilter, Policy};
use crate::record::LogRecord;
use crate::segment::{self, Segment};

/// Read-only metadata about a closed (no longer appendable) segment.
#[derive(Debug, Clone)]
struct SegmentSummary {
    first_log_id: u64,
    last_log_id: u64,
    created_at_millis: u64,
    path: PathBuf,
}

impl From<&Segment> for SegmentSummary {
    fn from(seg: &Segment) -> Self {
        Self {
            first_log_id: seg.first_log_id(),
            last_log_id: seg.last_log_id().expect("closed segment is non-empty"),
            created_at_millis: seg.header().created_at_millis,
            path: seg.path().to_path_buf(),
        }
    }
}

struct WalState {
    /// Closed segments, ascending by `first_log_id`. Never includes `open`.
    closed: VecDeque<SegmentSummary>,
    /// The single appendable segment, or `None` if the WAL has never had a
    /// record appended to it.
    open: Option<Segment>,
    current_term: u64,
    first_log_id: u64,
    last_log_id: u64,
    /// Set once a local-fatal error occurs; further appends are refused.
    fault: Option<String>,
}

impl WalState {
    fn is_empty(&self) -> bool {
        self.last_log_id == 0
    }
}

/// A per-partition write-ahead log.
pub struct Wal {
    dir: PathBuf,
    policy: Policy,
    cluster_filter: ClusterFilter,
    ring: BufferRing,
    state: std::sync::Mutex<WalState>,
}

impl Wal {
    /// Open (or create) the WAL rooted at `dir`. Runs crash recovery:
    /// the terminal segment's torn tail (if any) is silently repaired;
    /// a gap anywhere else in the segment sequence is reported as
    /// [`WalError::Corrupt`].
    pub fn open(dir: impl Into<PathBuf>, policy: Policy, cluster_filter: ClusterFilter) -> Result<Self, WalError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut entries: Vec<(u64, PathBuf)> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                let name = name.to_str()?;
                let first_id = segment::parse_first_log_id(name)?;
                Some((first_id, e.path()))
            })
            .collect();
        entries.sort_by_key(|(id, _)| *id);

        let mut closed: VecDeque<SegmentSummary> = VecDeque::new();
        let mut open: Option<Segment> = None;

        for (idx, (_first_id, path)) in entries.iter().enumerate() {
            let is_last = idx + 1 == entries.len();
            if !is_last {
                match Segment::open_read_only(path) {
                    Ok(seg) => closed.push_back(SegmentSummary::from(&seg)),
                    Err(_) => {
                        return Err(WalError::Corrupt {
                            gap_before: segment::parse_first_log_id(path.file_name().unwrap().to_str().unwrap())
                                .unwrap_or(0),
                        })
                    }
                }
            } else {
                match Segment::open_append(path)? {
                    Some(seg) => open = Some(seg),
                    None => {
                        info!("deleting empty/fully-torn terminal segment {}", path.display());
                        fs::remove_file(path)?;
                        // Promote the previous segment (if any) to terminal.
                        if let Some(prev) = closed.pop_back() {
                            open = Segment::open_append(&prev.path)?;
                        }
                    }
                }
            }
        }

        // Verify contiguity across the whole recovered sequence.
        let mut expected_next: Option<u64> = None;
        for summary in closed.iter() {
            if let Some(exp) = expected_next {
                if summary.first_log_id != exp {
                    warn!("gap in segment sequence before {}", summary.first_log_id);
                    return Err(WalError::Corrupt {
                        gap_before: summary.first_log_id,
                    });
                }
            }
            expected_next = Some(summary.last_log_id + 1);
        }
        if let (Some(exp), Some(seg)) = (expected_next, open.as_ref()) {
            if seg.first_log_id() != exp {
                return Err(WalError::Corrupt {
                    gap_before: seg.first_log_id(),
                });
            }
        }

        let first_log_id = closed.front().map(|s| s.first_log_id).or_else(|| open.as_ref().map(|s| s.first_log_id())).unwrap_or(0);
        let last_log_id = open.as_ref().and_then(|s| s.last_log_id()).unwrap_or(0);
        let current_term = open.as_ref().map(|s| s.header().term).unwrap_or(0);

        Ok(Self {
            dir,
            policy,
            cluster_filter,
            ring: BufferRing::new(policy.buffer_size, policy.max_buffers),
            state: std::sync::Mutex::new(WalState {
                closed,
                open,
                current_term,
                first_log_id,
                last_log_id,
                fault: None,
            }),
        })
    }

    pub fn first_log_id(&self) -> u64 {
        self.state.lock().unwrap().first_log_id
    }

    pub fn last_log_id(&self) -> u64 {
        self.state.lock().unwrap().last_log_id
    }

    /// `None` if healthy; otherwise the fatal error that marked this WAL
    /// unhealthy. Once set, every further append is refused rather than
    /// silently dropping data.
    pub fn fault(&self) -> Option<String> {
        self.state.lock().unwrap().fault.clone()
    }

    /// Append one record. `id` must equal `lastLogId + 1`, or `1` if the
    /// WAL is empty.
    pub fn append_log(&self, id: u64, term: u64, cluster_id: u64, payload: Vec<u8>) -> Result<AppendOutcome, WalError> {
        let mut guard = self.state.lock().unwrap();

        if let Some(fault) = &guard.fault {
            return Err(WalError::Io(std::io::Error::new(std::io::ErrorKind::Other, fault.clone())));
        }

        let expected = if guard.is_empty() { 1 } else { guard.last_log_id + 1 };
        if id != expected {
            return Ok(AppendOutcome::OutOfSequence);
        }
        if term < guard.current_term {
            return Ok(AppendOutcome::Rejected);
        }
        if !(self.cluster_filter)(cluster_id) {
            return Ok(AppendOutcome::Rejected);
        }

        let record = LogRecord {
            log_id: id,
            term,
            cluster_id,
            payload,
        };

        if guard.open.is_none() {
            let seg = Segment::create(&self.dir, id, term).map_err(WalError::Io)?;
            guard.open = Some(seg);
        }

        let fits = {
            let open = guard.open.as_mut().unwrap();
            open.append(&record, self.policy.file_size)
        };
        let fits = match fits {
            Ok(fits) => fits,
            Err(e) => {
                guard.fault = Some(e.to_string());
                let path = guard.open.as_ref().unwrap().path().to_path_buf();
                return Err(WalError::StorageFull { segment: path, source: e });
            }
        };

        if !fits {
            // Roll: seal the current open segment, start a fresh one at
            // this record's id.
            let sealed = guard.open.take().unwrap();
            guard.closed.push_back(SegmentSummary::from(&sealed));
            let mut fresh = Segment::create(&self.dir, id, term).map_err(WalError::Io)?;
            match fresh.append(&record, self.policy.file_size) {
                Ok(true) => {}
                Ok(false) => {
                    let msg = format!("record {} does not fit in an empty segment", id);
                    guard.fault = Some(msg.clone());
                    return Err(WalError::StorageFull {
                        segment: fresh.path().to_path_buf(),
                        source: std::io::Error::new(std::io::ErrorKind::Other, msg),
                    });
                }
                Err(e) => {
                    guard.fault = Some(e.to_string());
                    let path = fresh.path().to_path_buf();
                    return Err(WalError::StorageFull { segment: path, source: e });
                }
            }
            guard.open = Some(fresh);
        }

        self.ring.append_record(record);
        // Flush already happened synchronously above, so a sealed buffer
        // carries no further obligation beyond bounding memory use: drain
        // it immediately rather than waiting for a background flusher that
        // doesn't exist in this design.
        self.ring.take_oldest_sealed();

        if guard.first_log_id == 0 {
            guard.first_log_id = id;
        }
        guard.last_log_id = id;
        guard.current_term = guard.current_term.max(term);

        Ok(AppendOutcome::Ok(id))
    }

    /// Iterate records with id in `[from_id, to_id]`. Serves from the
    /// buffer ring when the whole range is resident there, else walks
    /// segments in order.
    pub fn iterator(&self, from_id: u64, to_id: u64) -> Result<LogIter, WalError> {
        let guard = self.state.lock().unwrap();
        if guard.is_empty() || from_id > to_id || from_id > guard.last_log_id || to_id < guard.first_log_id {
            return Ok(LogIter {
                records: Vec::new().into_iter(),
            });
        }
        let from_id = from_id.max(guard.first_log_id);
        let to_id = to_id.min(guard.last_log_id);

        if let Some(oldest) = self.ring.oldest_buffered_id() {
            if oldest <= from_id {
                let snap = self.ring.snapshot(from_id, to_id);
                return Ok(LogIter {
                    records: snap.iter().map(|r| (**r).clone()).collect::<Vec<_>>().into_iter(),
                });
            }
        }

        let mut out = Vec::new();
        for summary in guard.closed.iter() {
            if summary.last_log_id < from_id || summary.first_log_id > to_id {
                continue;
            }
            let seg = Segment::open_read_only(&summary.path).map_err(WalError::Io)?;
            for rec in seg.iterate(from_id, to_id).map_err(WalError::Io)? {
                out.push(rec.map_err(WalError::Io)?);
            }
        }
        if let Some(open) = guard.open.as_ref() {
            if open.first_log_id() <= to_id {
                let capped_to = to_id.min(open.last_log_id().unwrap_or(open.first_log_id()));
                for rec in open.iterate(from_id, capped_to).map_err(WalError::Io)? {
                    out.push(rec.map_err(WalError::Io)?);
                }
            }
        }
        Ok(LogIter { records: out.into_iter() })
    }

    /// Truncate the WAL so that `lastLogId == id`. Deletes any now-empty
    /// segments. Excludes concurrent appenders for its duration (the
    /// single `state` mutex).
    pub fn rollback_to_log(&self, id: u64) -> Result<(), WalError> {
        let mut guard = self.state.lock().unwrap();
        if id > guard.last_log_id {
            return Err(WalError::OutOfRange {
                requested: id,
                first: guard.first_log_id,
                last: guard.last_log_id,
            });
        }
        if id == guard.last_log_id {
            return Ok(());
        }

        self.ring.discard_from(id + 1);

        if id == 0 {
            if let Some(seg) = guard.open.take() {
                seg.delete().map_err(WalError::Io)?;
            }
            while let Some(summary) = guard.closed.pop_back() {
                fs::remove_file(&summary.path).map_err(WalError::Io)?;
            }
            guard.first_log_id = 0;
            guard.last_log_id = 0;
            return Ok(());
        }

        // Does `id` live in the open segment?
        let open_contains = guard.open.as_ref().map(|s| s.first_log_id() <= id).unwrap_or(false);
        if open_contains {
            let open = guard.open.as_mut().unwrap();
            open.truncate_after(id)?;
            guard.last_log_id = id;
            return Ok(());
        }

        // `id` lives in a closed segment: delete the open segment and every
        // later closed segment, then reopen the owning one for appending.
        if let Some(seg) = guard.open.take() {
            seg.delete().map_err(WalError::Io)?;
        }
        loop {
            let last = match guard.closed.back() {
                Some(s) => s.clone(),
                None => break,
            };
            if last.first_log_id <= id {
                break;
            }
            fs::remove_file(&last.path).map_err(WalError::Io)?;
            guard.closed.pop_back();
        }
        let owning = guard.closed.pop_back().expect("id must live in some segment");
        let mut reopened = Segment::open_append(&owning.path)
            .map_err(WalError::Io)?
            .expect("owning segment cannot be empty before truncation");
        reopened.truncate_after(id)?;
        guard.open = Some(reopened);
        guard.last_log_id = id;

        Ok(())
    }

    /// Delete whole segments whose `lastLogId < keep_from_id`. Always
    /// retains the segment containing `keep_from_id`, even if its head
    /// falls below it.
    pub fn clean_wal(&self, keep_from_id: u64) -> Result<(), WalError> {
        let mut guard = self.state.lock().unwrap();
        while let Some(front) = guard.closed.front() {
            if front.last_log_id < keep_from_id {
                let front = guard.closed.pop_front().unwrap();
                fs::remove_file(&front.path).map_err(WalError::Io)?;
            } else {
                break;
            }
        }
        guard.first_log_id = guard
            .closed
            .front()
            .map(|s| s.first_log_id)
            .or_else(|| guard.open.as_ref().map(|s| s.first_log_id()))
            .unwrap_or(guard.first_log_id);
        Ok(())
    }

    /// Delete closed segments older than `ttlSeconds`, retaining the
    /// newest such segment as a guard so a reader positioned just past the
    /// cutoff never loses its footing. The open segment is never a
    /// candidate.
    pub fn clean_wal_ttl(&self) -> Result<(), WalError> {
        let mut guard = self.state.lock().unwrap();
        let now_ms = segment::now_millis();
        let cutoff = now_ms.saturating_sub(self.policy.ttl_seconds.saturating_mul(1000));

        let expired: Vec<usize> = guard
            .closed
            .iter()
            .enumerate()
            .filter(|(_, s)| s.created_at_millis < cutoff)
            .map(|(i, _)| i)
            .collect();

        if expired.len() <= 1 {
            return Ok(());
        }
        // Retain the newest expired segment (highest index = latest
        // `first_log_id`); delete the rest, from the front so indices
        // of not-yet-removed entries stay valid.
        let guard_idx = *expired.last().unwrap();
        let mut removed = 0;
        for idx in expired {
            if idx == guard_idx {
                continue;
            }
            let pos = idx - removed;
            let victim = guard.closed.remove(pos).expect("index within bounds");
            fs::remove_file(&victim.path).map_err(WalError::Io)?;
            removed += 1;
        }
        guard.first_log_id = guard
            .closed
            .front()
            .map(|s| s.first_log_id)
            .or_else(|| guard.open.as_ref().map(|s| s.first_log_id()))
            .unwrap_or(guard.first_log_id);
        Ok(())
    }

    /// Hard-link every current segment into `snapshot_dir`, which must not
    /// exist or must be empty. The linked set is an exact, consistent
    /// prefix of the WAL at the instant of the call.
    pub fn link_current_wal(&self, snapshot_dir: &Path) -> Result<(), WalError> {
        let guard = self.state.lock().unwrap();
        if snapshot_dir.exists() {
            let has_entries = fs::read_dir(snapshot_dir).map_err(WalError::Io)?.next().is_some();
            if has_entries {
                return Err(WalError::Io(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "snapshot directory is not empty",
                )));
            }
        } else {
            fs::create_dir_all(snapshot_dir).map_err(WalError::Io)?;
        }

        for summary in guard.closed.iter() {
            let seg = Segment::open_read_only(&summary.path).map_err(WalError::Io)?;
            seg.hard_link_to(snapshot_dir).map_err(WalError::Io)?;
        }
        if let Some(open) = guard.open.as_ref() {
            open.hard_link_to(snapshot_dir).map_err(WalError::Io)?;
        }
        Ok(())
    }

    /// Number of segment files currently backing this WAL. Exposed mainly
    /// for tests asserting on rollover behavior.
    pub fn segment_count(&self) -> usize {
        let guard = self.state.lock().unwrap();
        guard.closed.len() + guard.open.is_some() as usize
    }
}

/// A materialized, ordered sequence of log records. See module docs for why
/// this is eagerly collected rather than a true streaming iterator.
pub struct LogIter {
    records: std::vec::IntoIter<LogRecord>,
}

impl Iterator for LogIter {
    type Item = LogRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.records.next()
    }
}
