//! C2: a bounded-size append-only file holding a contiguous `[firstId,
//! lastId]` range of log records.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{debug, warn};

use crate::error::{DecodeForward, WalError};
use crate::record::{self, LogRecord};

pub const MAGIC: u32 = 0x5741_4C31; // "WAL1"
const HEADER_LEN: u64 = 8 + 8 + 4 + 8;

/// The fixed-size header written at the start of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub first_log_id: u64,
    pub term: u64,
    pub created_at_millis: u64,
}

impl Header {
    fn write<W: Write>(&self, mut out: W) -> io::Result<()> {
        out.write_all(&self.first_log_id.to_le_bytes())?;
        out.write_all(&self.term.to_le_bytes())?;
        out.write_all(&MAGIC.to_le_bytes())?;
        out.write_all(&self.created_at_millis.to_le_bytes())?;
        Ok(())
    }

    fn read<R: Read>(mut input: R) -> io::Result<Self> {
        let mut buf = [0u8; HEADER_LEN as usize];
        input.read_exact(&mut buf)?;
        let first_log_id = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let term = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let magic = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        if magic != MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad segment magic"));
        }
        let created_at_millis = u64::from_le_bytes(buf[20..28].try_into().unwrap());
        Ok(Self {
            first_log_id,
            term,
            created_at_millis,
        })
    }
}

/// Name of the segment file starting at `first_log_id`: a zero-padded
/// 19-digit decimal with a `.wal` extension.
pub fn file_name(first_log_id: u64) -> String {
    format!("{first_log_id:019}.wal")
}

/// Parse the `firstLogId` encoded in a segment's file name, if it looks
/// like one.
pub fn parse_first_log_id(file_name: &str) -> Option<u64> {
    let stem = file_name.strip_suffix(".wal")?;
    stem.parse().ok()
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// An open segment file, append-ready.
pub struct Segment {
    path: PathBuf,
    header: Header,
    file: File,
    /// Current end-of-file byte offset; also next append position.
    size: u64,
    first_log_id: u64,
    /// `None` for a freshly created, empty segment.
    last_log_id: Option<u64>,
}

impl Segment {
    /// Create a brand-new segment at `dir` with the given `first_log_id`
    /// and the `term` active when it was opened. Fails with
    /// `AlreadyExists` if the file is already there.
    pub fn create(dir: &Path, first_log_id: u64, term: u64) -> io::Result<Self> {
        let path = dir.join(file_name(first_log_id));
        let mut file = OpenOptions::new().write(true).read(true).create_new(true).open(&path)?;
        let header = Header {
            first_log_id,
            term,
            created_at_millis: now_millis(),
        };
        header.write(&mut file)?;
        file.sync_all()?;
        Ok(Self {
            path,
            header,
            file,
            size: HEADER_LEN,
            first_log_id,
            last_log_id: None,
        })
    }

    /// Open an existing segment for appending. Scans backward from EOF to
    /// locate the last good record, truncating any torn tail atomically
    /// before returning.
    ///
    /// Returns `Ok(None)` if the file was header-only (or became empty
    /// after torn-tail repair) — the caller should delete it.
    pub fn open_append(path: &Path) -> io::Result<Option<Self>> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let header = Header::read(&mut file)?;
        let file_len = file.seek(SeekFrom::End(0))?;

        if file_len == HEADER_LEN {
            return Ok(None);
        }

        file.seek(SeekFrom::Start(HEADER_LEN))?;
        let meta = scan_forward(&mut file, header.first_log_id, u64::MAX)?;
        if meta.end_offset == HEADER_LEN {
            // Every record was torn; nothing survives.
            return Ok(None);
        }
        if meta.end_offset != file_len {
            warn!(
                "segment {} has a torn tail at offset {}, truncating to {}",
                path.display(),
                meta.end_offset,
                meta.end_offset
            );
            file.set_len(meta.end_offset)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok(Some(Self {
            path: path.to_path_buf(),
            header,
            file,
            size: meta.end_offset,
            first_log_id: header.first_log_id,
            last_log_id: meta.last_log_id,
        }))
    }

    /// Open an existing segment read-only, scanning it once to learn its
    /// `last_log_id`. Used by recovery for non-terminal segments, where a
    /// torn tail means corruption rather than an in-progress write, and by
    /// plain readers.
    pub fn open_read_only(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().read(true).open(path)?;
        let header = Header::read(&mut file)?;
        let file_len = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(HEADER_LEN))?;
        let meta = scan_forward(&mut file, header.first_log_id, u64::MAX)?;
        if meta.end_offset != file_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("non-terminal segment {} has a torn tail", path.display()),
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
            header,
            file,
            size: meta.end_offset,
            first_log_id: header.first_log_id,
            last_log_id: meta.last_log_id,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn first_log_id(&self) -> u64 {
        self.first_log_id
    }

    pub fn last_log_id(&self) -> Option<u64> {
        self.last_log_id
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.last_log_id.is_none()
    }

    /// Append one record. Fails with `Full` (returned as `Ok(false)`) if
    /// doing so would exceed `max_file_size`; the caller is expected to
    /// roll to a new segment and retry there.
    pub fn append(&mut self, record: &LogRecord, max_file_size: u64) -> io::Result<bool> {
        let encoded = record::encode(record.log_id, record.term, record.cluster_id, &record.payload);
        if self.size + encoded.len() as u64 > max_file_size {
            return Ok(false);
        }
        let mut writer = BufWriter::new(&mut self.file);
        writer.write_all(&encoded)?;
        writer.flush()?;
        self.size += encoded.len() as u64;
        self.last_log_id = Some(record.log_id);
        Ok(true)
    }

    /// Force the OS to persist buffered writes.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }

    /// Iterate records whose id lies in `[from_id, to_id]`, clamped to this
    /// segment's actual range.
    pub fn iterate(&self, from_id: u64, to_id: u64) -> io::Result<SegmentIter> {
        let mut file = OpenOptions::new().read(true).open(&self.path)?;
        let from_id = from_id.max(self.first_log_id);
        file.seek(SeekFrom::Start(HEADER_LEN))?;
        Ok(SegmentIter {
            file,
            from_id,
            to_id,
            done: from_id > to_id,
        })
    }

    /// Physically shrink the file to end exactly after the record whose id
    /// equals `log_id`. `NotFound` if `log_id` is outside this segment's
    /// range.
    pub fn truncate_after(&mut self, log_id: u64) -> Result<(), WalError> {
        let last = self.last_log_id.ok_or(WalError::OutOfRange {
            requested: log_id,
            first: self.first_log_id,
            last: self.first_log_id.saturating_sub(1),
        })?;
        if log_id < self.first_log_id || log_id > last {
            return Err(WalError::OutOfRange {
                requested: log_id,
                first: self.first_log_id,
                last,
            });
        }
        if log_id == last {
            return Ok(());
        }

        let mut file = OpenOptions::new().read(true).open(&self.path).map_err(WalError::Io)?;
        file.seek(SeekFrom::Start(HEADER_LEN)).map_err(WalError::Io)?;
        let meta = scan_forward(&mut file, self.first_log_id, log_id).map_err(WalError::Io)?;

        self.file.set_len(meta.end_offset).map_err(WalError::Io)?;
        self.file.sync_all().map_err(WalError::Io)?;
        self.file.seek(SeekFrom::End(0)).map_err(WalError::Io)?;
        self.size = meta.end_offset;
        self.last_log_id = meta.last_log_id;
        Ok(())
    }

    /// Create a filesystem hard link of this segment under `target_dir`.
    pub fn hard_link_to(&self, target_dir: &Path) -> io::Result<()> {
        self.file.sync_all()?;
        let dest = target_dir.join(self.path.file_name().expect("segment path has a file name"));
        fs::hard_link(&self.path, dest)
    }

    pub fn delete(self) -> io::Result<()> {
        drop(self.file);
        fs::remove_file(&self.path)
    }
}

struct ScanResult {
    end_offset: u64,
    last_log_id: Option<u64>,
}

/// Scan forward from the reader's current position (assumed to be right
/// after the header) until EOF, a torn tail, or `stop_at_id` (inclusive) is
/// reached. Returns the byte offset right after the last good record and
/// that record's id.
fn scan_forward<R: Read + Seek>(reader: &mut R, first_log_id: u64, stop_at_id: u64) -> io::Result<ScanResult> {
    let mut end_offset = reader.stream_position()?;
    let mut last_log_id = None;
    let mut expected = first_log_id;

    loop {
        let before = reader.stream_position()?;
        match record::decode_forward(reader)? {
            DecodeForward::EndOfStream => break,
            DecodeForward::Torn(_) => {
                reader.seek(SeekFrom::Start(before))?;
                break;
            }
            DecodeForward::Record(r) => {
                if r.log_id != expected {
                    debug!("segment scan: expected log id {expected}, found {}", r.log_id);
                    reader.seek(SeekFrom::Start(before))?;
                    break;
                }
                end_offset = reader.stream_position()?;
                last_log_id = Some(r.log_id);
                if r.log_id == stop_at_id {
                    break;
                }
                expected += 1;
            }
        }
    }

    Ok(ScanResult { end_offset, last_log_id })
}

/// Ordered, forward iterator over a segment's records.
pub struct SegmentIter {
    file: File,
    from_id: u64,
    to_id: u64,
    done: bool,
}

impl Iterator for SegmentIter {
    type Item = io::Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match record::decode_forward(&mut self.file) {
                Ok(DecodeForward::EndOfStream) => {
                    self.done = true;
                    return None;
                }
                Ok(DecodeForward::Torn(_)) => {
                    self.done = true;
                    return None;
                }
                Ok(DecodeForward::Record(r)) => {
                    if r.log_id < self.from_id {
                        continue;
                    }
                    if r.log_id > self.to_id {
                        self.done = true;
                        return None;
                    }
                    return Some(Ok(r));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
