//! C1: the on-disk framing of a single log record.
//!
//! Layout (all fixed-width fields little-endian):
//!
//! ```text
//! lenPrefix(u32) || logId(u64) || term(u64) || clusterId(u64)
//!     || payloadLen(u32) || payload(payloadLen) || tailChecksum(u32)
//!     || lenSuffix(u32)
//! ```
//!
//! `lenPrefix` and `lenSuffix` both carry the length, in bytes, of
//! `body || tailChecksum` — the redundant bracket that lets recovery walk
//! the log backward from EOF without a separate index. `tailChecksum` is a
//! CRC32C over `logId || term || clusterId || payloadLen || payload`.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{DecodeForward, TornTail};

/// Fixed-width portion of a record, excluding the payload and the length
/// brackets.
const FIXED_LEN: usize = 8 + 8 + 8 + 4; // logId + term + clusterId + payloadLen
const CHECKSUM_LEN: usize = 4;
const BRACKET_LEN: usize = 4;

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub log_id: u64,
    pub term: u64,
    pub cluster_id: u64,
    pub payload: Vec<u8>,
}

impl LogRecord {
    /// Total on-disk size of this record once encoded.
    pub fn encoded_len(&self) -> u64 {
        encoded_len(self.payload.len())
    }
}

/// Total on-disk size of a record carrying a payload of `payload_len` bytes.
pub fn encoded_len(payload_len: usize) -> u64 {
    (BRACKET_LEN + FIXED_LEN + payload_len + CHECKSUM_LEN + BRACKET_LEN) as u64
}

/// Encode `(log_id, term, cluster_id, payload)` to its on-disk bytes.
pub fn encode(log_id: u64, term: u64, cluster_id: u64, payload: &[u8]) -> Vec<u8> {
    let body_len = (FIXED_LEN + payload.len()) as u32;
    let bracket = body_len + CHECKSUM_LEN as u32;

    let mut buf = Vec::with_capacity(encoded_len(payload.len()) as usize);
    buf.extend_from_slice(&bracket.to_le_bytes());
    buf.extend_from_slice(&log_id.to_le_bytes());
    buf.extend_from_slice(&term.to_le_bytes());
    buf.extend_from_slice(&cluster_id.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);

    let checksum = crc32c::crc32c(&buf[BRACKET_LEN..]);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf.extend_from_slice(&bracket.to_le_bytes());
    buf
}

/// Read one record forward from `reader`, whose position is assumed to sit
/// exactly at the start of a record (or at EOF).
///
/// `reader` must also implement [`Seek`] so a torn tail can be localized to
/// the byte offset at which it started.
pub(crate) fn decode_forward<R: Read + Seek>(reader: &mut R) -> io::Result<DecodeForward> {
    let start = reader.stream_position()?;

    let mut bracket_buf = [0u8; BRACKET_LEN];
    match read_exact_or_eof(reader, &mut bracket_buf)? {
        false => return Ok(DecodeForward::EndOfStream),
        true => {}
    }
    let bracket = u32::from_le_bytes(bracket_buf) as usize;
    if bracket < FIXED_LEN + CHECKSUM_LEN {
        return Ok(DecodeForward::Torn(TornTail { offset: start }));
    }
    let payload_len_in_bracket = bracket - FIXED_LEN - CHECKSUM_LEN;

    let mut body = vec![0u8; bracket - CHECKSUM_LEN];
    if !read_exact_or_eof(reader, &mut body)? {
        return Ok(DecodeForward::Torn(TornTail { offset: start }));
    }

    let mut checksum_buf = [0u8; CHECKSUM_LEN];
    if !read_exact_or_eof(reader, &mut checksum_buf)? {
        return Ok(DecodeForward::Torn(TornTail { offset: start }));
    }
    let checksum = u32::from_le_bytes(checksum_buf);

    let mut suffix_buf = [0u8; BRACKET_LEN];
    if !read_exact_or_eof(reader, &mut suffix_buf)? {
        return Ok(DecodeForward::Torn(TornTail { offset: start }));
    }
    let suffix = u32::from_le_bytes(suffix_buf) as usize;

    if suffix != bracket || crc32c::crc32c(&body) != checksum {
        return Ok(DecodeForward::Torn(TornTail { offset: start }));
    }

    let log_id = u64::from_le_bytes(body[0..8].try_into().unwrap());
    let term = u64::from_le_bytes(body[8..16].try_into().unwrap());
    let cluster_id = u64::from_le_bytes(body[16..24].try_into().unwrap());
    let payload_len = u32::from_le_bytes(body[24..28].try_into().unwrap()) as usize;
    if payload_len != payload_len_in_bracket {
        return Ok(DecodeForward::Torn(TornTail { offset: start }));
    }
    let payload = body[FIXED_LEN..].to_vec();

    Ok(DecodeForward::Record(LogRecord {
        log_id,
        term,
        cluster_id,
        payload,
    }))
}

/// Read one record backward from `reader`, whose position is assumed to sit
/// exactly at the end of a record. On success, the reader is left
/// positioned at the start of the record just read (so repeated calls walk
/// further back). Used during recovery to find the last good record in the
/// terminal segment without a forward scan from the start.
pub(crate) fn decode_backward<R: Read + Seek>(reader: &mut R) -> io::Result<Result<LogRecord, TornTail>> {
    let end = reader.stream_position()?;
    if end < BRACKET_LEN as u64 {
        return Ok(Err(TornTail { offset: 0 }));
    }

    reader.seek(SeekFrom::Current(-(BRACKET_LEN as i64)))?;
    let mut suffix_buf = [0u8; BRACKET_LEN];
    reader.read_exact(&mut suffix_buf)?;
    let bracket = u32::from_le_bytes(suffix_buf) as u64;

    let record_total = BRACKET_LEN as u64 + bracket + BRACKET_LEN as u64;
    if record_total > end {
        return Ok(Err(TornTail { offset: 0 }));
    }
    let start = end - record_total;
    reader.seek(SeekFrom::Start(start))?;

    match decode_forward(reader)? {
        DecodeForward::Record(r) => {
            reader.seek(SeekFrom::Start(start))?;
            Ok(Ok(r))
        }
        DecodeForward::Torn(t) => Ok(Err(t)),
        // Cannot happen: `start < end` guarantees at least one bracket's
        // worth of bytes is available, so forward decoding cannot hit EOF
        // immediately. Treat it the same as a torn tail defensively.
        DecodeForward::EndOfStream => Ok(Err(TornTail { offset: start })),
    }
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(filled == 0),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}
