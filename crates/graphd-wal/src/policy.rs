//! Explicit configuration passed at construction: no module-level state,
//! one `Policy` struct threaded through every WAL instance.

#[cfg(feature = "cli")]
use clap::Args;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-partition WAL configuration.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "cli", derive(Args))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    /// Maximum size, in bytes, a single segment file may grow to before a
    /// new one is rolled.
    #[cfg_attr(feature = "cli", arg(long = "wal_file_size", default_value_t = Policy::DEFAULT_FILE_SIZE))]
    pub file_size: u64,

    /// Maximum size, in bytes, of a single in-memory buffer before it is
    /// sealed and handed to the flusher.
    #[cfg_attr(feature = "cli", arg(long = "wal_buffer_size", default_value_t = Policy::DEFAULT_BUFFER_SIZE))]
    pub buffer_size: usize,

    /// Maximum number of sealed-but-unflushed buffers before appenders
    /// experience backpressure.
    #[cfg_attr(feature = "cli", arg(long = "wal_max_buffers", default_value_t = Policy::DEFAULT_MAX_BUFFERS))]
    pub max_buffers: usize,

    /// Segments whose newest entry is older than this are eligible for TTL
    /// collection. Default 14400 seconds (4h).
    #[cfg_attr(feature = "cli", arg(long = "wal_ttl", default_value_t = Policy::DEFAULT_TTL_SECONDS))]
    pub ttl_seconds: u64,
}

impl Policy {
    pub const DEFAULT_FILE_SIZE: u64 = 256 * 1024 * 1024;
    pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024 * 1024;
    pub const DEFAULT_MAX_BUFFERS: usize = 4;
    pub const DEFAULT_TTL_SECONDS: u64 = 14_400;
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            file_size: Self::DEFAULT_FILE_SIZE,
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            max_buffers: Self::DEFAULT_MAX_BUFFERS,
            ttl_seconds: Self::DEFAULT_TTL_SECONDS,
        }
    }
}

/// A predicate installed at `open` that decides whether a record's
/// `clusterId` may be appended to this WAL, used to filter out
/// multi-cluster replication traffic this node shouldn't durably record.
pub type ClusterFilter = std::sync::Arc<dyn Fn(u64) -> bool + Send + Sync>;

/// The permissive default: accept every `clusterId`.
pub fn accept_all_clusters() -> ClusterFilter {
    std::sync::Arc::new(|_| true)
}
