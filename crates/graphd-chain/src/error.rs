use thiserror::Error;

/// Error taxonomy for the chain mutation coordinator, split three ways
/// between transient-remote, terminal-remote, and local-fatal failures.
/// Torn-tail-style integrity errors never reach this type; they are
/// handled inside `graphd-wal` and never surfaced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Terminal remote: the peer's term is ahead of ours. The coordinator
    /// rolls back the local effect and the prime marker.
    #[error("outdated term")]
    OutdatedTerm,

    /// Terminal remote: the peer rejected the mutation payload itself.
    #[error("invalid payload")]
    InvalidPayload,

    /// Terminal remote: a concurrent mutation already holds this edge key's
    /// lock. Coordinators fail fast on contention rather than queuing.
    #[error("conflicting mutation on the same edge key")]
    Conflict,

    /// Local fatal: the underlying KV or WAL storage rejected the write.
    #[error("storage full")]
    StorageFull,

    /// Local fatal: the WAL backing this partition is corrupt.
    #[error("wal is corrupt")]
    Corrupt,

    /// Transient remote: the RPC to the peer leader did not complete
    /// (deadline expired, connection error, or no decision was reached).
    #[error("rpc to peer leader failed or timed out")]
    RpcFailure,

    /// Transient remote: the peer is not the current leader; retry against
    /// the hint.
    #[error("leader changed, hint={hint:?}")]
    LeaderChanged { hint: Option<String> },

    /// All `maxRetryTimesAdminOp` hint-following retries were exhausted.
    #[error("leader unreachable after exhausting retries")]
    LeaderUnreachable,
}

impl From<graphd_wal::error::WalError> for ChainError {
    fn from(e: graphd_wal::error::WalError) -> Self {
        match e {
            graphd_wal::error::WalError::StorageFull { .. } => ChainError::StorageFull,
            graphd_wal::error::WalError::Corrupt { .. } => ChainError::Corrupt,
            graphd_wal::error::WalError::OutOfRange { .. } => ChainError::Corrupt,
            graphd_wal::error::WalError::Io(_) => ChainError::StorageFull,
        }
    }
}
