#[cfg(feature = "cli")]
use clap::Args;

/// Bounds on the chain coordinator's behavior under contention and
/// leadership churn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct ChainPolicy {
    /// How many times a mutation follows a `LeaderChanged` hint before
    /// giving up with `LeaderUnreachable`. Each attempt — whether or not
    /// the hint repeats — consumes one retry.
    #[cfg_attr(feature = "cli", arg(long = "max_retry_times_admin_op", default_value_t = DEFAULT_MAX_RETRY_TIMES_ADMIN_OP))]
    pub max_retry_times_admin_op: u32,
}

pub const DEFAULT_MAX_RETRY_TIMES_ADMIN_OP: u32 = 3;

impl Default for ChainPolicy {
    fn default() -> Self {
        Self {
            max_retry_times_admin_op: DEFAULT_MAX_RETRY_TIMES_ADMIN_OP,
        }
    }
}
