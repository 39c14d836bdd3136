//! Controller loop and reconcile tuning.

/// Seconds between two controller passes.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;

/// Upper bound on a single StatefulSet sync, in seconds.
pub const DEFAULT_SYNC_TIMEOUT_SECS: u64 = 30;

/// Revisions kept beyond the live ones when a set does not say otherwise.
pub const DEFAULT_REVISION_HISTORY_LIMIT: u32 = 10;

/// Largest batch the slow-start executor will run at once.
pub const MAX_BATCH_SIZE: usize = 500;

/// Number of hex characters of the revision hash used in revision names.
pub const REVISION_HASH_LEN: usize = 10;
