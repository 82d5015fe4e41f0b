use std::fmt;

use thiserror::Error;

/// A transaction identifier. Zero is reserved by callers as "no id
/// allocated yet" / "no valid version" (see `get_valid_transaction_id`);
/// a live `TxId` is always `> 0`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TxId(pub u64);

impl TxId {
    /// The sentinel returned by `get_valid_transaction_id` when a key
    /// has no recorded valid version.
    pub const NONE: TxId = TxId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A logical failure the caller must handle. Every Lock Manager,
/// Journal, and Blacklist operation that can fail surfaces one of
/// these; callers never see the coordination service's own errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction {0} is blacklisted")]
    Blacklisted(TxId),

    #[error("transaction {0} is not valid")]
    NotValid(TxId),

    #[error("lock {lock_path} is already held by another transaction")]
    AlreadyHeld { lock_path: String },

    #[error("cannot lock a different root entity in a non-cross-group transaction")]
    CrossGroupViolation,

    #[error("too many groups for this XG transaction")]
    TooManyGroups,

    #[error("unable to release lock for transaction {0}")]
    ReleaseFailed(TxId),

    #[error("exhausted retries running {op}")]
    ExhaustedRetries { op: String },
}

/// The per-call deadline was exceeded before the coordination service
/// replied. Unlike a `TransactionError`, this is never retried by the
/// executor: the caller decides whether to try again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("operation {op} timed out after {deadline_ms}ms")]
pub struct TimeoutError {
    pub op: String,
    pub deadline_ms: u64,
}

/// The single error type every public coordinator method returns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoordError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    #[error(transparent)]
    Timeout(#[from] TimeoutError),
}

