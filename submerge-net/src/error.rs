// The coordination service (a ZooKeeper-like ensemble) raises a small,
// well-known set of faults. We classify them here rather than forwarding
// whatever a concrete client crate would raise, so the executor in
// submerge-txn can match on a stable, backend-independent vocabulary.
//
// This enum is intentionally NOT part of the public coordinator API: it
// is consumed only by the retry/timeout executor, which turns it into
// either a TransactionError or a TimeoutError before returning to a
// caller. See submerge-txn::error.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("node already exists: {0}")]
    NodeExists(String),

    #[error("node missing: {0}")]
    NoNode(String),

    #[error("data inconsistency at {0}")]
    DataInconsistency(String),

    #[error("bad arguments: {0}")]
    BadArguments(String),

    #[error("connection lost")]
    ConnectionLoss,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("operation timed out")]
    OperationTimeout,

    #[error("session expired")]
    SessionExpired,

    #[error("coordination service error: {0}")]
    Other(String),
}

impl ServiceError {
    /// Errors the executor re-raises verbatim, with no retry.
    pub fn is_pass_through(&self) -> bool {
        matches!(
            self,
            ServiceError::NodeExists(_)
                | ServiceError::NoNode(_)
                | ServiceError::DataInconsistency(_)
                | ServiceError::BadArguments(_)
        )
    }

    /// Errors that mean the session itself is unusable: reconnect before retrying.
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            ServiceError::ConnectionLoss
                | ServiceError::ConnectionClosed
                | ServiceError::OperationTimeout
                | ServiceError::SessionExpired
        )
    }
}
