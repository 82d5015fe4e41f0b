use std::sync::Arc;

use crate::error::ServiceError;

/// The seam between the transaction coordinator and whatever hierarchical
/// coordination service backs it (a ZooKeeper-like ensemble in production).
///
/// Every method here corresponds to one primitive verb the external
/// service must support (see spec §6): atomic create-if-absent, a
/// monotonic sequence-node variant of create, set, get, delete,
/// list-children, and exists. Ephemeral nodes are scoped to whichever
/// session created them; a `CoordClient` handle represents one such
/// session.
///
/// Implementors must be `Send + Sync`: the retry/timeout executor may
/// hold a handle across a watchdog thread boundary.
pub trait CoordClient: Send + Sync {
    /// Creates `path` with `value`. Fails with `NodeExists` if present.
    /// Missing parent segments are created as empty persistent nodes,
    /// mirroring the source's `makepath=True` usage for root paths.
    fn create(&self, path: &str, value: &str, ephemeral: bool) -> Result<(), ServiceError>;

    /// Creates a sequence child of `path_prefix` (e.g. `.../tx` ->
    /// `.../tx0000000042`) and returns the full assigned path.
    fn create_sequential(&self, path_prefix: &str, value: &str) -> Result<String, ServiceError>;

    /// Overwrites `path`'s value, creating it (and its parents) if absent.
    fn set(&self, path: &str, value: &str) -> Result<(), ServiceError>;

    /// Reads `path`'s value. Fails with `NoNode` if absent.
    fn get(&self, path: &str) -> Result<String, ServiceError>;

    /// Deletes `path`. Fails with `NoNode` if absent.
    fn delete(&self, path: &str) -> Result<(), ServiceError>;

    /// Lists the immediate child names of `path` (not full paths).
    /// Fails with `NoNode` if `path` itself is absent.
    fn list_children(&self, path: &str) -> Result<Vec<String>, ServiceError>;

    /// True if `path` exists.
    fn exists(&self, path: &str) -> Result<bool, ServiceError>;

    /// Stops and recreates the session against the same host list,
    /// returning a fresh handle. Persistent state survives; ephemeral
    /// nodes owned by the old session are dropped, just as a real
    /// ensemble drops them when a session expires.
    fn reestablish(&self) -> Arc<dyn CoordClient>;
}
