//! Distributed transaction coordination on top of a ZooKeeper-like
//! hierarchical coordination service: transaction ID allocation,
//! entity-group locking (including cross-group transactions), a journal
//! of each transaction's writes, a blacklist of failed transactions, a
//! background garbage collector that expires abandoned transactions,
//! and the separate datastore groomer lock.
//!
//! [`Coordinator`] is the single entry point; every other type in this
//! crate is an implementation detail reached through it.

mod blacklist;
mod config;
mod error;
mod executor;
mod failure;
mod gc;
mod groomer;
mod ids;
mod journal;
mod locks;
mod path;
mod session;
mod timestamp;

use std::sync::Arc;

use submerge_net::CoordClient;
use tracing::info;

pub use config::CoordinatorConfig;
pub use error::{CoordError, TimeoutError, TransactionError, TxId};

use executor::Executor;
use gc::GcSupervisor;
use session::SessionManager;

/// A transaction coordinator bound to one application namespace's worth
/// of state on a shared coordination service. Cheap to clone: every
/// method borrows `self` and talks to the service through the shared
/// executor and session handle.
pub struct Coordinator {
    executor: Arc<Executor>,
    config: CoordinatorConfig,
    gc: GcSupervisor,
}

impl Coordinator {
    /// Starts a coordinator against `client`, including its background
    /// garbage collector.
    pub fn new(client: Arc<dyn CoordClient>, config: CoordinatorConfig) -> Self {
        info!(host = %config.host, "starting transaction coordinator");
        let session = Arc::new(SessionManager::new(client));
        let executor = Arc::new(Executor::new(session));
        let gc = GcSupervisor::start(executor.clone(), config.clone());
        Coordinator { executor, config, gc }
    }

    /// Starts a coordinator against an in-process `LocalCoord`, for
    /// tests and the standalone mode of the `submerge` binary.
    pub fn new_local(config: CoordinatorConfig) -> Self {
        Self::new(Arc::new(submerge_net::LocalCoord::new()), config)
    }

    /// Stops the garbage collector and the coordination session. Call
    /// this before dropping the coordinator to avoid leaking the
    /// background sweep thread.
    pub fn stop(&self) {
        self.gc.stop();
        self.executor.stop_session();
    }

    /// Allocates a new transaction ID. `is_xg` marks the transaction as
    /// cross-group, allowing it to later lock up to
    /// `config.max_groups_for_xg` distinct entity groups instead of one.
    pub fn begin_tx(&self, app_id: &str, is_xg: bool) -> Result<TxId, CoordError> {
        ids::new_tx_id(&self.executor, &self.config, app_id, is_xg)
    }

    /// Claims the lock for `entity_key`'s root entity group on behalf of
    /// `tx_id`. The transaction's first call claims its root group;
    /// later calls require `tx_id` to have been begun with
    /// `is_xg = true` and are subject to `config.max_groups_for_xg`.
    /// Re-locking a key the transaction already holds is idempotent.
    pub fn acquire_lock(&self, app_id: &str, tx_id: TxId, entity_key: &str) -> Result<String, CoordError> {
        locks::acquire_lock(&self.executor, &self.config, app_id, tx_id, entity_key)
    }

    /// Releases every lock `tx_id` holds and removes its transaction
    /// node. Fails if `tx_id` is blacklisted or was never started.
    pub fn release_lock(&self, app_id: &str, tx_id: TxId) -> Result<(), CoordError> {
        locks::release_lock(&self.executor, &self.config, app_id, tx_id)
    }

    /// True if `tx_id` carries an `xg` marker, i.e. was begun with
    /// `is_xg = true`.
    pub fn is_xg(&self, app_id: &str, tx_id: TxId) -> Result<bool, CoordError> {
        locks::is_xg(&self.executor, &self.config, app_id, tx_id)
    }

    /// True if `tx_id`'s transaction node still exists and is not
    /// blacklisted. Fails with `Blacklisted` (not `Ok(false)`) if the
    /// transaction is blacklisted, so callers can tell "never started or
    /// already cleaned up" from "actively failed".
    pub fn is_in_transaction(&self, app_id: &str, tx_id: TxId) -> Result<bool, CoordError> {
        locks::is_in_transaction(&self.executor, &self.config, app_id, tx_id)
    }

    /// Records that `tx_id` wrote `entity_key`. `target_tx` is the
    /// version to record as valid once the write is known to have
    /// committed; most callers pass `tx_id` itself.
    pub fn register_updated_key(
        &self,
        app_id: &str,
        current_tx: TxId,
        target_tx: TxId,
        entity_key: &str,
    ) -> Result<(), CoordError> {
        journal::register_updated_key(&self.executor, &self.config, app_id, current_tx, target_tx, entity_key)
    }

    /// Lists the entity keys `tx_id` has journaled via
    /// `register_updated_key` that have not yet been promoted to the
    /// valid-version list.
    pub fn get_updated_key_list(&self, app_id: &str, tx_id: TxId) -> Result<Vec<String>, CoordError> {
        journal::get_updated_key_list(&self.executor, &self.config, app_id, tx_id)
    }

    /// Returns the transaction id a reader should pin its view of
    /// `entity_key` to, given that it is considering `target_tx`'s
    /// write: `target_tx` itself if it is not blacklisted, otherwise
    /// the last transaction known to have committed, or `TxId::NONE` if
    /// none has been recorded.
    pub fn get_valid_transaction_id(
        &self,
        app_id: &str,
        target_tx: TxId,
        entity_key: &str,
    ) -> Result<TxId, CoordError> {
        journal::get_valid_transaction_id(&self.executor, &self.config, app_id, target_tx, entity_key)
    }

    /// True if `tx_id` has been blacklisted, i.e. failed or expired.
    pub fn is_blacklisted(&self, app_id: &str, tx_id: TxId) -> Result<bool, CoordError> {
        blacklist::is_blacklisted(&self.executor, &self.config, app_id, tx_id)
    }

    /// Cleans up after a failed or expired transaction: blacklists it,
    /// promotes its journaled keys to the valid-version list, releases
    /// every lock it held, and removes its transaction node. Never
    /// fails; every step tolerates the state it expects already being
    /// gone.
    pub fn notify_failure(&self, app_id: &str, tx_id: TxId) {
        failure::notify_failure(&self.executor, &self.config, app_id, tx_id)
    }

    /// Runs one garbage-collection sweep immediately, independent of
    /// the background worker's timer.
    pub fn gc_sweep_now(&self) {
        gc::sweep_once(&self.executor, &self.config)
    }

    /// Acquires the global datastore groomer lock. Returns `false`
    /// (rather than failing) if another caller already holds it.
    pub fn get_datastore_groomer_lock(&self) -> Result<bool, CoordError> {
        groomer::get_datastore_groomer_lock(&self.executor, &self.config)
    }

    /// Releases the global datastore groomer lock. Idempotent.
    pub fn release_datastore_groomer_lock(&self) -> Result<(), CoordError> {
        groomer::release_datastore_groomer_lock(&self.executor, &self.config)
    }
}
