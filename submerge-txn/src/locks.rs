// Entity-group locking. A transaction's first `acquire_lock` call claims
// its root entity group; if the transaction was begun as cross-group
// (XG), further calls may claim up to `max_groups_for_xg` additional
// groups. Every lock a transaction holds is recorded, XG-separator
// joined, on the transaction's own `lockpath` node, so `release_lock`
// and `notify_failure` can find everything to tear down without a
// caller having to remember a list of lock paths itself.

use tracing::warn;

use crate::blacklist;
use crate::config::CoordinatorConfig;
use crate::error::{CoordError, TransactionError, TxId};
use crate::executor::{ExecError, Executor};
use crate::path;

fn call<T, F>(executor: &Executor, cfg: &CoordinatorConfig, op_name: &'static str, f: F) -> Result<T, ExecError>
where
    T: Send + 'static,
    F: Fn(&dyn submerge_net::CoordClient) -> Result<T, submerge_net::ServiceError> + Send + Sync + 'static,
{
    executor.run(op_name, cfg.transactional_timeout, cfg.num_retries, f)
}

fn to_coord_error(op: &'static str, e: ExecError) -> CoordError {
    match e {
        ExecError::Timeout(t) => CoordError::Timeout(t),
        ExecError::Service(se) => {
            warn!(op, error = %se, "unclassified service error");
            CoordError::Transaction(TransactionError::ExhaustedRetries {
                op: format!("{op} ({se})"),
            })
        }
    }
}

fn read_lock_list(executor: &Executor, cfg: &CoordinatorConfig, app_id: &str, tx_id: TxId) -> Result<Vec<String>, CoordError> {
    let lock_list_path = path::txn_lock_list_path(app_id, tx_id);
    match call(executor, cfg, "read_lock_list", move |c| c.get(&lock_list_path)) {
        Ok(v) if v.is_empty() => Ok(Vec::new()),
        Ok(v) => Ok(v.split(path::LOCK_LIST_SEPARATOR).map(|s| s.to_string()).collect()),
        Err(ExecError::Service(submerge_net::ServiceError::NoNode(_))) => Ok(Vec::new()),
        Err(e) => Err(to_coord_error("read_lock_list", e)),
    }
}

/// True if `tx_id` carries an `xg` marker child.
pub(crate) fn is_xg(executor: &Executor, cfg: &CoordinatorConfig, app_id: &str, tx_id: TxId) -> Result<bool, CoordError> {
    let xg_path = path::xg_path(app_id, tx_id);
    call(executor, cfg, "exists_xg_marker", move |c| c.exists(&xg_path)).map_err(|e| to_coord_error("exists_xg_marker", e))
}

/// "Is this transaction live": its `lockpath` node exists (it has
/// claimed at least one lock) and it is not blacklisted. Raises
/// `Blacklisted` rather than returning `Ok(false)` so callers can tell
/// "never locked anything" from "failed".
pub(crate) fn is_in_transaction(
    executor: &Executor,
    cfg: &CoordinatorConfig,
    app_id: &str,
    tx_id: TxId,
) -> Result<bool, CoordError> {
    if blacklist::is_blacklisted(executor, cfg, app_id, tx_id)? {
        return Err(CoordError::Transaction(TransactionError::Blacklisted(tx_id)));
    }
    let lock_list_path = path::txn_lock_list_path(app_id, tx_id);
    call(executor, cfg, "exists_lock_list", move |c| c.exists(&lock_list_path))
        .map_err(|e| to_coord_error("exists_lock_list", e))
}

/// Claims the lock root for `entity_key` on behalf of `tx_id`. The first
/// call for a transaction creates its `lockpath`; later calls require
/// the transaction to be XG and append to it, subject to
/// `max_groups_for_xg`. Re-locking a key the transaction already holds
/// is idempotent.
pub(crate) fn acquire_lock(
    executor: &Executor,
    cfg: &CoordinatorConfig,
    app_id: &str,
    tx_id: TxId,
    entity_key: &str,
) -> Result<String, CoordError> {
    let lock_path = path::lock_root_path(app_id, entity_key);

    if is_in_transaction(executor, cfg, app_id, tx_id)? {
        let held = read_lock_list(executor, cfg, app_id, tx_id)?;
        if held.contains(&lock_path) {
            return Ok(lock_path);
        }
        if !is_xg(executor, cfg, app_id, tx_id)? {
            return Err(CoordError::Transaction(TransactionError::CrossGroupViolation));
        }
        acquire_additional_lock(executor, cfg, app_id, tx_id, entity_key, false)
    } else {
        acquire_additional_lock(executor, cfg, app_id, tx_id, entity_key, true)
    }
}

/// Creates the lock root and records it on `lockpath`. `create` selects
/// whether `lockpath` itself must be created fresh (the transaction's
/// first lock) or read, appended to, and rewritten (every lock after).
fn acquire_additional_lock(
    executor: &Executor,
    cfg: &CoordinatorConfig,
    app_id: &str,
    tx_id: TxId,
    entity_key: &str,
    create: bool,
) -> Result<String, CoordError> {
    let lock_path = path::lock_root_path(app_id, entity_key);
    let owner_value = path::txn_path(app_id, tx_id);

    let created = {
        let lock_path = lock_path.clone();
        let owner_value = owner_value.clone();
        call(executor, cfg, "acquire_lock_root", move |c| c.create(&lock_path, &owner_value, false))
    };
    if let Err(e) = created {
        match e {
            ExecError::Service(submerge_net::ServiceError::NodeExists(_)) => {
                let owner = {
                    let lock_path = lock_path.clone();
                    call(executor, cfg, "diagnose_lock_owner", move |c| c.get(&lock_path))
                };
                match owner {
                    Ok(owner) => warn!(%lock_path, owner, "lock already held"),
                    Err(_) => warn!(%lock_path, "lock already held (owner unreadable)"),
                }
                return Err(CoordError::Transaction(TransactionError::AlreadyHeld { lock_path }));
            }
            e => return Err(to_coord_error("acquire_lock_root", e)),
        }
    }

    let lock_list_path = path::txn_lock_list_path(app_id, tx_id);
    let rollback = |executor: &Executor, cfg: &CoordinatorConfig| {
        let lock_path = lock_path.clone();
        let _ = call(executor, cfg, "rollback_lock_root", move |c| c.delete(&lock_path));
    };

    if create {
        let lock_list_path = lock_list_path.clone();
        let value = lock_path.clone();
        if let Err(e) = call(executor, cfg, "create_lock_list", move |c| c.create(&lock_list_path, &value, false)) {
            rollback(executor, cfg);
            return Err(to_coord_error("create_lock_list", e));
        }
        return Ok(lock_path);
    }

    let mut locks = read_lock_list(executor, cfg, app_id, tx_id)?;
    if locks.len() >= cfg.max_groups_for_xg {
        warn!(tx = %tx_id, "xg transaction exceeded group cap, rolling back this lock");
        rollback(executor, cfg);
        return Err(CoordError::Transaction(TransactionError::TooManyGroups));
    }
    locks.push(lock_path.clone());
    let new_value = locks.join(path::LOCK_LIST_SEPARATOR);
    if let Err(e) = call(executor, cfg, "update_lock_list", move |c| c.set(&lock_list_path, &new_value)) {
        rollback(executor, cfg);
        return Err(to_coord_error("update_lock_list", e));
    }

    Ok(lock_path)
}

/// Releases every lock `tx_id` holds and removes its transaction node.
/// Fails only if the transaction is blacklisted or was never started;
/// once past that check, every step tolerates the state it expects
/// already being gone (a concurrent GC sweep may have raced ahead of it).
pub(crate) fn release_lock(executor: &Executor, cfg: &CoordinatorConfig, app_id: &str, tx_id: TxId) -> Result<(), CoordError> {
    if blacklist::is_blacklisted(executor, cfg, app_id, tx_id)? {
        return Err(CoordError::Transaction(TransactionError::Blacklisted(tx_id)));
    }
    let txpath = path::txn_path(app_id, tx_id);
    let tx_exists = {
        let txpath = txpath.clone();
        call(executor, cfg, "exists_tx_node", move |c| c.exists(&txpath)).map_err(|e| to_coord_error("exists_tx_node", e))?
    };
    if !tx_exists {
        return Err(CoordError::Transaction(TransactionError::NotValid(tx_id)));
    }

    let lock_list_path = path::txn_lock_list_path(app_id, tx_id);
    let locks = read_lock_list(executor, cfg, app_id, tx_id)?;
    if locks.is_empty() {
        return Ok(());
    }

    for lock_path in &locks {
        let lock_path = lock_path.clone();
        if let Err(ExecError::Service(se)) = call(executor, cfg, "release_lock_root", move |c| c.delete(&lock_path)) {
            if !matches!(se, submerge_net::ServiceError::NoNode(_)) {
                warn!(tx = %tx_id, error = %se, "failed to release a lock root cleanly");
            }
        }
    }
    let _ = call(executor, cfg, "delete_lock_list", move |c| c.delete(&lock_list_path));

    if is_xg(executor, cfg, app_id, tx_id)? {
        let xg_path = path::xg_path(app_id, tx_id);
        let _ = call(executor, cfg, "delete_xg_marker", move |c| c.delete(&xg_path));
    }

    let remaining = {
        let txpath = txpath.clone();
        call(executor, cfg, "list_remaining_tx_children", move |c| c.list_children(&txpath))
    };
    if let Ok(children) = remaining {
        for child in children {
            let child_path = format!("{txpath}/{child}");
            let _ = call(executor, cfg, "delete_tx_child", move |c| c.delete(&child_path));
        }
    }
    let _ = call(executor, cfg, "delete_tx_node", move |c| c.delete(&txpath));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::new_tx_id;
    use std::sync::Arc;
    use submerge_net::LocalCoord;

    fn new_fixture() -> (Executor, CoordinatorConfig) {
        let client = Arc::new(LocalCoord::new());
        let session = Arc::new(crate::session::SessionManager::new(client));
        (Executor::new(session), CoordinatorConfig::default())
    }

    #[test_log::test]
    fn single_group_lock_conflicts_with_another_transaction() {
        let (executor, cfg) = new_fixture();
        let tx1 = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        let tx2 = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        acquire_lock(&executor, &cfg, "guestbook", tx1, "Greeting:1").unwrap();
        let err = acquire_lock(&executor, &cfg, "guestbook", tx2, "Greeting:1").unwrap_err();
        assert!(matches!(err, CoordError::Transaction(TransactionError::AlreadyHeld { .. })));
    }

    #[test_log::test]
    fn relocking_the_same_key_is_idempotent() {
        let (executor, cfg) = new_fixture();
        let tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        let first = acquire_lock(&executor, &cfg, "guestbook", tx, "Greeting:1").unwrap();
        let second = acquire_lock(&executor, &cfg, "guestbook", tx, "Greeting:1").unwrap();
        assert_eq!(first, second);
    }

    #[test_log::test]
    fn non_xg_transaction_cannot_take_a_second_group() {
        let (executor, cfg) = new_fixture();
        let tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        acquire_lock(&executor, &cfg, "guestbook", tx, "Greeting:1").unwrap();
        let err = acquire_lock(&executor, &cfg, "guestbook", tx, "Greeting:2").unwrap_err();
        assert!(matches!(err, CoordError::Transaction(TransactionError::CrossGroupViolation)));
    }

    #[test_log::test]
    fn xg_transaction_is_capped_and_leaves_no_orphan_lock() {
        let (executor, cfg) = new_fixture();
        let tx = new_tx_id(&executor, &cfg, "guestbook", true).unwrap();
        for i in 0..cfg.max_groups_for_xg {
            acquire_lock(&executor, &cfg, "guestbook", tx, &format!("Group:{i}")).unwrap();
        }
        let overflow_key = "Group:overflow";
        let err = acquire_lock(&executor, &cfg, "guestbook", tx, overflow_key).unwrap_err();
        assert!(matches!(err, CoordError::Transaction(TransactionError::TooManyGroups)));

        let lock_path = path::lock_root_path("guestbook", overflow_key);
        let still_there = call(&executor, &cfg, "check_no_orphan", move |c| c.exists(&lock_path)).unwrap();
        assert!(!still_there, "a rejected xg lock must not remain held");
    }

    #[test_log::test]
    fn release_lock_is_idempotent_after_the_transaction_node_is_gone() {
        let (executor, cfg) = new_fixture();
        let tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        acquire_lock(&executor, &cfg, "guestbook", tx, "Greeting:1").unwrap();
        release_lock(&executor, &cfg, "guestbook", tx).unwrap();
        let err = release_lock(&executor, &cfg, "guestbook", tx).unwrap_err();
        assert!(matches!(err, CoordError::Transaction(TransactionError::NotValid(_))));
    }
}
