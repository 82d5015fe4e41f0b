// Cleans up after a transaction that failed or timed out: blacklists it,
// promotes any keys it journaled to the valid-version list, releases
// every lock it held, and removes its transaction node. Every step
// tolerates the node it touches already being gone, since the GC sweep
// and a client's own explicit failure notification can race each other
// and both must be safe to run more than once.

use tracing::{debug, warn};

use crate::blacklist;
use crate::config::CoordinatorConfig;
use crate::error::TxId;
use crate::executor::{ExecError, Executor};
use crate::path;
use crate::timestamp::now_timestamp;

fn call<T, F>(executor: &Executor, cfg: &CoordinatorConfig, op_name: &'static str, f: F) -> Result<T, ExecError>
where
    T: Send + 'static,
    F: Fn(&dyn submerge_net::CoordClient) -> Result<T, submerge_net::ServiceError> + Send + Sync + 'static,
{
    executor.run(op_name, cfg.transactional_timeout, cfg.num_retries, f)
}

/// Best-effort: logs and moves on rather than propagating an error, per
/// the public `notify_failure` contract that it never fails.
fn best_effort<T>(op_name: &'static str, result: Result<T, ExecError>) {
    if let Err(ExecError::Service(e)) = result {
        if !matches!(e, submerge_net::ServiceError::NoNode(_)) {
            warn!(op = op_name, error = %e, "notify_failure step did not complete cleanly");
        }
    }
}

pub(crate) fn notify_failure(executor: &Executor, cfg: &CoordinatorConfig, app_id: &str, tx_id: TxId) {
    let txpath = path::txn_path(app_id, tx_id);
    let lock_list_path = path::txn_lock_list_path(app_id, tx_id);

    let lock_list: Vec<String> = {
        let lock_list_path = lock_list_path.clone();
        match call(executor, cfg, "read_lock_list", move |c| c.get(&lock_list_path)) {
            Ok(v) if v.is_empty() => Vec::new(),
            Ok(v) => v.split(path::LOCK_LIST_SEPARATOR).map(|s| s.to_string()).collect(),
            Err(_) => Vec::new(),
        }
    };

    if !lock_list.is_empty() {
        let ts = now_timestamp();
        if let Err(e) = blacklist::add_to_blacklist(executor, cfg, app_id, tx_id, &ts) {
            warn!(tx = %tx_id, error = %e, "failed to blacklist transaction");
        }

        let ukey_children = {
            let txpath = txpath.clone();
            call(executor, cfg, "list_updated_keys", move |c| c.list_children(&txpath))
        };
        if let Ok(children) = ukey_children {
            for child in children {
                if !child.starts_with(path::TX_UPDATEDKEY_PREFIX) {
                    continue;
                }
                let child_path = format!("{txpath}/{child}");
                let value = call(executor, cfg, "read_updated_key", move |c| c.get(&child_path));
                let Ok(value) = value else { continue };
                let Some((key_enc, target_tx)) = value.split_once('/') else { continue };

                let vtxroot = path::valid_txn_root_path(app_id);
                let _ = blacklist::ensure_root(executor, cfg, vtxroot.clone());
                let vtxpath = format!("{vtxroot}/{key_enc}");
                let target_tx = target_tx.to_string();
                best_effort(
                    "promote_updated_key",
                    call(executor, cfg, "promote_updated_key", move |c| c.create(&vtxpath, &target_tx, false)),
                );
            }
        }

        for lock_path in lock_list {
            best_effort("release_lock", call(executor, cfg, "release_lock", move |c| c.delete(&lock_path)));
        }
    }

    let xg_path = path::xg_path(app_id, tx_id);
    best_effort("delete_xg_marker", call(executor, cfg, "delete_xg_marker", move |c| c.delete(&xg_path)));

    let remaining = {
        let txpath = txpath.clone();
        call(executor, cfg, "list_remaining_tx_children", move |c| c.list_children(&txpath))
    };
    if let Ok(children) = remaining {
        for child in children {
            let child_path = format!("{txpath}/{child}");
            best_effort("delete_tx_child", call(executor, cfg, "delete_tx_child", move |c| c.delete(&child_path)));
        }
    }
    best_effort("delete_tx_node", call(executor, cfg, "delete_tx_node", move |c| c.delete(&txpath)));

    debug!(tx = %tx_id, app = app_id, "notified failure");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoordError;
    use crate::ids::new_tx_id;
    use crate::journal::{get_valid_transaction_id, register_updated_key};
    use crate::locks::acquire_lock;
    use std::sync::Arc;
    use submerge_net::LocalCoord;

    fn new_fixture() -> (Executor, CoordinatorConfig) {
        let client = Arc::new(LocalCoord::new());
        let session = Arc::new(crate::session::SessionManager::new(client));
        (Executor::new(session), CoordinatorConfig::default())
    }

    #[test_log::test]
    fn failure_releases_locks_and_promotes_journaled_keys() {
        let (executor, cfg) = new_fixture();
        let tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        let lock_path = acquire_lock(&executor, &cfg, "guestbook", tx, "Greeting:1").unwrap();
        register_updated_key(&executor, &cfg, "guestbook", tx, tx, "Greeting:1").unwrap();

        notify_failure(&executor, &cfg, "guestbook", tx);

        assert!(blacklist::is_blacklisted(&executor, &cfg, "guestbook", tx).unwrap());
        assert_eq!(
            get_valid_transaction_id(&executor, &cfg, "guestbook", tx, "Greeting:1").unwrap(),
            tx
        );
        let still_held = call(&executor, &cfg, "check_lock_released", move |c| c.exists(&lock_path)).unwrap();
        assert!(!still_held);
        let err = register_updated_key(&executor, &cfg, "guestbook", tx, tx, "Greeting:2").unwrap_err();
        assert!(matches!(err, CoordError::Transaction(crate::error::TransactionError::NotValid(_))));
    }

    #[test_log::test]
    fn failure_notification_is_idempotent() {
        let (executor, cfg) = new_fixture();
        let tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        acquire_lock(&executor, &cfg, "guestbook", tx, "Greeting:1").unwrap();
        notify_failure(&executor, &cfg, "guestbook", tx);
        notify_failure(&executor, &cfg, "guestbook", tx);
    }
}
