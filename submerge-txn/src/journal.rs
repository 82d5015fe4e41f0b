// Tracks which transaction most recently wrote each entity key, so a
// reader can pin its view to the last transaction known to have
// committed instead of one still in flight. Keys with no recorded valid
// version return `TxId::NONE`, matching the ZooKeeper-backed source's
// use of a bare `0`.

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
        ExecError::Service(_) => CoordError::Transaction(TransactionError::ExhaustedRetries { op: op.to_string() }),
    }
}

/// Records that `tx_id` wrote `entity_key`, so a future transaction can
/// learn the right version to read. If the key already has a recorded
/// valid version, it is overwritten directly; otherwise the write is
/// journaled against `current_tx`'s own node and only promoted to the
/// valid-version list once `current_tx` commits (by the caller invoking
/// this again with the committed id) or fails (by `notify_failure`).
pub(crate) fn register_updated_key(
    executor: &Executor,
    cfg: &CoordinatorConfig,
    app_id: &str,
    current_tx: TxId,
    target_tx: TxId,
    entity_key: &str,
) -> Result<(), CoordError> {
    let vtxpath = path::valid_txn_path(app_id, entity_key);
    let exists = {
        let vtxpath = vtxpath.clone();
        call(executor, cfg, "exists_valid_version", move |c| c.exists(&vtxpath))
            .map_err(|e| to_coord_error("exists_valid_version", e))?
    };

    if exists {
        let value = target_tx.0.to_string();
        call(executor, cfg, "update_valid_version", move |c| c.set(&vtxpath, &value))
            .map_err(|e| to_coord_error("update_valid_version", e))?;
        return Ok(());
    }

    let txpath = path::txn_path(app_id, current_tx);
    let tx_exists = {
        let txpath = txpath.clone();
        call(executor, cfg, "exists_tx_node", move |c| c.exists(&txpath))
            .map_err(|e| to_coord_error("exists_tx_node", e))?
    };
    if !tx_exists {
        return Err(CoordError::Transaction(TransactionError::NotValid(current_tx)));
    }

    let prefix = format!("{txpath}/{}", path::TX_UPDATEDKEY_PREFIX);
    let value = format!("{}/{}", path::encode(entity_key), target_tx.0);
    call(executor, cfg, "journal_updated_key", move |c| c.create_sequential(&prefix, &value))
        .map_err(|e| to_coord_error("journal_updated_key", e))?;
    Ok(())
}

/// Reads the entity keys `tx_id` journaled via `register_updated_key`
/// that have not yet been promoted to the valid-version list.
pub(crate) fn get_updated_key_list(
    executor: &Executor,
    cfg: &CoordinatorConfig,
    app_id: &str,
    tx_id: TxId,
) -> Result<Vec<String>, CoordError> {
    let txpath = path::txn_path(app_id, tx_id);
    let children = {
        let txpath = txpath.clone();
        call(executor, cfg, "list_tx_children", move |c| c.list_children(&txpath))
    };
    let children = match children {
        Ok(c) => c,
        Err(ExecError::Service(submerge_net::ServiceError::NoNode(_))) => {
            return Err(CoordError::Transaction(TransactionError::NotValid(tx_id)));
        }
        Err(e) => return Err(to_coord_error("list_tx_children", e)),
    };

    let mut keys = Vec::new();
    for child in children {
        if !child.starts_with(path::TX_UPDATEDKEY_PREFIX) {
            continue;
        }
        let child_path = format!("{txpath}/{child}");
        let value = call(executor, cfg, "read_updated_key", move |c| c.get(&child_path))
            .map_err(|e| to_coord_error("read_updated_key", e))?;
        if let Some((key_enc, _target_tx)) = value.split_once('/') {
            keys.push(path::decode(key_enc));
        }
    }
    Ok(keys)
}

/// Returns the transaction id a reader should pin its view to for
/// `entity_key`, given that it is considering `target_tx`'s write. If
/// `target_tx` is not blacklisted, it is still live or committed, so it
/// is returned unchanged. Only a blacklisted `target_tx` falls back to
/// the anchor recorded by the last transaction known to have committed,
/// or `TxId::NONE` if none has been recorded yet.
pub(crate) fn get_valid_transaction_id(
    executor: &Executor,
    cfg: &CoordinatorConfig,
    app_id: &str,
    target_tx: TxId,
    entity_key: &str,
) -> Result<TxId, CoordError> {
    if !blacklist::is_blacklisted(executor, cfg, app_id, target_tx)? {
        return Ok(target_tx);
    }

    let vtxpath = path::valid_txn_path(app_id, entity_key);
    let value = {
        let vtxpath = vtxpath.clone();
        call(executor, cfg, "read_valid_version", move |c| c.get(&vtxpath))
    };
    match value {
        Ok(v) => Ok(TxId(v.parse().unwrap_or(0))),
        Err(ExecError::Service(submerge_net::ServiceError::NoNode(_))) => Ok(TxId::NONE),
        Err(e) => Err(to_coord_error("read_valid_version", e)),
    }
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
    fn register_then_list_round_trips_the_key() {
        let (executor, cfg) = new_fixture();
        let tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        register_updated_key(&executor, &cfg, "guestbook", tx, tx, "Greeting:1").unwrap();
        let keys = get_updated_key_list(&executor, &cfg, "guestbook", tx).unwrap();
        assert_eq!(keys, vec!["Greeting:1".to_string()]);
    }

    #[test_log::test]
    fn registering_against_an_unknown_transaction_fails() {
        let (executor, cfg) = new_fixture();
        let err = register_updated_key(&executor, &cfg, "guestbook", TxId(999), TxId(999), "Greeting:1").unwrap_err();
        assert!(matches!(err, CoordError::Transaction(TransactionError::NotValid(_))));
    }

    #[test_log::test]
    fn an_existing_valid_version_is_overwritten_directly() {
        let (executor, cfg) = new_fixture();
        let tx1 = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        register_updated_key(&executor, &cfg, "guestbook", tx1, tx1, "Greeting:1").unwrap();
        let vtxpath = path::valid_txn_path("guestbook", "Greeting:1");
        call(&executor, &cfg, "seed_valid_version", {
            let vtxpath = vtxpath.clone();
            move |c| c.create(&vtxpath, "0", false)
        })
        .unwrap();

        let tx2 = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        register_updated_key(&executor, &cfg, "guestbook", tx2, tx2, "Greeting:1").unwrap();
        let value = call(&executor, &cfg, "read_valid_version", move |c| c.get(&vtxpath)).unwrap();
        assert_eq!(value, tx2.0.to_string());
    }

    #[test_log::test]
    fn a_live_target_transaction_is_returned_unchanged() {
        let (executor, cfg) = new_fixture();
        let tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        assert_eq!(
            get_valid_transaction_id(&executor, &cfg, "guestbook", tx, "Greeting:1").unwrap(),
            tx
        );
    }

    #[test_log::test]
    fn a_blacklisted_target_falls_back_to_the_recorded_anchor_or_none() {
        let (executor, cfg) = new_fixture();
        let tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        blacklist::add_to_blacklist(&executor, &cfg, "guestbook", tx, "0").unwrap();

        assert_eq!(
            get_valid_transaction_id(&executor, &cfg, "guestbook", tx, "Greeting:1").unwrap(),
            TxId::NONE
        );

        let tx2 = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        let vtxpath = path::valid_txn_path("guestbook", "Greeting:1");
        let value = tx2.0.to_string();
        call(&executor, &cfg, "seed_valid_version", move |c| c.create(&vtxpath, &value, false)).unwrap();
        assert_eq!(
            get_valid_transaction_id(&executor, &cfg, "guestbook", tx, "Greeting:1").unwrap(),
            tx2
        );
    }
}
