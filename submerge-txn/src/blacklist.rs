// Per-application record of transaction IDs that failed or expired.
// `get_valid_transaction_id` consults this indirectly: a key's valid
// version is only trustworthy once its writer is known not to be
// blacklisted.

use crate::config::CoordinatorConfig;
use crate::error::{CoordError, TransactionError, TxId};
use crate::executor::{ExecError, Executor};
use crate::path;

/// Placeholder value for list-root nodes that exist only to be listed,
/// never read.
pub(crate) const ROOT_MARKER: &str = "default";

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

/// Creates `root` if it doesn't already exist. Tolerates a racing
/// creator: `NodeExists` just means someone else got there first.
pub(crate) fn ensure_root(executor: &Executor, cfg: &CoordinatorConfig, root: String) -> Result<(), CoordError> {
    let root_for_create = root.clone();
    match call(executor, cfg, "create_list_root", move |c| {
        c.create(&root_for_create, ROOT_MARKER, false)
    }) {
        Ok(()) | Err(ExecError::Service(submerge_net::ServiceError::NodeExists(_))) => Ok(()),
        Err(e) => Err(to_coord_error("create_list_root", e)),
    }
}

pub(crate) fn is_blacklisted(
    executor: &Executor,
    cfg: &CoordinatorConfig,
    app_id: &str,
    tx_id: TxId,
) -> Result<bool, CoordError> {
    let root = path::blacklist_root_path(app_id);
    ensure_root(executor, cfg, root.clone())?;

    let children = call(executor, cfg, "list_blacklist", move |c| c.list_children(&root))
        .map_err(|e| to_coord_error("list_blacklist", e))?;
    Ok(children.contains(&tx_id.0.to_string()))
}

/// Adds `tx_id` to the blacklist. Idempotent: a transaction that is
/// already listed (e.g. `notify_failure` ran twice) is not an error.
pub(crate) fn add_to_blacklist(
    executor: &Executor,
    cfg: &CoordinatorConfig,
    app_id: &str,
    tx_id: TxId,
    timestamp: &str,
) -> Result<(), CoordError> {
    let root = path::blacklist_root_path(app_id);
    ensure_root(executor, cfg, root)?;

    let entry = path::blacklist_entry_path(app_id, tx_id);
    let value = timestamp.to_string();
    match call(executor, cfg, "blacklist_tx", move |c| c.create(&entry, &value, false)) {
        Ok(()) | Err(ExecError::Service(submerge_net::ServiceError::NodeExists(_))) => Ok(()),
        Err(e) => Err(to_coord_error("blacklist_tx", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::new_tx_id;
    use crate::timestamp::now_timestamp;
    use std::sync::Arc;
    use submerge_net::LocalCoord;

    fn new_fixture() -> (Executor, CoordinatorConfig) {
        let client = Arc::new(LocalCoord::new());
        let session = Arc::new(crate::session::SessionManager::new(client));
        (Executor::new(session), CoordinatorConfig::default())
    }

    #[test_log::test]
    fn fresh_transaction_is_not_blacklisted() {
        let (executor, cfg) = new_fixture();
        let tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        assert!(!is_blacklisted(&executor, &cfg, "guestbook", tx).unwrap());
    }

    #[test_log::test]
    fn blacklisting_is_idempotent_and_visible() {
        let (executor, cfg) = new_fixture();
        let tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        let ts = now_timestamp();
        add_to_blacklist(&executor, &cfg, "guestbook", tx, &ts).unwrap();
        add_to_blacklist(&executor, &cfg, "guestbook", tx, &ts).unwrap();
        assert!(is_blacklisted(&executor, &cfg, "guestbook", tx).unwrap());
    }
}
