// A single global ephemeral lock, distinct from any per-application
// lock, that the datastore groomer process holds while it scans for
// and garbage-collects abandoned entities. Mutual exclusion only:
// whichever caller holds the node wins, everyone else gets `NodeExists`.

use crate::config::CoordinatorConfig;
use crate::error::{CoordError, TransactionError};
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

pub(crate) fn get_datastore_groomer_lock(executor: &Executor, cfg: &CoordinatorConfig) -> Result<bool, CoordError> {
    let value = now_timestamp();
    match call(executor, cfg, "acquire_groomer_lock", move |c| {
        c.create(path::DS_GROOM_LOCK_PATH, &value, true)
    }) {
        Ok(()) => Ok(true),
        Err(ExecError::Service(submerge_net::ServiceError::NodeExists(_))) => Ok(false),
        Err(ExecError::Timeout(t)) => Err(CoordError::Timeout(t)),
        Err(ExecError::Service(_)) => Err(CoordError::Transaction(TransactionError::ExhaustedRetries {
            op: "acquire_groomer_lock".to_string(),
        })),
    }
}

pub(crate) fn release_datastore_groomer_lock(executor: &Executor, cfg: &CoordinatorConfig) -> Result<(), CoordError> {
    match call(executor, cfg, "release_groomer_lock", |c| c.delete(path::DS_GROOM_LOCK_PATH)) {
        Ok(()) | Err(ExecError::Service(submerge_net::ServiceError::NoNode(_))) => Ok(()),
        Err(ExecError::Timeout(t)) => Err(CoordError::Timeout(t)),
        Err(ExecError::Service(_)) => Err(CoordError::Transaction(TransactionError::ExhaustedRetries {
            op: "release_groomer_lock".to_string(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use submerge_net::LocalCoord;

    fn new_fixture() -> (Executor, CoordinatorConfig) {
        let client = Arc::new(LocalCoord::new());
        let session = Arc::new(crate::session::SessionManager::new(client));
        (Executor::new(session), CoordinatorConfig::default())
    }

    #[test_log::test]
    fn only_one_caller_holds_the_groomer_lock_at_a_time() {
        let (executor, cfg) = new_fixture();
        assert!(get_datastore_groomer_lock(&executor, &cfg).unwrap());
        assert!(!get_datastore_groomer_lock(&executor, &cfg).unwrap());
        release_datastore_groomer_lock(&executor, &cfg).unwrap();
        assert!(get_datastore_groomer_lock(&executor, &cfg).unwrap());
    }

    #[test_log::test]
    fn release_is_idempotent() {
        let (executor, cfg) = new_fixture();
        release_datastore_groomer_lock(&executor, &cfg).unwrap();
        release_datastore_groomer_lock(&executor, &cfg).unwrap();
    }
}
