// Creates ordered sequence nodes for new transaction IDs, skipping the
// reserved value 0 (Google App Engine callers use a bare 0 as "please
// allocate me an id"), and stamps an `xg` marker child for cross-group
// transactions.

use tracing::{debug, warn};

use crate::config::CoordinatorConfig;
use crate::error::{CoordError, TransactionError, TxId};
use crate::executor::{ExecError, Executor};
use crate::path;
use crate::timestamp::now_timestamp;

pub(crate) fn new_tx_id(
    executor: &Executor,
    cfg: &CoordinatorConfig,
    app_id: &str,
    is_xg: bool,
) -> Result<TxId, CoordError> {
    let prefix = path::txn_path_before_id(app_id);
    let mut retries_left = cfg.id_alloc_retries;

    loop {
        if retries_left == 0 {
            return Err(CoordError::Transaction(TransactionError::ExhaustedRetries {
                op: "new_tx_id".to_string(),
            }));
        }
        retries_left -= 1;

        let value = now_timestamp();
        let prefix_owned = prefix.clone();
        let assigned = executor.run(
            "create_sequence_node",
            cfg.transactional_timeout,
            cfg.num_retries,
            move |c| c.create_sequential(&prefix_owned, &value),
        );
        let assigned_path = match assigned {
            Ok(p) => p,
            Err(ExecError::Timeout(t)) => return Err(CoordError::Timeout(t)),
            Err(ExecError::Service(e)) => {
                warn!(error = %e, "failed to create transaction sequence node");
                continue;
            }
        };

        let segment = assigned_path.rsplit('/').next().unwrap_or(&assigned_path);
        let tx_id = match path::parse_txid(segment) {
            Some(id) => id,
            None => {
                warn!(path = %assigned_path, "sequence node name did not match tx<digits>");
                continue;
            }
        };

        if tx_id.is_none() {
            warn!("created sequence ID 0 - deleting it and retrying");
            let to_delete = assigned_path.clone();
            let _ = executor.run(
                "delete_zero_tx_id",
                cfg.transactional_timeout,
                cfg.num_retries,
                move |c| c.delete(&to_delete),
            );
            continue;
        }

        if is_xg {
            let xg_path = path::xg_path(app_id, tx_id);
            let xg_value = now_timestamp();
            let result = executor.run(
                "create_xg_marker",
                cfg.transactional_timeout,
                cfg.num_retries,
                move |c| c.create(&xg_path, &xg_value, false),
            );
            if let Err(ExecError::Timeout(t)) = result {
                return Err(CoordError::Timeout(t));
            }
        }

        debug!(tx = %tx_id, app = app_id, is_xg, "allocated transaction id");
        return Ok(tx_id);
    }
}
