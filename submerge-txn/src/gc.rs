// Background sweeper: periodically, for each application, checks
// whether enough time has passed since the last sweep, takes that
// application's GC lock so no other coordinator instance sweeps it
// concurrently, and notifies failure for every transaction that has
// outlived `tx_timeout`.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};

use crate::config::CoordinatorConfig;
use crate::executor::{ExecError, Executor};
use crate::path;
use crate::timestamp::now_secs;

fn call<T, F>(executor: &Executor, cfg: &CoordinatorConfig, op_name: &'static str, f: F) -> Result<T, ExecError>
where
    T: Send + 'static,
    F: Fn(&dyn submerge_net::CoordClient) -> Result<T, submerge_net::ServiceError> + Send + Sync + 'static,
{
    executor.run(op_name, cfg.transactional_timeout, cfg.num_retries, f)
}

struct GcState {
    running: bool,
}

/// Owns the background sweep thread. Dropping a `GcSupervisor` without
/// calling `stop` leaks the thread; `Coordinator`'s shutdown path always
/// calls `stop` before tearing down the session.
pub(crate) struct GcSupervisor {
    state: Arc<(Mutex<GcState>, Condvar)>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GcSupervisor {
    pub(crate) fn start(executor: Arc<Executor>, cfg: CoordinatorConfig) -> Self {
        let state = Arc::new((Mutex::new(GcState { running: true }), Condvar::new()));
        let thread_state = state.clone();
        let handle = thread::spawn(move || gc_loop(&executor, &cfg, &thread_state));
        GcSupervisor {
            state,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub(crate) fn stop(&self) {
        {
            let (lock, cvar) = &*self.state;
            let mut s = lock.lock().unwrap();
            s.running = false;
            cvar.notify_all();
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn gc_loop(executor: &Executor, cfg: &CoordinatorConfig, state: &Arc<(Mutex<GcState>, Condvar)>) {
    info!("garbage collector started");
    let (lock, cvar) = &**state;
    loop {
        sweep_all_apps(executor, cfg);
        let guard = lock.lock().unwrap();
        if !guard.running {
            break;
        }
        let (guard, _timed_out) = cvar.wait_timeout(guard, cfg.gc_interval).unwrap();
        if !guard.running {
            break;
        }
        drop(guard);
    }
    info!("garbage collector stopped");
}

/// Runs one sweep pass immediately, independent of the background
/// worker's timer. Used by the CLI's one-shot `gc-sweep` command.
pub(crate) fn sweep_once(executor: &Executor, cfg: &CoordinatorConfig) {
    sweep_all_apps(executor, cfg);
}

fn sweep_all_apps(executor: &Executor, cfg: &CoordinatorConfig) {
    let apps = call(executor, cfg, "list_apps", |c| c.list_children(path::APPS_PATH));
    let apps = match apps {
        Ok(a) => a,
        Err(ExecError::Service(submerge_net::ServiceError::NoNode(_))) => return,
        Err(e) => {
            warn!("gc sweep could not list applications: {e}");
            return;
        }
    };
    for app_enc in apps {
        let app_id = path::decode(&app_enc);
        try_gc_app(executor, cfg, &app_id);
    }
}

fn try_gc_app(executor: &Executor, cfg: &CoordinatorConfig, app_id: &str) {
    let gc_time_path = path::gc_time_path(app_id);
    let last_swept = {
        let gc_time_path = gc_time_path.clone();
        call(executor, cfg, "read_gc_last_time", move |c| c.get(&gc_time_path))
    };
    let last_swept: f64 = match last_swept {
        Ok(v) => v.parse().unwrap_or(0.0),
        Err(ExecError::Service(submerge_net::ServiceError::NoNode(_))) => 0.0,
        Err(e) => {
            warn!(app = app_id, "gc could not read last sweep time: {e}");
            return;
        }
    };
    if last_swept + cfg.gc_interval.as_secs_f64() > now_secs() {
        return;
    }

    let gc_lock_path = path::gc_lock_path(app_id);
    let value = now_secs().to_string();
    let acquired = call(executor, cfg, "acquire_gc_lock", move |c| c.create(&gc_lock_path, &value, true));
    match acquired {
        Ok(()) => {}
        Err(ExecError::Service(submerge_net::ServiceError::NodeExists(_))) => return,
        Err(e) => {
            warn!(app = app_id, "gc could not acquire app lock: {e}");
            return;
        }
    }

    let swept = sweep_app_transactions(executor, cfg, app_id);
    let gc_lock_path = path::gc_lock_path(app_id);
    if swept {
        let gc_time_path = gc_time_path.clone();
        let value = now_secs().to_string();
        let _ = call(executor, cfg, "write_gc_last_time", move |c| c.set(&gc_time_path, &value));
    }
    let _ = call(executor, cfg, "release_gc_lock", move |c| c.delete(&gc_lock_path));
}

fn sweep_app_transactions(executor: &Executor, cfg: &CoordinatorConfig, app_id: &str) -> bool {
    let txroot = path::txn_prefix_path(app_id);
    let txlist = {
        let txroot = txroot.clone();
        call(executor, cfg, "list_transactions", move |c| c.list_children(&txroot))
    };
    let txlist = match txlist {
        Ok(l) => l,
        Err(ExecError::Service(submerge_net::ServiceError::NoNode(_))) => return true,
        Err(e) => {
            warn!(app = app_id, "gc could not list transactions: {e}");
            return false;
        }
    };

    for name in txlist {
        let Some(tx_id) = path::parse_txid(&name) else { continue };
        let txpath = path::txn_path(app_id, tx_id);
        let started = {
            let txpath = txpath.clone();
            call(executor, cfg, "read_tx_start_time", move |c| c.get(&txpath))
        };
        match started {
            Ok(v) => {
                let started: f64 = v.parse().unwrap_or(0.0);
                if started + cfg.tx_timeout.as_secs_f64() < now_secs() {
                    info!(tx = %tx_id, app = app_id, "gc expiring stale transaction");
                    crate::failure::notify_failure(executor, cfg, app_id, tx_id);
                }
            }
            Err(ExecError::Service(submerge_net::ServiceError::NoNode(_))) => {}
            Err(e) => {
                warn!(tx = %tx_id, app = app_id, "gc could not read transaction: {e}");
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::new_tx_id;
    use crate::locks::acquire_lock;
    use std::sync::Arc;
    use std::time::Duration;
    use submerge_net::LocalCoord;

    fn new_fixture(tx_timeout: Duration) -> (Executor, CoordinatorConfig) {
        let client = Arc::new(LocalCoord::new());
        let session = Arc::new(crate::session::SessionManager::new(client));
        let cfg = CoordinatorConfig {
            tx_timeout,
            ..Default::default()
        };
        (Executor::new(session), cfg)
    }

    #[test_log::test]
    fn sweep_notifies_failure_for_expired_transactions() {
        let (executor, cfg) = new_fixture(Duration::from_secs(0));
        let tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        let lock_path = acquire_lock(&executor, &cfg, "guestbook", tx, "Greeting:1").unwrap();

        sweep_all_apps(&executor, &cfg);

        let still_held = call(&executor, &cfg, "check_lock_released", move |c| c.exists(&lock_path)).unwrap();
        assert!(!still_held, "expired transaction's lock should be released by the sweep");
    }

    #[test_log::test]
    fn a_second_sweep_within_the_interval_is_a_no_op() {
        let (executor, cfg) = new_fixture(Duration::from_secs(3600));
        let _tx = new_tx_id(&executor, &cfg, "guestbook", false).unwrap();
        sweep_all_apps(&executor, &cfg);
        sweep_all_apps(&executor, &cfg);
    }
}
