// Wraps every coordination-service call with a per-call deadline and a
// retry policy, so every other component reads as a linear sequence of
// calls instead of interleaving timeout/retry bookkeeping with its own
// logic. This is the only component permitted to touch a `CoordClient`
// directly; everyone else goes through `Executor::run`.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use submerge_net::{CoordClient, ServiceError};
use tracing::warn;

use crate::error::TimeoutError;
use crate::session::SessionManager;

/// Internal classification of a failed call. Never crosses a public
/// coordinator method boundary: each component interprets a
/// `Service(ServiceError)` according to its own context (e.g. `NoNode`
/// means "not valid" in `release_lock` but "no rollback needed" in
/// `notify_failure`).
#[derive(Debug)]
pub(crate) enum ExecError {
    Service(ServiceError),
    Timeout(TimeoutError),
}

impl std::fmt::Display for ExecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecError::Service(e) => write!(f, "{e}"),
            ExecError::Timeout(e) => write!(f, "{e}"),
        }
    }
}

pub(crate) struct Executor {
    session: Arc<SessionManager>,
}

impl Executor {
    pub(crate) fn new(session: Arc<SessionManager>) -> Self {
        Executor { session }
    }

    pub(crate) fn stop_session(&self) {
        self.session.stop();
    }

    /// Runs `op` against the current session's client, retrying on
    /// transient faults (reconnecting first) up to `retries` times.
    /// Exceeding `deadline` aborts the whole invocation without retry.
    pub(crate) fn run<T, F>(
        &self,
        op_name: &str,
        deadline: Duration,
        mut retries: u32,
        op: F,
    ) -> Result<T, ExecError>
    where
        T: Send + 'static,
        F: Fn(&dyn CoordClient) -> Result<T, ServiceError> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        loop {
            if retries == 0 {
                warn!(op = op_name, "exhausted retries");
                return Err(ExecError::Service(ServiceError::Other(format!(
                    "exhausted retries running {op_name}"
                ))));
            }

            let client = self.session.handle();
            let op = op.clone();
            let (tx, rx) = mpsc::channel();
            thread::spawn(move || {
                let result = op(client.as_ref());
                let _ = tx.send(result);
            });

            match rx.recv_timeout(deadline) {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_pass_through() => return Err(ExecError::Service(e)),
                Ok(Err(e)) if e.needs_reconnect() => {
                    warn!(op = op_name, error = %e, "reconnecting after transient fault");
                    self.session.reestablish();
                    retries -= 1;
                }
                Ok(Err(e)) => {
                    warn!(op = op_name, error = %e, "retrying after unclassified fault");
                    retries -= 1;
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    warn!(op = op_name, deadline_ms = deadline.as_millis() as u64, "call timed out");
                    return Err(ExecError::Timeout(TimeoutError {
                        op: op_name.to_string(),
                        deadline_ms: deadline.as_millis() as u64,
                    }));
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    return Err(ExecError::Service(ServiceError::Other(
                        "worker thread dropped without a result".to_string(),
                    )));
                }
            }
        }
    }
}
