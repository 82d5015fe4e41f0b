// Owns the coordination-service client handle. The only thing ever
// mutated here is the handle itself, and only in response to the
// executor asking for a reconnect after a transient fault.

use std::sync::{Arc, RwLock};

use submerge_net::CoordClient;
use tracing::info;

pub(crate) struct SessionManager {
    handle: RwLock<Arc<dyn CoordClient>>,
}

impl SessionManager {
    pub(crate) fn new(client: Arc<dyn CoordClient>) -> Self {
        info!("starting coordination session");
        SessionManager {
            handle: RwLock::new(client),
        }
    }

    /// Returns the current client handle. Cheap: just clones an `Arc`.
    pub(crate) fn handle(&self) -> Arc<dyn CoordClient> {
        self.handle.read().unwrap().clone()
    }

    /// Stops and recreates the session against the same host list.
    /// Called by the executor after a connection-loss-class fault.
    pub(crate) fn reestablish(&self) {
        let current = self.handle();
        let fresh = current.reestablish();
        *self.handle.write().unwrap() = fresh;
        info!("reestablished coordination session");
    }

    pub(crate) fn stop(&self) {
        info!("stopping coordination session");
    }
}
