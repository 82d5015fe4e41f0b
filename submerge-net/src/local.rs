use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::coord::CoordClient;
use crate::error::ServiceError;

#[derive(Debug, Clone)]
struct NodeData {
    value: String,
    /// Some(generation) if this node is ephemeral and owned by that
    /// session generation; None if persistent.
    ephemeral_owner: Option<u64>,
}

#[derive(Default)]
struct Ensemble {
    nodes: BTreeMap<String, NodeData>,
    /// Per-prefix monotonic counters, emulating ZooKeeper's per-parent
    /// sequence-node numbering.
    sequence_counters: BTreeMap<String, u64>,
    generation: u64,
    /// A queue of faults to hand back on the next call instead of doing
    /// real work, used to exercise the executor's reconnect/retry path
    /// without a real flaky network.
    injected_faults: Vec<ServiceError>,
}

/// An in-memory stand-in for a ZooKeeper-like coordination service.
///
/// `LocalCoord` is both the default backend for the `submerge` binary's
/// standalone mode and the backend every test in this workspace runs
/// against. A `LocalCoord` handle represents one client session; calling
/// [`LocalCoord::reestablish`] simulates a session manager dropping and
/// recreating its connection: the ensemble's shared, persistent state
/// survives, but every ephemeral node owned by the old session
/// generation is dropped, just as ZooKeeper would drop them when a
/// session expires.
pub struct LocalCoord {
    ensemble: Arc<Mutex<Ensemble>>,
    generation: u64,
}

impl Default for LocalCoord {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCoord {
    pub fn new() -> Self {
        LocalCoord {
            ensemble: Arc::new(Mutex::new(Ensemble::default())),
            generation: 0,
        }
    }

    /// Returns a new handle sharing this coordinator's persistent state
    /// but starting a fresh session generation, dropping any ephemeral
    /// nodes the old generation owned. Mirrors the source's
    /// `reestablish_connection`, which stops and recreates the kazoo
    /// client against the same host list.
    pub fn reestablish(&self) -> LocalCoord {
        let mut e = self.ensemble.lock().unwrap();
        e.generation += 1;
        let new_gen = e.generation;
        e.nodes
            .retain(|_, n| !matches!(n.ephemeral_owner, Some(g) if g < new_gen));
        debug!(generation = new_gen, "reestablished coordination session");
        LocalCoord {
            ensemble: self.ensemble.clone(),
            generation: new_gen,
        }
    }

    /// Queues `fault` to be returned, instead of performing real work,
    /// on the next call made through any handle sharing this ensemble.
    /// Test-only: simulates a single flaky call.
    pub fn inject_fault(&self, fault: ServiceError) {
        self.ensemble.lock().unwrap().injected_faults.push(fault);
    }

    fn take_injected_fault(e: &mut Ensemble) -> Option<ServiceError> {
        if e.injected_faults.is_empty() {
            None
        } else {
            Some(e.injected_faults.remove(0))
        }
    }

    fn ensure_parents(e: &mut Ensemble, path: &str) {
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);
            if prefix == path {
                break;
            }
            e.nodes.entry(prefix.clone()).or_insert_with(|| NodeData {
                value: String::new(),
                ephemeral_owner: None,
            });
        }
    }
}

impl CoordClient for LocalCoord {
    fn create(&self, path: &str, value: &str, ephemeral: bool) -> Result<(), ServiceError> {
        let mut e = self.ensemble.lock().unwrap();
        if let Some(fault) = Self::take_injected_fault(&mut e) {
            return Err(fault);
        }
        if e.nodes.contains_key(path) {
            return Err(ServiceError::NodeExists(path.to_string()));
        }
        Self::ensure_parents(&mut e, path);
        e.nodes.insert(
            path.to_string(),
            NodeData {
                value: value.to_string(),
                ephemeral_owner: if ephemeral { Some(self.generation) } else { None },
            },
        );
        Ok(())
    }

    fn create_sequential(&self, path_prefix: &str, value: &str) -> Result<String, ServiceError> {
        let mut e = self.ensemble.lock().unwrap();
        if let Some(fault) = Self::take_injected_fault(&mut e) {
            return Err(fault);
        }
        let counter = e.sequence_counters.entry(path_prefix.to_string()).or_insert(0);
        let seq = *counter;
        *counter += 1;
        let path = format!("{path_prefix}{seq:010}");
        Self::ensure_parents(&mut e, &path);
        e.nodes.insert(
            path.clone(),
            NodeData {
                value: value.to_string(),
                ephemeral_owner: None,
            },
        );
        Ok(path)
    }

    fn set(&self, path: &str, value: &str) -> Result<(), ServiceError> {
        let mut e = self.ensemble.lock().unwrap();
        if let Some(fault) = Self::take_injected_fault(&mut e) {
            return Err(fault);
        }
        Self::ensure_parents(&mut e, path);
        match e.nodes.get_mut(path) {
            Some(n) => n.value = value.to_string(),
            None => {
                e.nodes.insert(
                    path.to_string(),
                    NodeData {
                        value: value.to_string(),
                        ephemeral_owner: None,
                    },
                );
            }
        }
        Ok(())
    }

    fn get(&self, path: &str) -> Result<String, ServiceError> {
        let mut e = self.ensemble.lock().unwrap();
        if let Some(fault) = Self::take_injected_fault(&mut e) {
            return Err(fault);
        }
        e.nodes
            .get(path)
            .map(|n| n.value.clone())
            .ok_or_else(|| ServiceError::NoNode(path.to_string()))
    }

    fn delete(&self, path: &str) -> Result<(), ServiceError> {
        let mut e = self.ensemble.lock().unwrap();
        if let Some(fault) = Self::take_injected_fault(&mut e) {
            return Err(fault);
        }
        e.nodes
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ServiceError::NoNode(path.to_string()))
    }

    fn list_children(&self, path: &str) -> Result<Vec<String>, ServiceError> {
        let mut e = self.ensemble.lock().unwrap();
        if let Some(fault) = Self::take_injected_fault(&mut e) {
            return Err(fault);
        }
        if !e.nodes.contains_key(path) {
            return Err(ServiceError::NoNode(path.to_string()));
        }
        let prefix = format!("{path}/");
        let children = e
            .nodes
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(|rest| rest.to_string())
            .collect();
        Ok(children)
    }

    fn exists(&self, path: &str) -> Result<bool, ServiceError> {
        let mut e = self.ensemble.lock().unwrap();
        if let Some(fault) = Self::take_injected_fault(&mut e) {
            return Err(fault);
        }
        Ok(e.nodes.contains_key(path))
    }

    fn reestablish(&self) -> Arc<dyn CoordClient> {
        Arc::new(LocalCoord::reestablish(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn create_and_get_roundtrip() {
        let coord = LocalCoord::new();
        coord.create("/appscale/apps", "", false).unwrap();
        coord.create("/appscale/apps/app1", "", false).unwrap();
        assert_eq!(coord.get("/appscale/apps/app1").unwrap(), "");
        assert!(matches!(
            coord.create("/appscale/apps/app1", "", false),
            Err(ServiceError::NodeExists(_))
        ));
    }

    #[test_log::test]
    fn sequence_numbers_are_monotonic() {
        let coord = LocalCoord::new();
        let p1 = coord.create_sequential("/appscale/apps/app1/txids/tx", "1").unwrap();
        let p2 = coord.create_sequential("/appscale/apps/app1/txids/tx", "2").unwrap();
        assert_eq!(p1, "/appscale/apps/app1/txids/tx0000000000");
        assert_eq!(p2, "/appscale/apps/app1/txids/tx0000000001");
    }

    #[test_log::test]
    fn list_children_enumerates_direct_children_only() {
        let coord = LocalCoord::new();
        coord.create("/a", "", false).unwrap();
        coord.create("/a/b", "", false).unwrap();
        coord.create("/a/b/c", "", false).unwrap();
        coord.create("/a/d", "", false).unwrap();
        let mut children = coord.list_children("/a").unwrap();
        children.sort();
        assert_eq!(children, vec!["b".to_string(), "d".to_string()]);
    }

    #[test_log::test]
    fn reestablish_drops_old_generation_ephemerals_but_keeps_persistent_state() {
        let coord = LocalCoord::new();
        coord.create("/locks/k", "owner", false).unwrap();
        coord.create("/gc/app1/gclock", "t", true).unwrap();
        let coord2 = coord.reestablish();
        assert!(coord2.exists("/locks/k").unwrap());
        assert!(!coord2.exists("/gc/app1/gclock").unwrap());
    }

    #[test_log::test]
    fn injected_fault_is_returned_once() {
        let coord = LocalCoord::new();
        coord.inject_fault(ServiceError::ConnectionLoss);
        assert!(matches!(
            coord.create("/x", "v", false),
            Err(ServiceError::ConnectionLoss)
        ));
        assert!(coord.create("/x", "v", false).is_ok());
    }
}
