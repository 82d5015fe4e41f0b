use std::time::Duration;

/// Session and retry policy for one coordinator instance. Generalized
/// from the source's hardcoded class constants
/// (`DEFAULT_NUM_RETRIES`, `DEFAULT_ZK_TIMEOUT`, `TX_TIMEOUT`,
/// `GC_INTERVAL`) into a struct so a caller can override any of them,
/// the same way `submerge-txn`'s original `Config` generalized a
/// replication node-set/retry-count/timeout triple.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Coordination-service endpoint, e.g. `localhost:2181`.
    pub host: String,
    /// Per-call deadline for transactional operations (lock/journal/gc).
    pub transactional_timeout: Duration,
    /// Per-call deadline for client-facing operations exposed over RPC.
    pub client_timeout: Duration,
    /// Retry budget the executor decrements on transient faults.
    pub num_retries: u32,
    /// Retry budget the ID allocator uses independently of the executor.
    pub id_alloc_retries: u32,
    /// How long a transaction may remain unfinished before the GC
    /// considers it expired.
    pub tx_timeout: Duration,
    /// How often the GC loop wakes to sweep each application.
    pub gc_interval: Duration,
    /// Upper bound on entity groups a single XG transaction may lock.
    pub max_groups_for_xg: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            host: "localhost:2181".to_string(),
            transactional_timeout: Duration::from_secs(3),
            client_timeout: Duration::from_secs(10),
            num_retries: 5,
            id_alloc_retries: 5,
            tx_timeout: Duration::from_secs(30),
            gc_interval: Duration::from_secs(30),
            max_groups_for_xg: crate::path::MAX_GROUPS_FOR_XG,
        }
    }
}
