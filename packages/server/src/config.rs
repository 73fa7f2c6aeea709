//! Node configuration.

use std::time::Duration;

/// Timing and naming parameters of one node.
///
/// Every node of a deployment must use the same `namespace`, `lock_ttl` and
/// `heartbeat_ttl`; the remaining intervals are node-local.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Prefix of every store key and backplane channel
    pub namespace: String,
    /// Lease length of a piece lock
    pub lock_ttl: Duration,
    /// How long a connection counts as alive after its last heartbeat
    pub heartbeat_ttl: Duration,
    /// How often a node refreshes heartbeats of its local connections
    pub heartbeat_interval: Duration,
    pub reaper_interval: Duration,
    /// How long an empty session survives before it is destroyed
    pub session_grace: Duration,
    /// Zero disables periodic resync
    pub resync_interval: Duration,
    /// Zero disables the snapshot writer
    pub snapshot_interval: Duration,
    /// A connection that sends nothing for this long is closed
    pub client_idle_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            namespace: "kumitate".to_string(),
            lock_ttl: Duration::from_millis(5_000),
            heartbeat_ttl: Duration::from_millis(15_000),
            heartbeat_interval: Duration::from_millis(5_000),
            reaper_interval: Duration::from_millis(5_000),
            session_grace: Duration::from_millis(60_000),
            resync_interval: Duration::from_millis(30_000),
            snapshot_interval: Duration::from_millis(30_000),
            client_idle_timeout: Duration::from_millis(30_000),
        }
    }
}

impl SyncConfig {
    /// Worst-case time from a connection's last heartbeat until its locks are free
    pub fn cleanup_bound(&self) -> Duration {
        self.heartbeat_ttl + self.lock_ttl
    }
}
