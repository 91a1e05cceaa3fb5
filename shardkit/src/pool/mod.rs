//! Connection Pool (C2): per-caller connection cache to each cluster.

pub mod error;

pub use error::Error;

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::db::{DbError, DocumentDatabase};
use crate::registry::ClusterRegistry;

/// The caller-context a connection is cached under: request-scoped in a
/// server, migration-scoped in the migration worker (§4.2, §9 Design
/// Notes — replaces the teacher's thread-identity key with an explicit
/// value threaded through API calls).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerId(String);

impl CallerId {
    /// A fresh, unique caller context (e.g. one per inbound request).
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// A caller context with a stable, human-readable name (e.g. one per
    /// migration worker).
    pub fn named(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl Default for CallerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opens a client connected to a cluster's URI. Supplied by the embedding
/// application: opening an actual driver connection is outside this
/// crate's scope (§1).
pub type Connector =
    Arc<dyn Fn(&str) -> Result<Arc<dyn DocumentDatabase>, DbError> + Send + Sync>;

/// Per-`(caller, cluster)` connection cache. Connections are never evicted
/// by TTL (§4.2) — only by [`ConnectionPool::close_caller_connections`].
pub struct ConnectionPool {
    registry: Arc<ClusterRegistry>,
    connector: Connector,
    connections: DashMap<(CallerId, String), Arc<dyn DocumentDatabase>>,
}

impl ConnectionPool {
    pub fn new(registry: Arc<ClusterRegistry>, connector: Connector) -> Self {
        Self {
            registry,
            connector,
            connections: DashMap::new(),
        }
    }

    /// Returns the cached connection for `(caller, cluster)`, opening and
    /// caching one on first access.
    pub async fn get(
        &self,
        caller: &CallerId,
        cluster: &str,
    ) -> Result<Arc<dyn DocumentDatabase>, Error> {
        let key = (caller.clone(), cluster.to_string());
        if let Some(conn) = self.connections.get(&key) {
            return Ok(conn.clone());
        }

        let uri = self.registry.get_cluster_uri(cluster).await?;
        let conn = (self.connector)(&uri)?;
        self.connections.insert(key, conn.clone());
        debug!(%caller, cluster, "opened connection");
        Ok(conn)
    }

    /// Closes and evicts every connection belonging to `caller` (§4.2,
    /// §5: the migration worker closes its own connections on exit).
    pub fn close_caller_connections(&self, caller: &CallerId) {
        let keys: Vec<_> = self
            .connections
            .iter()
            .filter(|entry| &entry.key().0 == caller)
            .map(|entry| entry.key().clone())
            .collect();
        for key in keys {
            self.connections.remove(&key);
        }
        debug!(%caller, "closed caller connections");
    }
}
