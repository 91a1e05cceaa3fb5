//! Cluster Registry (C1): named physical clusters and their connection URIs.

pub mod cluster;
pub mod error;

pub use cluster::Cluster;
pub use error::Error;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

use crate::db::{DocumentDatabase, Query};
use crate::location::Location;

const CLUSTERS_COLLECTION: &str = "clusters";

/// Durable `clusters` records, plus a per-name URI cache with a fixed TTL
/// (§4.1: 600s by default).
pub struct ClusterRegistry {
    controller: Arc<dyn DocumentDatabase>,
    controller_db: String,
    uri_cache: DashMap<String, (String, Instant)>,
    uri_cache_ttl: Duration,
}

impl ClusterRegistry {
    pub fn new(
        controller: Arc<dyn DocumentDatabase>,
        controller_db: impl Into<String>,
        uri_cache_ttl: Duration,
    ) -> Self {
        Self {
            controller,
            controller_db: controller_db.into(),
            uri_cache: DashMap::new(),
            uri_cache_ttl,
        }
    }

    /// Idempotent: if `name` already exists with a different URI, logs and
    /// keeps the stored URI (§4.1, R2).
    pub async fn ensure_cluster_exists(&self, name: &str, uri: &str) -> Result<(), Error> {
        match self.find_cluster(name).await? {
            Some(existing) => {
                if existing.uri != uri {
                    warn!(
                        cluster = name,
                        stored_uri = %existing.uri,
                        requested_uri = %uri,
                        "ensure_cluster_exists called with a different URI; keeping stored URI"
                    );
                }
                Ok(())
            }
            None => self.insert_cluster(name, uri, None).await,
        }
    }

    /// Unconditional insert; fails if `name` already exists.
    pub async fn add_cluster(&self, name: &str, uri: &str) -> Result<(), Error> {
        if self.find_cluster(name).await?.is_some() {
            return Err(Error::ClusterAlreadyExists(name.to_string()));
        }
        self.insert_cluster(name, uri, None).await
    }

    /// Returns the URI for `name`, using the cache when fresh.
    pub async fn get_cluster_uri(&self, name: &str) -> Result<String, Error> {
        if let Some(entry) = self.uri_cache.get(name) {
            let (uri, cached_at) = entry.value();
            if cached_at.elapsed() < self.uri_cache_ttl {
                return Ok(uri.clone());
            }
        }

        let cluster = self
            .find_cluster(name)
            .await?
            .ok_or_else(|| Error::UnknownCluster(name.to_string()))?;
        self.uri_cache
            .insert(name.to_string(), (cluster.uri.clone(), Instant::now()));
        Ok(cluster.uri)
    }

    /// The full cluster record, including its hidden-secondary hook, for
    /// the migration engine's optional hidden-secondary reads (§4.6).
    pub async fn get_cluster(&self, name: &str) -> Result<Cluster, Error> {
        self.find_cluster(name)
            .await?
            .ok_or_else(|| Error::UnknownCluster(name.to_string()))
    }

    /// Records (or clears) the replica-set host used for hidden-secondary
    /// reads during migration (§4.6). Not part of the spec's core API
    /// surface, but needed to populate the field the migration engine's
    /// hidden-secondary hook reads.
    pub async fn set_hidden_secondary_host(
        &self,
        name: &str,
        host: Option<&str>,
    ) -> Result<(), Error> {
        self.get_cluster(name).await?;
        let query = Query::binding("name", &serde_json::Value::from(name));
        let mut set = serde_json::Map::new();
        set.insert(
            "hidden_secondary_host".into(),
            host.map(serde_json::Value::from).unwrap_or(serde_json::Value::Null),
        );
        let mut update_doc = serde_json::Map::new();
        update_doc.insert("$set".into(), serde_json::Value::Object(set));
        self.controller
            .update(
                &self.controller_db,
                CLUSTERS_COLLECTION,
                &query,
                &crate::db::Update::new(update_doc),
                false,
            )
            .await?;
        Ok(())
    }

    pub fn parse_location(s: &str) -> Result<Location, Error> {
        Location::parse(s)
    }

    /// Drops every cached cluster URI (§4.3: `wipe_metadata` "drops every
    /// in-memory cache").
    pub fn clear_uri_cache(&self) {
        self.uri_cache.clear();
    }

    /// Fails with [`Error::UnknownCluster`] if the referenced cluster
    /// doesn't exist (used to validate location strings before they're
    /// persisted, per §4.4's `_assert_valid_location` behavior).
    pub async fn assert_valid_location(&self, location: &Location) -> Result<(), Error> {
        self.get_cluster_uri(&location.cluster).await?;
        Ok(())
    }

    async fn find_cluster(&self, name: &str) -> Result<Option<Cluster>, Error> {
        let query = Query::binding("name", &serde_json::Value::from(name));
        let docs = self
            .controller
            .find(&self.controller_db, CLUSTERS_COLLECTION, &query)
            .await?;
        Ok(docs.first().and_then(Cluster::from_document))
    }

    async fn insert_cluster(
        &self,
        name: &str,
        uri: &str,
        hidden_secondary_host: Option<String>,
    ) -> Result<(), Error> {
        let cluster = Cluster {
            name: name.to_string(),
            uri: uri.to_string(),
            hidden_secondary_host,
        };
        self.controller
            .insert(&self.controller_db, CLUSTERS_COLLECTION, cluster.to_document())
            .await?;
        info!(cluster = name, "cluster registered");
        Ok(())
    }
}
