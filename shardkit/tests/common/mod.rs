//! Shared harness for the scenario/invariant integration tests: wires a
//! [`Controller`] against a handful of named [`InMemoryDatabase`] clusters
//! so each test only has to describe realm/shard setup, not plumbing.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use shardkit::db::{DbError, Document, DocumentDatabase};
use shardkit::pool::Connector;
use shardkit::testing::InMemoryDatabase;
use shardkit::Controller;
use shardkit_config::Config;

/// Builds a document from `(field, value)` pairs.
pub fn doc(pairs: &[(&str, Value)]) -> Document {
    let mut out = Document::new();
    for (k, v) in pairs {
        out.insert((*k).to_string(), v.clone());
    }
    out
}

pub struct Harness {
    pub controller: Controller,
    pub controller_db: Arc<InMemoryDatabase>,
    pub clusters: HashMap<String, Arc<InMemoryDatabase>>,
}

impl Harness {
    /// The raw `InMemoryDatabase` behind a cluster name, for direct
    /// inspection bypassing the router.
    pub fn cluster(&self, name: &str) -> Arc<InMemoryDatabase> {
        self.clusters.get(name).unwrap_or_else(|| panic!("unknown test cluster {name}")).clone()
    }
}

/// Spins up a controller with one in-memory database per name in
/// `cluster_names`, each addressable as `"mem://<name>"`, plus a separate
/// controller-database connection. `caching_duration_secs` should stay
/// small (tens to hundreds of ms) so migration tests that depend on the
/// sync-phase TTL finish quickly.
pub async fn harness(cluster_names: &[&str], caching_duration_secs: f64) -> Harness {
    let controller_db = Arc::new(InMemoryDatabase::new());
    let mut clusters = HashMap::new();
    for name in cluster_names {
        clusters.insert(name.to_string(), Arc::new(InMemoryDatabase::new()));
    }

    let controller_db_for_connector = controller_db.clone();
    let clusters_for_connector = clusters.clone();
    let connector: Connector = Arc::new(move |uri: &str| {
        if uri == "mem://controller" {
            return Ok(controller_db_for_connector.clone() as Arc<dyn DocumentDatabase>);
        }
        let name = uri.strip_prefix("mem://").unwrap_or(uri);
        clusters_for_connector
            .get(name)
            .cloned()
            .map(|db| db as Arc<dyn DocumentDatabase>)
            .ok_or_else(|| DbError::Operation(format!("unknown test cluster uri {uri}")))
    });

    let mut config = Config::default();
    config.controller_uri = "mem://controller".into();
    config.caching_duration_secs = caching_duration_secs;
    config.insert_throttle_secs = 0.0;
    config.delete_throttle_secs = 0.0;

    let controller = Controller::new(config, connector).await.expect("controller starts");
    for name in cluster_names {
        controller
            .ensure_cluster_exists(name, &format!("mem://{name}"))
            .await
            .expect("ensure_cluster_exists");
    }

    Harness { controller, controller_db, clusters }
}
