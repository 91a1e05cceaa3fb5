//! The library's single entry point (§9 Design Notes): an explicit,
//! dependency-injected `Controller` replaces the teacher's global
//! `ArcSwap`/`Lazy` registries, so an application can hold more than one
//! independently-configured instance and tests never share process state.

use std::sync::Arc;

use shardkit_config::Config;
use tracing::info;

use crate::collection::ShardAwareCollection;
use crate::db::DocumentDatabase;
use crate::error::Error;
use crate::key::ShardKey;
use crate::location::Location;
use crate::metadata::MetadataRegistry;
use crate::migration::{self, MigrationManager, MigrationOptions};
use crate::pause::PauseGate;
use crate::pool::{CallerId, Connector, ConnectionPool};
use crate::registry::ClusterRegistry;
use crate::router::{OperationRouter, UntargetedHook};

/// Invoked once, right after the controller connection is established
/// (§6 Configuration: "optional post-connect callbacks").
pub type PostConnectHook = Arc<dyn Fn(&Arc<dyn DocumentDatabase>) + Send + Sync>;

#[derive(Default)]
pub struct ControllerOptions {
    pub post_connect: Vec<PostConnectHook>,
    pub untargeted_hook: Option<UntargetedHook>,
}

pub struct Controller {
    config: Config,
    registry: Arc<ClusterRegistry>,
    pool: Arc<ConnectionPool>,
    metadata: Arc<MetadataRegistry>,
    router: Arc<OperationRouter>,
}

impl Controller {
    pub async fn new(config: Config, connector: Connector) -> Result<Self, Error> {
        Self::with_options(config, connector, ControllerOptions::default()).await
    }

    pub async fn with_options(
        config: Config,
        connector: Connector,
        options: ControllerOptions,
    ) -> Result<Self, Error> {
        let controller_conn = (connector)(&config.controller_uri)?;
        for hook in &options.post_connect {
            hook(&controller_conn);
        }

        let registry = Arc::new(ClusterRegistry::new(
            controller_conn.clone(),
            config.controller_database.clone(),
            config.cluster_uri_cache_ttl(),
        ));
        let metadata = Arc::new(MetadataRegistry::new(
            controller_conn,
            config.controller_database.clone(),
            config.caching_duration(),
        ));
        let pool = Arc::new(ConnectionPool::new(registry.clone(), connector));
        let pause = Arc::new(PauseGate::new());

        let mut router = OperationRouter::new(pool.clone(), metadata.clone(), pause);
        if let Some(hook) = options.untargeted_hook {
            router = router.with_untargeted_hook(hook);
        }

        info!(controller_uri = %config.controller_uri, "controller ready");
        Ok(Self {
            config,
            registry,
            pool,
            metadata,
            router: Arc::new(router),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn ensure_cluster_exists(&self, name: &str, uri: &str) -> Result<(), Error> {
        Ok(self.registry.ensure_cluster_exists(name, uri).await?)
    }

    pub async fn add_cluster(&self, name: &str, uri: &str) -> Result<(), Error> {
        Ok(self.registry.add_cluster(name, uri).await?)
    }

    pub async fn ensure_realm_exists(
        &self,
        name: &str,
        shard_field: &str,
        collection: &str,
        default_dest: Location,
    ) -> Result<(), Error> {
        Ok(self.metadata.ensure_realm_exists(name, shard_field, collection, default_dest).await?)
    }

    pub async fn set_shard_at_rest(
        &self,
        realm: &str,
        key: ShardKey,
        location: Location,
        force: bool,
    ) -> Result<(), Error> {
        Ok(self.metadata.set_shard_at_rest(realm, key, location, force).await?)
    }

    /// The internal stage trigger (§6): marks a shard `MIGRATING_COPY` at
    /// `new_location` directly, bypassing the full `do_migration` worker.
    /// Exposed for tests and recovery tooling, not ordinary application
    /// code — prefer `do_migration` for a real migration.
    pub async fn start_migration(&self, realm: &str, key: &ShardKey, new_location: Location) -> Result<(), Error> {
        let store = self.metadata.store_for_realm(realm).await?;
        store.write_status(key, crate::metadata::ShardStatus::MigratingCopy, Some(&new_location)).await?;
        Ok(())
    }

    pub async fn where_is(&self, collection: &str, key: &ShardKey) -> Result<Location, Error> {
        Ok(self.router.where_is(collection, key).await?)
    }

    pub fn make_collection_shard_aware(&self, collection: &str) -> ShardAwareCollection {
        ShardAwareCollection::new(self.router.clone(), collection)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn do_migration(
        &self,
        collection: &str,
        key: ShardKey,
        new_location: Location,
        opts: MigrationOptions,
    ) -> Result<Arc<MigrationManager>, Error> {
        Ok(migration::do_migration(
            self.pool.clone(),
            self.metadata.clone(),
            self.registry.clone(),
            collection,
            key,
            new_location,
            &self.config,
            opts,
        )
        .await?)
    }

    pub async fn fix_failed_pre_delete(&self, realm: &str, key: &ShardKey) -> Result<(), Error> {
        Ok(migration::fix_failed_pre_delete(&self.pool, &self.metadata, realm, key).await?)
    }

    pub async fn fix_failed_during_delete(&self, realm: &str, key: &ShardKey) -> Result<(), Error> {
        Ok(migration::fix_failed_during_delete(&self.pool, &self.metadata, realm, key).await?)
    }

    pub async fn wipe_metadata(&self) -> Result<(), Error> {
        self.metadata.wipe_metadata().await?;
        self.registry.clear_uri_cache();
        Ok(())
    }

    pub fn new_caller(&self) -> CallerId {
        CallerId::new()
    }

    pub fn close_caller(&self, caller: &CallerId) {
        self.pool.close_caller_connections(caller);
    }
}
