//! Metadata Store (C3): durable realm/shard/cluster records, and the
//! caching layer that makes repeated lookups cheap.

pub mod cache;
pub mod error;
pub mod realm;
pub mod shard;
pub mod status;

pub use cache::{CachingDuration, RealmCache, ShardMetadataStore};
pub use error::Error;
pub use realm::{Realm, ShardType};
pub use shard::Shard;
pub use status::ShardStatus;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::info;

use crate::db::DocumentDatabase;
use crate::key::ShardKey;
use crate::location::Location;

const REALMS_COLLECTION: &str = "realms";
const SHARDS_COLLECTION: &str = "shards";
const CLUSTERS_COLLECTION: &str = "clusters";

/// Owns every per-realm [`ShardMetadataStore`] plus the shared realm
/// lookup cache and the process-wide `caching_duration` (§4.3).
pub struct MetadataRegistry {
    controller: Arc<dyn DocumentDatabase>,
    controller_db: String,
    caching_duration: CachingDuration,
    realm_cache: RealmCache,
    stores: DashMap<String, Arc<ShardMetadataStore>>,
}

impl MetadataRegistry {
    pub fn new(
        controller: Arc<dyn DocumentDatabase>,
        controller_db: impl Into<String>,
        caching_duration: Duration,
    ) -> Self {
        let controller_db = controller_db.into();
        let caching_duration = CachingDuration::new(caching_duration);
        Self {
            realm_cache: RealmCache::new(controller.clone(), controller_db.clone(), caching_duration.clone()),
            stores: DashMap::new(),
            controller,
            controller_db,
            caching_duration,
        }
    }

    pub fn caching_duration(&self) -> Duration {
        self.caching_duration.get()
    }

    /// Setting the TTL clears every cache: a stale TTL would break the
    /// write-pause discipline (§4.3, §4.6 step 5).
    pub fn set_caching_duration(&self, duration: Duration) {
        self.caching_duration.set(duration);
        self.realm_cache.clear();
        for store in self.stores.iter() {
            store.invalidate();
        }
    }

    pub async fn ensure_realm_exists(
        &self,
        name: &str,
        shard_field: &str,
        collection: &str,
        default_dest: Location,
    ) -> Result<(), Error> {
        if let Ok(existing) = self.realm_cache.by_name(name).await {
            return self.check_realm_matches(&existing, shard_field, collection, &default_dest);
        }
        if let Ok(existing) = self.realm_cache.by_collection(collection).await {
            return self.check_realm_matches(&existing, shard_field, collection, &default_dest);
        }

        let realm = Realm {
            name: name.to_string(),
            shard_field: shard_field.to_string(),
            collection: collection.to_string(),
            default_dest,
            shard_type: ShardType::SingleValue,
        };
        self.controller
            .insert(&self.controller_db, REALMS_COLLECTION, realm.to_document())
            .await?;
        info!(realm = name, collection, "realm registered");
        Ok(())
    }

    fn check_realm_matches(
        &self,
        existing: &Realm,
        shard_field: &str,
        collection: &str,
        default_dest: &Location,
    ) -> Result<(), Error> {
        if existing.shard_field != shard_field {
            return Err(Error::RealmImmutable {
                realm: existing.name.clone(),
                field: "shard_field",
            });
        }
        if existing.collection != collection {
            return Err(Error::RealmImmutable {
                realm: existing.name.clone(),
                field: "collection",
            });
        }
        if &existing.default_dest != default_dest {
            return Err(Error::RealmImmutable {
                realm: existing.name.clone(),
                field: "default_dest",
            });
        }
        Ok(())
    }

    pub async fn realm_by_name(&self, name: &str) -> Result<Realm, Error> {
        self.realm_cache.by_name(name).await
    }

    pub async fn realm_for_collection(&self, collection: &str) -> Result<Realm, Error> {
        self.realm_cache.by_collection(collection).await
    }

    /// The per-realm shard metadata store, created lazily on first access.
    pub async fn store_for_realm(&self, realm_name: &str) -> Result<Arc<ShardMetadataStore>, Error> {
        if let Some(store) = self.stores.get(realm_name) {
            return Ok(store.clone());
        }
        let realm = self.realm_by_name(realm_name).await?;
        let store = Arc::new(ShardMetadataStore::new(
            self.controller.clone(),
            self.controller_db.clone(),
            realm,
            self.caching_duration.clone(),
        ));
        self.stores.insert(realm_name.to_string(), store.clone());
        Ok(store)
    }

    pub async fn store_for_collection(&self, collection: &str) -> Result<Arc<ShardMetadataStore>, Error> {
        let realm = self.realm_for_collection(collection).await?;
        self.store_for_realm(&realm.name).await
    }

    pub async fn set_shard_at_rest(
        &self,
        realm_name: &str,
        key: ShardKey,
        location: Location,
        force: bool,
    ) -> Result<(), Error> {
        let store = self.store_for_realm(realm_name).await?;
        store.set_shard_at_rest(&key, &location, force).await
    }

    /// Invalidates a realm's shard metadata cache (§4.3).
    pub fn realm_changed(&self, realm_name: &str) {
        if let Some(store) = self.stores.get(realm_name) {
            store.invalidate();
        }
    }

    pub async fn get_all_shard_metadata(&self, realm_name: &str) -> Result<HashMap<ShardKey, Shard>, Error> {
        self.store_for_realm(realm_name).await?.get_all_shard_metadata().await
    }

    pub async fn get_single_shard_metadata(&self, realm_name: &str, key: &ShardKey) -> Result<Shard, Error> {
        self.store_for_realm(realm_name).await?.get_single_shard_metadata(key).await
    }

    /// Test-only: wipes every realm/shard/cluster record and drops every
    /// in-memory cache (§4.3).
    pub async fn wipe_metadata(&self) -> Result<(), Error> {
        let empty = crate::db::Query::default();
        self.controller.remove(&self.controller_db, REALMS_COLLECTION, &empty).await?;
        self.controller.remove(&self.controller_db, SHARDS_COLLECTION, &empty).await?;
        self.controller.remove(&self.controller_db, CLUSTERS_COLLECTION, &empty).await?;
        self.realm_cache.clear();
        self.stores.clear();
        Ok(())
    }
}
