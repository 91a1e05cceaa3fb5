//! TTL caching layers for C3, mirroring the source's `ShardMetadataStore`:
//! a global per-realm map cache, a per-key refresh path, and a realm
//! lookup cache — each respecting the in-flux-shard short circuit of
//! `SHORT_CACHE_PHASES` (§4.3).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::db::{DocumentDatabase, Query};
use crate::key::ShardKey;
use crate::metadata::realm::Realm;
use crate::metadata::shard::Shard;
use crate::metadata::status::ShardStatus;
use crate::metadata::Error;

const SHARDS_COLLECTION: &str = "shards";
const REALMS_COLLECTION: &str = "realms";

/// The process-wide cache TTL, shared by every `ShardMetadataStore` and
/// the realm cache. Changing it clears every cache it's shared with
/// (§4.3): a stale TTL would let a write slip past the pause discipline.
#[derive(Clone)]
pub struct CachingDuration(Arc<AtomicU64>);

impl CachingDuration {
    pub fn new(duration: Duration) -> Self {
        Self(Arc::new(AtomicU64::new(duration.as_nanos() as u64)))
    }

    pub fn get(&self) -> Duration {
        Duration::from_nanos(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, duration: Duration) {
        self.0.store(duration.as_nanos() as u64, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
enum Expiry {
    /// Always stale: refresh on every lookup (disabled caching, or the
    /// in-flux shard).
    Expired,
    At(Instant),
}

impl Expiry {
    fn fresh(ttl: Duration) -> Self {
        if ttl.is_zero() {
            Expiry::Expired
        } else {
            Expiry::At(Instant::now() + ttl)
        }
    }

    fn is_valid(self) -> bool {
        match self {
            Expiry::Expired => false,
            Expiry::At(instant) => Instant::now() < instant,
        }
    }
}

struct CacheEntry {
    shard: Shard,
    expiry: Expiry,
}

struct Inner {
    cache: HashMap<ShardKey, CacheEntry>,
    global_expiry: Expiry,
    in_flux: Option<ShardKey>,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            cache: HashMap::new(),
            global_expiry: Expiry::Expired,
            in_flux: None,
        }
    }
}

/// One store per realm (§4.3). Caches reads against the `shards`
/// collection; all writes go straight to the controller and are picked up
/// either by TTL expiry or by the in-flux short-circuit below.
pub struct ShardMetadataStore {
    controller: Arc<dyn DocumentDatabase>,
    controller_db: String,
    realm: Realm,
    caching_duration: CachingDuration,
    inner: Mutex<Inner>,
}

impl ShardMetadataStore {
    pub fn new(
        controller: Arc<dyn DocumentDatabase>,
        controller_db: String,
        realm: Realm,
        caching_duration: CachingDuration,
    ) -> Self {
        Self {
            controller,
            controller_db,
            realm,
            caching_duration,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    /// Drops every cached entry. Called by `set_shard_at_rest` (direct
    /// realm-level invalidation) and by `realm_changed`/`wipe_metadata`.
    /// Migration phase transitions deliberately do *not* call this: the
    /// pause-discipline relies on ordinary TTL expiry (§4.6 step 5).
    pub fn invalidate(&self) {
        *self.inner.lock() = Inner::default();
    }

    pub async fn get_single_shard_metadata(&self, key: &ShardKey) -> Result<Shard, Error> {
        if let Some(shard) = self.valid_cached(key) {
            return Ok(shard);
        }
        self.refresh_single(key).await
    }

    pub async fn get_all_shard_metadata(&self) -> Result<HashMap<ShardKey, Shard>, Error> {
        let (global_valid, in_flux) = {
            let inner = self.inner.lock();
            (inner.global_expiry.is_valid(), inner.in_flux.clone())
        };

        if !global_valid {
            self.refresh_all().await?;
        } else if let Some(key) = in_flux {
            self.refresh_single(&key).await?;
        }

        Ok(self
            .inner
            .lock()
            .cache
            .iter()
            .map(|(k, e)| (k.clone(), e.shard.clone()))
            .collect())
    }

    fn valid_cached(&self, key: &ShardKey) -> Option<Shard> {
        let inner = self.inner.lock();
        if inner.in_flux.as_ref() == Some(key) {
            return None;
        }
        inner
            .cache
            .get(key)
            .filter(|entry| entry.expiry.is_valid())
            .map(|entry| entry.shard.clone())
    }

    async fn refresh_single(&self, key: &ShardKey) -> Result<Shard, Error> {
        let found = self.query_shard(Some(key)).await?;
        let ttl = self.caching_duration.get();

        let shard = match found.into_iter().next() {
            Some(shard) => shard,
            None => Shard::virtual_at_rest(&self.realm.name, key.clone(), self.realm.default_dest.clone()),
        };

        let mut inner = self.inner.lock();
        if shard.status.is_short_cache_phase() {
            inner.in_flux = Some(key.clone());
            inner
                .cache
                .insert(key.clone(), CacheEntry { shard: shard.clone(), expiry: Expiry::Expired });
        } else {
            if inner.in_flux.as_ref() == Some(key) {
                inner.in_flux = None;
            }
            inner.cache.insert(
                key.clone(),
                CacheEntry { shard: shard.clone(), expiry: Expiry::fresh(ttl) },
            );
        }
        Ok(shard)
    }

    async fn refresh_all(&self) -> Result<(), Error> {
        let shards = self.query_shard(None).await?;
        let ttl = self.caching_duration.get();
        let global_expiry = Expiry::fresh(ttl);

        let mut cache = HashMap::new();
        let mut in_flux = None;
        for shard in shards {
            let expiry = if shard.status.is_short_cache_phase() {
                if in_flux.is_some() {
                    return Err(Error::ConcurrentMigration(self.realm.name.clone()));
                }
                in_flux = Some(shard.shard_key.clone());
                Expiry::Expired
            } else {
                global_expiry
            };
            cache.insert(shard.shard_key.clone(), CacheEntry { shard, expiry });
        }

        let mut inner = self.inner.lock();
        inner.cache = cache;
        inner.global_expiry = global_expiry;
        inner.in_flux = in_flux;
        debug!(realm = %self.realm.name, "refreshed shard metadata cache");
        Ok(())
    }

    async fn query_shard(&self, key: Option<&ShardKey>) -> Result<Vec<Shard>, Error> {
        let mut doc = serde_json::Map::new();
        doc.insert("realm".into(), serde_json::Value::from(self.realm.name.clone()));
        if let Some(key) = key {
            doc.insert("shard_key".into(), key.to_value());
        }
        let docs = self
            .controller
            .find(&self.controller_db, SHARDS_COLLECTION, &Query::new(doc))
            .await?;
        docs.iter().map(Shard::from_document).collect()
    }

    /// Raw write used by the migration engine for phase transitions
    /// (§4.6). Deliberately bypasses `inner` — see [`Self::invalidate`].
    pub async fn write_status(
        &self,
        key: &ShardKey,
        status: ShardStatus,
        new_location: Option<&crate::location::Location>,
    ) -> Result<(), Error> {
        let mut query = serde_json::Map::new();
        query.insert("realm".into(), serde_json::Value::from(self.realm.name.clone()));
        query.insert("shard_key".into(), key.to_value());

        let mut set = serde_json::Map::new();
        set.insert("status".into(), serde_json::to_value(status).unwrap());
        if let Some(loc) = new_location {
            set.insert("new_location".into(), serde_json::Value::from(loc.to_string()));
        }
        let mut update = serde_json::Map::new();
        update.insert("$set".into(), serde_json::Value::Object(set));

        self.controller
            .update(
                &self.controller_db,
                SHARDS_COLLECTION,
                &Query::new(query),
                &crate::db::Update::new(update),
                false,
            )
            .await?;
        Ok(())
    }

    /// Sets a shard to `AT_REST` at `location`, clearing `new_location`.
    /// Fails with [`Error::ShardAlreadyPlaced`] unless `force` or the
    /// shard doesn't exist yet. Invalidates this realm's cache.
    pub async fn set_shard_at_rest(
        &self,
        key: &ShardKey,
        location: &crate::location::Location,
        force: bool,
    ) -> Result<(), Error> {
        let existing = self.query_shard(Some(key)).await?;
        if !existing.is_empty() && !force {
            return Err(Error::ShardAlreadyPlaced {
                realm: self.realm.name.clone(),
                key: key.to_string(),
            });
        }

        let mut query = serde_json::Map::new();
        query.insert("realm".into(), serde_json::Value::from(self.realm.name.clone()));
        query.insert("shard_key".into(), key.to_value());

        let record = Shard {
            realm: self.realm.name.clone(),
            shard_key: key.clone(),
            location: location.clone(),
            new_location: None,
            status: ShardStatus::AtRest,
        };

        self.controller
            .update(
                &self.controller_db,
                SHARDS_COLLECTION,
                &Query::new(query),
                &crate::db::Update::new(record.to_document()),
                true,
            )
            .await?;

        self.invalidate();
        Ok(())
    }
}

/// Caches `Realm` lookups by name and by collection, with the same TTL
/// discipline as the shard cache (§4.3).
pub struct RealmCache {
    controller: Arc<dyn DocumentDatabase>,
    controller_db: String,
    caching_duration: CachingDuration,
    by_name: Mutex<HashMap<String, (Realm, Instant)>>,
    by_collection: Mutex<HashMap<String, (Realm, Instant)>>,
}

impl RealmCache {
    pub fn new(
        controller: Arc<dyn DocumentDatabase>,
        controller_db: String,
        caching_duration: CachingDuration,
    ) -> Self {
        Self {
            controller,
            controller_db,
            caching_duration,
            by_name: Mutex::new(HashMap::new()),
            by_collection: Mutex::new(HashMap::new()),
        }
    }

    pub fn clear(&self) {
        self.by_name.lock().clear();
        self.by_collection.lock().clear();
    }

    pub async fn by_name(&self, name: &str) -> Result<Realm, Error> {
        if let Some((realm, at)) = self.by_name.lock().get(name) {
            if Instant::now() < *at {
                return Ok(realm.clone());
            }
        }
        let mut query = serde_json::Map::new();
        query.insert("name".into(), serde_json::Value::from(name));
        let realm = self.fetch(query).await?.ok_or_else(|| Error::UnknownRealm(name.to_string()))?;
        self.cache_both(&realm);
        Ok(realm)
    }

    pub async fn by_collection(&self, collection: &str) -> Result<Realm, Error> {
        if let Some((realm, at)) = self.by_collection.lock().get(collection) {
            if Instant::now() < *at {
                return Ok(realm.clone());
            }
        }
        let mut query = serde_json::Map::new();
        query.insert("collection".into(), serde_json::Value::from(collection));
        let realm = self
            .fetch(query)
            .await?
            .ok_or_else(|| Error::UnknownCollection(collection.to_string()))?;
        self.cache_both(&realm);
        Ok(realm)
    }

    fn cache_both(&self, realm: &Realm) {
        let expires_at = Instant::now() + self.caching_duration.get();
        self.by_name
            .lock()
            .insert(realm.name.clone(), (realm.clone(), expires_at));
        self.by_collection
            .lock()
            .insert(realm.collection.clone(), (realm.clone(), expires_at));
    }

    async fn fetch(&self, query: serde_json::Map<String, serde_json::Value>) -> Result<Option<Realm>, Error> {
        let docs = self
            .controller
            .find(&self.controller_db, REALMS_COLLECTION, &Query::new(query))
            .await?;
        docs.first().map(Realm::from_document).transpose()
    }
}
