//! Operation Router (C5): the document-collection facade applications
//! actually call. Resolves every operation through C4 and fans it out
//! across the physical locations that hold it.

pub mod cursor;
pub mod error;
pub(crate) mod sort;

pub use cursor::MultishardCursor;
pub use error::Error;

use std::sync::Arc;

use tracing::debug;

use crate::db::{Document, IndexSpec, Query, Update, UpdateResult};
use crate::key::ShardKey;
use crate::location::Location;
use crate::metadata::{MetadataRegistry, Realm};
use crate::pause::PauseGate;
use crate::pool::{CallerId, ConnectionPool};
use crate::resolver::Resolver;

/// Invoked whenever a read fans out across every location of a realm
/// instead of targeting one shard key directly (§6 Configuration:
/// "optional untargeted-query callback"). Observability only — the return
/// value is ignored.
pub type UntargetedHook = Arc<dyn Fn(&str, &Query) + Send + Sync>;

pub struct OperationRouter {
    pool: Arc<ConnectionPool>,
    metadata: Arc<MetadataRegistry>,
    resolver: Resolver,
    pause: Arc<PauseGate>,
    untargeted_hook: Option<UntargetedHook>,
}

impl OperationRouter {
    pub fn new(
        pool: Arc<ConnectionPool>,
        metadata: Arc<MetadataRegistry>,
        pause: Arc<PauseGate>,
    ) -> Self {
        Self {
            resolver: Resolver::new(metadata.clone()),
            pool,
            metadata,
            pause,
            untargeted_hook: None,
        }
    }

    pub fn with_untargeted_hook(mut self, hook: UntargetedHook) -> Self {
        self.untargeted_hook = Some(hook);
        self
    }

    async fn realm_for(&self, collection: &str) -> Result<Realm, Error> {
        Ok(self.metadata.realm_for_collection(collection).await?)
    }

    fn shard_field_of<'a>(realm: &Realm, doc: &'a Document) -> Result<&'a serde_json::Value, Error> {
        doc.get(&realm.shard_field)
            .ok_or_else(|| Error::MissingShardField(realm.shard_field.clone()))
    }

    /// `find`/`find_one`: builds the multi-location cursor per §4.4/§4.5.
    /// No pause wait — reads are never held by the pause gate.
    pub async fn find(
        &self,
        caller: &CallerId,
        collection: &str,
        query: Query,
    ) -> Result<MultishardCursor, Error> {
        let realm = self.realm_for(collection).await?;
        if Resolver::targeted_key(&query, &realm).is_none() {
            if let Some(hook) = &self.untargeted_hook {
                hook(collection, &query);
            }
        }
        let targets = self.resolver.resolve(&realm, &query).await?;
        Ok(MultishardCursor::new(
            self.pool.clone(),
            caller.clone(),
            collection.to_string(),
            targets,
        ))
    }

    pub async fn find_one(
        &self,
        caller: &CallerId,
        collection: &str,
        query: Query,
    ) -> Result<Option<Document>, Error> {
        Ok(self.find(caller, collection, query).await?.find_one().await?)
    }

    /// `insert(doc)`: must bind the shard field; routes to the single
    /// location that value resolves to (§4.5). A caller inserting many
    /// documents issues one call per document — no cross-cluster batching.
    pub async fn insert(&self, caller: &CallerId, collection: &str, doc: Document) -> Result<(), Error> {
        let realm = self.realm_for(collection).await?;
        let value = Self::shard_field_of(&realm, &doc)?.clone();
        self.pause.wait_for_pause_to_end(&self.metadata, &realm, &Query::binding(&realm.shard_field, &value)).await?;

        let key = ShardKey::from_value(&value).ok_or_else(|| Error::MissingShardField(realm.shard_field.clone()))?;
        let location = self.resolver.resolve_key(&realm, &key).await?;
        let conn = self.pool.get(caller, &location.cluster).await?;
        conn.insert(&location.database, collection, doc).await?;
        Ok(())
    }

    /// `save(doc)`: identical routing to `insert`, but upsert-by-id at the
    /// destination (§4.5).
    pub async fn save(&self, caller: &CallerId, collection: &str, doc: Document) -> Result<(), Error> {
        let realm = self.realm_for(collection).await?;
        let value = Self::shard_field_of(&realm, &doc)?.clone();
        self.pause.wait_for_pause_to_end(&self.metadata, &realm, &Query::binding(&realm.shard_field, &value)).await?;

        let key = ShardKey::from_value(&value).ok_or_else(|| Error::MissingShardField(realm.shard_field.clone()))?;
        let location = self.resolver.resolve_key(&realm, &key).await?;
        let conn = self.pool.get(caller, &location.cluster).await?;
        let id = doc.get("_id").cloned().ok_or_else(|| Error::MissingShardField("_id".into()))?;
        let selector = Query::new({
            let mut q = Document::new();
            q.insert("_id".into(), id);
            q
        });
        conn.update(&location.database, collection, &selector, &Update::new(doc), true).await?;
        Ok(())
    }

    /// `update(query, update, upsert)`: when upserting on a value that
    /// binds the shard field, route to the single destination that value
    /// resolves to (the query is still passed through verbatim so the
    /// destination evaluates the match itself). Otherwise fan out across
    /// every resolved location and sum matched/modified counts (§4.5).
    pub async fn update(
        &self,
        caller: &CallerId,
        collection: &str,
        query: Query,
        update: Update,
        upsert: bool,
    ) -> Result<UpdateResult, Error> {
        let realm = self.realm_for(collection).await?;
        self.pause.wait_for_pause_to_end(&self.metadata, &realm, &query).await?;

        if upsert {
            if let Some(value) = update.shard_field_value(&realm.shard_field) {
                let key = ShardKey::from_value(value)
                    .ok_or_else(|| Error::MissingShardField(realm.shard_field.clone()))?;
                let location = self.resolver.resolve_key(&realm, &key).await?;
                let conn = self.pool.get(caller, &location.cluster).await?;
                return Ok(conn.update(&location.database, collection, &query, &update, true).await?);
            }
        }

        let targets = self.resolver.resolve(&realm, &query).await?;
        let mut total = UpdateResult::default();
        for (location, refined) in targets {
            let conn = self.pool.get(caller, &location.cluster).await?;
            let result = conn.update(&location.database, collection, &refined, &update, upsert).await?;
            total.n += result.n;
        }
        Ok(total)
    }

    /// `remove(query)`: fan out across every resolved location, sum `n`.
    pub async fn remove(&self, caller: &CallerId, collection: &str, query: Query) -> Result<u64, Error> {
        let realm = self.realm_for(collection).await?;
        self.pause.wait_for_pause_to_end(&self.metadata, &realm, &query).await?;

        let targets = self.resolver.resolve(&realm, &query).await?;
        let mut total = 0u64;
        for (location, refined) in targets {
            let conn = self.pool.get(caller, &location.cluster).await?;
            total += conn.remove(&location.database, collection, &refined).await?;
        }
        Ok(total)
    }

    /// `aggregate(pipeline)`: the leading stage must be a `$match` binding
    /// the shard field; routes to that single location.
    pub async fn aggregate(
        &self,
        caller: &CallerId,
        collection: &str,
        pipeline: Vec<Document>,
    ) -> Result<MultishardCursor, Error> {
        let realm = self.realm_for(collection).await?;
        let first_match = pipeline
            .first()
            .and_then(|stage| stage.get("$match"))
            .and_then(|v| v.as_object())
            .and_then(|doc| doc.get(&realm.shard_field));
        let value = first_match.ok_or_else(|| Error::MissingShardField(realm.shard_field.clone()))?;
        let key = ShardKey::from_value(value).ok_or_else(|| Error::MissingShardField(realm.shard_field.clone()))?;
        let location = self.resolver.resolve_key(&realm, &key).await?;

        debug!(collection, %location, "aggregate routed to single location");
        let query = pipeline
            .first()
            .and_then(|stage| stage.get("$match"))
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();
        Ok(MultishardCursor::new(
            self.pool.clone(),
            caller.clone(),
            collection.to_string(),
            vec![(location, Query::new(query))],
        ))
    }

    /// `find_and_modify(query, update)`: query must bind the shard field;
    /// routes to that key's single location.
    pub async fn find_and_modify(
        &self,
        caller: &CallerId,
        collection: &str,
        query: Query,
        update: Update,
    ) -> Result<UpdateResult, Error> {
        let realm = self.realm_for(collection).await?;
        let key = crate::resolver::Resolver::targeted_key(&query, &realm)
            .ok_or_else(|| Error::MissingShardField(realm.shard_field.clone()))?;
        self.pause.wait_for_pause_to_end(&self.metadata, &realm, &query).await?;

        let location = self.resolver.resolve_key(&realm, &key).await?;
        let conn = self.pool.get(caller, &location.cluster).await?;
        Ok(conn.update(&location.database, collection, &query, &update, false).await?)
    }

    /// `ensure_index(spec)`: applied at every location currently resolved
    /// for this realm (an empty query, so every physical location).
    pub async fn ensure_index(&self, caller: &CallerId, collection: &str, spec: IndexSpec) -> Result<(), Error> {
        let realm = self.realm_for(collection).await?;
        let targets = self.resolver.resolve(&realm, &Query::default()).await?;
        for (location, _) in targets {
            let conn = self.pool.get(caller, &location.cluster).await?;
            conn.ensure_index(&location.database, collection, &spec).await?;
        }
        Ok(())
    }

    /// `where_is(collection, key) → location` (§6 Runtime API).
    pub async fn where_is(&self, collection: &str, key: &ShardKey) -> Result<Location, Error> {
        let realm = self.realm_for(collection).await?;
        Ok(self.resolver.resolve_key(&realm, key).await?)
    }
}
