//! The migration worker itself: one [`MigrationManager`] drives one shard
//! key from its current location to a new one through the eight phases of
//! §4.6, running as a background tokio task.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use shardkit_config::Config;
use tokio::task::JoinHandle;
use tracing::info;

use crate::db::{Document, FindOptions, OpKind, OplogEntry, OplogTimestamp, Query, Update};
use crate::location::Location;
use crate::metadata::{MetadataRegistry, Realm, ShardStatus};
use crate::pool::{CallerId, ConnectionPool};
use crate::registry::ClusterRegistry;
use crate::key::ShardKey;

use super::error::Error;

/// Where construction-time defaults for a migration come from (§6
/// `do_migration`'s keyword defaults); any field left `None` falls back to
/// the process [`Config`].
#[derive(Debug, Clone, Default)]
pub struct MigrationOptions {
    pub insert_throttle: Option<Duration>,
    pub delete_throttle: Option<Duration>,
    pub insert_batch_size: Option<usize>,
    pub delete_batch_size: Option<usize>,
}

/// Coarse progress marker, independent of [`ShardStatus`] (which only
/// tracks what's durably recorded): `print_status`/observability-facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Copying,
    Syncing,
    Pausing,
    Deleting,
    Complete,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Starting => "starting",
            Phase::Copying => "copying",
            Phase::Syncing => "syncing",
            Phase::Pausing => "pausing",
            Phase::Deleting => "deleting",
            Phase::Complete => "complete",
        }
    }
}

pub struct MigrationManager {
    pool: Arc<ConnectionPool>,
    metadata: Arc<MetadataRegistry>,
    registry: Arc<ClusterRegistry>,
    caller: CallerId,
    realm: Realm,
    shard_key: ShardKey,
    source: Location,
    new_location: Location,
    insert_batch_size: AtomicUsize,
    delete_batch_size: AtomicUsize,
    insert_throttle_nanos: AtomicU64,
    delete_throttle_nanos: AtomicU64,
    inserted: AtomicU64,
    deleted: AtomicU64,
    phase: Mutex<Phase>,
    handle: Mutex<Option<JoinHandle<Result<(), Error>>>>,
    result: Mutex<Option<Result<(), Arc<Error>>>>,
}

impl MigrationManager {
    /// Runs pre-flight checks (§4.6: `ConcurrentMigration`, `AlreadyThere`)
    /// and returns a manager that hasn't started running yet.
    pub async fn prepare(
        pool: Arc<ConnectionPool>,
        metadata: Arc<MetadataRegistry>,
        registry: Arc<ClusterRegistry>,
        collection: &str,
        shard_key: ShardKey,
        new_location: Location,
        config: &Config,
        opts: MigrationOptions,
    ) -> Result<Arc<Self>, Error> {
        let realm = metadata.realm_for_collection(collection).await?;

        let shards = metadata.get_all_shard_metadata(&realm.name).await?;
        if shards
            .values()
            .any(|shard| shard.status.is_migration_phase() || shard.status.is_post_migration_phase())
        {
            return Err(Error::ConcurrentMigration(realm.name.clone()));
        }

        let current = metadata.get_single_shard_metadata(&realm.name, &shard_key).await?;
        if current.location == new_location {
            return Err(Error::AlreadyThere(new_location.to_string()));
        }
        registry.assert_valid_location(&new_location).await?;

        let caller = CallerId::named(format!("migration:{}:{}", realm.name, shard_key));
        let source = current.location.clone();

        Ok(Arc::new(Self {
            pool,
            metadata,
            registry,
            caller,
            insert_batch_size: AtomicUsize::new(
                opts.insert_batch_size.unwrap_or(config.insert_batch_size),
            ),
            delete_batch_size: AtomicUsize::new(
                opts.delete_batch_size.unwrap_or(config.delete_batch_size),
            ),
            insert_throttle_nanos: AtomicU64::new(
                opts.insert_throttle.unwrap_or_else(|| config.insert_throttle()).as_nanos() as u64,
            ),
            delete_throttle_nanos: AtomicU64::new(
                opts.delete_throttle.unwrap_or_else(|| config.delete_throttle()).as_nanos() as u64,
            ),
            inserted: AtomicU64::new(0),
            deleted: AtomicU64::new(0),
            phase: Mutex::new(Phase::Starting),
            handle: Mutex::new(None),
            result: Mutex::new(None),
            realm,
            shard_key,
            source,
            new_location,
        }))
    }

    /// Spawns the background worker. A no-op if already started.
    pub fn start_migration(self: &Arc<Self>) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        let manager = self.clone();
        *handle = Some(tokio::spawn(async move { manager.run().await }));
    }

    pub fn set_insert_throttle(&self, throttle: Duration) {
        self.insert_throttle_nanos.store(throttle.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn set_delete_throttle(&self, throttle: Duration) {
        self.delete_throttle_nanos.store(throttle.as_nanos() as u64, Ordering::Relaxed);
    }

    fn insert_throttle(&self) -> Duration {
        Duration::from_nanos(self.insert_throttle_nanos.load(Ordering::Relaxed))
    }

    fn delete_throttle(&self) -> Duration {
        Duration::from_nanos(self.delete_throttle_nanos.load(Ordering::Relaxed))
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    pub fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    pub fn deleted(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    pub fn print_status(&self) {
        info!(
            realm = %self.realm.name,
            shard_key = %self.shard_key,
            phase = self.phase.lock().as_str(),
            inserted = self.inserted(),
            deleted = self.deleted(),
            "migration status"
        );
    }

    /// Non-blocking: checks (and, the first time it observes completion,
    /// joins and caches) the worker's outcome. A cached error is re-raised
    /// on every subsequent call, mirroring the teacher's "errors surface at
    /// the next status check" convention.
    pub async fn is_finished(&self) -> Result<bool, Arc<Error>> {
        if let Some(result) = self.result.lock().clone() {
            return result.map(|_| true);
        }

        let finished = {
            let handle = self.handle.lock();
            match handle.as_ref() {
                None => return Ok(false),
                Some(h) => h.is_finished(),
            }
        };
        if !finished {
            return Ok(false);
        }

        let handle = self.handle.lock().take().expect("checked Some above");
        let outcome = match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Arc::new(e)),
            Err(join_err) => Err(Arc::new(Error::WorkerPanicked(join_err.to_string()))),
        };
        *self.result.lock() = Some(outcome.clone());
        outcome.map(|_| true)
    }

    pub async fn block_until_finished(&self, status_interval: Duration) -> Result<(), Arc<Error>> {
        let mut last_status = Instant::now();
        loop {
            if self.is_finished().await? {
                return Ok(());
            }
            if last_status.elapsed() >= status_interval {
                self.print_status();
                last_status = Instant::now();
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn run(self: Arc<Self>) -> Result<(), Error> {
        let store = self.metadata.store_for_realm(&self.realm.name).await?;

        self.set_phase(Phase::Starting);
        store
            .write_status(&self.shard_key, ShardStatus::MigratingCopy, Some(&self.new_location))
            .await?;

        let source_conn = self.pool.get(&self.caller, &self.source.cluster).await?;
        let oplog_start = source_conn.oplog_position(&self.source.cluster).await?;

        self.run_copy().await?;
        self.run_sync_and_pause(oplog_start).await?;
        self.run_delete().await?;

        self.metadata
            .set_shard_at_rest(&self.realm.name, self.shard_key.clone(), self.new_location.clone(), true)
            .await?;
        self.set_phase(Phase::Complete);

        self.pool.close_caller_connections(&self.caller);
        Ok(())
    }

    /// The cluster's configured hidden-secondary host, if any. The hook is
    /// optional (§9 open question): we don't route reads to a specific
    /// replica member ourselves, since choosing which host a connection
    /// lands on is the connector's concern (§1). But a host that *is*
    /// configured and turns out not to actually be hidden is a
    /// misconfiguration, not a thing to silently ignore (§7
    /// `HiddenSecondaryError`): migrating off a host that isn't hidden risks
    /// loading production traffic, so this is a hard failure.
    async fn note_hidden_secondary(&self, cluster: &str) -> Result<(), Error> {
        let record = self.registry.get_cluster(cluster).await?;
        if let Some(host) = &record.hidden_secondary_host {
            let conn = self.pool.get(&self.caller, cluster).await?;
            if conn.is_hidden_secondary(cluster, host).await? {
                info!(cluster, host, "using hidden secondary for migration reads");
            } else {
                return Err(crate::db::DbError::NotHiddenSecondary(host.clone()).into());
            }
        }
        Ok(())
    }

    /// Step 3: bulk-copy every document matching the shard key.
    async fn run_copy(&self) -> Result<(), Error> {
        self.set_phase(Phase::Copying);
        self.note_hidden_secondary(&self.source.cluster).await?;

        let source_conn = self.pool.get(&self.caller, &self.source.cluster).await?;
        let target_conn = self.pool.get(&self.caller, &self.new_location.cluster).await?;
        let query = Query::binding(&self.realm.shard_field, &self.shard_key.to_value());
        let docs = source_conn
            .find(&self.source.database, &self.realm.collection, &query, &FindOptions::default())
            .await?;

        let batch_size = self.insert_batch_size.load(Ordering::Relaxed).max(1);
        for chunk in docs.chunks(batch_size) {
            let result = target_conn
                .bulk_upsert(&self.new_location.database, &self.realm.collection, "_id", chunk.to_vec())
                .await?;
            self.inserted.fetch_add(result.upserted_count, Ordering::Relaxed);
            let throttle = self.insert_throttle();
            if !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }
        }
        Ok(())
    }

    fn selector_by_id(&self, id: &Value) -> Query {
        let mut doc = Document::new();
        doc.insert(self.realm.shard_field.clone(), self.shard_key.to_value());
        doc.insert("_id".into(), id.clone());
        Query::new(doc)
    }

    async fn replay_entry(&self, entry: &OplogEntry) -> Result<(), Error> {
        let id = entry
            .o
            .get("_id")
            .or_else(|| entry.o2.as_ref().and_then(|o2| o2.get("_id")))
            .cloned();
        let Some(id) = id else { return Ok(()) };

        let source_conn = self.pool.get(&self.caller, &self.source.cluster).await?;
        let target_conn = self.pool.get(&self.caller, &self.new_location.cluster).await?;

        match entry.op {
            OpKind::Insert => {
                let selector = self.selector_by_id(&id);
                let still_exists = !source_conn
                    .find(&self.source.database, &self.realm.collection, &selector, &FindOptions::default())
                    .await?
                    .is_empty();
                if still_exists {
                    match target_conn.insert(&self.new_location.database, &self.realm.collection, entry.o.clone()).await {
                        Ok(()) => {}
                        Err(crate::db::DbError::DuplicateKey) => {}
                        Err(e) => return Err(e.into()),
                    }
                }
            }
            OpKind::Update => {
                let selector = self.selector_by_id(&id);
                if let Some(current) = source_conn
                    .find(&self.source.database, &self.realm.collection, &selector, &FindOptions::default())
                    .await?
                    .into_iter()
                    .next()
                {
                    if current != entry.o {
                        let mut id_doc = Document::new();
                        id_doc.insert("_id".into(), id.clone());
                        target_conn
                            .update(
                                &self.new_location.database,
                                &self.realm.collection,
                                &Query::new(id_doc),
                                &Update::new(current),
                                true,
                            )
                            .await?;
                    }
                }
            }
            OpKind::Delete => {
                target_conn.remove_one_by_id(&self.new_location.database, &self.realm.collection, &id).await?;
            }
            OpKind::Other => {}
        }
        Ok(())
    }

    /// Steps 4-6: tail the source's replication log, replaying entries for
    /// this collection, until the cache TTL has elapsed since the sync
    /// phase began; then pause and drain anything that landed mid-pause.
    async fn run_sync_and_pause(&self, oplog_start: OplogTimestamp) -> Result<(), Error> {
        self.set_phase(Phase::Syncing);
        let store = self.metadata.store_for_realm(&self.realm.name).await?;
        store.write_status(&self.shard_key, ShardStatus::MigratingSync, None).await?;

        let source_conn = self.pool.get(&self.caller, &self.source.cluster).await?;
        let mut stream = source_conn.tail_oplog(&self.source.cluster, oplog_start).await?;
        let source_ns = format!("{}.{}", self.source.database, self.realm.collection);

        let sync_started = Instant::now();
        loop {
            match tokio::time::timeout(Duration::from_millis(200), stream.next()).await {
                Ok(Some(entry)) => {
                    if entry.ns == source_ns {
                        self.replay_entry(&entry).await?;
                    }
                }
                Ok(None) => break,
                Err(_) => {}
            }
            if sync_started.elapsed() >= self.metadata.caching_duration() {
                break;
            }
        }

        self.set_phase(Phase::Pausing);
        store
            .write_status(&self.shard_key, ShardStatus::PostMigrationPausedAtDestination, None)
            .await?;
        tokio::time::sleep(Duration::from_millis(100)).await;

        while let Ok(Some(entry)) = tokio::time::timeout(Duration::from_millis(20), stream.next()).await {
            if entry.ns == source_ns {
                self.replay_entry(&entry).await?;
            }
        }
        Ok(())
    }

    /// Step 7: delete every remaining source document for this shard key.
    async fn run_delete(&self) -> Result<(), Error> {
        self.set_phase(Phase::Deleting);
        self.note_hidden_secondary(&self.source.cluster).await?;
        let store = self.metadata.store_for_realm(&self.realm.name).await?;
        store.write_status(&self.shard_key, ShardStatus::PostMigrationDelete, None).await?;

        let source_conn = self.pool.get(&self.caller, &self.source.cluster).await?;
        let query = Query::binding(&self.realm.shard_field, &self.shard_key.to_value());
        let options = FindOptions { projection: Some(vec!["_id".into()]), ..Default::default() };
        let ids: Vec<Value> = source_conn
            .find(&self.source.database, &self.realm.collection, &query, &options)
            .await?
            .into_iter()
            .filter_map(|doc| doc.get("_id").cloned())
            .collect();

        let batch_size = self.delete_batch_size.load(Ordering::Relaxed).max(1);
        for chunk in ids.chunks(batch_size) {
            let mut doc = Document::new();
            doc.insert("_id".into(), serde_json::json!({ "$in": chunk }));
            let n = source_conn.remove(&self.source.database, &self.realm.collection, &Query::new(doc)).await?;
            self.deleted.fetch_add(n, Ordering::Relaxed);
            let throttle = self.delete_throttle();
            if !throttle.is_zero() {
                tokio::time::sleep(throttle).await;
            }
        }
        Ok(())
    }
}
