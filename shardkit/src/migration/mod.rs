//! Migration Engine (C6): moves one shard's documents from its current
//! location to a new one with a bounded write pause, plus the two
//! recovery helpers for a worker that died partway through.

pub mod error;
pub mod manager;

pub use error::Error;
pub use manager::{MigrationManager, MigrationOptions};

use std::sync::Arc;

use shardkit_config::Config;

use crate::db::Query;
use crate::key::ShardKey;
use crate::location::Location;
use crate::metadata::MetadataRegistry;
use crate::pool::{CallerId, ConnectionPool};
use crate::registry::ClusterRegistry;

/// `do_migration(...)` (§6): builds (but does not start) a manager for
/// moving `key` to `new_location`. Call [`MigrationManager::start_migration`]
/// to begin the background worker.
#[allow(clippy::too_many_arguments)]
pub async fn do_migration(
    pool: Arc<ConnectionPool>,
    metadata: Arc<MetadataRegistry>,
    registry: Arc<ClusterRegistry>,
    collection: &str,
    key: ShardKey,
    new_location: Location,
    config: &Config,
    opts: MigrationOptions,
) -> Result<Arc<MigrationManager>, Error> {
    MigrationManager::prepare(pool, metadata, registry, collection, key, new_location, config, opts).await
}

/// Valid only while the shard is in one of `MIGRATION_PHASES`: removes
/// whatever was already copied to `new_location` and resets the shard to
/// `AT_REST` at its original location (§4.6).
pub async fn fix_failed_pre_delete(
    pool: &ConnectionPool,
    metadata: &MetadataRegistry,
    realm_name: &str,
    key: &ShardKey,
) -> Result<(), Error> {
    let shard = metadata.get_single_shard_metadata(realm_name, key).await?;
    if !shard.status.is_migration_phase() {
        return Err(Error::InvalidRecoveryState(
            "fix_failed_pre_delete requires a shard in a migration phase",
        ));
    }
    let new_location = shard
        .new_location
        .clone()
        .expect("I4: migration phase implies new_location is present");
    let realm = metadata.realm_by_name(realm_name).await?;

    let caller = CallerId::named(format!("recovery:{realm_name}:{key}"));
    let conn = pool.get(&caller, &new_location.cluster).await?;
    let query = Query::binding(&realm.shard_field, &key.to_value());
    conn.remove(&new_location.database, &realm.collection, &query).await?;
    pool.close_caller_connections(&caller);

    metadata
        .set_shard_at_rest(realm_name, key.clone(), shard.location.clone(), true)
        .await?;
    Ok(())
}

/// Valid only while the shard is in `POST_MIGRATION_DELETE`: finishes
/// deleting the source's remaining documents and resets the shard to
/// `AT_REST` at `new_location` (§4.6).
pub async fn fix_failed_during_delete(
    pool: &ConnectionPool,
    metadata: &MetadataRegistry,
    realm_name: &str,
    key: &ShardKey,
) -> Result<(), Error> {
    let shard = metadata.get_single_shard_metadata(realm_name, key).await?;
    if shard.status != crate::metadata::ShardStatus::PostMigrationDelete {
        return Err(Error::InvalidRecoveryState(
            "fix_failed_during_delete requires POST_MIGRATION_DELETE",
        ));
    }
    let new_location = shard
        .new_location
        .clone()
        .expect("I4: post-migration-delete implies new_location is present");
    let realm = metadata.realm_by_name(realm_name).await?;

    let caller = CallerId::named(format!("recovery:{realm_name}:{key}"));
    let conn = pool.get(&caller, &shard.location.cluster).await?;
    let query = Query::binding(&realm.shard_field, &key.to_value());
    conn.remove(&shard.location.database, &realm.collection, &query).await?;
    pool.close_caller_connections(&caller);

    metadata.set_shard_at_rest(realm_name, key.clone(), new_location, true).await?;
    Ok(())
}
