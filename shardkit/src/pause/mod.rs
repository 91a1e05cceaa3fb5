//! Pause Gate (C7): holds writes to a migrating shard client-side for the
//! brief window between `POST_MIGRATION_PAUSED_AT_DESTINATION` being set
//! and the migration worker finishing its drain of in-flight log entries
//! (§4.6 step 6, §4.7).

pub mod error;

pub use error::Error;

use std::time::Duration;

use tracing::trace;

use crate::db::Query;
use crate::metadata::{MetadataRegistry, Realm, ShardStatus};
use crate::resolver::Resolver;

const RETRY_INTERVAL: Duration = Duration::from_millis(50);

pub struct PauseGate;

impl PauseGate {
    pub fn new() -> Self {
        Self
    }

    /// True iff `query` would observe a shard currently paused at its
    /// destination: targeted at a specific key whose shard is in that
    /// status, or untargeted while any shard of the realm is.
    pub async fn should_pause_write(
        &self,
        metadata: &MetadataRegistry,
        realm: &Realm,
        query: &Query,
    ) -> Result<bool, Error> {
        if let Some(key) = Resolver::targeted_key(query, realm) {
            let shard = metadata.get_single_shard_metadata(&realm.name, &key).await?;
            return Ok(shard.status == ShardStatus::PostMigrationPausedAtDestination);
        }

        let shards = metadata.get_all_shard_metadata(&realm.name).await?;
        Ok(shards
            .values()
            .any(|shard| shard.status == ShardStatus::PostMigrationPausedAtDestination))
    }

    /// Blocks the caller while `should_pause_write` holds, retrying every
    /// 50ms (§4.7).
    pub async fn wait_for_pause_to_end(
        &self,
        metadata: &MetadataRegistry,
        realm: &Realm,
        query: &Query,
    ) -> Result<(), Error> {
        while self.should_pause_write(metadata, realm, query).await? {
            trace!(realm = %realm.name, "write paused, waiting for migration to drain");
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
        Ok(())
    }
}

impl Default for PauseGate {
    fn default() -> Self {
        Self::new()
    }
}
