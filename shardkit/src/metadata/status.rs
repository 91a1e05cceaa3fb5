//! `ShardStatus` (§3): a finite enumeration, total order by migration
//! progress.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShardStatus {
    AtRest,
    MigratingCopy,
    MigratingSync,
    /// Never set by the migration engine (§9 open question): the source
    /// distinguished a `MIGRATING_SYNC`/`PAUSED_AT_SOURCE` state but never
    /// actually transitioned into it. Kept in the enum for wire/record
    /// compatibility; `MIGRATION_PHASES` still includes it.
    PostMigrationPausedAtSource,
    PostMigrationPausedAtDestination,
    PostMigrationDelete,
}

impl ShardStatus {
    /// Authority = source, target being populated.
    pub fn is_migration_phase(self) -> bool {
        matches!(
            self,
            ShardStatus::MigratingCopy
                | ShardStatus::MigratingSync
                | ShardStatus::PostMigrationPausedAtSource
        )
    }

    /// Authority = target, source being drained.
    pub fn is_post_migration_phase(self) -> bool {
        matches!(
            self,
            ShardStatus::PostMigrationPausedAtDestination | ShardStatus::PostMigrationDelete
        )
    }

    /// Caching of this shard's metadata must be disabled while in one of
    /// these phases.
    pub fn is_short_cache_phase(self) -> bool {
        matches!(
            self,
            ShardStatus::MigratingSync
                | ShardStatus::PostMigrationPausedAtSource
                | ShardStatus::PostMigrationPausedAtDestination
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn phase_sets_match_spec() {
        assert!(ShardStatus::MigratingCopy.is_migration_phase());
        assert!(ShardStatus::MigratingSync.is_migration_phase());
        assert!(ShardStatus::PostMigrationPausedAtSource.is_migration_phase());
        assert!(!ShardStatus::PostMigrationPausedAtDestination.is_migration_phase());

        assert!(ShardStatus::PostMigrationPausedAtDestination.is_post_migration_phase());
        assert!(ShardStatus::PostMigrationDelete.is_post_migration_phase());
        assert!(!ShardStatus::MigratingCopy.is_post_migration_phase());

        assert!(ShardStatus::MigratingSync.is_short_cache_phase());
        assert!(ShardStatus::PostMigrationPausedAtSource.is_short_cache_phase());
        assert!(ShardStatus::PostMigrationPausedAtDestination.is_short_cache_phase());
        assert!(!ShardStatus::AtRest.is_short_cache_phase());
        assert!(!ShardStatus::MigratingCopy.is_short_cache_phase());
        assert!(!ShardStatus::PostMigrationDelete.is_short_cache_phase());
    }

    #[test]
    fn total_order_follows_migration_progress() {
        assert!(ShardStatus::AtRest < ShardStatus::MigratingCopy);
        assert!(ShardStatus::MigratingCopy < ShardStatus::MigratingSync);
        assert!(ShardStatus::MigratingSync < ShardStatus::PostMigrationPausedAtSource);
        assert!(ShardStatus::PostMigrationPausedAtSource < ShardStatus::PostMigrationPausedAtDestination);
        assert!(ShardStatus::PostMigrationPausedAtDestination < ShardStatus::PostMigrationDelete);
    }
}
