//! Location Resolver (C4): maps a (realm, shard-key [, query]) to the set
//! of physical locations a logical operation must touch.

pub mod error;

pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;

use crate::db::Query;
use crate::key::ShardKey;
use crate::location::Location;
use crate::metadata::{MetadataRegistry, Realm};

/// Per-location routing directive: which keys this location is
/// authoritative for (`contains`), and which it must filter out because
/// another location also holds a (stale or not-yet-authoritative) copy
/// (`excludes`) — §3 GLOSSARY, §4.4.
#[derive(Debug, Clone)]
pub struct LocationMetadata {
    pub location: Location,
    pub contains: Vec<ShardKey>,
    pub excludes: Vec<ShardKey>,
}

impl LocationMetadata {
    fn new(location: Location) -> Self {
        Self {
            location,
            contains: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

fn entry<'a>(
    locations: &'a mut HashMap<Location, LocationMetadata>,
    location: &Location,
) -> &'a mut LocationMetadata {
    locations
        .entry(location.clone())
        .or_insert_with(|| LocationMetadata::new(location.clone()))
}

pub struct Resolver {
    metadata: Arc<MetadataRegistry>,
}

impl Resolver {
    pub fn new(metadata: Arc<MetadataRegistry>) -> Self {
        Self { metadata }
    }

    /// A query "directly targets a shard key" (§4.4 step 1) iff it binds
    /// `realm.shard_field` to an int/string/object-id value. Any other
    /// operator form (range, `$in`, missing field, ...) is untargeted.
    pub fn targeted_key(query: &Query, realm: &Realm) -> Option<ShardKey> {
        query.get(&realm.shard_field).and_then(ShardKey::from_value)
    }

    /// Resolves a query against a realm into the set of
    /// `(location, refined_query)` pairs it must be issued against (§4.4).
    pub async fn resolve(
        &self,
        realm: &Realm,
        query: &Query,
    ) -> Result<Vec<(Location, Query)>, Error> {
        if let Some(key) = Self::targeted_key(query, realm) {
            let shard = self
                .metadata
                .get_single_shard_metadata(&realm.name, &key)
                .await?;
            return Ok(vec![(shard.authoritative_location().clone(), query.clone())]);
        }

        let locations = self.untargeted_locations(realm).await?;
        let mut out = Vec::with_capacity(locations.len());
        for meta in locations.into_values() {
            let refined = match meta.excludes.len() {
                0 => query.clone(),
                1 => query.excluding(&realm.shard_field, &meta.excludes[0].to_value()),
                _ => return Err(Error::MultipleShardsInTransit),
            };
            out.push((meta.location, refined));
        }
        Ok(out)
    }

    /// The single location a shard key resolves to, for operations that
    /// require exactly one target (insert/aggregate/find_and_modify,
    /// §4.5).
    pub async fn resolve_key(&self, realm: &Realm, key: &ShardKey) -> Result<Location, Error> {
        let shard = self.metadata.get_single_shard_metadata(&realm.name, key).await?;
        Ok(shard.authoritative_location().clone())
    }

    /// Per-location `LocationMetadata` for every shard of a realm plus its
    /// `default_dest`, per §4.4 step 3.
    pub async fn untargeted_locations(
        &self,
        realm: &Realm,
    ) -> Result<HashMap<Location, LocationMetadata>, Error> {
        let shards = self.metadata.get_all_shard_metadata(&realm.name).await?;
        let mut locations: HashMap<Location, LocationMetadata> = HashMap::new();

        for shard in shards.values() {
            if shard.status.is_migration_phase() {
                let new_location = shard
                    .new_location
                    .as_ref()
                    .expect("I4: migration phase implies new_location is present");
                entry(&mut locations, &shard.location).contains.push(shard.shard_key.clone());
                entry(&mut locations, new_location).excludes.push(shard.shard_key.clone());
            } else if shard.status.is_post_migration_phase() {
                let new_location = shard
                    .new_location
                    .as_ref()
                    .expect("I4: post-migration phase implies new_location is present");
                entry(&mut locations, new_location).contains.push(shard.shard_key.clone());
                entry(&mut locations, &shard.location).excludes.push(shard.shard_key.clone());
            } else {
                entry(&mut locations, &shard.location).contains.push(shard.shard_key.clone());
            }
        }

        entry(&mut locations, &realm.default_dest);
        Ok(locations)
    }
}
