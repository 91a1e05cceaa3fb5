mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shardkit::db::{DocumentDatabase, Query, Update};
use shardkit::key::ShardKey;
use shardkit::location::Location;
use shardkit::metadata::{MetadataRegistry, ShardStatus};
use shardkit::pause::PauseGate;
use shardkit::registry::ClusterRegistry;
use shardkit::resolver::Resolver;
use shardkit::testing::InMemoryDatabase;

fn as_db(db: &Arc<InMemoryDatabase>) -> Arc<dyn DocumentDatabase> {
    db.clone() as Arc<dyn DocumentDatabase>
}

#[tokio::test]
async fn p1_pause_lifts_only_once_authority_moves_to_new_location() {
    let controller_db = Arc::new(InMemoryDatabase::new());
    let metadata = Arc::new(MetadataRegistry::new(as_db(&controller_db), "ctrl", Duration::from_secs(5)));
    metadata.ensure_realm_exists("r", "k", "coll", Location::new("src", "db")).await.unwrap();
    metadata.set_shard_at_rest("r", ShardKey::Int(7), Location::new("src", "db"), false).await.unwrap();

    let store = metadata.store_for_realm("r").await.unwrap();
    store
        .write_status(&ShardKey::Int(7), ShardStatus::PostMigrationPausedAtDestination, Some(&Location::new("dst", "db")))
        .await
        .unwrap();

    let realm = metadata.realm_by_name("r").await.unwrap();
    let query = Query::binding("k", &json!(7));
    let pause = PauseGate::new();
    assert!(
        pause.should_pause_write(&metadata, &realm, &query).await.unwrap(),
        "writes to an in-transit key must be held while paused at destination"
    );

    store.write_status(&ShardKey::Int(7), ShardStatus::PostMigrationDelete, None).await.unwrap();
    assert!(!pause.should_pause_write(&metadata, &realm, &query).await.unwrap());

    let resolver = Resolver::new(metadata.clone());
    let location = resolver.resolve_key(&realm, &ShardKey::Int(7)).await.unwrap();
    assert_eq!(location, Location::new("dst", "db"), "authority now lands at new_location, never source");
}

#[tokio::test]
async fn p2_migration_moves_every_document_exactly_once() {
    let h = common::harness(&["c1", "c2"], 0.1).await;
    h.controller
        .ensure_realm_exists("r", "k", "coll", Location::new("c1", "db"))
        .await
        .unwrap();
    h.controller.set_shard_at_rest("r", ShardKey::Int(1), Location::new("c1", "db"), false).await.unwrap();

    let caller = h.controller.new_caller();
    let collection = h.controller.make_collection_shard_aware("coll");
    for i in 0..30i64 {
        collection
            .insert(&caller, common::doc(&[("_id", json!(i)), ("k", json!(1)), ("n", json!(i))]))
            .await
            .unwrap();
    }

    let manager = h
        .controller
        .do_migration("coll", ShardKey::Int(1), Location::new("c2", "db"), Default::default())
        .await
        .unwrap();
    manager.start_migration();
    manager.block_until_finished(Duration::from_millis(20)).await.unwrap();

    let source_count = h.cluster("c1").count("db", "coll", &Query::default()).await.unwrap();
    let dest_count = h.cluster("c2").count("db", "coll", &Query::default()).await.unwrap();
    assert_eq!(source_count, 0);
    assert_eq!(dest_count, 30);
}

#[tokio::test]
async fn p3_untargeted_read_during_migration_excludes_destination_copy() {
    let controller_db = Arc::new(InMemoryDatabase::new());
    let metadata = Arc::new(MetadataRegistry::new(as_db(&controller_db), "ctrl", Duration::from_secs(5)));
    metadata.ensure_realm_exists("r", "k", "coll", Location::new("src", "db")).await.unwrap();
    metadata.set_shard_at_rest("r", ShardKey::Int(1), Location::new("src", "db"), false).await.unwrap();
    let store = metadata.store_for_realm("r").await.unwrap();
    store
        .write_status(&ShardKey::Int(1), ShardStatus::MigratingCopy, Some(&Location::new("dst", "db")))
        .await
        .unwrap();

    let realm = metadata.realm_by_name("r").await.unwrap();
    let resolver = Resolver::new(metadata.clone());
    let locations = resolver.untargeted_locations(&realm).await.unwrap();

    let src = locations.get(&Location::new("src", "db")).expect("source present");
    assert_eq!(src.contains, vec![ShardKey::Int(1)]);
    assert!(src.excludes.is_empty(), "source is authoritative, nothing excluded there");

    let dst = locations.get(&Location::new("dst", "db")).expect("destination present");
    assert!(dst.contains.is_empty());
    assert_eq!(dst.excludes, vec![ShardKey::Int(1)], "the in-progress copy at destination is excluded");
}

#[tokio::test]
async fn p4_where_is_follows_migration_phase() {
    let h = common::harness(&["c1", "c2"], 5.0).await;
    h.controller
        .ensure_realm_exists("r", "k", "coll", Location::new("c1", "db"))
        .await
        .unwrap();

    // No shard record at all: falls back to the realm's default_dest.
    assert_eq!(h.controller.where_is("coll", &ShardKey::Int(99)).await.unwrap(), Location::new("c1", "db"));

    h.controller.set_shard_at_rest("r", ShardKey::Int(1), Location::new("c1", "db"), false).await.unwrap();
    assert_eq!(h.controller.where_is("coll", &ShardKey::Int(1)).await.unwrap(), Location::new("c1", "db"));

    h.controller
        .start_migration("r", &ShardKey::Int(1), Location::new("c2", "db"))
        .await
        .unwrap();
    // MIGRATING_COPY is a migration phase, not a post-migration phase:
    // authority is still the source.
    assert_eq!(h.controller.where_is("coll", &ShardKey::Int(1)).await.unwrap(), Location::new("c1", "db"));
}

#[tokio::test]
async fn p5_shard_metadata_cache_hits_within_ttl_then_expires() {
    let controller_db = Arc::new(InMemoryDatabase::new());
    let metadata = Arc::new(MetadataRegistry::new(as_db(&controller_db), "ctrl", Duration::from_millis(150)));
    metadata.ensure_realm_exists("r", "k", "coll", Location::new("a", "db")).await.unwrap();
    metadata.set_shard_at_rest("r", ShardKey::Int(5), Location::new("a", "db"), false).await.unwrap();

    let first = metadata.get_single_shard_metadata("r", &ShardKey::Int(5)).await.unwrap();
    assert_eq!(first.location, Location::new("a", "db"));

    // Mutate the backing "shards" record directly, bypassing the cache
    // entirely, to tell a cache hit from a fresh query.
    let query = Query::new(common::doc(&[("realm", json!("r")), ("shard_key", json!(5))]));
    let set = Update::new(common::doc(&[("$set", json!({"location": "b/db"}))]));
    controller_db.update("ctrl", "shards", &query, &set, false).await.unwrap();

    let second = metadata.get_single_shard_metadata("r", &ShardKey::Int(5)).await.unwrap();
    assert_eq!(second.location, Location::new("a", "db"), "still within the TTL: cache hit, stale value");

    tokio::time::sleep(Duration::from_millis(200)).await;
    let third = metadata.get_single_shard_metadata("r", &ShardKey::Int(5)).await.unwrap();
    assert_eq!(third.location, Location::new("b", "db"), "past the TTL: re-queried, fresh value");
}

#[tokio::test]
async fn r1_ensure_realm_exists_is_idempotent_but_immutable() {
    let h = common::harness(&["c1"], 5.0).await;
    h.controller.ensure_realm_exists("r", "k", "coll", Location::new("c1", "db")).await.unwrap();
    h.controller.ensure_realm_exists("r", "k", "coll", Location::new("c1", "db")).await.unwrap();

    let err = h
        .controller
        .ensure_realm_exists("r", "other_field", "coll", Location::new("c1", "db"))
        .await
        .unwrap_err();
    match err {
        shardkit::Error::Metadata(shardkit::metadata::Error::RealmImmutable { realm, field }) => {
            assert_eq!(realm, "r");
            assert_eq!(field, "shard_field");
        }
        other => panic!("expected RealmImmutable, got {other:?}"),
    }
}

#[tokio::test]
async fn r2_ensure_cluster_exists_keeps_first_uri() {
    let controller_db = Arc::new(InMemoryDatabase::new());
    let registry = ClusterRegistry::new(as_db(&controller_db), "ctrl", Duration::from_secs(600));
    registry.ensure_cluster_exists("c1", "mem://first").await.unwrap();
    registry.ensure_cluster_exists("c1", "mem://second").await.unwrap();

    assert_eq!(registry.get_cluster_uri("c1").await.unwrap(), "mem://first");
}

#[tokio::test]
async fn r3_set_shard_at_rest_force_is_idempotent() {
    let h = common::harness(&["c1"], 5.0).await;
    h.controller.ensure_realm_exists("r", "k", "coll", Location::new("c1", "db")).await.unwrap();
    h.controller.set_shard_at_rest("r", ShardKey::Int(1), Location::new("c1", "db"), true).await.unwrap();
    h.controller.set_shard_at_rest("r", ShardKey::Int(1), Location::new("c1", "db"), true).await.unwrap();

    assert_eq!(h.controller.where_is("coll", &ShardKey::Int(1)).await.unwrap(), Location::new("c1", "db"));
}
