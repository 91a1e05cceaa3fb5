mod common;

use common::{doc, harness};
use serde_json::{json, Value};
use shardkit::db::{DocumentDatabase, FindOptions, Query, Update};
use shardkit::key::ShardKey;
use shardkit::location::Location;

async fn dummy_realm(h: &common::Harness) {
    h.controller
        .ensure_realm_exists("dummy", "x", "dummy", Location::new("c1", "testdb"))
        .await
        .expect("ensure_realm_exists");
    h.controller
        .set_shard_at_rest("dummy", ShardKey::Int(1), Location::new("c1", "testdb"), false)
        .await
        .expect("place shard 1");
    h.controller
        .set_shard_at_rest("dummy", ShardKey::Int(2), Location::new("c2", "testdb"), false)
        .await
        .expect("place shard 2");
}

#[tokio::test]
async fn s1_basic_routing() {
    let h = harness(&["c1", "c2"], 5.0).await;
    dummy_realm(&h).await;

    let caller = h.controller.new_caller();
    let collection = h.controller.make_collection_shard_aware("dummy");
    collection.insert(&caller, doc(&[("x", json!(1)), ("y", json!(1))])).await.unwrap();
    collection.insert(&caller, doc(&[("x", json!(2)), ("y", json!(1))])).await.unwrap();

    let c1_docs = h
        .cluster("c1")
        .find("testdb", "dummy", &Query::default(), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(c1_docs.len(), 1);
    assert_eq!(c1_docs[0].get("x"), Some(&json!(1)));

    let c2_docs = h
        .cluster("c2")
        .find("testdb", "dummy", &Query::default(), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(c2_docs.len(), 1);
    assert_eq!(c2_docs[0].get("x"), Some(&json!(2)));

    let found = collection.find(&caller, Query::new(doc(&[("y", json!(1))]))).await.unwrap();
    assert_eq!(found.to_vec().await.unwrap().len(), 2);
}

#[tokio::test]
async fn s2_routed_upsert() {
    let h = harness(&["c1", "c2"], 5.0).await;
    dummy_realm(&h).await;
    let caller = h.controller.new_caller();
    let collection = h.controller.make_collection_shard_aware("dummy");
    collection.insert(&caller, doc(&[("x", json!(1)), ("y", json!(1))])).await.unwrap();
    collection.insert(&caller, doc(&[("x", json!(2)), ("y", json!(1))])).await.unwrap();

    let update = Update::new(doc(&[(
        "$set",
        json!({"x": 1, "y": 1}),
    )]));
    collection
        .update(&caller, Query::new(doc(&[("_id", json!("alpha"))])), update, true)
        .await
        .unwrap();

    let c1_count = h.cluster("c1").count("testdb", "dummy", &Query::default()).await.unwrap();
    let c2_count = h.cluster("c2").count("testdb", "dummy", &Query::default()).await.unwrap();
    assert_eq!(c1_count, 2, "c1 gains the upserted document");
    assert_eq!(c2_count, 1, "c2 is untouched");
}

#[tokio::test]
async fn s3_targeted_find_during_migration() {
    let h = harness(&["c1", "c2"], 5.0).await;
    dummy_realm(&h).await;
    let caller = h.controller.new_caller();
    let collection = h.controller.make_collection_shard_aware("dummy");
    collection.insert(&caller, doc(&[("x", json!(1)), ("y", json!(1))])).await.unwrap();

    // Shard 2 migrates from c2 to c1; this only flips status, it doesn't
    // move data — that is the migration worker's job, done here by hand.
    h.controller
        .start_migration("dummy", &ShardKey::Int(2), Location::new("c1", "testdb"))
        .await
        .unwrap();

    let source_doc = doc(&[
        ("_id", json!("D")),
        ("x", json!(2)),
        ("y", json!(1)),
        ("is_fresh", json!(false)),
    ]);
    h.cluster("c2").insert("testdb", "dummy", source_doc).await.unwrap();
    let target_doc = doc(&[
        ("_id", json!("D")),
        ("x", json!(2)),
        ("y", json!(1)),
        ("is_fresh", json!(true)),
    ]);
    h.cluster("c1").insert("testdb", "dummy", target_doc).await.unwrap();

    // While status is a migration phase, authority stays with the source
    // (c2): the untargeted read must report the stale `is_fresh: false`
    // copy, not the manually pre-copied one sitting at c1.
    let results = collection
        .find(&caller, Query::new(doc(&[("y", json!(1))])))
        .await
        .unwrap()
        .to_vec()
        .await
        .unwrap();
    let d = results.iter().find(|doc| doc.get("_id") == Some(&json!("D"))).expect("doc D present");
    assert_eq!(d.get("is_fresh"), Some(&json!(false)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn s4_migration_end_to_end() {
    let h = harness(&["c1", "c2"], 0.2).await;
    h.controller
        .ensure_realm_exists("accounts", "account", "accounts", Location::new("c1", "testdb"))
        .await
        .unwrap();
    h.controller
        .set_shard_at_rest("accounts", ShardKey::Int(1), Location::new("c1", "testdb"), false)
        .await
        .unwrap();

    let caller = h.controller.new_caller();
    let collection = h.controller.make_collection_shard_aware("accounts");
    for i in 0..200i64 {
        collection
            .insert(
                &caller,
                doc(&[("_id", json!(format!("doc-{i}"))), ("account", json!(1)), ("key", json!(i))]),
            )
            .await
            .unwrap();
    }

    let manager = h
        .controller
        .do_migration("accounts", ShardKey::Int(1), Location::new("c2", "testdb"), Default::default())
        .await
        .unwrap();
    manager.start_migration();

    // Concurrently invert every key while the migration is in flight. Each
    // update targets `account=1` directly, so the router always sends it to
    // whichever side currently holds authority for that shard.
    let invert_caller = h.controller.new_caller();
    let invert_collection = collection.clone();
    let invert_handle = tokio::spawn(async move {
        for i in 0..200i64 {
            let _ = invert_collection
                .update(
                    &invert_caller,
                    Query::new(doc(&[("account", json!(1)), ("key", json!(i))])),
                    Update::new(doc(&[("$set", json!({"key": -i}))])),
                    false,
                )
                .await;
        }
    });

    manager.block_until_finished(std::time::Duration::from_millis(50)).await.unwrap();
    invert_handle.await.unwrap();

    let c1_remaining = h.cluster("c1").count("testdb", "accounts", &Query::default()).await.unwrap();
    assert_eq!(c1_remaining, 0, "source has nothing left for the migrated account");

    let c2_docs = h
        .cluster("c2")
        .find("testdb", "accounts", &Query::default(), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(c2_docs.len(), 200, "no losses and no duplicates");

    // Every update targets `account=1` directly, which binds the shard
    // field, so each one resolves to exactly one location and always
    // applies (no `MultipleShardsInTransit` fan-out is possible here) --
    // whether served by the source, replayed from the oplog during sync,
    // or served directly by the new location post-cutover, every key must
    // come out negative. A query keyed on `key` rather than `_id`, like
    // this one, is exactly what a malformed oplog `o2` selector would
    // silently fail to replay.
    let mut keys: Vec<i64> =
        c2_docs.iter().map(|d| d.get("key").and_then(Value::as_i64).unwrap()).collect();
    keys.sort_unstable();
    let expected: Vec<i64> = (0..200).map(|i| -i).collect();
    assert_eq!(keys, expected, "every concurrent inversion applied, none silently dropped");
}

#[tokio::test]
async fn s5_oplog_replay_reads_current_source_image() {
    let h = harness(&["c1", "c2"], 0.1).await;
    h.controller
        .ensure_realm_exists("sh", "sh", "sh", Location::new("c1", "testdb"))
        .await
        .unwrap();
    h.controller
        .set_shard_at_rest("sh", ShardKey::Int(1), Location::new("c1", "testdb"), false)
        .await
        .unwrap();

    let source = h.cluster("c1");
    source
        .insert("testdb", "sh", doc(&[("_id", json!(99)), ("sh", json!(1)), ("v", json!("current"))]))
        .await
        .unwrap();

    let manager = h
        .controller
        .do_migration("sh", ShardKey::Int(1), Location::new("c2", "testdb"), Default::default())
        .await
        .unwrap();
    manager.start_migration();

    // Mutate the source again right after the worker starts, so its oplog
    // entry's own logged image ("somewhen") is already stale by the time
    // it's replayed; only the document's current state should land.
    let selector = Query::new(doc(&[("_id", json!(99))]));
    source
        .update(
            "testdb",
            "sh",
            &selector,
            &Update::new(doc(&[("$set", json!({"v": "somewhen"}))])),
            false,
        )
        .await
        .unwrap();
    source
        .update(
            "testdb",
            "sh",
            &selector,
            &Update::new(doc(&[("$set", json!({"v": "current"}))])),
            false,
        )
        .await
        .unwrap();

    manager.block_until_finished(std::time::Duration::from_millis(20)).await.unwrap();

    let target_docs = h
        .cluster("c2")
        .find("testdb", "sh", &Query::default(), &FindOptions::default())
        .await
        .unwrap();
    assert_eq!(target_docs.len(), 1);
    assert_eq!(target_docs[0].get("v"), Some(&json!("current")));
    assert_eq!(target_docs[0].get("sh"), Some(&json!(1)));
}

#[tokio::test]
async fn s6_find_and_modify_rejects_untargeted_query() {
    let h = harness(&["c1"], 5.0).await;
    h.controller
        .ensure_realm_exists("dummy", "x", "dummy", Location::new("c1", "testdb"))
        .await
        .unwrap();

    let caller = h.controller.new_caller();
    let collection = h.controller.make_collection_shard_aware("dummy");
    let err = collection
        .find_and_modify(
            &caller,
            Query::new(doc(&[("y", json!(1))])),
            Update::new(doc(&[("$set", json!({"z": 1}))])),
        )
        .await
        .unwrap_err();

    match err {
        shardkit::router::Error::MissingShardField(field) => assert_eq!(field, "x"),
        other => panic!("expected MissingShardField, got {other:?}"),
    }
}
