//! An in-memory [`DocumentDatabase`] double, including a fake replication
//! log, so C2-C6 can be exercised without a live backend (§9).

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use crate::db::{
    BulkUpsertResult, Document, DbError, DocumentDatabase, FindOptions, IndexSpec, OpKind,
    OplogEntry, OplogStream, OplogTimestamp, Query, Update, UpdateResult,
};

fn matches_value(actual: Option<&Value>, expected: &Value) -> bool {
    if let Value::Object(ops) = expected {
        if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) {
            return ops.iter().all(|(op, v)| match op.as_str() {
                "$ne" => actual != Some(v),
                "$in" => v
                    .as_array()
                    .map(|arr| arr.iter().any(|item| actual == Some(item)))
                    .unwrap_or(false),
                _ => false,
            });
        }
    }
    actual == Some(expected)
}

fn document_matches(doc: &Document, query: &Document) -> bool {
    query.iter().all(|(field, expected)| matches_value(doc.get(field), expected))
}

fn apply_update(doc: &mut Document, update: &Document) {
    if let Some(Value::Object(set)) = update.get("$set") {
        for (k, v) in set {
            doc.insert(k.clone(), v.clone());
        }
        return;
    }
    if !update.keys().any(|k| k.starts_with('$')) {
        let id = doc.get("_id").cloned();
        *doc = update.clone();
        if let Some(id) = id {
            doc.entry("_id".to_string()).or_insert(id);
        }
    }
}

const POLL_INTERVAL: Duration = Duration::from_millis(5);

fn project(doc: Document, fields: &[String]) -> Document {
    let mut out = Document::new();
    for field in fields {
        if let Some(v) = doc.get(field) {
            out.insert(field.clone(), v.clone());
        }
    }
    out
}

struct Inner {
    collections: HashMap<(String, String), Vec<Document>>,
    indexes: HashMap<(String, String), Vec<IndexSpec>>,
    oplog: VecDeque<OplogEntry>,
    hidden_secondaries: HashMap<String, String>,
}

/// One instance models a single physical cluster: collections are keyed
/// by `(database, collection)`, and every mutation is appended to a
/// shared fake replication log tailed by the migration engine's sync
/// phase.
pub struct InMemoryDatabase {
    inner: Arc<Mutex<Inner>>,
    next_ts: AtomicU64,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                collections: HashMap::new(),
                indexes: HashMap::new(),
                oplog: VecDeque::new(),
                hidden_secondaries: HashMap::new(),
            })),
            next_ts: AtomicU64::new(1),
        }
    }

    /// Test setup helper: seeds a document directly, bypassing the router.
    pub fn seed(&self, db: &str, coll: &str, doc: Document) {
        self.inner
            .lock()
            .unwrap()
            .collections
            .entry((db.to_string(), coll.to_string()))
            .or_default()
            .push(doc);
    }

    /// Test setup helper: declares `host` as a hidden secondary of
    /// `cluster` for [`DocumentDatabase::is_hidden_secondary`].
    pub fn set_hidden_secondary(&self, cluster: &str, host: &str) {
        self.inner
            .lock()
            .unwrap()
            .hidden_secondaries
            .insert(cluster.to_string(), host.to_string());
    }

    fn emit(&self, inner: &mut Inner, op: OpKind, ns: String, o: Document, o2: Option<Document>) {
        let ts = OplogTimestamp(self.next_ts.fetch_add(1, Ordering::Relaxed));
        inner.oplog.push_back(OplogEntry { ts, op, ns, o, o2 });
    }
}

impl Default for InMemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentDatabase for InMemoryDatabase {
    async fn find(
        &self,
        db: &str,
        coll: &str,
        query: &Query,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DbError> {
        let inner = self.inner.lock().unwrap();
        let mut docs: Vec<Document> = inner
            .collections
            .get(&(db.to_string(), coll.to_string()))
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|d| document_matches(d, &query.0))
            .collect();

        if let Some(sort) = &options.sort {
            crate::router::sort::sort_documents(&mut docs, sort);
        }
        if let Some(limit) = options.limit {
            docs.truncate(limit.max(0) as usize);
        }
        if let Some(fields) = &options.projection {
            docs = docs.into_iter().map(|d| project(d, fields)).collect();
        }
        Ok(docs)
    }

    async fn count(&self, db: &str, coll: &str, query: &Query) -> Result<u64, DbError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .collections
            .get(&(db.to_string(), coll.to_string()))
            .map(|docs| docs.iter().filter(|d| document_matches(d, &query.0)).count())
            .unwrap_or(0) as u64)
    }

    async fn insert(&self, db: &str, coll: &str, doc: Document) -> Result<(), DbError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (db.to_string(), coll.to_string());
        if let Some(id) = doc.get("_id") {
            if inner
                .collections
                .get(&key)
                .map(|docs| docs.iter().any(|d| d.get("_id") == Some(id)))
                .unwrap_or(false)
            {
                return Err(DbError::DuplicateKey);
            }
        }
        inner.collections.entry(key).or_default().push(doc.clone());
        let ns = format!("{db}.{coll}");
        self.emit(&mut inner, OpKind::Insert, ns, doc, None);
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        db: &str,
        coll: &str,
        match_key: &str,
        docs: Vec<Document>,
    ) -> Result<BulkUpsertResult, DbError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (db.to_string(), coll.to_string());
        let mut upserted_count = 0u64;
        for doc in docs {
            let match_value = doc.get(match_key).cloned();
            let list = inner.collections.entry(key.clone()).or_default();
            let existing = match_value
                .as_ref()
                .and_then(|v| list.iter_mut().find(|d| d.get(match_key) == Some(v)));
            match existing {
                Some(slot) => {
                    let id = slot.get("_id").cloned();
                    *slot = doc;
                    if let Some(id) = id {
                        slot.entry("_id".to_string()).or_insert(id);
                    }
                }
                None => list.push(doc),
            }
            upserted_count += 1;
        }
        Ok(BulkUpsertResult { upserted_count })
    }

    async fn update(
        &self,
        db: &str,
        coll: &str,
        query: &Query,
        update: &Update,
        upsert: bool,
    ) -> Result<UpdateResult, DbError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (db.to_string(), coll.to_string());
        let list = inner.collections.entry(key).or_default();
        let mut n = 0u64;
        let mut matched_ids = Vec::new();
        for doc in list.iter_mut() {
            if document_matches(doc, &query.0) {
                apply_update(doc, &update.0);
                n += 1;
                if let Some(id) = doc.get("_id") {
                    matched_ids.push(id.clone());
                }
            }
        }
        if n == 0 && upsert {
            let mut doc = query.0.clone();
            apply_update(&mut doc, &update.0);
            if let Some(id) = doc.get("_id") {
                matched_ids.push(id.clone());
            }
            list.push(doc);
            n = 1;
        }
        // Real oplog update entries carry an `o2` selector normalized to the
        // matched document's `_id`, never the original (possibly
        // non-`_id`-keyed) query — one entry per matched document.
        let ns = format!("{db}.{coll}");
        for id in matched_ids {
            let mut o2 = Document::new();
            o2.insert("_id".to_string(), id);
            self.emit(&mut inner, OpKind::Update, ns.clone(), update.0.clone(), Some(o2));
        }
        Ok(UpdateResult { n })
    }

    async fn remove(&self, db: &str, coll: &str, query: &Query) -> Result<u64, DbError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (db.to_string(), coll.to_string());
        let Some(list) = inner.collections.get_mut(&key) else {
            return Ok(0);
        };
        let before = list.len();
        list.retain(|d| !document_matches(d, &query.0));
        let removed = (before - list.len()) as u64;
        let ns = format!("{db}.{coll}");
        self.emit(&mut inner, OpKind::Delete, ns, query.0.clone(), None);
        Ok(removed)
    }

    async fn remove_one_by_id(&self, db: &str, coll: &str, id: &Value) -> Result<bool, DbError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (db.to_string(), coll.to_string());
        let Some(list) = inner.collections.get_mut(&key) else {
            return Ok(false);
        };
        let position = list.iter().position(|d| d.get("_id") == Some(id));
        if let Some(i) = position {
            list.remove(i);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn ensure_index(&self, db: &str, coll: &str, spec: &IndexSpec) -> Result<(), DbError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .indexes
            .entry((db.to_string(), coll.to_string()))
            .or_default()
            .push(IndexSpec { keys: spec.keys.clone(), unique: spec.unique });
        Ok(())
    }

    async fn explain(&self, db: &str, coll: &str, query: &Query) -> Result<Document, DbError> {
        let scanned = self.count(db, coll, query).await?;
        let mut doc = Document::new();
        doc.insert("query".into(), Value::Object(query.0.clone()));
        doc.insert("scanned".into(), Value::from(scanned));
        Ok(doc)
    }

    async fn oplog_position(&self, _cluster: &str) -> Result<OplogTimestamp, DbError> {
        Ok(OplogTimestamp(self.next_ts.load(Ordering::Relaxed)))
    }

    /// A genuinely live tail, not a one-shot snapshot: entries appended to
    /// the oplog after this call still surface, polled on a short interval.
    /// The migration engine's sync phase relies on that to honor its
    /// TTL-bounded wait rather than exiting as soon as a fixed backlog
    /// drains.
    async fn tail_oplog(&self, _cluster: &str, from: OplogTimestamp) -> Result<OplogStream, DbError> {
        let shared = self.inner.clone();
        let stream = stream::unfold((shared, from), |(shared, cursor)| async move {
            loop {
                let next = {
                    let inner = shared.lock().unwrap();
                    inner.oplog.iter().find(|entry| entry.ts >= cursor).cloned()
                };
                if let Some(entry) = next {
                    let advanced = OplogTimestamp(entry.ts.0 + 1);
                    return Some((entry, (shared, advanced)));
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        });
        let boxed: OplogStream = Pin::from(Box::new(stream));
        Ok(boxed)
    }

    async fn is_hidden_secondary(&self, cluster: &str, host: &str) -> Result<bool, DbError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .hidden_secondaries
            .get(cluster)
            .map(|h| h == host)
            .unwrap_or(false))
    }
}
