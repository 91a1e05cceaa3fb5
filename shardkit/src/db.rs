//! The document-database interface.
//!
//! Per spec §1, the underlying document database is an external
//! collaborator and out of scope as a design: CRUD, an append-only
//! replication log addressable by monotonically ordered timestamps,
//! tailable cursor semantics, bulk upserts, and replica-set topology
//! introspection are assumed, not built. This module makes that
//! assumption concrete as a trait so the router and migration engine have
//! something to compile and test against; production callers supply their
//! own driver-backed implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use thiserror::Error;

pub type Document = Map<String, Value>;

/// An opaque query document. Treated as a black box except where this
/// crate needs to read the shard field out of it (§4.4) or append an
/// exclusion clause (§4.4's `MultipleShardsInTransit` refinement).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query(pub Document);

impl Query {
    pub fn new(doc: Document) -> Self {
        Self(doc)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// `query AND shard_field != excluded`, per §4.4.
    pub fn excluding(&self, shard_field: &str, excluded: &Value) -> Self {
        let mut doc = self.0.clone();
        doc.insert(
            shard_field.to_string(),
            serde_json::json!({ "$ne": excluded }),
        );
        Self(doc)
    }

    /// `query AND shard_field == key`, used to build a targeted query from
    /// a bare key value.
    pub fn binding(shard_field: &str, value: &Value) -> Self {
        let mut doc = Document::new();
        doc.insert(shard_field.to_string(), value.clone());
        Self(doc)
    }
}

/// An update document: either a `$set`-style modifier document or a full
/// replacement document (no top-level `$` keys).
#[derive(Debug, Clone, PartialEq)]
pub struct Update(pub Document);

impl Update {
    pub fn new(doc: Document) -> Self {
        Self(doc)
    }

    /// The field this update binds `shard_field` to, whether via `$set` or
    /// as a full-document replacement. Used by §4.5's upsert routing rule.
    pub fn shard_field_value(&self, shard_field: &str) -> Option<&Value> {
        if let Some(Value::Object(set)) = self.0.get("$set") {
            if let Some(v) = set.get(shard_field) {
                return Some(v);
            }
        }
        if !self.0.keys().any(|k| k.starts_with('$')) {
            return self.0.get(shard_field);
        }
        None
    }
}

/// Server-side options for a `find`, pushed down per per-location query
/// (§4.5). `skip` is deliberately absent: it is always applied client-side
/// by the router's cursor, never by the underlying database.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub limit: Option<i64>,
    pub hint: Option<Document>,
    /// Field names to project: `None` means the whole document.
    pub projection: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct IndexSpec {
    pub keys: Document,
    pub unique: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateResult {
    pub n: u64,
}

#[derive(Debug, Clone, Default)]
pub struct BulkUpsertResult {
    pub upserted_count: u64,
}

/// A monotonically ordered position in a cluster's replication log.
/// Comparable across calls to the same cluster only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OplogTimestamp(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Insert,
    Update,
    Delete,
    /// Anything else (commands, no-ops, ...): ignored during replay (§4.6).
    Other,
}

#[derive(Debug, Clone)]
pub struct OplogEntry {
    pub ts: OplogTimestamp,
    pub op: OpKind,
    /// `<database>.<collection>` namespace this entry applies to.
    pub ns: String,
    /// The operation's document: the inserted/replacement document for
    /// `i`/`u`, or `{_id}` for `d`.
    pub o: Document,
    /// For updates, the selector identifying the modified document
    /// (typically just `{_id}`).
    pub o2: Option<Document>,
}

pub type OplogStream = Pin<Box<dyn Stream<Item = OplogEntry> + Send>>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database operation failed: {0}")]
    Operation(String),

    #[error("duplicate key")]
    DuplicateKey,

    #[error("replica set host \"{0}\" is not configured as a hidden secondary")]
    NotHiddenSecondary(String),
}

/// The interface assumed of the underlying document database, scoped to
/// exactly what C2-C6 need (§1, §6 "Wire dependency").
#[async_trait]
pub trait DocumentDatabase: Send + Sync {
    async fn find(
        &self,
        db: &str,
        coll: &str,
        query: &Query,
        options: &FindOptions,
    ) -> Result<Vec<Document>, DbError>;

    async fn count(&self, db: &str, coll: &str, query: &Query) -> Result<u64, DbError>;

    async fn insert(&self, db: &str, coll: &str, doc: Document) -> Result<(), DbError>;

    /// Ordered bulk upsert matched on `match_key` (or `_id` when
    /// `match_key == "_id"`). Each document's existing fields are fully
    /// replaced save for `_id`, per §4.6 step 3.
    async fn bulk_upsert(
        &self,
        db: &str,
        coll: &str,
        match_key: &str,
        docs: Vec<Document>,
    ) -> Result<BulkUpsertResult, DbError>;

    async fn update(
        &self,
        db: &str,
        coll: &str,
        query: &Query,
        update: &Update,
        upsert: bool,
    ) -> Result<UpdateResult, DbError>;

    async fn remove(&self, db: &str, coll: &str, query: &Query) -> Result<u64, DbError>;

    async fn remove_one_by_id(&self, db: &str, coll: &str, id: &Value) -> Result<bool, DbError>;

    async fn ensure_index(&self, db: &str, coll: &str, spec: &IndexSpec) -> Result<(), DbError>;

    async fn explain(&self, db: &str, coll: &str, query: &Query) -> Result<Document, DbError>;

    /// Most recent replication-log timestamp, used to checkpoint the start
    /// of the sync phase (§4.6 step 2).
    async fn oplog_position(&self, cluster: &str) -> Result<OplogTimestamp, DbError>;

    /// Tail the replication log from (and including) `from`.
    async fn tail_oplog(
        &self,
        cluster: &str,
        from: OplogTimestamp,
    ) -> Result<OplogStream, DbError>;

    /// Whether `host` is configured as a hidden member of the cluster's
    /// replica set, per the hidden-secondary hook (§4.6, §9 open question).
    async fn is_hidden_secondary(&self, cluster: &str, host: &str) -> Result<bool, DbError>;
}
