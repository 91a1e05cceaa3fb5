//! `make_collection_shard_aware(collection) → proxy` (§6): a thin,
//! collection-bound facade over the operation router, mirroring a native
//! document-collection handle.

use std::sync::Arc;

use crate::db::{Document, IndexSpec, Query, Update, UpdateResult};
use crate::pool::CallerId;
use crate::router::{Error, MultishardCursor, OperationRouter};

#[derive(Clone)]
pub struct ShardAwareCollection {
    router: Arc<OperationRouter>,
    name: String,
}

impl ShardAwareCollection {
    pub fn new(router: Arc<OperationRouter>, name: impl Into<String>) -> Self {
        Self { router, name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn find(&self, caller: &CallerId, query: Query) -> Result<MultishardCursor, Error> {
        self.router.find(caller, &self.name, query).await
    }

    pub async fn find_one(&self, caller: &CallerId, query: Query) -> Result<Option<Document>, Error> {
        self.router.find_one(caller, &self.name, query).await
    }

    pub async fn insert(&self, caller: &CallerId, doc: Document) -> Result<(), Error> {
        self.router.insert(caller, &self.name, doc).await
    }

    pub async fn save(&self, caller: &CallerId, doc: Document) -> Result<(), Error> {
        self.router.save(caller, &self.name, doc).await
    }

    pub async fn update(
        &self,
        caller: &CallerId,
        query: Query,
        update: Update,
        upsert: bool,
    ) -> Result<UpdateResult, Error> {
        self.router.update(caller, &self.name, query, update, upsert).await
    }

    pub async fn remove(&self, caller: &CallerId, query: Query) -> Result<u64, Error> {
        self.router.remove(caller, &self.name, query).await
    }

    pub async fn aggregate(&self, caller: &CallerId, pipeline: Vec<Document>) -> Result<MultishardCursor, Error> {
        self.router.aggregate(caller, &self.name, pipeline).await
    }

    pub async fn find_and_modify(
        &self,
        caller: &CallerId,
        query: Query,
        update: Update,
    ) -> Result<UpdateResult, Error> {
        self.router.find_and_modify(caller, &self.name, query, update).await
    }

    pub async fn ensure_index(&self, caller: &CallerId, spec: IndexSpec) -> Result<(), Error> {
        self.router.ensure_index(caller, &self.name, spec).await
    }
}
