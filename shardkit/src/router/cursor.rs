//! The multi-location cursor (§4.5): composes one underlying per-location
//! find into a single logical result set.
//!
//! A cursor that spans more than one location cannot push `sort` to the
//! database (no location's order relates to another's), so multi-location
//! sort/skip/limit are always applied client-side, in process memory,
//! after every target has answered. §9 Design Notes calls this out
//! explicitly as correctness-over-efficiency; it is not a bug to later
//! optimize with a real merge.

use std::collections::VecDeque;
use std::ops::{Bound, RangeBounds};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::db::{Document, FindOptions, Query};
use crate::location::Location;
use crate::pool::{CallerId, ConnectionPool};

use super::error::Error;
use super::sort::sort_documents;

enum IterState {
    NotStarted,
    Cached(VecDeque<Document>),
}

pub struct MultishardCursor {
    pool: Arc<ConnectionPool>,
    caller: CallerId,
    collection: String,
    targets: Vec<(Location, Query)>,
    sort: Option<Document>,
    limit: Option<i64>,
    skip: usize,
    hint: Option<Document>,
    state: Mutex<IterState>,
}

impl MultishardCursor {
    pub fn new(
        pool: Arc<ConnectionPool>,
        caller: CallerId,
        collection: String,
        targets: Vec<(Location, Query)>,
    ) -> Self {
        Self {
            pool,
            caller,
            collection,
            targets,
            sort: None,
            limit: None,
            skip: 0,
            hint: None,
            state: Mutex::new(IterState::NotStarted),
        }
    }

    pub fn sort(mut self, spec: Document) -> Self {
        self.sort = Some(spec);
        self
    }

    pub fn limit(mut self, n: i64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Sets the absolute skip count (a setter, not cumulative — matches
    /// the underlying database's own `skip`/`limit` calls, §4.5).
    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn hint(mut self, spec: Document) -> Self {
        self.hint = Some(spec);
        self
    }

    fn is_single_location(&self) -> bool {
        self.targets.len() == 1
    }

    /// The per-location `limit` to push down: `skip + limit` so that the
    /// client-side skip still leaves `limit` documents to return, per §4.5.
    fn per_location_limit(&self) -> Option<i64> {
        self.limit.map(|n| n + self.skip as i64)
    }

    async fn fetch_location(&self, location: &Location, query: &Query) -> Result<Vec<Document>, Error> {
        let conn = self.pool.get(&self.caller, &location.cluster).await?;
        let options = FindOptions {
            sort: if self.is_single_location() { self.sort.clone() } else { None },
            limit: self.per_location_limit(),
            hint: self.hint.clone(),
            projection: None,
        };
        let docs = conn.find(&location.database, &self.collection, query, &options).await?;
        Ok(docs)
    }

    /// Fetches every target, merges, sorts (if multi-location), and applies
    /// skip/limit. A single-location cursor already receives its
    /// sort+limit server-side; the client-side pass is then a no-op.
    async fn resolve(&self) -> Result<Vec<Document>, Error> {
        let mut docs = Vec::new();
        for (location, query) in &self.targets {
            docs.extend(self.fetch_location(location, query).await?);
        }

        if !self.is_single_location() {
            if let Some(sort) = &self.sort {
                sort_documents(&mut docs, sort);
            }
        }

        let docs: Vec<_> = docs.into_iter().skip(self.skip).collect();
        let docs = match self.limit {
            Some(n) if n >= 0 => docs.into_iter().take(n as usize).collect(),
            _ => docs,
        };
        Ok(docs)
    }

    /// Materializes the full result set. Does not affect `alive`/`next`
    /// iteration state.
    pub async fn to_vec(&self) -> Result<Vec<Document>, Error> {
        self.resolve().await
    }

    pub async fn find_one(&self) -> Result<Option<Document>, Error> {
        Ok(self.to_vec().await?.into_iter().next())
    }

    /// Total matching document count across every target, independent of
    /// sort/skip and clamped by `limit` if set (§4.5).
    pub async fn count(&self) -> Result<u64, Error> {
        let mut total = 0u64;
        for (location, query) in &self.targets {
            let conn = self.pool.get(&self.caller, &location.cluster).await?;
            total += conn.count(&location.database, &self.collection, query).await?;
        }
        if let Some(n) = self.limit {
            total = total.min(n.max(0) as u64);
        }
        Ok(total)
    }

    /// Per-location query plan, keyed by the location it was issued
    /// against.
    pub async fn explain(&self) -> Result<Vec<(Location, Document)>, Error> {
        let mut out = Vec::with_capacity(self.targets.len());
        for (location, query) in &self.targets {
            let conn = self.pool.get(&self.caller, &location.cluster).await?;
            let plan = conn.explain(&location.database, &self.collection, query).await?;
            out.push((location.clone(), plan));
        }
        Ok(out)
    }

    /// `true` until the cursor has been drained to empty. A freshly
    /// created cursor (or one that hasn't been read from yet) is always
    /// alive, matching the "further per-location cursors pending" case.
    pub async fn alive(&self) -> bool {
        match &*self.state.lock().await {
            IterState::NotStarted => true,
            IterState::Cached(buf) => !buf.is_empty(),
        }
    }

    /// Pulls the next document, materializing (and caching) the full
    /// result set on first call.
    pub async fn next(&self) -> Result<Option<Document>, Error> {
        let mut state = self.state.lock().await;
        if matches!(&*state, IterState::NotStarted) {
            let docs = self.resolve().await?;
            *state = IterState::Cached(VecDeque::from(docs));
        }
        let IterState::Cached(buf) = &mut *state else {
            unreachable!("just materialized above");
        };
        Ok(buf.pop_front())
    }

    /// Resets iteration so the next `next()`/`alive()` call re-fetches
    /// from every target.
    pub async fn rewind(&self) {
        *self.state.lock().await = IterState::NotStarted;
    }

    /// Equivalent to `c[i]`: the document at offset `i`, or `None` if the
    /// cursor has fewer than `i + 1` results. Rust has no async indexing
    /// operator, so this is a named method rather than `Index`.
    pub async fn nth(&self, i: usize) -> Result<Option<Document>, Error> {
        let narrowed = self.clone_cursor().skip(i).limit(1);
        Ok(narrowed.to_vec().await?.into_iter().next())
    }

    /// Equivalent to `c[a:b]`: the documents from offset `a` up to (but
    /// not including) `b`, or up to the end if `b` is unbounded.
    pub async fn slice(&self, range: impl RangeBounds<usize>) -> Result<Vec<Document>, Error> {
        let start = match range.start_bound() {
            Bound::Included(&n) => n,
            Bound::Excluded(&n) => n + 1,
            Bound::Unbounded => 0,
        };
        let mut narrowed = self.clone_cursor().skip(start);
        narrowed = match range.end_bound() {
            Bound::Included(&n) => narrowed.limit((n + 1 - start) as i64),
            Bound::Excluded(&n) => narrowed.limit((n - start) as i64),
            Bound::Unbounded => narrowed,
        };
        narrowed.to_vec().await
    }

    /// A fresh cursor over the same targets/sort/skip/limit/hint, with
    /// iteration state reset — the basis for `nth`/`slice`, which narrow a
    /// copy rather than disturb `self`'s own position.
    pub fn clone_cursor(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            caller: self.caller.clone(),
            collection: self.collection.clone(),
            targets: self.targets.clone(),
            sort: self.sort.clone(),
            limit: self.limit,
            skip: self.skip,
            hint: self.hint.clone(),
            state: Mutex::new(IterState::NotStarted),
        }
    }
}
