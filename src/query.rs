//! Term lookups against grid-backed shards.
//!
//! Every lookup routes the term to its shard, downloads the shard into the
//! local cache if it is not there yet, and reads it from disk. Range lookups
//! ([`QueryEngine::fetch_term_list`]) walk a cursor from the term in the
//! direction of a [`Relation`] and carry on into neighbouring shards until the
//! request is satisfied.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::codec::{PostingCodec, PostingList};
use crate::error::{GridShardError, Result};
use crate::grid::RemoteShardCollection;
use crate::shard::{LocalShardStore, ShardCursor, ShardEntry};
use crate::shard_key::ShardKeyFunction;

/// Comparison between result terms and the requested term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Relation {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
}

impl Relation {
    /// Whether results follow the requested term in key order.
    pub fn is_forward(self) -> bool {
        matches!(self, Relation::Gt | Relation::Ge)
    }

    /// Whether `key` stands in this relation to `term`, comparing bytes.
    pub fn holds(self, key: &[u8], term: &[u8]) -> bool {
        match self {
            Relation::Lt => key < term,
            Relation::Le => key <= term,
            Relation::Gt => key > term,
            Relation::Ge => key >= term,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Relation::Lt => "<",
            Relation::Le => "<=",
            Relation::Gt => ">",
            Relation::Ge => ">=",
        }
    }
}

impl FromStr for Relation {
    type Err = GridShardError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "<" | "lt" => Ok(Relation::Lt),
            "<=" | "le" => Ok(Relation::Le),
            ">" | "gt" => Ok(Relation::Gt),
            ">=" | "ge" => Ok(Relation::Ge),
            other => Err(GridShardError::invalid_argument(format!(
                "unknown relation {other:?}, expected one of <, <=, >, >="
            ))),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A ranged term-list lookup.
///
/// Unset fields take defaults at query time: with nothing but the term the
/// lookup returns the default number of terms `>=` it; with an end term and
/// no relation it scans towards the end term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermListRequest {
    pub term: String,
    pub relation: Option<Relation>,
    /// Maximum number of results; `0` means unbounded.
    pub num_requested: Option<usize>,
    /// Exclusive bound in the scan direction.
    pub end_term: Option<String>,
    /// Decode only the summary header of each posting list.
    pub summary_only: bool,
}

impl TermListRequest {
    pub fn new<S: Into<String>>(term: S) -> Self {
        TermListRequest {
            term: term.into(),
            ..Default::default()
        }
    }

    pub fn relation(mut self, relation: Relation) -> Self {
        self.relation = Some(relation);
        self
    }

    pub fn limit(mut self, num_requested: usize) -> Self {
        self.num_requested = Some(num_requested);
        self
    }

    pub fn end<S: Into<String>>(mut self, end_term: S) -> Self {
        self.end_term = Some(end_term.into());
        self
    }

    pub fn summary_only(mut self, summary_only: bool) -> Self {
        self.summary_only = summary_only;
        self
    }

    /// Relation and count after applying defaults.
    pub fn resolve(&self, default_num_requested: usize) -> (Relation, usize) {
        let end = self.end_term.as_deref().filter(|end| !end.is_empty());
        let mut limit = self.num_requested.unwrap_or(0);
        if limit == 0 && self.relation.is_none() && end.is_none() {
            limit = default_num_requested;
        }

        let relation = match (self.relation, end) {
            (Some(relation), _) => relation,
            (None, None) => Relation::Ge,
            (None, Some(end)) if self.term.as_str() > end => Relation::Le,
            (None, Some(_)) => Relation::Gt,
        };
        (relation, limit)
    }
}

/// One resolved scan, shared by the shards it visits.
struct Scan<'r> {
    term: &'r str,
    relation: Relation,
    limit: usize,
    end: Option<&'r str>,
    summary_only: bool,
}

impl Scan<'_> {
    fn past_end(&self, key: &str) -> bool {
        match self.end {
            Some(end) if self.relation.is_forward() => key >= end,
            Some(end) => key <= end,
            None => false,
        }
    }

    fn full(&self, collected: usize) -> bool {
        self.limit > 0 && collected >= self.limit
    }
}

/// The read path of a grid index store.
#[derive(Debug)]
pub struct QueryEngine {
    shard_key: Arc<dyn ShardKeyFunction>,
    codec: Arc<dyn PostingCodec>,
    local: LocalShardStore,
    remote: Arc<RemoteShardCollection>,
    default_num_requested: usize,
    download_locks: Mutex<HashMap<(String, String), Arc<Mutex<()>>>>,
    shard_order: Mutex<HashMap<String, Arc<Vec<String>>>>,
}

impl QueryEngine {
    pub fn new(
        shard_key: Arc<dyn ShardKeyFunction>,
        codec: Arc<dyn PostingCodec>,
        local: LocalShardStore,
        remote: Arc<RemoteShardCollection>,
        default_num_requested: usize,
    ) -> Self {
        QueryEngine {
            shard_key,
            codec,
            local,
            remote,
            default_num_requested,
            download_locks: Mutex::new(HashMap::new()),
            shard_order: Mutex::new(HashMap::new()),
        }
    }

    /// Make `shard_id` of `index` available locally, downloading it if needed.
    ///
    /// Returns `false` when neither the cache nor the grid has the shard.
    /// Concurrent callers for the same shard wait for a single download.
    pub fn ensure_shard(&self, index: &str, shard_id: &str) -> Result<bool> {
        if self.local.exists(index, shard_id) {
            return Ok(true);
        }

        let lock = {
            let mut locks = self.download_locks.lock();
            Arc::clone(
                locks
                    .entry((index.to_string(), shard_id.to_string()))
                    .or_default(),
            )
        };
        let _guard = lock.lock();
        if self.local.exists(index, shard_id) {
            return Ok(true);
        }

        self.local.ensure_index_dir(index)?;
        let dest = self.local.shard_path(index, shard_id);
        self.remote.download(index, shard_id, &dest)
    }

    /// Forget the cached shard listing of `index`.
    pub fn invalidate(&self, index: &str) {
        self.shard_order.lock().remove(index);
    }

    /// Shards of `index` in scan order: everything published or cached.
    fn ordered_shards(&self, index: &str) -> Result<Arc<Vec<String>>> {
        if let Some(order) = self.shard_order.lock().get(index) {
            return Ok(Arc::clone(order));
        }

        let mut shards = self.remote.list_shards(index)?;
        shards.extend(self.local.list_shards(index)?);
        self.shard_key.order_shards(&mut shards);
        let order = Arc::new(shards);
        self.shard_order
            .lock()
            .insert(index.to_string(), Arc::clone(&order));
        Ok(order)
    }

    fn neighbour(&self, index: &str, shard_id: &str, forward: bool) -> Result<Option<String>> {
        let order = self.ordered_shards(index)?;
        let Some(pos) = order.iter().position(|id| id == shard_id) else {
            return Ok(None);
        };
        let next = if forward {
            order.get(pos + 1)
        } else {
            pos.checked_sub(1).and_then(|prev| order.get(prev))
        };
        Ok(next.cloned())
    }

    /// Ranged term-list lookup.
    ///
    /// An absent anchor shard yields an empty list, not an error.
    pub fn fetch_term_list(
        &self,
        index: &str,
        request: &TermListRequest,
    ) -> Result<Vec<(String, PostingList)>> {
        let (relation, limit) = request.resolve(self.default_num_requested);
        let scan = Scan {
            term: &request.term,
            relation,
            limit,
            end: request.end_term.as_deref().filter(|end| !end.is_empty()),
            summary_only: request.summary_only,
        };

        let mut results = Vec::new();
        let mut shard_id = self.shard_key.shard_of(scan.term);
        if !self.ensure_shard(index, &shard_id)? {
            debug!("index {index}: no shard {shard_id} for {:?}", scan.term);
            return Ok(results);
        }

        let mut anchor = true;
        loop {
            if self.scan_shard(index, &shard_id, &scan, anchor, &mut results)? {
                break;
            }
            match self.neighbour(index, &shard_id, relation.is_forward())? {
                Some(next) => shard_id = next,
                None => break,
            }
            anchor = false;
        }
        Ok(results)
    }

    /// Collect matches from one shard. Returns `true` once the scan is complete.
    fn scan_shard(
        &self,
        index: &str,
        shard_id: &str,
        scan: &Scan<'_>,
        anchor: bool,
        results: &mut Vec<(String, PostingList)>,
    ) -> Result<bool> {
        if !anchor && !self.ensure_shard(index, shard_id)? {
            return Ok(false);
        }
        let reader = self.local.open(index, shard_id)?;
        let value_limit = scan.summary_only.then(|| self.codec.summary_len());
        let mut cursor = reader.cursor().with_value_limit(value_limit);
        let forward = scan.relation.is_forward();

        let mut entry = if anchor {
            match cursor.seek_ge(scan.term.as_bytes())? {
                Some(found) => Some(found),
                None if forward => return Ok(false),
                None => cursor.seek_last()?,
            }
        } else if forward {
            cursor.first()?
        } else {
            cursor.seek_last()?
        };

        while let Some((key, value)) = entry {
            // Shard order need not follow byte order, so a neighbour may hold
            // keys on the wrong side of the term.
            if !scan.relation.holds(key, scan.term.as_bytes()) {
                entry = step(&mut cursor, forward)?;
                continue;
            }
            let key = std::str::from_utf8(key).map_err(|_| {
                GridShardError::corrupt(format!("non UTF-8 key in shard {shard_id} of {index}"))
            })?;
            if scan.past_end(key) {
                return Ok(true);
            }
            let postings = if scan.summary_only {
                self.codec.deserialize_summary(value)?
            } else {
                self.codec.deserialize(value)?
            };
            results.push((key.to_string(), postings));
            if scan.full(results.len()) {
                return Ok(true);
            }
            entry = step(&mut cursor, forward)?;
        }
        Ok(false)
    }

    /// Raw packed posting list of `term`, or `None` if it is not indexed.
    pub fn fetch_packed(&self, index: &str, term: &str) -> Result<Option<Vec<u8>>> {
        let shard_id = self.shard_key.shard_of(term);
        if !self.ensure_shard(index, &shard_id)? {
            return Ok(None);
        }
        let reader = self.local.open(index, &shard_id)?;
        Ok(reader.get(term.as_bytes())?.map(<[u8]>::to_vec))
    }

    /// Posting list of `term`; empty if it is not indexed.
    pub fn fetch_term(&self, index: &str, term: &str) -> Result<PostingList> {
        match self.fetch_packed(index, term)? {
            Some(packed) => self.codec.deserialize(&packed),
            None => Ok(PostingList::empty()),
        }
    }
}

fn step<'a>(cursor: &mut ShardCursor<'a>, forward: bool) -> Result<Option<ShardEntry<'a>>> {
    if forward { cursor.next() } else { cursor.prev() }
}
