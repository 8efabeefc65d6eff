//! The grid index store facade.
//!
//! [`GridIndexStore`] wires the shard key, codec, local cache, grid
//! collection, sorter, [`BulkBuilder`] and [`QueryEngine`] from one
//! [`IndexStoreConfig`] and exposes the index-store operations.
//!
//! # Example
//!
//! ```
//! use gridshard::config::IndexStoreConfig;
//! use gridshard::query::{Relation, TermListRequest};
//! use gridshard::spill::TermRecord;
//! use gridshard::store::GridIndexStore;
//!
//! # fn main() -> gridshard::error::Result<()> {
//! let dir = tempfile::TempDir::new()?;
//! let config = IndexStoreConfig::new(dir.path(), "memory://store-doc-example");
//! let store = GridIndexStore::open(config)?;
//!
//! store.create_index("title")?;
//! store.begin_indexing("title")?;
//! store.store_terms("title", &[TermRecord::new("apple", 1, 0, 2)])?;
//! store.commit_indexing("title")?;
//!
//! let request = TermListRequest::new("a").relation(Relation::Ge).limit(10);
//! let terms = store.fetch_term_list("title", &request)?;
//! assert_eq!(terms[0].0, "apple");
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use log::info;

use crate::build::{BuildPhase, BulkBuilder, CommitReport, MergeReport};
use crate::codec::{PackedPostingCodec, PostingCodec, PostingList};
use crate::config::IndexStoreConfig;
use crate::error::Result;
use crate::grid::{GridConnector, RemoteShardCollection, StorageGridConnector, store_collection};
use crate::query::{QueryEngine, TermListRequest};
use crate::shard::{LocalShardStore, validate_name};
use crate::shard_key::ShardKeyFunction;
use crate::sort::sorter_for;
use crate::spill::TermRecord;

/// A chunked, grid-backed inverted index store.
#[derive(Debug)]
pub struct GridIndexStore {
    config: IndexStoreConfig,
    local: LocalShardStore,
    remote: Arc<RemoteShardCollection>,
    builder: BulkBuilder,
    engine: QueryEngine,
}

impl GridIndexStore {
    /// Open a store with the default codec and the grid named in `config`.
    pub fn open(config: IndexStoreConfig) -> Result<Self> {
        config.validate()?;
        let connector = Arc::new(StorageGridConnector::new(config.endpoint()?));
        Self::with_parts(config, connector, Arc::new(PackedPostingCodec::new()))
    }

    /// Open a store with a caller-supplied grid connector and codec.
    pub fn with_parts(
        config: IndexStoreConfig,
        connector: Arc<dyn GridConnector>,
        codec: Arc<dyn PostingCodec>,
    ) -> Result<Self> {
        let shard_key: Arc<dyn ShardKeyFunction> = config.shard_key.build();
        Self::assemble(config, connector, codec, shard_key)
    }

    /// Open a store with a custom shard key function as well.
    pub fn assemble(
        config: IndexStoreConfig,
        connector: Arc<dyn GridConnector>,
        codec: Arc<dyn PostingCodec>,
        shard_key: Arc<dyn ShardKeyFunction>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.default_path)?;

        let local = LocalShardStore::new(&config.default_path, config.shard_options());
        let remote = Arc::new(
            RemoteShardCollection::new(
                connector,
                store_collection(&config.store_id, config.database.as_deref()),
            )
            .with_max_idle(config.parallelism.max(1)),
        );
        let temp_dir = config.resolved_temp_path();
        let sorter = sorter_for(config.sort_path.as_deref(), &temp_dir, config.sort_run_lines);

        let builder = BulkBuilder::new(
            config.build_options(),
            Arc::clone(&shard_key),
            Arc::clone(&codec),
            local.clone(),
            Arc::clone(&remote),
            sorter,
        )?;
        let engine = QueryEngine::new(
            shard_key,
            codec,
            local.clone(),
            Arc::clone(&remote),
            config.default_num_requested,
        );

        info!(
            "opened index store {} at {} (grid collection {})",
            config.store_id,
            config.default_path.display(),
            remote.root()
        );
        Ok(GridIndexStore {
            config,
            local,
            remote,
            builder,
            engine,
        })
    }

    pub fn config(&self) -> &IndexStoreConfig {
        &self.config
    }

    pub fn local(&self) -> &LocalShardStore {
        &self.local
    }

    pub fn remote(&self) -> &RemoteShardCollection {
        &self.remote
    }

    /// Create the local directory and grid sub-collection of `index`.
    pub fn create_index(&self, index: &str) -> Result<()> {
        validate_name("index", index)?;
        self.local.ensure_index_dir(index)?;
        self.remote.ensure_sub_collection(index)?;
        info!("created index {index}");
        Ok(())
    }

    /// Remove every shard of `index`, locally and on the grid.
    pub fn clean_index(&self, index: &str) -> Result<()> {
        self.remote.delete_index(index)?;
        self.local.remove_index(index)?;
        self.engine.invalidate(index);
        info!("cleaned index {index}");
        Ok(())
    }

    /// Remove an index entirely.
    pub fn delete_index(&self, index: &str) -> Result<()> {
        self.clean_index(index)
    }

    pub fn begin_indexing(&self, index: &str) -> Result<()> {
        self.builder.begin_indexing(index)
    }

    pub fn store_terms(&self, index: &str, records: &[TermRecord]) -> Result<u64> {
        self.builder.store_terms(index, records)
    }

    pub fn commit_indexing(&self, index: &str) -> Result<CommitReport> {
        let result = self.builder.commit_indexing(index);
        self.engine.invalidate(index);
        result
    }

    pub fn commit_indexing2(&self, index: &str, sorted: &std::path::Path) -> Result<MergeReport> {
        let result = self.builder.commit_indexing2(index, sorted);
        self.engine.invalidate(index);
        result
    }

    pub fn commit_parallel(&self, index: &str, sorted_files: &[PathBuf]) -> Result<Vec<MergeReport>> {
        let result = self.builder.commit_parallel(index, sorted_files);
        self.engine.invalidate(index);
        result
    }

    pub fn build_phase(&self, index: &str) -> BuildPhase {
        self.builder.phase(index)
    }

    pub fn resume_uploads(&self, index: &str) -> Result<Vec<String>> {
        self.builder.resume_uploads(index)
    }

    pub fn fetch_term_list(
        &self,
        index: &str,
        request: &TermListRequest,
    ) -> Result<Vec<(String, PostingList)>> {
        self.engine.fetch_term_list(index, request)
    }

    pub fn fetch_term(&self, index: &str, term: &str) -> Result<PostingList> {
        self.engine.fetch_term(index, term)
    }

    pub fn fetch_packed(&self, index: &str, term: &str) -> Result<Option<Vec<u8>>> {
        self.engine.fetch_packed(index, term)
    }

    /// Drop the cached copy of every shard of `index`; later lookups fetch
    /// them from the grid again.
    pub fn evict_local(&self, index: &str) -> Result<()> {
        self.local.remove_index(index)?;
        self.engine.invalidate(index);
        Ok(())
    }
}
