//! # gridshard
//!
//! A chunked inverted index store whose shards live on a storage grid and
//! are fetched to a local cache on demand.
//!
//! ## Features
//!
//! - Bulk building through per-shard spill files, an external or in-process
//!   line sort and a streaming merge into sorted shard files
//! - Parallel task builds whose sorted output is merged in a later pass
//! - Shard upload to a grid collection with atomic replacement
//! - Lazy shard download with one fetch per shard under concurrency
//! - Relational term-list lookups that walk across shard boundaries
//! - Pluggable shard key functions and posting list codecs

pub mod build;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod grid;
pub mod query;
pub mod shard;
pub mod shard_key;
pub mod sort;
pub mod spill;
pub mod storage;
pub mod store;
pub mod util;

pub mod prelude {
    pub use crate::codec::{Occurrence, PackedPostingCodec, PostingCodec, PostingList};
    pub use crate::config::IndexStoreConfig;
    pub use crate::error::{GridShardError, Result};
    pub use crate::query::{Relation, TermListRequest};
    pub use crate::spill::TermRecord;
    pub use crate::store::GridIndexStore;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
