//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use gridshard::config::IndexStoreConfig;
use gridshard::codec::PackedPostingCodec;
use gridshard::error::{GridShardError, Result};
use gridshard::grid::{GridConnection, GridConnector, GridEndpoint, StorageGridConnector};
use gridshard::spill::TermRecord;
use gridshard::store::GridIndexStore;
use tempfile::TempDir;

/// A memory grid that counts transfers and can be switched off.
#[derive(Debug)]
pub struct ScriptedGrid {
    inner: StorageGridConnector,
    pub connects: AtomicUsize,
    pub gets: Arc<AtomicUsize>,
    pub puts: Arc<AtomicUsize>,
    /// While set, every operation fails with a transport error.
    pub down: Arc<AtomicBool>,
    /// Connections handed out before this count are stale.
    pub stale_connects: usize,
}

impl ScriptedGrid {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_stale(name, 0)
    }

    pub fn with_stale(name: &str, stale_connects: usize) -> Arc<Self> {
        Arc::new(ScriptedGrid {
            inner: StorageGridConnector::new(GridEndpoint::Memory(name.to_string())),
            connects: AtomicUsize::new(0),
            gets: Arc::new(AtomicUsize::new(0)),
            puts: Arc::new(AtomicUsize::new(0)),
            down: Arc::new(AtomicBool::new(false)),
            stale_connects,
        })
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }
}

#[derive(Debug)]
struct ScriptedConnection {
    inner: Box<dyn GridConnection>,
    stale: bool,
    gets: Arc<AtomicUsize>,
    puts: Arc<AtomicUsize>,
    down: Arc<AtomicBool>,
}

impl ScriptedConnection {
    fn check(&self) -> Result<()> {
        if self.stale || self.down.load(Ordering::SeqCst) {
            Err(GridShardError::transport("grid unreachable"))
        } else {
            Ok(())
        }
    }
}

impl GridConnection for ScriptedConnection {
    fn is_alive(&self) -> bool {
        true
    }

    fn ensure_collection(&mut self, collection: &str) -> Result<()> {
        self.check()?;
        self.inner.ensure_collection(collection)
    }

    fn list(&mut self, collection: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.list(collection)
    }

    fn size(&mut self, collection: &str, name: &str) -> Result<Option<u64>> {
        self.check()?;
        self.inner.size(collection, name)
    }

    fn put(&mut self, collection: &str, name: &str, source: &mut dyn Read) -> Result<u64> {
        self.check()?;
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(collection, name, source)
    }

    fn get(&mut self, collection: &str, name: &str, sink: &mut dyn Write) -> Result<Option<u64>> {
        self.check()?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(collection, name, sink)
    }

    fn rename(&mut self, collection: &str, from: &str, to: &str) -> Result<()> {
        self.check()?;
        self.inner.rename(collection, from, to)
    }

    fn delete(&mut self, collection: &str, name: &str) -> Result<()> {
        self.check()?;
        self.inner.delete(collection, name)
    }

    fn delete_collection(&mut self, collection: &str) -> Result<()> {
        self.check()?;
        self.inner.delete_collection(collection)
    }
}

impl GridConnector for ScriptedGrid {
    fn connect(&self) -> Result<Box<dyn GridConnection>> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            inner: self.inner.connect()?,
            stale: n < self.stale_connects,
            gets: Arc::clone(&self.gets),
            puts: Arc::clone(&self.puts),
            down: Arc::clone(&self.down),
        }))
    }

    fn endpoint(&self) -> String {
        self.inner.endpoint()
    }
}

/// A store with its own local cache on the memory grid `grid`.
pub fn open_store(cache: &TempDir, grid: &str) -> GridIndexStore {
    GridIndexStore::open(IndexStoreConfig::new(cache.path(), &format!("memory://{grid}"))).unwrap()
}

/// A store with its own local cache talking through `connector`.
pub fn open_scripted(cache: &TempDir, connector: Arc<ScriptedGrid>) -> GridIndexStore {
    let config = IndexStoreConfig::new(cache.path(), "memory://unused");
    GridIndexStore::with_parts(config, connector, Arc::new(PackedPostingCodec::new())).unwrap()
}

/// Build `index` from `records` in one pass.
pub fn build(store: &GridIndexStore, index: &str, records: &[TermRecord]) {
    store.create_index(index).unwrap();
    store.begin_indexing(index).unwrap();
    store.store_terms(index, records).unwrap();
    store.commit_indexing(index).unwrap();
}

/// One record per term, a distinct document each.
pub fn fruit_records() -> Vec<TermRecord> {
    ["apple", "banana", "cherry", "date"]
        .iter()
        .enumerate()
        .map(|(i, term)| TermRecord::new(*term, i as u64 + 1, 0, 1))
        .collect()
}

pub fn terms_of(list: &[(String, gridshard::codec::PostingList)]) -> Vec<&str> {
    list.iter().map(|(term, _)| term.as_str()).collect()
}
