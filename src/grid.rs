//! The grid: a replicated collection service that holds published shards.
//!
//! The store talks to the grid through two traits. A [`GridConnector`] knows
//! how to reach a grid endpoint and hands out [`GridConnection`]s; a
//! connection performs named-file operations inside slash-separated
//! collections. [`RemoteShardCollection`] owns one connection and layers
//! reconnects and atomic transfers on top.
//!
//! [`StorageGridConnector`] is the bundled implementation. It maps each
//! collection onto a [`Storage`] backend:
//!
//! - `file:///mnt/grid` keeps collections as directories under a mounted,
//!   replicated filesystem;
//! - `memory://name` keeps them in process memory, shared by every connector
//!   opened on the same name.

use std::collections::HashMap;
use std::fmt::Debug;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};

use log::debug;
use parking_lot::Mutex;
use url::Url;

use crate::error::{GridShardError, Result};
use crate::storage::file::FileStorageConfig;
use crate::storage::memory::{MemoryStorage, MemoryStorageConfig};
use crate::storage::{Storage, StorageConfig, StorageFactory};

pub mod collection;

pub use collection::RemoteShardCollection;

/// Top-level collection every store lives under.
pub const GRID_ROOT: &str = "gridshard";

/// Collection holding all indexes of one store.
pub fn store_collection(store_id: &str, database: Option<&str>) -> String {
    match database {
        Some(db) if !db.is_empty() => format!("{GRID_ROOT}/{db}/{store_id}"),
        _ => format!("{GRID_ROOT}/{store_id}"),
    }
}

/// A live session with a grid.
///
/// Collections are slash-separated paths. Failures of the link itself must
/// be reported as [`GridShardError::Transport`] so callers can reconnect.
pub trait GridConnection: Send + Debug {
    /// Whether the session can still be used.
    fn is_alive(&self) -> bool;

    /// Create a collection (and its parents) if absent.
    fn ensure_collection(&mut self, collection: &str) -> Result<()>;

    /// Names of the files in a collection. An absent collection is empty.
    fn list(&mut self, collection: &str) -> Result<Vec<String>>;

    /// Size of a file, or `None` if it does not exist.
    fn size(&mut self, collection: &str, name: &str) -> Result<Option<u64>>;

    /// Store `source` under `name`, returning the number of bytes sent.
    fn put(&mut self, collection: &str, name: &str, source: &mut dyn Read) -> Result<u64>;

    /// Copy a file into `sink`, returning the number of bytes received, or
    /// `None` if it does not exist.
    fn get(&mut self, collection: &str, name: &str, sink: &mut dyn Write) -> Result<Option<u64>>;

    /// Rename a file within a collection, replacing any existing target.
    fn rename(&mut self, collection: &str, from: &str, to: &str) -> Result<()>;

    /// Delete a file. Deleting an absent file is not an error.
    fn delete(&mut self, collection: &str, name: &str) -> Result<()>;

    /// Delete a collection and everything below it.
    fn delete_collection(&mut self, collection: &str) -> Result<()>;
}

/// Opens connections to one grid endpoint.
pub trait GridConnector: Send + Sync + Debug {
    fn connect(&self) -> Result<Box<dyn GridConnection>>;

    /// Human-readable endpoint, for logs.
    fn endpoint(&self) -> String;
}

/// A parsed grid endpoint URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GridEndpoint {
    /// `file:///path`: collections are directories below `path`.
    File(PathBuf),
    /// `memory://name`: an in-process grid shared by name.
    Memory(String),
}

impl FromStr for GridEndpoint {
    type Err = GridShardError;

    fn from_str(s: &str) -> Result<Self> {
        let url = Url::parse(s)
            .map_err(|e| GridShardError::config(format!("invalid grid endpoint {s:?}: {e}")))?;

        match url.scheme() {
            "file" => {
                let path = url.to_file_path().map_err(|_| {
                    GridShardError::config(format!("grid endpoint {s:?} is not a local path"))
                })?;
                Ok(GridEndpoint::File(path))
            }
            "memory" => {
                let name = format!(
                    "{}{}",
                    url.host_str().unwrap_or_default(),
                    url.path().trim_end_matches('/')
                );
                if name.is_empty() {
                    return Err(GridShardError::config(format!(
                        "grid endpoint {s:?} has no name"
                    )));
                }
                Ok(GridEndpoint::Memory(name))
            }
            other => Err(GridShardError::config(format!(
                "unsupported grid scheme {other:?} in {s:?}"
            ))),
        }
    }
}

impl std::fmt::Display for GridEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GridEndpoint::File(path) => write!(f, "file://{}", path.display()),
            GridEndpoint::Memory(name) => write!(f, "memory://{name}"),
        }
    }
}

/// Collections of one in-process grid.
#[derive(Debug, Default)]
struct MemoryGrid {
    collections: Mutex<HashMap<String, Arc<MemoryStorage>>>,
}

static MEMORY_GRIDS: LazyLock<Mutex<HashMap<String, Arc<MemoryGrid>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Clone)]
enum GridBackend {
    File(PathBuf),
    Memory(Arc<MemoryGrid>),
}

impl GridBackend {
    /// Storage of `collection`; `None` if it is absent and `create` is false.
    fn open(&self, collection: &str, create: bool) -> Result<Option<Arc<dyn Storage>>> {
        match self {
            GridBackend::File(root) => {
                let dir = root.join(collection);
                if !create && !dir.is_dir() {
                    return Ok(None);
                }
                let storage = StorageFactory::create(StorageConfig::File(FileStorageConfig::new(
                    &dir,
                )))?;
                Ok(Some(storage))
            }
            GridBackend::Memory(grid) => {
                let mut collections = grid.collections.lock();
                if let Some(storage) = collections.get(collection) {
                    return Ok(Some(Arc::clone(storage) as Arc<dyn Storage>));
                }
                if !create {
                    return Ok(None);
                }
                let storage = Arc::new(MemoryStorage::new(MemoryStorageConfig::default()));
                collections.insert(collection.to_string(), Arc::clone(&storage));
                Ok(Some(storage as Arc<dyn Storage>))
            }
        }
    }

    fn remove(&self, collection: &str) -> Result<()> {
        match self {
            GridBackend::File(root) => {
                let dir = root.join(collection);
                if dir.exists() {
                    std::fs::remove_dir_all(&dir)?;
                }
            }
            GridBackend::Memory(grid) => {
                let nested = format!("{collection}/");
                grid.collections
                    .lock()
                    .retain(|name, _| name != collection && !name.starts_with(&nested));
            }
        }
        Ok(())
    }
}

/// Grid connector backed by a [`Storage`] per collection.
#[derive(Debug, Clone)]
pub struct StorageGridConnector {
    endpoint: GridEndpoint,
    backend: GridBackend,
}

impl StorageGridConnector {
    pub fn new(endpoint: GridEndpoint) -> Self {
        let backend = match &endpoint {
            GridEndpoint::File(root) => GridBackend::File(root.clone()),
            GridEndpoint::Memory(name) => {
                let grid = MEMORY_GRIDS.lock().entry(name.clone()).or_default().clone();
                GridBackend::Memory(grid)
            }
        };
        StorageGridConnector { endpoint, backend }
    }

    /// Parse an endpoint URL and build a connector for it.
    pub fn from_url(endpoint: &str) -> Result<Self> {
        Ok(Self::new(endpoint.parse()?))
    }
}

impl GridConnector for StorageGridConnector {
    fn connect(&self) -> Result<Box<dyn GridConnection>> {
        if let GridBackend::File(root) = &self.backend {
            std::fs::create_dir_all(root).map_err(|e| {
                GridShardError::transport(format!("cannot reach {}: {e}", self.endpoint))
            })?;
        }
        debug!("opened grid connection to {}", self.endpoint);
        Ok(Box::new(StorageGridConnection {
            backend: self.backend.clone(),
        }))
    }

    fn endpoint(&self) -> String {
        self.endpoint.to_string()
    }
}

#[derive(Debug)]
struct StorageGridConnection {
    backend: GridBackend,
}

/// I/O failures on the grid side are link failures; absence stays absence.
fn over_transport(err: GridShardError) -> GridShardError {
    match err {
        GridShardError::Io(e) if e.kind() != std::io::ErrorKind::NotFound => {
            GridShardError::transport(e.to_string())
        }
        other => other,
    }
}

impl StorageGridConnection {
    fn storage(&self, collection: &str, create: bool) -> Result<Option<Arc<dyn Storage>>> {
        self.backend.open(collection, create).map_err(over_transport)
    }
}

impl GridConnection for StorageGridConnection {
    fn is_alive(&self) -> bool {
        match &self.backend {
            GridBackend::File(root) => root.is_dir(),
            GridBackend::Memory(_) => true,
        }
    }

    fn ensure_collection(&mut self, collection: &str) -> Result<()> {
        self.storage(collection, true).map(|_| ())
    }

    fn list(&mut self, collection: &str) -> Result<Vec<String>> {
        match self.storage(collection, false)? {
            Some(storage) => storage.list_files().map_err(over_transport),
            None => Ok(Vec::new()),
        }
    }

    fn size(&mut self, collection: &str, name: &str) -> Result<Option<u64>> {
        let Some(storage) = self.storage(collection, false)? else {
            return Ok(None);
        };
        match storage.file_size(name) {
            Ok(len) => Ok(Some(len)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(over_transport(e)),
        }
    }

    fn put(&mut self, collection: &str, name: &str, source: &mut dyn Read) -> Result<u64> {
        let storage = self
            .storage(collection, true)?
            .ok_or_else(|| GridShardError::transport(format!("collection {collection} vanished")))?;
        let mut output = storage.create_output(name).map_err(over_transport)?;
        let sent = std::io::copy(source, &mut output).map_err(|e| over_transport(e.into()))?;
        output.close().map_err(over_transport)?;
        Ok(sent)
    }

    fn get(&mut self, collection: &str, name: &str, sink: &mut dyn Write) -> Result<Option<u64>> {
        let Some(storage) = self.storage(collection, false)? else {
            return Ok(None);
        };
        let mut input = match storage.open_input(name) {
            Ok(input) => input,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(over_transport(e)),
        };
        let received = std::io::copy(&mut input, sink).map_err(|e| over_transport(e.into()))?;
        Ok(Some(received))
    }

    fn rename(&mut self, collection: &str, from: &str, to: &str) -> Result<()> {
        let storage = self
            .storage(collection, false)?
            .ok_or_else(|| GridShardError::not_found(format!("{collection}/{from}")))?;
        storage.rename_file(from, to).map_err(over_transport)
    }

    fn delete(&mut self, collection: &str, name: &str) -> Result<()> {
        match self.storage(collection, false)? {
            Some(storage) => storage.delete_file(name).map_err(over_transport),
            None => Ok(()),
        }
    }

    fn delete_collection(&mut self, collection: &str) -> Result<()> {
        self.backend.remove(collection).map_err(over_transport)
    }
}
