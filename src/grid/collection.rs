//! Client to the shard collections of one store on the grid.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::error::{GridShardError, Result};
use crate::grid::{GridConnection, GridConnector};
use crate::shard::{shard_file_name, shard_id_from_file_name, validate_name};

/// Idle connections kept for reuse.
pub const DEFAULT_MAX_IDLE: usize = 8;

/// The grid side of an index store.
///
/// Operations check a connection out of a small idle pool, or open a new one,
/// and run without holding any lock, so transfers for different shards
/// proceed in parallel. A connection that fails with a transport error is
/// dropped and the operation retries exactly once on a fresh connection; a
/// second failure is returned to the caller and leaves the collection usable
/// for later calls.
///
/// Shards live at `<root>/<index>/<shard_id>.index`.
#[derive(Debug)]
pub struct RemoteShardCollection {
    connector: Arc<dyn GridConnector>,
    root: String,
    idle: Mutex<Vec<Box<dyn GridConnection>>>,
    max_idle: usize,
}

impl RemoteShardCollection {
    pub fn new(connector: Arc<dyn GridConnector>, root: impl Into<String>) -> Self {
        RemoteShardCollection {
            connector,
            root: root.into(),
            idle: Mutex::new(Vec::new()),
            max_idle: DEFAULT_MAX_IDLE,
        }
    }

    /// Keep at most `max_idle` connections between operations.
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Root collection of the store.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Sub-collection holding the shards of `index`.
    pub fn index_collection(&self, index: &str) -> String {
        format!("{}/{}", self.root, index)
    }

    /// Make sure a live connection exists, reusing an idle one if possible.
    pub fn connect(&self) -> Result<()> {
        self.with_connection("connect", |_| Ok(()))
    }

    /// A live idle connection, or a new one when `fresh` is set or none is left.
    fn checkout(&self, fresh: bool) -> Result<Box<dyn GridConnection>> {
        if !fresh {
            let mut idle = self.idle.lock();
            while let Some(conn) = idle.pop() {
                if conn.is_alive() {
                    return Ok(conn);
                }
            }
        }
        let conn = self.connector.connect()?;
        debug!("connected to grid {}", self.connector.endpoint());
        Ok(conn)
    }

    fn checkin(&self, conn: Box<dyn GridConnection>) {
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }

    fn with_connection<T, F>(&self, op: &str, mut f: F) -> Result<T>
    where
        F: FnMut(&mut dyn GridConnection) -> Result<T>,
    {
        let mut retried = false;
        loop {
            let result = self.checkout(retried).and_then(|mut conn| {
                let result = f(&mut *conn);
                // A transport failure leaves the session unusable.
                if !matches!(&result, Err(e) if e.is_transport()) {
                    self.checkin(conn);
                }
                result
            });
            match result {
                Err(e) if e.is_transport() && !retried => {
                    warn!(
                        "grid {op} on {} failed: {e}; reconnecting",
                        self.connector.endpoint()
                    );
                    retried = true;
                }
                other => return other,
            }
        }
    }

    /// Create the sub-collection of `index` if it is absent.
    pub fn ensure_sub_collection(&self, index: &str) -> Result<()> {
        validate_name("index", index)?;
        let collection = self.index_collection(index);
        self.with_connection("ensure_sub_collection", |conn| {
            conn.ensure_collection(&collection)
        })
    }

    /// Publish a local shard file as `shard_id` of `index`.
    ///
    /// The bytes go to a uniquely named part file first; only after its
    /// length matches the local file is it renamed over the shard name.
    /// Returns the number of bytes published.
    pub fn upload(&self, index: &str, shard_id: &str, local: &Path) -> Result<u64> {
        validate_name("index", index)?;
        validate_name("shard", shard_id)?;
        let collection = self.index_collection(index);
        let name = shard_file_name(shard_id);
        let local_len = std::fs::metadata(local)?.len();

        self.with_connection("upload", |conn| {
            conn.ensure_collection(&collection)?;
            let part = format!("{name}.{}.part", Uuid::new_v4());
            let mut file = File::open(local)?;
            conn.put(&collection, &part, &mut file)?;

            let remote_len = conn.size(&collection, &part)?;
            if remote_len != Some(local_len) {
                // Best effort; the part name is unique and never read.
                let _ = conn.delete(&collection, &part);
                return Err(GridShardError::transport(format!(
                    "upload of {collection}/{name} stored {remote_len:?} bytes, expected {local_len}"
                )));
            }
            conn.rename(&collection, &part, &name)
        })?;

        info!("uploaded {collection}/{name} ({local_len} bytes)");
        Ok(local_len)
    }

    /// Fetch `shard_id` of `index` into `dest`.
    ///
    /// Returns `false` when the grid has no such shard. The file appears at
    /// `dest` only once it is complete.
    pub fn download(&self, index: &str, shard_id: &str, dest: &Path) -> Result<bool> {
        let collection = self.index_collection(index);
        let name = shard_file_name(shard_id);
        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => std::env::current_dir()?,
        };
        std::fs::create_dir_all(&parent)?;

        let fetched = self.with_connection("download", |conn| {
            let Some(expected) = conn.size(&collection, &name)? else {
                return Ok(false);
            };

            let mut temp = tempfile::Builder::new()
                .prefix(&format!(".{name}."))
                .suffix(".download")
                .tempfile_in(&parent)?;
            let Some(received) = conn.get(&collection, &name, temp.as_file_mut())? else {
                return Ok(false);
            };
            if received != expected {
                return Err(GridShardError::transport(format!(
                    "download of {collection}/{name} received {received} bytes, expected {expected}"
                )));
            }
            temp.as_file().sync_all()?;
            temp.persist(dest).map_err(|e| GridShardError::Io(e.error))?;
            Ok(true)
        })?;

        if fetched {
            info!("downloaded {collection}/{name} to {}", dest.display());
        } else {
            debug!("grid has no shard {collection}/{name}");
        }
        Ok(fetched)
    }

    /// Shard ids published for `index`, in byte order.
    pub fn list_shards(&self, index: &str) -> Result<Vec<String>> {
        let collection = self.index_collection(index);
        let files = self.with_connection("list", |conn| conn.list(&collection))?;
        let mut shards: Vec<String> = files
            .iter()
            .filter_map(|name| shard_id_from_file_name(name))
            .map(str::to_string)
            .collect();
        shards.sort();
        Ok(shards)
    }

    /// Length of a published shard, or `None` if absent.
    pub fn remote_len(&self, index: &str, shard_id: &str) -> Result<Option<u64>> {
        let collection = self.index_collection(index);
        let name = shard_file_name(shard_id);
        self.with_connection("size", |conn| conn.size(&collection, &name))
    }

    /// Remove every shard of `index` from the grid.
    pub fn delete_index(&self, index: &str) -> Result<()> {
        validate_name("index", index)?;
        let collection = self.index_collection(index);
        self.with_connection("delete_index", |conn| conn.delete_collection(&collection))?;
        info!("deleted grid collection {collection}");
        Ok(())
    }
}
