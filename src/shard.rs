//! Local shard files and the on-disk shard cache.
//!
//! A shard is an immutable sorted table of `term -> packed posting list`.
//! [`ShardWriter`] builds one, [`ShardReader`] serves point lookups and
//! [`ShardCursor`] range scans over it. [`LocalShardStore`] arranges shards as
//! `<root>/<index>/<shard_id>.index`, the same layout the grid uses.

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{GridShardError, Result};

pub mod format;
pub mod reader;
pub mod writer;

pub use reader::{ShardCursor, ShardEntry, ShardReader};
pub use writer::ShardWriter;

/// File extension of published shards.
pub const SHARD_EXTENSION: &str = "index";

/// Options for opening and writing shard files.
#[derive(Debug, Clone)]
pub struct ShardOptions {
    /// Memory-map shard files for reading. Disable in server environments
    /// where many processes map the same files.
    pub use_mmap: bool,

    /// Write buffer size, in bytes.
    pub buffer_size: usize,
}

impl Default for ShardOptions {
    fn default() -> Self {
        ShardOptions {
            use_mmap: true,
            buffer_size: 65536,
        }
    }
}

/// File name of a shard.
pub fn shard_file_name(shard_id: &str) -> String {
    format!("{shard_id}.{SHARD_EXTENSION}")
}

/// Shard id encoded in a file name, if it names a published shard.
pub fn shard_id_from_file_name(name: &str) -> Option<&str> {
    name.strip_suffix(SHARD_EXTENSION)
        .and_then(|stem| stem.strip_suffix('.'))
        .filter(|id| !id.is_empty())
}

pub(crate) fn building_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".building");
    PathBuf::from(name)
}

/// Reject names that would escape the index root.
pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0'])
    {
        return Err(GridShardError::invalid_argument(format!(
            "invalid {kind} name {name:?}"
        )));
    }
    Ok(())
}

/// Directory of shard files, one sub-directory per index.
#[derive(Debug, Clone)]
pub struct LocalShardStore {
    root: PathBuf,
    options: ShardOptions,
}

impl LocalShardStore {
    pub fn new<P: AsRef<Path>>(root: P, options: ShardOptions) -> Self {
        LocalShardStore {
            root: root.as_ref().to_path_buf(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn options(&self) -> &ShardOptions {
        &self.options
    }

    pub fn index_dir(&self, index: &str) -> PathBuf {
        self.root.join(index)
    }

    pub fn shard_path(&self, index: &str, shard_id: &str) -> PathBuf {
        self.index_dir(index).join(shard_file_name(shard_id))
    }

    /// Create the index directory if needed.
    pub fn ensure_index_dir(&self, index: &str) -> Result<PathBuf> {
        validate_name("index", index)?;
        let dir = self.index_dir(index);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn exists(&self, index: &str, shard_id: &str) -> bool {
        self.shard_path(index, shard_id).is_file()
    }

    /// Create a new shard. Fails with `AlreadyExists` if it is present.
    pub fn create(&self, index: &str, shard_id: &str) -> Result<ShardWriter> {
        validate_name("shard", shard_id)?;
        self.ensure_index_dir(index)?;
        ShardWriter::create(self.shard_path(index, shard_id), &self.options)
    }

    /// Open a shard read-only. Fails with `NotFound` if it is absent.
    pub fn open(&self, index: &str, shard_id: &str) -> Result<ShardReader> {
        ShardReader::open(self.shard_path(index, shard_id), &self.options)
    }

    /// Open a shard for update.
    pub fn open_for_update(&self, index: &str, shard_id: &str) -> Result<ShardWriter> {
        ShardWriter::open(self.shard_path(index, shard_id), &self.options)
    }

    /// Published shard ids of an index, in byte order.
    pub fn list_shards(&self, index: &str) -> Result<Vec<String>> {
        let dir = self.index_dir(index);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut shards = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = shard_id_from_file_name(name) {
                    shards.push(id.to_string());
                }
            }
        }
        shards.sort();
        Ok(shards)
    }

    pub fn remove_shard(&self, index: &str, shard_id: &str) -> Result<()> {
        let path = self.shard_path(index, shard_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!("removed local shard {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the whole local directory of an index.
    pub fn remove_index(&self, index: &str) -> Result<()> {
        validate_name("index", index)?;
        let dir = self.index_dir(index);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
            debug!("removed local index directory {}", dir.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout() {
        let store = LocalShardStore::new("/data/cache", ShardOptions::default());
        assert_eq!(
            store.shard_path("title", "a"),
            PathBuf::from("/data/cache/title/a.index")
        );
    }

    #[test]
    fn test_file_name_parsing() {
        assert_eq!(shard_id_from_file_name("a.index"), Some("a"));
        assert_eq!(shard_id_from_file_name("other2.index"), Some("other2"));
        assert_eq!(shard_id_from_file_name("a.index.building"), None);
        assert_eq!(shard_id_from_file_name(".index"), None);
        assert_eq!(shard_id_from_file_name("aindex"), None);
    }

    #[test]
    fn test_validate_name() {
        assert!(validate_name("index", "title").is_ok());
        assert!(validate_name("index", "").is_err());
        assert!(validate_name("index", "..").is_err());
        assert!(validate_name("index", "a/b").is_err());
    }

    #[test]
    fn test_create_list_remove() {
        let dir = TempDir::new().unwrap();
        let store = LocalShardStore::new(dir.path(), ShardOptions::default());

        assert!(store.list_shards("title").unwrap().is_empty());

        for id in ["b", "a", "other"] {
            let mut writer = store.create("title", id).unwrap();
            writer.put(id.as_bytes(), b"x").unwrap();
            writer.close().unwrap();
        }

        assert!(store.exists("title", "a"));
        assert_eq!(store.list_shards("title").unwrap(), vec!["a", "b", "other"]);
        assert!(matches!(
            store.create("title", "a"),
            Err(GridShardError::AlreadyExists(_))
        ));

        let reader = store.open("title", "b").unwrap();
        assert_eq!(reader.get(b"b").unwrap(), Some(&b"x"[..]));
        reader.close().unwrap();

        store.remove_shard("title", "b").unwrap();
        store.remove_shard("title", "b").unwrap();
        assert!(store.open("title", "b").unwrap_err().is_not_found());

        store.remove_index("title").unwrap();
        assert!(store.list_shards("title").unwrap().is_empty());
    }
}
