//! Storage abstraction layer for gridshard.
//!
//! A flat namespace of named byte files behind the [`Storage`] trait. The grid
//! backends hold one `Storage` per sub-collection: a file backend for a
//! mounted, replicated filesystem and a memory backend for tests and demos.
//!
//! # Example
//!
//! ```
//! use gridshard::storage::{StorageConfig, StorageFactory};
//! use gridshard::storage::memory::MemoryStorageConfig;
//! use std::io::{Read, Write};
//!
//! # fn main() -> gridshard::error::Result<()> {
//! let storage = StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default()))?;
//!
//! let mut output = storage.create_output("a.index")?;
//! output.write_all(b"shard bytes")?;
//! output.close()?;
//!
//! let mut input = storage.open_input("a.index")?;
//! let mut buffer = Vec::new();
//! input.read_to_end(&mut buffer)?;
//! assert_eq!(buffer, b"shard bytes");
//! # Ok(())
//! # }
//! ```

use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::{GridShardError, Result};

pub mod file;
pub mod memory;

/// A trait for storage backends that can store and retrieve named files.
pub trait Storage: Send + Sync + std::fmt::Debug {
    /// Open an existing file for reading.
    ///
    /// Fails with a not-found error if the file does not exist.
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>>;

    /// Create a file for writing, truncating any existing file.
    ///
    /// The contents become visible under `name` once the output is closed.
    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>>;

    /// Check if a file exists.
    fn file_exists(&self, name: &str) -> bool;

    /// Delete a file. Deleting an absent file is not an error.
    fn delete_file(&self, name: &str) -> Result<()>;

    /// List all files, sorted by name.
    fn list_files(&self) -> Result<Vec<String>>;

    /// Get the size of a file in bytes.
    fn file_size(&self, name: &str) -> Result<u64>;

    /// Rename a file, replacing any file already at `new_name`.
    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()>;
}

/// A trait for reading data from storage.
pub trait StorageInput: Read + Send + std::fmt::Debug {}

/// A trait for writing data to storage.
pub trait StorageOutput: Write + Send + std::fmt::Debug {
    /// Flush and publish the file.
    fn close(&mut self) -> Result<()>;
}

/// Configuration for storage backends.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    File(file::FileStorageConfig),

    Memory(memory::MemoryStorageConfig),
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory(memory::MemoryStorageConfig::default())
    }
}

/// A factory for creating storage instances.
pub struct StorageFactory;

impl StorageFactory {
    pub fn create(config: StorageConfig) -> Result<Arc<dyn Storage>> {
        match config {
            StorageConfig::Memory(mem_config) => {
                let storage = memory::MemoryStorage::new(mem_config);
                Ok(Arc::new(storage))
            }
            StorageConfig::File(file_config) => {
                let path = file_config.path.clone();
                let storage = file::FileStorage::new(&path, file_config)?;
                Ok(Arc::new(storage))
            }
        }
    }
}

/// Error types specific to storage operations.
#[derive(Debug, Clone)]
pub enum StorageError {
    FileNotFound(String),

    IoError(String),

    InvalidOperation(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::FileNotFound(name) => write!(f, "File not found: {name}"),
            StorageError::IoError(msg) => write!(f, "I/O error: {msg}"),
            StorageError::InvalidOperation(msg) => write!(f, "Invalid operation: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for GridShardError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::FileNotFound(name) => GridShardError::not_found(name),
            StorageError::IoError(msg) => GridShardError::Io(std::io::Error::other(msg)),
            StorageError::InvalidOperation(msg) => GridShardError::invalid_operation(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::file::FileStorageConfig;
    use crate::storage::memory::MemoryStorageConfig;

    #[test]
    fn test_storage_config_default() {
        match StorageConfig::default() {
            StorageConfig::Memory(mem_config) => {
                assert_eq!(mem_config.initial_capacity, 16);
            }
            _ => panic!("Expected Memory config"),
        }
    }

    #[test]
    fn test_storage_error_conversion() {
        let err: GridShardError = StorageError::FileNotFound("a.index".to_string()).into();
        assert!(err.is_not_found());

        let err: GridShardError = StorageError::IoError("disk full".to_string()).into();
        assert!(matches!(err, GridShardError::Io(_)));
    }

    #[test]
    fn test_storage_factory_memory() {
        let storage =
            StorageFactory::create(StorageConfig::Memory(MemoryStorageConfig::default())).unwrap();
        assert!(!storage.file_exists("a.index"));
    }

    #[test]
    fn test_storage_factory_file() {
        use std::io::Write;
        use tempfile::TempDir;

        let temp_dir = TempDir::new().unwrap();
        let config = StorageConfig::File(FileStorageConfig::new(temp_dir.path()));
        let storage = StorageFactory::create(config).unwrap();

        let mut output = storage.create_output("b.index").unwrap();
        output.write_all(b"Hello, Factory!").unwrap();
        output.close().unwrap();

        let mut input = storage.open_input("b.index").unwrap();
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer).unwrap();

        assert_eq!(buffer, b"Hello, Factory!");
    }
}
