//! In-memory storage implementation for testing and in-process grids.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::storage::{Storage, StorageError, StorageInput, StorageOutput};

type FileMap = Arc<Mutex<HashMap<String, Arc<[u8]>>>>;

/// Configuration for memory storage.
#[derive(Debug, Clone)]
pub struct MemoryStorageConfig {
    /// Initial capacity of the file table.
    pub initial_capacity: usize,
}

impl Default for MemoryStorageConfig {
    fn default() -> Self {
        MemoryStorageConfig {
            initial_capacity: 16,
        }
    }
}

/// An in-memory storage implementation.
///
/// Files are published atomically when their output is closed, and readers
/// share the published bytes without copying.
#[derive(Debug)]
pub struct MemoryStorage {
    files: FileMap,
}

impl MemoryStorage {
    /// Create a new memory storage.
    pub fn new(config: MemoryStorageConfig) -> Self {
        MemoryStorage {
            files: Arc::new(Mutex::new(HashMap::with_capacity(config.initial_capacity))),
        }
    }
}

impl Storage for MemoryStorage {
    fn open_input(&self, name: &str) -> Result<Box<dyn StorageInput>> {
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        Ok(Box::new(MemoryInput::new(Arc::clone(data))))
    }

    fn create_output(&self, name: &str) -> Result<Box<dyn StorageOutput>> {
        Ok(Box::new(MemoryOutput::new(
            name.to_string(),
            Arc::clone(&self.files),
        )))
    }

    fn file_exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }

    fn delete_file(&self, name: &str) -> Result<()> {
        self.files.lock().remove(name);
        Ok(())
    }

    fn list_files(&self) -> Result<Vec<String>> {
        let mut file_names: Vec<String> = self.files.lock().keys().cloned().collect();
        file_names.sort();
        Ok(file_names)
    }

    fn file_size(&self, name: &str) -> Result<u64> {
        let files = self.files.lock();
        let data = files
            .get(name)
            .ok_or_else(|| StorageError::FileNotFound(name.to_string()))?;

        Ok(data.len() as u64)
    }

    fn rename_file(&self, old_name: &str, new_name: &str) -> Result<()> {
        let mut files = self.files.lock();
        let data = files
            .remove(old_name)
            .ok_or_else(|| StorageError::FileNotFound(old_name.to_string()))?;

        files.insert(new_name.to_string(), data);
        Ok(())
    }
}

/// A memory-based input implementation.
#[derive(Debug)]
pub struct MemoryInput {
    cursor: Cursor<Arc<[u8]>>,
}

impl MemoryInput {
    fn new(data: Arc<[u8]>) -> Self {
        MemoryInput {
            cursor: Cursor::new(data),
        }
    }
}

impl Read for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl StorageInput for MemoryInput {}

/// A memory-based output implementation.
///
/// Bytes are buffered until `close`, which publishes them under the name.
#[derive(Debug)]
pub struct MemoryOutput {
    name: String,
    buffer: Vec<u8>,
    files: FileMap,
    closed: bool,
}

impl MemoryOutput {
    fn new(name: String, files: FileMap) -> Self {
        MemoryOutput {
            name,
            buffer: Vec::new(),
            files,
            closed: false,
        }
    }
}

impl Write for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.closed {
            return Err(std::io::Error::other("Output is closed"));
        }

        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageOutput for MemoryOutput {
    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(StorageError::InvalidOperation(format!("{} already closed", self.name)).into());
        }
        let data: Arc<[u8]> = std::mem::take(&mut self.buffer).into();
        self.files.lock().insert(self.name.clone(), data);
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_on_close() {
        let storage = MemoryStorage::new(MemoryStorageConfig::default());

        let mut output = storage.create_output("a.index").unwrap();
        output.write_all(b"Hello").unwrap();
        assert!(!storage.file_exists("a.index"));

        output.close().unwrap();
        assert!(storage.file_exists("a.index"));
        assert_eq!(storage.file_size("a.index").unwrap(), 5);
    }

    #[test]
    fn test_dropped_output_publishes_nothing() {
        let storage = MemoryStorage::new(MemoryStorageConfig::default());

        {
            let mut output = storage.create_output("b.index").unwrap();
            output.write_all(b"partial").unwrap();
        }

        assert!(!storage.file_exists("b.index"));
        assert!(storage.list_files().unwrap().is_empty());
    }

    #[test]
    fn test_rename_and_delete() {
        let storage = MemoryStorage::new(MemoryStorageConfig::default());

        let mut output = storage.create_output("c.part").unwrap();
        output.write_all(b"data").unwrap();
        output.close().unwrap();

        storage.rename_file("c.part", "c.index").unwrap();
        assert_eq!(storage.list_files().unwrap(), vec!["c.index"]);

        let mut input = storage.open_input("c.index").unwrap();
        let mut buffer = Vec::new();
        input.read_to_end(&mut buffer).unwrap();
        assert_eq!(buffer, b"data");

        storage.delete_file("c.index").unwrap();
        assert!(storage.open_input("c.index").unwrap_err().is_not_found());
        assert!(storage.rename_file("c.index", "d.index").is_err());
    }
}
