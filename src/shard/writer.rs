//! Writable shard handle.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::{GridShardError, Result};
use crate::shard::format::TableWriter;
use crate::shard::reader::ShardReader;
use crate::shard::{ShardOptions, building_path};

/// Entries not yet published.
enum Pending {
    /// A new shard: entries stream to the staging file in ascending key order.
    Streaming {
        table: TableWriter<BufWriter<File>>,
        last_key: Option<Vec<u8>>,
    },
    /// A reopened shard: entries are held in key order and written on close.
    Buffered {
        file: File,
        entries: BTreeMap<Vec<u8>, Vec<u8>>,
    },
}

/// A shard open for writing.
///
/// A writer reserves a `.building` sibling of its final path at creation, so
/// two writers can never target one shard. [`close`](Self::close) renames the
/// finished file over the final path; a writer that is dropped or fails to
/// close removes its reservation.
pub struct ShardWriter {
    path: PathBuf,
    staging: PathBuf,
    pending: Option<Pending>,
    entry_count: usize,
    buffer_size: usize,
    published: bool,
}

impl fmt::Debug for ShardWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardWriter")
            .field("path", &self.path)
            .field("entry_count", &self.entry_count)
            .field("published", &self.published)
            .finish()
    }
}

impl ShardWriter {
    /// Create a new, empty shard at `path`.
    ///
    /// Keys must be put in strictly ascending order. Fails with
    /// `AlreadyExists` if a shard (or an unfinished build of one) is already
    /// present.
    pub fn create<P: AsRef<Path>>(path: P, options: &ShardOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(GridShardError::already_exists(path.display().to_string()));
        }
        let (staging, file) = Self::reserve(&path)?;
        let mut writer = ShardWriter {
            path,
            staging,
            pending: None,
            entry_count: 0,
            buffer_size: options.buffer_size,
            published: false,
        };
        let table = TableWriter::new(BufWriter::with_capacity(writer.buffer_size, file))?;
        writer.pending = Some(Pending::Streaming {
            table,
            last_key: None,
        });
        Ok(writer)
    }

    /// Open an existing shard for update. Its entries are loaded, may be put
    /// in any order, and the file is rewritten on close.
    pub fn open<P: AsRef<Path>>(path: P, options: &ShardOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = ShardReader::open(&path, options)?;
        let mut entries = BTreeMap::new();
        let mut cursor = reader.cursor();
        let mut current = cursor.first()?;
        while let Some((key, value)) = current {
            entries.insert(key.to_vec(), value.to_vec());
            current = cursor.next()?;
        }
        drop(cursor);
        reader.close()?;

        let (staging, file) = Self::reserve(&path)?;
        Ok(ShardWriter {
            path,
            staging,
            entry_count: entries.len(),
            pending: Some(Pending::Buffered { file, entries }),
            buffer_size: options.buffer_size,
            published: false,
        })
    }

    fn reserve(path: &Path) -> Result<(PathBuf, File)> {
        let staging = building_path(path);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    GridShardError::already_exists(format!(
                        "{} (another build in progress or abandoned)",
                        staging.display()
                    ))
                } else {
                    GridShardError::Io(e)
                }
            })?;
        Ok((staging, file))
    }

    /// Add `key`. A new shard takes keys in strictly ascending order and
    /// fails with `UnsortedInput` otherwise; a reopened shard overwrites.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        match self.pending.as_mut() {
            Some(Pending::Streaming { table, last_key }) => {
                if let Some(last) = last_key.as_deref() {
                    if key <= last {
                        return Err(GridShardError::unsorted(format!(
                            "key {:?} after {:?} in {}",
                            String::from_utf8_lossy(key),
                            String::from_utf8_lossy(last),
                            self.path.display()
                        )));
                    }
                }
                table.append(key, value)?;
                *last_key = Some(key.to_vec());
                self.entry_count += 1;
            }
            Some(Pending::Buffered { entries, .. }) => {
                entries.insert(key.to_vec(), value.to_vec());
                self.entry_count = entries.len();
            }
            None => return Err(GridShardError::invalid_operation("shard writer already closed")),
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finish the file and publish the shard under its final path.
    ///
    /// Returns the size of the written file. On failure nothing is published
    /// and the reservation is released.
    pub fn close(mut self) -> Result<u64> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| GridShardError::invalid_operation("shard writer already closed"))?;

        let (out, len) = match pending {
            Pending::Streaming { table, .. } => table.finish()?,
            Pending::Buffered { file, entries } => {
                let mut table = TableWriter::new(BufWriter::with_capacity(self.buffer_size, file))?;
                for (key, value) in &entries {
                    table.append(key, value)?;
                }
                table.finish()?
            }
        };
        let file = out.into_inner().map_err(|e| GridShardError::Io(e.into_error()))?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&self.staging, &self.path)?;
        self.published = true;
        debug!(
            "closed shard {} ({} entries, {} bytes)",
            self.path.display(),
            self.entry_count,
            len
        );
        Ok(len)
    }
}

impl Drop for ShardWriter {
    fn drop(&mut self) {
        // An unpublished writer releases its reservation.
        if !self.published {
            self.pending.take();
            let _ = std::fs::remove_file(&self.staging);
        }
    }
}
