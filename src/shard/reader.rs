//! Read-only shard handle and cursor.

use std::fs::File;
use std::io::Read;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};

use crate::error::{GridShardError, Result};
use crate::shard::ShardOptions;
use crate::shard::format::{self, Layout};

/// A key/value pair borrowed from an open shard.
pub type ShardEntry<'a> = (&'a [u8], &'a [u8]);

#[derive(Debug)]
enum ShardBytes {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for ShardBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ShardBytes::Mapped(mmap) => mmap,
            ShardBytes::Owned(bytes) => bytes,
        }
    }
}

/// An immutable, validated shard.
#[derive(Debug)]
pub struct ShardReader {
    path: PathBuf,
    bytes: ShardBytes,
    layout: Layout,
}

impl ShardReader {
    /// Open the shard at `path`. Fails with `NotFound` if it does not exist
    /// and `CorruptEncoding` if it fails validation.
    pub fn open<P: AsRef<Path>>(path: P, options: &ShardOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GridShardError::not_found(path.display().to_string())
            } else {
                GridShardError::Io(e)
            }
        })?;

        let bytes = if options.use_mmap {
            // Shard files are immutable once renamed into place.
            let mmap = unsafe { MmapOptions::new().map(&file)? };
            ShardBytes::Mapped(mmap)
        } else {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            ShardBytes::Owned(buf)
        };

        let layout = format::validate(&bytes).map_err(|e| match e {
            GridShardError::CorruptEncoding(msg) => {
                GridShardError::corrupt(format!("{}: {msg}", path.display()))
            }
            other => other,
        })?;

        Ok(ShardReader {
            path,
            bytes,
            layout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries in the shard.
    pub fn len(&self) -> usize {
        self.layout.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.layout.entry_count == 0
    }

    fn entry(&self, index: usize) -> Result<ShardEntry<'_>> {
        format::entry(&self.bytes, &self.layout, index)
    }

    /// Index of the first entry whose key is `>= key`, or `len()` if none.
    fn lower_bound(&self, key: &[u8]) -> Result<usize> {
        let (mut lo, mut hi) = (0, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.entry(mid)?.0 < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> Result<Option<&[u8]>> {
        let index = self.lower_bound(key)?;
        if index < self.len() {
            let (found, value) = self.entry(index)?;
            if found == key {
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    /// Point lookup returning at most `len` leading bytes of the value.
    pub fn get_prefix(&self, key: &[u8], len: usize) -> Result<Option<&[u8]>> {
        Ok(self.get(key)?.map(|value| &value[..value.len().min(len)]))
    }

    /// A cursor positioned before the first entry.
    pub fn cursor(&self) -> ShardCursor<'_> {
        ShardCursor {
            reader: self,
            position: None,
            value_limit: None,
        }
    }

    /// Release the shard.
    pub fn close(self) -> Result<()> {
        Ok(())
    }
}

/// Bidirectional cursor over a shard's entries in key order.
///
/// Every positioning method returns the entry it lands on, or `None` when it
/// moves past either end.
#[derive(Debug)]
pub struct ShardCursor<'a> {
    reader: &'a ShardReader,
    position: Option<usize>,
    value_limit: Option<usize>,
}

impl<'a> ShardCursor<'a> {
    /// Return at most `limit` leading bytes of each value (summary reads).
    pub fn with_value_limit(mut self, limit: Option<usize>) -> Self {
        self.value_limit = limit;
        self
    }

    fn land(&mut self, index: Option<usize>) -> Result<Option<ShardEntry<'a>>> {
        self.position = index.filter(|&i| i < self.reader.len());
        match self.position {
            Some(i) => {
                let (key, value) = self.reader.entry(i)?;
                let value = match self.value_limit {
                    Some(limit) => &value[..value.len().min(limit)],
                    None => value,
                };
                Ok(Some((key, value)))
            }
            None => Ok(None),
        }
    }

    /// Position at the first key `>= key`.
    pub fn seek_ge(&mut self, key: &[u8]) -> Result<Option<ShardEntry<'a>>> {
        let index = self.reader.lower_bound(key)?;
        self.land(Some(index))
    }

    pub fn first(&mut self) -> Result<Option<ShardEntry<'a>>> {
        self.land(Some(0))
    }

    pub fn seek_last(&mut self) -> Result<Option<ShardEntry<'a>>> {
        self.land(self.reader.len().checked_sub(1))
    }

    pub fn next(&mut self) -> Result<Option<ShardEntry<'a>>> {
        match self.position {
            Some(i) => self.land(Some(i + 1)),
            None => Ok(None),
        }
    }

    pub fn prev(&mut self) -> Result<Option<ShardEntry<'a>>> {
        match self.position {
            Some(i) => self.land(i.checked_sub(1)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::writer::ShardWriter;
    use tempfile::TempDir;

    fn fruit_shard(dir: &TempDir, options: &ShardOptions) -> PathBuf {
        let path = dir.path().join("f.index");
        let mut writer = ShardWriter::create(&path, options).unwrap();
        for (k, v) in [("apple", "1111"), ("date", "22"), ("fig", "3"), ("kiwi", "4")] {
            writer.put(k.as_bytes(), v.as_bytes()).unwrap();
        }
        writer.close().unwrap();
        path
    }

    #[test]
    fn test_open_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = ShardReader::open(dir.path().join("x.index"), &ShardOptions::default())
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_get_with_and_without_mmap() {
        let dir = TempDir::new().unwrap();
        for use_mmap in [true, false] {
            let options = ShardOptions {
                use_mmap,
                ..ShardOptions::default()
            };
            let path = dir.path().join(format!("g{use_mmap}.index"));
            let mut writer = ShardWriter::create(&path, &options).unwrap();
            writer.put(b"grape", b"value").unwrap();
            writer.close().unwrap();

            let reader = ShardReader::open(&path, &options).unwrap();
            assert_eq!(reader.get(b"grape").unwrap(), Some(&b"value"[..]));
            assert_eq!(reader.get(b"grap").unwrap(), None);
            assert_eq!(reader.get_prefix(b"grape", 2).unwrap(), Some(&b"va"[..]));
        }
    }

    #[test]
    fn test_cursor_walks_both_directions() {
        let dir = TempDir::new().unwrap();
        let options = ShardOptions::default();
        let reader = ShardReader::open(fruit_shard(&dir, &options), &options).unwrap();
        let mut cursor = reader.cursor();

        let (key, _) = cursor.seek_ge(b"b").unwrap().unwrap();
        assert_eq!(key, b"date");
        assert_eq!(cursor.next().unwrap().unwrap().0, b"fig");
        assert_eq!(cursor.prev().unwrap().unwrap().0, b"date");
        assert_eq!(cursor.prev().unwrap().unwrap().0, b"apple");
        assert!(cursor.prev().unwrap().is_none());
        assert!(cursor.next().unwrap().is_none());

        assert!(cursor.seek_ge(b"zebra").unwrap().is_none());
        assert_eq!(cursor.seek_last().unwrap().unwrap().0, b"kiwi");
        assert!(cursor.next().unwrap().is_none());
    }

    #[test]
    fn test_value_limit() {
        let dir = TempDir::new().unwrap();
        let options = ShardOptions::default();
        let reader = ShardReader::open(fruit_shard(&dir, &options), &options).unwrap();
        let mut cursor = reader.cursor().with_value_limit(Some(2));

        assert_eq!(cursor.first().unwrap().unwrap(), (&b"apple"[..], &b"11"[..]));
        assert_eq!(cursor.next().unwrap().unwrap(), (&b"date"[..], &b"22"[..]));
        assert_eq!(cursor.next().unwrap().unwrap(), (&b"fig"[..], &b"3"[..]));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let options = ShardOptions::default();
        let path = fruit_shard(&dir, &options);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[12] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let err = ShardReader::open(&path, &options).unwrap_err();
        assert!(matches!(err, GridShardError::CorruptEncoding(_)));
    }

    #[test]
    fn test_empty_shard() {
        let dir = TempDir::new().unwrap();
        let options = ShardOptions::default();
        let path = dir.path().join("e.index");
        ShardWriter::create(&path, &options).unwrap().close().unwrap();

        let reader = ShardReader::open(&path, &options).unwrap();
        assert!(reader.is_empty());
        let mut cursor = reader.cursor();
        assert!(cursor.seek_ge(b"").unwrap().is_none());
        assert!(cursor.seek_last().unwrap().is_none());
    }
}
