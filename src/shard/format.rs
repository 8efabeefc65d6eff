//! On-disk layout of a shard file.
//!
//! ```text
//! +-----------------+
//! | magic | version |  8 bytes
//! +-----------------+
//! | entry*          |  varint key_len, key, varint value_len, value
//! +-----------------+
//! | offset*         |  u64 LE, one per entry, in key order
//! +-----------------+
//! | entry_count u64 | offsets_start u64 | crc32 u32 | magic |  24 bytes
//! +-----------------+
//! ```
//!
//! The CRC covers every byte before the CRC field.

use std::io::Write;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{GridShardError, Result};
use crate::util::varint;

pub const MAGIC: &[u8; 4] = b"GSHD";
pub const VERSION: u32 = 1;
pub const HEADER_LEN: usize = 8;
pub const FOOTER_LEN: usize = 24;

/// Validated positions of the sections within a shard file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub entry_count: usize,
    pub offsets_start: usize,
}

/// Stream entries out in shard format, tracking offsets and the checksum.
pub struct TableWriter<W: Write> {
    out: W,
    hasher: crc32fast::Hasher,
    position: u64,
    offsets: Vec<u64>,
}

impl<W: Write> TableWriter<W> {
    pub fn new(out: W) -> Result<Self> {
        let mut writer = TableWriter {
            out,
            hasher: crc32fast::Hasher::new(),
            position: 0,
            offsets: Vec::new(),
        };
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(MAGIC);
        header.write_u32::<LittleEndian>(VERSION)?;
        writer.emit(&header)?;
        Ok(writer)
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        self.out.write_all(bytes)?;
        self.hasher.update(bytes);
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Append one entry. Callers must supply keys in ascending order.
    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.offsets.push(self.position);
        let mut prefix = Vec::with_capacity(2 * varint::MAX_VARINT_LEN);
        varint::put_u64(&mut prefix, key.len() as u64);
        self.emit(&prefix)?;
        self.emit(key)?;
        prefix.clear();
        varint::put_u64(&mut prefix, value.len() as u64);
        self.emit(&prefix)?;
        self.emit(value)
    }

    /// Write the offsets table and footer, returning the inner writer and total length.
    pub fn finish(mut self) -> Result<(W, u64)> {
        let offsets_start = self.position;
        let mut table = Vec::with_capacity(self.offsets.len() * 8);
        for &offset in &self.offsets {
            table.write_u64::<LittleEndian>(offset)?;
        }
        self.emit(&table)?;

        let mut counts = Vec::with_capacity(16);
        counts.write_u64::<LittleEndian>(self.offsets.len() as u64)?;
        counts.write_u64::<LittleEndian>(offsets_start)?;
        self.emit(&counts)?;

        let crc = self.hasher.clone().finalize();
        let mut trailer = Vec::with_capacity(8);
        trailer.write_u32::<LittleEndian>(crc)?;
        trailer.extend_from_slice(MAGIC);
        self.out.write_all(&trailer)?;
        self.out.flush()?;

        Ok((self.out, self.position + trailer.len() as u64))
    }
}

/// Check magics, version, checksum and section bounds of a complete shard image.
pub fn validate(bytes: &[u8]) -> Result<Layout> {
    if bytes.len() < HEADER_LEN + FOOTER_LEN {
        return Err(GridShardError::corrupt(format!(
            "shard file too short: {} bytes",
            bytes.len()
        )));
    }
    if &bytes[..4] != MAGIC || &bytes[bytes.len() - 4..] != MAGIC {
        return Err(GridShardError::corrupt("bad shard magic"));
    }
    let version = LittleEndian::read_u32(&bytes[4..8]);
    if version != VERSION {
        return Err(GridShardError::corrupt(format!(
            "unsupported shard version {version}"
        )));
    }

    let footer = &bytes[bytes.len() - FOOTER_LEN..];
    let entry_count = LittleEndian::read_u64(&footer[0..8]);
    let offsets_start = LittleEndian::read_u64(&footer[8..16]);
    let stored_crc = LittleEndian::read_u32(&footer[16..20]);

    let crc = crc32fast::hash(&bytes[..bytes.len() - 8]);
    if crc != stored_crc {
        return Err(GridShardError::corrupt(format!(
            "shard checksum mismatch: stored {stored_crc:#010x}, computed {crc:#010x}"
        )));
    }

    let offsets_end = entry_count
        .checked_mul(8)
        .and_then(|len| len.checked_add(offsets_start));
    if offsets_start < HEADER_LEN as u64
        || offsets_end != Some((bytes.len() - FOOTER_LEN) as u64)
    {
        return Err(GridShardError::corrupt("shard offsets table out of bounds"));
    }

    Ok(Layout {
        entry_count: entry_count as usize,
        offsets_start: offsets_start as usize,
    })
}

/// Decode entry `index` from a validated image.
pub fn entry<'a>(bytes: &'a [u8], layout: &Layout, index: usize) -> Result<(&'a [u8], &'a [u8])> {
    let slot = layout.offsets_start + index * 8;
    let mut pos = LittleEndian::read_u64(&bytes[slot..slot + 8]) as usize;
    if pos < HEADER_LEN || pos >= layout.offsets_start {
        return Err(GridShardError::corrupt(format!(
            "entry {index} offset {pos} out of bounds"
        )));
    }

    let key = take(bytes, &mut pos, layout.offsets_start)?;
    let value = take(bytes, &mut pos, layout.offsets_start)?;
    Ok((key, value))
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, limit: usize) -> Result<&'a [u8]> {
    let len = varint::get_u64(&bytes[..limit], pos)? as usize;
    let end = pos
        .checked_add(len)
        .filter(|&end| end <= limit)
        .ok_or_else(|| GridShardError::corrupt("shard entry overruns data section"))?;
    let slice = &bytes[*pos..end];
    *pos = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = TableWriter::new(Vec::new()).unwrap();
        for (k, v) in entries {
            writer.append(k.as_bytes(), v.as_bytes()).unwrap();
        }
        let (bytes, len) = writer.finish().unwrap();
        assert_eq!(bytes.len() as u64, len);
        bytes
    }

    #[test]
    fn test_write_and_validate() {
        let bytes = build(&[("apple", "1"), ("banana", "22")]);
        let layout = validate(&bytes).unwrap();
        assert_eq!(layout.entry_count, 2);

        let (key, value) = entry(&bytes, &layout, 1).unwrap();
        assert_eq!(key, b"banana");
        assert_eq!(value, b"22");
    }

    #[test]
    fn test_empty_table() {
        let bytes = build(&[]);
        assert_eq!(bytes.len(), HEADER_LEN + FOOTER_LEN);
        assert_eq!(validate(&bytes).unwrap().entry_count, 0);
    }

    #[test]
    fn test_detects_flipped_byte() {
        let mut bytes = build(&[("apple", "1")]);
        bytes[HEADER_LEN + 2] ^= 0xFF;
        assert!(matches!(
            validate(&bytes),
            Err(GridShardError::CorruptEncoding(_))
        ));
    }

    #[test]
    fn test_detects_truncation() {
        let bytes = build(&[("apple", "1"), ("banana", "2")]);
        assert!(validate(&bytes[..bytes.len() - 5]).is_err());
        assert!(validate(&bytes[..10]).is_err());
    }
}
