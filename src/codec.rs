//! Posting list model and packing.
//!
//! The store treats packed posting lists as opaque bytes. The codec that
//! produces and reads them belongs to the index that owns the data and is
//! handed to the store as an `Arc<dyn PostingCodec>`.
//!
//! [`PackedPostingCodec`] lays a posting list out as
//!
//! ```text
//! term_id u64 | total_records u64 | total_occurrences u64      <- summary
//! ( doc_id u64 | store_id u64 | count u64 | npos varint | pos varint* )*
//! ```
//!
//! with all fixed-width integers little-endian. The first 24 bytes form the
//! summary, which range scans can read without touching the rest of the value.

use std::fmt::Debug;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::error::{GridShardError, Result};
use crate::util::varint;

/// Number of fixed-width header fields in a packed posting list.
pub const SUMMARY_FIELDS: usize = 3;

/// Width of one fixed-width field.
pub const FIELD_WIDTH: usize = 8;

/// Occurrences of a term within one record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Occurrence {
    /// Record (document) identifier.
    pub doc_id: u64,
    /// Identifier of the record store holding the record.
    pub store_id: u64,
    /// Number of times the term occurs in the record.
    pub count: u64,
    /// Word positions, when the index keeps proximity data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<u32>,
}

impl Occurrence {
    pub fn new(doc_id: u64, store_id: u64, count: u64) -> Self {
        Occurrence {
            doc_id,
            store_id,
            count,
            positions: Vec::new(),
        }
    }

    pub fn with_positions(doc_id: u64, store_id: u64, positions: Vec<u32>) -> Self {
        Occurrence {
            doc_id,
            store_id,
            count: positions.len() as u64,
            positions,
        }
    }
}

/// Decoded posting list for one term.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PostingList {
    pub term_id: u64,
    pub total_records: u64,
    pub total_occurrences: u64,
    /// Empty when the list was decoded from a summary read.
    pub occurrences: Vec<Occurrence>,
}

impl PostingList {
    /// Build a posting list, deriving the totals from `occurrences`.
    pub fn new(term_id: u64, occurrences: Vec<Occurrence>) -> Self {
        PostingList {
            term_id,
            total_records: occurrences.len() as u64,
            total_occurrences: occurrences.iter().map(|o| o.count).sum(),
            occurrences,
        }
    }

    /// An empty list: the answer for an absent term.
    pub fn empty() -> Self {
        PostingList::default()
    }

    pub fn is_empty(&self) -> bool {
        self.total_records == 0 && self.occurrences.is_empty()
    }

    /// Whether only the summary header was decoded.
    pub fn is_summary(&self) -> bool {
        self.total_records > 0 && self.occurrences.is_empty()
    }
}

/// Serializes posting lists to and from bytes.
pub trait PostingCodec: Send + Sync + Debug {
    /// Pack the occurrences of one term.
    fn serialize(&self, term_id: u64, occurrences: &[Occurrence]) -> Result<Vec<u8>>;

    /// Unpack a full value.
    fn deserialize(&self, bytes: &[u8]) -> Result<PostingList>;

    /// Length of the fixed-width prefix read by summary scans.
    fn summary_len(&self) -> usize;

    /// Unpack a value truncated to at most [`summary_len`](Self::summary_len) bytes.
    fn deserialize_summary(&self, bytes: &[u8]) -> Result<PostingList>;
}

/// Default codec: fixed-width record triples with varint positions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackedPostingCodec;

impl PackedPostingCodec {
    pub fn new() -> Self {
        PackedPostingCodec
    }

    fn read_header(reader: &mut Cursor<&[u8]>) -> Result<(u64, u64, u64)> {
        let mut field = || {
            reader
                .read_u64::<LittleEndian>()
                .map_err(|_| GridShardError::corrupt("posting list header truncated"))
        };
        Ok((field()?, field()?, field()?))
    }
}

impl PostingCodec for PackedPostingCodec {
    fn serialize(&self, term_id: u64, occurrences: &[Occurrence]) -> Result<Vec<u8>> {
        let total_occurrences: u64 = occurrences.iter().map(|o| o.count).sum();
        let mut buf =
            Vec::with_capacity(SUMMARY_FIELDS * FIELD_WIDTH + occurrences.len() * 4 * FIELD_WIDTH);

        buf.write_u64::<LittleEndian>(term_id)?;
        buf.write_u64::<LittleEndian>(occurrences.len() as u64)?;
        buf.write_u64::<LittleEndian>(total_occurrences)?;

        for occ in occurrences {
            buf.write_u64::<LittleEndian>(occ.doc_id)?;
            buf.write_u64::<LittleEndian>(occ.store_id)?;
            buf.write_u64::<LittleEndian>(occ.count)?;
            varint::put_u64(&mut buf, occ.positions.len() as u64);
            for &pos in &occ.positions {
                varint::put_u64(&mut buf, pos as u64);
            }
        }

        Ok(buf)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<PostingList> {
        let mut reader = Cursor::new(bytes);
        let (term_id, total_records, total_occurrences) = Self::read_header(&mut reader)?;

        // Each record needs at least three fixed fields and a position count.
        let remaining = bytes.len() - reader.position() as usize;
        if total_records > (remaining / (SUMMARY_FIELDS * FIELD_WIDTH + 1)) as u64 {
            return Err(GridShardError::corrupt(format!(
                "posting list claims {total_records} records in {remaining} bytes"
            )));
        }

        let mut occurrences = Vec::with_capacity(total_records as usize);
        for _ in 0..total_records {
            let mut field = || {
                reader
                    .read_u64::<LittleEndian>()
                    .map_err(|_| GridShardError::corrupt("posting record truncated"))
            };
            let doc_id = field()?;
            let store_id = field()?;
            let count = field()?;

            let mut pos = reader.position() as usize;
            let npos = varint::get_u64(bytes, &mut pos)?;
            let mut positions = Vec::with_capacity(npos.min(1024) as usize);
            for _ in 0..npos {
                let value = varint::get_u64(bytes, &mut pos)?;
                let value = u32::try_from(value)
                    .map_err(|_| GridShardError::corrupt("position exceeds u32"))?;
                positions.push(value);
            }
            reader.set_position(pos as u64);

            occurrences.push(Occurrence {
                doc_id,
                store_id,
                count,
                positions,
            });
        }

        if reader.position() as usize != bytes.len() {
            return Err(GridShardError::corrupt(format!(
                "{} trailing bytes after posting list",
                bytes.len() - reader.position() as usize
            )));
        }

        Ok(PostingList {
            term_id,
            total_records,
            total_occurrences,
            occurrences,
        })
    }

    fn summary_len(&self) -> usize {
        SUMMARY_FIELDS * FIELD_WIDTH
    }

    fn deserialize_summary(&self, bytes: &[u8]) -> Result<PostingList> {
        let mut reader = Cursor::new(bytes);
        let (term_id, total_records, total_occurrences) = Self::read_header(&mut reader)?;
        Ok(PostingList {
            term_id,
            total_records,
            total_occurrences,
            occurrences: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Occurrence> {
        vec![
            Occurrence::new(1, 0, 2),
            Occurrence::with_positions(7, 1, vec![3, 19, 400]),
            Occurrence::new(1_000_000_000_000, 2, 1),
        ]
    }

    #[test]
    fn test_round_trip() {
        let codec = PackedPostingCodec::new();
        let bytes = codec.serialize(42, &sample()).unwrap();
        let decoded = codec.deserialize(&bytes).unwrap();

        assert_eq!(decoded, PostingList::new(42, sample()));
        assert_eq!(decoded.total_records, 3);
        assert_eq!(decoded.total_occurrences, 6);
    }

    #[test]
    fn test_summary_reads_header_only() {
        let codec = PackedPostingCodec::new();
        let bytes = codec.serialize(9, &sample()).unwrap();
        let summary = codec
            .deserialize_summary(&bytes[..codec.summary_len()])
            .unwrap();

        assert_eq!(summary.term_id, 9);
        assert_eq!(summary.total_records, 3);
        assert_eq!(summary.total_occurrences, 6);
        assert!(summary.occurrences.is_empty());
        assert!(summary.is_summary());
    }

    #[test]
    fn test_truncated_value_is_corrupt() {
        let codec = PackedPostingCodec::new();
        let bytes = codec.serialize(1, &sample()).unwrap();

        let err = codec.deserialize(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, GridShardError::CorruptEncoding(_)));

        let err = codec.deserialize(&bytes[..10]).unwrap_err();
        assert!(matches!(err, GridShardError::CorruptEncoding(_)));
    }

    #[test]
    fn test_trailing_bytes_are_corrupt() {
        let codec = PackedPostingCodec::new();
        let mut bytes = codec.serialize(1, &sample()).unwrap();
        bytes.push(0);
        assert!(codec.deserialize(&bytes).is_err());
    }

    #[test]
    fn test_empty_list() {
        let codec = PackedPostingCodec::new();
        let bytes = codec.serialize(5, &[]).unwrap();
        assert_eq!(bytes.len(), codec.summary_len());

        let decoded = codec.deserialize(&bytes).unwrap();
        assert_eq!(decoded.term_id, 5);
        assert!(decoded.is_empty());
    }
}
