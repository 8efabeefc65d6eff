//! Per-shard spill files written while indexing.
//!
//! Each [`TermRecord`] becomes one text line in the spill file of the shard its
//! term routes to:
//!
//! ```text
//! term \t doc_id \t store_id \t count \t pos,pos,...
//! ```
//!
//! Terms holding control characters are refused, so every term byte sorts
//! above the tab delimiter and a plain byte-wise line sort orders the file by
//! term.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::AHashMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::codec::Occurrence;
use crate::error::{GridShardError, Result};
use crate::shard_key::ShardKeyFunction;

const FIELD_SEPARATOR: char = '\t';
const POSITION_SEPARATOR: char = ',';
const TEMP_SUFFIX: &str = "TEMP";
const SORT_SUFFIX: &str = "SORT";

/// One occurrence record produced by the text pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermRecord {
    pub term: String,
    pub doc_id: u64,
    pub store_id: u64,
    pub count: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub positions: Vec<u32>,
}

impl TermRecord {
    pub fn new<S: Into<String>>(term: S, doc_id: u64, store_id: u64, count: u64) -> Self {
        TermRecord {
            term: term.into(),
            doc_id,
            store_id,
            count,
            positions: Vec::new(),
        }
    }

    /// A record whose count is the number of positions.
    pub fn with_positions<S: Into<String>>(
        term: S,
        doc_id: u64,
        store_id: u64,
        positions: Vec<u32>,
    ) -> Self {
        TermRecord {
            term: term.into(),
            doc_id,
            store_id,
            count: positions.len() as u64,
            positions,
        }
    }
}

/// Whether `term` can be written to a spill file.
pub fn is_spillable(term: &str) -> bool {
    !term.is_empty() && !term.bytes().any(|b| b < 0x20 || b == 0x7f)
}

/// Append the spill line for `record`, newline included.
pub fn encode_line(record: &TermRecord, out: &mut String) {
    use std::fmt::Write as _;

    out.push_str(&record.term);
    let _ = write!(
        out,
        "{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}{}{FIELD_SEPARATOR}",
        record.doc_id, record.store_id, record.count
    );
    for (i, pos) in record.positions.iter().enumerate() {
        if i > 0 {
            out.push(POSITION_SEPARATOR);
        }
        let _ = write!(out, "{pos}");
    }
    out.push('\n');
}

/// Split a spill line (without its newline) into term and occurrence.
pub fn decode_line(line: &str) -> Result<(&str, Occurrence)> {
    let mut fields = line.split(FIELD_SEPARATOR);
    let malformed = || GridShardError::corrupt(format!("malformed spill line {line:?}"));

    let term = fields.next().ok_or_else(malformed)?;
    let mut number = || -> Result<u64> {
        fields
            .next()
            .ok_or_else(malformed)?
            .parse()
            .map_err(|_| malformed())
    };
    let doc_id = number()?;
    let store_id = number()?;
    let count = number()?;

    let positions = match fields.next() {
        None | Some("") => Vec::new(),
        Some(list) => list
            .split(POSITION_SEPARATOR)
            .map(|p| p.parse::<u32>().map_err(|_| malformed()))
            .collect::<Result<Vec<_>>>()?,
    };
    if fields.next().is_some() {
        return Err(malformed());
    }

    Ok((
        term,
        Occurrence {
            doc_id,
            store_id,
            count,
            positions,
        },
    ))
}

fn spill_stem(store_id: &str, index: &str, bucket: &str, task: Option<&str>) -> String {
    match task {
        Some(task) => format!("{store_id}_{index}_{bucket}_{task}"),
        None => format!("{store_id}_{index}_{bucket}"),
    }
}

/// `<store>_<index>_<bucket>[_<task>]_TEMP`
pub fn temp_file_name(store_id: &str, index: &str, bucket: &str, task: Option<&str>) -> String {
    format!("{}_{TEMP_SUFFIX}", spill_stem(store_id, index, bucket, task))
}

/// `<store>_<index>_<bucket>[_<task>]_SORT`
pub fn sorted_file_name(store_id: &str, index: &str, bucket: &str, task: Option<&str>) -> String {
    format!("{}_{SORT_SUFFIX}", spill_stem(store_id, index, bucket, task))
}

/// Bucket named by a sorted file of `store_id`/`index`, if it is one.
///
/// Bucket ids never contain `_`, so the first `_` after the prefix starts the
/// task name.
pub fn bucket_of_sorted_file<'a>(store_id: &str, index: &str, file_name: &'a str) -> Option<&'a str> {
    let rest = file_name
        .strip_prefix(store_id)?
        .strip_prefix('_')?
        .strip_prefix(index)?
        .strip_prefix('_')?
        .strip_suffix(SORT_SUFFIX)?
        .strip_suffix('_')?;
    let bucket = rest.split_once('_').map_or(rest, |(bucket, _)| bucket);
    (!bucket.is_empty()).then_some(bucket)
}

/// A closed spill file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpillFile {
    pub bucket: String,
    pub path: PathBuf,
    pub lines: u64,
}

#[derive(Debug)]
struct OpenSpill {
    path: PathBuf,
    out: BufWriter<File>,
    lines: u64,
}

/// Routes records to per-shard spill files, opened on first use.
#[derive(Debug)]
pub struct SpillWriter {
    dir: PathBuf,
    store_id: String,
    index: String,
    task: Option<String>,
    buffer_size: usize,
    shard_key: Arc<dyn ShardKeyFunction>,
    files: AHashMap<String, OpenSpill>,
    line: String,
    written: u64,
    skipped: u64,
}

impl SpillWriter {
    pub fn new(
        dir: &Path,
        store_id: &str,
        index: &str,
        task: Option<&str>,
        buffer_size: usize,
        shard_key: Arc<dyn ShardKeyFunction>,
    ) -> Result<Self> {
        if dir.exists() && !dir.is_dir() {
            return Err(GridShardError::config(format!(
                "temp path {} is not a directory",
                dir.display()
            )));
        }
        std::fs::create_dir_all(dir).map_err(|e| {
            GridShardError::config(format!("cannot create temp path {}: {e}", dir.display()))
        })?;

        Ok(SpillWriter {
            dir: dir.to_path_buf(),
            store_id: store_id.to_string(),
            index: index.to_string(),
            task: task.map(str::to_string),
            buffer_size,
            shard_key,
            files: AHashMap::new(),
            line: String::new(),
            written: 0,
            skipped: 0,
        })
    }

    /// Spill one record. Returns `false` if the record was skipped.
    pub fn append(&mut self, record: &TermRecord) -> Result<bool> {
        if !is_spillable(&record.term) {
            if !record.term.is_empty() {
                warn!(
                    "skipping term {:?} of document {}: control characters are not indexable",
                    record.term, record.doc_id
                );
            }
            self.skipped += 1;
            return Ok(false);
        }

        let bucket = self.shard_key.shard_of(&record.term);
        if !self.files.contains_key(&bucket) {
            let name = temp_file_name(&self.store_id, &self.index, &bucket, self.task.as_deref());
            let path = self.dir.join(name);
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            debug!("opened spill file {}", path.display());
            self.files.insert(
                bucket.clone(),
                OpenSpill {
                    path,
                    out: BufWriter::with_capacity(self.buffer_size, file),
                    lines: 0,
                },
            );
        }

        self.line.clear();
        encode_line(record, &mut self.line);
        if let Some(spill) = self.files.get_mut(&bucket) {
            spill.out.write_all(self.line.as_bytes())?;
            spill.lines += 1;
        }
        self.written += 1;
        Ok(true)
    }

    /// Records spilled so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Records refused so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Flush and close every spill file, in bucket order.
    pub fn finish(self) -> Result<Vec<SpillFile>> {
        let mut spills = Vec::with_capacity(self.files.len());
        for (bucket, spill) in self.files {
            let file = spill
                .out
                .into_inner()
                .map_err(|e| GridShardError::Io(e.into_error()))?;
            file.sync_all()?;
            spills.push(SpillFile {
                bucket,
                path: spill.path,
                lines: spill.lines,
            });
        }
        spills.sort_by(|a, b| a.bucket.cmp(&b.bucket));
        if self.skipped > 0 {
            warn!(
                "index {}: {} records skipped while spilling",
                self.index, self.skipped
            );
        }
        Ok(spills)
    }
}
