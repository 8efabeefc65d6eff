//! Bulk index building.
//!
//! An index is built in one generation:
//!
//! 1. **Spilling**: [`BulkBuilder::begin_indexing`] opens a build and
//!    [`BulkBuilder::store_terms`] appends records to per-shard spill files.
//! 2. **Sorting**: [`BulkBuilder::commit_indexing`] closes the spill files and
//!    sorts each one in parallel.
//! 3. **Merging**: every sorted file gets one forward pass
//!    ([`BulkBuilder::commit_indexing2`]) that assigns term ids, packs posting
//!    lists, writes fresh shards and uploads each shard as soon as the stream
//!    moves past it.
//!
//! A build running as a parallel task stops after sorting and hands its sorted
//! files back; [`BulkBuilder::commit_parallel`] later merges the files of all
//! tasks bucket by bucket.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::codec::{Occurrence, PostingCodec};
use crate::error::{GridShardError, Result};
use crate::grid::RemoteShardCollection;
use crate::shard::{LocalShardStore, ShardWriter};
use crate::shard_key::ShardKeyFunction;
use crate::sort::Sorter;
use crate::spill::{self, SpillWriter, TermRecord};

/// Where an index is in its build cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildPhase {
    Idle,
    Spilling,
    Sorting,
    Merging,
}

/// Settings of a [`BulkBuilder`].
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Store identifier, used in spill file names.
    pub store_id: String,
    /// Directory for spill and sorted files.
    pub temp_dir: PathBuf,
    /// Task name when this process is one of several parallel builders.
    pub task: Option<String>,
    /// Write buffer size of spill files.
    pub buffer_size: usize,
    /// Worker threads for sorting and merging.
    pub parallelism: usize,
}

/// Outcome of one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Terms written (term ids `1..=terms`).
    pub terms: u64,
    /// Shards created, in creation order.
    pub shards: Vec<String>,
}

/// Outcome of [`BulkBuilder::commit_indexing`].
#[derive(Debug, Clone, Default)]
pub struct CommitReport {
    /// Records refused while spilling.
    pub skipped_records: u64,
    /// Sorted files left for a later merge (task builds only).
    pub sorted_files: Vec<PathBuf>,
    /// Merge passes run by this commit.
    pub merges: Vec<MergeReport>,
}

impl CommitReport {
    pub fn total_terms(&self) -> u64 {
        self.merges.iter().map(|m| m.terms).sum()
    }

    pub fn shards(&self) -> Vec<&str> {
        self.merges
            .iter()
            .flat_map(|m| m.shards.iter().map(String::as_str))
            .collect()
    }
}

#[derive(Debug)]
struct IndexBuild {
    phase: BuildPhase,
    spill: Option<SpillWriter>,
}

/// The write path of a grid index store.
#[derive(Debug)]
pub struct BulkBuilder {
    options: BuildOptions,
    shard_key: Arc<dyn ShardKeyFunction>,
    codec: Arc<dyn PostingCodec>,
    local: LocalShardStore,
    remote: Arc<RemoteShardCollection>,
    sorter: Arc<dyn Sorter>,
    pool: ThreadPool,
    builds: Mutex<HashMap<String, IndexBuild>>,
}

impl BulkBuilder {
    pub fn new(
        options: BuildOptions,
        shard_key: Arc<dyn ShardKeyFunction>,
        codec: Arc<dyn PostingCodec>,
        local: LocalShardStore,
        remote: Arc<RemoteShardCollection>,
        sorter: Arc<dyn Sorter>,
    ) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.parallelism.max(1))
            .thread_name(|i| format!("gridshard-build-{i}"))
            .build()
            .map_err(|e| GridShardError::other(format!("Failed to create thread pool: {e}")))?;

        Ok(BulkBuilder {
            options,
            shard_key,
            codec,
            local,
            remote,
            sorter,
            pool,
            builds: Mutex::new(HashMap::new()),
        })
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Current phase of `index`.
    pub fn phase(&self, index: &str) -> BuildPhase {
        self.builds
            .lock()
            .get(index)
            .map_or(BuildPhase::Idle, |build| build.phase)
    }

    fn set_phase(&self, index: &str, phase: BuildPhase) {
        let mut builds = self.builds.lock();
        if phase == BuildPhase::Idle {
            builds.remove(index);
        } else if let Some(build) = builds.get_mut(index) {
            build.phase = phase;
        }
    }

    /// Open a build of `index`.
    pub fn begin_indexing(&self, index: &str) -> Result<()> {
        let mut builds = self.builds.lock();
        if let Some(build) = builds.get(index) {
            return Err(GridShardError::invalid_operation(format!(
                "index {index} is already {:?}",
                build.phase
            )));
        }

        self.local.ensure_index_dir(index)?;
        let writer = SpillWriter::new(
            &self.options.temp_dir,
            &self.options.store_id,
            index,
            self.options.task.as_deref(),
            self.options.buffer_size,
            Arc::clone(&self.shard_key),
        )?;
        builds.insert(
            index.to_string(),
            IndexBuild {
                phase: BuildPhase::Spilling,
                spill: Some(writer),
            },
        );
        info!("began indexing {index}");
        Ok(())
    }

    /// Spill records of one document. Returns how many were accepted.
    pub fn store_terms(&self, index: &str, records: &[TermRecord]) -> Result<u64> {
        let mut builds = self.builds.lock();
        let writer = builds
            .get_mut(index)
            .and_then(|build| build.spill.as_mut())
            .ok_or_else(|| {
                GridShardError::invalid_operation(format!("index {index} is not being built"))
            })?;

        let mut accepted = 0;
        for record in records {
            if writer.append(record)? {
                accepted += 1;
            }
        }
        Ok(accepted)
    }

    /// Close the spill files of `index`, sort them and, unless this is a task
    /// build, merge each sorted file into shards.
    pub fn commit_indexing(&self, index: &str) -> Result<CommitReport> {
        let writer = {
            let mut builds = self.builds.lock();
            let build = builds
                .get_mut(index)
                .filter(|build| build.phase == BuildPhase::Spilling)
                .ok_or_else(|| {
                    GridShardError::invalid_operation(format!("index {index} is not being built"))
                })?;
            build.phase = BuildPhase::Sorting;
            build.spill.take()
        };
        let Some(writer) = writer else {
            self.set_phase(index, BuildPhase::Idle);
            return Err(GridShardError::invalid_operation(format!(
                "index {index} has no spill files"
            )));
        };

        let result = self.sort_and_merge(index, writer);
        self.set_phase(index, BuildPhase::Idle);
        result
    }

    fn sort_and_merge(&self, index: &str, writer: SpillWriter) -> Result<CommitReport> {
        let skipped_records = writer.skipped();
        let spills = writer.finish()?;
        debug!("index {index}: sorting {} spill files", spills.len());

        let sorted = self.pool.install(|| {
            spills
                .par_iter()
                .map(|spill| {
                    let name = spill::sorted_file_name(
                        &self.options.store_id,
                        index,
                        &spill.bucket,
                        self.options.task.as_deref(),
                    );
                    let target = self.options.temp_dir.join(name);
                    self.sorter.sort(&spill.path, &target)?;
                    std::fs::remove_file(&spill.path)?;
                    Ok(target)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        if self.options.task.is_some() {
            info!(
                "index {index}: task build sorted {} files, merge deferred",
                sorted.len()
            );
            return Ok(CommitReport {
                skipped_records,
                sorted_files: sorted,
                merges: Vec::new(),
            });
        }

        self.set_phase(index, BuildPhase::Merging);
        let merges = self.merge_all(index, &sorted)?;
        Ok(CommitReport {
            skipped_records,
            sorted_files: Vec::new(),
            merges,
        })
    }

    /// Merge sorted files in parallel. Each file must feed distinct shards.
    fn merge_all(&self, index: &str, sorted: &[PathBuf]) -> Result<Vec<MergeReport>> {
        let outcomes: Vec<Result<MergeReport>> = self.pool.install(|| {
            sorted
                .par_iter()
                .map(|file| self.commit_indexing2(index, file))
                .collect()
        });

        // Every pass runs to completion so that all shards exist locally even
        // when some uploads failed; the first error is reported.
        let mut merges = Vec::with_capacity(outcomes.len());
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(report) => merges.push(report),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(merges),
        }
    }

    /// One forward merge pass over a sorted spill file.
    ///
    /// The file is deleted once every shard it feeds has been written. If an
    /// upload fails the pass still writes all remaining shards locally, then
    /// returns the upload error; [`resume_uploads`](Self::resume_uploads)
    /// publishes the stragglers later.
    pub fn commit_indexing2(&self, index: &str, sorted: &Path) -> Result<MergeReport> {
        let mut pass = MergePass::new(self, index);
        let mut reader = BufReader::new(File::open(sorted)?);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            if buf.last() == Some(&b'\n') {
                buf.pop();
            }
            if buf.is_empty() {
                continue;
            }
            let line = std::str::from_utf8(&buf).map_err(|_| {
                GridShardError::corrupt(format!("non UTF-8 line in {}", sorted.display()))
            })?;
            let (term, occurrence) = spill::decode_line(line)?;
            pass.push(term, occurrence)?;
        }

        let report = pass.finish()?;
        std::fs::remove_file(sorted)?;
        info!(
            "index {index}: merged {} ({} terms, shards {:?})",
            sorted.display(),
            report.terms,
            report.shards
        );
        Ok(report)
    }

    /// Merge the sorted files of several task builds.
    ///
    /// Files are grouped by bucket; each group is merged into one sorted file
    /// and loaded. Groups run concurrently since they feed disjoint shards.
    pub fn commit_parallel(&self, index: &str, sorted_files: &[PathBuf]) -> Result<Vec<MergeReport>> {
        let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for path in sorted_files {
            let bucket = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| spill::bucket_of_sorted_file(&self.options.store_id, index, name))
                .ok_or_else(|| {
                    GridShardError::invalid_argument(format!(
                        "{} is not a sorted file of index {index}",
                        path.display()
                    ))
                })?;
            groups.entry(bucket.to_string()).or_default().push(path.clone());
        }

        let merged = self.pool.install(|| {
            groups
                .par_iter()
                .map(|(bucket, runs)| {
                    let target = self.options.temp_dir.join(spill::sorted_file_name(
                        &self.options.store_id,
                        index,
                        bucket,
                        None,
                    ));
                    if runs.len() == 1 && runs[0] == target {
                        return Ok(target);
                    }
                    self.sorter.merge(runs, &target)?;
                    for run in runs {
                        if *run != target {
                            std::fs::remove_file(run)?;
                        }
                    }
                    Ok(target)
                })
                .collect::<Result<Vec<_>>>()
        })?;

        info!("index {index}: merging {} buckets from parallel tasks", merged.len());
        self.merge_all(index, &merged)
    }

    /// Upload every local shard of `index` the grid lacks or holds with a
    /// different length. Returns the shard ids uploaded.
    pub fn resume_uploads(&self, index: &str) -> Result<Vec<String>> {
        let mut uploaded = Vec::new();
        for shard_id in self.local.list_shards(index)? {
            let path = self.local.shard_path(index, &shard_id);
            let local_len = std::fs::metadata(&path)?.len();
            if self.remote.remote_len(index, &shard_id)? == Some(local_len) {
                continue;
            }
            self.remote.upload(index, &shard_id, &path)?;
            uploaded.push(shard_id);
        }
        info!("index {index}: resumed {} uploads", uploaded.len());
        Ok(uploaded)
    }
}

/// State of one forward merge pass.
struct MergePass<'a> {
    builder: &'a BulkBuilder,
    index: &'a str,
    prefix_len: Option<usize>,
    term_id: u64,
    current_prefix: Option<String>,
    current: Option<(String, ShardWriter)>,
    created: HashSet<String>,
    pending: Option<(String, Vec<Occurrence>)>,
    report: MergeReport,
    upload_error: Option<GridShardError>,
}

impl<'a> MergePass<'a> {
    fn new(builder: &'a BulkBuilder, index: &'a str) -> Self {
        MergePass {
            builder,
            index,
            prefix_len: builder.shard_key.routing_prefix_len(),
            term_id: 0,
            current_prefix: None,
            current: None,
            created: HashSet::new(),
            pending: None,
            report: MergeReport::default(),
            upload_error: None,
        }
    }

    fn push(&mut self, term: &str, occurrence: Occurrence) -> Result<()> {
        if let Some((pending_term, occurrences)) = &mut self.pending {
            match term.cmp(pending_term.as_str()) {
                std::cmp::Ordering::Equal => {
                    occurrences.push(occurrence);
                    return Ok(());
                }
                std::cmp::Ordering::Less => {
                    return Err(GridShardError::unsorted(format!(
                        "term {term:?} follows {pending_term:?}"
                    )));
                }
                std::cmp::Ordering::Greater => self.flush_pending()?,
            }
        }

        self.route(term)?;
        self.pending = Some((term.to_string(), vec![occurrence]));
        Ok(())
    }

    /// Make sure the shard `term` routes to is the open one.
    fn route(&mut self, term: &str) -> Result<()> {
        let prefix = routing_prefix(term, self.prefix_len);
        if self.current_prefix.as_deref() == Some(prefix) {
            return Ok(());
        }
        self.current_prefix = Some(prefix.to_string());

        let shard_id = self.builder.shard_key.shard_of(term);
        if matches!(&self.current, Some((open, _)) if *open == shard_id) {
            return Ok(());
        }

        self.close_current()?;
        if !self.created.insert(shard_id.clone()) {
            return Err(GridShardError::unsorted(format!(
                "term {term:?} returns to shard {shard_id} after it was closed"
            )));
        }

        let writer = self.builder.local.create(self.index, &shard_id)?;
        debug!("index {}: created shard {shard_id}", self.index);
        self.report.shards.push(shard_id.clone());
        self.current = Some((shard_id, writer));
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        let Some((term, occurrences)) = self.pending.take() else {
            return Ok(());
        };
        let occurrences = merge_occurrences(occurrences);
        if occurrences.is_empty() {
            return Ok(());
        }

        let Some((_, writer)) = self.current.as_mut() else {
            return Err(GridShardError::invalid_operation(format!(
                "no open shard for term {term:?}"
            )));
        };
        self.term_id += 1;
        let packed = self.builder.codec.serialize(self.term_id, &occurrences)?;
        writer.put(term.as_bytes(), &packed)?;
        self.report.terms += 1;
        Ok(())
    }

    /// Close and upload the open shard. Upload failures are remembered, not raised.
    fn close_current(&mut self) -> Result<()> {
        let Some((shard_id, writer)) = self.current.take() else {
            return Ok(());
        };
        let path = writer.path().to_path_buf();
        writer.close()?;

        if let Err(e) = self.builder.remote.upload(self.index, &shard_id, &path) {
            warn!(
                "index {}: shard {shard_id} kept locally, upload failed: {e}",
                self.index
            );
            self.upload_error.get_or_insert(e);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<MergeReport> {
        self.flush_pending()?;
        self.close_current()?;
        match self.upload_error.take() {
            Some(e) => Err(e),
            None => Ok(self.report),
        }
    }
}

/// The part of `term` that decides its shard.
fn routing_prefix(term: &str, len: Option<usize>) -> &str {
    match len.and_then(|n| term.char_indices().nth(n)) {
        Some((end, _)) => &term[..end],
        None => term,
    }
}

/// Order occurrences by record, fold duplicates of the same record and drop
/// records that end up with no occurrences.
fn merge_occurrences(mut occurrences: Vec<Occurrence>) -> Vec<Occurrence> {
    occurrences.sort_by_key(|o| (o.doc_id, o.store_id));
    let mut merged: Vec<Occurrence> = Vec::with_capacity(occurrences.len());
    for occ in occurrences {
        match merged.last_mut() {
            Some(last) if last.doc_id == occ.doc_id && last.store_id == occ.store_id => {
                last.count += occ.count;
                last.positions.extend(occ.positions);
            }
            _ => merged.push(occ),
        }
    }
    merged.retain(|o| o.count > 0);
    for occ in &mut merged {
        occ.positions.sort_unstable();
    }
    merged
}
