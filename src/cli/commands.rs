//! Command implementations for the gridshard CLI.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use log::{debug, warn};

use crate::cli::args::*;
use crate::cli::output::*;
use crate::error::{GridShardError, Result};
use crate::spill::TermRecord;
use crate::store::GridIndexStore;

/// Execute a CLI command.
pub fn execute_command(args: GridShardArgs) -> Result<()> {
    let store = GridIndexStore::open(args.store_config()?)?;

    match &args.command {
        Command::Build(build_args) => build_index(&store, build_args, &args),
        Command::LoadParallel(load_args) => load_parallel(&store, load_args, &args),
        Command::Terms(terms_args) => list_terms(&store, terms_args, &args),
        Command::Term(term_args) => show_term(&store, term_args, &args),
        Command::ResumeUploads(index_args) => resume_uploads(&store, index_args, &args),
        Command::Clean(index_args) => clean_index(&store, index_args, &args),
    }
}

/// Build an index from a JSON-lines records file.
fn build_index(store: &GridIndexStore, args: &BuildArgs, cli_args: &GridShardArgs) -> Result<()> {
    if args.batch_size == 0 {
        return Err(GridShardError::invalid_argument("batch size must be positive"));
    }
    if cli_args.verbosity() > 1 {
        println!("Building index {} from {}", args.index, args.records.display());
    }

    let start = Instant::now();
    let lines = read_lines(&args.records)?;
    store.create_index(&args.index)?;
    store.begin_indexing(&args.index)?;

    let mut records_read = 0u64;
    let mut records_skipped = 0u64;
    let mut batch = Vec::with_capacity(args.batch_size);

    for (line_no, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TermRecord>(&line) {
            Ok(record) => batch.push(record),
            Err(e) => {
                warn!("{}:{}: skipping record: {e}", args.records.display(), line_no + 1);
                records_skipped += 1;
                continue;
            }
        }
        records_read += 1;

        if batch.len() >= args.batch_size {
            store.store_terms(&args.index, &batch)?;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        store.store_terms(&args.index, &batch)?;
    }

    let report = store.commit_indexing(&args.index)?;
    debug!("commit report: {report:?}");

    output_result(
        "Index built",
        &BuildResult {
            index: args.index.clone(),
            records_read,
            records_skipped: records_skipped + report.skipped_records,
            terms: report.total_terms(),
            shards: report.shards().into_iter().map(str::to_string).collect(),
            sorted_files: report
                .sorted_files
                .iter()
                .map(|p| p.to_string_lossy().to_string())
                .collect(),
            duration_ms: start.elapsed().as_millis() as u64,
        },
        cli_args,
    )
}

/// Merge the sorted files of task builds.
fn load_parallel(
    store: &GridIndexStore,
    args: &LoadParallelArgs,
    cli_args: &GridShardArgs,
) -> Result<()> {
    let start = Instant::now();
    store.create_index(&args.index)?;
    let reports = store.commit_parallel(&args.index, &args.sorted_files)?;

    let mut shards: Vec<String> = reports
        .iter()
        .flat_map(|r| r.shards.iter().cloned())
        .collect();
    shards.sort();
    shards.dedup();

    output_result(
        "Task output merged",
        &LoadResult {
            index: args.index.clone(),
            terms: reports.iter().map(|r| r.terms).sum(),
            shards,
            duration_ms: start.elapsed().as_millis() as u64,
        },
        cli_args,
    )
}

fn list_terms(store: &GridIndexStore, args: &TermsArgs, cli_args: &GridShardArgs) -> Result<()> {
    let request = args.request();
    let (relation, _) = request.resolve(store.config().default_num_requested);
    let terms = store.fetch_term_list(&args.index, &request)?;

    output_result(
        &format!("Terms {relation} {:?}", args.term),
        &TermListResult {
            index: args.index.clone(),
            relation: format!("{relation} {}", args.term),
            terms: terms
                .into_iter()
                .map(|(term, postings)| TermRow { term, postings })
                .collect(),
        },
        cli_args,
    )
}

fn show_term(store: &GridIndexStore, args: &TermArgs, cli_args: &GridShardArgs) -> Result<()> {
    let postings = store.fetch_term(&args.index, &args.term)?;

    output_result(
        &format!("Posting list of {:?}", args.term),
        &TermResult {
            index: args.index.clone(),
            term: args.term.clone(),
            found: !postings.is_empty(),
            postings,
        },
        cli_args,
    )
}

fn resume_uploads(store: &GridIndexStore, args: &IndexArgs, cli_args: &GridShardArgs) -> Result<()> {
    let shards = store.resume_uploads(&args.index)?;

    output_result(
        "Pending uploads resumed",
        &MaintenanceResult {
            index: args.index.clone(),
            action: "Uploaded".to_string(),
            shards,
        },
        cli_args,
    )
}

fn clean_index(store: &GridIndexStore, args: &IndexArgs, cli_args: &GridShardArgs) -> Result<()> {
    let shards = store.remote().list_shards(&args.index)?;
    store.clean_index(&args.index)?;

    output_result(
        "Index cleaned",
        &MaintenanceResult {
            index: args.index.clone(),
            action: "Removed".to_string(),
            shards,
        },
        cli_args,
    )
}

fn read_lines(path: &Path) -> Result<std::io::Lines<BufReader<File>>> {
    let file = File::open(path).map_err(|e| {
        GridShardError::not_found(format!("cannot open {}: {e}", path.display()))
    })?;
    Ok(BufReader::new(file).lines())
}
