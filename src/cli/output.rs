//! Output formatting for CLI commands.

use serde::{Deserialize, Serialize};

use crate::cli::args::{GridShardArgs, OutputFormat};
use crate::codec::PostingList;
use crate::error::Result;

/// Result structure for a build.
#[derive(Debug, Serialize, Deserialize)]
pub struct BuildResult {
    pub index: String,
    pub records_read: u64,
    pub records_skipped: u64,
    pub terms: u64,
    pub shards: Vec<String>,
    /// Sorted files awaiting `load-parallel` (task builds).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sorted_files: Vec<String>,
    pub duration_ms: u64,
}

/// Result structure for merging task output.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoadResult {
    pub index: String,
    pub terms: u64,
    pub shards: Vec<String>,
    pub duration_ms: u64,
}

/// One row of a term listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct TermRow {
    pub term: String,
    #[serde(flatten)]
    pub postings: PostingList,
}

/// Result structure for a term-list lookup.
#[derive(Debug, Serialize, Deserialize)]
pub struct TermListResult {
    pub index: String,
    pub relation: String,
    pub terms: Vec<TermRow>,
}

/// Result structure for a single-term lookup.
#[derive(Debug, Serialize, Deserialize)]
pub struct TermResult {
    pub index: String,
    pub term: String,
    pub found: bool,
    #[serde(flatten)]
    pub postings: PostingList,
}

/// Result structure for index maintenance commands.
#[derive(Debug, Serialize, Deserialize)]
pub struct MaintenanceResult {
    pub index: String,
    pub action: String,
    pub shards: Vec<String>,
}

/// Anything the CLI prints.
pub trait Report: Serialize {
    /// Print in human-readable form.
    fn print_human(&self);
}

impl Report for BuildResult {
    fn print_human(&self) {
        println!("Index: {}", self.index);
        println!(
            "Records: {} read, {} skipped",
            self.records_read, self.records_skipped
        );
        if self.sorted_files.is_empty() {
            println!("Terms: {}", self.terms);
            println!("Shards: {}", format_list(&self.shards));
        } else {
            println!("Sorted files (merge with load-parallel):");
            for file in &self.sorted_files {
                println!("  {file}");
            }
        }
        println!("Duration: {} ms", self.duration_ms);
    }
}

impl Report for LoadResult {
    fn print_human(&self) {
        println!("Index: {}", self.index);
        println!("Terms: {}", self.terms);
        println!("Shards: {}", format_list(&self.shards));
        println!("Duration: {} ms", self.duration_ms);
    }
}

impl Report for TermListResult {
    fn print_human(&self) {
        if self.terms.is_empty() {
            println!("No terms {} in {}", self.relation, self.index);
            return;
        }
        let width = self
            .terms
            .iter()
            .map(|row| row.term.chars().count())
            .max()
            .unwrap_or(0);
        for row in &self.terms {
            println!(
                "{:<width$}  id={:<8} records={:<8} occurrences={}",
                row.term,
                row.postings.term_id,
                row.postings.total_records,
                row.postings.total_occurrences
            );
        }
    }
}

impl Report for TermResult {
    fn print_human(&self) {
        if !self.found {
            println!("{}: not indexed in {}", self.term, self.index);
            return;
        }
        println!(
            "{} (id {}): {} records, {} occurrences",
            self.term,
            self.postings.term_id,
            self.postings.total_records,
            self.postings.total_occurrences
        );
        for occ in &self.postings.occurrences {
            if occ.positions.is_empty() {
                println!("  doc {} store {}: {}", occ.doc_id, occ.store_id, occ.count);
            } else {
                println!(
                    "  doc {} store {}: {} at {:?}",
                    occ.doc_id, occ.store_id, occ.count, occ.positions
                );
            }
        }
    }
}

impl Report for MaintenanceResult {
    fn print_human(&self) {
        println!("{} {}: {}", self.action, self.index, format_list(&self.shards));
    }
}

fn format_list(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

/// Output a result in the specified format.
pub fn output_result<T: Report>(message: &str, result: &T, args: &GridShardArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => {
            if args.verbosity() > 1 {
                println!("{message}");
                println!();
            }
            result.print_human();
            Ok(())
        }
        OutputFormat::Json => output_json(result, args),
    }
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &GridShardArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}
