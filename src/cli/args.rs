//! Command line argument parsing for the gridshard CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::config::IndexStoreConfig;
use crate::error::Result;
use crate::query::{Relation, TermListRequest};

/// gridshard - chunked, grid-backed inverted index store
#[derive(Parser, Debug, Clone)]
#[command(name = "gridshard")]
#[command(about = "Build and query chunked inverted indexes stored on a grid")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct GridShardArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Store configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE", env = "GRIDSHARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Local shard cache directory (overrides the configuration)
    #[arg(long, value_name = "PATH", env = "GRIDSHARD_PATH")]
    pub path: Option<PathBuf>,

    /// Grid endpoint URL, e.g. file:///mnt/grid (overrides the configuration)
    #[arg(long, value_name = "URL", env = "GRIDSHARD_GRID")]
    pub grid: Option<String>,

    /// Store identifier (overrides the configuration)
    #[arg(long, value_name = "ID")]
    pub store_id: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl GridShardArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }

    /// The store configuration: the config file if given, then command line overrides.
    pub fn store_config(&self) -> Result<IndexStoreConfig> {
        let mut config = match &self.config {
            Some(path) => IndexStoreConfig::from_file(path)?,
            None => IndexStoreConfig::default(),
        };
        if let Some(path) = &self.path {
            config.default_path = path.clone();
        }
        if let Some(grid) = &self.grid {
            config.grid_endpoint = Some(grid.clone());
        }
        if let Some(store_id) = &self.store_id {
            config.store_id = store_id.clone();
        }
        if let Command::Build(build) = &self.command {
            if build.task.is_some() {
                config.task = build.task.clone();
            }
            if build.sort_path.is_some() {
                config.sort_path = build.sort_path.clone();
            }
        }
        Ok(config)
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build an index from a JSON-lines file of term records
    Build(BuildArgs),

    /// Merge the sorted files of parallel task builds into shards
    #[command(name = "load-parallel")]
    LoadParallel(LoadParallelArgs),

    /// List terms around a given term
    Terms(TermsArgs),

    /// Show the posting list of one term
    Term(TermArgs),

    /// Upload local shards the grid is missing
    #[command(name = "resume-uploads")]
    ResumeUploads(IndexArgs),

    /// Delete every shard of an index, locally and on the grid
    Clean(IndexArgs),
}

/// Arguments for building an index
#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// Records file, one JSON term record per line
    #[arg(value_name = "RECORDS_FILE")]
    pub records: PathBuf,

    /// Records handed to the store per call
    #[arg(short, long, default_value = "1000")]
    pub batch_size: usize,

    /// Run as a parallel task: sort only, merge later with load-parallel
    #[arg(long, value_name = "TASK")]
    pub task: Option<String>,

    /// External sort executable
    #[arg(long, value_name = "PATH")]
    pub sort_path: Option<PathBuf>,
}

/// Arguments for merging task output
#[derive(Parser, Debug, Clone)]
pub struct LoadParallelArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// Sorted files produced by task builds
    #[arg(value_name = "SORTED_FILE", required = true)]
    pub sorted_files: Vec<PathBuf>,
}

/// Arguments for a term-list lookup
#[derive(Parser, Debug, Clone)]
pub struct TermsArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// Term to start from
    #[arg(value_name = "TERM")]
    pub term: String,

    /// Relation to the term: <, <=, > or >=
    #[arg(short, long, value_parser = parse_relation)]
    pub relation: Option<Relation>,

    /// Maximum number of terms (0 = unbounded)
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Stop before this term
    #[arg(short, long, value_name = "TERM")]
    pub end: Option<String>,

    /// Only read posting list summaries
    #[arg(short, long)]
    pub summary: bool,
}

impl TermsArgs {
    pub fn request(&self) -> TermListRequest {
        TermListRequest {
            term: self.term.clone(),
            relation: self.relation,
            num_requested: self.limit,
            end_term: self.end.clone(),
            summary_only: self.summary,
        }
    }
}

fn parse_relation(s: &str) -> std::result::Result<Relation, String> {
    s.parse().map_err(|e: crate::error::GridShardError| e.to_string())
}

/// Arguments for a single-term lookup
#[derive(Parser, Debug, Clone)]
pub struct TermArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,

    /// Term to look up
    #[arg(value_name = "TERM")]
    pub term: String,
}

/// Arguments naming an index
#[derive(Parser, Debug, Clone)]
pub struct IndexArgs {
    /// Index name
    #[arg(value_name = "INDEX")]
    pub index: String,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
