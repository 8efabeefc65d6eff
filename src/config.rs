//! Configuration of a grid index store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::build::BuildOptions;
use crate::error::{GridShardError, Result};
use crate::grid::GridEndpoint;
use crate::shard::{ShardOptions, validate_name};
use crate::shard_key::{LeadingCharShardKey, LeadingPairShardKey, ShardKeyFunction};

/// Routing scheme from terms to shards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardKeyKind {
    /// One shard per leading character.
    #[default]
    LeadingChar,
    /// One shard per leading pair of alphanumerics.
    LeadingPair,
}

impl ShardKeyKind {
    pub fn build(self) -> Arc<dyn ShardKeyFunction> {
        match self {
            ShardKeyKind::LeadingChar => Arc::new(LeadingCharShardKey::new()),
            ShardKeyKind::LeadingPair => Arc::new(LeadingPairShardKey::new()),
        }
    }
}

/// Configuration for a grid index store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexStoreConfig {
    /// Store identifier. Names the grid collection and the spill files.
    pub store_id: String,

    /// Optional database the store belongs to; adds a level to the grid collection.
    pub database: Option<String>,

    /// Local shard cache root.
    pub default_path: PathBuf,

    /// Spill and sort directory. Relative paths are resolved against `default_path`.
    pub temp_path: PathBuf,

    /// External `sort` executable. If None, sorting runs in process.
    pub sort_path: Option<PathBuf>,

    /// Grid endpoint URL (`file:///path` or `memory://name`).
    pub grid_endpoint: Option<String>,

    /// Memory-map shard files for reading.
    pub use_mmap: bool,

    /// Task name when several processes build one index in parallel.
    pub task: Option<String>,

    /// Worker threads for sorting and merging.
    pub parallelism: usize,

    /// Result count of a term-list lookup that sets no count, relation or end.
    pub default_num_requested: usize,

    /// Lines held in memory per run by the in-process sorter.
    pub sort_run_lines: usize,

    /// I/O buffer size in bytes.
    pub buffer_size: usize,

    /// Term-to-shard routing scheme.
    pub shard_key: ShardKeyKind,
}

impl Default for IndexStoreConfig {
    fn default() -> Self {
        IndexStoreConfig {
            store_id: "gridshard".to_string(),
            database: None,
            default_path: PathBuf::from("./gridshard-data"),
            temp_path: PathBuf::from("temp"),
            sort_path: None,
            grid_endpoint: None,
            use_mmap: true,
            task: None,
            parallelism: num_cpus::get(),
            default_num_requested: 20,
            sort_run_lines: 1_000_000,
            buffer_size: 64 * 1024,
            shard_key: ShardKeyKind::default(),
        }
    }
}

impl IndexStoreConfig {
    /// A configuration rooted at `default_path` talking to `grid_endpoint`.
    pub fn new<P: AsRef<Path>>(default_path: P, grid_endpoint: &str) -> Self {
        IndexStoreConfig {
            default_path: default_path.as_ref().to_path_buf(),
            grid_endpoint: Some(grid_endpoint.to_string()),
            ..Default::default()
        }
    }

    /// Load a JSON configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            GridShardError::config(format!("cannot read {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Check the configuration for missing or contradictory settings.
    pub fn validate(&self) -> Result<()> {
        validate_name("store", &self.store_id)
            .map_err(|_| GridShardError::config(format!("invalid store id {:?}", self.store_id)))?;
        if let Some(db) = &self.database {
            validate_name("database", db)
                .map_err(|_| GridShardError::config(format!("invalid database {db:?}")))?;
        }
        if let Some(task) = &self.task {
            validate_name("task", task)
                .map_err(|_| GridShardError::config(format!("invalid task name {task:?}")))?;
        }
        self.endpoint()?;

        if self.parallelism == 0 {
            return Err(GridShardError::config("parallelism must be at least 1"));
        }
        if self.default_num_requested == 0 {
            return Err(GridShardError::config(
                "default_num_requested must be at least 1",
            ));
        }
        if self.sort_run_lines == 0 || self.buffer_size == 0 {
            return Err(GridShardError::config(
                "sort_run_lines and buffer_size must be positive",
            ));
        }
        Ok(())
    }

    /// The parsed grid endpoint.
    pub fn endpoint(&self) -> Result<GridEndpoint> {
        match self.grid_endpoint.as_deref() {
            Some(url) if !url.trim().is_empty() => url.parse(),
            _ => Err(GridShardError::config("No grid endpoint configured")),
        }
    }

    /// Spill directory with relative paths resolved.
    pub fn resolved_temp_path(&self) -> PathBuf {
        if self.temp_path.is_absolute() {
            self.temp_path.clone()
        } else {
            self.default_path.join(&self.temp_path)
        }
    }

    pub fn shard_options(&self) -> ShardOptions {
        ShardOptions {
            use_mmap: self.use_mmap,
            buffer_size: self.buffer_size,
        }
    }

    pub fn build_options(&self) -> BuildOptions {
        BuildOptions {
            store_id: self.store_id.clone(),
            temp_dir: self.resolved_temp_path(),
            task: self.task.clone(),
            buffer_size: self.buffer_size,
            parallelism: self.parallelism,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = IndexStoreConfig::default();
        assert_eq!(config.default_num_requested, 20);
        assert!(config.use_mmap);
        assert!(config.parallelism >= 1);
        assert_eq!(config.shard_key, ShardKeyKind::LeadingChar);
    }

    #[test]
    fn test_missing_endpoint_is_configuration_error() {
        let config = IndexStoreConfig::default();
        assert!(matches!(
            config.validate(),
            Err(GridShardError::Configuration(_))
        ));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: IndexStoreConfig = serde_json::from_str(
            r#"{"store_id": "books", "grid_endpoint": "memory://cfg", "use_mmap": false,
                "shard_key": "leading_pair"}"#,
        )
        .unwrap();
        assert_eq!(config.store_id, "books");
        assert!(!config.use_mmap);
        assert_eq!(config.default_num_requested, 20);
        assert_eq!(config.shard_key, ShardKeyKind::LeadingPair);
        config.validate().unwrap();
        assert_eq!(config.shard_key.build().shard_of("apple"), "ap");
    }

    #[test]
    fn test_temp_path_resolution() {
        let mut config = IndexStoreConfig::new("/data/idx", "memory://cfg");
        assert_eq!(config.resolved_temp_path(), PathBuf::from("/data/idx/temp"));
        config.temp_path = PathBuf::from("/scratch");
        assert_eq!(config.resolved_temp_path(), PathBuf::from("/scratch"));
    }

    #[test]
    fn test_invalid_values() {
        let mut config = IndexStoreConfig::new("/data/idx", "memory://cfg");
        config.validate().unwrap();

        config.store_id = "a/b".to_string();
        assert!(config.validate().is_err());

        let mut config = IndexStoreConfig::new("/data/idx", "ftp://host/x");
        assert!(config.validate().is_err());
        config.grid_endpoint = Some("memory://cfg".to_string());
        config.parallelism = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, r#"{"grid_endpoint": "file:///tmp/grid", "task": "t1"}"#).unwrap();

        let config = IndexStoreConfig::from_file(&path).unwrap();
        assert_eq!(config.task.as_deref(), Some("t1"));
        assert!(IndexStoreConfig::from_file(dir.path().join("missing.json")).is_err());
    }
}
