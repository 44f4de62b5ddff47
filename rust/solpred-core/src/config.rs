// rust/solpred-core/src/config.rs

//! Configuration management for the shard loader.
//!
//! This module provides configuration parsing from TOML files, environment
//! variable overrides, and validation of configuration values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{LoaderError, Result};

// Top-level loader configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub storage: StorageConfig,
    pub splits: SplitsConfig,
    pub decode: DecodeConfig,
    pub batching: BatchingConfig,
    pub shuffle: ShuffleConfig,
    pub workers: WorkerConfig,
}

// Storage configuration options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    // Base path that relative shard patterns are resolved against.
    pub base_path: PathBuf,
    // Buffer size in bytes for I/O operations.
    pub buffer_size: usize,
    // Whether to use memory-mapped I/O for large shards.
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

/// Shard patterns for each split.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitsConfig {
    pub train: String,
    pub val: String,
    pub test: String,
}

/// What to do with a sample that fails to decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrorPolicy {
    /// Surface the error and end the pass.
    #[default]
    Abort,
    /// Drop the sample and count it.
    Skip,
}

impl FromStr for DecodeErrorPolicy {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "skip" => Ok(Self::Skip),
            other => Err(LoaderError::config(format!(
                "unknown decode error policy '{other}' (expected 'abort' or 'skip')"
            ))),
        }
    }
}

/// Per-sample decode options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Output width (and height) of every decoded image.
    pub image_width: u32,
    /// Field extensions treated as image attachments.
    pub image_extensions: Vec<String>,
    /// Field holding the JSON metadata document.
    pub metadata_field: String,
    pub on_error: DecodeErrorPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub batch_size: usize,
    // Emit the trailing undersized batch instead of dropping it.
    pub partial_batch: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    // Randomize shard visitation order on the training split.
    pub shard_shuffle: bool,
    // Capacity of the training reorder buffer.
    pub buffer_size: usize,
    // Optional seed for reproducible shuffling.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    // Number of decode workers; 1 runs the pipeline on the calling thread.
    pub num_workers: usize,
    // Bounded channel capacity per worker.
    pub channel_buffer: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("."),
            buffer_size: 64 * 1024, // 64 KB
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MB
        }
    }
}

impl Default for SplitsConfig {
    fn default() -> Self {
        Self {
            train: "/data/default/train_data_{00000..00012}.tar".to_string(),
            val: "/data/default/val_data_{00000..00012}.tar".to_string(),
            test: "/data/default/test_data_{00000..00012}.tar".to_string(),
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            image_width: 64,
            image_extensions: ["webp", "png", "jpg", "jpeg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            metadata_field: "data.json".to_string(),
            on_error: DecodeErrorPolicy::Abort,
        }
    }
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            batch_size: 8,
            partial_batch: false,
        }
    }
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        Self {
            shard_shuffle: true,
            buffer_size: 5000,
            seed: None,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            channel_buffer: 16,
        }
    }
}

impl FromStr for LoaderConfig {
    type Err = LoaderError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| LoaderError::config_with_source("failed to parse TOML config", e))
    }
}

impl LoaderConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // Environment variables are prefixed with `SOLPRED_`. For example:
    // - `SOLPRED_TRAIN_DS` overrides `splits.train`
    // - `SOLPRED_BATCH_SIZE` overrides `batching.batch_size`
    // - `SOLPRED_ON_DECODE_ERROR` overrides `decode.on_error` ("abort" or "skip")
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("SOLPRED_STORAGE_BASE_PATH") {
            self.storage.base_path = PathBuf::from(val);
        }

        // Split overrides
        if let Ok(val) = std::env::var("SOLPRED_TRAIN_DS") {
            self.splits.train = val;
        }
        if let Ok(val) = std::env::var("SOLPRED_VAL_DS") {
            self.splits.val = val;
        }
        if let Ok(val) = std::env::var("SOLPRED_TEST_DS") {
            self.splits.test = val;
        }

        // Decode overrides
        if let Ok(val) = std::env::var("SOLPRED_IMAGE_WIDTH") {
            if let Ok(v) = val.parse() {
                self.decode.image_width = v;
            }
        }
        if let Ok(val) = std::env::var("SOLPRED_ON_DECODE_ERROR") {
            if let Ok(v) = val.parse() {
                self.decode.on_error = v;
            }
        }

        // Batching overrides
        if let Ok(val) = std::env::var("SOLPRED_BATCH_SIZE") {
            if let Ok(v) = val.parse() {
                self.batching.batch_size = v;
            }
        }
        if let Ok(val) = std::env::var("SOLPRED_PARTIAL_BATCH") {
            if let Ok(v) = val.parse() {
                self.batching.partial_batch = v;
            }
        }

        // Shuffle overrides
        if let Ok(val) = std::env::var("SOLPRED_SHARD_SHUFFLE") {
            if let Ok(v) = val.parse() {
                self.shuffle.shard_shuffle = v;
            }
        }
        if let Ok(val) = std::env::var("SOLPRED_SHUFFLE_BUFFER") {
            if let Ok(v) = val.parse() {
                self.shuffle.buffer_size = v;
            }
        }
        if let Ok(val) = std::env::var("SOLPRED_SEED") {
            if let Ok(v) = val.parse() {
                self.shuffle.seed = Some(v);
            }
        }

        if let Ok(val) = std::env::var("SOLPRED_NUM_WORKERS") {
            if let Ok(v) = val.parse() {
                self.workers.num_workers = v;
            }
        }

        self
    }

    // Validate all configuration values.
    //
    // # Errors
    //
    // Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.storage.buffer_size == 0 {
            return Err(LoaderError::config(
                "storage.buffer_size must be greater than 0",
            ));
        }

        for (name, pattern) in [
            ("train", &self.splits.train),
            ("val", &self.splits.val),
            ("test", &self.splits.test),
        ] {
            if pattern.trim().is_empty() {
                return Err(LoaderError::config(format!(
                    "splits.{name} must not be empty"
                )));
            }
        }

        if self.decode.image_width == 0 {
            return Err(LoaderError::config(
                "decode.image_width must be greater than 0",
            ));
        }
        if self.decode.image_extensions.is_empty() {
            return Err(LoaderError::config(
                "decode.image_extensions must list at least one extension",
            ));
        }
        if self.decode.metadata_field.is_empty() {
            return Err(LoaderError::config(
                "decode.metadata_field must not be empty",
            ));
        }

        if self.batching.batch_size == 0 {
            return Err(LoaderError::config(
                "batching.batch_size must be greater than 0",
            ));
        }

        if self.shuffle.buffer_size == 0 {
            return Err(LoaderError::config(
                "shuffle.buffer_size must be greater than 0",
            ));
        }

        if self.workers.num_workers == 0 {
            return Err(LoaderError::config(
                "workers.num_workers must be greater than 0",
            ));
        }
        if self.workers.channel_buffer == 0 {
            return Err(LoaderError::config(
                "workers.channel_buffer must be greater than 0",
            ));
        }

        Ok(())
    }
}
