// rust/solpred-core/src/loader.rs

//! Loader facade.
//!
//! The `Loader` owns the storage backend and builds one `SplitDataset` per
//! split. Each call to `SplitDataset::iter` starts a fresh pass:
//!
//! ```text
//! Reader -> Decoder -> Stacker -> (Shuffler, train only) -> Batcher
//! ```
//!
//! # Example
//!
//! ```no_run
//! use solpred_core::{Loader, LoaderConfig, Split};
//!
//! let loader = Loader::from_config(LoaderConfig::default()).unwrap();
//! let train = loader.split(Split::Train);
//! train.verify_shards().unwrap();
//!
//! for epoch in 0..2 {
//!     let mut stream = train.iter();
//!     for batch in stream.by_ref() {
//!         let batch = batch.unwrap();
//!         println!("epoch {epoch}: {:?}", batch.images.shape());
//!     }
//!     println!("skipped {} samples", stream.skipped());
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::config::LoaderConfig;
use crate::dataset::{
    derive_seed, expand_pattern, Batch, Batcher, SampleDecoder, SamplePipeline, SampleSource,
};
use crate::error::{LoaderError, Result};
use crate::storage::{LocalStorage, StorageBackend};

/// Dataset split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Split {
    Train,
    Validation,
    Test,
}

impl Split {
    pub const ALL: [Split; 3] = [Split::Train, Split::Validation, Split::Test];

    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Validation => "val",
            Split::Test => "test",
        }
    }

    fn index(self) -> u64 {
        match self {
            Split::Train => 0,
            Split::Validation => 1,
            Split::Test => 2,
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Split {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "train" => Ok(Split::Train),
            "val" | "validation" => Ok(Split::Validation),
            "test" => Ok(Split::Test),
            other => Err(LoaderError::config(format!(
                "unknown split '{other}' (expected 'train', 'val' or 'test')"
            ))),
        }
    }
}

/// Builds and owns the per-split pipelines.
pub struct Loader {
    config: LoaderConfig,
    storage: Arc<dyn StorageBackend>,
    train: SplitDataset,
    val: SplitDataset,
    test: SplitDataset,
}

impl Loader {
    /// Creates a loader from a configuration file.
    ///
    /// Environment variable overrides are applied after loading the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or is invalid.
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let config = LoaderConfig::from_file(path)?.with_env_overrides();
        Self::from_config(config)
    }

    /// Creates a loader reading shards from the local filesystem.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, a shard pattern is
    /// malformed, or the storage base path is unusable.
    pub fn from_config(config: LoaderConfig) -> Result<Self> {
        config.validate()?;
        let storage: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config.storage)?);
        Self::with_storage(config, storage)
    }

    /// Creates a loader over an arbitrary storage backend.
    pub fn with_storage(config: LoaderConfig, storage: Arc<dyn StorageBackend>) -> Result<Self> {
        config.validate()?;

        let seed = match config.shuffle.seed {
            Some(seed) => seed,
            None => StdRng::from_entropy().gen(),
        };
        let decoder = Arc::new(SampleDecoder::new(&config.decode));

        let build = |split: Split| {
            SplitDataset::new(split, &config, storage.clone(), decoder.clone(), seed)
        };
        let train = build(Split::Train)?;
        let val = build(Split::Validation)?;
        let test = build(Split::Test)?;

        tracing::debug!(
            "Loader ready: {} train, {} val, {} test shards",
            train.shards.len(),
            val.shards.len(),
            test.shards.len()
        );

        Ok(Self {
            config,
            storage,
            train,
            val,
            test,
        })
    }

    pub fn split(&self, split: Split) -> &SplitDataset {
        match split {
            Split::Train => &self.train,
            Split::Validation => &self.val,
            Split::Test => &self.test,
        }
    }

    pub fn train(&self) -> &SplitDataset {
        &self.train
    }

    pub fn val(&self) -> &SplitDataset {
        &self.val
    }

    pub fn test(&self) -> &SplitDataset {
        &self.test
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Returns a reference to the storage backend.
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }
}

/// One split's shard set and pipeline settings.
///
/// Every call to [`SplitDataset::iter`] is an independent pass.
pub struct SplitDataset {
    split: Split,
    pattern: String,
    shards: Vec<PathBuf>,
    storage: Arc<dyn StorageBackend>,
    pipeline: SamplePipeline,
    shard_shuffle: bool,
    batch_size: usize,
    partial_batch: bool,
    num_workers: usize,
    channel_buffer: usize,
    seed: u64,
    passes: AtomicU64,
}

impl SplitDataset {
    fn new(
        split: Split,
        config: &LoaderConfig,
        storage: Arc<dyn StorageBackend>,
        decoder: Arc<SampleDecoder>,
        seed: u64,
    ) -> Result<Self> {
        let pattern = match split {
            Split::Train => &config.splits.train,
            Split::Validation => &config.splits.val,
            Split::Test => &config.splits.test,
        }
        .clone();
        let shards = expand_pattern(&pattern)?
            .into_iter()
            .map(PathBuf::from)
            .collect();

        let train = split == Split::Train;
        // Test results are exported per sample, so test batches hold one.
        let batch_size = if split == Split::Test {
            1
        } else {
            config.batching.batch_size
        };

        let pipeline = SamplePipeline {
            storage: storage.clone(),
            decoder,
            on_error: config.decode.on_error,
            skipped: Arc::new(AtomicU64::new(0)),
            shuffle_buffer: train.then_some(config.shuffle.buffer_size),
        };

        Ok(Self {
            split,
            pattern,
            shards,
            storage,
            pipeline,
            shard_shuffle: train && config.shuffle.shard_shuffle,
            batch_size,
            partial_batch: config.batching.partial_batch,
            num_workers: config.workers.num_workers,
            channel_buffer: config.workers.channel_buffer,
            seed: derive_seed(seed, split.index()),
            passes: AtomicU64::new(0),
        })
    }

    /// Start a new pass over the split.
    pub fn iter(&self) -> BatchStream {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed);
        let pass_seed = derive_seed(self.seed, pass);

        let mut shards = self.shards.clone();
        if self.shard_shuffle {
            shards.shuffle(&mut StdRng::seed_from_u64(pass_seed));
        }

        tracing::info!(
            "Starting {} pass {} over {} shards ({} workers)",
            self.split,
            pass,
            shards.len(),
            self.num_workers
        );

        let skipped = Arc::new(AtomicU64::new(0));
        let pipeline = SamplePipeline {
            skipped: skipped.clone(),
            ..self.pipeline.clone()
        };
        let source = SampleSource::open(
            &pipeline,
            shards,
            self.num_workers,
            self.channel_buffer,
            pass_seed,
        );

        BatchStream {
            split: self.split,
            batcher: Batcher::new(source, self.batch_size, self.partial_batch),
            skipped,
            batches: 0,
            finished: false,
        }
    }

    /// Check up front that every shard of the split exists.
    ///
    /// # Errors
    ///
    /// Returns a shard-open error naming the first missing shard.
    pub fn verify_shards(&self) -> Result<()> {
        for shard in &self.shards {
            let present = self
                .storage
                .exists(shard)
                .map_err(|e| e.into_shard_open(shard))?;
            if !present {
                return Err(LoaderError::shard_open(shard, "shard does not exist"));
            }
        }
        Ok(())
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Shards in expansion order.
    pub fn shards(&self) -> &[PathBuf] {
        &self.shards
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Passes started so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }
}

/// One pass of batches over a split.
///
/// The stream ends after the first error. Dropping it mid-pass releases
/// every shard handle and joins any decode workers.
pub struct BatchStream {
    split: Split,
    batcher: Batcher<SampleSource>,
    skipped: Arc<AtomicU64>,
    batches: u64,
    finished: bool,
}

impl BatchStream {
    /// Samples dropped so far under the `skip` decode policy.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Batches yielded so far.
    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub fn split(&self) -> Split {
        self.split
    }
}

impl Iterator for BatchStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.batcher.next() {
            Some(Ok(batch)) => {
                self.batches += 1;
                Some(Ok(batch))
            }
            Some(Err(e)) => {
                self.finished = true;
                tracing::debug!("{} pass ended with error: {}", self.split, e);
                Some(Err(e))
            }
            None => {
                self.finished = true;
                tracing::debug!(
                    "{} pass finished: {} batches, {} skipped",
                    self.split,
                    self.batches,
                    self.skipped()
                );
                None
            }
        }
    }
}
