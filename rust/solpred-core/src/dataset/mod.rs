// rust/solpred-core/src/dataset/mod.rs

//! The sample pipeline: tar shards in, stacked batches out.
//!
//! Each stage is a pull-based iterator over `Result<T>` that wraps the stage
//! before it:
//!
//! ```text
//! ShardSetReader -> DecodeStage (decode + stack) -> [ShuffleBuffer] -> Batcher
//! ```
//!
//! # Example
//!
//! ```no_run
//! use solpred_core::config::{DecodeConfig, StorageConfig};
//! use solpred_core::dataset::{Batcher, DecodeStage, SampleDecoder, ShardSetReader};
//! use solpred_core::storage::{LocalStorage, StorageBackend};
//! use std::path::PathBuf;
//! use std::sync::atomic::AtomicU64;
//! use std::sync::Arc;
//!
//! let storage: Arc<dyn StorageBackend> =
//!     Arc::new(LocalStorage::new(&StorageConfig::default()).unwrap());
//! let reader = ShardSetReader::new(storage, vec![PathBuf::from("val_0000.tar")]);
//! let decoder = Arc::new(SampleDecoder::new(&DecodeConfig::default()));
//! let samples = DecodeStage::new(
//!     reader,
//!     decoder,
//!     Default::default(),
//!     Arc::new(AtomicU64::new(0)),
//! );
//!
//! for batch in Batcher::new(samples, 8, true) {
//!     let batch = batch.unwrap();
//!     println!("{:?}", batch.images.shape());
//! }
//! ```

mod batch;
mod decode;
mod parallel;
mod pattern;
mod shard_reader;
mod shuffle;
mod stack;

#[cfg(test)]
pub(crate) mod fixtures;

pub use batch::{Batch, Batcher};
pub use decode::{
    Channel, ChannelLabels, DecodeStage, DecodedSample, LabelSource, MetadataRecord,
    SampleDecoder, IMAGE_CHANNELS,
};
pub use parallel::{partition_shards, ParallelSamples, SamplePipeline, SampleSource, SampleStream};
pub use pattern::{expand_pattern, MAX_SHARDS};
pub use shard_reader::{split_entry_name, RawSample, ShardReader, ShardSetReader};
pub use shuffle::{derive_seed, ShuffleBuffer};
pub use stack::stack_images;
