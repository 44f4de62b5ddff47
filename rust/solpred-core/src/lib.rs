// rust/solpred-core/src/lib.rs

//! Solar Prediction Data Loader - Core Library
//!
//! This crate streams sky-image irradiance forecasting datasets stored as tar
//! shards into batches of tensors: shard reading, sample decoding, image
//! stacking, bounded shuffling and batching, plus export of test-split
//! predictions.

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{DecodeErrorPolicy, LoaderConfig};
pub use error::{LoaderError, Result};
pub use storage::{LocalStorage, StorageBackend, StorageReader, StorageWriter};

pub mod dataset;
pub use dataset::{Batch, DecodedSample, MetadataRecord, RawSample, SampleDecoder};

pub mod loader;
pub use loader::{BatchStream, Loader, Split, SplitDataset};

pub mod export;
pub use export::{ResultRow, ResultTable};
