// rust/solpred-core/src/storage/mod.rs

//! Storage abstraction for shard input and result output.
//!
//! Shards are opened through [`StorageBackend`] rather than the filesystem
//! directly, so the pipeline can run against any byte source that supports
//! sequential reads, and so tests can observe how many shard handles are open
//! at any moment.
//!
//! # Example
//!
//! ```no_run
//! use solpred_core::config::StorageConfig;
//! use solpred_core::storage::{LocalStorage, StorageBackend};
//! use std::io::Read;
//! use std::path::Path;
//!
//! let config = StorageConfig::default();
//! let storage = LocalStorage::new(&config).unwrap();
//!
//! let mut reader = storage.open_read(Path::new("train_0000.tar")).unwrap();
//! let mut header = [0u8; 512];
//! reader.read_exact(&mut header).unwrap();
//! ```

mod local;
mod traits;

pub use local::LocalStorage;
pub use traits::{StorageBackend, StorageReader, StorageWriter};
