// rust/solpred-core/src/storage/traits.rs

//! Storage abstraction traits.
//!
//! This module defines the core traits for storage backends, allowing
//! different implementations to be used interchangeably.

use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;

/// A sequential handle for reading from storage.
///
/// Dropping the handle releases the underlying file or mapping.
pub trait StorageReader: Read + Send {
    /// Returns the total size of the object in bytes.
    ///
    /// Shard readers use it to reject entries that claim more bytes than
    /// the shard holds.
    fn size(&self) -> u64;
}

/// A handle for writing to storage.
///
/// This trait extends `Write` with a method to finalize the write operation.
pub trait StorageWriter: Write + Send {
    /// Finishes the write operation, ensuring all data is persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush or sync fails.
    fn finish(self: Box<Self>) -> Result<()>;
}

/// The core storage backend trait.
///
/// # Object Safety
///
/// This trait is object-safe and is shared across decode workers as
/// `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Checks if an object exists at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the existence check fails (e.g., permission denied).
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Opens an object for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or cannot be opened.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Opens an object for writing.
    ///
    /// If the object already exists, it will be overwritten.
    /// Parent directories will be created if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the object cannot be created or opened.
    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>>;
}
