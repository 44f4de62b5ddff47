// rust/solpred-core/src/dataset/shard_reader.rs

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tar::Header;

use crate::error::{LoaderError, Result};
use crate::storage::{StorageBackend, StorageReader};

const BLOCK_SIZE: usize = 512;

/// Byte range of the checksum field inside a tar header block.
const CKSUM_RANGE: std::ops::Range<usize> = 148..156;

/// One logical record: every shard entry that shares a sample key.
#[derive(Debug, Clone)]
pub struct RawSample {
    /// Key shared by all fields, e.g. `fold1/000123`.
    pub key: String,
    /// Shard the sample was read from.
    pub shard: PathBuf,
    /// Field name (entry name after the key) to raw bytes.
    pub fields: BTreeMap<String, Vec<u8>>,
}

struct TarEntry {
    name: String,
    data: Vec<u8>,
}

/// Split an entry name into `(sample key, field name)`.
///
/// The key is everything up to the first `.` of the basename; entries
/// without one, and `__name__` bookkeeping entries, carry no field.
pub fn split_entry_name(name: &str) -> Option<(String, String)> {
    let (dir, base) = match name.rfind('/') {
        Some(idx) => name.split_at(idx + 1),
        None => ("", name),
    };

    if dir.is_empty() && base.starts_with("__") && base.ends_with("__") {
        return None;
    }

    let dot = base.find('.')?;
    if dot == 0 {
        return None;
    }
    Some((
        format!("{dir}{}", &base[..dot]),
        base[dot + 1..].to_string(),
    ))
}

/// Sequential reader over the samples of a single tar shard.
///
/// The shard is opened on the first pull and released as soon as it is
/// exhausted, fails, or the reader is dropped.
pub struct ShardReader {
    storage: Arc<dyn StorageBackend>,
    path: PathBuf,
    reader: Option<Box<dyn StorageReader>>,
    pending: Option<(String, String, Vec<u8>)>,
    exhausted: bool,
    offset: u64,
    samples_read: u64,
}

impl ShardReader {
    pub fn new(storage: Arc<dyn StorageBackend>, path: PathBuf) -> Self {
        Self {
            storage,
            path,
            reader: None,
            pending: None,
            exhausted: false,
            offset: 0,
            samples_read: 0,
        }
    }

    /// Read the next complete sample from the shard.
    ///
    /// Returns `Ok(None)` once the end-of-archive marker (or a clean end of
    /// file) is reached.
    pub fn next_sample(&mut self) -> Result<Option<RawSample>> {
        if self.exhausted {
            return Ok(None);
        }

        match self.read_sample() {
            Ok(Some(sample)) => {
                self.samples_read += 1;
                Ok(Some(sample))
            }
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    fn read_sample(&mut self) -> Result<Option<RawSample>> {
        let mut current: Option<RawSample> = None;

        loop {
            let (key, field, data) = match self.pending.take() {
                Some(entry) => entry,
                None => match self.next_entry()? {
                    Some(entry) => match split_entry_name(&entry.name) {
                        Some((key, field)) => (key, field, entry.data),
                        None => {
                            tracing::trace!("Ignoring entry '{}' without a field name", entry.name);
                            continue;
                        }
                    },
                    None => return Ok(current),
                },
            };

            match current.as_mut() {
                None => {
                    let mut fields = BTreeMap::new();
                    fields.insert(field, data);
                    current = Some(RawSample {
                        key,
                        shard: self.path.clone(),
                        fields,
                    });
                }
                Some(sample) if sample.key == key => {
                    if sample.fields.contains_key(&field) {
                        return Err(LoaderError::shard_open(
                            &self.path,
                            format!("duplicate field '{field}' in sample '{key}'"),
                        ));
                    }
                    sample.fields.insert(field, data);
                }
                Some(_) => {
                    self.pending = Some((key, field, data));
                    return Ok(current);
                }
            }
        }
    }

    fn next_entry(&mut self) -> Result<Option<TarEntry>> {
        let mut long_name: Option<String> = None;

        loop {
            let mut block = [0u8; BLOCK_SIZE];
            if !self.read_block(&mut block)? {
                return Ok(None);
            }
            if block.iter().all(|&b| b == 0) {
                return Ok(None);
            }

            let header = Header::from_byte_slice(&block);
            self.verify_checksum(&block, header)?;

            let size = header
                .entry_size()
                .map_err(|e| self.corrupt("unreadable entry size", e))?;
            let entry_type = header.entry_type();
            let data = self.read_payload(size)?;

            if entry_type.is_gnu_longname() {
                let name = String::from_utf8_lossy(&data);
                long_name = Some(name.trim_end_matches('\0').to_string());
                continue;
            }
            if entry_type.is_pax_local_extensions() {
                if let Some(path) = pax_path(&data) {
                    long_name = Some(path);
                }
                continue;
            }
            if !entry_type.is_file() {
                long_name = None;
                continue;
            }

            let name = match long_name.take() {
                Some(name) => name,
                None => header
                    .path()
                    .map_err(|e| self.corrupt("unreadable entry name", e))?
                    .to_string_lossy()
                    .into_owned(),
            };
            return Ok(Some(TarEntry { name, data }));
        }
    }

    /// Fill `block`, returning `false` on a clean end of file.
    fn read_block(&mut self, block: &mut [u8; BLOCK_SIZE]) -> Result<bool> {
        if self.reader.is_none() {
            let reader = self
                .storage
                .open_read(&self.path)
                .map_err(|e| e.into_shard_open(&self.path))?;
            tracing::debug!("Opened shard {} ({} bytes)", self.path.display(), reader.size());
            self.reader = Some(reader);
        }
        let Some(reader) = self.reader.as_mut() else {
            return Ok(false);
        };

        let mut filled = 0;
        while filled < BLOCK_SIZE {
            let n = reader.read(&mut block[filled..]).map_err(|e| {
                LoaderError::shard_open_with_source(&self.path, "failed to read header", e)
            })?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.offset += filled as u64;

        match filled {
            0 => Ok(false),
            BLOCK_SIZE => Ok(true),
            _ => Err(LoaderError::shard_open(
                &self.path,
                format!("truncated header at offset {}", self.offset - filled as u64),
            )),
        }
    }

    /// Read an entry's data and skip the padding up to the next block.
    fn read_payload(&mut self, size: u64) -> Result<Vec<u8>> {
        let Some(reader) = self.reader.as_mut() else {
            return Err(LoaderError::shard_open(&self.path, "shard is not open"));
        };

        let remaining = reader.size().saturating_sub(self.offset);
        if size > remaining {
            return Err(LoaderError::shard_open(
                &self.path,
                format!(
                    "entry at offset {} claims {size} bytes but only {remaining} remain",
                    self.offset
                ),
            ));
        }
        let len = usize::try_from(size).map_err(|_| {
            LoaderError::shard_open(&self.path, format!("entry of {size} bytes is too large"))
        })?;
        let padding = (BLOCK_SIZE - len % BLOCK_SIZE) % BLOCK_SIZE;

        let mut data = vec![0u8; len];
        reader.read_exact(&mut data).map_err(|e| {
            LoaderError::shard_open_with_source(
                &self.path,
                format!("truncated entry at offset {}", self.offset),
                e,
            )
        })?;
        let mut skip = [0u8; BLOCK_SIZE];
        reader.read_exact(&mut skip[..padding]).map_err(|e| {
            LoaderError::shard_open_with_source(&self.path, "truncated entry padding", e)
        })?;

        self.offset += (len + padding) as u64;
        Ok(data)
    }

    fn verify_checksum(&self, block: &[u8; BLOCK_SIZE], header: &Header) -> Result<()> {
        let stored = header
            .cksum()
            .map_err(|e| self.corrupt("unreadable header checksum", e))?;

        let mut unsigned: u32 = 0;
        let mut signed: i32 = 0;
        for (i, &byte) in block.iter().enumerate() {
            let byte = if CKSUM_RANGE.contains(&i) { b' ' } else { byte };
            unsigned += u32::from(byte);
            signed += i32::from(byte as i8);
        }

        if stored == unsigned || stored as i32 == signed {
            Ok(())
        } else {
            Err(LoaderError::shard_open(
                &self.path,
                format!(
                    "header checksum mismatch at offset {} (stored {stored}, computed {unsigned})",
                    self.offset - BLOCK_SIZE as u64
                ),
            ))
        }
    }

    fn corrupt(&self, message: &str, source: std::io::Error) -> LoaderError {
        LoaderError::shard_open_with_source(
            &self.path,
            format!("{message} at offset {}", self.offset),
            source,
        )
    }

    fn close(&mut self) {
        if self.reader.take().is_some() {
            tracing::debug!(
                "Closed shard {} after {} samples",
                self.path.display(),
                self.samples_read
            );
        }
        self.pending = None;
        self.exhausted = true;
    }

    /// Rewind to the start of the shard. The shard is reopened on the next pull.
    pub fn reset(&mut self) {
        self.reader = None;
        self.pending = None;
        self.exhausted = false;
        self.offset = 0;
        self.samples_read = 0;
    }

    /// Whether a handle to the shard is currently held.
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    pub fn samples_read(&self) -> u64 {
        self.samples_read
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for ShardReader {
    type Item = Result<RawSample>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_sample().transpose()
    }
}

/// Extract the `path` record from a PAX extended header.
fn pax_path(data: &[u8]) -> Option<String> {
    let mut rest = data;
    while !rest.is_empty() {
        let space = rest.iter().position(|&b| b == b' ')?;
        let len: usize = std::str::from_utf8(&rest[..space]).ok()?.parse().ok()?;
        if len <= space || len > rest.len() {
            return None;
        }
        let record = &rest[space + 1..len];
        let record = record.strip_suffix(b"\n").unwrap_or(record);
        if let Some(eq) = record.iter().position(|&b| b == b'=') {
            if &record[..eq] == b"path" {
                return Some(String::from_utf8_lossy(&record[eq + 1..]).into_owned());
            }
        }
        rest = &rest[len..];
    }
    None
}

/// Reads the samples of an ordered set of shards, one shard at a time.
///
/// At most one shard handle is open at any moment. A failed shard ends the
/// pass: later pulls return `None`.
pub struct ShardSetReader {
    storage: Arc<dyn StorageBackend>,
    shards: Vec<PathBuf>,
    next_shard: usize,
    current: Option<ShardReader>,
    failed: bool,
}

impl ShardSetReader {
    pub fn new(storage: Arc<dyn StorageBackend>, shards: Vec<PathBuf>) -> Self {
        Self {
            storage,
            shards,
            next_shard: 0,
            current: None,
            failed: false,
        }
    }

    pub fn next_sample(&mut self) -> Result<Option<RawSample>> {
        if self.failed {
            return Ok(None);
        }

        loop {
            if let Some(reader) = self.current.as_mut() {
                match reader.next_sample() {
                    Ok(Some(sample)) => return Ok(Some(sample)),
                    Ok(None) => self.current = None,
                    Err(e) => {
                        self.current = None;
                        self.failed = true;
                        return Err(e);
                    }
                }
            }

            let Some(path) = self.shards.get(self.next_shard) else {
                return Ok(None);
            };
            self.current = Some(ShardReader::new(self.storage.clone(), path.clone()));
            self.next_shard += 1;
        }
    }

    /// Restart the pass from the first shard in the current order.
    pub fn reset(&mut self) {
        self.current = None;
        self.next_shard = 0;
        self.failed = false;
    }

    /// Shards in visitation order.
    pub fn shards(&self) -> &[PathBuf] {
        &self.shards
    }
}

impl Iterator for ShardSetReader {
    type Item = Result<RawSample>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_sample().transpose()
    }
}
