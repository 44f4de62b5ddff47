// rust/solpred-core/tests/common/mod.rs

#![allow(dead_code)]

use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};

use solpred_core::config::StorageConfig;
use solpred_core::{
    LoaderConfig, LocalStorage, Result, StorageBackend, StorageReader, StorageWriter,
};

pub const IMAGE_SIZE: u32 = 8;
pub const TIME_STEPS: usize = 2;

pub fn png_bytes(rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(IMAGE_SIZE, IMAGE_SIZE, Rgb(rgb));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Generic-labelled metadata with three inputs and one target.
pub fn metadata(id: &str) -> Value {
    json!({
        "id": id,
        "inputs": [
            {"distance": 2, "value": 300.0},
            {"distance": 0, "value": 320.0},
            {"distance": 1, "value": 310.0}
        ],
        "targets": [{"horizon": 1, "value": 330.0}]
    })
}

pub struct SampleEntry {
    pub key: String,
    pub metadata: Vec<u8>,
}

impl SampleEntry {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        let metadata = metadata(&key).to_string().into_bytes();
        Self { key, metadata }
    }

    pub fn with_metadata(key: impl Into<String>, metadata: Value) -> Self {
        Self {
            key: key.into(),
            metadata: metadata.to_string().into_bytes(),
        }
    }

    pub fn with_raw_metadata(key: impl Into<String>, metadata: &[u8]) -> Self {
        Self {
            key: key.into(),
            metadata: metadata.to_vec(),
        }
    }
}

pub fn write_shard(dir: &Path, name: &str, samples: &[SampleEntry]) {
    let mut builder = tar::Builder::new(File::create(dir.join(name)).unwrap());
    let mut append = |name: String, data: &[u8]| {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data).unwrap();
    };

    for sample in samples {
        for t in 0..TIME_STEPS {
            let image = png_bytes([(t * 100) as u8, 50, 200]);
            append(format!("{}.t{t:02}.png", sample.key), &image);
        }
        append(format!("{}.data.json", sample.key), &sample.metadata);
    }
    drop(append);
    builder.into_inner().unwrap();
}

/// Write `sizes[i]` default samples into `{prefix}_{i:04}.tar`, numbering
/// keys globally, and return the split's shard pattern.
pub fn write_split(dir: &Path, prefix: &str, sizes: &[usize]) -> String {
    let mut next = 0;
    for (i, &size) in sizes.iter().enumerate() {
        let samples: Vec<_> = (0..size)
            .map(|_| {
                let entry = SampleEntry::new(format!("{next:06}"));
                next += 1;
                entry
            })
            .collect();
        write_shard(dir, &format!("{prefix}_{i:04}.tar"), &samples);
    }
    format!("{prefix}_{{0000..{:04}}}.tar", sizes.len() - 1)
}

pub fn expected_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{i:06}")).collect()
}

pub fn base_config(dir: &Path) -> LoaderConfig {
    let mut config = LoaderConfig::default();
    config.storage.base_path = dir.to_path_buf();
    config.splits.train = write_split(dir, "train", &[5, 5]);
    config.splits.val = write_split(dir, "val", &[5, 5]);
    config.splits.test = write_split(dir, "test", &[5, 5]);
    config.decode.image_width = 4;
    config.batching.batch_size = 4;
    config.shuffle.seed = Some(42);
    config
}

/// Local storage that counts live reader handles.
pub struct CountingStorage {
    inner: LocalStorage,
    open: Arc<AtomicUsize>,
    opened_total: Arc<AtomicUsize>,
}

impl CountingStorage {
    pub fn new(dir: &Path) -> Self {
        let config = StorageConfig {
            base_path: dir.to_path_buf(),
            ..Default::default()
        };
        Self {
            inner: LocalStorage::new(&config).unwrap(),
            open: Arc::new(AtomicUsize::new(0)),
            opened_total: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn open_handles(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn opened_total(&self) -> usize {
        self.opened_total.load(Ordering::SeqCst)
    }
}

impl StorageBackend for CountingStorage {
    fn exists(&self, path: &Path) -> Result<bool> {
        self.inner.exists(path)
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let inner = self.inner.open_read(path)?;
        self.open.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountedReader {
            inner,
            open: self.open.clone(),
        }))
    }

    fn open_write(&self, path: &Path) -> Result<Box<dyn StorageWriter>> {
        self.inner.open_write(path)
    }
}

struct CountedReader {
    inner: Box<dyn StorageReader>,
    open: Arc<AtomicUsize>,
}

impl Read for CountedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

impl StorageReader for CountedReader {
    fn size(&self) -> u64 {
        self.inner.size()
    }
}

impl Drop for CountedReader {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}
