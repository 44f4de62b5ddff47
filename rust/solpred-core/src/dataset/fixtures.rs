// rust/solpred-core/src/dataset/fixtures.rs

// Helpers shared by the dataset unit tests: on-disk tar shards, encoded
// images and metadata documents.

use std::fs::File;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageFormat, Rgb, RgbImage};
use serde_json::{json, Value};

use crate::config::StorageConfig;
use crate::storage::{LocalStorage, StorageBackend};

pub fn local_storage(dir: &Path) -> Arc<dyn StorageBackend> {
    let config = StorageConfig {
        base_path: dir.to_path_buf(),
        ..Default::default()
    };
    Arc::new(LocalStorage::new(&config).unwrap())
}

/// Write `entries` (name, bytes) into a tar file under `dir`.
pub fn write_shard(dir: &Path, name: &str, entries: &[(String, Vec<u8>)]) -> PathBuf {
    let path = dir.join(name);
    let mut builder = tar::Builder::new(File::create(&path).unwrap());
    for (entry_name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, entry_name, data.as_slice())
            .unwrap();
    }
    builder.into_inner().unwrap();
    path
}

pub fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(rgb));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

/// Metadata with `n_inputs` generic-labelled inputs and `n_targets` targets.
///
/// Input `i` sits at distance `i` with value `100 + i`; target `j` at
/// horizon `j + 1` with value `200 + j`.
pub fn metadata(id: &str, n_inputs: usize, n_targets: usize) -> Value {
    let inputs: Vec<Value> = (0..n_inputs)
        .map(|i| json!({ "distance": i as f64, "value": 100.0 + i as f64 }))
        .collect();
    let targets: Vec<Value> = (0..n_targets)
        .map(|j| json!({ "horizon": (j + 1) as f64, "value": 200.0 + j as f64 }))
        .collect();
    json!({ "id": id, "inputs": inputs, "targets": targets })
}

/// Entries for one complete sample: `n_images` PNGs plus `data.json`.
pub fn sample_entries(key: &str, n_images: usize, size: u32) -> Vec<(String, Vec<u8>)> {
    let mut entries: Vec<(String, Vec<u8>)> = (0..n_images)
        .map(|t| {
            let shade = (t * 40) as u8;
            (
                format!("{key}.t{t:02}.png"),
                png_bytes(size, size, [shade, 0, 255]),
            )
        })
        .collect();
    entries.push((
        format!("{key}.data.json"),
        metadata(key, 3, 2).to_string().into_bytes(),
    ));
    entries
}

/// Write `count` samples per shard across `shards` shards named
/// `{prefix}_{i:04}.tar`. Keys are globally numbered in write order.
pub fn write_split(dir: &Path, prefix: &str, shards: usize, count: usize) -> String {
    let mut next = 0;
    for s in 0..shards {
        let mut entries = Vec::new();
        for _ in 0..count {
            entries.extend(sample_entries(&format!("{next:06}"), 2, 8));
            next += 1;
        }
        write_shard(dir, &format!("{prefix}_{s:04}.tar"), &entries);
    }
    format!("{prefix}_{{0000..{:04}}}.tar", shards - 1)
}
