// rust/solpred-core/src/dataset/parallel.rs

//! Decode fan-out across worker threads.
//!
//! Shards are dealt to workers round-robin. Each worker runs its own
//! Reader -> Decoder -> Stacker chain (plus a private shuffle buffer on the
//! training split) and feeds a bounded channel. The consumer merges the
//! channels round-robin, so for a fixed configuration and seed the merged
//! order is reproducible; it differs between worker counts.

use std::any::Any;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::decode::{DecodeStage, DecodedSample, SampleDecoder};
use super::shard_reader::ShardSetReader;
use super::shuffle::{derive_seed, ShuffleBuffer};
use crate::config::DecodeErrorPolicy;
use crate::error::{LoaderError, Result};
use crate::storage::StorageBackend;

/// Boxed per-worker sample stream.
pub type SampleStream = Box<dyn Iterator<Item = Result<DecodedSample>> + Send>;

/// Everything needed to build one Reader -> Decoder -> Stacker chain.
#[derive(Clone)]
pub struct SamplePipeline {
    pub storage: Arc<dyn StorageBackend>,
    pub decoder: Arc<SampleDecoder>,
    pub on_error: DecodeErrorPolicy,
    pub skipped: Arc<AtomicU64>,
    /// Reorder buffer capacity; `None` keeps shard order.
    pub shuffle_buffer: Option<usize>,
}

impl SamplePipeline {
    /// Build the chain over `shards`, read in the given order.
    pub fn samples(&self, shards: Vec<PathBuf>, seed: u64) -> SampleStream {
        let reader = ShardSetReader::new(self.storage.clone(), shards);
        let decoded = DecodeStage::new(
            reader,
            self.decoder.clone(),
            self.on_error,
            self.skipped.clone(),
        );
        match self.shuffle_buffer {
            Some(capacity) => Box::new(ShuffleBuffer::new(
                decoded,
                capacity,
                StdRng::seed_from_u64(seed),
            )),
            None => Box::new(decoded),
        }
    }
}

/// Deal shards to `workers` partitions: shard `i` goes to `i % workers`.
/// Partitions that would be empty are not created.
pub fn partition_shards(shards: Vec<PathBuf>, workers: usize) -> Vec<Vec<PathBuf>> {
    let count = workers.max(1).min(shards.len().max(1));
    let mut partitions = vec![Vec::new(); count];
    for (i, shard) in shards.into_iter().enumerate() {
        partitions[i % count].push(shard);
    }
    partitions.retain(|p| !p.is_empty());
    partitions
}

/// Samples merged from several decode worker threads.
///
/// A worker that panics ends the merge with an error rather than being
/// treated as finished. Dropping it stops and joins every worker, releasing
/// their shard handles.
pub struct ParallelSamples {
    /// `(worker id, channel)` for workers still producing.
    receivers: Vec<(usize, Receiver<Result<DecodedSample>>)>,
    next_worker: usize,
    stop_flag: Arc<AtomicBool>,
    /// Indexed by worker id; taken once joined.
    workers: Vec<Option<JoinHandle<()>>>,
}

impl ParallelSamples {
    /// Spawn one worker per non-empty partition of `shards`.
    pub fn spawn(
        pipeline: &SamplePipeline,
        shards: Vec<PathBuf>,
        num_workers: usize,
        channel_buffer: usize,
        seed: u64,
    ) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let partitions = partition_shards(shards, num_workers);

        let mut receivers = Vec::with_capacity(partitions.len());
        let mut workers = Vec::with_capacity(partitions.len());

        for (worker_id, worker_shards) in partitions.into_iter().enumerate() {
            let (tx, rx) = channel::bounded(channel_buffer.max(1));
            let pipeline = pipeline.clone();
            let stop = stop_flag.clone();
            let worker_seed = derive_seed(seed, worker_id as u64);

            let handle = thread::spawn(move || {
                tracing::debug!(
                    "Decode worker {} started with {} shards",
                    worker_id,
                    worker_shards.len()
                );
                let mut sent = 0u64;
                for item in pipeline.samples(worker_shards, worker_seed) {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let failed = item.is_err();
                    if tx.send(item).is_err() {
                        break; // Consumer dropped
                    }
                    sent += 1;
                    if failed {
                        break;
                    }
                }
                tracing::debug!("Decode worker {} finished after {} items", worker_id, sent);
            });

            receivers.push((worker_id, rx));
            workers.push(Some(handle));
        }

        Self {
            receivers,
            next_worker: 0,
            stop_flag,
            workers,
        }
    }

    /// Number of workers still producing.
    pub fn active_workers(&self) -> usize {
        self.receivers.len()
    }

    pub fn next_sample(&mut self) -> Result<Option<DecodedSample>> {
        while !self.receivers.is_empty() {
            let idx = self.next_worker % self.receivers.len();
            match self.receivers[idx].1.recv() {
                Ok(Ok(sample)) => {
                    self.next_worker = idx + 1;
                    return Ok(Some(sample));
                }
                Ok(Err(e)) => {
                    self.shutdown();
                    return Err(e);
                }
                Err(_) => {
                    // Sender dropped: the worker either finished or unwound.
                    let (worker_id, _) = self.receivers.remove(idx);
                    self.next_worker = idx;
                    if let Err(message) = self.join_worker(worker_id) {
                        tracing::error!("Decode worker {} panicked: {}", worker_id, message);
                        self.shutdown();
                        return Err(LoaderError::worker_panicked(worker_id, message));
                    }
                }
            }
        }
        Ok(None)
    }

    fn join_worker(&mut self, worker_id: usize) -> std::result::Result<(), String> {
        match self.workers.get_mut(worker_id).and_then(Option::take) {
            Some(handle) => handle.join().map_err(panic_message),
            None => Ok(()),
        }
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        // Dropping the receivers unblocks workers waiting on a full channel.
        self.receivers.clear();
        for (worker_id, handle) in self.workers.iter_mut().enumerate() {
            if let Some(handle) = handle.take() {
                if let Err(payload) = handle.join() {
                    tracing::error!(
                        "Decode worker {} panicked: {}",
                        worker_id,
                        panic_message(payload)
                    );
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Iterator for ParallelSamples {
    type Item = Result<DecodedSample>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_sample().transpose()
    }
}

impl Drop for ParallelSamples {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Decoded samples for one pass, produced inline or by worker threads.
pub enum SampleSource {
    Inline(SampleStream),
    Parallel(ParallelSamples),
}

impl SampleSource {
    /// Run inline for one worker, otherwise fan out.
    pub fn open(
        pipeline: &SamplePipeline,
        shards: Vec<PathBuf>,
        num_workers: usize,
        channel_buffer: usize,
        seed: u64,
    ) -> Self {
        if num_workers <= 1 {
            Self::Inline(pipeline.samples(shards, derive_seed(seed, 0)))
        } else {
            Self::Parallel(ParallelSamples::spawn(
                pipeline,
                shards,
                num_workers,
                channel_buffer,
                seed,
            ))
        }
    }
}

impl Iterator for SampleSource {
    type Item = Result<DecodedSample>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Self::Inline(stream) => stream.next(),
            Self::Parallel(parallel) => parallel.next(),
        }
    }
}
