// rust/solpred-core/src/dataset/shuffle.rs

//! Bounded reorder buffer for approximate shuffling of sample streams.

use rand::Rng;

use crate::error::Result;

/// Derive an independent seed for sub-stream `stream` of `seed` (SplitMix64).
pub fn derive_seed(seed: u64, stream: u64) -> u64 {
    let mut z = seed ^ stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Emits upstream items in approximately random order using a buffer of at
/// most `capacity` items.
///
/// The buffer is filled before the first item is emitted. Each pull then
/// picks a uniformly random slot, emits it and refills the slot from
/// upstream; once upstream is exhausted the buffer drains. A capacity of 1
/// preserves upstream order.
///
/// Upstream errors are returned as soon as they are pulled.
pub struct ShuffleBuffer<I, T, R> {
    upstream: I,
    buffer: Vec<T>,
    capacity: usize,
    rng: R,
    primed: bool,
    upstream_done: bool,
}

impl<I, T, R> ShuffleBuffer<I, T, R>
where
    I: Iterator<Item = Result<T>>,
    R: Rng,
{
    pub fn new(upstream: I, capacity: usize, rng: R) -> Self {
        let capacity = capacity.max(1);
        Self {
            upstream,
            buffer: Vec::with_capacity(capacity.min(1024)),
            capacity,
            rng,
            primed: false,
            upstream_done: false,
        }
    }

    /// Items currently held back.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn next_item(&mut self) -> Result<Option<T>> {
        if !self.primed {
            while self.buffer.len() < self.capacity && !self.upstream_done {
                match self.upstream.next() {
                    Some(item) => self.buffer.push(item?),
                    None => self.upstream_done = true,
                }
            }
            self.primed = true;
        }

        if self.buffer.is_empty() {
            return Ok(None);
        }

        let idx = self.rng.gen_range(0..self.buffer.len());
        if !self.upstream_done {
            match self.upstream.next() {
                Some(item) => {
                    let replacement = item?;
                    return Ok(Some(std::mem::replace(&mut self.buffer[idx], replacement)));
                }
                None => self.upstream_done = true,
            }
        }
        Ok(Some(self.buffer.swap_remove(idx)))
    }
}

impl<I, T, R> Iterator for ShuffleBuffer<I, T, R>
where
    I: Iterator<Item = Result<T>>,
    R: Rng,
{
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_item().transpose()
    }
}
