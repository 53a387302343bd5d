//! One-pass uniform random enumeration of a bucket

use rand::Rng;

use super::BucketReader;
use crate::archive::DiskValue;
use crate::error::{ConfigError, Result};

/// Emits every bucket value exactly once, in uniformly random order
///
/// The tour reads the bucket circularly from a random origin (for
/// fixed-size values; from the data start otherwise), holding at most one
/// window of values in memory. Within the window, values are drawn by an
/// in-place Fisher-Yates step. Combined with the uniform shuffle the bucket
/// received at build time, the emitted sequence is uniform over all
/// permutations of the bucket's values.
///
/// The tour owns its random number generator, so two tours started from
/// generators in the same state emit the same sequence regardless of what
/// the caller draws afterwards. Mutating the bucket while a tour is live is
/// the caller's responsibility to avoid.
#[derive(Debug)]
pub struct RandomTour<V: DiskValue, R: Rng + Clone> {
    reader: BucketReader<V>,
    rng: R,
    cache: Vec<V>,
    capacity: usize,
    initial_pos: u64,
    read_pos: u64,
    available: usize,
    emitted: u64,
}

impl<V: DiskValue, R: Rng + Clone> RandomTour<V, R> {
    /// Starts a tour over `reader` with a cache of `cache_size` bytes
    ///
    /// Picks the starting offset, loads the first window, and leaves the
    /// generator owned by the tour.
    pub(crate) fn new(reader: BucketReader<V>, mut rng: R, cache_size: usize) -> Result<Self> {
        let capacity = cache_size / V::slot_size();
        if capacity == 0 {
            return Err(ConfigError::CacheTooSmall {
                required: V::slot_size(),
                given: cache_size,
            }
            .into());
        }

        let initial_pos = if V::FIXED_SIZE.is_some() && reader.len() > 0 {
            let first_index = rng.random_range(0..reader.len());
            reader.meta.value_offset(first_index)
        } else {
            reader.meta.data_pos
        };

        let mut tour = Self {
            reader,
            rng,
            cache: Vec::with_capacity(capacity),
            capacity,
            initial_pos,
            read_pos: initial_pos,
            available: 0,
            emitted: 0,
        };
        tour.available = tour.reader.meta.load_window_circular(
            &mut tour.cache,
            tour.capacity,
            &mut tour.read_pos,
            tour.initial_pos,
            true,
        )?;
        Ok(tour)
    }

    /// Emits the next value, or `None` once the tour has visited everything
    ///
    /// # Returns
    ///
    /// * `Ok(Some(value))` - The next value of the randomized enumeration
    /// * `Ok(None)` - If every bucket value has been emitted
    /// * `Err(Error)` - If reloading the read window failed
    pub fn next_value(&mut self) -> Result<Option<V>> {
        if self.is_finished() {
            return Ok(None);
        }

        let picked = self.rng.random_range(0..self.available);
        self.cache.swap(picked, self.available - 1);
        let value = self.cache[self.available - 1].clone();
        self.available -= 1;
        self.emitted += 1;

        if self.available == 0 && self.read_pos != self.initial_pos {
            self.available = self.reader.meta.load_window_circular(
                &mut self.cache,
                self.capacity,
                &mut self.read_pos,
                self.initial_pos,
                false,
            )?;
        }

        Ok(Some(value))
    }

    /// Whether every value has been emitted
    pub fn is_finished(&self) -> bool {
        self.available == 0 && self.read_pos == self.initial_pos
    }

    /// The number of values emitted so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// The number of values the tour has not reached yet
    pub fn remaining(&self) -> u64 {
        self.reader.len() - self.emitted
    }

    pub fn bucket(&self) -> &BucketReader<V> {
        &self.reader
    }

    /// The tour cache byte budget, rounded to whole values
    pub fn cache_size(&self) -> usize {
        self.capacity * V::slot_size()
    }
}

/// Two tours compare equal when they stand at the same point of the same
/// bucket: identical file path, origin, read position, and window fill.
impl<V: DiskValue, R: Rng + Clone> PartialEq for RandomTour<V, R> {
    fn eq(&self, other: &Self) -> bool {
        if self.is_finished() || other.is_finished() {
            return self.is_finished() && other.is_finished();
        }
        self.reader.path() == other.reader.path()
            && self.read_pos == other.read_pos
            && self.initial_pos == other.initial_pos
            && self.available == other.available
    }
}
