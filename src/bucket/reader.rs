//! Read-side access to bucket files

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use rand::Rng;

use super::{BucketMeta, RandomTour};
use crate::archive::DiskValue;
use crate::error::{ConfigError, ReadError, Result};

/// Reads values back from a bucket file
///
/// A reader holds the bucket metadata and a cache budget; file handles are
/// opened per operation, so readers are cheap to clone and never share
/// state. Ordinal access, uniform picks, and random tour origins require
/// values with a fixed on-disk size.
#[derive(Debug, Clone)]
pub struct BucketReader<V: DiskValue> {
    pub(crate) meta: BucketMeta,
    cache_values: usize,
    _values: PhantomData<V>,
}

impl<V: DiskValue> BucketReader<V> {
    /// Opens a bucket file read-only
    ///
    /// # Arguments
    ///
    /// * `path` - The path of the bucket file
    /// * `cache_size` - The byte budget of each iterator-local read cache;
    ///   must hold at least one value
    ///
    /// # Returns
    ///
    /// * `Ok(BucketReader)` - A reader over the validated bucket
    /// * `Err(Error)` - If the file or the cache budget is unusable
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * `cache_size` is smaller than one value slot
    /// * The path is not a valid bucket file
    /// * The stored count disagrees with the data length
    pub fn open(path: impl Into<PathBuf>, cache_size: usize) -> Result<Self> {
        let cache_values = cache_size / V::slot_size();
        if cache_values == 0 {
            return Err(ConfigError::CacheTooSmall {
                required: V::slot_size(),
                given: cache_size,
            }
            .into());
        }
        let meta = BucketMeta::open(path)?;
        meta.check_invariant(V::FIXED_SIZE)?;
        Ok(Self {
            meta,
            cache_values,
            _values: PhantomData,
        })
    }

    /// The number of values recorded in the bucket header
    pub fn len(&self) -> u64 {
        self.meta.len
    }

    pub fn is_empty(&self) -> bool {
        self.meta.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.meta.path
    }

    /// The read cache byte budget, rounded to whole values
    pub fn cache_size(&self) -> usize {
        self.cache_values * V::slot_size()
    }

    /// Iterates the values in bucket order
    ///
    /// # Returns
    ///
    /// * `Ok(BucketIter)` - An iterator with its first window loaded
    /// * `Err(Error)` - If the first window could not be read
    pub fn iter(&self) -> Result<BucketIter<'_, V>> {
        BucketIter::new(self)
    }

    /// Returns the `i`-th value of the bucket
    ///
    /// # Arguments
    ///
    /// * `i` - The ordinal of the value in bucket order
    ///
    /// # Returns
    ///
    /// * `Ok(value)` - The `i`-th value
    /// * `Err(Error)` - If the ordinal cannot be resolved
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The value type has no fixed on-disk size
    /// * `i` is at or beyond the bucket length
    /// * Reading the value fails
    pub fn get(&self, i: u64) -> Result<V> {
        if V::FIXED_SIZE.is_none() {
            return Err(ReadError::VariableSized.into());
        }
        if i >= self.meta.len {
            return Err(ReadError::OutOfRange {
                index: i,
                len: self.meta.len,
            }
            .into());
        }
        let mut file = File::open(&self.meta.path)?;
        file.seek(SeekFrom::Start(self.meta.value_offset(i)))?;
        V::load(&mut file)
    }

    /// Picks one value uniformly at random, with replacement
    ///
    /// # Arguments
    ///
    /// * `rng` - The random number generator drawing the ordinal
    ///
    /// # Returns
    ///
    /// * `Ok(value)` - A uniformly drawn value, left in the bucket
    /// * `Err(Error)` - If the bucket is empty or the read fails
    pub fn choose<R: Rng>(&self, rng: &mut R) -> Result<V> {
        if self.meta.len == 0 {
            return Err(ReadError::EmptyBucket.into());
        }
        self.get(rng.random_range(0..self.meta.len))
    }

    /// Starts a random tour over the bucket with the reader's cache budget
    ///
    /// The tour owns `rng`, so later draws from the caller's generator do
    /// not perturb it.
    ///
    /// # Arguments
    ///
    /// * `rng` - The generator the tour takes ownership of
    ///
    /// # Returns
    ///
    /// * `Ok(RandomTour)` - A tour with its origin picked and first window
    ///   loaded
    /// * `Err(Error)` - If the first window could not be read
    pub fn random_tour<R: Rng + Clone>(&self, rng: R) -> Result<RandomTour<V, R>> {
        self.random_tour_with_cache(rng, self.cache_size())
    }

    /// Starts a random tour with an explicit cache byte budget
    ///
    /// # Errors
    ///
    /// Returns an error if `cache_size` is smaller than one value slot, or
    /// if loading the first window fails.
    pub fn random_tour_with_cache<R: Rng + Clone>(
        &self,
        rng: R,
        cache_size: usize,
    ) -> Result<RandomTour<V, R>> {
        RandomTour::new(self.clone(), rng, cache_size)
    }

    /// Moves the bucket file to a new path
    ///
    /// # Arguments
    ///
    /// * `new_path` - The path the bucket file is moved to
    ///
    /// # Errors
    ///
    /// Returns an error if the rename fails; the reader then still points
    /// at the old path.
    pub fn rename(&mut self, new_path: impl Into<PathBuf>) -> Result<()> {
        let new_path = new_path.into();
        std::fs::rename(&self.meta.path, &new_path)?;
        self.meta.path = new_path;
        Ok(())
    }
}

/// Sequential iterator over a bucket, with an iterator-local read cache
pub struct BucketIter<'a, V: DiskValue> {
    reader: &'a BucketReader<V>,
    cache: Vec<V>,
    read_pos: u64,
    next_index: usize,
}

impl<'a, V: DiskValue> BucketIter<'a, V> {
    fn new(reader: &'a BucketReader<V>) -> Result<Self> {
        let mut iter = Self {
            reader,
            cache: Vec::with_capacity(reader.cache_values),
            read_pos: reader.meta.data_pos,
            next_index: 0,
        };
        iter.reload()?;
        Ok(iter)
    }

    fn reload(&mut self) -> Result<usize> {
        self.next_index = 0;
        self.reader.meta.load_window(
            &mut self.cache,
            self.reader.cache_values,
            &mut self.read_pos,
        )
    }
}

impl<V: DiskValue> Iterator for BucketIter<'_, V> {
    type Item = Result<V>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_index == self.cache.len() {
            match self.reload() {
                Ok(0) => return None,
                Ok(_) => {}
                Err(error) => return Some(Err(error)),
            }
        }
        let value = self.cache[self.next_index].clone();
        self.next_index += 1;
        Some(Ok(value))
    }
}
