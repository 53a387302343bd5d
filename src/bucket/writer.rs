//! Buffered bucket writer with in-place uniform shuffling

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;

use super::BucketMeta;
use crate::archive::DiskValue;
use crate::error::{ConfigError, Result};
use crate::progress::Progress;

/// Simultaneously open shard files during an on-disk shuffle
///
/// Shards beyond this budget are reopened in append mode on demand, keeping
/// the writer within file-descriptor limits no matter how many shards the
/// split produces.
const MAX_OPEN_CHUNKS: usize = 64;

/// Appends values to a bucket file through a bounded write cache
///
/// Values accumulate in memory and reach the disk when the cache fills, on
/// an explicit [`flush`](BucketWriter::flush), or on drop. Insertion order
/// is preserved until [`shuffle`](BucketWriter::shuffle) rewrites the file
/// into a uniformly random permutation.
#[derive(Debug)]
pub struct BucketWriter<V: DiskValue> {
    meta: BucketMeta,
    cache: Vec<V>,
    capacity: usize,
}

impl<V: DiskValue> BucketWriter<V> {
    /// Opens a bucket file for appending, creating it when absent
    ///
    /// An existing file must carry a valid bucket header; appending resumes
    /// after its current values.
    ///
    /// # Arguments
    ///
    /// * `path` - The path of the bucket file
    /// * `cache_size` - The write cache budget in bytes; must hold at
    ///   least one value
    ///
    /// # Returns
    ///
    /// * `Ok(BucketWriter)` - A writer positioned after the existing values
    /// * `Err(Error)` - If the file or the cache budget is unusable
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * `cache_size` is smaller than one value slot
    /// * The path exists but is not a valid bucket file
    /// * The stored count disagrees with the data length
    pub fn create(path: impl Into<PathBuf>, cache_size: usize) -> Result<Self> {
        let path = path.into();
        let capacity = cache_capacity::<V>(cache_size)?;
        let meta = if path.exists() {
            let meta = BucketMeta::open(path)?;
            meta.check_invariant(V::FIXED_SIZE)?;
            meta
        } else {
            BucketMeta::create(path)?
        };
        Ok(Self {
            meta,
            cache: Vec::with_capacity(capacity),
            capacity,
        })
    }

    /// Appends a value, flushing first when the cache is full
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the value entered the cache
    /// * `Err(Error)` - If a triggered flush failed
    pub fn push(&mut self, value: V) -> Result<()> {
        if self.cache.len() == self.capacity {
            self.flush()?;
        }
        self.cache.push(value);
        self.meta.len += 1;
        Ok(())
    }

    /// Persists the value count and appends the cached values
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If count and values reached the file
    /// * `Err(Error)` - If writing failed or the size invariant broke
    pub fn flush(&mut self) -> Result<()> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.meta.path)?;
        file.seek(SeekFrom::Start(self.meta.size_pos))?;
        self.meta.len.store(&mut file)?;

        if self.cache.is_empty() {
            return Ok(());
        }

        file.seek(SeekFrom::End(0))?;
        let mut writer = BufWriter::new(&mut file);
        for value in &self.cache {
            value.store(&mut writer)?;
        }
        writer.flush()?;
        drop(writer);
        self.cache.clear();

        self.meta.final_pos = file.stream_position()?;
        self.meta.check_invariant(V::FIXED_SIZE)
    }

    /// Resizes the write cache to a new byte budget
    ///
    /// Flushes first when the cache currently holds more values than the new
    /// budget allows.
    ///
    /// # Arguments
    ///
    /// * `cache_size` - The new cache budget in bytes
    ///
    /// # Errors
    ///
    /// Returns an error if `cache_size` is smaller than one value slot, or
    /// if the triggered flush fails.
    pub fn set_cache_size(&mut self, cache_size: usize) -> Result<()> {
        let capacity = cache_capacity::<V>(cache_size)?;
        if self.cache.len() > capacity {
            self.flush()?;
        }
        self.capacity = capacity;
        Ok(())
    }

    /// The cache byte budget, rounded to whole values
    pub fn cache_size(&self) -> usize {
        self.capacity * V::slot_size()
    }

    pub fn len(&self) -> u64 {
        self.meta.len
    }

    pub fn is_empty(&self) -> bool {
        self.meta.len == 0
    }

    pub fn path(&self) -> &Path {
        &self.meta.path
    }

    /// Rewrites the bucket into a uniformly random permutation of its values
    ///
    /// When `buffer_size` bytes hold all values, the permutation is drawn in
    /// memory. Otherwise the values are first distributed into shard files
    /// under `tmp_dir` by uniform random bin-filling, then each shard is
    /// shuffled in memory and appended back; the resulting permutation is
    /// uniform as well. At no point do more than `buffer_size` bytes of
    /// values sit in memory. Empty buckets are left untouched.
    ///
    /// # Arguments
    ///
    /// * `rng` - The random number generator drawing the permutation
    /// * `buffer_size` - The shuffle buffer budget in bytes
    /// * `tmp_dir` - The directory that receives the shard files
    /// * `progress` - Receiver for periodic progress updates
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the bucket was rewritten in shuffled order
    /// * `Err(Error)` - If the shuffle failed; the bucket may be lost
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * `buffer_size` cannot hold two values in the on-disk mode
    /// * Reading, sharding, or rewriting the bucket fails
    pub fn shuffle<R: Rng>(
        &mut self,
        rng: &mut R,
        buffer_size: usize,
        tmp_dir: &Path,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        let buffered_values = buffer_size / V::slot_size();
        if buffered_values as u64 >= self.meta.len {
            self.shuffle_in_memory(rng, progress)
        } else {
            self.shuffle_on_disk(rng, buffer_size, tmp_dir, progress)
        }
    }

    fn shuffle_in_memory<R: Rng>(
        &mut self,
        rng: &mut R,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        self.flush()?;
        if self.meta.len == 0 {
            return Ok(());
        }

        let mut values: Vec<V> = Vec::with_capacity(self.meta.len as usize);
        let mut read_pos = self.meta.data_pos;
        self.meta
            .load_window(&mut values, self.meta.len as usize, &mut read_pos)?;
        values.shuffle(rng);
        progress.update_elapsed_time();

        self.rewrite_with(&values)?;
        progress.update_elapsed_time();
        Ok(())
    }

    fn shuffle_on_disk<R: Rng>(
        &mut self,
        rng: &mut R,
        buffer_size: usize,
        tmp_dir: &Path,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        self.flush()?;
        if self.meta.len == 0 {
            return Ok(());
        }

        // the byte budget is split between the shard loader and the reader
        let chunk_capacity = (buffer_size / 2) / V::slot_size();
        if chunk_capacity == 0 {
            return Err(ConfigError::ShuffleBufferTooSmall {
                required: 2 * V::slot_size(),
                given: buffer_size,
            }
            .into());
        }

        let chunk_paths = self.split_into_random_chunks(rng, chunk_capacity, tmp_dir, progress)?;

        std::fs::remove_file(&self.meta.path)?;
        let file = File::create(&self.meta.path)?;
        let mut writer = BufWriter::new(file);
        self.meta.write_header(&mut writer)?;

        let mut chunk: Vec<V> = Vec::with_capacity(chunk_capacity);
        for chunk_path in &chunk_paths {
            load_chunk(chunk_path, &mut chunk)?;
            std::fs::remove_file(chunk_path)?;
            chunk.shuffle(rng);
            for value in &chunk {
                value.store(&mut writer)?;
            }
            progress.update_elapsed_time();
        }
        writer.flush()?;
        drop(writer);

        self.meta.final_pos = std::fs::metadata(&self.meta.path)?.len();
        self.meta.check_invariant(V::FIXED_SIZE)
    }

    /// Distributes the bucket values into shard files of bounded size
    ///
    /// Each value is appended to one of the still-open shards drawn
    /// uniformly; a shard that reaches `chunk_capacity` values is closed to
    /// further draws. The split therefore produces a uniformly random
    /// partition with the exact shard capacities required.
    fn split_into_random_chunks<R: Rng>(
        &self,
        rng: &mut R,
        chunk_capacity: usize,
        tmp_dir: &Path,
        progress: &mut dyn Progress,
    ) -> Result<Vec<PathBuf>> {
        let num_chunks = ((self.meta.len - 1) / chunk_capacity as u64 + 1) as usize;
        let mut sink = ChunkSink::create(tmp_dir, num_chunks)?;
        let mut sizes = vec![0usize; num_chunks];
        let mut positions: Vec<usize> = (0..num_chunks).collect();
        let mut last = num_chunks - 1;

        let mut window: Vec<V> = Vec::with_capacity(chunk_capacity);
        let mut read_pos = self.meta.data_pos;
        let mut cursor = 0usize;
        for _ in 0..self.meta.len {
            if cursor == window.len() {
                self.meta
                    .load_window(&mut window, chunk_capacity, &mut read_pos)?;
                cursor = 0;
                progress.update_elapsed_time();
            }
            let slot = rng.random_range(0..=last);
            let index = positions[slot];
            sink.append(index, &window[cursor])?;
            cursor += 1;
            sizes[index] += 1;
            if sizes[index] == chunk_capacity {
                sink.finalize(index)?;
                positions.swap(slot, last);
                last = last.saturating_sub(1);
            }
        }
        sink.close_all()?;
        Ok(sink.into_paths())
    }

    fn rewrite_with(&mut self, values: &[V]) -> Result<()> {
        std::fs::remove_file(&self.meta.path)?;
        let file = File::create(&self.meta.path)?;
        let mut writer = BufWriter::new(file);
        self.meta.write_header(&mut writer)?;
        for value in values {
            value.store(&mut writer)?;
        }
        writer.flush()?;
        drop(writer);

        self.meta.final_pos = std::fs::metadata(&self.meta.path)?.len();
        self.meta.check_invariant(V::FIXED_SIZE)
    }
}

impl<V: DiskValue> Drop for BucketWriter<V> {
    fn drop(&mut self) {
        if let Err(error) = self.flush() {
            tracing::warn!(
                bucket = %self.meta.path.display(),
                %error,
                "failed to flush bucket on drop"
            );
        }
    }
}

fn cache_capacity<V: DiskValue>(cache_size: usize) -> Result<usize> {
    let slot = V::slot_size();
    if cache_size < slot {
        return Err(ConfigError::CacheTooSmall {
            required: slot,
            given: cache_size,
        }
        .into());
    }
    Ok(cache_size / slot)
}

fn load_chunk<V: DiskValue>(path: &Path, buffer: &mut Vec<V>) -> Result<()> {
    buffer.clear();
    let mut reader = BufReader::new(File::open(path)?);
    loop {
        if reader.fill_buf()?.is_empty() {
            return Ok(());
        }
        buffer.push(V::load(&mut reader)?);
    }
}

/// Shard files of an on-disk shuffle, with a bounded handle pool
struct ChunkSink {
    paths: Vec<PathBuf>,
    handles: Vec<Option<BufWriter<File>>>,
    open_handles: usize,
}

impl ChunkSink {
    /// Creates `count` empty shard files named by a monotonic counter
    ///
    /// Names already present in `tmp_dir` are skipped, never reused.
    fn create(tmp_dir: &Path, count: usize) -> Result<Self> {
        let mut paths = Vec::with_capacity(count);
        let mut serial = 0u64;
        for _ in 0..count {
            let path = loop {
                serial += 1;
                let candidate = tmp_dir.join(format!("tmp_chunk{serial}.tmp"));
                if !candidate.exists() {
                    break candidate;
                }
            };
            File::create(&path)?;
            paths.push(path);
        }
        let handles = (0..count).map(|_| None).collect();
        Ok(Self {
            paths,
            handles,
            open_handles: 0,
        })
    }

    fn append<V: DiskValue>(&mut self, index: usize, value: &V) -> Result<()> {
        if self.handles[index].is_none() {
            if self.open_handles >= MAX_OPEN_CHUNKS {
                self.close_all()?;
            }
            let file = OpenOptions::new().append(true).open(&self.paths[index])?;
            self.handles[index] = Some(BufWriter::new(file));
            self.open_handles += 1;
        }
        if let Some(writer) = self.handles[index].as_mut() {
            value.store(writer)?;
        }
        Ok(())
    }

    fn finalize(&mut self, index: usize) -> Result<()> {
        if let Some(mut writer) = self.handles[index].take() {
            writer.flush()?;
            self.open_handles -= 1;
        }
        Ok(())
    }

    fn close_all(&mut self) -> Result<()> {
        for handle in &mut self.handles {
            if let Some(mut writer) = handle.take() {
                writer.flush()?;
            }
        }
        self.open_handles = 0;
        Ok(())
    }

    fn into_paths(self) -> Vec<PathBuf> {
        self.paths
    }
}
