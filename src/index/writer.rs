//! Index construction

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use rand::Rng;

use super::{map_path, IndexKey, DEFAULT_BUCKET_PREFIX, INDEX_TAG, INDEX_VERSION};
use crate::archive::{self, DiskValue};
use crate::bucket::{bucket_file_path, BucketWriter};
use crate::error::{ConfigError, Result};
use crate::progress::Progress;

/// Builds an index directory, one bucket per key
///
/// Buckets are created lazily on the first insertion of their key; the
/// total cache budget is redivided equally across all open buckets whenever
/// a new one appears. Dropping the writer saves the map file; prefer
/// [`finish`](IndexWriter::finish) to observe failures.
#[derive(Debug)]
pub struct IndexWriter<K: IndexKey, V: DiskValue> {
    dir: PathBuf,
    cache_size: usize,
    prefix: String,
    buckets: BTreeMap<K, BucketWriter<V>>,
    finished: bool,
}

impl<K: IndexKey, V: DiskValue> IndexWriter<K, V> {
    /// Creates the index directory and an empty index
    ///
    /// # Arguments
    ///
    /// * `dir` - The directory the index is created in; must not exist yet
    /// * `cache_size` - The total write cache budget in bytes
    ///
    /// # Returns
    ///
    /// * `Ok(IndexWriter)` - A writer over the freshly created directory
    /// * `Err(Error)` - If the directory exists or the budget is zero
    pub fn create(dir: impl Into<PathBuf>, cache_size: usize) -> Result<Self> {
        Self::with_prefix(dir, cache_size, DEFAULT_BUCKET_PREFIX)
    }

    /// Creates an index whose bucket files use a custom name prefix
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * `cache_size` is zero
    /// * The directory already exists
    /// * Creating the directory fails
    pub fn with_prefix(
        dir: impl Into<PathBuf>,
        cache_size: usize,
        prefix: impl Into<String>,
    ) -> Result<Self> {
        let dir = dir.into();
        if cache_size == 0 {
            return Err(ConfigError::ZeroCacheSize.into());
        }
        if dir.exists() {
            return Err(ConfigError::IndexDirectoryExists(dir).into());
        }
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            cache_size,
            prefix: prefix.into(),
            buckets: BTreeMap::new(),
            finished: false,
        })
    }

    /// Inserts a value into the bucket of `key`
    ///
    /// The first insertion of a key creates its bucket and rebalances the
    /// cache budget across all buckets.
    ///
    /// # Arguments
    ///
    /// * `key` - The key whose bucket receives the value
    /// * `value` - The value to append
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The key's bucket file already exists on disk
    /// * Rebalancing drops a bucket's cache below one value slot
    /// * Appending to the bucket fails
    pub fn insert(&mut self, key: K, value: V) -> Result<()> {
        if !self.buckets.contains_key(&key) {
            self.add_bucket_for(key.clone())?;
        }
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.push(value)?;
        }
        Ok(())
    }

    fn add_bucket_for(&mut self, key: K) -> Result<()> {
        let bucket_path = bucket_file_path(&self.dir, &self.prefix, &key);
        if bucket_path.exists() {
            return Err(ConfigError::BucketFileExists(bucket_path).into());
        }

        let per_bucket = self.cache_size / (self.buckets.len() + 1);
        for bucket in self.buckets.values_mut() {
            bucket.set_cache_size(per_bucket)?;
        }

        let bucket = BucketWriter::create(bucket_path, per_bucket)?;
        self.buckets.insert(key, bucket);
        Ok(())
    }

    /// Shuffles every bucket into a uniformly random order
    ///
    /// Buckets are flushed first, then shuffled one at a time with the full
    /// cache budget handed to each in turn.
    ///
    /// # Arguments
    ///
    /// * `rng` - The random number generator drawing the permutations
    /// * `tmp_dir` - The directory that receives shard files
    /// * `progress` - Receiver for per-bucket progress updates
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If every bucket was rewritten in shuffled order
    /// * `Err(Error)` - If flushing or shuffling a bucket failed
    pub fn shuffle<R: Rng>(
        &mut self,
        rng: &mut R,
        tmp_dir: &Path,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        progress.set_progress(0, Some("shuffling index"));
        for bucket in self.buckets.values_mut() {
            progress.update_elapsed_time();
            bucket.flush()?;
        }

        let total = self.buckets.len();
        for (done, (key, bucket)) in self.buckets.iter_mut().enumerate() {
            tracing::debug!(key = %key, values = bucket.len(), "shuffling bucket");
            bucket.shuffle(rng, self.cache_size, tmp_dir, progress)?;
            progress.set_progress((100 * (done + 1) / (total + 1)) as u8, None);
        }

        progress.set_progress(100, Some("index shuffled"));
        Ok(())
    }

    /// Flushes every bucket and writes the map file
    ///
    /// # Errors
    ///
    /// Returns an error if flushing a bucket or writing the map file fails.
    pub fn save_map(&mut self) -> Result<()> {
        for bucket in self.buckets.values_mut() {
            bucket.flush()?;
        }

        let mut writer = BufWriter::new(File::create(map_path(&self.dir))?);
        archive::write_tag(&mut writer, INDEX_TAG, INDEX_VERSION)?;
        self.prefix.store(&mut writer)?;
        (self.buckets.len() as u64).store(&mut writer)?;
        for key in self.buckets.keys() {
            key.store(&mut writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Saves the map file and consumes the writer
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the index is complete on disk
    /// * `Err(Error)` - If saving the map failed
    pub fn finish(mut self) -> Result<()> {
        self.save_map()?;
        self.finished = true;
        Ok(())
    }

    pub fn num_keys(&self) -> usize {
        self.buckets.len()
    }

    pub fn cache_size(&self) -> usize {
        self.cache_size
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bucket_prefix(&self) -> &str {
        &self.prefix
    }
}

impl<K: IndexKey, V: DiskValue> Drop for IndexWriter<K, V> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(error) = self.save_map() {
            tracing::warn!(
                index = %self.dir.display(),
                %error,
                "failed to save index map on drop"
            );
        }
    }
}

#[cfg(test)]
mod testing {
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::progress::NoProgress;

    #[test]
    fn existing_directory_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = IndexWriter::<String, u64>::create(dir.path(), 1024).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Config(ConfigError::IndexDirectoryExists(_))
        ));
    }

    #[test]
    fn zero_cache_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let err =
            IndexWriter::<String, u64>::create(dir.path().join("index"), 0).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Config(ConfigError::ZeroCacheSize)
        ));
    }

    #[test]
    fn buckets_appear_lazily() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index_dir = dir.path().join("index");

        let mut writer = IndexWriter::<String, u64>::create(&index_dir, 4096)?;
        assert_eq!(writer.num_keys(), 0);

        writer.insert("alpha".to_string(), 1)?;
        writer.insert("alpha".to_string(), 2)?;
        writer.insert("beta".to_string(), 3)?;
        assert_eq!(writer.num_keys(), 2);

        assert!(index_dir.join("bucket_alpha.bin").exists());
        assert!(index_dir.join("bucket_beta.bin").exists());
        writer.finish()?;
        assert!(index_dir.join(super::super::MAP_FILENAME).exists());
        Ok(())
    }

    #[test]
    fn preexisting_bucket_file_is_rejected() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index_dir = dir.path().join("index");

        let mut writer = IndexWriter::<String, u64>::create(&index_dir, 4096)?;
        std::fs::write(index_dir.join("bucket_alpha.bin"), b"stale")?;
        let err = writer.insert("alpha".to_string(), 1).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Config(ConfigError::BucketFileExists(_))
        ));
        Ok(())
    }

    #[test]
    fn rebalancing_below_a_value_slot_fails() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index_dir = dir.path().join("index");

        // 8 bytes total: fine for one u64 bucket, impossible for two
        let mut writer = IndexWriter::<String, u64>::create(&index_dir, 8)?;
        writer.insert("alpha".to_string(), 1)?;
        assert!(writer.insert("beta".to_string(), 2).is_err());
        Ok(())
    }

    #[test]
    fn shuffle_keeps_every_bucket_a_permutation() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index_dir = dir.path().join("index");

        let mut writer = IndexWriter::<String, u64>::create(&index_dir, 4096)?;
        for value in 0..500u64 {
            writer.insert(format!("k{}", value % 3), value)?;
        }

        let mut rng = SmallRng::seed_from_u64(0);
        writer.shuffle(&mut rng, dir.path(), &mut NoProgress)?;
        writer.finish()?;

        use std::collections::BTreeSet;
        let mut seen = BTreeSet::new();
        for key in 0..3u64 {
            let reader = crate::bucket::BucketReader::<u64>::open(
                index_dir.join(format!("bucket_k{key}.bin")),
                1024,
            )?;
            for value in reader.iter()? {
                assert!(seen.insert(value?));
            }
        }
        assert_eq!(seen, (0..500).collect::<BTreeSet<u64>>());
        Ok(())
    }
}
