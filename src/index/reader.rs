//! Index sampling

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::{map_path, IndexKey, INDEX_TAG, INDEX_VERSION};
use crate::archive::{self, DiskValue};
use crate::bucket::{bucket_file_path, BucketReader, RandomTour};
use crate::error::{ConfigError, ReadError, Result};
use crate::progress::Progress;

/// Samples values from a built index directory
///
/// Opening a reader loads the map file and one [`BucketReader`] per key,
/// each budgeted an equal share of the total cache. Two sampling modes
/// exist per key: [`choose`](IndexReader::choose) draws with replacement;
/// [`extract`](IndexReader::extract) advances the key's random tour, so a
/// value extracted once is not drawn again until [`reset`](IndexReader::reset).
/// The `*_from_class` variants pool a key's whole equivalence class and
/// sample proportionally to the per-key availability.
#[derive(Debug)]
pub struct IndexReader<K: IndexKey, V: DiskValue, R: Rng + SeedableRng + Clone = SmallRng> {
    dir: PathBuf,
    cache_size: usize,
    prefix: String,
    buckets: BTreeMap<K, BucketReader<V>>,
    tours: BTreeMap<K, RandomTour<V, R>>,
}

impl<K: IndexKey, V: DiskValue, R: Rng + SeedableRng + Clone> IndexReader<K, V, R> {
    /// Opens an index directory
    ///
    /// # Arguments
    ///
    /// * `dir` - The index directory written by an [`IndexWriter`](crate::index::IndexWriter)
    /// * `cache_size` - The total read cache budget in bytes, divided
    ///   equally across the buckets
    ///
    /// # Returns
    ///
    /// * `Ok(IndexReader)` - A reader over the validated index
    /// * `Err(Error)` - If the directory or its map file is unusable
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * `cache_size` is zero
    /// * The directory or its map file does not exist
    /// * The map file or a bucket file fails validation
    pub fn open(dir: impl Into<PathBuf>, cache_size: usize) -> Result<Self> {
        let dir = dir.into();
        if cache_size == 0 {
            return Err(ConfigError::ZeroCacheSize.into());
        }
        if !dir.is_dir() {
            return Err(ReadError::MissingDirectory(dir).into());
        }
        let map_file = map_path(&dir);
        if !map_file.is_file() {
            return Err(ReadError::MissingMap(map_file).into());
        }

        let mut reader = BufReader::new(File::open(&map_file)?);
        archive::read_tag(&mut reader, INDEX_TAG, INDEX_VERSION)?;
        let prefix = String::load(&mut reader)?;
        let num_keys = u64::load(&mut reader)?;

        let mut buckets = BTreeMap::new();
        if num_keys > 0 {
            let per_bucket = cache_size / num_keys as usize;
            for _ in 0..num_keys {
                let key = K::load(&mut reader)?;
                let bucket_path = bucket_file_path(&dir, &prefix, &key);
                buckets.insert(key, BucketReader::open(bucket_path, per_bucket)?);
            }
        }

        Ok(Self {
            dir,
            cache_size,
            prefix,
            buckets,
            tours: BTreeMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn bucket_prefix(&self) -> &str {
        &self.prefix
    }

    pub fn num_keys(&self) -> usize {
        self.buckets.len()
    }

    /// The index keys, in map order
    pub fn keys(&self) -> Vec<K> {
        self.buckets.keys().cloned().collect()
    }

    /// The bucket of values associated with `key`
    ///
    /// # Returns
    ///
    /// * `Ok(&BucketReader)` - The key's bucket
    /// * `Err(Error)` - If the key is not in the index
    pub fn bucket(&self, key: &K) -> Result<&BucketReader<V>> {
        self.buckets
            .get(key)
            .ok_or_else(|| ReadError::UnknownKey(key.to_string()).into())
    }

    /// The number of values associated with `key` (zero for absent keys)
    pub fn num_of_values(&self, key: &K) -> u64 {
        self.buckets.get(key).map_or(0, BucketReader::len)
    }

    /// The number of values still extractable for `key`
    ///
    /// Equals the remaining count of the key's tour once one has started,
    /// the full bucket size otherwise, and zero for absent keys.
    pub fn extractable_for(&self, key: &K) -> u64 {
        if let Some(tour) = self.tours.get(key) {
            return tour.remaining();
        }
        self.num_of_values(key)
    }

    /// Starts the tour of every key that has none yet
    ///
    /// Each tour is seeded by one draw from `rng` and loads its first
    /// window, so subsequent extractions only pay for cache reloads.
    ///
    /// # Arguments
    ///
    /// * `rng` - The generator providing one seed per key
    /// * `progress` - Receiver for per-key progress updates
    ///
    /// # Errors
    ///
    /// Returns an error if starting a tour fails, typically on I/O.
    pub fn boot_up_tours(&mut self, rng: &mut R, progress: &mut dyn Progress) -> Result<()> {
        progress.set_progress(0, Some("booting index tours"));
        let keys = self.keys();
        let total = keys.len();
        for (done, key) in keys.into_iter().enumerate() {
            if !self.tours.contains_key(&key) {
                self.start_tour_for(rng, &key)?;
            }
            progress.set_progress((100 * (done + 1) / total.max(1)) as u8, None);
        }
        Ok(())
    }

    fn start_tour_for(&mut self, rng: &mut R, key: &K) -> Result<()> {
        let bucket = self.bucket(key)?;
        let per_bucket = self.cache_size / self.buckets.len();
        let tour_rng = R::seed_from_u64(rng.random::<u64>());
        let tour = bucket.random_tour_with_cache(tour_rng, per_bucket)?;
        self.tours.insert(key.clone(), tour);
        Ok(())
    }

    /// Extracts the next value of `key`'s random tour
    ///
    /// The value stays in the index but is not drawn again before
    /// [`reset`](IndexReader::reset).
    ///
    /// # Arguments
    ///
    /// * `rng` - The generator seeding the tour on its first use for `key`
    /// * `key` - The key to extract from
    ///
    /// # Returns
    ///
    /// * `Ok(value)` - The next value of the key's randomized enumeration
    /// * `Err(Error)` - If nothing can be extracted
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The key is not in the index
    /// * The key's tour is exhausted
    /// * Reloading the tour window fails
    pub fn extract(&mut self, rng: &mut R, key: &K) -> Result<V> {
        if !self.tours.contains_key(key) {
            self.start_tour_for(rng, key)?;
        }
        let tour = self
            .tours
            .get_mut(key)
            .ok_or_else(|| ReadError::UnknownKey(key.to_string()))?;
        match tour.next_value()? {
            Some(value) => Ok(value),
            None => Err(ReadError::NoMoreValues(key.to_string()).into()),
        }
    }

    /// Draws one of `key`'s values uniformly, with replacement
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not in the index or its bucket is
    /// empty.
    pub fn choose(&self, rng: &mut R, key: &K) -> Result<V> {
        self.bucket(key)?.choose(rng)
    }

    /// The number of values associated with the class of `key`
    pub fn num_of_class_values(&self, key: &K) -> u64 {
        key.sampling_class()
            .iter()
            .map(|class_key| self.num_of_values(class_key))
            .sum()
    }

    /// The number of values still extractable from the class of `key`
    pub fn extractable_from_class(&self, key: &K) -> u64 {
        key.sampling_class()
            .iter()
            .map(|class_key| self.extractable_for(class_key))
            .sum()
    }

    /// Extracts a value from the equivalence class of `key`
    ///
    /// The source key is drawn with probability proportional to its number
    /// of still-extractable values, making the draw uniform over the
    /// class's remaining values.
    ///
    /// # Arguments
    ///
    /// * `rng` - The generator weighting the class members
    /// * `key` - Any representative of the class
    ///
    /// # Returns
    ///
    /// * `Ok((key, value))` - The source key and the extracted value
    /// * `Err(Error)` - If the class has no extractable value left
    pub fn extract_from_class(&mut self, rng: &mut R, key: &K) -> Result<(K, V)> {
        let class = key.sampling_class();
        let available: u64 = class
            .iter()
            .map(|class_key| self.extractable_for(class_key))
            .sum();
        if available == 0 {
            return Err(ReadError::EmptyClass(key.to_string()).into());
        }

        let mut pos = rng.random_range(0..available);
        for class_key in &class {
            let available_for = self.extractable_for(class_key);
            if pos < available_for {
                let value = self.extract(rng, class_key)?;
                return Ok((class_key.clone(), value));
            }
            pos -= available_for;
        }
        let value = self.extract(rng, key)?;
        Ok((key.clone(), value))
    }

    /// Draws a value from the equivalence class of `key`, with replacement
    ///
    /// The source key is weighted by its still-extractable count, exactly
    /// as in [`extract_from_class`](IndexReader::extract_from_class).
    ///
    /// # Returns
    ///
    /// * `Ok((key, value))` - The source key and the drawn value, which
    ///   stays available
    /// * `Err(Error)` - If the class has no extractable value left
    pub fn choose_from_class(&self, rng: &mut R, key: &K) -> Result<(K, V)> {
        let class = key.sampling_class();
        let available: u64 = class
            .iter()
            .map(|class_key| self.extractable_for(class_key))
            .sum();
        if available == 0 {
            return Err(ReadError::EmptyClass(key.to_string()).into());
        }

        let mut pos = rng.random_range(0..available);
        for class_key in &class {
            let available_for = self.extractable_for(class_key);
            if pos < available_for {
                let value = self.choose(rng, class_key)?;
                return Ok((class_key.clone(), value));
            }
            pos -= available_for;
        }
        let value = self.choose(rng, key)?;
        Ok((key.clone(), value))
    }

    /// Discards every tour; all values become extractable again
    pub fn reset(&mut self) {
        self.tours.clear();
    }
}

#[cfg(test)]
mod testing {
    use std::collections::BTreeSet;

    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::index::IndexWriter;
    use crate::progress::NoProgress;

    /// Two-key universe pooling "hot" with "cold"
    #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
    struct PairedKey(String);

    impl std::fmt::Display for PairedKey {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl DiskValue for PairedKey {
        const FIXED_SIZE: Option<usize> = None;

        fn store<W: std::io::Write>(&self, writer: &mut W) -> Result<()> {
            self.0.store(writer)
        }

        fn load<R2: std::io::Read>(reader: &mut R2) -> Result<Self> {
            Ok(Self(String::load(reader)?))
        }

        fn disk_size(&self) -> usize {
            self.0.disk_size()
        }
    }

    impl IndexKey for PairedKey {
        fn sampling_class(&self) -> Vec<Self> {
            match self.0.as_str() {
                "hot" => vec![self.clone(), PairedKey("cold".into())],
                "cold" => vec![PairedKey("hot".into()), self.clone()],
                _ => vec![self.clone()],
            }
        }
    }

    fn build_index(dir: &Path, sizes: &[(&str, u64)]) -> Result<()> {
        let mut writer = IndexWriter::<PairedKey, u64>::create(dir, 8192)?;
        let mut next = 0u64;
        for &(key, count) in sizes {
            for _ in 0..count {
                writer.insert(PairedKey(key.into()), next)?;
                next += 1;
            }
        }
        writer.finish()
    }

    #[test]
    fn reopened_index_matches_what_was_written() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index_dir = dir.path().join("index");
        build_index(&index_dir, &[("hot", 120), ("cold", 30), ("lone", 7)])?;

        let reader: IndexReader<PairedKey, u64> = IndexReader::open(&index_dir, 8192)?;
        assert_eq!(reader.num_keys(), 3);
        assert_eq!(
            reader.keys(),
            vec![
                PairedKey("cold".into()),
                PairedKey("hot".into()),
                PairedKey("lone".into())
            ]
        );
        assert_eq!(reader.num_of_values(&PairedKey("hot".into())), 120);
        assert_eq!(reader.num_of_values(&PairedKey("cold".into())), 30);
        assert_eq!(reader.num_of_values(&PairedKey("lone".into())), 7);
        assert_eq!(reader.num_of_values(&PairedKey("absent".into())), 0);
        Ok(())
    }

    #[test]
    fn missing_directory_and_map_are_distinct_failures() {
        let dir = tempfile::TempDir::new().unwrap();
        let absent = dir.path().join("nope");
        assert!(matches!(
            IndexReader::<PairedKey, u64>::open(&absent, 64).unwrap_err(),
            crate::error::Error::Read(ReadError::MissingDirectory(_))
        ));

        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        assert!(matches!(
            IndexReader::<PairedKey, u64>::open(&empty, 64).unwrap_err(),
            crate::error::Error::Read(ReadError::MissingMap(_))
        ));
    }

    #[test]
    fn extraction_exhausts_each_key_exactly_once() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index_dir = dir.path().join("index");
        build_index(&index_dir, &[("lone", 25)])?;

        let mut reader: IndexReader<PairedKey, u64> = IndexReader::open(&index_dir, 8192)?;
        let key = PairedKey("lone".into());
        let mut rng = SmallRng::seed_from_u64(0);

        assert_eq!(reader.extractable_for(&key), 25);
        let mut seen = BTreeSet::new();
        for _ in 0..25 {
            assert!(seen.insert(reader.extract(&mut rng, &key)?));
        }
        assert_eq!(reader.extractable_for(&key), 0);
        assert!(matches!(
            reader.extract(&mut rng, &key).unwrap_err(),
            crate::error::Error::Read(ReadError::NoMoreValues(_))
        ));

        // a reset starts a fresh tour over the full bucket
        reader.reset();
        assert_eq!(reader.extractable_for(&key), 25);
        assert!(reader.extract(&mut rng, &key).is_ok());
        Ok(())
    }

    #[test]
    fn boot_up_starts_every_tour() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index_dir = dir.path().join("index");
        build_index(&index_dir, &[("hot", 10), ("cold", 5), ("lone", 3)])?;

        let mut reader: IndexReader<PairedKey, u64> = IndexReader::open(&index_dir, 8192)?;
        let mut rng = SmallRng::seed_from_u64(0);
        reader.boot_up_tours(&mut rng, &mut NoProgress)?;
        for key in ["hot", "cold", "lone"] {
            assert_eq!(
                reader.extractable_for(&PairedKey(key.into())),
                reader.num_of_values(&PairedKey(key.into()))
            );
        }
        Ok(())
    }

    #[test]
    fn class_counts_aggregate_over_members() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index_dir = dir.path().join("index");
        build_index(&index_dir, &[("hot", 120), ("cold", 30), ("lone", 7)])?;

        let reader: IndexReader<PairedKey, u64> = IndexReader::open(&index_dir, 8192)?;
        assert_eq!(reader.num_of_class_values(&PairedKey("hot".into())), 150);
        assert_eq!(reader.num_of_class_values(&PairedKey("cold".into())), 150);
        assert_eq!(reader.num_of_class_values(&PairedKey("lone".into())), 7);
        assert_eq!(reader.extractable_from_class(&PairedKey("hot".into())), 150);
        Ok(())
    }

    #[test]
    fn class_extraction_is_proportional_and_representative_free() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index_dir = dir.path().join("index");
        build_index(&index_dir, &[("hot", 120), ("cold", 30)])?;

        let mut reader: IndexReader<PairedKey, u64> = IndexReader::open(&index_dir, 8192)?;
        let mut rng = SmallRng::seed_from_u64(0);

        // drawing through either representative must behave identically
        let mut from_hot = 0u64;
        let mut drawn = BTreeSet::new();
        for round in 0..150 {
            let representative = if round % 2 == 0 { "hot" } else { "cold" };
            let (key, value) =
                reader.extract_from_class(&mut rng, &PairedKey(representative.into()))?;
            if key.0 == "hot" {
                from_hot += 1;
            }
            assert!(drawn.insert(value));
        }
        assert_eq!(from_hot, 120);
        assert_eq!(drawn.len(), 150);

        assert_eq!(reader.extractable_from_class(&PairedKey("hot".into())), 0);
        assert!(matches!(
            reader
                .extract_from_class(&mut rng, &PairedKey("cold".into()))
                .unwrap_err(),
            crate::error::Error::Read(ReadError::EmptyClass(_))
        ));
        Ok(())
    }

    #[test]
    fn class_choose_respects_weights() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index_dir = dir.path().join("index");
        // 90/10 split: the heavy key must dominate draws
        build_index(&index_dir, &[("hot", 900), ("cold", 100)])?;

        let reader: IndexReader<PairedKey, u64> = IndexReader::open(&index_dir, 8192)?;
        let mut rng = SmallRng::seed_from_u64(0);
        let mut from_hot = 0usize;
        const ROUNDS: usize = 2_000;
        for _ in 0..ROUNDS {
            let (key, _) = reader.choose_from_class(&mut rng, &PairedKey("cold".into()))?;
            if key.0 == "hot" {
                from_hot += 1;
            }
        }
        let share = from_hot as f64 / ROUNDS as f64;
        assert!(
            (0.85..0.95).contains(&share),
            "heavy key drawn {share} of the time (expected about 0.9)"
        );
        Ok(())
    }
}
