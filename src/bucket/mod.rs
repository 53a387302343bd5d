//! Append-only value files ("buckets") with randomized access paths
//!
//! A bucket stores a homogeneous collection of values in a single binary
//! file: a signature block, a 64-bit value count, then the serialized
//! values. Values keep their insertion order until a shuffle rewrites the
//! file into a uniformly random permutation. Buckets are written by one
//! [`BucketWriter`], then read by any number of [`BucketReader`]s, each
//! owning its file handles and caches.
//!
//! Three access paths exist on the read side: sequential iteration, ordinal
//! access for fixed-size values, and the one-pass [`RandomTour`] that emits
//! every value exactly once in uniformly random order while holding a
//! bounded number of values in memory.

mod reader;
mod tour;
mod writer;

pub use reader::{BucketIter, BucketReader};
pub use tour::RandomTour;
pub use writer::BucketWriter;

use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::archive::{self, DiskValue};
use crate::error::{ConfigError, HeaderError, Result};

pub(crate) const BUCKET_TAG: &str = "Bucket";
pub(crate) const BUCKET_VERSION: u8 = 0;

/// On-disk layout of one bucket file
///
/// `size_pos` is the byte offset of the value count, `data_pos` the offset
/// of the first value, `final_pos` the end of the file. New values always
/// append at `final_pos`.
#[derive(Debug, Clone)]
pub(crate) struct BucketMeta {
    pub path: PathBuf,
    pub size_pos: u64,
    pub data_pos: u64,
    pub final_pos: u64,
    pub len: u64,
}

impl BucketMeta {
    /// Reads the header of an existing bucket file
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.is_file() {
            return Err(ConfigError::NotABucketFile(path).into());
        }
        let final_pos = std::fs::metadata(&path)?.len();
        let mut reader = BufReader::new(File::open(&path)?);
        archive::read_tag(&mut reader, BUCKET_TAG, BUCKET_VERSION)?;
        let size_pos = archive::tag_len(BUCKET_TAG);
        let len = u64::load(&mut reader)?;
        Ok(Self {
            path,
            size_pos,
            data_pos: size_pos + 8,
            final_pos,
            len,
        })
    }

    /// Creates a fresh, empty bucket file
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut meta = Self {
            path,
            size_pos: 0,
            data_pos: 0,
            final_pos: 0,
            len: 0,
        };
        let mut file = File::create(&meta.path)?;
        meta.write_header(&mut file)?;
        file.flush()?;
        Ok(meta)
    }

    /// Writes the signature block and the current value count
    ///
    /// Resets `final_pos` to `data_pos`; the caller appends values next.
    pub fn write_header<W: Write>(&mut self, writer: &mut W) -> Result<()> {
        archive::write_tag(writer, BUCKET_TAG, BUCKET_VERSION)?;
        self.size_pos = archive::tag_len(BUCKET_TAG);
        self.len.store(writer)?;
        self.data_pos = self.size_pos + 8;
        self.final_pos = self.data_pos;
        Ok(())
    }

    /// Byte offset of the `i`-th value, for fixed-size values
    ///
    /// The caller guarantees `i < len` and a non-empty bucket.
    pub fn value_offset(&self, i: u64) -> u64 {
        self.data_pos + i * ((self.final_pos - self.data_pos) / self.len)
    }

    /// Checks that the data section holds exactly `len` values
    pub fn check_invariant(&self, fixed_size: Option<usize>) -> Result<()> {
        if let Some(size) = fixed_size {
            let bytes = self.final_pos - self.data_pos;
            if self.len * size as u64 != bytes {
                return Err(HeaderError::LengthMismatch {
                    stored: self.len,
                    bytes,
                }
                .into());
            }
        }
        Ok(())
    }

    /// Fills `buffer` with up to `capacity` values starting at `read_pos`
    ///
    /// Opens the file for the duration of the call and reads up to the
    /// current end of file, so a reader sees whatever a live writer has
    /// flushed.
    ///
    /// # Arguments
    ///
    /// * `buffer` - The window buffer, cleared and refilled
    /// * `capacity` - The maximum number of values to load
    /// * `read_pos` - The file offset to read from, advanced past the
    ///   loaded values
    ///
    /// # Returns
    ///
    /// * `Ok(count)` - The number of values loaded; zero at end of file
    /// * `Err(Error)` - If opening, seeking, or reading failed
    pub fn load_window<V: DiskValue>(
        &self,
        buffer: &mut Vec<V>,
        capacity: usize,
        read_pos: &mut u64,
    ) -> Result<usize> {
        buffer.clear();
        let end = std::fs::metadata(&self.path)?.len();
        if *read_pos < self.data_pos {
            *read_pos = self.data_pos;
        } else if *read_pos >= end {
            return Ok(0);
        }
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(*read_pos))?;
        while buffer.len() < capacity && *read_pos < end {
            let value = V::load(&mut reader)?;
            *read_pos += value.disk_size() as u64;
            buffer.push(value);
        }
        Ok(buffer.len())
    }

    /// Fills `buffer` reading circularly from `read_pos`
    ///
    /// The read wraps from `final_pos` back to `data_pos` and stops when it
    /// reaches `stop_pos` again.
    ///
    /// # Arguments
    ///
    /// * `buffer` - The window buffer, cleared and refilled
    /// * `capacity` - The maximum number of values to load
    /// * `read_pos` - The file offset to read from, advanced (and wrapped)
    ///   past the loaded values
    /// * `stop_pos` - The offset at which the circular read ends
    /// * `first` - Must be set on the initial load, which may begin exactly
    ///   at `stop_pos`
    ///
    /// # Returns
    ///
    /// * `Ok(count)` - The number of values loaded; zero once `stop_pos` is
    ///   reached again
    /// * `Err(Error)` - If opening, seeking, or reading failed
    pub fn load_window_circular<V: DiskValue>(
        &self,
        buffer: &mut Vec<V>,
        capacity: usize,
        read_pos: &mut u64,
        stop_pos: u64,
        mut first: bool,
    ) -> Result<usize> {
        buffer.clear();
        if self.len == 0 {
            return Ok(0);
        }
        if *read_pos < self.data_pos {
            *read_pos = self.data_pos;
        }
        let mut reader = BufReader::new(File::open(&self.path)?);
        reader.seek(SeekFrom::Start(*read_pos))?;
        while buffer.len() < capacity {
            if *read_pos >= self.final_pos {
                *read_pos = self.data_pos;
                reader.seek(SeekFrom::Start(*read_pos))?;
            }
            if *read_pos == stop_pos {
                if !first {
                    break;
                }
                first = false;
            }
            let value = V::load(&mut reader)?;
            *read_pos += value.disk_size() as u64;
            buffer.push(value);
        }
        Ok(buffer.len())
    }
}

/// Joins a directory, bucket prefix, and key into a bucket file path
pub(crate) fn bucket_file_path(
    dir: &Path,
    prefix: &str,
    key: &impl std::fmt::Display,
) -> PathBuf {
    dir.join(format!("{prefix}_{key}.bin"))
}

#[cfg(test)]
mod testing {
    use std::io::{Read, Seek, SeekFrom, Write};

    use super::*;

    #[test]
    fn fresh_bucket_header_round_trip() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bucket.bin");

        let created = BucketMeta::create(&path)?;
        assert_eq!(created.len, 0);
        assert_eq!(created.data_pos, created.final_pos);

        let opened = BucketMeta::open(&path)?;
        assert_eq!(opened.len, 0);
        assert_eq!(opened.size_pos, created.size_pos);
        assert_eq!(opened.data_pos, created.data_pos);
        Ok(())
    }

    #[test]
    fn foreign_file_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("junk.bin");
        std::fs::write(&path, b"not a bucket at all, definitely").unwrap();
        assert!(BucketMeta::open(&path).is_err());
    }

    #[test]
    fn missing_file_is_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(BucketMeta::open(dir.path().join("absent.bin")).is_err());
    }

    #[test]
    fn count_and_data_length_must_agree() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bucket.bin");

        let mut meta = BucketMeta::create(&path)?;
        {
            let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&path)?;
            file.seek(SeekFrom::Start(meta.size_pos))?;
            3u64.store(&mut file)?;
            file.seek(SeekFrom::End(0))?;
            for value in [1u64, 2, 3] {
                value.store(&mut file)?;
            }
        }
        meta = BucketMeta::open(&path)?;
        assert!(meta.check_invariant(u64::FIXED_SIZE).is_ok());

        // one trailing byte breaks the equality
        let mut file = std::fs::OpenOptions::new().append(true).open(&path)?;
        file.write_all(&[0])?;
        drop(file);
        let meta = BucketMeta::open(&path)?;
        assert!(meta.check_invariant(u64::FIXED_SIZE).is_err());
        Ok(())
    }

    #[test]
    fn windows_read_values_in_order() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bucket.bin");

        let mut meta = BucketMeta::create(&path)?;
        {
            let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&path)?;
            file.seek(SeekFrom::Start(meta.size_pos))?;
            5u64.store(&mut file)?;
            file.seek(SeekFrom::End(0))?;
            for value in 0..5u64 {
                value.store(&mut file)?;
            }
        }
        meta = BucketMeta::open(&path)?;

        let mut buffer = Vec::new();
        let mut read_pos = 0;
        let mut collected = Vec::new();
        loop {
            let loaded = meta.load_window::<u64>(&mut buffer, 2, &mut read_pos)?;
            if loaded == 0 {
                break;
            }
            collected.extend_from_slice(&buffer);
        }
        assert_eq!(collected, vec![0, 1, 2, 3, 4]);
        Ok(())
    }

    #[test]
    fn circular_window_wraps_and_stops() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bucket.bin");

        let mut meta = BucketMeta::create(&path)?;
        {
            let mut file = std::fs::OpenOptions::new().read(true).write(true).open(&path)?;
            file.seek(SeekFrom::Start(meta.size_pos))?;
            4u64.store(&mut file)?;
            file.seek(SeekFrom::End(0))?;
            for value in [10u64, 11, 12, 13] {
                value.store(&mut file)?;
            }
        }
        meta = BucketMeta::open(&path)?;

        // start in the middle: expect 12, 13, then wrap to 10, 11
        let start = meta.value_offset(2);
        let mut buffer = Vec::new();
        let mut read_pos = start;
        let loaded =
            meta.load_window_circular::<u64>(&mut buffer, 16, &mut read_pos, start, true)?;
        assert_eq!(loaded, 4);
        assert_eq!(buffer, vec![12, 13, 10, 11]);
        assert_eq!(read_pos, start);
        Ok(())
    }

    #[test]
    fn header_is_before_data() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bucket.bin");
        let meta = BucketMeta::create(&path)?;

        let mut file = File::open(&path)?;
        file.seek(SeekFrom::Start(meta.size_pos))?;
        let mut count = [0u8; 8];
        file.read_exact(&mut count)?;
        assert_eq!(u64::from_le_bytes(count), 0);
        assert_eq!(meta.data_pos, meta.size_pos + 8);
        Ok(())
    }
}
