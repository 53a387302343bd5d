//! Key-partitioned directories of buckets
//!
//! An index associates each key of a universe with one bucket of values,
//! all stored in a single directory: one bucket file per key plus a map
//! file recording the bucket prefix and the key set. [`IndexWriter`] builds
//! an index; [`IndexReader`] samples from it, with or without replacement,
//! optionally pooling keys into equivalence classes.

mod reader;
mod writer;

pub use reader::IndexReader;
pub use writer::IndexWriter;

use std::fmt::Display;
use std::path::{Path, PathBuf};

use crate::archive::DiskValue;

pub(crate) const INDEX_TAG: &str = "Index";
pub(crate) const INDEX_VERSION: u8 = 0;

pub(crate) const DATA_TAG: &str = "IndexData";
pub(crate) const DATA_VERSION: u8 = 0;

/// File name of the key map inside an index directory
pub const MAP_FILENAME: &str = "map.bin";

/// Default prefix of bucket file names
pub const DEFAULT_BUCKET_PREFIX: &str = "bucket";

/// A type usable as an index key
///
/// Keys serialize into the map file, name their bucket files through
/// `Display`, and define the equivalence class they are pooled with when
/// sampling across classes. The default class is the singleton.
pub trait IndexKey: DiskValue + Display + Ord {
    /// The keys pooled with `self` when sampling by class, `self` included
    fn sampling_class(&self) -> Vec<Self> {
        vec![self.clone()]
    }
}

impl IndexKey for String {}
impl IndexKey for u64 {}

pub(crate) fn map_path(dir: &Path) -> PathBuf {
    dir.join(MAP_FILENAME)
}
