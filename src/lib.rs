//! # ctxindex
//!
//! Disk-backed, key-partitioned sampling indices for genomic mutation
//! contexts.
//!
//! The storage core maintains, for each key of a universe, a shuffled
//! append-only file of values (a *bucket*) inside an index directory, and
//! supports streaming reads, random access by ordinal, uniform sampling
//! with replacement, and without-replacement sampling through one-pass
//! random tours whose memory footprint is bounded by a configurable cache.
//!
//! Two concrete indices are built on the core:
//!
//! - [`sbs::SbsContextIndex`] keys genomic positions by their trinucleotide
//!   context, scanned from a FASTA genome;
//! - [`indel::IdContextIndex`] keys repetition references by their indel
//!   context, found by a suffix-array based detector of tandem repeats and
//!   micro-homologies.
//!
//! ## Example
//!
//! ```no_run
//! use ctxindex::progress::NoProgress;
//! use ctxindex::sbs::{SbsContextIndex, SbsIndexOptions};
//! use rand::rngs::SmallRng;
//! use rand::SeedableRng;
//!
//! # fn main() -> ctxindex::Result<()> {
//! let mut rng = SmallRng::seed_from_u64(0);
//! let options = SbsIndexOptions::default().cache_size(100 << 20);
//! let mut index: SbsContextIndex = SbsContextIndex::build(
//!     &mut rng,
//!     "sbs_index",
//!     "genome.fasta",
//!     &options,
//!     &mut NoProgress,
//! )?;
//!
//! let context: ctxindex::sbs::SbsContext = "ACT".parse()?;
//! index.boot_up_tours(&mut rng, &mut NoProgress)?;
//! let position = index.extract(&mut rng, &context)?;
//! println!("sampled {position}");
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod bucket;
pub mod error;
pub mod fasta;
pub mod genome;
pub mod indel;
pub mod index;
pub mod progress;
pub mod sbs;

pub use archive::DiskValue;
pub use bucket::{BucketReader, BucketWriter, RandomTour};
pub use error::{ConfigError, Error, HeaderError, ReadError, Result};
pub use index::{IndexKey, IndexReader, IndexWriter};
pub use progress::{LogProgress, NoProgress, Progress};
