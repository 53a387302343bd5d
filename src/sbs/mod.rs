//! Single-base-substitution context indexing
//!
//! An SBS context is the 3-base window around a substitution site. The
//! index maps each context to the bucket of genomic positions where it
//! occurs, sampled from a FASTA scan and shuffled for randomized access.

mod context;
mod index;

pub use context::{ContextAutomaton, SbsContext};
pub use index::{SbsContextIndex, SbsIndexOptions, SBS_DATA_FILENAME};
