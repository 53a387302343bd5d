//! FASTA chromosome streaming
//!
//! Thin adapter between the `seq_io` FASTA parser and the index builders:
//! records whose name decodes to a chromosome are yielded with their
//! upper-cased nucleotide sequence, everything else is skipped.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use seq_io::fasta::{Reader, Record};

use crate::error::Result;
use crate::genome::{decode_chromosome_name, ChromosomeId};

/// One chromosome read from a FASTA stream
#[derive(Debug, Clone)]
pub struct Chromosome {
    pub chr_id: ChromosomeId,
    /// Upper-case nucleotide sequence, newlines removed
    pub sequence: Vec<u8>,
}

/// Streams the chromosomes of a FASTA file in file order
pub struct ChromosomeReader {
    inner: Reader<BufReader<File>>,
    /// Total size of the underlying file, for progress estimates
    stream_size: u64,
}

impl ChromosomeReader {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let stream_size = std::fs::metadata(path)?.len();
        let file = File::open(path)?;
        Ok(Self {
            inner: Reader::new(BufReader::new(file)),
            stream_size,
        })
    }

    pub fn stream_size(&self) -> u64 {
        self.stream_size
    }

    /// Reads the next sequence whose name decodes to a chromosome
    ///
    /// Sequences with unrecognized names are skipped silently, matching the
    /// behaviour of genome-wide scans that ignore scaffolds and patches.
    pub fn next_chromosome(&mut self) -> Result<Option<Chromosome>> {
        while let Some(record) = self.inner.next() {
            let record = record?;
            let name = match record.id() {
                Ok(name) => name,
                Err(_) => continue,
            };
            let Some(chr_id) = decode_chromosome_name(name) else {
                tracing::debug!(sequence = name, "skipping non-chromosome sequence");
                continue;
            };
            let mut sequence = record.full_seq().into_owned();
            sequence.make_ascii_uppercase();
            return Ok(Some(Chromosome { chr_id, sequence }));
        }
        Ok(None)
    }
}
