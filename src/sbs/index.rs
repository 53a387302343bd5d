//! SBS context index build and read paths

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::context::{ContextAutomaton, SbsContext, NUM_CONTEXT_CODES};
use crate::archive;
use crate::error::Result;
use crate::fasta::{Chromosome, ChromosomeReader};
use crate::genome::{
    chromosome_name, load_chr_lengths, split_by_chromosome, store_chr_lengths, ChrPosition,
    ChromosomeId, GenomicPosition, GenomicRegion, RegionWalker,
};
use crate::index::{IndexReader, IndexWriter, DATA_TAG, DATA_VERSION};
use crate::progress::Progress;

/// Ancillary data stored next to the buckets of an SBS index
pub const SBS_DATA_FILENAME: &str = "SBS_context_index_data.bin";

/// Positions scanned between two progress updates
const PROGRESS_STRIDE: ChrPosition = 1 << 22;

/// Configuration of an SBS index build
#[derive(Debug, Clone)]
pub struct SbsIndexOptions {
    /// Total cache budget in bytes, divided across the open buckets
    pub cache_size: usize,
    /// Record one occurrence of a context out of this many
    ///
    /// The counter is kept per context code; `1` records everything and is
    /// the validated setting.
    pub sampling_delta: u8,
    /// Directory for shuffle shard files; the system default when `None`
    pub tmp_dir: Option<PathBuf>,
    /// Closed genomic ranges whose bases are skipped by the scan
    pub regions_to_avoid: BTreeSet<GenomicRegion>,
}

impl Default for SbsIndexOptions {
    fn default() -> Self {
        Self {
            cache_size: 10_000_000,
            sampling_delta: 1,
            tmp_dir: None,
            regions_to_avoid: BTreeSet::new(),
        }
    }
}

impl SbsIndexOptions {
    #[must_use]
    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    #[must_use]
    pub fn sampling_delta(mut self, sampling_delta: u8) -> Self {
        self.sampling_delta = sampling_delta;
        self
    }

    #[must_use]
    pub fn tmp_dir(mut self, tmp_dir: impl Into<PathBuf>) -> Self {
        self.tmp_dir = Some(tmp_dir.into());
        self
    }

    #[must_use]
    pub fn regions_to_avoid(mut self, regions: BTreeSet<GenomicRegion>) -> Self {
        self.regions_to_avoid = regions;
        self
    }
}

/// Index mapping each trinucleotide context to its genomic positions
///
/// Dereferences to the underlying [`IndexReader`], so all sampling
/// operations (`extract`, `choose`, the class-pooled variants) are
/// available directly. The class of a context pools it with its reverse
/// complement.
pub struct SbsContextIndex<R: Rng + SeedableRng + Clone = SmallRng> {
    index: IndexReader<SbsContext, GenomicPosition, R>,
    chr_lengths: BTreeMap<ChromosomeId, u64>,
}

impl<R: Rng + SeedableRng + Clone> SbsContextIndex<R> {
    /// Scans a FASTA genome and builds the index at `index_dir`
    ///
    /// Every chromosome sequence is scanned left to right; wherever the
    /// last three bases form a context outside the avoided regions (and the
    /// skip-sampling rule admits the occurrence), the 1-based position of
    /// the window start is recorded under that context. Buckets are then
    /// shuffled and the map saved, and the freshly built index is reopened
    /// for reading.
    pub fn build(
        rng: &mut R,
        index_dir: impl Into<PathBuf>,
        genome_fasta: impl AsRef<Path>,
        options: &SbsIndexOptions,
        progress: &mut dyn Progress,
    ) -> Result<Self> {
        let index_dir = index_dir.into();
        let mut writer: IndexWriter<SbsContext, GenomicPosition> =
            IndexWriter::create(&index_dir, options.cache_size)?;

        let regions_by_chr = split_by_chromosome(&options.regions_to_avoid);
        let mut reader = ChromosomeReader::from_path(genome_fasta)?;
        let stream_size = reader.stream_size().max(1);

        let mut skipped = [0u64; NUM_CONTEXT_CODES];
        let mut chr_lengths = BTreeMap::new();
        let mut scanned_bytes = 0u64;
        while let Some(chromosome) = reader.next_chromosome()? {
            let name = chromosome_name(chromosome.chr_id);
            progress.set_progress(
                (100 * scanned_bytes / stream_size) as u8,
                Some(&format!("processing chr {name}")),
            );
            tracing::info!(chromosome = %name, bases = chromosome.sequence.len(), "scanning");

            let no_regions = Vec::new();
            let regions = regions_by_chr
                .get(&chromosome.chr_id)
                .unwrap_or(&no_regions);
            scan_chromosome(
                &mut writer,
                &chromosome,
                regions,
                &mut skipped,
                options.sampling_delta,
                scanned_bytes,
                stream_size,
                progress,
            )?;

            scanned_bytes += chromosome.sequence.len() as u64;
            chr_lengths.insert(chromosome.chr_id, chromosome.sequence.len() as u64);
        }

        progress.set_progress(100, Some("index initialised"));
        progress.init_new();

        let tmp_dir = options
            .tmp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        writer.shuffle(rng, &tmp_dir, progress)?;
        writer.finish()?;

        write_chr_lengths(&index_dir.join(SBS_DATA_FILENAME), &chr_lengths)?;

        Self::open(index_dir, options.cache_size)
    }

    /// Opens an already built SBS index
    pub fn open(index_dir: impl Into<PathBuf>, cache_size: usize) -> Result<Self> {
        let index_dir = index_dir.into();
        let index = IndexReader::open(&index_dir, cache_size)?;
        let chr_lengths = read_chr_lengths(&index_dir.join(SBS_DATA_FILENAME))?;
        Ok(Self { index, chr_lengths })
    }

    /// The length of every indexed chromosome
    pub fn chromosome_lengths(&self) -> &BTreeMap<ChromosomeId, u64> {
        &self.chr_lengths
    }

    /// The full extent of every indexed chromosome as a region
    pub fn chromosome_regions(&self) -> Vec<GenomicRegion> {
        self.chr_lengths
            .iter()
            .map(|(&chr_id, &length)| {
                GenomicRegion::new(GenomicPosition::new(chr_id, 1), length as ChrPosition)
            })
            .collect()
    }

    pub fn chromosome_ids(&self) -> Vec<ChromosomeId> {
        self.chr_lengths.keys().copied().collect()
    }
}

impl<R: Rng + SeedableRng + Clone> Deref for SbsContextIndex<R> {
    type Target = IndexReader<SbsContext, GenomicPosition, R>;

    fn deref(&self) -> &Self::Target {
        &self.index
    }
}

impl<R: Rng + SeedableRng + Clone> DerefMut for SbsContextIndex<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.index
    }
}

/// Scans one chromosome, inserting admitted context occurrences
///
/// Bases inside avoided regions are fed to the automaton as `N`, so no
/// context overlapping a region survives. A context becomes visible when
/// its third base is read; it is recorded at the position of its first
/// base, two before the read head.
#[allow(clippy::too_many_arguments)]
fn scan_chromosome(
    writer: &mut IndexWriter<SbsContext, GenomicPosition>,
    chromosome: &Chromosome,
    regions_to_avoid: &[GenomicRegion],
    skipped: &mut [u64; NUM_CONTEXT_CODES],
    sampling_delta: u8,
    scanned_bytes: u64,
    stream_size: u64,
    progress: &mut dyn Progress,
) -> Result<()> {
    let mut automaton = ContextAutomaton::new();
    let mut walker = RegionWalker::new(regions_to_avoid);
    for (offset, &symbol) in chromosome.sequence.iter().enumerate() {
        let position = (offset + 1) as ChrPosition;
        let masked = walker.is_avoided(&GenomicPosition::new(chromosome.chr_id, position));
        automaton.update(if masked { b'N' } else { symbol });

        if automaton.has_context() {
            let context = automaton.context();
            let counter = &mut skipped[context.code() as usize];
            *counter += 1;
            if *counter == sampling_delta as u64 {
                *counter = 0;
                writer.insert(
                    context,
                    GenomicPosition::new(chromosome.chr_id, position - 2),
                )?;
            }
        }

        if position % PROGRESS_STRIDE == 0 {
            progress.set_progress(
                (100 * (scanned_bytes + position as u64) / stream_size) as u8,
                None,
            );
        }
    }
    Ok(())
}

fn write_chr_lengths(path: &Path, chr_lengths: &BTreeMap<ChromosomeId, u64>) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    archive::write_tag(&mut writer, DATA_TAG, DATA_VERSION)?;
    store_chr_lengths(&mut writer, chr_lengths)?;
    writer.flush()?;
    Ok(())
}

fn read_chr_lengths(path: &Path) -> Result<BTreeMap<ChromosomeId, u64>> {
    let mut reader = BufReader::new(File::open(path)?);
    archive::read_tag(&mut reader, DATA_TAG, DATA_VERSION)?;
    load_chr_lengths(&mut reader)
}
