//! Indel context index build and read paths

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use super::context::{IdContext, RepetitionReference};
use super::repeats::{collect_candidates, ShiftOrder};
use crate::archive::{self, DiskValue};
use crate::error::{ConfigError, Result};
use crate::fasta::ChromosomeReader;
use crate::genome::{
    chromosome_name, load_chr_lengths, split_by_chromosome, store_chr_lengths, ChrPosition,
    ChromosomeId, GenomicPosition, GenomicRegion, RegionWalker,
};
use crate::index::{IndexReader, IndexWriter, DATA_TAG, DATA_VERSION};
use crate::progress::Progress;

/// Ancillary data stored next to the buckets of an indel index
pub const ID_DATA_FILENAME: &str = "ID_context_index_data.bin";

/// Farthest second fragment considered by the micro-homology sweep
const MICROHOMOLOGY_SPAN: usize = 50;

/// Configuration of an indel index build
#[derive(Debug, Clone)]
pub struct IdIndexOptions {
    /// Largest repeated-unit size searched for by the detector
    pub max_unit_size: u8,
    /// Total cache budget in bytes, divided across the open buckets
    pub cache_size: usize,
    /// Directory for shuffle shard files; the system default when `None`
    pub tmp_dir: Option<PathBuf>,
    /// Closed genomic ranges whose bases are skipped by the detector
    pub regions_to_avoid: BTreeSet<GenomicRegion>,
}

impl Default for IdIndexOptions {
    fn default() -> Self {
        Self {
            max_unit_size: 50,
            cache_size: 10_000_000,
            tmp_dir: None,
            regions_to_avoid: BTreeSet::new(),
        }
    }
}

impl IdIndexOptions {
    #[must_use]
    pub fn max_unit_size(mut self, max_unit_size: u8) -> Self {
        self.max_unit_size = max_unit_size;
        self
    }

    #[must_use]
    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
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

fn unit_size_code(unit_size: usize) -> u8 {
    unit_size.min(5) as u8
}

fn repetitions_code(num_of_repetitions: usize) -> u8 {
    num_of_repetitions.min(6) as u8
}

fn homology_size_code(homology_size: usize) -> u8 {
    homology_size.min(5) as u8
}

/// Walks chromosome windows and feeds detected contexts to an index writer
struct IdContextCollector {
    writer: IndexWriter<IdContext, RepetitionReference>,
    max_unit_size: u8,
}

impl IdContextCollector {
    /// Processes a chromosome, one maximal clean window at a time
    ///
    /// A window is a run of unambiguous bases lying outside every avoided
    /// region; anything else splits the chromosome.
    fn add_chromosome(
        &mut self,
        chr_id: ChromosomeId,
        sequence: &[u8],
        regions_to_avoid: &[GenomicRegion],
        progress: &mut dyn Progress,
    ) -> Result<()> {
        let mut walker = RegionWalker::new(regions_to_avoid);
        let mut begin: ChrPosition = 1;
        let mut length = 0usize;
        for (offset, &symbol) in sequence.iter().enumerate() {
            let position = (offset + 1) as ChrPosition;
            let clean = matches!(symbol, b'A' | b'C' | b'G' | b'T')
                && !walker.is_avoided(&GenomicPosition::new(chr_id, position));
            if clean {
                if length == 0 {
                    begin = position;
                }
                length += 1;
            } else if length > 0 {
                let start = (begin - 1) as usize;
                self.add_window(chr_id, &sequence[start..start + length], begin, progress)?;
                length = 0;
            }
        }
        if length > 0 {
            let start = (begin - 1) as usize;
            self.add_window(chr_id, &sequence[start..start + length], begin, progress)?;
        }
        Ok(())
    }

    /// Runs the full detector over one clean window
    fn add_window(
        &mut self,
        chr_id: ChromosomeId,
        window: &[u8],
        begin: ChrPosition,
        progress: &mut dyn Progress,
    ) -> Result<()> {
        if window.len() < 2 {
            return Ok(());
        }
        let mut covered = self.add_tandem_repeats(chr_id, window, begin, progress)?;
        self.add_microhomologies(chr_id, window, begin, &covered)?;
        self.add_uncovered_contexts(chr_id, window, begin, &mut covered)
    }

    /// Detects tandem repeats through the doubling suffix-array levels
    ///
    /// Returns the coverage mask: every base belonging to a committed
    /// repeat (plus one trailing unit) is marked.
    fn add_tandem_repeats(
        &mut self,
        chr_id: ChromosomeId,
        window: &[u8],
        begin: ChrPosition,
        progress: &mut dyn Progress,
    ) -> Result<Vec<bool>> {
        let length = window.len();
        let mut covered = vec![false; length];
        let mut shifts = ShiftOrder::build(window);

        let h_max = (self.max_unit_size as usize).div_ceil(2).min(length);
        let mut h = 1usize;
        while h < h_max {
            self.add_level_repetitions(chr_id, window, begin, h, &shifts, &mut covered)?;
            shifts.promote(h);
            h = h.saturating_mul(2);
            progress.update_elapsed_time();
        }
        self.add_level_repetitions(chr_id, window, begin, h, &shifts, &mut covered)?;
        Ok(covered)
    }

    /// Commits the candidates of one level, keeping only growing extents
    ///
    /// Candidates are visited by increasing start position and unit size;
    /// a repeat is committed only when it extends farther than every
    /// previously committed repeat of the same unit size, which discards
    /// candidates fully contained in an earlier one.
    fn add_level_repetitions(
        &mut self,
        chr_id: ChromosomeId,
        window: &[u8],
        begin: ChrPosition,
        h: usize,
        shifts: &ShiftOrder,
        covered: &mut [bool],
    ) -> Result<()> {
        let candidates = collect_candidates(begin as u64, h, shifts);

        let mut extents: BTreeMap<usize, usize> = BTreeMap::new();
        for (&r_begin, units) in &candidates {
            for (&unit_size, &r_end) in units {
                let grows = match extents.get(&unit_size) {
                    Some(&extent) => extent < r_end,
                    None => true,
                };
                if grows {
                    extents.insert(unit_size, r_end);
                    self.add_repetition(chr_id, window, begin, unit_size, r_begin, r_end, covered)?;
                }
            }
        }
        Ok(())
    }

    /// Records one repeat and marks its bases covered
    ///
    /// Repeats whose first base sits at chromosome position 1 are skipped:
    /// an indel there has no upstream anchor base.
    #[allow(clippy::too_many_arguments)]
    fn add_repetition(
        &mut self,
        chr_id: ChromosomeId,
        window: &[u8],
        begin: ChrPosition,
        unit_size: usize,
        r_begin: usize,
        r_end: usize,
        covered: &mut [bool],
    ) -> Result<()> {
        let rep_begin = begin as u64 + r_begin as u64;
        if rep_begin > 1 {
            let num_of_repetitions = 1 + (r_end - r_begin) / unit_size;
            let position = GenomicPosition::new(chr_id, rep_begin as ChrPosition);
            self.add_polymer(position, num_of_repetitions, &window[r_begin..], unit_size)?;

            let fill_end = (r_end + unit_size).min(covered.len());
            covered[r_begin..fill_end].fill(true);
        }
        Ok(())
    }

    /// Inserts a polymer record: homopolymer for unit 1, heteropolymer
    /// otherwise
    fn add_polymer(
        &mut self,
        position: GenomicPosition,
        num_of_repetitions: usize,
        unit: &[u8],
        unit_size: usize,
    ) -> Result<()> {
        if unit_size == 0 {
            return Err(ConfigError::ZeroUnitSize.into());
        }
        let context = if unit_size == 1 {
            IdContext::for_homopolymer(unit[0], repetitions_code(num_of_repetitions))?
        } else {
            IdContext::for_heteropolymer(
                unit_size_code(unit_size),
                repetitions_code(num_of_repetitions),
            )
        };
        let reference = RepetitionReference::new(
            position.chr_id,
            position.position,
            unit_size.min(u8::MAX as usize) as u8,
        )?;
        self.writer.insert(context, reference)
    }

    /// Records a zero-repetition heteropolymer at an uncovered site
    fn add_null_heteropolymer(
        &mut self,
        chr_id: ChromosomeId,
        unit_size: usize,
        begin: ChrPosition,
        r_begin: usize,
    ) -> Result<()> {
        let position = (begin as u64 + r_begin as u64 + 1) as ChrPosition;
        let context = IdContext::for_heteropolymer(unit_size_code(unit_size), repetitions_code(0));
        let reference = RepetitionReference::new(chr_id, position, unit_size as u8)?;
        self.writer.insert(context, reference)
    }

    /// Records a zero-repetition homopolymer of `base` at an uncovered site
    fn add_null_homopolymer(
        &mut self,
        base: u8,
        chr_id: ChromosomeId,
        begin: ChrPosition,
        r_begin: usize,
    ) -> Result<()> {
        let position = (begin as u64 + r_begin as u64 + 1) as ChrPosition;
        self.add_polymer(GenomicPosition::new(chr_id, position), 0, &[base], 1)
    }

    /// Sweeps the uncovered bases for micro-homologies
    ///
    /// For each uncovered base, compares the sequence starting there with
    /// the sequences starting up to [`MICROHOMOLOGY_SPAN`] bases downstream;
    /// a shared prefix shorter than the distance is a micro-homology. The
    /// comparison stops at the first covered base on the downstream side.
    fn add_microhomologies(
        &mut self,
        chr_id: ChromosomeId,
        window: &[u8],
        begin: ChrPosition,
        covered: &[bool],
    ) -> Result<()> {
        let length = covered.len();
        if length < 3 {
            return Ok(());
        }
        for i in 1..length - 2 {
            if covered[i] {
                continue;
            }
            let limit = (length - 1).min(i + MICROHOMOLOGY_SPAN);
            let mut j = i + 2;
            while j < limit && !covered[j] {
                let mut size = 0usize;
                while j + size < limit
                    && !covered[j + size]
                    && window[i + size] == window[j + size]
                    && i + size < j
                {
                    size += 1;
                }
                if size >= 1 && i + size < j {
                    let context = IdContext::for_microhomology(
                        unit_size_code(j - i),
                        homology_size_code(size),
                    );
                    let reference = RepetitionReference::new(
                        chr_id,
                        begin + i as ChrPosition,
                        size.min(u8::MAX as usize) as u8,
                    )?;
                    self.writer.insert(context, reference)?;
                }
                j += 1;
            }
        }
        Ok(())
    }

    /// Emits the null contexts of the remaining uncovered spans
    ///
    /// Inside each maximal uncovered span, every position receives a
    /// single-repetition homopolymer record plus zero-repetition
    /// heteropolymers for unit sizes two to five, and homopolymer nulls at
    /// the eligible positions between two occurrences of the same base.
    /// These records let downstream samplers land on repeat-free loci.
    fn add_uncovered_contexts(
        &mut self,
        chr_id: ChromosomeId,
        window: &[u8],
        begin: ChrPosition,
        covered: &mut [bool],
    ) -> Result<()> {
        let mut begin_uncovered = 0usize;
        let mut last_seen = [0usize; 256];
        for i in 0..covered.len() {
            if covered[i] {
                if begin_uncovered != i {
                    for unit_size in 2..6usize {
                        let mut j = begin_uncovered;
                        while j + unit_size < i {
                            self.add_repetition(chr_id, window, begin, unit_size, j, j, covered)?;
                            self.add_null_heteropolymer(chr_id, unit_size, begin, j)?;
                            j += 1;
                        }
                    }
                }
                begin_uncovered = i + 1;
            } else {
                if begin_uncovered == i {
                    for base in [b'A', b'C', b'G', b'T'] {
                        last_seen[base as usize] = i;
                    }
                }
                let symbol = window[i] as usize;
                if last_seen[symbol] + 4 < i {
                    for j in last_seen[symbol] + 2..i - 2 {
                        self.add_null_homopolymer(window[i], chr_id, begin, j)?;
                    }
                }
                last_seen[symbol] = i;
                self.add_repetition(chr_id, window, begin, 1, i, i, covered)?;
            }
        }
        Ok(())
    }
}

/// Index mapping each indel context to its repetition references
///
/// Dereferences to the underlying [`IndexReader`]; the class of a
/// homopolymer context pools it with the complementary-base run.
pub struct IdContextIndex<R: Rng + SeedableRng + Clone = SmallRng> {
    index: IndexReader<IdContext, RepetitionReference, R>,
    chr_lengths: BTreeMap<ChromosomeId, u64>,
    max_unit_size: u8,
}

impl<R: Rng + SeedableRng + Clone> IdContextIndex<R> {
    /// Runs the repeat detector over a FASTA genome and builds the index
    pub fn build(
        rng: &mut R,
        index_dir: impl Into<PathBuf>,
        genome_fasta: impl AsRef<Path>,
        options: &IdIndexOptions,
        progress: &mut dyn Progress,
    ) -> Result<Self> {
        let index_dir = index_dir.into();
        let mut collector = IdContextCollector {
            writer: IndexWriter::create(&index_dir, options.cache_size)?,
            max_unit_size: options.max_unit_size,
        };

        let regions_by_chr = split_by_chromosome(&options.regions_to_avoid);
        let mut reader = ChromosomeReader::from_path(genome_fasta)?;
        let stream_size = reader.stream_size().max(1);

        let mut chr_lengths = BTreeMap::new();
        let mut scanned_bytes = 0u64;
        while let Some(chromosome) = reader.next_chromosome()? {
            let name = chromosome_name(chromosome.chr_id);
            progress.set_progress(
                (100 * scanned_bytes / stream_size) as u8,
                Some(&format!("processing chr {name}")),
            );
            tracing::info!(chromosome = %name, bases = chromosome.sequence.len(), "detecting repeats");

            let no_regions = Vec::new();
            let regions = regions_by_chr
                .get(&chromosome.chr_id)
                .unwrap_or(&no_regions);
            collector.add_chromosome(chromosome.chr_id, &chromosome.sequence, regions, progress)?;

            scanned_bytes += chromosome.sequence.len() as u64;
            chr_lengths.insert(chromosome.chr_id, chromosome.sequence.len() as u64);
        }

        progress.set_progress(100, Some("index initialised"));
        progress.init_new();

        let tmp_dir = options
            .tmp_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        collector.writer.shuffle(rng, &tmp_dir, progress)?;
        collector.writer.finish()?;

        write_index_data(
            &index_dir.join(ID_DATA_FILENAME),
            &chr_lengths,
            options.max_unit_size,
        )?;

        Self::open(index_dir, options.cache_size)
    }

    /// Opens an already built indel index
    pub fn open(index_dir: impl Into<PathBuf>, cache_size: usize) -> Result<Self> {
        let index_dir = index_dir.into();
        let index = IndexReader::open(&index_dir, cache_size)?;
        let (chr_lengths, max_unit_size) = read_index_data(&index_dir.join(ID_DATA_FILENAME))?;
        Ok(Self {
            index,
            chr_lengths,
            max_unit_size,
        })
    }

    /// The length of every indexed chromosome
    pub fn chromosome_lengths(&self) -> &BTreeMap<ChromosomeId, u64> {
        &self.chr_lengths
    }

    pub fn chromosome_ids(&self) -> Vec<ChromosomeId> {
        self.chr_lengths.keys().copied().collect()
    }

    /// The largest repeated-unit size the build searched for
    pub fn max_unit_size(&self) -> u8 {
        self.max_unit_size
    }
}

impl<R: Rng + SeedableRng + Clone> Deref for IdContextIndex<R> {
    type Target = IndexReader<IdContext, RepetitionReference, R>;

    fn deref(&self) -> &Self::Target {
        &self.index
    }
}

impl<R: Rng + SeedableRng + Clone> DerefMut for IdContextIndex<R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.index
    }
}

fn write_index_data(
    path: &Path,
    chr_lengths: &BTreeMap<ChromosomeId, u64>,
    max_unit_size: u8,
) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    archive::write_tag(&mut writer, DATA_TAG, DATA_VERSION)?;
    store_chr_lengths(&mut writer, chr_lengths)?;
    max_unit_size.store(&mut writer)?;
    writer.flush()?;
    Ok(())
}

fn read_index_data(path: &Path) -> Result<(BTreeMap<ChromosomeId, u64>, u8)> {
    let mut reader = BufReader::new(File::open(path)?);
    archive::read_tag(&mut reader, DATA_TAG, DATA_VERSION)?;
    let chr_lengths = load_chr_lengths(&mut reader)?;
    let max_unit_size = u8::load(&mut reader)?;
    Ok((chr_lengths, max_unit_size))
}

#[cfg(test)]
mod testing {
    use std::io::Write as _;

    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    use super::*;
    use crate::progress::NoProgress;

    fn write_fasta(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("genome.fa");
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        path
    }

    fn build_index(dir: &Path, fasta: &str) -> Result<IdContextIndex> {
        let fasta_path = write_fasta(dir, fasta);
        let mut rng = SmallRng::seed_from_u64(0);
        let options = IdIndexOptions::default().cache_size(65_536).tmp_dir(dir);
        IdContextIndex::build(
            &mut rng,
            dir.join("index"),
            &fasta_path,
            &options,
            &mut NoProgress,
        )
    }

    #[test]
    fn homopolymer_run_is_recorded_once() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        // the leading N keeps the run off position 1
        let index = build_index(dir.path(), ">1\nNTTTTTN\n")?;

        let run: IdContext = "1T5".parse()?;
        let bucket = index.bucket(&run)?;
        assert_eq!(bucket.len(), 1);
        let values: Result<Vec<RepetitionReference>> = bucket.iter()?.collect();
        assert_eq!(values?, vec![RepetitionReference::new(1, 2, 1)?]);
        Ok(())
    }

    #[test]
    fn dinucleotide_repeat_yields_both_phases() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index = build_index(dir.path(), ">1\nNACACACAN\n")?;

        // ACACACA: a three-fold AC repeat at position 2 and a three-fold
        // CA repeat at position 3
        let repeat: IdContext = "2R3".parse()?;
        let bucket = index.bucket(&repeat)?;
        assert_eq!(bucket.len(), 2);
        let values: Result<Vec<RepetitionReference>> = bucket.iter()?.collect();
        let mut values = values?;
        values.sort();
        assert_eq!(
            values,
            vec![
                RepetitionReference::new(1, 2, 2)?,
                RepetitionReference::new(1, 3, 2)?
            ]
        );

        // the repeat covers the whole window: no micro-homology, no nulls
        assert!(index.bucket(&"2R0".parse()?).is_err());
        Ok(())
    }

    #[test]
    fn covered_runs_leave_no_microhomologies() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index = build_index(dir.path(), ">1\nNTTTTTN\n")?;

        // the homopolymer run covers the window entirely, so the
        // micro-homology sweep finds nothing to compare
        for key in index.keys() {
            assert_ne!(
                key.fragment_type(),
                crate::indel::FragmentType::Microhomology
            );
        }
        Ok(())
    }

    #[test]
    fn long_unit_repeat_is_detected() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index = build_index(dir.path(), ">1\nNACGTACGTACGTN\n")?;

        // ACGT repeated three times, found at the unit-4 doubling level
        let repeat: IdContext = "4R3".parse()?;
        let bucket = index.bucket(&repeat)?;
        let values: Result<Vec<RepetitionReference>> = bucket.iter()?.collect();
        assert!(values?.contains(&RepetitionReference::new(1, 2, 4)?));
        Ok(())
    }

    #[test]
    fn uncovered_span_emits_null_contexts() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        // AGT stays uncovered in front of the covered C run
        let index = build_index(dir.path(), ">1\nNAGTCCCCCCN\n")?;

        let run: IdContext = "1C6".parse()?;
        let values: Result<Vec<RepetitionReference>> = index.bucket(&run)?.iter()?.collect();
        assert_eq!(values?, vec![RepetitionReference::new(1, 5, 1)?]);

        // the span in front of the run yields a zero-repetition
        // heteropolymer record one base into it
        let null: IdContext = "2R0".parse()?;
        let values: Result<Vec<RepetitionReference>> = index.bucket(&null)?.iter()?.collect();
        assert_eq!(values?, vec![RepetitionReference::new(1, 3, 2)?]);

        // each uncovered base also stands as a single-repetition run
        for (context, position) in [("1A1", 2u32), ("1G1", 3), ("1T1", 4)] {
            let context: IdContext = context.parse()?;
            let values: Result<Vec<RepetitionReference>> =
                index.bucket(&context)?.iter()?.collect();
            assert_eq!(values?, vec![RepetitionReference::new(1, position, 1)?]);
        }
        Ok(())
    }

    #[test]
    fn chromosome_metadata_round_trips() -> Result<()> {
        let dir = tempfile::TempDir::new().unwrap();
        let index = build_index(dir.path(), ">1\nNACACACAN\n>2\nNTTTTTN\n")?;

        assert_eq!(index.chromosome_ids(), vec![1, 2]);
        assert_eq!(index.chromosome_lengths()[&1], 9);
        assert_eq!(index.chromosome_lengths()[&2], 7);
        assert_eq!(index.max_unit_size(), 50);

        let reopened = IdContextIndex::<SmallRng>::open(dir.path().join("index"), 65_536)?;
        assert_eq!(reopened.max_unit_size(), 50);
        assert_eq!(reopened.chromosome_lengths(), index.chromosome_lengths());
        Ok(())
    }
}
