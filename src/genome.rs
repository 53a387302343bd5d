//! Genomic coordinates, regions, and nucleotide helpers

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::{Read, Write};

use crate::archive::DiskValue;
use crate::error::{ConfigError, Result};

/// Numeric chromosome identifier: 1-22 autosomes, 23 for X, 24 for Y
pub type ChromosomeId = u8;

/// 1-based position of a base on a chromosome
pub type ChrPosition = u32;

/// Decodes a FASTA sequence name into a chromosome identifier
///
/// Accepts a bare name (`"7"`, `"X"`) or one with the conventional `chr`
/// prefix (`"chr7"`, `"chrX"`), case-insensitively. Anything else (scaffolds,
/// mitochondrial sequences, patches) yields `None`.
pub fn decode_chromosome_name(name: &str) -> Option<ChromosomeId> {
    let name = name.trim();
    let bare = match name.get(..3) {
        Some(prefix) if prefix.eq_ignore_ascii_case("chr") => &name[3..],
        _ => name,
    };
    match bare {
        "X" | "x" => Some(23),
        "Y" | "y" => Some(24),
        _ => match bare.parse::<u8>() {
            Ok(n) if (1..=22).contains(&n) => Some(n),
            _ => None,
        },
    }
}

/// Renders a chromosome identifier in its conventional textual form
pub fn chromosome_name(chr_id: ChromosomeId) -> String {
    match chr_id {
        23 => "X".to_string(),
        24 => "Y".to_string(),
        n => n.to_string(),
    }
}

/// Tests for one of the four unambiguous DNA bases, either case
pub fn is_dna_base(symbol: u8) -> bool {
    matches!(
        symbol,
        b'A' | b'C' | b'G' | b'T' | b'a' | b'c' | b'g' | b't'
    )
}

/// Watson-Crick complement of an upper-case base
pub fn complement(base: u8) -> Result<u8> {
    match base {
        b'A' => Ok(b'T'),
        b'C' => Ok(b'G'),
        b'G' => Ok(b'C'),
        b'T' => Ok(b'A'),
        other => Err(ConfigError::InvalidBase(other as char).into()),
    }
}

/// A 1-based position on a chromosome
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenomicPosition {
    pub chr_id: ChromosomeId,
    pub position: ChrPosition,
}

impl GenomicPosition {
    pub fn new(chr_id: ChromosomeId, position: ChrPosition) -> Self {
        Self { chr_id, position }
    }
}

impl fmt::Display for GenomicPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", chromosome_name(self.chr_id), self.position)
    }
}

impl DiskValue for GenomicPosition {
    const FIXED_SIZE: Option<usize> = Some(5);

    fn store<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.chr_id.store(writer)?;
        self.position.store(writer)
    }

    fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let chr_id = u8::load(reader)?;
        let position = u32::load(reader)?;
        Ok(Self { chr_id, position })
    }
}

/// A closed interval of positions on one chromosome
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenomicRegion {
    chr_id: ChromosomeId,
    begin: ChrPosition,
    end: ChrPosition,
}

impl GenomicRegion {
    /// Builds the region covering `length` bases starting at `position`
    pub fn new(position: GenomicPosition, length: ChrPosition) -> Self {
        let length = length.max(1);
        Self {
            chr_id: position.chr_id,
            begin: position.position,
            end: position.position + length - 1,
        }
    }

    pub fn chromosome_id(&self) -> ChromosomeId {
        self.chr_id
    }

    pub fn begin(&self) -> ChrPosition {
        self.begin
    }

    pub fn end(&self) -> ChrPosition {
        self.end
    }

    pub fn length(&self) -> ChrPosition {
        self.end - self.begin + 1
    }

    /// Tests whether the region contains a genomic position
    pub fn contains(&self, position: &GenomicPosition) -> bool {
        self.chr_id == position.chr_id
            && self.begin <= position.position
            && position.position <= self.end
    }

    /// Tests whether the whole region precedes a genomic position
    pub fn ends_before(&self, position: &GenomicPosition) -> bool {
        self.chr_id < position.chr_id
            || (self.chr_id == position.chr_id && self.end < position.position)
    }
}

impl fmt::Display for GenomicRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}",
            chromosome_name(self.chr_id),
            self.begin,
            self.end
        )
    }
}

/// Serializes a chromosome-length map: a count then `(id, length)` pairs
pub(crate) fn store_chr_lengths<W: Write>(
    writer: &mut W,
    chr_lengths: &BTreeMap<ChromosomeId, u64>,
) -> Result<()> {
    (chr_lengths.len() as u64).store(writer)?;
    for (&chr_id, &length) in chr_lengths {
        chr_id.store(writer)?;
        length.store(writer)?;
    }
    Ok(())
}

pub(crate) fn load_chr_lengths<R: Read>(reader: &mut R) -> Result<BTreeMap<ChromosomeId, u64>> {
    let count = u64::load(reader)?;
    let mut chr_lengths = BTreeMap::new();
    for _ in 0..count {
        let chr_id = u8::load(reader)?;
        let length = u64::load(reader)?;
        chr_lengths.insert(chr_id, length);
    }
    Ok(chr_lengths)
}

/// Splits a region set into per-chromosome sorted lists
pub fn split_by_chromosome(
    regions: &BTreeSet<GenomicRegion>,
) -> BTreeMap<ChromosomeId, Vec<GenomicRegion>> {
    let mut split: BTreeMap<ChromosomeId, Vec<GenomicRegion>> = BTreeMap::new();
    for region in regions {
        split.entry(region.chromosome_id()).or_default().push(*region);
    }
    split
}

/// Masks region bases while walking a chromosome left to right
///
/// Positions are fed in increasing order; the walker advances through the
/// sorted region list and answers whether the current position falls inside
/// an avoided region.
pub struct RegionWalker<'a> {
    regions: &'a [GenomicRegion],
    next: usize,
}

impl<'a> RegionWalker<'a> {
    pub fn new(regions: &'a [GenomicRegion]) -> Self {
        Self { regions, next: 0 }
    }

    pub fn is_avoided(&mut self, position: &GenomicPosition) -> bool {
        while self.next < self.regions.len() && self.regions[self.next].ends_before(position) {
            self.next += 1;
        }
        self.next < self.regions.len() && self.regions[self.next].contains(position)
    }
}
