//! Indel context and mutation-type descriptors

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use crate::archive::DiskValue;
use crate::error::{ConfigError, Error, Result};
use crate::genome::{complement, ChromosomeId, ChrPosition, GenomicPosition};
use crate::index::IndexKey;

/// The kind of repeated fragment an indel context describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FragmentType {
    /// A repeated sequence whose bases are all the same
    Homopolymer,
    /// A repeated sequence whose bases may differ
    Heteropolymer,
    /// A fragment followed by a sequence matching its prefix
    Microhomology,
}

impl FragmentType {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(Self::Homopolymer),
            1 => Ok(Self::Heteropolymer),
            2 => Ok(Self::Microhomology),
            other => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("invalid fragment type byte {other}"),
            )
            .into()),
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Self::Homopolymer => 0,
            Self::Heteropolymer => 1,
            Self::Microhomology => 2,
        }
    }
}

/// A repeated-sequence descriptor
///
/// The first-level code is the unit base for homopolymers and the unit (or
/// fragment) size otherwise; the second-level code is the number of
/// repetitions for polymers and the homology size for micro-homologies.
/// The textual form is `{number}{A|C|G|T|R|M}{number}`, e.g. `1A4` for four
/// repetitions of `A`, `2R3` for a dinucleotide repeated three times, and
/// `3M2` for a two-base homology at distance three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IdContext {
    ftype: FragmentType,
    fl_code: u8,
    sl_code: u8,
}

impl IdContext {
    pub(crate) fn from_codes(ftype: FragmentType, fl_code: u8, sl_code: u8) -> Self {
        Self {
            ftype,
            fl_code,
            sl_code,
        }
    }

    /// The context of a homopolymer run of `unit_base`
    pub fn for_homopolymer(unit_base: u8, num_of_repetitions: u8) -> Result<Self> {
        if !matches!(unit_base, b'A' | b'C' | b'G' | b'T') {
            return Err(ConfigError::InvalidBase(unit_base as char).into());
        }
        Ok(Self::from_codes(
            FragmentType::Homopolymer,
            unit_base,
            num_of_repetitions,
        ))
    }

    /// The context of a tandem repeat with a multi-base unit
    pub fn for_heteropolymer(unit_size: u8, num_of_repetitions: u8) -> Self {
        Self::from_codes(FragmentType::Heteropolymer, unit_size, num_of_repetitions)
    }

    /// The context of a micro-homology
    pub fn for_microhomology(homology_distance: u8, homology_size: u8) -> Self {
        Self::from_codes(FragmentType::Microhomology, homology_distance, homology_size)
    }

    pub fn fragment_type(&self) -> FragmentType {
        self.ftype
    }

    pub fn first_level_code(&self) -> u8 {
        self.fl_code
    }

    pub fn second_level_code(&self) -> u8 {
        self.sl_code
    }

    /// The unit base, for homopolymers
    pub fn unit_base(&self) -> Option<u8> {
        (self.ftype == FragmentType::Homopolymer).then_some(self.fl_code)
    }

    /// The unit size, for heteropolymers and micro-homologies
    pub fn unit_size(&self) -> Option<u8> {
        (self.ftype != FragmentType::Homopolymer).then_some(self.fl_code)
    }

    /// The number of repetitions, for polymers
    pub fn num_of_repetitions(&self) -> Option<u8> {
        (self.ftype != FragmentType::Microhomology).then_some(self.sl_code)
    }

    /// The homology size, for micro-homologies
    pub fn microhomology_size(&self) -> Option<u8> {
        (self.ftype == FragmentType::Microhomology).then_some(self.sl_code)
    }
}

impl fmt::Display for IdContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ftype {
            FragmentType::Homopolymer => write!(f, "1{}", self.fl_code as char)?,
            FragmentType::Heteropolymer => write!(f, "{}R", self.fl_code)?,
            FragmentType::Microhomology => write!(f, "{}M", self.fl_code)?,
        }
        write!(f, "{}", self.sl_code)
    }
}

impl FromStr for IdContext {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| -> Error {
            ConfigError::InvalidIdContext {
                input: s.to_string(),
                reason: reason.to_string(),
            }
            .into()
        };

        let digits = s.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 || digits + 1 > s.len() {
            return Err(invalid(
                "it should have the form {number}{character}{number}",
            ));
        }
        let first: u8 = s[..digits]
            .parse()
            .map_err(|_| invalid("the leading number does not fit a byte"))?;
        let symbol = s.as_bytes()[digits];
        let second: u8 = s[digits + 1..]
            .parse()
            .map_err(|_| invalid("the trailing number does not fit a byte"))?;

        let context = match symbol {
            b'A' | b'a' => Self::from_codes(FragmentType::Homopolymer, b'A', second),
            b'C' | b'c' => Self::from_codes(FragmentType::Homopolymer, b'C', second),
            b'G' | b'g' => Self::from_codes(FragmentType::Homopolymer, b'G', second),
            b'T' | b't' => Self::from_codes(FragmentType::Homopolymer, b'T', second),
            b'R' => Self::for_heteropolymer(first, second),
            b'M' => Self::for_microhomology(first, second),
            _ => {
                return Err(invalid(
                    "the separator should be one of 'A', 'C', 'G', 'T', 'R', 'M'",
                ))
            }
        };
        Ok(context)
    }
}

impl DiskValue for IdContext {
    const FIXED_SIZE: Option<usize> = Some(3);

    fn store<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.ftype.as_byte().store(writer)?;
        self.fl_code.store(writer)?;
        self.sl_code.store(writer)
    }

    fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let ftype = FragmentType::from_byte(u8::load(reader)?)?;
        let fl_code = u8::load(reader)?;
        let sl_code = u8::load(reader)?;
        Ok(Self {
            ftype,
            fl_code,
            sl_code,
        })
    }
}

/// A homopolymer pools with the run of the complementary base, which is
/// the same locus read from the opposite strand; other contexts stand
/// alone.
impl IndexKey for IdContext {
    fn sampling_class(&self) -> Vec<Self> {
        if self.ftype == FragmentType::Homopolymer {
            if let Ok(complemented) = complement(self.fl_code) {
                return vec![
                    *self,
                    Self::from_codes(FragmentType::Homopolymer, complemented, self.sl_code),
                ];
            }
        }
        vec![*self]
    }
}

/// An indel mutation type: a context plus the insertion/deletion direction
///
/// The textual form is `{number}:{Del|Ins}:{A|C|G|T|R|M}:{number}`, the
/// COSMIC-style indel classification label. For deletions of polymer
/// contexts, the trailing number counts the repetitions left after the
/// event, so parsing adds one to recover the reference repetition count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdType {
    context: IdContext,
    insertion: bool,
}

impl IdType {
    pub fn new(context: IdContext, insertion: bool) -> Self {
        Self { context, insertion }
    }

    pub fn context(&self) -> &IdContext {
        &self.context
    }

    pub fn is_insertion(&self) -> bool {
        self.insertion
    }

    pub fn is_deletion(&self) -> bool {
        !self.insertion
    }
}

/// Deletions order before insertions, then by context.
impl Ord for IdType {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.insertion
            .cmp(&other.insertion)
            .then_with(|| self.context.cmp(&other.context))
    }
}

impl PartialOrd for IdType {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = if self.insertion { "Ins" } else { "Del" };
        match self.context.fragment_type() {
            FragmentType::Homopolymer => write!(
                f,
                "1:{direction}:{}",
                self.context.first_level_code() as char
            )?,
            FragmentType::Heteropolymer => {
                write!(f, "{}:{direction}:R", self.context.first_level_code())?
            }
            FragmentType::Microhomology => {
                write!(f, "{}:{direction}:M", self.context.first_level_code())?
            }
        }
        write!(f, ":{}", self.context.second_level_code())
    }
}

impl FromStr for IdType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: String| -> Error {
            ConfigError::InvalidIdType {
                input: s.to_string(),
                reason,
            }
            .into()
        };
        let four_fields = || invalid("it should contain 4 fields separated by ':'".to_string());
        let parse_code = |field: &str| -> Result<u8> {
            match field.parse::<i64>() {
                Ok(code) if (0..=255).contains(&code) => Ok(code as u8),
                _ => Err(invalid(format!(
                    "\"{field}\" should be a number in the interval [0,255]"
                ))),
            }
        };

        if s.is_empty() || s.ends_with(':') {
            return Err(four_fields());
        }
        let fields: Vec<&str> = s.split(':').collect();
        if fields.len() != 4 {
            return Err(four_fields());
        }
        if fields[2].len() != 1 {
            return Err(invalid(format!(
                "\"{}\" should be a character among 'A', 'C', 'G', 'T', 'R', or 'M'",
                fields[2]
            )));
        }

        let symbol = fields[2].as_bytes()[0];
        let (ftype, fl_code) = match symbol {
            b'A' | b'C' | b'G' | b'T' => (FragmentType::Homopolymer, symbol),
            b'R' => (FragmentType::Heteropolymer, parse_code(fields[0])?),
            b'M' => (FragmentType::Microhomology, parse_code(fields[0])?),
            _ => {
                return Err(invalid(format!(
                    "\"{}\" should be a character among 'A', 'C', 'G', 'T', 'R', or 'M'",
                    fields[2]
                )))
            }
        };
        let mut sl_code = parse_code(fields[3])?;

        let insertion = match fields[1] {
            "Ins" => true,
            "Del" => {
                if ftype != FragmentType::Microhomology {
                    sl_code = sl_code.checked_add(1).ok_or_else(|| {
                        invalid(format!(
                            "\"{}\" should be a number in the interval [0,255]",
                            fields[3]
                        ))
                    })?;
                }
                false
            }
            other => {
                return Err(invalid(format!(
                    "\"{other}\" should be either \"Ins\" or \"Del\""
                )))
            }
        };

        Ok(Self {
            context: IdContext::from_codes(ftype, fl_code, sl_code),
            insertion,
        })
    }
}

/// One occurrence of a repeated sequence in the genome
///
/// Points to the first base of the repeat and carries the actual size of
/// its repeated unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RepetitionReference {
    pub position: GenomicPosition,
    pub unit_size: u8,
}

impl RepetitionReference {
    pub fn new(chr_id: ChromosomeId, begin: ChrPosition, unit_size: u8) -> Result<Self> {
        if unit_size == 0 {
            return Err(ConfigError::ZeroUnitSize.into());
        }
        Ok(Self {
            position: GenomicPosition::new(chr_id, begin),
            unit_size,
        })
    }
}

impl fmt::Display for RepetitionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.unit_size, self.position)
    }
}

impl DiskValue for RepetitionReference {
    const FIXED_SIZE: Option<usize> = Some(6);

    fn store<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.position.store(writer)?;
        self.unit_size.store(writer)
    }

    fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let position = GenomicPosition::load(reader)?;
        let unit_size = u8::load(reader)?;
        Ok(Self {
            position,
            unit_size,
        })
    }
}
