//! Trinucleotide context codes and the scanning automaton

use std::fmt;
use std::io::{Read, Write};
use std::str::FromStr;

use crate::archive::DiskValue;
use crate::error::{ConfigError, Error, Result};
use crate::genome::is_dna_base;
use crate::index::IndexKey;

/// Number of distinct trinucleotide context codes
pub const NUM_CONTEXT_CODES: usize = 64;

const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];

fn base_code(base: u8) -> Option<u8> {
    match base {
        b'A' | b'a' => Some(0),
        b'C' | b'c' => Some(1),
        b'G' | b'g' => Some(2),
        b'T' | b't' => Some(3),
        _ => None,
    }
}

/// A 3-base sequence packed into a 6-bit code, two bits per base
///
/// The first base occupies the high bits, so codes order contexts
/// lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SbsContext {
    code: u8,
}

impl SbsContext {
    /// Builds a context from a raw 6-bit code
    pub fn from_code(code: u8) -> Self {
        Self { code: code & 0x3F }
    }

    pub fn code(&self) -> u8 {
        self.code
    }

    /// The three bases of the context, upper case
    pub fn bases(&self) -> [u8; 3] {
        [
            BASES[(self.code >> 4) as usize & 0x3],
            BASES[(self.code >> 2) as usize & 0x3],
            BASES[self.code as usize & 0x3],
        ]
    }

    /// The reverse complement context
    ///
    /// Complements every base and reverses their order, e.g. `ACT -> AGT`.
    pub fn reverse_complement(&self) -> Self {
        let first = self.code >> 4 & 0x3;
        let middle = self.code >> 2 & 0x3;
        let last = self.code & 0x3;
        Self {
            code: (3 - last) << 4 | (3 - middle) << 2 | (3 - first),
        }
    }
}

impl fmt::Display for SbsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bases = self.bases();
        write!(
            f,
            "{}{}{}",
            bases[0] as char, bases[1] as char, bases[2] as char
        )
    }
}

impl FromStr for SbsContext {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 {
            return Err(ConfigError::InvalidSbsContext(s.to_string()).into());
        }
        let mut code = 0u8;
        for &byte in bytes {
            let Some(base) = base_code(byte) else {
                return Err(ConfigError::InvalidSbsContext(s.to_string()).into());
            };
            code = code << 2 | base;
        }
        Ok(Self { code })
    }
}

impl DiskValue for SbsContext {
    const FIXED_SIZE: Option<usize> = Some(1);

    fn store<W: Write>(&self, writer: &mut W) -> Result<()> {
        self.code.store(writer)
    }

    fn load<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(Self::from_code(u8::load(reader)?))
    }
}

/// A context pools with its reverse complement, which describes the same
/// substitution site read from the opposite strand.
impl IndexKey for SbsContext {
    fn sampling_class(&self) -> Vec<Self> {
        vec![*self, self.reverse_complement()]
    }
}

/// Tracks the last three bases while scanning a sequence left to right
///
/// The automaton exposes a valid context once three consecutive
/// unambiguous bases have been read; any `N` (or other non-base symbol)
/// resets it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextAutomaton {
    code: u8,
    consecutive: u8,
}

impl ContextAutomaton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next sequence symbol
    pub fn update(&mut self, symbol: u8) {
        match base_code(symbol) {
            Some(base) => {
                self.code = (self.code << 2 | base) & 0x3F;
                self.consecutive = (self.consecutive + 1).min(3);
            }
            None => {
                self.code = 0;
                self.consecutive = 0;
            }
        }
    }

    /// Whether a full 3-base context is available
    pub fn has_context(&self) -> bool {
        self.consecutive >= 3
    }

    /// The context of the last three bases read
    pub fn context(&self) -> SbsContext {
        SbsContext::from_code(self.code)
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn codes_round_trip_through_text() -> Result<()> {
        for code in 0..NUM_CONTEXT_CODES as u8 {
            let context = SbsContext::from_code(code);
            let parsed: SbsContext = context.to_string().parse()?;
            assert_eq!(parsed, context);
        }
        Ok(())
    }

    #[test]
    fn parsing_rejects_junk() {
        assert!("AC".parse::<SbsContext>().is_err());
        assert!("ACGT".parse::<SbsContext>().is_err());
        assert!("ANT".parse::<SbsContext>().is_err());
        assert!("".parse::<SbsContext>().is_err());
    }

    #[test]
    fn reverse_complement_examples() {
        let act: SbsContext = "ACT".parse().unwrap();
        assert_eq!(act.reverse_complement().to_string(), "AGT");
        let gcg: SbsContext = "GCG".parse().unwrap();
        assert_eq!(gcg.reverse_complement().to_string(), "CGC");
        let tcc: SbsContext = "TCC".parse().unwrap();
        assert_eq!(tcc.reverse_complement().to_string(), "GGA");
        // an involution
        for code in 0..NUM_CONTEXT_CODES as u8 {
            let context = SbsContext::from_code(code);
            assert_eq!(context.reverse_complement().reverse_complement(), context);
        }
    }

    #[test]
    fn sampling_class_pairs_strands() {
        let act: SbsContext = "ACT".parse().unwrap();
        let class = act.sampling_class();
        assert_eq!(class.len(), 2);
        assert_eq!(class[0], act);
        assert_eq!(class[1], act.reverse_complement());
    }

    #[test]
    fn automaton_needs_three_bases_and_resets_on_n() {
        let mut automaton = ContextAutomaton::new();
        automaton.update(b'A');
        automaton.update(b'C');
        assert!(!automaton.has_context());
        automaton.update(b'T');
        assert!(automaton.has_context());
        assert_eq!(automaton.context().to_string(), "ACT");

        automaton.update(b'g');
        assert_eq!(automaton.context().to_string(), "CTG");

        automaton.update(b'N');
        assert!(!automaton.has_context());
        automaton.update(b'A');
        automaton.update(b'A');
        assert!(!automaton.has_context());
        automaton.update(b'A');
        assert_eq!(automaton.context().to_string(), "AAA");
    }
}
