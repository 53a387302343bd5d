//! Typed little-endian serialization over byte streams
//!
//! Every on-disk structure in this crate (bucket files, map files, ancillary
//! data files) is written through this module. Multi-byte scalars are
//! little-endian throughout. Files open with a short signature block written
//! by [`write_tag`] and validated by [`read_tag`]: a length-prefixed tag
//! string followed by a one-byte format version.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{HeaderError, Result};

/// Upper bound on the signature tag length accepted by [`read_tag`]
///
/// Reading an arbitrary length from a corrupt file must not trigger an
/// unbounded allocation.
const MAX_TAG_LEN: u64 = 64;

/// A value that can be stored in and loaded from a byte stream
///
/// Implementors declare through [`DiskValue::FIXED_SIZE`] whether every
/// instance serializes to the same number of bytes. Fixed-size values gain
/// ordinal access, uniform picks, and random tour origins in the bucket
/// layer; variable-size values are restricted to sequential access.
pub trait DiskValue: Sized + Clone {
    /// The serialized size shared by all instances, when one exists
    const FIXED_SIZE: Option<usize>;

    /// Writes the value to a stream
    ///
    /// # Errors
    ///
    /// Returns an error if writing to the stream fails (typically an I/O
    /// error).
    fn store<W: Write>(&self, writer: &mut W) -> Result<()>;

    /// Reads a value back from a stream
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * Reading from the stream fails (typically an I/O error)
    /// * The bytes read do not form a valid value
    fn load<R: Read>(reader: &mut R) -> Result<Self>;

    /// The serialized size of this instance in bytes
    fn disk_size(&self) -> usize {
        Self::FIXED_SIZE.unwrap_or(std::mem::size_of::<Self>())
    }

    /// The per-value byte budget used when sizing caches
    ///
    /// For fixed-size values this is the on-disk size; otherwise the
    /// in-memory size stands in as an estimate.
    fn slot_size() -> usize {
        Self::FIXED_SIZE.unwrap_or(std::mem::size_of::<Self>())
    }
}

impl DiskValue for u8 {
    const FIXED_SIZE: Option<usize> = Some(1);

    fn store<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u8(*self)?;
        Ok(())
    }

    fn load<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_u8()?)
    }
}

impl DiskValue for u32 {
    const FIXED_SIZE: Option<usize> = Some(4);

    fn store<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u32::<LittleEndian>(*self)?;
        Ok(())
    }

    fn load<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_u32::<LittleEndian>()?)
    }
}

impl DiskValue for u64 {
    const FIXED_SIZE: Option<usize> = Some(8);

    fn store<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<LittleEndian>(*self)?;
        Ok(())
    }

    fn load<R: Read>(reader: &mut R) -> Result<Self> {
        Ok(reader.read_u64::<LittleEndian>()?)
    }
}

/// Strings serialize as a `u64` byte length followed by UTF-8 bytes.
impl DiskValue for String {
    const FIXED_SIZE: Option<usize> = None;

    fn store<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<LittleEndian>(self.len() as u64)?;
        writer.write_all(self.as_bytes())?;
        Ok(())
    }

    fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let len = reader.read_u64::<LittleEndian>()?;
        let mut bytes = vec![0u8; len as usize];
        reader.read_exact(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, e).into()
        })
    }

    fn disk_size(&self) -> usize {
        8 + self.len()
    }
}

/// Writes a signature block: length-prefixed tag string plus version byte
///
/// # Arguments
///
/// * `writer` - Any type that implements the `Write` trait
/// * `tag` - The format tag naming the file family
/// * `version` - The format version byte
///
/// # Returns
///
/// * `Ok(())` - If the signature block was successfully written
/// * `Err(Error)` - If writing to the writer failed
pub fn write_tag<W: Write>(writer: &mut W, tag: &str, version: u8) -> Result<()> {
    writer.write_u64::<LittleEndian>(tag.len() as u64)?;
    writer.write_all(tag.as_bytes())?;
    writer.write_u8(version)?;
    Ok(())
}

/// Reads a signature block, failing unless tag and version both match
///
/// # Arguments
///
/// * `reader` - Any type that implements the `Read` trait
/// * `expected` - The format tag the file must carry
/// * `version` - The format version the file must carry
///
/// # Returns
///
/// * `Ok(())` - If tag and version both matched
/// * `Err(Error)` - If the signature block is invalid
///
/// # Errors
///
/// Returns an error if:
/// * The tag does not match `expected` (or exceeds the accepted length)
/// * The version byte does not match `version`
/// * Reading from the reader fails
pub fn read_tag<R: Read>(reader: &mut R, expected: &str, version: u8) -> Result<()> {
    let len = reader.read_u64::<LittleEndian>()?;
    if len > MAX_TAG_LEN {
        return Err(HeaderError::TagMismatch {
            expected: expected.to_string(),
            found: format!("<{len}-byte tag>"),
        }
        .into());
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    if bytes != expected.as_bytes() {
        return Err(HeaderError::TagMismatch {
            expected: expected.to_string(),
            found: String::from_utf8_lossy(&bytes).into_owned(),
        }
        .into());
    }
    let found = reader.read_u8()?;
    if found != version {
        return Err(HeaderError::VersionMismatch {
            expected: version,
            found,
        }
        .into());
    }
    Ok(())
}

/// The number of bytes occupied by a signature block for `tag`
///
/// # Returns
///
/// The length prefix, the tag bytes, and the version byte combined
pub fn tag_len(tag: &str) -> u64 {
    8 + tag.len() as u64 + 1
}
