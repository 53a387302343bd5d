use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("invalid signature: expected {expected:?}, found {found:?}")]
    TagMismatch { expected: String, found: String },

    #[error("unsupported format version {found} (expected {expected})")]
    VersionMismatch { expected: u8, found: u8 },

    #[error("bucket length mismatch: {stored} values cannot occupy {bytes} data bytes")]
    LengthMismatch { stored: u64, bytes: u64 },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cache size must be greater than zero")]
    ZeroCacheSize,

    #[error("cache must hold at least one value ({required} bytes, got {given})")]
    CacheTooSmall { required: usize, given: usize },

    #[error("shuffle buffer must hold at least two values ({required} bytes, got {given})")]
    ShuffleBufferTooSmall { required: usize, given: usize },

    #[error("index directory {0:?} already exists")]
    IndexDirectoryExists(PathBuf),

    #[error("bucket file {0:?} already exists")]
    BucketFileExists(PathBuf),

    #[error("{0:?} is not a bucket file")]
    NotABucketFile(PathBuf),

    #[error("repetition unit size must be greater than zero")]
    ZeroUnitSize,

    #[error("{0:?} is not a DNA base")]
    InvalidBase(char),

    #[error("\"{input}\" does not represent an indel context: {reason}")]
    InvalidIdContext { input: String, reason: String },

    #[error("\"{input}\" does not represent an indel type: {reason}")]
    InvalidIdType { input: String, reason: String },

    #[error("\"{0}\" does not represent a trinucleotide context")]
    InvalidSbsContext(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ReadError {
    #[error("index directory {0:?} does not exist")]
    MissingDirectory(PathBuf),

    #[error("map file {0:?} does not exist")]
    MissingMap(PathBuf),

    #[error("no bucket for key \"{0}\"")]
    UnknownKey(String),

    #[error("index {index} is beyond the bucket length {len}")]
    OutOfRange { index: u64, len: u64 },

    #[error("ordinal access requires values with a fixed on-disk size")]
    VariableSized,

    #[error("no value in the bucket")]
    EmptyBucket,

    #[error("no more values available for \"{0}\"")]
    NoMoreValues(String),

    #[error("no extractable value in the class of \"{0}\"")]
    EmptyClass(String),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("FASTA parse error: {0}")]
    Fasta(#[from] seq_io::fasta::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
