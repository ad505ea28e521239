//! Build artifacts: binary image, CRC side-table and manifest.
//!
//! Everything is validated on load so that a broken artifact set never
//! produces bus traffic.

pub mod crc_table;
pub mod manifest;
pub mod source;

pub use crc_table::CrcTable;
pub use manifest::Manifest;
pub use source::BinarySource;

use std::path::PathBuf;

use thiserror::Error;

/// Reasons an artifact set is rejected.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed manifest: {0}")]
    Manifest(#[from] serde_json::Error),
    #[error("Binary path mismatch: manifest names {manifest}, got {supplied}")]
    PathMismatch { manifest: PathBuf, supplied: PathBuf },
    #[error("Binary is {actual} bytes, manifest says {expected}")]
    LengthMismatch { expected: u64, actual: u64 },
    #[error("Program length {0} is not a multiple of the word size")]
    Unaligned(u64),
    #[error("Manifest word count {actual} does not match length ({expected} words)")]
    WordCountMismatch { expected: u64, actual: u64 },
    #[error("SHA-256 of {file} is {actual}, manifest says {expected}")]
    HashMismatch {
        file: &'static str,
        expected: String,
        actual: String,
    },
    #[error("CRC table has {actual} rows, expected {expected}")]
    RowCount { expected: u64, actual: u64 },
    #[error("CRC table lacks column {0}")]
    MissingColumn(&'static str),
    #[error("CRC table row {row}: {reason}")]
    MalformedRow { row: usize, reason: String },
    #[error("Vector table has {0} entries, expected 4")]
    VectorTableSize(usize),
    #[error("Program is empty")]
    Empty,
}
