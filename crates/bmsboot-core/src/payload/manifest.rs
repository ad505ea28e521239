//! Manifest describing a built application image.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use super::ArtifactError;

/// JSON manifest written next to the binary by the build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub len_bytes: u64,
    pub len_words: u64,
    pub bin_path: PathBuf,
    #[serde(deserialize_with = "de_words")]
    pub vector_table: Vec<u64>,
    #[serde(deserialize_with = "de_word")]
    pub vector_table_crc: u64,
    pub hash_bin: String,
    pub hash_csv: String,
}

impl Manifest {
    pub fn from_json(text: &str) -> Result<Self, ArtifactError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// A 64-bit word written either as a JSON number or as a `0x` string.
#[derive(Deserialize)]
#[serde(untagged)]
enum Word {
    Number(u64),
    Text(String),
}

impl Word {
    fn value<E: serde::de::Error>(self) -> Result<u64, E> {
        match self {
            Word::Number(n) => Ok(n),
            Word::Text(s) => parse_u64(&s).map_err(E::custom),
        }
    }
}

fn de_word<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Word::deserialize(deserializer)?.value()
}

fn de_words<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u64>, D::Error> {
    Vec::<Word>::deserialize(deserializer)?
        .into_iter()
        .map(Word::value)
        .collect()
}

/// Parse a hex (`0x` prefixed) or decimal 64-bit integer.
pub(crate) fn parse_u64(text: &str) -> Result<u64, String> {
    let text = text.trim();
    let parsed = match text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("{text:?}: {e}"))
}
