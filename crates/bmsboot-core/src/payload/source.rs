//! Validated artifact triple with random access to data words.

use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use super::{ArtifactError, CrcTable, Manifest};
use crate::protocol::{
    APP_BINARY_FILE, APP_CRC_TABLE_FILE, APP_MANIFEST_FILE, VECTOR_TABLE_WORDS, WORD_SIZE,
};

/// Application image ready for transfer.
#[derive(Debug, Clone)]
pub struct BinarySource {
    len_bytes: u64,
    table: CrcTable,
    vector_table: [u64; VECTOR_TABLE_WORDS],
    vector_table_crc: u64,
}

impl BinarySource {
    /// Load the artifacts from the build output directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, ArtifactError> {
        let dir = dir.as_ref();
        Self::load(
            &dir.join(APP_BINARY_FILE),
            &dir.join(APP_CRC_TABLE_FILE),
            &dir.join(APP_MANIFEST_FILE),
        )
    }

    /// Load and validate binary, CRC table and manifest.
    #[instrument(skip_all, fields(bin = %bin.display()))]
    pub fn load(bin: &Path, csv: &Path, manifest: &Path) -> Result<Self, ArtifactError> {
        let manifest = Manifest::from_json(&read_to_string(manifest)?)?;
        check_bin_path(&manifest.bin_path, bin)?;

        let image = read(bin)?;
        let csv_bytes = read(csv)?;

        let actual = image.len() as u64;
        if actual != manifest.len_bytes {
            return Err(ArtifactError::LengthMismatch {
                expected: manifest.len_bytes,
                actual,
            });
        }
        if manifest.len_bytes == 0 {
            return Err(ArtifactError::Empty);
        }
        if manifest.len_bytes % WORD_SIZE as u64 != 0 {
            return Err(ArtifactError::Unaligned(manifest.len_bytes));
        }
        let words = manifest.len_bytes / WORD_SIZE as u64;
        if manifest.len_words != words {
            return Err(ArtifactError::WordCountMismatch {
                expected: words,
                actual: manifest.len_words,
            });
        }

        check_hash("binary", &image, &manifest.hash_bin)?;
        check_hash("CRC table", &csv_bytes, &manifest.hash_csv)?;

        let text = String::from_utf8(csv_bytes).map_err(|e| ArtifactError::MalformedRow {
            row: 0,
            reason: e.to_string(),
        })?;
        let table = CrcTable::parse(&text)?;
        if table.len() as u64 != words {
            return Err(ArtifactError::RowCount {
                expected: words + 1,
                actual: table.len() as u64 + 1,
            });
        }

        let vector_table: [u64; VECTOR_TABLE_WORDS] = manifest
            .vector_table
            .as_slice()
            .try_into()
            .map_err(|_| ArtifactError::VectorTableSize(manifest.vector_table.len()))?;

        info!(
            len_bytes = manifest.len_bytes,
            words,
            vector_table_crc = %format!("0x{:016X}", manifest.vector_table_crc),
            "Artifacts validated"
        );

        Ok(Self {
            len_bytes: manifest.len_bytes,
            table,
            vector_table,
            vector_table_crc: manifest.vector_table_crc,
        })
    }

    pub fn len_bytes(&self) -> u64 {
        self.len_bytes
    }

    /// Number of data words of the program.
    pub fn word_count(&self) -> u64 {
        self.table.len() as u64
    }

    pub fn vector_table(&self) -> [u64; VECTOR_TABLE_WORDS] {
        self.vector_table
    }

    pub fn vector_table_crc(&self) -> u64 {
        self.vector_table_crc
    }

    /// `(crc, data)` of loop number `i`.
    ///
    /// # Panics
    ///
    /// Panics unless `1 <= i <= word_count()`.
    pub fn word_at(&self, i: u64) -> (u64, u64) {
        match self.table.row(i) {
            Some(row) => (row.crc, row.data),
            None => panic!("loop number {i} outside 1..={}", self.word_count()),
        }
    }
}

fn read(path: &Path) -> Result<Vec<u8>, ArtifactError> {
    std::fs::read(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn read_to_string(path: &Path) -> Result<String, ArtifactError> {
    std::fs::read_to_string(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn check_hash(file: &'static str, content: &[u8], expected: &str) -> Result<(), ArtifactError> {
    let actual = hex::encode(Sha256::digest(content));
    if !actual.eq_ignore_ascii_case(expected.trim()) {
        return Err(ArtifactError::HashMismatch {
            file,
            expected: expected.to_string(),
            actual,
        });
    }
    debug!(file, sha256 = %actual, "Hash ok");
    Ok(())
}

/// Both paths must name the same file. A manifest written on another
/// host only has its file name compared.
fn check_bin_path(manifest_path: &Path, supplied: &Path) -> Result<(), ArtifactError> {
    let supplied_canonical = std::fs::canonicalize(supplied).map_err(|source| ArtifactError::Read {
        path: supplied.to_path_buf(),
        source,
    })?;
    let mismatch = || ArtifactError::PathMismatch {
        manifest: manifest_path.to_path_buf(),
        supplied: supplied.to_path_buf(),
    };

    match std::fs::canonicalize(manifest_path) {
        Ok(expected) if expected == supplied_canonical => Ok(()),
        Ok(_) => Err(mismatch()),
        Err(_) => {
            if manifest_path.file_name() != supplied.file_name() {
                return Err(mismatch());
            }
            warn!(
                manifest = %manifest_path.display(),
                supplied = %supplied.display(),
                "Manifest binary path not found on this host, matched by file name"
            );
            Ok(())
        }
    }
}

/// Writes consistent artifact triples for tests.
#[cfg(test)]
pub(crate) mod fixture {
    use std::path::PathBuf;

    use super::*;

    /// Image of the two-word scenario target.
    pub const BIN: [u8; 16] = [
        0x1F, 0x02, 0x00, 0x7A, 0x79, 0x87, 0x17, 0x01, 0x66, 0x31, 0x30, 0x63, 0x62, 0x32, 0x33,
        0x37,
    ];
    pub const ROWS: [(u64, u64); 2] = [
        (0x0101_7879_7a00_021f, 0x1b1f_ccbf_fe00_3729),
        (0x3733_6263_3130_3166, 0xd7da_68b1_dbd0_5c5a),
    ];
    pub const VECTOR_TABLE: [u64; 4] = [0xA, 0xB, 0xC, 0xD];
    pub const VECTOR_TABLE_CRC: u64 = 0x5EC7_0000_0000_0001;

    pub fn csv_text(rows: &[(u64, u64)]) -> String {
        let mut text = String::from("loop_number,data_64_bits_hex,crc_64_bits_hex,data_64_bits,crc_64_bits\n");
        for (i, (data, crc)) in rows.iter().enumerate() {
            text.push_str(&format!("{},0x{data:016x},0x{crc:016x},{data},{crc}\n", i + 1));
        }
        text
    }

    /// Write `foxbms.bin`, the CRC table and the manifest into `dir`.
    pub fn write(dir: &Path, bin: &[u8], rows: &[(u64, u64)]) -> PathBuf {
        let csv = csv_text(rows);
        let bin_path = dir.join(APP_BINARY_FILE);
        std::fs::write(&bin_path, bin).unwrap();
        std::fs::write(dir.join(APP_CRC_TABLE_FILE), &csv).unwrap();

        let manifest = Manifest {
            len_bytes: bin.len() as u64,
            len_words: (bin.len() / WORD_SIZE) as u64,
            bin_path: bin_path.clone(),
            vector_table: VECTOR_TABLE.to_vec(),
            vector_table_crc: VECTOR_TABLE_CRC,
            hash_bin: hex::encode(Sha256::digest(bin)),
            hash_csv: hex::encode(Sha256::digest(csv.as_bytes())),
        };
        std::fs::write(
            dir.join(APP_MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest).unwrap(),
        )
        .unwrap();
        bin_path
    }

    /// Artifact set of the two-word scenario image.
    pub fn two_words(dir: &Path) -> BinarySource {
        write(dir, &BIN, &ROWS);
        BinarySource::from_dir(dir).unwrap()
    }

    /// `words` synthetic words, data `i` and CRC `!i` for loop number `i`.
    pub fn synthetic(dir: &Path, words: u64) -> BinarySource {
        let bin: Vec<u8> = (1..=words).flat_map(|i| i.to_le_bytes()).collect();
        let rows: Vec<(u64, u64)> = (1..=words).map(|i| (i, !i)).collect();
        write(dir, &bin, &rows);
        BinarySource::from_dir(dir).unwrap()
    }
}
