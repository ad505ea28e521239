//! CRC side-table: one row per data word with its precomputed CRC.

use super::ArtifactError;
use super::manifest::parse_u64;

const COL_DATA_HEX: &str = "data_64_bits_hex";
const COL_CRC_HEX: &str = "crc_64_bits_hex";
const COL_DATA_DEC: &str = "data_64_bits";
const COL_CRC_DEC: &str = "crc_64_bits";

/// One table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrcRow {
    pub data: u64,
    pub crc: u64,
}

/// Parsed CRC table; row `i` (1-based) belongs to loop number `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrcTable {
    rows: Vec<CrcRow>,
}

struct Columns {
    data_hex: usize,
    crc_hex: usize,
    data_dec: usize,
    crc_dec: usize,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self, ArtifactError> {
        let names: Vec<&str> = header.split(',').map(str::trim).collect();
        let find = |name: &'static str| {
            names
                .iter()
                .position(|n| *n == name)
                .ok_or(ArtifactError::MissingColumn(name))
        };
        Ok(Self {
            data_hex: find(COL_DATA_HEX)?,
            crc_hex: find(COL_CRC_HEX)?,
            data_dec: find(COL_DATA_DEC)?,
            crc_dec: find(COL_CRC_DEC)?,
        })
    }
}

impl CrcTable {
    /// Parse the CSV text. Decimal and hex columns must agree.
    pub fn parse(text: &str) -> Result<Self, ArtifactError> {
        let mut lines = text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .filter(|l| !l.trim().is_empty());
        let header = lines.next().ok_or(ArtifactError::MissingColumn(COL_DATA_HEX))?;
        let columns = Columns::from_header(header)?;

        let mut rows = Vec::new();
        for (index, line) in lines.enumerate() {
            // Row 1 is the header.
            let row = index + 2;
            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            let field = |col: usize, name: &str| -> Result<u64, ArtifactError> {
                let text = fields.get(col).ok_or_else(|| ArtifactError::MalformedRow {
                    row,
                    reason: format!("missing {name}"),
                })?;
                parse_u64(text).map_err(|reason| ArtifactError::MalformedRow { row, reason })
            };

            let data = field(columns.data_hex, COL_DATA_HEX)?;
            let crc = field(columns.crc_hex, COL_CRC_HEX)?;
            if field(columns.data_dec, COL_DATA_DEC)? != data {
                return Err(ArtifactError::MalformedRow {
                    row,
                    reason: format!("{COL_DATA_DEC} disagrees with {COL_DATA_HEX}"),
                });
            }
            if field(columns.crc_dec, COL_CRC_DEC)? != crc {
                return Err(ArtifactError::MalformedRow {
                    row,
                    reason: format!("{COL_CRC_DEC} disagrees with {COL_CRC_HEX}"),
                });
            }
            rows.push(CrcRow { data, crc });
        }
        Ok(Self { rows })
    }

    /// Number of data rows, header excluded.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Row of loop number `i`, 1-based.
    pub fn row(&self, i: u64) -> Option<CrcRow> {
        let index = usize::try_from(i.checked_sub(1)?).ok()?;
        self.rows.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
loop_number,data_64_bits_hex,crc_64_bits_hex,data_64_bits,crc_64_bits
1,0x010178797a00021f,0x1b1fccbffe003729,72471532147835423,1954505888274331433
2,0x3733626331303166,0xd7da68b1dbd05c5a,3977631074064806246,15553859376183794778
";

    #[test]
    fn test_parse_rows() {
        let table = CrcTable::parse(TABLE).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.row(2),
            Some(CrcRow {
                data: 0x3733_6263_3130_3166,
                crc: 0xd7da_68b1_dbd0_5c5a,
            })
        );
        assert_eq!(table.row(0), None);
        assert_eq!(table.row(3), None);
    }

    #[test]
    fn test_columns_by_name() {
        let table = CrcTable::parse(
            "crc_64_bits,data_64_bits,crc_64_bits_hex,data_64_bits_hex\r\n3,2,0x3,0x2\r\n",
        )
        .unwrap();
        assert_eq!(table.row(1), Some(CrcRow { data: 2, crc: 3 }));
    }

    #[test]
    fn test_decimal_must_match_hex() {
        let text = TABLE.replace("72471532147835423", "72471532147835424");
        let err = CrcTable::parse(&text).unwrap_err();
        assert!(matches!(err, ArtifactError::MalformedRow { row: 2, .. }));
    }

    #[test]
    fn test_missing_column() {
        let err = CrcTable::parse("data_64_bits_hex,crc_64_bits_hex\n0x1,0x2\n").unwrap_err();
        assert!(matches!(err, ArtifactError::MissingColumn("data_64_bits")));
    }

    #[test]
    fn test_short_row() {
        let err = CrcTable::parse(
            "data_64_bits_hex,crc_64_bits_hex,data_64_bits,crc_64_bits\n0x1,0x2,1\n",
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::MalformedRow { row: 2, .. }));
    }
}
