//! Flash layout of the target and sub-sector arithmetic.

use crate::protocol::{Sector, TARGET_SECTORS, WORDS_PER_SUBSECTOR};

/// Ordered application sectors, first sector at loop number 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorMap {
    sectors: Vec<Sector>,
}

impl SectorMap {
    pub fn new(sectors: impl Into<Vec<Sector>>) -> Self {
        Self {
            sectors: sectors.into(),
        }
    }

    /// Layout of the target MCU.
    pub fn target() -> Self {
        Self::new(TARGET_SECTORS)
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    /// Words the whole map can hold.
    pub fn total_words(&self) -> u64 {
        self.sectors.iter().map(|s| u64::from(s.size_words())).sum()
    }

    /// Sector containing loop number `i`.
    pub fn sector_for_loop(&self, i: u64) -> Option<Sector> {
        if i == 0 {
            return None;
        }
        let mut end = 0u64;
        for sector in &self.sectors {
            end += u64::from(sector.size_words());
            if i <= end {
                return Some(*sector);
            }
        }
        None
    }

    /// Size in words of the sector containing loop number `i`.
    pub fn sector_size_for_loop(&self, i: u64) -> Option<u64> {
        self.sector_for_loop(i).map(|s| u64::from(s.size_words()))
    }
}

impl Default for SectorMap {
    fn default() -> Self {
        Self::target()
    }
}

/// Last loop number of the sub-sector starting at `i` in an image of `n` words.
///
/// # Panics
///
/// Panics unless `1 <= i <= n`.
pub fn subsector_end(i: u64, n: u64) -> u64 {
    assert!(i >= 1, "loop numbers start at 1");
    assert!(i <= n, "loop number {i} past the last word {n}");

    let unit = u64::from(WORDS_PER_SUBSECTOR);
    if i <= n / unit * unit {
        n.min(i.div_ceil(unit) * unit)
    } else {
        n
    }
}
