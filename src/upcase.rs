//! Upper-case table used for file name collation

use std::cmp::Ordering;

use crate::error::{NtfsError, NtfsResult};
use crate::reference::MFT_RECORD_UPCASE;

pub const UPCASE_TABLE_SIZE: usize = 0x20000;

/// One upper-case code unit for every UTF-16 code unit.
#[derive(Debug, Clone)]
pub struct UpcaseTable {
    table: Vec<u16>,
}

impl UpcaseTable {
    /// Parse the `$UpCase` data stream, which must cover all 65536 code units.
    pub fn from_bytes(data: &[u8]) -> NtfsResult<Self> {
        if data.len() != UPCASE_TABLE_SIZE {
            return Err(NtfsError::corrupt_record(
                MFT_RECORD_UPCASE,
                format!("$UpCase is {} bytes, expected {}", data.len(), UPCASE_TABLE_SIZE),
            ));
        }
        let table = data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Ok(UpcaseTable { table })
    }

    /// Table folding only ASCII letters.
    pub fn ascii() -> Self {
        let table = (0..=u16::MAX)
            .map(|c| {
                if (u16::from(b'a')..=u16::from(b'z')).contains(&c) {
                    c - 0x20
                } else {
                    c
                }
            })
            .collect();
        UpcaseTable { table }
    }

    pub fn upcase(&self, unit: u16) -> u16 {
        self.table.get(unit as usize).copied().unwrap_or(unit)
    }

    /// Collation order of two names: upper-cased code units, then length.
    pub fn compare(&self, a: &[u16], b: &[u16]) -> Ordering {
        for (&x, &y) in a.iter().zip(b.iter()) {
            match self.upcase(x).cmp(&self.upcase(y)) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        a.len().cmp(&b.len())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.table.iter().flat_map(|u| u.to_le_bytes()).collect()
    }
}
