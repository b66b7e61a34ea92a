use serde::{Deserialize, Serialize};
use std::fmt;

const RECORD_MASK: u64 = 0x0000_FFFF_FFFF_FFFF;

pub const MFT_RECORD_MFT: u64 = 0;
pub const MFT_RECORD_ROOT: u64 = 5;
pub const MFT_RECORD_UPCASE: u64 = 10;

/// 64-bit file reference: 48-bit record number plus 16-bit sequence number.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MftReference(pub u64);

impl MftReference {
    pub fn new(record: u64, sequence: u16) -> Self {
        MftReference((record & RECORD_MASK) | (u64::from(sequence) << 48))
    }

    pub fn record_number(self) -> u64 {
        self.0 & RECORD_MASK
    }

    pub fn sequence(self) -> u16 {
        (self.0 >> 48) as u16
    }

    /// Same record regardless of sequence number.
    pub fn same_record(self, other: MftReference) -> bool {
        self.record_number() == other.record_number()
    }
}

impl From<u64> for MftReference {
    fn from(value: u64) -> Self {
        MftReference(value)
    }
}

impl fmt::Display for MftReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.record_number(), self.sequence())
    }
}
