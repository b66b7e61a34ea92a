//! Run-list decoding
//!
//! A non-resident attribute describes its clusters as a packed sequence of
//! runs. Each run starts with a header byte whose low nibble is the width of
//! the cluster count and whose high nibble is the width of a signed LCN
//! delta. A zero-width delta marks a sparse run. Deltas are relative to the
//! LCN of the previous run that actually had clusters.

use serde::{Deserialize, Serialize};

use crate::bytes::{read_signed, read_unsigned};
use crate::error::{NtfsError, NtfsResult};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    pub vcn: u64,
    pub length: u64,
    /// `None` for a sparse run.
    pub lcn: Option<u64>,
}

impl Run {
    pub fn is_sparse(&self) -> bool {
        self.lcn.is_none()
    }

    pub fn end_vcn(&self) -> u64 {
        self.vcn + self.length
    }

    pub fn contains(&self, vcn: u64) -> bool {
        vcn >= self.vcn && vcn < self.end_vcn()
    }

    /// Volume byte offset of cluster `vcn` of this run, `None` when sparse.
    pub fn disk_offset(&self, vcn: u64, cluster_size: u64) -> NtfsResult<Option<u64>> {
        let lcn = match self.lcn {
            Some(lcn) => lcn,
            None => return Ok(None),
        };
        lcn.checked_add(vcn - self.vcn)
            .and_then(|cluster| cluster.checked_mul(cluster_size))
            .map(Some)
            .ok_or_else(|| {
                NtfsError::CorruptRunList(format!("run at LCN {} lies past the addressable range", lcn))
            })
    }
}

pub fn decode_run_list(data: &[u8], start_vcn: u64) -> NtfsResult<Vec<Run>> {
    let mut runs = Vec::new();
    let mut pos = 0usize;
    let mut vcn = start_vcn;
    let mut lcn: i64 = 0;

    while pos < data.len() {
        let header = data[pos];
        if header == 0 {
            break;
        }
        pos += 1;

        let length_size = (header & 0x0F) as usize;
        let offset_size = (header >> 4) as usize;
        if length_size == 0 || length_size > 8 || offset_size > 8 {
            return Err(NtfsError::CorruptRunList(format!(
                "header {:#04x} at byte {}",
                header,
                pos - 1
            )));
        }
        if pos + length_size + offset_size > data.len() {
            return Err(NtfsError::CorruptRunList(format!(
                "run at byte {} extends past the run list",
                pos - 1
            )));
        }

        let length = read_unsigned(&data[pos..pos + length_size]);
        pos += length_size;

        let run_lcn = if offset_size == 0 {
            None
        } else {
            let delta = read_signed(&data[pos..pos + offset_size]);
            pos += offset_size;
            lcn = lcn.checked_add(delta).filter(|l| *l >= 0).ok_or_else(|| {
                NtfsError::CorruptRunList(format!("LCN delta {} leaves the volume", delta))
            })?;
            Some(lcn as u64)
        };

        log::trace!("run vcn={} length={} lcn={:?}", vcn, length, run_lcn);
        runs.push(Run {
            vcn,
            length,
            lcn: run_lcn,
        });
        vcn = vcn
            .checked_add(length)
            .ok_or_else(|| NtfsError::CorruptRunList("VCN overflow".to_string()))?;
    }

    Ok(runs)
}

/// Total clusters covered by `runs`, sparse runs included.
pub fn total_clusters(runs: &[Run]) -> u64 {
    runs.iter().fold(0u64, |total, r| total.saturating_add(r.length))
}
