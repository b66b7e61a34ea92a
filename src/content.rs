//! Attribute content reader
//!
//! Turns an attribute (resident, or non-resident across any number of
//! extents) into a byte stream. Sparse runs and the tail past the
//! initialized size read as zeros; compressed attributes are decoded one
//! compression unit at a time and the last decoded unit is kept.

use crate::attribute::{Attribute, AttributeForm, AttributeMask};
use crate::catalog::MftFile;
use crate::error::{zeroed_buffer, NtfsError, NtfsResult};
use crate::lznt1;
use crate::ntfs::Ntfs;
use crate::run_list::{total_clusters, Run};

/// Largest compression unit accepted, as a power of two in clusters. NTFS writes 4.
const MAX_COMPRESSION_UNIT: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOffset {
    /// Continue after the previous read.
    Continue,
    /// Start at an absolute byte offset.
    At(u64),
}

struct Compression {
    unit_clusters: u64,
    cached: Option<(u64, Vec<u8>)>,
}

enum Source {
    Resident(Vec<u8>),
    NonResident {
        runs: Vec<Run>,
        initialized_size: u64,
        compression: Option<Compression>,
        cursor: usize,
    },
}

pub struct AttributeReader {
    record: u64,
    source: Source,
    length: u64,
    position: u64,
}

impl AttributeReader {
    /// Open a reader on `first`, the first extent of an attribute of `file`.
    /// Further extents with the same type and name are gathered through the
    /// catalog until their clusters cover the attribute's real size.
    pub fn open(ntfs: &mut Ntfs, file: &mut MftFile, first: &Attribute) -> NtfsResult<Self> {
        let record = file.record_number();
        let (real_size, initialized_size, compression_unit) = match first.form {
            AttributeForm::Resident { .. } => {
                let value = first.resident_value().unwrap_or_default().to_vec();
                return Ok(AttributeReader {
                    record,
                    length: value.len() as u64,
                    source: Source::Resident(value),
                    position: 0,
                });
            }
            AttributeForm::NonResident {
                real_size,
                initialized_size,
                compression_unit,
                ..
            } => (real_size, initialized_size, compression_unit),
        };

        let cluster_size = u64::from(ntfs.geometry().cluster_size);
        let needed = real_size.div_ceil(cluster_size);
        let mut runs = first.runs()?;
        let mut current = first.clone();
        let mask = AttributeMask::from_code(first.type_code);

        while runs_end(&runs, first.start_vcn()) < needed {
            match file.next_attribute(ntfs, &current, mask)? {
                Some(next) => {
                    if next.same_stream(first) {
                        runs.extend(next.runs()?);
                    }
                    current = next;
                }
                None => break,
            }
        }
        runs.sort_by_key(|r| r.vcn);

        if runs_end(&runs, 0) < needed {
            log::debug!(
                "attribute {} of record {} covers {} of {} clusters",
                first.type_name(),
                record,
                total_clusters(&runs),
                needed
            );
        }

        let compression = if first.is_compressed() && compression_unit > 0 {
            if compression_unit > MAX_COMPRESSION_UNIT {
                return Err(NtfsError::corrupt_record(
                    record,
                    format!("compression unit of 2^{} clusters", compression_unit),
                ));
            }
            Some(Compression {
                unit_clusters: 1u64 << compression_unit,
                cached: None,
            })
        } else {
            if first.is_compressed() {
                log::warn!(
                    "record {}: compressed attribute without a compression unit, reading as stored",
                    record
                );
            }
            None
        };

        Ok(AttributeReader {
            record,
            source: Source::NonResident {
                runs,
                initialized_size: initialized_size.min(real_size),
                compression,
                cursor: 0,
            },
            length: real_size,
            position: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn is_compressed(&self) -> bool {
        matches!(
            self.source,
            Source::NonResident {
                compression: Some(_),
                ..
            }
        )
    }

    /// Runs of all gathered extents, ordered by VCN.
    pub fn runs(&self) -> &[Run] {
        match &self.source {
            Source::Resident(_) => &[],
            Source::NonResident { runs, .. } => runs,
        }
    }

    pub fn read_all(&mut self, ntfs: &mut Ntfs) -> NtfsResult<Vec<u8>> {
        let length = usize::try_from(self.length)
            .map_err(|_| NtfsError::Allocation(usize::MAX))?;
        self.read(ntfs, ReadOffset::At(0), length)
    }

    /// Read up to `count` bytes. Resident reads must lie inside the value;
    /// non-resident reads stop at the real size.
    pub fn read(&mut self, ntfs: &mut Ntfs, offset: ReadOffset, count: usize) -> NtfsResult<Vec<u8>> {
        let start = match offset {
            ReadOffset::Continue => self.position,
            ReadOffset::At(n) => {
                if let Source::NonResident { cursor, .. } = &mut self.source {
                    *cursor = 0;
                }
                n
            }
        };

        let bytes = match &mut self.source {
            Source::Resident(value) => {
                let end = start.checked_add(count as u64).filter(|&e| e <= self.length);
                match end {
                    Some(end) => value[start as usize..end as usize].to_vec(),
                    None => {
                        return Err(NtfsError::OutOfRange {
                            offset: start,
                            count: count as u64,
                            length: self.length,
                        })
                    }
                }
            }
            Source::NonResident {
                runs,
                initialized_size,
                compression,
                cursor,
            } => {
                if start >= self.length {
                    Vec::new()
                } else {
                    let available = (self.length - start).min(count as u64) as usize;
                    let mut out = zeroed_buffer(available)?;
                    let span = Span {
                        record: self.record,
                        runs: runs.as_slice(),
                        initialized_size: *initialized_size,
                    };
                    match compression {
                        Some(compression) => {
                            span.read_compressed(ntfs, compression, start, &mut out)?
                        }
                        None => span.read_stored(ntfs, cursor, start, &mut out)?,
                    }
                    out
                }
            }
        };

        self.position = start + bytes.len() as u64;
        Ok(bytes)
    }
}

fn runs_end(runs: &[Run], start_vcn: u64) -> u64 {
    runs.iter().map(|r| r.end_vcn()).max().unwrap_or(start_vcn)
}

struct Span<'a> {
    record: u64,
    runs: &'a [Run],
    initialized_size: u64,
}

impl Span<'_> {
    fn locate(&self, cursor: &mut usize, vcn: u64) -> Option<Run> {
        if let Some(run) = self.runs.get(*cursor) {
            if run.contains(vcn) {
                return Some(*run);
            }
        }
        let index = self.runs.partition_point(|r| r.end_vcn() <= vcn);
        let run = self.runs.get(index).filter(|r| r.contains(vcn))?;
        *cursor = index;
        Some(*run)
    }

    fn incomplete(&self, vcn: u64) -> NtfsError {
        NtfsError::corrupt_record(
            self.record,
            format!("incomplete attribute: no run covers VCN {}", vcn),
        )
    }

    fn read_stored(
        &self,
        ntfs: &mut Ntfs,
        cursor: &mut usize,
        start: u64,
        out: &mut [u8],
    ) -> NtfsResult<()> {
        let cluster_size = u64::from(ntfs.geometry().cluster_size);
        let end = start + out.len() as u64;
        let mut pos = start;

        while pos < end.min(self.initialized_size) {
            let vcn = pos / cluster_size;
            let run = self.locate(cursor, vcn).ok_or_else(|| self.incomplete(vcn))?;
            let piece_end = end
                .min(run.end_vcn().saturating_mul(cluster_size))
                .min(self.initialized_size);
            let length = (piece_end - pos) as usize;
            let at = (pos - start) as usize;
            if let Some(disk) = run.disk_offset(vcn, cluster_size)? {
                let bytes = ntfs.read_bytes(disk.saturating_add(pos % cluster_size), length)?;
                out[at..at + length].copy_from_slice(&bytes);
            }
            pos = piece_end;
        }
        Ok(())
    }

    fn read_compressed(
        &self,
        ntfs: &mut Ntfs,
        compression: &mut Compression,
        start: u64,
        out: &mut [u8],
    ) -> NtfsResult<()> {
        let cluster_size = u64::from(ntfs.geometry().cluster_size);
        let unit_bytes = compression.unit_clusters * cluster_size;
        let end = start + out.len() as u64;
        let mut pos = start;

        while pos < end {
            let unit = pos / unit_bytes;
            let unit_start = unit * unit_bytes;
            let piece_end = end.min(unit_start.saturating_add(unit_bytes));
            let at = (pos - start) as usize;
            let length = (piece_end - pos) as usize;

            let cached = matches!(&compression.cached, Some((index, _)) if *index == unit);
            if !cached {
                let data = self.decode_unit(ntfs, compression.unit_clusters, unit, unit_bytes)?;
                compression.cached = Some((unit, data));
            }
            if let Some((_, data)) = &compression.cached {
                let from = (pos - unit_start) as usize;
                out[at..at + length].copy_from_slice(&data[from..from + length]);
            }
            pos = piece_end;
        }

        // Bytes past the initialized size are never returned from disk
        if end > self.initialized_size {
            let len = out.len();
            let zero_from = self.initialized_size.saturating_sub(start) as usize;
            out[zero_from.min(len)..].fill(0);
        }
        Ok(())
    }

    fn decode_unit(
        &self,
        ntfs: &mut Ntfs,
        unit_clusters: u64,
        unit: u64,
        unit_bytes: u64,
    ) -> NtfsResult<Vec<u8>> {
        let cluster_size = u64::from(ntfs.geometry().cluster_size);
        let first_vcn = unit * unit_clusters;
        let mut cursor = 0;
        let mut stored = Vec::new();
        let mut real_clusters = 0u64;
        let mut covered = 0u64;

        let unit_end = first_vcn.saturating_add(unit_clusters);
        let mut vcn = first_vcn;
        while vcn < unit_end {
            let run = match self.locate(&mut cursor, vcn) {
                Some(run) => run,
                None => break,
            };
            let clusters = run.end_vcn().min(unit_end) - vcn;
            if let Some(offset) = run.disk_offset(vcn, cluster_size)? {
                let bytes = ntfs.read_bytes(offset, (clusters * cluster_size) as usize)?;
                stored.extend_from_slice(&bytes);
                real_clusters += clusters;
            }
            covered += clusters;
            vcn += clusters;
        }

        if covered < unit_clusters && first_vcn * cluster_size < self.initialized_size {
            return Err(self.incomplete(first_vcn + covered));
        }

        let mut data = if real_clusters == 0 {
            log::trace!("unit {} of record {} is sparse", unit, self.record);
            zeroed_buffer(unit_bytes as usize)?
        } else if real_clusters == unit_clusters {
            log::trace!("unit {} of record {} is stored", unit, self.record);
            stored
        } else {
            log::trace!(
                "unit {} of record {}: {} compressed clusters",
                unit,
                self.record,
                real_clusters
            );
            lznt1::decompress(&stored, unit_bytes as usize)?
        };
        data.resize(unit_bytes as usize, 0);
        Ok(data)
    }
}
