//! NTFS volume session
//!
//! Holds the volume, its geometry, the MFT's own run list and the upper-case
//! table. Everything else (files, indexes, readers) borrows the session
//! while it works.

use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeMask, AttributeType};
use crate::boot_sector::{parse_boot_sector, VolumeGeometry, BOOT_SECTOR_SIZE};
use crate::catalog::MftFile;
use crate::content::AttributeReader;
use crate::error::{NtfsError, NtfsResult};
use crate::record::MftRecord;
use crate::reference::{MftReference, MFT_RECORD_MFT, MFT_RECORD_UPCASE};
use crate::run_list::Run;
use crate::upcase::UpcaseTable;
use crate::volume::Volume;

pub const DEFAULT_MAX_LINK_DEPTH: usize = 32;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NtfsOptions {
    /// Reparse points followed while resolving one path.
    pub max_link_depth: usize,
    /// Drive letter the volume is mounted as; absolute links are only
    /// followed when they name this drive.
    pub drive_letter: Option<char>,
}

impl Default for NtfsOptions {
    fn default() -> Self {
        NtfsOptions {
            max_link_depth: DEFAULT_MAX_LINK_DEPTH,
            drive_letter: None,
        }
    }
}

pub struct Ntfs {
    volume: Box<dyn Volume>,
    geometry: VolumeGeometry,
    mft_runs: Vec<Run>,
    upcase: UpcaseTable,
    options: NtfsOptions,
}

impl Ntfs {
    pub fn open<V: Volume + 'static>(volume: V, options: NtfsOptions) -> NtfsResult<Self> {
        let mut volume: Box<dyn Volume> = Box::new(volume);
        let boot = volume.read_at(0, BOOT_SECTOR_SIZE)?;
        let geometry = parse_boot_sector(&boot)?;
        log::debug!(
            "NTFS volume: {} byte clusters, MFT at LCN {}, {} byte records",
            geometry.cluster_size,
            geometry.mft_lcn,
            geometry.file_record_size
        );

        let mut ntfs = Ntfs {
            volume,
            geometry,
            mft_runs: Vec::new(),
            upcase: UpcaseTable::ascii(),
            options,
        };

        // Record 0 before any run list is known
        let record = ntfs.load_record(MFT_RECORD_MFT)?;
        let mut direct_runs = Vec::new();
        for attribute in record.attributes() {
            let attribute = attribute?;
            if attribute.is(AttributeType::Data) && attribute.name.is_empty() {
                direct_runs.extend(attribute.runs()?);
            }
        }
        if direct_runs.is_empty() {
            return Err(NtfsError::MissingAttribute {
                record: MFT_RECORD_MFT,
                attribute: AttributeType::Data.name().to_string(),
            });
        }
        ntfs.mft_runs = direct_runs;

        // An MFT with its own attribute list keeps the rest of its runs in extension records
        let mut mft = MftFile::from_record(&mut ntfs, record)?;
        if mft.attribute_list().is_some() {
            let data = mft
                .find_named(&mut ntfs, AttributeType::Data, "")?
                .ok_or_else(|| NtfsError::MissingAttribute {
                    record: MFT_RECORD_MFT,
                    attribute: AttributeType::Data.name().to_string(),
                })?;
            let reader = AttributeReader::open(&mut ntfs, &mut mft, &data)?;
            ntfs.mft_runs = reader.runs().to_vec();
            log::debug!("MFT spans {} runs", ntfs.mft_runs.len());
        }

        let mut upcase = ntfs.open_file(MftReference::new(MFT_RECORD_UPCASE, 0))?;
        let first = upcase
            .first_attribute(&mut ntfs, AttributeMask::of(AttributeType::Data))?
            .ok_or_else(|| NtfsError::MissingAttribute {
                record: MFT_RECORD_UPCASE,
                attribute: AttributeType::Data.name().to_string(),
            })?;
        let table = AttributeReader::open(&mut ntfs, &mut upcase, &first)?.read_all(&mut ntfs)?;
        ntfs.upcase = UpcaseTable::from_bytes(&table)?;

        Ok(ntfs)
    }

    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    pub fn upcase(&self) -> &UpcaseTable {
        &self.upcase
    }

    pub fn options(&self) -> &NtfsOptions {
        &self.options
    }

    pub fn mft_runs(&self) -> &[Run] {
        &self.mft_runs
    }

    pub fn read_bytes(&mut self, offset: u64, len: usize) -> NtfsResult<Vec<u8>> {
        Ok(self.volume.read_at(offset, len)?)
    }

    /// Load and validate MFT record `number`.
    pub fn load_record(&mut self, number: u64) -> NtfsResult<MftRecord> {
        let record_size = u64::from(self.geometry.file_record_size);
        let data = if number == MFT_RECORD_MFT {
            self.read_bytes(self.geometry.mft_offset(), record_size as usize)?
        } else {
            let offset = number
                .checked_mul(record_size)
                .ok_or_else(|| NtfsError::corrupt_record(number, "record lies beyond the MFT"))?;
            self.read_mft_bytes(number, offset, record_size as usize)?
        };
        MftRecord::parse(number, data, self.geometry.bytes_per_sector as usize)
    }

    pub fn open_file(&mut self, reference: MftReference) -> NtfsResult<MftFile> {
        MftFile::load(self, reference)
    }

    /// Bytes of the MFT stream itself, which may straddle runs.
    fn read_mft_bytes(&mut self, number: u64, offset: u64, len: usize) -> NtfsResult<Vec<u8>> {
        let cluster_size = u64::from(self.geometry.cluster_size);
        let mut out = Vec::with_capacity(len);
        let mut pos = offset;
        let end = offset.saturating_add(len as u64);

        while pos < end {
            let vcn = pos / cluster_size;
            let run = self
                .mft_runs
                .iter()
                .find(|r| r.contains(vcn))
                .copied()
                .ok_or_else(|| NtfsError::corrupt_record(number, "record lies beyond the MFT"))?;
            let disk = run
                .disk_offset(vcn, cluster_size)?
                .ok_or_else(|| NtfsError::corrupt_record(number, "record lies in a sparse MFT run"))?;
            let piece_end = end.min(run.end_vcn().saturating_mul(cluster_size));
            let bytes = self.read_bytes(disk.saturating_add(pos % cluster_size), (piece_end - pos) as usize)?;
            out.extend_from_slice(&bytes);
            pos = piece_end;
        }
        Ok(out)
    }
}
