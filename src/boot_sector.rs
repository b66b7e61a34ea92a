//! NTFS Boot Sector Module
//! Volume geometry from the first sector of the volume

use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Seek, SeekFrom};

use crate::error::{NtfsError, NtfsResult};

pub const BOOT_SECTOR_SIZE: usize = 512;
const NTFS_OEM_ID: &[u8] = b"NTFS    ";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_cluster: u32,
    pub cluster_size: u32,
    pub total_sectors: u64,
    pub mft_lcn: u64,
    pub mft_mirror_lcn: u64,
    pub file_record_size: u32,
    pub index_block_size: u32,
    pub serial_number: u64,
}

impl VolumeGeometry {
    pub fn volume_size(&self) -> u64 {
        self.total_sectors.saturating_mul(u64::from(self.bytes_per_sector))
    }

    pub fn mft_offset(&self) -> u64 {
        self.mft_lcn.saturating_mul(u64::from(self.cluster_size))
    }

    pub fn serial_hex(&self) -> String {
        hex::encode_upper(self.serial_number.to_be_bytes())
    }
}

/// Parse NTFS boot sector to get the volume geometry
pub fn parse_boot_sector(data: &[u8]) -> NtfsResult<VolumeGeometry> {
    if data.len() < BOOT_SECTOR_SIZE {
        return Err(NtfsError::InvalidBootSector(format!(
            "sector is {} bytes",
            data.len()
        )));
    }

    if &data[3..11] != NTFS_OEM_ID {
        return Err(NtfsError::InvalidBootSector(
            "missing NTFS signature".to_string(),
        ));
    }

    let mut cursor = Cursor::new(data);

    // Bytes per sector at offset 0x0B
    cursor.seek(SeekFrom::Start(0x0B))?;
    let bytes_per_sector = u32::from(cursor.read_u16::<LittleEndian>()?);

    // Sectors per cluster at offset 0x0D
    let raw_spc = cursor.read_u8()?;
    let sectors_per_cluster = decode_sectors_per_cluster(raw_spc)?;

    // Total sectors at offset 0x28
    cursor.seek(SeekFrom::Start(0x28))?;
    let total_sectors = cursor.read_u64::<LittleEndian>()?;

    // MFT and mirror clusters at 0x30 / 0x38
    let mft_lcn = cursor.read_u64::<LittleEndian>()?;
    let mft_mirror_lcn = cursor.read_u64::<LittleEndian>()?;

    // Clusters per file record at 0x40, clusters per index block at 0x44
    let raw_record = cursor.read_i8()?;
    cursor.seek(SeekFrom::Start(0x44))?;
    let raw_index = cursor.read_i8()?;

    // Serial number at 0x48
    cursor.seek(SeekFrom::Start(0x48))?;
    let serial_number = cursor.read_u64::<LittleEndian>()?;

    if !(256..=4096).contains(&bytes_per_sector) || !bytes_per_sector.is_power_of_two() {
        return Err(NtfsError::InvalidBootSector(format!(
            "bytes per sector {}",
            bytes_per_sector
        )));
    }

    let cluster_size = bytes_per_sector
        .checked_mul(sectors_per_cluster)
        .filter(|&c| c > 0)
        .ok_or_else(|| NtfsError::InvalidBootSector("cluster size".to_string()))?;

    let file_record_size = decode_structure_size(raw_record, cluster_size)
        .ok_or_else(|| NtfsError::InvalidBootSector("file record size".to_string()))?;
    if file_record_size < bytes_per_sector || file_record_size % bytes_per_sector != 0 {
        return Err(NtfsError::InvalidBootSector(format!(
            "file record size {} with sector size {}",
            file_record_size, bytes_per_sector
        )));
    }

    let index_block_size = decode_structure_size(raw_index, cluster_size)
        .ok_or_else(|| NtfsError::InvalidBootSector("index block size".to_string()))?;

    Ok(VolumeGeometry {
        bytes_per_sector,
        sectors_per_cluster,
        cluster_size,
        total_sectors,
        mft_lcn,
        mft_mirror_lcn,
        file_record_size,
        index_block_size,
        serial_number,
    })
}

fn decode_sectors_per_cluster(raw: u8) -> NtfsResult<u32> {
    match raw {
        0 => Err(NtfsError::InvalidBootSector(
            "zero sectors per cluster".to_string(),
        )),
        // Large-cluster volumes store a negative shift count
        0x81..=0xFF => {
            let shift = 256 - u32::from(raw);
            if shift > 16 {
                return Err(NtfsError::InvalidBootSector(format!(
                    "sectors per cluster shift {}",
                    shift
                )));
            }
            Ok(1 << shift)
        }
        v => Ok(u32::from(v)),
    }
}

/// Positive values count clusters, negative values are a power of two in bytes.
fn decode_structure_size(raw: i8, cluster_size: u32) -> Option<u32> {
    if raw > 0 {
        (raw as u32).checked_mul(cluster_size)
    } else if raw < 0 && raw > -32 {
        Some(1u32 << (-(raw as i32)) as u32)
    } else {
        None
    }
}
