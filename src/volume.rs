//! Raw Volume Access Module
//! Byte-addressed reads from a device, an image file or an in-memory buffer

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use memmap2::Mmap;

#[cfg(windows)]
use std::os::windows::fs::OpenOptionsExt;

const SECTOR_SIZE: u64 = 512;

/// Source of volume bytes. Offsets are relative to the start of the volume
/// and a successful read always returns exactly `len` bytes.
pub trait Volume {
    fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>>;
}

impl<V: Volume + ?Sized> Volume for Box<V> {
    fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        (**self).read_at(offset, len)
    }
}

/// Sector-aligned reader over a device, a file or anything seekable.
///
/// Raw devices only accept reads on sector boundaries, so every request is
/// widened to whole sectors and the requested span is cut out afterwards.
pub struct DiskReader<R = File> {
    handle: R,
    base_offset: u64,
    sector_size: u64,
}

impl DiskReader<File> {
    /// Open a physical drive, a partition or an image file.
    /// For Windows: Use paths like "\\.\PhysicalDrive0" or "\\.\C:"
    pub fn open(path: &str, base_offset: u64) -> io::Result<Self> {
        #[cfg(windows)]
        let file = {
            use winapi::um::winnt::{FILE_SHARE_READ, FILE_SHARE_WRITE};

            // Mounted volumes stay open for writing by the system
            OpenOptions::new()
                .read(true)
                .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE)
                .open(path)?
        };

        #[cfg(not(windows))]
        let file = OpenOptions::new().read(true).open(path)?;

        log::debug!("opened {} for raw reads at base offset {}", path, base_offset);
        Ok(DiskReader::from_reader(file, base_offset))
    }
}

impl<R: Read + Seek> DiskReader<R> {
    pub fn from_reader(handle: R, base_offset: u64) -> Self {
        DiskReader {
            handle,
            base_offset,
            sector_size: SECTOR_SIZE,
        }
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    fn read_aligned(&mut self, start: u64, len: usize) -> io::Result<Vec<u8>> {
        let overflow = || io::Error::new(io::ErrorKind::InvalidInput, "offset overflow");
        let absolute = self.base_offset.checked_add(start).ok_or_else(overflow)?;
        let aligned_start = absolute - absolute % self.sector_size;
        let aligned_end = absolute
            .checked_add(len as u64)
            .and_then(|end| end.div_ceil(self.sector_size).checked_mul(self.sector_size))
            .ok_or_else(overflow)?;
        let lead = (absolute - aligned_start) as usize;

        let mut buffer = vec![0u8; (aligned_end - aligned_start) as usize];
        self.handle.seek(SeekFrom::Start(aligned_start))?;

        // Images need not end on a sector boundary; only the requested span must be present
        let mut filled = 0;
        while filled < buffer.len() {
            match self.handle.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        if filled < lead + len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read at offset {}: wanted {} bytes", start, len),
            ));
        }

        buffer.truncate(lead + len);
        buffer.drain(..lead);
        Ok(buffer)
    }
}

impl<R: Read + Seek> Volume for DiskReader<R> {
    fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        self.read_aligned(offset, len)
    }
}

/// Memory-mapped image file.
pub struct MappedImage {
    map: Mmap,
    base_offset: u64,
}

impl MappedImage {
    pub fn open<P: AsRef<Path>>(path: P, base_offset: u64) -> io::Result<Self> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the image is opened read-only; concurrent external writes are not supported
        let map = unsafe { Mmap::map(&file)? };
        log::debug!(
            "mapped {} ({} bytes) at base offset {}",
            path.as_ref().display(),
            map.len(),
            base_offset
        );
        Ok(MappedImage { map, base_offset })
    }

    pub fn len(&self) -> u64 {
        (self.map.len() as u64).saturating_sub(self.base_offset)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Volume for MappedImage {
    fn read_at(&mut self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let start = self
            .base_offset
            .checked_add(offset)
            .and_then(|s| usize::try_from(s).ok());
        let range = start.and_then(|s| Some(s..s.checked_add(len)?));
        match range.and_then(|r| self.map.get(r)) {
            Some(bytes) => Ok(bytes.to_vec()),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {} bytes at offset {} is past the image end", len, offset),
            )),
        }
    }
}

/// Get the physical path for a drive letter
pub fn get_volume_path(drive_letter: &str) -> String {
    let letter = drive_letter
        .trim_end_matches('\\')
        .trim_end_matches(':')
        .to_uppercase();
    format!("\\\\.\\{}:", letter)
}
