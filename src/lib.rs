//! Raw NTFS read engine
//!
//! Parses NTFS metadata straight from a volume or disk image: MFT records
//! with their fixups, attribute lists, run lists, compressed and sparse
//! content, `$I30` directory indexes and reparse points. Files are found by
//! path or MFT number and streamed out without the host file system driver.

pub mod attribute;
pub mod attribute_list;
pub mod boot_sector;
pub mod bytes;
pub mod catalog;
pub mod content;
pub mod error;
pub mod extract;
pub mod file_name;
pub mod index;
pub mod listing;
pub mod lznt1;
pub mod ntfs;
pub mod path;
pub mod record;
pub mod reference;
pub mod reparse;
pub mod run_list;
pub mod settings;
pub mod sink;
pub mod upcase;
pub mod volume;

#[cfg(test)]
pub(crate) mod test_image;

pub use error::{NtfsError, NtfsResult};
pub use ntfs::{Ntfs, NtfsOptions};
