//! raw_ntfs_copy - copy files straight off an NTFS volume
//!
//! Reads the MFT, directory indexes and attribute runs from a raw device or
//! image instead of going through the operating system, so files that are
//! locked or hidden from the file system API can still be copied.
//!
//! Raw device access requires Administrator (or root) privileges.

use serde::Serialize;
use std::env;

use raw_ntfs_copy::boot_sector::VolumeGeometry;
use raw_ntfs_copy::error::NtfsResult;
use raw_ntfs_copy::extract::extract_file;
use raw_ntfs_copy::listing::list_directory;
use raw_ntfs_copy::ntfs::Ntfs;
use raw_ntfs_copy::settings::{parse_args, usage, Command, Output, SourceSettings};
use raw_ntfs_copy::sink::{DataSink, FolderSink, TcpSink};
use raw_ntfs_copy::volume::{DiskReader, MappedImage};

#[derive(Serialize, Debug)]
struct VolumeInfo<'a> {
    #[serde(flatten)]
    geometry: &'a VolumeGeometry,
    volume_size: u64,
    serial: String,
}

#[derive(Serialize, Debug)]
struct Failure {
    success: bool,
    error: String,
}

fn open_volume(source: &SourceSettings) -> NtfsResult<Ntfs> {
    let options = source.options.clone();
    // Devices cannot be mapped, images read fastest mapped
    if source.raw || source.path.starts_with("\\\\.\\") {
        Ntfs::open(DiskReader::open(&source.path, source.offset)?, options)
    } else {
        Ntfs::open(MappedImage::open(&source.path, source.offset)?, options)
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to encode result: {}", e),
    }
}

fn run(command: Command) -> NtfsResult<()> {
    match command {
        Command::Info { source } => {
            let ntfs = open_volume(&source)?;
            let geometry = ntfs.geometry();
            print_json(&VolumeInfo {
                geometry,
                volume_size: geometry.volume_size(),
                serial: geometry.serial_hex(),
            });
        }
        Command::Extract {
            source,
            target,
            selector,
            output,
            output_name,
        } => {
            let mut ntfs = open_volume(&source)?;
            let mut sink: Box<dyn DataSink> = match output {
                Output::Folder(folder) => Box::new(FolderSink::new(folder)?),
                Output::Tcp(address) => Box::new(TcpSink::connect(&address)?),
            };
            let summary = extract_file(
                &mut ntfs,
                &target,
                selector,
                output_name.as_deref(),
                sink.as_mut(),
            )?;
            print_json(&summary);
        }
        Command::List {
            source,
            path,
            detail,
        } => {
            let mut ntfs = open_volume(&source)?;
            let listing = list_directory(&mut ntfs, &path, detail)?;
            print_json(&listing);
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let command = match parse_args(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", usage());
            std::process::exit(1);
        }
    };

    if let Err(e) = run(command) {
        log::error!("{}", e);
        print_json(&Failure {
            success: false,
            error: e.to_string(),
        });
        std::process::exit(1);
    }
}
