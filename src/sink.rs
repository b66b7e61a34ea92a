//! Output sinks for extracted streams

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::net::TcpStream;
use std::path::{Path, PathBuf};

use crate::error::NtfsResult;

/// Destination of extracted bytes. Chunks for one stream arrive in order.
pub trait DataSink {
    fn write_chunk(&mut self, stream_name: &str, bytes: &[u8]) -> NtfsResult<()>;
}

/// Characters Windows does not allow in file names.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if (c as u32) < 0x20 => '_',
            c => c,
        })
        .collect()
}

/// Writes each stream to its own file inside a folder.
pub struct FolderSink {
    folder: PathBuf,
    current: Option<(String, File)>,
}

impl FolderSink {
    pub fn new<P: AsRef<Path>>(folder: P) -> NtfsResult<Self> {
        fs::create_dir_all(folder.as_ref())?;
        Ok(FolderSink {
            folder: folder.as_ref().to_path_buf(),
            current: None,
        })
    }

    pub fn path_for(&self, stream_name: &str) -> PathBuf {
        self.folder.join(sanitize_file_name(stream_name))
    }
}

impl DataSink for FolderSink {
    fn write_chunk(&mut self, stream_name: &str, bytes: &[u8]) -> NtfsResult<()> {
        let reuse = matches!(&self.current, Some((name, _)) if name == stream_name);
        if !reuse {
            // First chunk of a stream replaces any earlier file of that name
            let path = self.path_for(stream_name);
            log::info!("writing {}", path.display());
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&path)?;
            self.current = Some((stream_name.to_string(), file));
        }
        if let Some((_, file)) = &mut self.current {
            file.write_all(bytes)?;
        }
        Ok(())
    }
}

/// Sends every byte to one TCP peer, whatever the stream.
pub struct TcpSink {
    stream: TcpStream,
}

impl TcpSink {
    pub fn connect(address: &str) -> NtfsResult<Self> {
        let stream = TcpStream::connect(address)?;
        log::info!("sending output to {}", address);
        Ok(TcpSink { stream })
    }
}

impl DataSink for TcpSink {
    fn write_chunk(&mut self, _stream_name: &str, bytes: &[u8]) -> NtfsResult<()> {
        self.stream.write_all(bytes)?;
        Ok(())
    }
}

/// Collects streams in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub streams: BTreeMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn stream(&self, name: &str) -> Option<&[u8]> {
        self.streams.get(name).map(Vec::as_slice)
    }
}

impl DataSink for MemorySink {
    fn write_chunk(&mut self, stream_name: &str, bytes: &[u8]) -> NtfsResult<()> {
        self.streams
            .entry(stream_name.to_string())
            .or_default()
            .extend_from_slice(bytes);
        Ok(())
    }
}
