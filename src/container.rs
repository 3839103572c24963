//! Access to the zip archive underlying an image.

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use log::debug;
use thiserror::Error;
use zip::{result::ZipError, CompressionMethod, ZipArchive};

use crate::record::SignatureRecord;

/// Name of the signature entry in a software image.
pub const SWI_SIGNATURE_ENTRY: &str = "swi-signature";
/// Name of the signature entry in an extension.
pub const SWIX_SIGNATURE_ENTRY: &str = "swix-signature";

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("not a zip archive: {0}")]
    NotAnArchive(#[source] ZipError),
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Picks the signature entry name from the container's file extension.
pub fn signature_entry_name(path: &Path) -> &'static str {
    match path.extension() {
        Some(ext) if ext.eq_ignore_ascii_case("swix") => SWIX_SIGNATURE_ENTRY,
        _ => SWI_SIGNATURE_ENTRY,
    }
}

/// Opens `path` as a zip archive.
pub fn open_archive(path: &Path) -> Result<ZipArchive<File>, ContainerError> {
    let file = File::open(path)?;
    ZipArchive::new(file).map_err(ContainerError::NotAnArchive)
}

pub fn is_archive(path: &Path) -> bool {
    open_archive(path).is_ok()
}

/// Where an entry's data lives inside the container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryExtent {
    /// Offset of the first data byte, past the local file header.
    pub offset: u64,
    /// The entry's compressed size: its length on disk.
    pub size: u64,
    pub crc32: u32,
    /// Whether the entry is stored uncompressed, so its data is its contents.
    pub stored: bool,
}

/// Locates the data of the entry `name`, or `None` if it isn't in the archive.
pub fn entry_extent(
    archive: &mut ZipArchive<impl Read + io::Seek>,
    name: &str,
) -> Result<Option<EntryExtent>, ContainerError> {
    match archive.by_name(name) {
        Ok(entry) => Ok(Some(EntryExtent {
            offset: entry.data_start(),
            size: entry.compressed_size(),
            crc32: entry.crc32(),
            stored: entry.compression() == CompressionMethod::Stored,
        })),
        Err(ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reads and parses the signature record `name`, or returns `None` if the archive has none.
pub fn read_signature_record(
    archive: &mut ZipArchive<impl Read + io::Seek>,
    name: &str,
) -> Result<Option<SignatureRecord>, ContainerError> {
    let Some(extent) = entry_extent(archive, name)? else {
        return Ok(None);
    };

    let entry = archive.by_name(name)?;
    let mut record = SignatureRecord::parse(BufReader::new(entry))?;
    record.offset = extent.offset;
    record.size = extent.size;
    debug!(
        "signature record {name}: offset {} size {} hash {:?}",
        record.offset, record.size, record.hash_algorithm
    );
    Ok(Some(record))
}

/// Reads the whole (decompressed) entry `name`, or returns `None` if it isn't in the archive.
pub fn read_entry(
    archive: &mut ZipArchive<impl Read + io::Seek>,
    name: &str,
) -> Result<Option<Vec<u8>>, ContainerError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mut data = vec![];
    entry.read_to_end(&mut data)?;
    Ok(Some(data))
}
