//! Container digests with the signature record blanked out.
//!
//! A container is signed before its signature record is filled in, so the digest covers the
//! record's extent as a run of zeros.  Verification reproduces that byte stream: everything before
//! the record verbatim, `size` zero bytes, then everything after the record verbatim.

use std::{
    cmp::min,
    fs::File,
    io::{self, ErrorKind, Read, Seek, SeekFrom},
    path::Path,
};

use openssl::md::{Md, MdRef};
use sha2::{Digest, Sha256};
use thiserror::Error;

const BLOCK_SIZE: usize = 65536;

/// The hash algorithms a signature record may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
}

impl HashAlgorithm {
    /// Looks up the algorithm named in a signature record.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SHA-256" | "sha256" => Some(HashAlgorithm::Sha256),
            _ => None,
        }
    }

    /// The name written into new signature records.
    pub fn name(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "SHA-256",
        }
    }

    /// The matching OpenSSL digest, for signing and verifying pre-hashed data.
    pub fn md(self) -> &'static MdRef {
        match self {
            HashAlgorithm::Sha256 => Md::sha256(),
        }
    }

    /// Hashes `reader` from its current position to the end, with `size` bytes starting at
    /// `offset` replaced by zeros.
    pub fn hash_excluding(
        self,
        reader: &mut (impl Read + Seek),
        offset: u64,
        size: u64,
    ) -> io::Result<Vec<u8>> {
        match self {
            HashAlgorithm::Sha256 => hash_excluding::<Sha256>(reader, offset, size),
        }
    }
}

#[derive(Debug, Error)]
pub enum HashError {
    #[error("unsupported hash algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    #[error("failed to read container: {0}")]
    Io(#[from] io::Error),
}

/// Computes the digest of the container at `path` with `size` bytes at `offset` zeroed, using the
/// algorithm named `algorithm`.
///
/// The algorithm is checked before the file is opened.
pub fn hash_container(
    path: &Path,
    algorithm: &str,
    offset: u64,
    size: u64,
) -> Result<(HashAlgorithm, Vec<u8>), HashError> {
    let algorithm = HashAlgorithm::from_name(algorithm)
        .ok_or_else(|| HashError::UnsupportedAlgorithm(algorithm.to_string()))?;
    let mut file = File::open(path)?;
    let digest = algorithm.hash_excluding(&mut file, offset, size)?;
    Ok((algorithm, digest))
}

fn hash_excluding<D: Digest>(
    reader: &mut (impl Read + Seek),
    offset: u64,
    size: u64,
) -> io::Result<Vec<u8>> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; BLOCK_SIZE];

    hash_exact(&mut hasher, reader, &mut buf, offset)?;

    buf.fill(0);
    let mut remaining = size;
    while remaining > 0 {
        let n = min(remaining, BLOCK_SIZE as u64) as usize;
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }

    let skip = i64::try_from(size).map_err(|_| io::Error::from(ErrorKind::InvalidInput))?;
    reader.seek(SeekFrom::Current(skip))?;

    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => hasher.update(&buf[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(hasher.finalize().to_vec())
}

fn hash_exact(
    hasher: &mut impl Digest,
    reader: &mut impl Read,
    buf: &mut [u8],
    mut len: u64,
) -> io::Result<()> {
    while len > 0 {
        let n = min(len, buf.len() as u64) as usize;
        reader.read_exact(&mut buf[..n])?;
        hasher.update(&buf[..n]);
        len -= n as u64;
    }
    Ok(())
}
