//! The signature record embedded in a signed container.
//!
//! The record is a zip entry holding newline-delimited `Key:Value` lines:
//!
//! ```text
//! Version:1
//! HashAlgorithm:SHA-256
//! IssuerCert:<base64 of the signing certificate PEM>
//! Signature:<base64 of the raw signature>
//! CRCPadding:<binary>
//! ```
//!
//! `CRCPadding` always comes last.  Its value is arbitrary binary data which is chosen so that
//! the CRC-32 of the entry matches the one recorded in the zip headers, so it may itself contain
//! newlines and colons and is never interpreted.

use std::io::BufRead;

use base64::{
    alphabet,
    engine::{
        general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD},
        Engine,
    },
};
use log::warn;
use thiserror::Error;

const VERSION_KEY: &str = "Version";
const HASH_ALGORITHM_KEY: &str = "HashAlgorithm";
const ISSUER_CERT_KEY: &str = "IssuerCert";
const SIGNATURE_KEY: &str = "Signature";
const CRC_PADDING_KEY: &str = "CRCPadding";

/// The version written by [`SignatureRecord::encode`] callers in this crate.
pub const RECORD_VERSION: &str = "1";

#[derive(Debug, Error, PartialEq)]
pub enum RecordError {
    #[error("signature record needs {needed} bytes but only {available} are available")]
    TooLarge { needed: usize, available: usize },
}

/// A parsed signature record.
///
/// `offset` and `size` locate the record's bytes inside the container file.  That range is
/// replaced by zeros when the container is hashed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureRecord {
    pub version: String,
    pub hash_algorithm: String,
    /// PEM encoded signing certificate.
    pub issuer_cert: Vec<u8>,
    pub signature: Vec<u8>,
    pub offset: u64,
    pub size: u64,
}

impl SignatureRecord {
    /// Parses the `Key:Value` lines of a record.
    ///
    /// Parsing is permissive: malformed lines are logged and skipped, undecodable base64 leaves
    /// the field empty and invalid UTF-8 is replaced.  The only error is a failure of the
    /// underlying reader.  `offset` and `size` are left at zero for the caller to fill in.
    pub fn parse(mut reader: impl BufRead) -> std::io::Result<Self> {
        let mut record = Self::default();
        let mut line = vec![];

        loop {
            line.clear();
            // Read the key first: the padding value is binary and must not be read as a line.
            match read_until_any(&mut reader, b":\n", &mut line)? {
                None if line.is_empty() => break,
                Some(b':') => {
                    if line[..line.len() - 1] == *CRC_PADDING_KEY.as_bytes() {
                        break;
                    }
                    reader.read_until(b'\n', &mut line)?;
                }
                _ => {}
            }

            let text = String::from_utf8_lossy(&line);
            let fields: Vec<&str> = text.split(':').collect();
            let [key, value] = fields.as_slice() else {
                warn!(
                    "Unexpected format for line in signature record: {:?}",
                    text.trim_end()
                );
                continue;
            };

            match *key {
                VERSION_KEY => record.version = value.trim().to_string(),
                HASH_ALGORITHM_KEY => record.hash_algorithm = value.trim().to_string(),
                ISSUER_CERT_KEY => record.issuer_cert = decode_base64(value),
                SIGNATURE_KEY => record.signature = decode_base64(value),
                _ => {}
            }
        }

        Ok(record)
    }

    /// A record can only be checked if it names a certificate, a hash and a signature.
    pub fn is_well_formed(&self) -> bool {
        !self.issuer_cert.is_empty() && !self.hash_algorithm.is_empty() && !self.signature.is_empty()
    }

    /// Encodes the record fields, ending with an empty `CRCPadding:` value.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{VERSION_KEY}:{}\n{HASH_ALGORITHM_KEY}:{}\n{ISSUER_CERT_KEY}:{}\n{SIGNATURE_KEY}:{}\n{CRC_PADDING_KEY}:",
            self.version,
            self.hash_algorithm,
            STANDARD.encode(&self.issuer_cert),
            STANDARD.encode(&self.signature),
        )
        .into_bytes()
    }

    /// Encodes the record into exactly `len` bytes whose CRC-32 is `target_crc`.
    ///
    /// The padding value is zero-filled, and its last four bytes are computed to force the CRC.
    pub fn encode_padded(&self, len: usize, target_crc: u32) -> Result<Vec<u8>, RecordError> {
        let mut out = self.encode();
        let needed = out.len() + 4;
        if needed > len {
            return Err(RecordError::TooLarge {
                needed,
                available: len,
            });
        }

        out.resize(len - 4, 0);
        let patch = crc32_patch(crc32fast::hash(&out), target_crc);
        out.extend_from_slice(&patch);
        Ok(out)
    }
}

/// Like [`BufRead::read_until`], but stops at whichever of `delims` comes first.
///
/// Returns the delimiter found, or `None` at the end of the input.
fn read_until_any(
    reader: &mut impl BufRead,
    delims: &[u8],
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<u8>> {
    loop {
        let available = match reader.fill_buf() {
            Ok(available) => available,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            return Ok(None);
        }

        if let Some(pos) = available.iter().position(|b| delims.contains(b)) {
            let delim = available[pos];
            buf.extend_from_slice(&available[..=pos]);
            reader.consume(pos + 1);
            return Ok(Some(delim));
        }

        let n = available.len();
        buf.extend_from_slice(available);
        reader.consume(n);
    }
}

// Like STANDARD, but accepts non-zero trailing bits.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

/// Decodes a base64 field, skipping characters outside the alphabet.  Undecodable values are empty.
fn decode_base64(value: &str) -> Vec<u8> {
    let filtered: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect();
    LENIENT.decode(filtered).unwrap_or_default()
}

// Reflected CRC-32 (the zip polynomial).
const CRC32_TABLE: [u32; 256] = {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { 0xedb8_8320 ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
};

// The top byte of every table entry is distinct, which makes a table step invertible.
const CRC32_TOP_BYTE_INDEX: [u8; 256] = {
    let mut index = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        index[(CRC32_TABLE[i] >> 24) as usize] = i as u8;
        i += 1;
    }
    index
};

/// Returns the four bytes which, appended to data whose CRC-32 is `current`, give `target`.
///
/// Appending four bytes `P` to a CRC register `s` lands in the same state as appending four zero
/// bytes to `s ^ P`, so it is enough to run four zero-byte steps backwards from `target`.
fn crc32_patch(current: u32, target: u32) -> [u8; 4] {
    let mut state = !target;
    for _ in 0..4 {
        let index = CRC32_TOP_BYTE_INDEX[(state >> 24) as usize];
        state = ((state ^ CRC32_TABLE[index as usize]) << 8) | u32::from(index);
    }
    (state ^ !current).to_le_bytes()
}
