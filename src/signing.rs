//! Signing of images.
//!
//! Signing happens in two steps.  First a zero-filled placeholder entry is appended to the
//! archive.  Then the container is hashed with the placeholder's extent zeroed, the digest is
//! signed, and the finished record is written over the placeholder in place.  The record is padded
//! so that its CRC-32 equals the placeholder's, which leaves every byte outside the extent
//! (including the CRCs in the zip headers) unchanged.

use std::{
    fs::{File, OpenOptions},
    io::{Seek, SeekFrom, Write},
    path::Path,
};

use anyhow::{bail, ensure, Context, Result};
use log::debug;
use openssl::{
    pkey::{PKey, Private},
    pkey_ctx::PkeyCtx,
    rsa::Padding,
    x509::X509,
};
use zip::{write::SimpleFileOptions, CompressionMethod, ZipWriter};

use crate::{
    chain::KeyKind,
    container::{self, EntryExtent},
    hasher::HashAlgorithm,
    record::{SignatureRecord, RECORD_VERSION},
};

/// Size of the signature entry reserved by [`append_null_signature`].
pub const SIGNATURE_PLACEHOLDER_LEN: usize = 8192;

/// A signing certificate with its private key.
pub struct SigningKey {
    cert_pem: Vec<u8>,
    key: PKey<Private>,
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key", &"<redacted>")
            .finish()
    }
}

impl SigningKey {
    /// Load from a PEM-encoded certificate and private key, which must belong together.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let cert = X509::from_pem(cert_pem).context("parsing certificate PEM")?;
        let key = PKey::private_key_from_pem(key_pem).context("parsing private key PEM")?;

        let cert_pubkey = cert
            .public_key()
            .context("extracting public key from certificate")?;
        ensure!(
            cert_pubkey.public_eq(&key),
            "certificate public key does not match the provided private key"
        );

        Ok(Self {
            cert_pem: cert.to_pem().context("encoding certificate PEM")?,
            key,
        })
    }

    /// The certificate, as written into signature records.
    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    /// Signs a pre-computed digest: ECDSA for EC keys, PKCS#1 v1.5 for RSA keys.
    pub fn sign_digest(&self, algorithm: HashAlgorithm, digest: &[u8]) -> Result<Vec<u8>> {
        let kind = KeyKind::of(&self.key);
        if kind == KeyKind::Other {
            bail!("unsupported signing key type {:?}", self.key.id());
        }

        let mut ctx = PkeyCtx::new(&self.key)?;
        ctx.sign_init()?;
        ctx.set_signature_md(algorithm.md())?;
        if kind == KeyKind::Rsa {
            ctx.set_rsa_padding(Padding::PKCS1)?;
        }

        let mut signature = vec![];
        ctx.sign_to_vec(digest, &mut signature)
            .context("signing digest")?;
        Ok(signature)
    }
}

/// Finds the signature entry of the image at `path`, if it has one.
pub fn locate_signature(path: &Path) -> Result<Option<EntryExtent>> {
    let mut archive = container::open_archive(path)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(container::entry_extent(
        &mut archive,
        container::signature_entry_name(path),
    )?)
}

/// Appends a zero-filled, uncompressed signature entry to the image at `path`.
pub fn append_null_signature(path: &Path) -> Result<()> {
    ensure!(
        locate_signature(path)?.is_none(),
        "{} already has a signature entry",
        path.display()
    );

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .with_context(|| format!("opening {} for writing", path.display()))?;
    let mut zip = ZipWriter::new_append(file).context("opening archive for appending")?;
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    zip.start_file(container::signature_entry_name(path), options)?;
    zip.write_all(&[0u8; SIGNATURE_PLACEHOLDER_LEN])?;
    zip.finish()?;
    Ok(())
}

/// Writes `record` over the data of the image's signature entry.
///
/// `record.offset` and `record.size` are ignored: the entry is located again.
pub fn install_record(path: &Path, record: &SignatureRecord) -> Result<()> {
    let extent = stored_signature(path)?;
    let size = usize::try_from(extent.size)?;
    let encoded = record.encode_padded(size, extent.crc32)?;

    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("opening {} for writing", path.display()))?;
    file.seek(SeekFrom::Start(extent.offset))?;
    file.write_all(&encoded)?;
    Ok(())
}

/// Signs the image at `path`, which must already have a signature entry.
pub fn sign_container(path: &Path, key: &SigningKey, algorithm: HashAlgorithm) -> Result<()> {
    let extent = stored_signature(path)?;

    let mut file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let digest = algorithm
        .hash_excluding(&mut file, extent.offset, extent.size)
        .context("hashing container")?;
    debug!("signing {} digest {}", path.display(), hex::encode(&digest));

    let record = SignatureRecord {
        version: RECORD_VERSION.to_string(),
        hash_algorithm: algorithm.name().to_string(),
        issuer_cert: key.cert_pem().to_vec(),
        signature: key.sign_digest(algorithm, &digest)?,
        offset: extent.offset,
        size: extent.size,
    };
    install_record(path, &record)
}

fn stored_signature(path: &Path) -> Result<EntryExtent> {
    let Some(extent) = locate_signature(path)? else {
        bail!("{} has no signature entry", path.display());
    };
    ensure!(
        extent.stored,
        "signature entry of {} is compressed",
        path.display()
    );
    Ok(extent)
}
