//! Test utilities.
//!
//! This module provides a shared test PKI, generated once per test binary, and helpers to build
//! and tamper with images in temporary directories.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicU32, Ordering},
};

use once_cell::sync::Lazy;
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    ec::{EcGroup, EcKey},
    hash::MessageDigest,
    nid::Nid,
    pkey::{Id, PKey, Private},
    rsa::Rsa,
    x509::{X509Builder, X509Name, X509NameBuilder, X509},
};
use tempfile::TempDir;
use zip::{write::SimpleFileOptions, ZipWriter};

use crate::{
    chain::TrustedRoot,
    container::{self, EntryExtent},
    hasher::HashAlgorithm,
    signing::{append_null_signature, sign_container, SigningKey},
};

/// Allocate a temporary directory.
pub(crate) fn tempdir() -> TempDir {
    tempfile::Builder::new()
        .prefix("swi-verify-test-")
        .tempdir()
        .unwrap()
}

pub(crate) fn ec_key() -> PKey<Private> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).unwrap();
    PKey::from_ec_key(EcKey::generate(&group).unwrap()).unwrap()
}

fn rsa_key() -> PKey<Private> {
    PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap()
}

fn ed25519_key() -> PKey<Private> {
    PKey::generate_ed25519().unwrap()
}

fn name(common_name: &str) -> X509Name {
    let mut builder = X509NameBuilder::new().unwrap();
    builder.append_entry_by_text("O", "swi-verify tests").unwrap();
    builder.append_entry_by_text("CN", common_name).unwrap();
    builder.build()
}

fn build_cert(
    subject: &str,
    issuer: &X509Name,
    key: &PKey<Private>,
    signer: &PKey<Private>,
) -> X509 {
    static SERIAL: AtomicU32 = AtomicU32::new(1);

    let mut builder = X509Builder::new().unwrap();
    builder.set_version(2).unwrap();
    let serial = BigNum::from_u32(SERIAL.fetch_add(1, Ordering::Relaxed)).unwrap();
    builder
        .set_serial_number(&serial.to_asn1_integer().unwrap())
        .unwrap();
    builder.set_subject_name(&name(subject)).unwrap();
    builder.set_issuer_name(issuer).unwrap();
    builder.set_pubkey(key).unwrap();
    builder
        .set_not_before(&Asn1Time::days_from_now(0).unwrap())
        .unwrap();
    builder
        .set_not_after(&Asn1Time::days_from_now(365).unwrap())
        .unwrap();

    let digest = match signer.id() {
        Id::ED25519 => MessageDigest::null(),
        _ => MessageDigest::sha256(),
    };
    builder.sign(signer, digest).unwrap();
    builder.build()
}

/// A certificate authority: a self-signed certificate with its key.
pub(crate) struct Authority {
    pub cert: X509,
    pub key: PKey<Private>,
    common_name: String,
}

impl Authority {
    fn new(common_name: &str, key: PKey<Private>) -> Self {
        let cert = build_cert(common_name, &name(common_name), &key, &key);
        Self {
            cert,
            key,
            common_name: common_name.to_string(),
        }
    }

    pub fn cert_pem(&self) -> Vec<u8> {
        self.cert.to_pem().unwrap()
    }

    pub fn trusted_root(&self) -> TrustedRoot {
        TrustedRoot::Pem(self.cert_pem())
    }

    /// Issues a certificate for `key`, optionally claiming a different issuer name.
    pub fn issue(&self, subject: &str, key: &PKey<Private>, issuer_name: Option<&str>) -> X509 {
        let issuer = name(issuer_name.unwrap_or(&self.common_name));
        build_cert(subject, &issuer, key, &self.key)
    }

    fn signer(&self, subject: &str, key: PKey<Private>, issuer_name: Option<&str>) -> SigningKey {
        let cert = self.issue(subject, &key, issuer_name);
        SigningKey::from_pem(
            &cert.to_pem().unwrap(),
            &key.private_key_to_pem_pkcs8().unwrap(),
        )
        .unwrap()
    }
}

pub(crate) struct TestPki {
    pub ec_root: Authority,
    pub rsa_root: Authority,
    pub ed25519_root: Authority,
    /// An EC root which issued nothing used in the tests.
    pub foreign_root: Authority,
    pub ec_signer: SigningKey,
    pub rsa_signer: SigningKey,
    /// Signed by the EC root's key, but naming some other issuer.
    pub renamed_signer: SigningKey,
    /// An Ed25519 certificate issued by the EC root.
    pub ed25519_signer: SigningKey,
    pub rsa_issued_ec_leaf: X509,
    pub ed25519_issued: X509,
    pub ed25519_renamed: X509,
}

impl TestPki {
    fn generate() -> Self {
        let ec_root = Authority::new("Test EC Root", ec_key());
        let rsa_root = Authority::new("Test RSA Root", rsa_key());
        let ed25519_root = Authority::new("Test Ed25519 Root", ed25519_key());
        let foreign_root = Authority::new("Test EC Root", ec_key());

        Self {
            ec_signer: ec_root.signer("EC signer", ec_key(), None),
            rsa_signer: rsa_root.signer("RSA signer", rsa_key(), None),
            renamed_signer: ec_root.signer("Renamed signer", ec_key(), Some("Somebody Else")),
            ed25519_signer: ec_root.signer("Ed25519 signer", ed25519_key(), None),
            rsa_issued_ec_leaf: rsa_root.issue("EC leaf", &ec_key(), None),
            ed25519_issued: ed25519_root.issue("EC leaf", &ec_key(), None),
            ed25519_renamed: ed25519_root.issue("EC leaf", &ec_key(), Some("Somebody Else")),
            ec_root,
            rsa_root,
            ed25519_root,
            foreign_root,
        }
    }
}

pub(crate) static PKI: Lazy<TestPki> = Lazy::new(TestPki::generate);

/// The entries of a small image: a version file and a compressible root filesystem.
pub(crate) fn payload() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("version", b"SWI_VERSION=4.30.0F\nSWI_ARCH=i386\n".to_vec()),
        (
            "rootfs-i386.sqsh",
            (0..100_000u32).map(|i| (i % 251) as u8).collect(),
        ),
    ]
}

/// Writes a zip archive holding `entries`, compressed with the default method.
pub(crate) fn write_image(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Writes an image with `entries` and signs it with `signer`.
pub(crate) fn signed_image_with(
    dir: &Path,
    name: &str,
    entries: &[(&str, Vec<u8>)],
    signer: &SigningKey,
) -> PathBuf {
    let path = dir.join(name);
    write_image(&path, entries);
    append_null_signature(&path).unwrap();
    sign_container(&path, signer, HashAlgorithm::Sha256).unwrap();
    path
}

pub(crate) fn signed_image(dir: &Path, name: &str, signer: &SigningKey) -> PathBuf {
    signed_image_with(dir, name, &payload(), signer)
}

pub(crate) fn extent_of(path: &Path, entry: &str) -> EntryExtent {
    let mut archive = container::open_archive(path).unwrap();
    container::entry_extent(&mut archive, entry).unwrap().unwrap()
}

/// Inverts the byte at `offset` in the file at `path`.
pub(crate) fn flip_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8];
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xff;
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&byte).unwrap();
}
