//! Validation of the signing certificate against the trusted root.
//!
//! Deployed signing certificates don't always name the root's subject as their issuer, so the
//! check is made against the root's key rather than by building a certificate path.  For EC and
//! RSA roots the signing certificate's own signature is verified directly over its TBS bytes;
//! roots with other key types fall back to strict direct-issuance checking.

use std::{borrow::Cow, path::PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use openssl::{
    hash::MessageDigest,
    pkey::{HasPublic, Id, PKeyRef},
    rsa::Padding,
    sign::Verifier,
    x509::{X509Ref, X509VerifyResult, X509},
};

use crate::result::ResultCode;

/// The root certificate compiled into the binary.
pub static BUILTIN_ROOT_CA: &[u8] = include_bytes!("../certs/root-ca.crt");

/// Where the trusted root certificate comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TrustedRoot {
    #[default]
    Builtin,
    /// A PEM file supplied by the caller.
    File(PathBuf),
    Pem(Vec<u8>),
}

impl TrustedRoot {
    /// Loads the root certificate.  Any failure is [`ResultCode::InvalidRootCert`].
    pub fn load(&self) -> Result<X509, ResultCode> {
        let pem = match self {
            TrustedRoot::Builtin => Cow::Borrowed(BUILTIN_ROOT_CA),
            TrustedRoot::File(path) => Cow::Owned(std::fs::read(path).map_err(|e| {
                debug!("reading root certificate {}: {e}", path.display());
                ResultCode::InvalidRootCert
            })?),
            TrustedRoot::Pem(pem) => Cow::Borrowed(pem.as_slice()),
        };

        X509::from_pem(&pem).map_err(|e| {
            debug!("parsing root certificate: {e}");
            ResultCode::InvalidRootCert
        })
    }
}

/// Loads the signing certificate carried in a signature record.
pub fn load_signing_cert(pem: &[u8]) -> Result<X509, ResultCode> {
    X509::from_pem(pem).map_err(|e| {
        debug!("parsing signing certificate: {e}");
        ResultCode::InvalidSigningCert
    })
}

/// The kinds of public key that verification distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    EllipticCurve,
    Rsa,
    Other,
}

impl KeyKind {
    pub fn of<T>(key: &PKeyRef<T>) -> Self {
        match key.id() {
            Id::EC => KeyKind::EllipticCurve,
            Id::RSA => KeyKind::Rsa,
            _ => KeyKind::Other,
        }
    }
}

/// Checks that `signing` was signed by `root`.
///
/// Returns [`ResultCode::Success`] or [`ResultCode::CertMismatch`]; a certificate that can't be
/// checked at all (unsupported algorithm, malformed DER) is a mismatch too.
pub fn validate(signing: &X509Ref, root: &X509Ref) -> ResultCode {
    match signed_by_root(signing, root) {
        Ok(true) => ResultCode::Success,
        Ok(false) => {
            debug!("signing certificate signature doesn't verify against the root");
            ResultCode::CertMismatch
        }
        Err(e) => {
            debug!("signing certificate can't be checked against the root: {e:#}");
            ResultCode::CertMismatch
        }
    }
}

fn signed_by_root(signing: &X509Ref, root: &X509Ref) -> Result<bool> {
    let root_key = root.public_key().context("extracting root public key")?;
    let kind = KeyKind::of(&root_key);
    debug!("root key is {kind:?}");

    match kind {
        KeyKind::EllipticCurve => verify_ecdsa_issued(&CertSignature::of(signing)?, &root_key),
        KeyKind::Rsa => verify_rsa_issued(&CertSignature::of(signing)?, &root_key),
        KeyKind::Other => {
            if root.issued(signing) != X509VerifyResult::OK {
                debug!("root subject doesn't match signing certificate issuer");
                return Ok(false);
            }
            Ok(signing.verify(&root_key)?)
        }
    }
}

/// The signed portion of a certificate and the signature over it.
struct CertSignature {
    tbs: Vec<u8>,
    algorithm: String,
    signature: Vec<u8>,
}

impl CertSignature {
    fn of(cert: &X509Ref) -> Result<Self> {
        let der = cert.to_der().context("encoding certificate")?;
        let (_, parsed) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| anyhow!("invalid certificate DER: {e}"))?;

        Ok(Self {
            tbs: parsed.tbs_certificate.as_ref().to_vec(),
            algorithm: parsed.signature_algorithm.algorithm.to_id_string(),
            signature: parsed.signature_value.data.to_vec(),
        })
    }
}

fn verify_ecdsa_issued(cert: &CertSignature, key: &PKeyRef<impl HasPublic>) -> Result<bool> {
    let digest = match cert.algorithm.as_str() {
        "1.2.840.10045.4.1" => MessageDigest::sha1(),
        "1.2.840.10045.4.3.1" => MessageDigest::sha224(),
        "1.2.840.10045.4.3.2" => MessageDigest::sha256(),
        "1.2.840.10045.4.3.3" => MessageDigest::sha384(),
        "1.2.840.10045.4.3.4" => MessageDigest::sha512(),
        other => bail!("unsupported ECDSA certificate signature algorithm {other}"),
    };

    let mut verifier = Verifier::new(digest, key)?;
    verifier.update(&cert.tbs)?;
    Ok(verifier.verify(&cert.signature)?)
}

fn verify_rsa_issued(cert: &CertSignature, key: &PKeyRef<impl HasPublic>) -> Result<bool> {
    let digest = match cert.algorithm.as_str() {
        "1.2.840.113549.1.1.5" => MessageDigest::sha1(),
        "1.2.840.113549.1.1.14" => MessageDigest::sha224(),
        "1.2.840.113549.1.1.11" => MessageDigest::sha256(),
        "1.2.840.113549.1.1.12" => MessageDigest::sha384(),
        "1.2.840.113549.1.1.13" => MessageDigest::sha512(),
        other => bail!("unsupported RSA certificate signature algorithm {other}"),
    };

    let mut verifier = Verifier::new(digest, key)?;
    verifier.set_rsa_padding(Padding::PKCS1)?;
    verifier.update(&cert.tbs)?;
    Ok(verifier.verify(&cert.signature)?)
}
