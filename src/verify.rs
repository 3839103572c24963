//! Verification of a single container.
//!
//! Verification is a pipeline of checks.  Each check either lets the run proceed or stops it with
//! a [`Stop`], which is either a definite [`ResultCode`] or an unexpected fault.  Faults are logged
//! and reported as [`ResultCode::VerificationFailed`]; they never escape [`SignatureVerifier::verify`].

use std::path::Path;

use log::{debug, error};
use openssl::{
    error::ErrorStack,
    md::MdRef,
    pkey::{PKeyRef, Public},
    pkey_ctx::PkeyCtx,
    rsa::Padding,
    x509::X509Ref,
};

use crate::{
    chain::{self, KeyKind, TrustedRoot},
    container::{self, ContainerError},
    hasher::{self, HashAlgorithm, HashError},
    result::ResultCode,
};

enum Stop {
    Rejected(ResultCode),
    Fault(anyhow::Error),
}

impl From<ResultCode> for Stop {
    fn from(code: ResultCode) -> Self {
        Stop::Rejected(code)
    }
}

impl From<ContainerError> for Stop {
    fn from(err: ContainerError) -> Self {
        Stop::Fault(err.into())
    }
}

impl From<HashError> for Stop {
    fn from(err: HashError) -> Self {
        match err {
            HashError::UnsupportedAlgorithm(name) => {
                debug!("unsupported hash algorithm {name:?}");
                Stop::Rejected(ResultCode::UnsupportedHashAlgorithm)
            }
            HashError::Io(e) => Stop::Fault(e.into()),
        }
    }
}

/// Verifies containers against one trusted root.
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    root: TrustedRoot,
}

impl SignatureVerifier {
    pub fn new(root: TrustedRoot) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &TrustedRoot {
        &self.root
    }

    /// Verifies the container at `path`.
    pub fn verify(&self, path: &Path) -> ResultCode {
        match self.check(path) {
            Ok(()) => ResultCode::Success,
            Err(Stop::Rejected(code)) => {
                debug!("{}: {code:?}", path.display());
                code
            }
            Err(Stop::Fault(err)) => {
                error!("{}: {err:#}", path.display());
                ResultCode::VerificationFailed
            }
        }
    }

    fn check(&self, path: &Path) -> Result<(), Stop> {
        let mut archive = container::open_archive(path).map_err(|e| {
            debug!("{}: {e}", path.display());
            ResultCode::NotAnImage
        })?;

        let record =
            container::read_signature_record(&mut archive, container::signature_entry_name(path))?
                .ok_or(ResultCode::Unsigned)?;
        if !record.is_well_formed() {
            return Err(ResultCode::InvalidSignatureFormat.into());
        }

        let signing = chain::load_signing_cert(&record.issuer_cert)?;
        let root = self.root.load()?;
        match chain::validate(&signing, &root) {
            ResultCode::Success => {}
            code => return Err(code.into()),
        }

        let (algorithm, digest) =
            hasher::hash_container(path, &record.hash_algorithm, record.offset, record.size)?;
        debug!("{} digest {}", path.display(), hex::encode(&digest));

        if signature_matches(&signing, algorithm, &digest, &record.signature) {
            Ok(())
        } else {
            Err(ResultCode::VerificationFailed.into())
        }
    }
}

/// Checks `signature` over the pre-computed `digest` with the signing certificate's key.
fn signature_matches(
    signing: &X509Ref,
    algorithm: HashAlgorithm,
    digest: &[u8],
    signature: &[u8],
) -> bool {
    let key = match signing.public_key() {
        Ok(key) => key,
        Err(e) => {
            debug!("extracting signing public key: {e}");
            return false;
        }
    };

    let result = match KeyKind::of(&key) {
        KeyKind::EllipticCurve => verify_ecdsa_prehashed(&key, algorithm.md(), digest, signature),
        KeyKind::Rsa => verify_rsa_prehashed(&key, algorithm.md(), digest, signature),
        KeyKind::Other => {
            debug!("unsupported signing key type {:?}", key.id());
            return false;
        }
    };

    result.unwrap_or_else(|e| {
        debug!("signature check failed: {e}");
        false
    })
}

fn verify_ecdsa_prehashed(
    key: &PKeyRef<Public>,
    md: &MdRef,
    digest: &[u8],
    signature: &[u8],
) -> Result<bool, ErrorStack> {
    let mut ctx = PkeyCtx::new(key)?;
    ctx.verify_init()?;
    ctx.set_signature_md(md)?;
    ctx.verify(digest, signature)
}

fn verify_rsa_prehashed(
    key: &PKeyRef<Public>,
    md: &MdRef,
    digest: &[u8],
    signature: &[u8],
) -> Result<bool, ErrorStack> {
    let mut ctx = PkeyCtx::new(key)?;
    ctx.verify_init()?;
    ctx.set_rsa_padding(Padding::PKCS1)?;
    ctx.set_signature_md(md)?;
    ctx.verify(digest, signature)
}
