//! Verification of containers holding several variant sub-images.
//!
//! A multi-image container declares its variants in a manifest.  Each variant is extracted to a
//! scratch image and verified on its own, then the outer container is verified too.  The returned
//! code only says that *some* variant failed; which one is visible in the printed lines.

use std::{
    fs,
    io::{self, ErrorKind, Write},
    path::{Component, Path, PathBuf},
};

use anyhow::Result;
use log::{debug, error, warn};

use crate::{
    container,
    extract::SubImageExtractor,
    manifest::ManifestReader,
    result::{print_status, ResultCode},
    verify::SignatureVerifier,
};

/// The variant name of a container whose sub-image is the container itself.
pub const DEFAULT_VARIANT: &str = "DEFAULT";

/// Whether a declared variant list calls for per-variant verification.
pub fn is_multi_image(variants: &[String]) -> bool {
    variants.len() > 1 && !variants.iter().any(|v| v == DEFAULT_VARIANT)
}

/// Whether `variant` can name a scratch image directly inside the work directory.
fn is_plain_name(variant: &str) -> bool {
    let mut components = Path::new(variant).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Removes an extracted sub-image when dropped.
struct ScratchImage(PathBuf);

impl ScratchImage {
    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchImage {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("removing {}: {e}", self.0.display()),
        }
    }
}

enum Variants {
    Passed,
    Failed,
    /// Extraction could not proceed; the run ends with this code.
    Aborted(ResultCode),
}

pub struct MultiImageVerifier<M, X> {
    verifier: SignatureVerifier,
    manifest: M,
    extractor: X,
}

impl<M: ManifestReader, X: SubImageExtractor> MultiImageVerifier<M, X> {
    pub fn new(verifier: SignatureVerifier, manifest: M, extractor: X) -> Self {
        Self {
            verifier,
            manifest,
            extractor,
        }
    }

    /// Verifies `container` and its variants, printing progress to stdout and stderr.
    ///
    /// Sub-images are extracted into `work_dir`.
    pub fn verify_all(&mut self, container: &Path, work_dir: &Path) -> Result<ResultCode> {
        self.verify_all_to(
            container,
            work_dir,
            &mut io::stdout().lock(),
            &mut io::stderr().lock(),
        )
    }

    pub fn verify_all_to(
        &mut self,
        container: &Path,
        work_dir: &Path,
        out: &mut dyn Write,
        err: &mut dyn Write,
    ) -> Result<ResultCode> {
        if !container::is_archive(container) {
            writeln!(
                out,
                "Error: '{}' does not look like an image",
                container.display()
            )?;
            return Ok(ResultCode::NotAnImage);
        }

        let mut variant_failed = false;
        match self.manifest.variants(container, work_dir)? {
            Some(variants) if is_multi_image(&variants) => {
                writeln!(
                    out,
                    "Variants in {}: {}",
                    container.display(),
                    variants.join(" ")
                )?;
                match self.verify_variants(container, work_dir, &variants, out)? {
                    Variants::Passed => {}
                    Variants::Failed => variant_failed = true,
                    Variants::Aborted(code) => {
                        print_status(code, out, err)?;
                        return Ok(code);
                    }
                }
            }
            variants => debug!("{}: single image {variants:?}", container.display()),
        }

        let code = self.verifier.verify(container);
        print_status(code, out, err)?;
        if code.is_success() && variant_failed {
            return Ok(ResultCode::SubImageFailure);
        }
        Ok(code)
    }

    fn verify_variants(
        &mut self,
        container: &Path,
        work_dir: &Path,
        variants: &[String],
        out: &mut dyn Write,
    ) -> Result<Variants> {
        if let Some(bad) = variants.iter().find(|v| !is_plain_name(v)) {
            error!("refusing variant name {bad:?}");
            return Ok(Variants::Aborted(ResultCode::ExtractionFailed));
        }

        match self.extractor.prepare(container, work_dir) {
            Ok(true) => {}
            Ok(false) => return Ok(Variants::Aborted(ResultCode::ExtractionUtilityMissing)),
            Err(e) => {
                error!("preparing extraction utility: {e:#}");
                return Ok(Variants::Aborted(ResultCode::ExtractionUtilityMissing));
            }
        }

        let mut outcome = Variants::Passed;
        for variant in variants {
            let scratch = ScratchImage(work_dir.join(format!("{variant}.swi")));
            match self
                .extractor
                .extract(container, scratch.path(), variant, work_dir)
            {
                Ok(true) => {}
                Ok(false) => return Ok(Variants::Aborted(ResultCode::ExtractionFailed)),
                Err(e) => {
                    error!("extracting {variant}: {e:#}");
                    return Ok(Variants::Aborted(ResultCode::ExtractionFailed));
                }
            }

            let code = self.verifier.verify(scratch.path());
            writeln!(out, "{variant}: {code}")?;
            if !code.is_success() {
                outcome = Variants::Failed;
            }
        }
        Ok(outcome)
    }
}
