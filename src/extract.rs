//! Extraction of variant sub-images with an external utility.

use std::{
    fs::{self, Permissions},
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, Context, Result};
use log::{debug, error};

use crate::container;

/// Name of the entry holding the extraction utility.
pub const SWADAPT_ENTRY: &str = "swadapt";

/// Produces the sub-image for one variant of a container.
pub trait SubImageExtractor {
    /// Makes the extraction utility available in `work_dir`.  Returns `false` if the container
    /// doesn't provide one.
    fn prepare(&mut self, container: &Path, work_dir: &Path) -> Result<bool>;

    /// Writes the sub-image for `variant` of `container` to `output`.  Returns `false` if the
    /// utility ran but did not produce the sub-image.
    fn extract(&self, container: &Path, output: &Path, variant: &str, work_dir: &Path)
        -> Result<bool>;
}

/// Runs the `swadapt` utility shipped inside the container itself.
#[derive(Debug, Default)]
pub struct Swadapt {
    tool: Option<PathBuf>,
}

impl SubImageExtractor for Swadapt {
    fn prepare(&mut self, container: &Path, work_dir: &Path) -> Result<bool> {
        let mut archive = container::open_archive(container)
            .with_context(|| format!("opening {}", container.display()))?;
        let Some(data) = container::read_entry(&mut archive, SWADAPT_ENTRY)
            .with_context(|| format!("reading {SWADAPT_ENTRY} from {}", container.display()))?
        else {
            debug!("{}: no {SWADAPT_ENTRY} entry", container.display());
            return Ok(false);
        };

        let tool = work_dir.join(SWADAPT_ENTRY);
        fs::write(&tool, data).with_context(|| format!("writing {}", tool.display()))?;
        fs::set_permissions(&tool, Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {}", tool.display()))?;
        self.tool = Some(tool);
        Ok(true)
    }

    fn extract(
        &self,
        container: &Path,
        output: &Path,
        variant: &str,
        work_dir: &Path,
    ) -> Result<bool> {
        let Some(tool) = &self.tool else {
            bail!("{SWADAPT_ENTRY} has not been prepared in {}", work_dir.display());
        };

        debug!("extracting {variant} from {} to {}", container.display(), output.display());
        let status = Command::new(tool)
            .arg(container)
            .arg(output)
            .arg(variant)
            .status()
            .with_context(|| format!("running {}", tool.display()))?;
        if !status.success() {
            error!("{SWADAPT_ENTRY} failed for {variant}: {status}");
            return Ok(false);
        }
        Ok(output.exists())
    }
}
