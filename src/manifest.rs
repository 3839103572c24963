//! Discovery of the variants (sub-images) packed into a container.

use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, warn};

use crate::container;

/// Name of the entry listing a container's variants.
pub const SQSH_MAP_ENTRY: &str = "swimSqshMap";

/// Reads the list of variants a container declares.
pub trait ManifestReader {
    /// Returns the declared variants in order, or `None` if the container declares none.
    fn variants(&self, container: &Path, work_dir: &Path) -> Result<Option<Vec<String>>>;
}

/// Reads the `swimSqshMap` entry, which holds one `VARIANT=files` line per variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqshMapManifest;

impl SqshMapManifest {
    /// Parses the contents of a `swimSqshMap` entry.
    pub fn parse(data: &[u8]) -> Vec<String> {
        let mut variants: Vec<String> = vec![];
        for line in String::from_utf8_lossy(data).lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((name, _files)) = line.split_once('=') else {
                warn!("ignoring malformed {SQSH_MAP_ENTRY} line {line:?}");
                continue;
            };
            let name = name.trim();
            if name.is_empty() {
                warn!("ignoring {SQSH_MAP_ENTRY} line without a variant name");
            } else if !variants.iter().any(|v| v == name) {
                variants.push(name.to_string());
            }
        }
        variants
    }
}

impl ManifestReader for SqshMapManifest {
    fn variants(&self, container: &Path, _work_dir: &Path) -> Result<Option<Vec<String>>> {
        let mut archive = container::open_archive(container)
            .with_context(|| format!("opening {}", container.display()))?;
        let Some(data) = container::read_entry(&mut archive, SQSH_MAP_ENTRY)
            .with_context(|| format!("reading {SQSH_MAP_ENTRY} from {}", container.display()))?
        else {
            return Ok(None);
        };

        let variants = Self::parse(&data);
        debug!("{}: variants {variants:?}", container.display());
        Ok(Some(variants))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn test_parse() {
        let data = b"\
# variants
DEFAULT=rootfs-i386.sqsh
Strata-4GB=rootfs-i386.sqsh:Strata-4GB.sqsh

  Sand-4GB = rootfs-i386.sqsh:Sand-4GB.sqsh
garbage
=nameless
Strata-4GB=again
";
        assert_eq!(
            SqshMapManifest::parse(data),
            ["DEFAULT", "Strata-4GB", "Sand-4GB"]
        );
        assert!(SqshMapManifest::parse(b"").is_empty());
    }

    #[test]
    fn test_variants_from_container() {
        let dir = test::tempdir();

        let plain = dir.path().join("plain.swi");
        test::write_image(&plain, &test::payload());
        assert_eq!(SqshMapManifest.variants(&plain, dir.path()).unwrap(), None);

        let multi = dir.path().join("multi.swi");
        let mut entries = test::payload();
        entries.push((SQSH_MAP_ENTRY, b"A=a.sqsh\nB=b.sqsh\n".to_vec()));
        test::write_image(&multi, &entries);
        assert_eq!(
            SqshMapManifest.variants(&multi, dir.path()).unwrap(),
            Some(vec!["A".to_string(), "B".to_string()])
        );

        let junk = dir.path().join("junk.swi");
        std::fs::write(&junk, b"not a zip").unwrap();
        assert!(SqshMapManifest.variants(&junk, dir.path()).is_err());
    }
}
