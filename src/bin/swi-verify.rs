use std::{fs, path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use swi_verify::{
    chain::TrustedRoot,
    extract::Swadapt,
    hasher::HashAlgorithm,
    manifest::SqshMapManifest,
    multi::MultiImageVerifier,
    signing::{self, SigningKey},
    verify::SignatureVerifier,
};

/// swi-verify
#[derive(Debug, Parser)]
#[clap(name = "swi-verify", version)]
pub struct App {
    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Verify a SWI image or SWIX extension, including its sub-images
    Verify {
        /// the image to verify
        image: PathBuf,
        /// root certificate to verify against, instead of the builtin one
        #[clap(long = "CAfile")]
        ca_file: Option<PathBuf>,
    },
    /// Sign a SWI image or SWIX extension, replacing any existing signature
    Sign {
        image: PathBuf,
        /// PEM signing certificate
        #[clap(long)]
        cert: PathBuf,
        /// PEM private key of the signing certificate
        #[clap(long)]
        key: PathBuf,
        #[clap(long, default_value = "SHA-256", value_parser = parse_hash_algorithm)]
        hash_algorithm: HashAlgorithm,
    },
}

fn parse_hash_algorithm(name: &str) -> Result<HashAlgorithm, String> {
    HashAlgorithm::from_name(name).ok_or_else(|| format!("unsupported hash algorithm {name:?}"))
}

fn main() -> Result<ExitCode> {
    env_logger::init();

    let args = App::parse();

    match args.cmd {
        Command::Verify { image, ca_file } => {
            let root = ca_file.map(TrustedRoot::File).unwrap_or_default();
            let work_dir = tempfile::Builder::new()
                .prefix("swi-verify-")
                .tempdir()
                .context("creating scratch directory")?;
            let mut verifier = MultiImageVerifier::new(
                SignatureVerifier::new(root),
                SqshMapManifest,
                Swadapt::default(),
            );
            let code = verifier.verify_all(&image, work_dir.path())?;
            Ok(ExitCode::from(code.exit_status()))
        }
        Command::Sign {
            image,
            cert,
            key,
            hash_algorithm,
        } => {
            let cert_pem =
                fs::read(&cert).with_context(|| format!("reading {}", cert.display()))?;
            let key_pem = fs::read(&key).with_context(|| format!("reading {}", key.display()))?;
            let key = SigningKey::from_pem(&cert_pem, &key_pem)?;

            if signing::locate_signature(&image)?.is_none() {
                signing::append_null_signature(&image)?;
            }
            signing::sign_container(&image, &key, hash_algorithm)?;
            println!("{}: signed", image.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}
