//! Signing and verification of SWI software images and SWIX extensions.
//!
//! An image is a zip archive carrying a signature record entry.  [`verify::SignatureVerifier`]
//! checks one container; [`multi::MultiImageVerifier`] additionally extracts and checks the
//! variant sub-images of a multi-image container.

pub mod chain;
pub mod container;
pub mod extract;
pub mod hasher;
pub mod manifest;
pub mod multi;
pub mod record;
pub mod result;
pub mod signing;
pub mod verify;

#[cfg(test)]
mod test;
