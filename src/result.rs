//! Verification outcomes.
//!
//! Every verification run ends in exactly one [`ResultCode`].  The numeric values are stable: they
//! are what the command line tool exits with.

use std::{fmt, io::Write};

/// The outcome of verifying a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    Success = 0,
    /// The outer image verified, but at least one of its sub-images did not.
    SubImageFailure = -1,
    Unsigned = 3,
    VerificationFailed = 4,
    UnsupportedHashAlgorithm = 5,
    InvalidSignatureFormat = 6,
    NotAnImage = 7,
    CertMismatch = 8,
    InvalidSigningCert = 9,
    InvalidRootCert = 10,
    ExtractionUtilityMissing = 11,
    ExtractionFailed = 12,
}

impl ResultCode {
    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }

    /// The numeric value of this code.
    pub fn value(self) -> i32 {
        self as i32
    }

    /// The process exit status for this code.
    ///
    /// The aggregate sub-image failure has a negative value, so it is reported as 1.
    pub fn exit_status(self) -> u8 {
        match self {
            ResultCode::SubImageFailure => 1,
            other => other as u8,
        }
    }

    /// The human-readable status line for this code.
    pub fn message(self) -> &'static str {
        match self {
            ResultCode::Success => "SWI/X verification successful.",
            ResultCode::SubImageFailure => "One or more SWI/X sub-images failed verification.",
            ResultCode::Unsigned => "SWI/X is not signed.",
            ResultCode::VerificationFailed => "SWI/X verification failed.",
            ResultCode::UnsupportedHashAlgorithm => {
                "Unsupported hash algorithm for SWI/X verification."
            }
            ResultCode::InvalidSignatureFormat => "Invalid SWI/X signature file.",
            ResultCode::NotAnImage => "Input does not seem to be a swi/x image.",
            ResultCode::CertMismatch => {
                "Signing certificate used to sign SWI/X is not signed by root certificate."
            }
            ResultCode::InvalidSigningCert => "Signing certificate is not a valid certificate.",
            ResultCode::InvalidRootCert => "Root certificate is not a valid certificate.",
            ResultCode::ExtractionUtilityMissing => "Utility 'swadapt' not found in image.",
            ResultCode::ExtractionFailed => "Utility 'swadapt' failed to extract sub-image.",
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Writes the status line for `code`: successes go to `out`, everything else to `err`.
pub fn print_status(
    code: ResultCode,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> std::io::Result<()> {
    if code.is_success() {
        writeln!(out, "{code}")
    } else {
        writeln!(err, "{code}")
    }
}
