//! Store Error Handling
//!
//! Errors crossing the crate-file boundary. Reader failures surface as
//! `Corrupt` or `UnsupportedVersion` and leave no store behind; writer
//! failures surface as `Io` and leave the target file untouched (all
//! writes go to an adjacent temporary renamed into place on success).
//!
//! API misuse (setting a field on a synthesized target spec, writing a
//! value type the format cannot carry) is reported as `Coding`.

use crate::format::Version;
use std::fmt;

#[derive(Debug)]
pub enum CrateError {
    /// Underlying asset read or write failed.
    Io(std::io::Error),
    /// Magic mismatch, truncated section, inconsistent lengths, or an
    /// unreachable structural reference.
    Corrupt(String),
    /// The file's version is beyond what this reader knows.
    UnsupportedVersion(Version),
    /// API misuse.
    Coding(String),
}

impl fmt::Display for CrateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrateError::Io(e) => write!(f, "I/O error: {e}"),
            CrateError::Corrupt(msg) => write!(f, "corrupt crate file: {msg}"),
            CrateError::UnsupportedVersion(v) => {
                write!(f, "unsupported crate file version {v}")
            }
            CrateError::Coding(msg) => write!(f, "coding error: {msg}"),
        }
    }
}

impl std::error::Error for CrateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CrateError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CrateError {
    fn from(e: std::io::Error) -> Self {
        CrateError::Io(e)
    }
}

pub(crate) fn corrupt(msg: impl Into<String>) -> CrateError {
    CrateError::Corrupt(msg.into())
}
