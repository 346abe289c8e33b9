#![forbid(unsafe_code)]
//! Error types for fsmeta.
//!
//! # Error Taxonomy
//!
//! fsmeta uses a two-layer error model:
//!
//! | Layer | Type | Crate | Purpose |
//! |-------|------|-------|---------|
//! | Parsing | `ParseError` | `fsmeta-types` | Byte-layout violations found while decoding |
//! | Runtime | `FsmetaError` | `fsmeta-error` (this crate) | Errors surfaced to the CLI and API consumers |
//!
//! ## Mapping Policy: ParseError → FsmetaError
//!
//! `fsmeta-error` does not depend on `fsmeta-types`. The conversion lives in
//! `fsmeta-core`, which depends on both:
//!
//! | ParseError Variant | FsmetaError Variant |
//! |--------------------|---------------------|
//! | `OutOfRange`, `MalformedRecord`, `IntegerConversion` | `Corruption { sector, detail }` |
//! | `BrokenChain`, `CycleDetected`, `TruncatedRunList` | `Corruption { sector, detail }` |
//! | `InvalidGeometry` | `InvalidGeometry(detail)` |
//! | `InvalidField` | `Parse(detail)` |
//!
//! ## errno Mapping
//!
//! Every variant maps to exactly one POSIX errno via [`FsmetaError::to_errno`];
//! the CLI uses it as its exit status. The match is exhaustive so a new
//! variant does not compile until it has an errno.
//!
//! | Variant | errno |
//! |---------|-------|
//! | `Io` | raw OS error, else `EIO` |
//! | `Corruption` | `EIO` |
//! | `Format` | `EINVAL` |
//! | `Parse` | `EINVAL` |
//! | `InvalidGeometry` | `EINVAL` |
//! | `NotFound` | `ENOENT` |

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsmetaError {
    /// Operating system I/O error while reading an image.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata in a known sector could not be decoded.
    #[error("corrupt metadata at sector {sector}: {detail}")]
    Corruption { sector: u64, detail: String },

    /// The image is not a FAT12/16 volume this tool understands.
    #[error("invalid on-disk format: {0}")]
    Format(String),

    /// A field value the decoders reject outright, such as an over-wide
    /// read or an absolute cluster that overflows. Carries no sector.
    #[error("parse error: {0}")]
    Parse(String),

    /// Boot-sector geometry is zero or implausible.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl FsmetaError {
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::Corruption { .. } => libc::EIO,
            Self::Format(_) | Self::Parse(_) | Self::InvalidGeometry(_) => libc::EINVAL,
            Self::NotFound(_) => libc::ENOENT,
        }
    }
}

/// Result alias using `FsmetaError`.
pub type Result<T> = std::result::Result<T, FsmetaError>;
