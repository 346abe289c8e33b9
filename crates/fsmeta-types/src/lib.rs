#![forbid(unsafe_code)]
//! Shared primitives for the fsmeta decoders.
//!
//! Everything in here is a pure function of an immutable byte slice: bounds
//! checked field readers, the parse-layer error taxonomy, and small
//! unit-carrying newtypes that keep sectors, clusters, and byte offsets apart.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ── FAT12/16 layout constants ───────────────────────────────────────────────

/// Size of one FAT directory record.
pub const FAT_DIR_ENTRY_SIZE: usize = 32;
/// Bytes of the boot sector covered by the decoded BPB fields (through the
/// 32-bit total-sectors field at 0x20).
pub const FAT_BOOT_SECTOR_MIN: usize = 36;
/// Attribute byte value that marks a long-file-name continuation record.
pub const FAT_ATTR_LONG_NAME: u8 = 0x0F;
/// First name byte of a deleted directory entry.
pub const FAT_DELETED_MARKER: u8 = 0xE5;
/// FAT16 end-of-chain sentinel.
pub const FAT16_END_OF_CHAIN: u16 = 0xFFFF;
/// Smallest FAT12 end-of-chain value (0xFF8..=0xFFF).
pub const FAT12_END_OF_CHAIN_MIN: u16 = 0x0FF8;
/// Year encoded by a zero year field in a FAT date.
pub const FAT_EPOCH_YEAR: u16 = 1980;

// ── NTFS constants ──────────────────────────────────────────────────────────

/// Run-list header byte that terminates the list.
pub const NTFS_RUN_LIST_END: u8 = 0x00;

/// Widest integer field the readers will assemble.
pub const MAX_FIELD_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ByteOrder {
    Little,
    Big,
}

/// FAT cluster index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterNumber(pub u32);

/// Sector index relative to the start of the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SectorNumber(pub u64);

/// Byte offset into an image.
///
/// This is a unit-carrying wrapper to prevent mixing bytes and sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ByteOffset(pub u64);

impl ByteOffset {
    pub const ZERO: Self = Self(0);

    /// Add a byte count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, bytes: u64) -> Option<Self> {
        self.0.checked_add(bytes).map(Self)
    }

    /// Narrow to `usize`, returning `ParseError::IntegerConversion` on overflow.
    pub fn to_usize(self) -> Result<usize, ParseError> {
        usize::try_from(self.0).map_err(|_| ParseError::IntegerConversion {
            field: "byte_offset",
        })
    }
}

impl SectorNumber {
    /// Add a sector count, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, count: u64) -> Option<Self> {
        self.0.checked_add(count).map(Self)
    }

    /// Byte offset of this sector for the given sector size.
    ///
    /// Returns `None` on overflow.
    #[must_use]
    pub fn to_byte_offset(self, bytes_per_sector: u16) -> Option<ByteOffset> {
        self.0
            .checked_mul(u64::from(bytes_per_sector))
            .map(ByteOffset)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// A field read runs past the end of the buffer.
    #[error("field out of range: need {width} bytes at offset {offset}, got {available}")]
    OutOfRange {
        offset: usize,
        width: usize,
        available: usize,
    },
    /// A fixed-size record has the wrong length or shape.
    #[error("malformed record: {reason} (len {len})")]
    MalformedRecord { len: usize, reason: &'static str },
    #[error("invalid geometry: {field} ({reason})")]
    InvalidGeometry {
        field: &'static str,
        reason: &'static str,
    },
    /// A FAT entry points outside the table.
    #[error("broken cluster chain: cluster {cluster} points to {next}, table holds {entries} entries")]
    BrokenChain { cluster: u32, next: u32, entries: usize },
    #[error("cluster chain revisits cluster {cluster}")]
    CycleDetected { cluster: u32 },
    /// A run header declares more bytes than remain in the run list.
    #[error("truncated run list: run at offset {offset} needs {needed} bytes, {remaining} remain")]
    TruncatedRunList {
        offset: usize,
        needed: usize,
        remaining: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("integer conversion failed: {field}")]
    IntegerConversion { field: &'static str },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::OutOfRange {
            offset,
            width: len,
            available: data.len().saturating_sub(offset),
        });
    };

    if end > data.len() {
        return Err(ParseError::OutOfRange {
            offset,
            width: len,
            available: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

#[inline]
pub fn read_u8(data: &[u8], offset: usize) -> Result<u8, ParseError> {
    Ok(ensure_slice(data, offset, 1)?[0])
}

#[inline]
pub fn read_le_u16(data: &[u8], offset: usize) -> Result<u16, ParseError> {
    let bytes = ensure_slice(data, offset, 2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

#[inline]
pub fn read_le_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], ParseError> {
    let bytes = ensure_slice(data, offset, N)?;
    let mut out = [0_u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}

/// Assemble an unsigned integer from `width` bytes at `offset`.
///
/// A zero width decodes to 0. Widths above [`MAX_FIELD_WIDTH`] are rejected.
pub fn read_uint(
    data: &[u8],
    offset: usize,
    width: usize,
    order: ByteOrder,
) -> Result<u64, ParseError> {
    if width > MAX_FIELD_WIDTH {
        return Err(ParseError::InvalidField {
            field: "width",
            reason: "wider than 8 bytes",
        });
    }
    let bytes = ensure_slice(data, offset, width)?;
    Ok(assemble(bytes, order))
}

/// Like [`read_uint`], but the top bit of the most significant byte is a
/// two's-complement sign bit.
pub fn read_int(
    data: &[u8],
    offset: usize,
    width: usize,
    order: ByteOrder,
) -> Result<i64, ParseError> {
    let raw = read_uint(data, offset, width, order)?;
    // width <= 8 here, so the bit count fits comfortably in u32.
    #[allow(clippy::cast_possible_truncation)]
    let bits = (width * 8) as u32;
    Ok(sign_extend(raw, bits))
}

fn assemble(bytes: &[u8], order: ByteOrder) -> u64 {
    let fold = |acc: u64, byte: &u8| (acc << 8) | u64::from(*byte);
    match order {
        ByteOrder::Little => bytes.iter().rev().fold(0, fold),
        ByteOrder::Big => bytes.iter().fold(0, fold),
    }
}

/// Reinterpret the low `bits` bits of `value` as a two's-complement integer.
///
/// `bits == 0` yields 0; `bits >= 64` reinterprets the whole word.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn sign_extend(value: u64, bits: u32) -> i64 {
    match bits {
        0 => 0,
        64..=u32::MAX => value as i64,
        _ => {
            let shift = 64 - bits;
            ((value << shift) as i64) >> shift
        }
    }
}

/// Map each on-disk byte to the code point of the same value.
///
/// Every byte survives, including 0xE5 deletion markers, NULs and OEM
/// code-page bytes.
#[must_use]
pub fn decode_byte_string(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

/// Decode a space-padded on-disk name, stripping only the space padding.
#[must_use]
pub fn trim_space_padded(bytes: &[u8]) -> String {
    decode_byte_string(bytes).trim_matches(' ').to_owned()
}

/// Lowercase hex rendering of raw field bytes, in on-disk order.
#[must_use]
pub fn hex_bytes(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

/// Narrow a `u64` to `usize` with an explicit error path.
pub fn u64_to_usize(value: u64, field: &'static str) -> Result<usize, ParseError> {
    usize::try_from(value).map_err(|_| ParseError::IntegerConversion { field })
}

impl fmt::Display for ClusterNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SectorNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
