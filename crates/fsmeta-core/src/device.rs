#![forbid(unsafe_code)]

use fsmeta_error::{FsmetaError, Result};
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::path::Path;

/// Read-only random access to a volume image.
pub trait ByteDevice {
    /// Total length in bytes.
    fn len_bytes(&self) -> u64;

    /// Read exactly `buf.len()` bytes from `offset` into `buf`.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()>;

    /// Read `len` bytes at `offset` into a fresh buffer.
    fn read_vec_at(&self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let len = usize::try_from(len)
            .map_err(|_| FsmetaError::Format("read length overflows usize".to_owned()))?;
        let mut buf = vec![0_u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }
}

fn check_bounds(offset: u64, len: usize, device_len: u64) -> Result<()> {
    let end = offset
        .checked_add(
            u64::try_from(len)
                .map_err(|_| FsmetaError::Format("read length overflows u64".to_owned()))?,
        )
        .ok_or_else(|| FsmetaError::Format("read range overflows u64".to_owned()))?;
    if end > device_len {
        return Err(FsmetaError::Format(format!(
            "read out of bounds: offset={offset} len={len} image_len={device_len}"
        )));
    }
    Ok(())
}

/// File-backed image using positional reads; no shared seek cursor.
#[derive(Debug)]
pub struct FileByteDevice {
    file: File,
    len: u64,
}

impl FileByteDevice {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl ByteDevice for FileByteDevice {
    fn len_bytes(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.len)?;
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }
}

/// In-memory image.
#[derive(Debug, Clone, Default)]
pub struct MemoryByteDevice {
    bytes: Vec<u8>,
}

impl MemoryByteDevice {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl ByteDevice for MemoryByteDevice {
    fn len_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }

    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(offset, buf.len(), self.len_bytes())?;
        // Bounds were checked against a Vec length, so the offset fits usize.
        let start = usize::try_from(offset)
            .map_err(|_| FsmetaError::Format("read offset overflows usize".to_owned()))?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }
}
