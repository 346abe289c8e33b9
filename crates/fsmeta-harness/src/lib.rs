#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use fsmeta_core::{FatImage, InspectOptions, VolumeReport};
use fsmeta_ondisk::{FatBootSector, RunList, decode_run_list};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparseFixture {
    pub size: usize,
    pub writes: Vec<FixtureWrite>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureWrite {
    pub offset: usize,
    pub hex: String,
}

impl SparseFixture {
    /// Materialize the fixture into a zero-filled buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = vec![0_u8; self.size];
        for write in &self.writes {
            let payload = hex::decode(&write.hex)
                .with_context(|| format!("invalid hex at offset {}", write.offset))?;

            let end = write
                .offset
                .checked_add(payload.len())
                .context("fixture offset overflow")?;
            if end > bytes.len() {
                bail!(
                    "fixture write out of bounds: offset={} payload={} size={}",
                    write.offset,
                    payload.len(),
                    bytes.len()
                );
            }

            bytes[write.offset..end].copy_from_slice(&payload);
        }
        Ok(bytes)
    }
}

pub fn load_sparse_fixture(path: &Path) -> Result<Vec<u8>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read fixture {}", path.display()))?;
    let fixture: SparseFixture = serde_json::from_str(&text)
        .with_context(|| format!("invalid fixture json {}", path.display()))?;
    fixture.to_bytes()
}

/// Capture `data[offset..offset + len]` as a sparse fixture.
///
/// Zero bytes are left implicit; each maximal non-zero span becomes one
/// write. Offsets in the fixture are relative to `offset`.
pub fn extract_region(data: &[u8], offset: usize, len: usize) -> Result<SparseFixture> {
    let end = offset.checked_add(len).context("region overflow")?;
    if end > data.len() {
        bail!(
            "region out of bounds: offset={offset} len={len} image_len={}",
            data.len()
        );
    }
    let region = &data[offset..end];

    let mut writes = Vec::new();
    let mut cursor = 0;
    while cursor < region.len() {
        if region[cursor] == 0 {
            cursor += 1;
            continue;
        }
        let start = cursor;
        while cursor < region.len() && region[cursor] != 0 {
            cursor += 1;
        }
        writes.push(FixtureWrite {
            offset: start,
            hex: hex::encode(&region[start..cursor]),
        });
    }

    Ok(SparseFixture { size: len, writes })
}

/// Capture the metadata regions of a FAT12/16 image: boot sector, both FAT
/// copies, and the root directory. Data clusters are dropped.
pub fn extract_fat_metadata(data: &[u8]) -> Result<SparseFixture> {
    let boot = FatBootSector::parse(data).context("failed to parse FAT boot sector")?;
    let geometry = boot.geometry().context("invalid FAT geometry")?;
    let metadata_end = usize::try_from(geometry.sector_to_byte(geometry.data_start))
        .context("data start overflows usize")?;
    if metadata_end > data.len() {
        bail!(
            "image shorter than its metadata area: need {metadata_end} bytes, have {}",
            data.len()
        );
    }

    let mut fixture = extract_region(data, 0, metadata_end)?;
    fixture.size = data.len();
    Ok(fixture)
}

pub fn validate_fat_fixture(path: &Path, options: &InspectOptions) -> Result<VolumeReport> {
    let data = load_sparse_fixture(path)?;
    let image = FatImage::from_bytes(data)
        .with_context(|| format!("failed FAT parse for fixture {}", path.display()))?;
    Ok(image.report(options))
}

/// One golden run-list decode: input bytes and expected `(length, start)` pairs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunListCase {
    pub name: String,
    pub base: i64,
    /// Space-separated hex bytes.
    pub hex: String,
    pub runs: Vec<(u64, i64)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunListCases {
    pub cases: Vec<RunListCase>,
}

impl RunListCase {
    pub fn bytes(&self) -> Result<Vec<u8>> {
        hex::decode(self.hex.split_whitespace().collect::<String>())
            .with_context(|| format!("invalid hex in case {}", self.name))
    }

    pub fn decode(&self) -> Result<RunList> {
        decode_run_list(&self.bytes()?, self.base)
            .with_context(|| format!("run list decode failed for case {}", self.name))
    }
}

pub fn load_run_list_cases(path: &Path) -> Result<Vec<RunListCase>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read run-list cases {}", path.display()))?;
    let cases: RunListCases = serde_json::from_str(&text)
        .with_context(|| format!("invalid run-list json {}", path.display()))?;
    Ok(cases.cases)
}

/// Decode every case and compare against its expected runs.
pub fn validate_run_list_cases(path: &Path) -> Result<usize> {
    let cases = load_run_list_cases(path)?;
    for case in &cases {
        let decoded = case.decode()?.extents();
        if decoded != case.runs {
            bail!(
                "case {}: expected {:?}, decoded {:?}",
                case.name,
                case.runs,
                decoded
            );
        }
    }
    Ok(cases.len())
}
