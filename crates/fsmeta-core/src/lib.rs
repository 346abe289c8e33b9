#![forbid(unsafe_code)]
//! Volume-level inspection of FAT12/16 images.
//!
//! Reads the boot sector, fixed root directory, and first FAT from an image,
//! then builds a [`VolumeReport`] in which each directory entry is decoded
//! independently: one corrupt entry or broken cluster chain is reported in
//! place and does not abort the rest of the listing.

pub mod device;

pub use device::{ByteDevice, FileByteDevice, MemoryByteDevice};

use fsmeta_error::{FsmetaError, Result};
use fsmeta_ondisk::{
    BootFieldDump, ClusterChain, FatAttributeFlags, FatBootSector, FatDirEntry, FatWidth,
    VolumeGeometry, dump_boot_fields, iter_root_dir,
};
use fsmeta_types::{FAT_DIR_ENTRY_SIZE, ParseError, hex_bytes};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Bytes read from the start of the image to decode the boot sector.
const BOOT_SECTOR_READ: u64 = 512;

/// Options controlling what a volume report contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InspectOptions {
    /// Report entries whose first name byte is the 0xE5 deletion marker.
    /// On by default; deleted entries report their start cluster only.
    pub include_deleted: bool,
    /// Follow FAT chains for live, non-empty files. When off, every entry
    /// reports its start cluster only.
    pub walk_chains: bool,
    /// Entry width of the allocation table.
    pub fat_width: FatWidth,
}

impl Default for InspectOptions {
    fn default() -> Self {
        Self {
            include_deleted: true,
            walk_chains: true,
            fat_width: FatWidth::Fat16,
        }
    }
}

/// Clusters reported for a directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "clusters", rename_all = "snake_case")]
pub enum ClusterRun {
    /// Full chain walked through the FAT.
    Chain(Vec<u16>),
    /// Start cluster only: directories, deleted files, or chain walking off.
    StartOnly(u32),
    /// Zero-byte file; no clusters are allocated.
    ZeroByte,
}

/// Decoded view of one short-name directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    /// Index of the 32-byte slot within the root directory.
    pub slot: usize,
    /// Short name with one code point per on-disk byte.
    pub name: String,
    /// The 11 name bytes as stored, in hex.
    pub raw_name: String,
    pub raw_attributes: u8,
    pub attributes: FatAttributeFlags,
    pub deleted: bool,
    pub created_date: String,
    pub created_time: String,
    pub access_date: String,
    pub modified_date: String,
    pub modified_time: String,
    pub start_cluster: u32,
    pub file_size: u32,
    pub clusters: ClusterRun,
}

/// Outcome for one root directory slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryReport {
    Decoded(FileReport),
    Failed { slot: usize, error: String },
}

impl EntryReport {
    #[must_use]
    pub fn slot(&self) -> usize {
        match self {
            Self::Decoded(file) => file.slot,
            Self::Failed { slot, .. } => *slot,
        }
    }

    #[must_use]
    pub fn as_file(&self) -> Option<&FileReport> {
        match self {
            Self::Decoded(file) => Some(file),
            Self::Failed { .. } => None,
        }
    }
}

/// Everything `inspect` reports about a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeReport {
    pub boot_sector: FatBootSector,
    pub boot_fields: Vec<BootFieldDump>,
    pub geometry: VolumeGeometry,
    pub entries: Vec<EntryReport>,
    /// Long-name slots seen in the listing; they carry no short-name metadata.
    pub long_name_slots: usize,
    /// Deleted entries left out because `include_deleted` was off.
    pub skipped_deleted: usize,
}

/// A FAT12/16 image with its metadata regions loaded into memory.
#[derive(Debug, Clone)]
pub struct FatImage {
    boot_sector: FatBootSector,
    boot_fields: Vec<BootFieldDump>,
    geometry: VolumeGeometry,
    root_dir: Vec<u8>,
    fat_table: Vec<u8>,
}

impl FatImage {
    /// Open an image file and load its metadata regions.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let dev = FileByteDevice::open(path.as_ref())?;
        Self::from_device(&dev)
    }

    /// Load metadata regions from an in-memory image.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_device(&MemoryByteDevice::new(bytes))
    }

    pub fn from_device(dev: &dyn ByteDevice) -> Result<Self> {
        let head = dev.read_vec_at(0, dev.len_bytes().min(BOOT_SECTOR_READ))?;
        let boot_sector = FatBootSector::parse(&head).map_err(|e| parse_error_to_fsmeta(&e, 0))?;
        let boot_fields = dump_boot_fields(&head).map_err(|e| parse_error_to_fsmeta(&e, 0))?;
        let geometry = boot_sector
            .geometry()
            .map_err(|e| parse_error_to_fsmeta(&e, 0))?;

        let (root_offset, root_len) = geometry.root_dir_region();
        let root_dir = dev.read_vec_at(root_offset, root_len)?;
        let (fat_offset, fat_len) = geometry.fat_region();
        let fat_table = dev.read_vec_at(fat_offset, fat_len)?;
        debug!(
            image_len = dev.len_bytes(),
            root_dir_len = root_len,
            fat_len,
            "loaded FAT metadata regions"
        );

        Ok(Self {
            boot_sector,
            boot_fields,
            geometry,
            root_dir,
            fat_table,
        })
    }

    #[must_use]
    pub fn boot_sector(&self) -> &FatBootSector {
        &self.boot_sector
    }

    #[must_use]
    pub fn geometry(&self) -> &VolumeGeometry {
        &self.geometry
    }

    #[must_use]
    pub fn root_dir(&self) -> &[u8] {
        &self.root_dir
    }

    #[must_use]
    pub fn fat_table(&self) -> &[u8] {
        &self.fat_table
    }

    /// Walk a cluster chain through the first FAT.
    pub fn cluster_chain(&self, start: u16, width: FatWidth) -> Result<Vec<u16>> {
        ClusterChain::with_width(&self.fat_table, start, width)
            .collect_clusters()
            .map_err(|e| parse_error_to_fsmeta(&e, self.geometry.fat1_start.0))
    }

    /// Build the full report, decoding every root directory slot in isolation.
    #[must_use]
    pub fn report(&self, options: &InspectOptions) -> VolumeReport {
        let mut entries = Vec::new();
        let mut long_name_slots = 0;
        let mut skipped_deleted = 0;

        for (slot, entry) in iter_root_dir(&self.root_dir).enumerate() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(slot, error = %err, "undecodable directory slot");
                    entries.push(EntryReport::Failed {
                        slot,
                        error: err.to_string(),
                    });
                    continue;
                }
            };
            if entry.is_long_name_entry() {
                long_name_slots += 1;
                continue;
            }
            if entry.is_deleted() && !options.include_deleted {
                skipped_deleted += 1;
                continue;
            }
            entries.push(self.entry_report(slot, &entry, options));
        }

        debug!(
            entries = entries.len(),
            long_name_slots, skipped_deleted, "built volume report"
        );
        VolumeReport {
            boot_sector: self.boot_sector.clone(),
            boot_fields: self.boot_fields.clone(),
            geometry: self.geometry,
            entries,
            long_name_slots,
            skipped_deleted,
        }
    }

    /// Report for the first live short-name entry called `name`.
    ///
    /// Matching ignores ASCII case and accepts the name with or without the
    /// dot of an empty extension.
    pub fn find(&self, name: &str, options: &InspectOptions) -> Result<FileReport> {
        let wanted = name.trim();
        for (slot, entry) in iter_root_dir(&self.root_dir).enumerate() {
            let Ok(entry) = entry else {
                continue;
            };
            if entry.is_long_name_entry() || entry.is_deleted() {
                continue;
            }
            let short = entry.short_name();
            let bare = short.trim_end().trim_end_matches('.');
            if short.eq_ignore_ascii_case(wanted) || bare.eq_ignore_ascii_case(wanted) {
                return match self.entry_report(slot, &entry, options) {
                    EntryReport::Decoded(file) => Ok(file),
                    EntryReport::Failed { error, .. } => Err(FsmetaError::Corruption {
                        sector: self.slot_sector(slot),
                        detail: error,
                    }),
                };
            }
        }
        Err(FsmetaError::NotFound(name.to_owned()))
    }

    fn slot_sector(&self, slot: usize) -> u64 {
        let byte = (slot * FAT_DIR_ENTRY_SIZE) as u64;
        self.geometry.root_dir_start.0 + byte / u64::from(self.geometry.bytes_per_sector)
    }

    fn entry_report(
        &self,
        slot: usize,
        entry: &FatDirEntry,
        options: &InspectOptions,
    ) -> EntryReport {
        match self.cluster_run(entry, options) {
            Ok(clusters) => EntryReport::Decoded(FileReport {
                slot,
                name: entry.short_name(),
                raw_name: hex_bytes(&entry.raw_name),
                raw_attributes: entry.attributes.bits(),
                attributes: entry.attribute_flags(),
                deleted: entry.is_deleted(),
                created_date: entry.created_date.to_string(),
                created_time: entry.created_time.to_string(),
                access_date: entry.access_date.to_string(),
                modified_date: entry.modified_date.to_string(),
                modified_time: entry.modified_time.to_string(),
                start_cluster: entry.start_cluster.0,
                file_size: entry.file_size,
                clusters,
            }),
            Err(err) => {
                warn!(
                    slot,
                    name = %entry.short_name(),
                    start = entry.start_cluster.0,
                    error = %err,
                    "cluster chain walk failed"
                );
                EntryReport::Failed {
                    slot,
                    error: format!("{}: {err}", entry.short_name()),
                }
            }
        }
    }

    fn cluster_run(
        &self,
        entry: &FatDirEntry,
        options: &InspectOptions,
    ) -> std::result::Result<ClusterRun, ParseError> {
        let start = entry.start_cluster.0;
        if entry.attribute_flags().directory {
            return Ok(ClusterRun::StartOnly(start));
        }
        if entry.file_size == 0 {
            return Ok(ClusterRun::ZeroByte);
        }
        if entry.is_deleted() || !options.walk_chains {
            return Ok(ClusterRun::StartOnly(start));
        }
        let start = u16::try_from(start).map_err(|_| ParseError::IntegerConversion {
            field: "start_cluster",
        })?;
        ClusterChain::with_width(&self.fat_table, start, options.fat_width)
            .collect_clusters()
            .map(ClusterRun::Chain)
    }
}

/// Convert a decode failure into the user-facing error, attributing it to
/// `sector` when the failure is data corruption.
#[must_use]
pub fn parse_error_to_fsmeta(e: &ParseError, sector: u64) -> FsmetaError {
    match e {
        ParseError::InvalidGeometry { field, reason } => {
            FsmetaError::InvalidGeometry(format!("{field}: {reason}"))
        }
        ParseError::InvalidField { .. } => FsmetaError::Parse(e.to_string()),
        ParseError::OutOfRange { .. }
        | ParseError::MalformedRecord { .. }
        | ParseError::IntegerConversion { .. }
        | ParseError::BrokenChain { .. }
        | ParseError::CycleDetected { .. }
        | ParseError::TruncatedRunList { .. } => FsmetaError::Corruption {
            sector,
            detail: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const BPS: usize = 512;

    fn put_entry(image: &mut [u8], slot: usize, name: &[u8; 11], attr: u8, cluster: u16, size: u32) {
        let at = 3 * BPS + slot * 32;
        image[at..at + 11].copy_from_slice(name);
        image[at + 0x0B] = attr;
        // 2016-05-15 12:30:10
        let date: u16 = (36 << 9) | (5 << 5) | 15;
        let time: u16 = (12 << 11) | (30 << 5) | 5;
        for off in [0x10, 0x12, 0x18] {
            image[at + off..at + off + 2].copy_from_slice(&date.to_le_bytes());
        }
        for off in [0x0E, 0x16] {
            image[at + off..at + off + 2].copy_from_slice(&time.to_le_bytes());
        }
        image[at + 0x1A..at + 0x1C].copy_from_slice(&cluster.to_le_bytes());
        image[at + 0x1C..at + 0x20].copy_from_slice(&size.to_le_bytes());
    }

    fn put_fat(image: &mut [u8], cluster: u16, next: u16) {
        for fat in [BPS, 2 * BPS] {
            let at = fat + usize::from(cluster) * 2;
            image[at..at + 2].copy_from_slice(&next.to_le_bytes());
        }
    }

    /// 512-byte sectors, 1 reserved, 2 FATs of 1 sector, 16 root entries.
    fn build_image() -> Vec<u8> {
        let mut image = vec![0_u8; 8 * BPS];
        image[0..3].copy_from_slice(&[0xEB, 0x3C, 0x90]);
        image[3..11].copy_from_slice(b"FSMETA  ");
        image[0x0B..0x0D].copy_from_slice(&512_u16.to_le_bytes());
        image[0x0D] = 1;
        image[0x0E..0x10].copy_from_slice(&1_u16.to_le_bytes());
        image[0x10] = 2;
        image[0x11..0x13].copy_from_slice(&16_u16.to_le_bytes());
        image[0x13..0x15].copy_from_slice(&8_u16.to_le_bytes());
        image[0x16..0x18].copy_from_slice(&1_u16.to_le_bytes());

        put_fat(&mut image, 0, 0xFFF8);
        put_fat(&mut image, 1, 0xFFFF);
        put_fat(&mut image, 2, 3);
        put_fat(&mut image, 3, 0xFFFF);
        put_fat(&mut image, 4, 0xFFFF);
        put_fat(&mut image, 6, 6);

        put_entry(&mut image, 0, b"VOLUME     ", 0x08, 0, 0);
        put_entry(&mut image, 1, b"Bl\0o\0n\0g\0\0\0", 0x0F, 0, 0);
        put_entry(&mut image, 2, b"REPORT  TXT", 0x20, 2, 700);
        put_entry(&mut image, 3, b"DOCS       ", 0x10, 4, 0);
        put_entry(&mut image, 4, b"EMPTY   DAT", 0x20, 0, 0);
        put_entry(&mut image, 5, b"\xE5LD     TXT", 0x20, 5, 100);
        put_entry(&mut image, 6, b"LOOP    BIN", 0x20, 6, 10);
        put_entry(&mut image, 7, b"AFTER   TXT", 0x21, 4, 5);
        image
    }

    fn decoded(report: &VolumeReport, name: &str) -> FileReport {
        report
            .entries
            .iter()
            .filter_map(EntryReport::as_file)
            .find(|f| f.name == name)
            .unwrap_or_else(|| panic!("no entry {name}"))
            .clone()
    }

    #[test]
    fn default_options() {
        let opts = InspectOptions::default();
        assert!(opts.include_deleted);
        assert!(opts.walk_chains);
        assert_eq!(opts.fat_width, FatWidth::Fat16);
    }

    #[test]
    fn from_bytes_loads_regions() {
        let image = FatImage::from_bytes(build_image()).expect("image");
        let geo = image.geometry();
        assert_eq!(geo.fat1_start.0, 1);
        assert_eq!(geo.fat2_start.0, 2);
        assert_eq!(geo.root_dir_start.0, 3);
        assert_eq!(geo.data_start.0, 4);
        assert_eq!(image.root_dir().len(), 512);
        assert_eq!(image.fat_table().len(), 512);
        assert_eq!(image.boot_sector().oem_name, "FSMETA");
        assert_eq!(image.cluster_chain(2, FatWidth::Fat16).expect("chain"), vec![2, 3]);
    }

    #[test]
    fn report_applies_cluster_run_policy() {
        let image = FatImage::from_bytes(build_image()).expect("image");
        let report = image.report(&InspectOptions::default());

        assert_eq!(report.long_name_slots, 1);
        assert_eq!(report.skipped_deleted, 0);
        assert_eq!(report.boot_fields.len(), 10);

        let file = decoded(&report, "REPORT.TXT");
        assert_eq!(file.clusters, ClusterRun::Chain(vec![2, 3]));
        assert_eq!(file.file_size, 700);
        assert_eq!(file.created_date, "2016-05-15");
        assert_eq!(file.modified_time, "12:30:10 (or :11)");
        assert!(file.attributes.archive);

        let dir = decoded(&report, "DOCS.   ");
        assert!(dir.attributes.directory);
        assert_eq!(dir.clusters, ClusterRun::StartOnly(4));

        assert_eq!(decoded(&report, "EMPTY.DAT").clusters, ClusterRun::ZeroByte);
        assert!(decoded(&report, "VOLUME.   ").attributes.volume_label);
    }

    #[test]
    fn chain_failure_is_isolated_to_its_entry() {
        let image = FatImage::from_bytes(build_image()).expect("image");
        let report = image.report(&InspectOptions::default());

        let failed: Vec<_> = report
            .entries
            .iter()
            .filter(|e| matches!(e, EntryReport::Failed { .. }))
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].slot(), 6);
        let EntryReport::Failed { error, .. } = failed[0] else {
            unreachable!()
        };
        assert!(error.contains("LOOP.BIN"), "{error}");
        assert!(error.contains("revisits cluster 6"), "{error}");

        // The entry after the broken one is still decoded.
        let after = decoded(&report, "AFTER.TXT");
        assert_eq!(after.slot, 7);
        assert!(after.attributes.read_only);
        assert_eq!(after.clusters, ClusterRun::Chain(vec![4]));
    }

    #[test]
    fn deleted_entries_report_start_cluster_only() {
        let image = FatImage::from_bytes(build_image()).expect("image");
        let report = image.report(&InspectOptions::default());
        assert_eq!(report.skipped_deleted, 0);
        let deleted = decoded(&report, "\u{E5}LD.TXT");
        assert!(deleted.deleted);
        assert_eq!(deleted.slot, 5);
        assert_eq!(deleted.raw_name, "e54c442020202020545854");
        assert_eq!(deleted.clusters, ClusterRun::StartOnly(5));
    }

    #[test]
    fn hidden_deleted_entries_are_counted() {
        let image = FatImage::from_bytes(build_image()).expect("image");
        let report = image.report(&InspectOptions {
            include_deleted: false,
            ..InspectOptions::default()
        });
        assert_eq!(report.skipped_deleted, 1);
        assert!(
            report
                .entries
                .iter()
                .filter_map(EntryReport::as_file)
                .all(|f| !f.deleted)
        );
    }

    #[test]
    fn walk_chains_off_reports_start_only() {
        let image = FatImage::from_bytes(build_image()).expect("image");
        let report = image.report(&InspectOptions {
            walk_chains: false,
            ..InspectOptions::default()
        });
        assert!(report.entries.iter().all(|e| e.as_file().is_some()));
        assert_eq!(
            decoded(&report, "REPORT.TXT").clusters,
            ClusterRun::StartOnly(2)
        );
    }

    #[test]
    fn find_matches_short_names() {
        let image = FatImage::from_bytes(build_image()).expect("image");
        let opts = InspectOptions::default();
        assert_eq!(image.find("report.txt", &opts).expect("file").slot, 2);
        assert_eq!(image.find("DOCS", &opts).expect("dir").slot, 3);

        let missing = image.find("NOPE.TXT", &opts).expect_err("missing");
        assert_eq!(missing.to_errno(), libc::ENOENT);

        let looped = image.find("LOOP.BIN", &opts).expect_err("cycle");
        assert!(matches!(looped, FsmetaError::Corruption { sector: 3, .. }));
    }

    #[test]
    fn zero_bytes_per_sector_is_invalid_geometry() {
        let mut bytes = build_image();
        bytes[0x0B..0x0D].copy_from_slice(&0_u16.to_le_bytes());
        let err = FatImage::from_bytes(bytes).expect_err("geometry");
        assert!(matches!(err, FsmetaError::InvalidGeometry(_)));
        assert_eq!(err.to_errno(), libc::EINVAL);
    }

    #[test]
    fn tiny_image_is_corruption_at_sector_zero() {
        let err = FatImage::from_bytes(vec![0; 20]).expect_err("short");
        assert!(matches!(err, FsmetaError::Corruption { sector: 0, .. }));
    }

    #[test]
    fn image_shorter_than_its_root_dir_is_rejected() {
        let bytes = build_image()[..3 * BPS + 100].to_vec();
        let err = FatImage::from_bytes(bytes).expect_err("truncated");
        assert!(matches!(err, FsmetaError::Format(_)));
    }

    #[test]
    fn open_reads_image_file() {
        let mut tmp = tempfile::NamedTempFile::new().expect("tempfile");
        tmp.write_all(&build_image()).expect("write");
        tmp.flush().expect("flush");

        let image = FatImage::open(tmp.path()).expect("open");
        let report = image.report(&InspectOptions::default());
        assert_eq!(report.geometry.data_start.0, 4);
        assert_eq!(
            decoded(&report, "REPORT.TXT").clusters,
            ClusterRun::Chain(vec![2, 3])
        );
    }

    #[test]
    fn parse_error_mapping() {
        let geometry = parse_error_to_fsmeta(
            &ParseError::InvalidGeometry {
                field: "bytes_per_sector",
                reason: "must be non-zero",
            },
            0,
        );
        assert_eq!(
            geometry.to_string(),
            "invalid geometry: bytes_per_sector: must be non-zero"
        );

        let cycle = parse_error_to_fsmeta(&ParseError::CycleDetected { cluster: 5 }, 1);
        assert!(matches!(cycle, FsmetaError::Corruption { sector: 1, .. }));
        assert_eq!(cycle.to_errno(), libc::EIO);

        let field = parse_error_to_fsmeta(
            &ParseError::InvalidField {
                field: "width",
                reason: "wider than 8 bytes",
            },
            0,
        );
        assert!(matches!(field, FsmetaError::Parse(_)));
        assert_eq!(field.to_errno(), libc::EINVAL);
    }

    #[test]
    fn report_serializes_to_json_shape() {
        let image = FatImage::from_bytes(build_image()).expect("image");
        let report = image.report(&InspectOptions::default());
        let value = serde_json::to_value(&report).expect("json");
        let entries = value["entries"].as_array().expect("entries");
        assert!(entries.iter().any(|e| e["status"] == "failed"));
        let file = entries
            .iter()
            .find(|e| e["name"] == "REPORT.TXT")
            .expect("report entry");
        assert_eq!(file["status"], "decoded");
        assert_eq!(file["clusters"]["kind"], "chain");
        assert_eq!(file["clusters"]["clusters"], serde_json::json!([2, 3]));
    }
}
