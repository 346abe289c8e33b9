#![forbid(unsafe_code)]

use fsmeta_types::{
    ByteOrder, ClusterNumber, FAT_ATTR_LONG_NAME, FAT_BOOT_SECTOR_MIN, FAT_DELETED_MARKER,
    FAT_DIR_ENTRY_SIZE, FAT_EPOCH_YEAR, FAT12_END_OF_CHAIN_MIN, FAT16_END_OF_CHAIN, ParseError,
    SectorNumber, ensure_slice, hex_bytes, read_fixed, read_le_u16, read_le_u32, read_u8,
    decode_byte_string, read_uint, trim_space_padded,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, trace};

// ── Boot sector ─────────────────────────────────────────────────────────────

/// Named BPB fields: (name, offset, width). All multi-byte fields are LE
/// except the OEM name, which is a byte string.
const BOOT_FIELDS: &[(&str, usize, usize)] = &[
    ("jump_boot", 0x00, 3),
    ("oem_name", 0x03, 8),
    ("bytes_per_sector", 0x0B, 2),
    ("sectors_per_cluster", 0x0D, 1),
    ("reserved_sectors", 0x0E, 2),
    ("fat_count", 0x10, 1),
    ("root_entry_capacity", 0x11, 2),
    ("total_sectors_16", 0x13, 2),
    ("sectors_per_fat", 0x16, 2),
    ("total_sectors_32", 0x20, 4),
];

/// Decoded FAT12/16 boot sector (BIOS parameter block).
///
/// Parsing only requires the bytes to be present; geometry sanity is checked
/// by [`FatBootSector::geometry`] so that a damaged volume can still have its
/// raw fields reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatBootSector {
    /// Bytes 0..3: the x86 jump to the boot-strap code, read little-endian.
    pub jump_boot: u32,
    pub oem_name: String,
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_entry_capacity: u16,
    /// Effective total sector count: the 16-bit field, or the 32-bit field
    /// at 0x20 when the 16-bit one is zero.
    pub total_sectors: u32,
    pub sectors_per_fat: u16,
}

impl FatBootSector {
    pub fn parse(region: &[u8]) -> Result<Self, ParseError> {
        if region.len() < FAT_BOOT_SECTOR_MIN {
            return Err(ParseError::OutOfRange {
                offset: 0,
                width: FAT_BOOT_SECTOR_MIN,
                available: region.len(),
            });
        }

        let jump_boot = u32::try_from(read_uint(region, 0x00, 3, ByteOrder::Little)?)
            .map_err(|_| ParseError::IntegerConversion { field: "jump_boot" })?;
        let total_16 = read_le_u16(region, 0x13)?;
        let total_sectors = if total_16 > 0 {
            u32::from(total_16)
        } else {
            read_le_u32(region, 0x20)?
        };

        Ok(Self {
            jump_boot,
            oem_name: trim_space_padded(&read_fixed::<8>(region, 0x03)?),
            bytes_per_sector: read_le_u16(region, 0x0B)?,
            sectors_per_cluster: read_u8(region, 0x0D)?,
            reserved_sectors: read_le_u16(region, 0x0E)?,
            fat_count: read_u8(region, 0x10)?,
            root_entry_capacity: read_le_u16(region, 0x11)?,
            total_sectors,
            sectors_per_fat: read_le_u16(region, 0x16)?,
        })
    }

    #[must_use]
    pub fn fat1_start(&self) -> SectorNumber {
        SectorNumber(u64::from(self.reserved_sectors))
    }

    /// FAT2 follows FAT1 directly; the layout assumes the usual two copies.
    #[must_use]
    pub fn fat2_start(&self) -> SectorNumber {
        SectorNumber(self.fat1_start().0 + u64::from(self.sectors_per_fat))
    }

    #[must_use]
    pub fn root_dir_start(&self) -> SectorNumber {
        SectorNumber(self.fat2_start().0 + u64::from(self.sectors_per_fat))
    }

    /// Sectors occupied by the fixed root directory.
    ///
    /// Truncating division: valid volumes size the root directory so that
    /// its 32-byte entries fill whole sectors.
    pub fn root_dir_sector_count(&self) -> Result<u64, ParseError> {
        if self.bytes_per_sector == 0 {
            return Err(ParseError::InvalidGeometry {
                field: "bytes_per_sector",
                reason: "must be non-zero",
            });
        }
        Ok(u64::from(self.root_entry_capacity) * FAT_DIR_ENTRY_SIZE as u64
            / u64::from(self.bytes_per_sector))
    }

    pub fn data_start(&self) -> Result<SectorNumber, ParseError> {
        Ok(SectorNumber(
            self.root_dir_start().0 + self.root_dir_sector_count()?,
        ))
    }

    /// Validate sizes and derive the sector layout of the volume.
    pub fn geometry(&self) -> Result<VolumeGeometry, ParseError> {
        if self.bytes_per_sector == 0 || !self.bytes_per_sector.is_power_of_two() {
            return Err(ParseError::InvalidGeometry {
                field: "bytes_per_sector",
                reason: "must be non-zero power of two",
            });
        }
        if self.sectors_per_cluster == 0 || !self.sectors_per_cluster.is_power_of_two() {
            return Err(ParseError::InvalidGeometry {
                field: "sectors_per_cluster",
                reason: "must be non-zero power of two",
            });
        }

        let geometry = VolumeGeometry {
            bytes_per_sector: self.bytes_per_sector,
            sectors_per_cluster: self.sectors_per_cluster,
            reserved_sectors: self.reserved_sectors,
            fat_count: self.fat_count,
            root_entry_capacity: self.root_entry_capacity,
            sectors_per_fat: self.sectors_per_fat,
            total_sectors: self.total_sectors,
            root_dir_sectors: self.root_dir_sector_count()?,
            fat1_start: self.fat1_start(),
            fat2_start: self.fat2_start(),
            root_dir_start: self.root_dir_start(),
            data_start: self.data_start()?,
        };
        debug!(
            bytes_per_sector = geometry.bytes_per_sector,
            fat1 = geometry.fat1_start.0,
            root_dir = geometry.root_dir_start.0,
            data = geometry.data_start.0,
            "derived FAT volume geometry"
        );
        Ok(geometry)
    }
}

/// One boot-sector field as stored and as decoded, for hex-dump style reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootFieldDump {
    pub name: String,
    pub offset: usize,
    pub width: usize,
    /// Field bytes in on-disk order.
    pub raw_hex: String,
    /// Little-endian value; `None` for byte-string fields.
    pub value: Option<u64>,
}

/// Dump every named boot-sector field with its raw bytes.
pub fn dump_boot_fields(region: &[u8]) -> Result<Vec<BootFieldDump>, ParseError> {
    BOOT_FIELDS
        .iter()
        .map(|&(name, offset, width)| {
            let raw = ensure_slice(region, offset, width)?;
            let value = if name == "oem_name" {
                None
            } else {
                Some(read_uint(region, offset, width, ByteOrder::Little)?)
            };
            Ok(BootFieldDump {
                name: name.to_owned(),
                offset,
                width,
                raw_hex: hex_bytes(raw),
                value,
            })
        })
        .collect()
}

/// Validated FAT12/16 geometry with every region start precomputed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeGeometry {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_entry_capacity: u16,
    pub sectors_per_fat: u16,
    pub total_sectors: u32,
    pub root_dir_sectors: u64,
    pub fat1_start: SectorNumber,
    pub fat2_start: SectorNumber,
    pub root_dir_start: SectorNumber,
    pub data_start: SectorNumber,
}

impl VolumeGeometry {
    #[must_use]
    pub fn sector_to_byte(&self, sector: SectorNumber) -> u64 {
        sector.0 * u64::from(self.bytes_per_sector)
    }

    /// Byte range `(offset, len)` of the first FAT copy.
    #[must_use]
    pub fn fat_region(&self) -> (u64, u64) {
        (
            self.sector_to_byte(self.fat1_start),
            u64::from(self.sectors_per_fat) * u64::from(self.bytes_per_sector),
        )
    }

    /// Byte range `(offset, len)` of the fixed root directory.
    #[must_use]
    pub fn root_dir_region(&self) -> (u64, u64) {
        (
            self.sector_to_byte(self.root_dir_start),
            self.root_dir_sectors * u64::from(self.bytes_per_sector),
        )
    }

    #[must_use]
    pub fn cluster_bytes(&self) -> u64 {
        u64::from(self.sectors_per_cluster) * u64::from(self.bytes_per_sector)
    }

    /// First sector of a data cluster. Cluster numbering starts at 2.
    #[must_use]
    pub fn cluster_to_sector(&self, cluster: ClusterNumber) -> Option<SectorNumber> {
        let index = u64::from(cluster.0).checked_sub(2)?;
        self.data_start
            .checked_add(index * u64::from(self.sectors_per_cluster))
    }
}

// ── Directory entries ───────────────────────────────────────────────────────

/// Raw attribute byte of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatAttributes(pub u8);

impl FatAttributes {
    pub const READ_ONLY: Self = Self(0x01);
    pub const HIDDEN: Self = Self(0x02);
    pub const SYSTEM: Self = Self(0x04);
    pub const VOLUME_LABEL: Self = Self(0x08);
    pub const LONG_NAME: Self = Self(FAT_ATTR_LONG_NAME);
    pub const DIRECTORY: Self = Self(0x10);
    pub const ARCHIVE: Self = Self(0x20);

    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_long_name(self) -> bool {
        self.0 == FAT_ATTR_LONG_NAME
    }

    /// Decode the individual flags.
    ///
    /// Directory and archive are read from the high nibble as a value (1 and
    /// 2), not as independent bits. The long-name marker wins over the low
    /// nibble bits it is made of.
    #[must_use]
    pub fn flags(self) -> FatAttributeFlags {
        if self.is_long_name() {
            return FatAttributeFlags {
                long_name: true,
                ..FatAttributeFlags::default()
            };
        }
        let high = self.0 >> 4;
        FatAttributeFlags {
            read_only: self.0 & Self::READ_ONLY.0 != 0,
            hidden: self.0 & Self::HIDDEN.0 != 0,
            system: self.0 & Self::SYSTEM.0 != 0,
            volume_label: self.0 & Self::VOLUME_LABEL.0 != 0,
            long_name: false,
            directory: high == 1,
            archive: high == 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct FatAttributeFlags {
    pub read_only: bool,
    pub hidden: bool,
    pub system: bool,
    pub volume_label: bool,
    pub long_name: bool,
    pub directory: bool,
    pub archive: bool,
}

/// Packed FAT date: year-1980 in bits 9-15, month in 5-8, day in 0-4.
///
/// No calendar validation: a zero value decodes to `1980-00-00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatDate(pub u16);

impl FatDate {
    #[must_use]
    pub fn year(self) -> u16 {
        FAT_EPOCH_YEAR + (self.0 >> 9)
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn month(self) -> u8 {
        ((self.0 >> 5) & 0x0F) as u8
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn day(self) -> u8 {
        (self.0 & 0x1F) as u8
    }
}

impl fmt::Display for FatDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year(), self.month(), self.day())
    }
}

/// Packed FAT time: hours in bits 11-15, minutes in 5-10, seconds/2 in 0-4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatTime(pub u16);

impl FatTime {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn hours(self) -> u8 {
        (self.0 >> 11) as u8
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn minutes(self) -> u8 {
        ((self.0 >> 5) & 0x3F) as u8
    }

    /// Stored seconds (always even).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn seconds(self) -> u8 {
        ((self.0 & 0x1F) as u8) * 2
    }

    /// The two second values the timestamp may stand for; the low bit is not
    /// stored on disk.
    #[must_use]
    pub fn second_candidates(self) -> (u8, u8) {
        let even = self.seconds();
        (even, even + 1)
    }
}

impl fmt::Display for FatTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (even, odd) = self.second_candidates();
        write!(
            f,
            "{:02}:{:02}:{even:02} (or :{odd:02})",
            self.hours(),
            self.minutes()
        )
    }
}

/// A 32-byte FAT directory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatDirEntry {
    /// 8 name bytes followed by 3 extension bytes, space padded.
    pub raw_name: [u8; 11],
    pub attributes: FatAttributes,
    pub created_time: FatTime,
    pub created_date: FatDate,
    pub access_date: FatDate,
    pub modified_time: FatTime,
    pub modified_date: FatDate,
    pub start_cluster: ClusterNumber,
    pub file_size: u32,
}

impl FatDirEntry {
    /// Decode one directory record. The slice must be exactly 32 bytes.
    pub fn parse(record: &[u8]) -> Result<Self, ParseError> {
        if record.len() != FAT_DIR_ENTRY_SIZE {
            return Err(ParseError::MalformedRecord {
                len: record.len(),
                reason: "directory entry must be 32 bytes",
            });
        }

        // The cluster number is split: high half at 0x14, low half at 0x1A.
        let cluster_hi = u32::from(read_le_u16(record, 0x14)?);
        let cluster_lo = u32::from(read_le_u16(record, 0x1A)?);

        Ok(Self {
            raw_name: read_fixed::<11>(record, 0x00)?,
            attributes: FatAttributes(read_u8(record, 0x0B)?),
            created_time: FatTime(read_le_u16(record, 0x0E)?),
            created_date: FatDate(read_le_u16(record, 0x10)?),
            access_date: FatDate(read_le_u16(record, 0x12)?),
            modified_time: FatTime(read_le_u16(record, 0x16)?),
            modified_date: FatDate(read_le_u16(record, 0x18)?),
            start_cluster: ClusterNumber((cluster_hi << 16) | cluster_lo),
            file_size: read_le_u32(record, 0x1C)?,
        })
    }

    #[must_use]
    pub fn is_valid_entry(&self) -> bool {
        is_valid_entry(&self.raw_name)
    }

    #[must_use]
    pub fn is_long_name_entry(&self) -> bool {
        self.attributes.is_long_name()
    }

    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.raw_name[0] == FAT_DELETED_MARKER
    }

    #[must_use]
    pub fn attribute_flags(&self) -> FatAttributeFlags {
        self.attributes.flags()
    }

    /// Space-trimmed base name, a dot, and the 3 extension bytes as stored.
    ///
    /// Bytes map one-to-one onto code points, so the 0xE5 marker of a deleted
    /// entry shows up as `'\u{E5}'` and embedded NULs are kept.
    #[must_use]
    pub fn short_name(&self) -> String {
        let base = trim_space_padded(&self.raw_name[..8]);
        let ext = decode_byte_string(&self.raw_name[8..]);
        format!("{base}.{ext}")
    }
}

/// A slot holds an entry iff its first 8 bytes are not all zero.
#[must_use]
pub fn is_valid_entry(record: &[u8]) -> bool {
    record.len() >= 8 && record[..8].iter().any(|b| *b != 0)
}

/// Iterator over the records of a FAT12/16 root directory region.
///
/// Yields each occupied 32-byte slot, including long-name and deleted
/// records, and stops at the first slot whose name bytes are all zero. A
/// trailing partial slot yields a single `MalformedRecord` error.
pub struct RootDirIter<'a> {
    region: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> RootDirIter<'a> {
    #[must_use]
    pub fn new(region: &'a [u8]) -> Self {
        Self {
            region,
            offset: 0,
            done: false,
        }
    }

    /// Byte offset of the next slot within the region.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for RootDirIter<'_> {
    type Item = Result<FatDirEntry, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset >= self.region.len() {
            return None;
        }

        let end = (self.offset + FAT_DIR_ENTRY_SIZE).min(self.region.len());
        let record = &self.region[self.offset..end];
        if !is_valid_entry(record) && record.len() >= 8 {
            self.done = true;
            return None;
        }

        self.offset = end;
        let parsed = FatDirEntry::parse(record);
        if parsed.is_err() {
            self.done = true;
        }
        Some(parsed)
    }
}

/// Create an iterator over root directory records.
#[must_use]
pub fn iter_root_dir(region: &[u8]) -> RootDirIter<'_> {
    RootDirIter::new(region)
}

// ── Cluster chains ──────────────────────────────────────────────────────────

/// FAT table entry width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FatWidth {
    /// 16-bit little-endian entries; only `0xFFFF` ends a chain.
    Fat16,
    /// 12-bit entries packed two per three bytes; `0xFF8..=0xFFF` ends a chain.
    Fat12,
}

impl FatWidth {
    /// Number of whole entries in a table of `len` bytes.
    #[must_use]
    pub fn entry_count(self, len: usize) -> usize {
        match self {
            Self::Fat16 => len / 2,
            Self::Fat12 => len * 2 / 3,
        }
    }

    /// Read the entry for `cluster`, or `None` if it lies outside the table.
    #[must_use]
    pub fn read_entry(self, table: &[u8], cluster: u16) -> Option<u16> {
        match self {
            Self::Fat16 => read_le_u16(table, usize::from(cluster) * 2).ok(),
            Self::Fat12 => {
                let idx = usize::from(cluster) * 3 / 2;
                let word = read_le_u16(table, idx).ok()?;
                Some(if cluster % 2 == 0 {
                    word & 0x0FFF
                } else {
                    word >> 4
                })
            }
        }
    }

    #[must_use]
    pub fn is_end_of_chain(self, value: u16) -> bool {
        match self {
            Self::Fat16 => value == FAT16_END_OF_CHAIN,
            Self::Fat12 => value >= FAT12_END_OF_CHAIN_MIN,
        }
    }
}

/// A file's cluster chain within a FAT table.
///
/// The chain is a description, not a cursor: every call to
/// [`iter`](ClusterChain::iter) walks it again from the start.
#[derive(Debug, Clone, Copy)]
pub struct ClusterChain<'a> {
    table: &'a [u8],
    start: u16,
    width: FatWidth,
}

impl<'a> ClusterChain<'a> {
    /// FAT16 chain starting at `start`.
    #[must_use]
    pub fn new(table: &'a [u8], start: u16) -> Self {
        Self::with_width(table, start, FatWidth::Fat16)
    }

    #[must_use]
    pub fn with_width(table: &'a [u8], start: u16, width: FatWidth) -> Self {
        Self {
            table,
            start,
            width,
        }
    }

    #[must_use]
    pub fn iter(&self) -> ClusterChainIter<'a> {
        ClusterChainIter {
            table: self.table,
            width: self.width,
            state: ChainState::Start(self.start),
            visited: HashSet::new(),
        }
    }

    /// Walk the whole chain.
    pub fn collect_clusters(&self) -> Result<Vec<u16>, ParseError> {
        let clusters = self.iter().collect::<Result<Vec<_>, _>>()?;
        debug!(
            start = self.start,
            len = clusters.len(),
            "walked cluster chain"
        );
        Ok(clusters)
    }
}

impl<'a> IntoIterator for &ClusterChain<'a> {
    type Item = Result<u16, ParseError>;
    type IntoIter = ClusterChainIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Copy)]
enum ChainState {
    Start(u16),
    /// The cluster was yielded; its successor has not been read yet.
    Follow(u16),
    Done,
}

/// Lazy walk over a cluster chain.
///
/// Ends normally at the end-of-chain marker. Yields one error and then ends
/// if a cluster points outside the table or a cluster repeats.
pub struct ClusterChainIter<'a> {
    table: &'a [u8],
    width: FatWidth,
    state: ChainState,
    visited: HashSet<u16>,
}

impl ClusterChainIter<'_> {
    fn broken(&mut self, cluster: u16, next: u16) -> Option<Result<u16, ParseError>> {
        self.state = ChainState::Done;
        Some(Err(ParseError::BrokenChain {
            cluster: u32::from(cluster),
            next: u32::from(next),
            entries: self.width.entry_count(self.table.len()),
        }))
    }
}

impl Iterator for ClusterChainIter<'_> {
    type Item = Result<u16, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            ChainState::Done => None,
            ChainState::Start(start) => {
                if self.width.read_entry(self.table, start).is_none() {
                    return self.broken(start, start);
                }
                self.visited.insert(start);
                self.state = ChainState::Follow(start);
                Some(Ok(start))
            }
            ChainState::Follow(current) => {
                let Some(next) = self.width.read_entry(self.table, current) else {
                    return self.broken(current, current);
                };
                if self.width.is_end_of_chain(next) {
                    self.state = ChainState::Done;
                    return None;
                }
                if self.width.read_entry(self.table, next).is_none() {
                    return self.broken(current, next);
                }
                if !self.visited.insert(next) {
                    self.state = ChainState::Done;
                    return Some(Err(ParseError::CycleDetected {
                        cluster: u32::from(next),
                    }));
                }
                trace!(from = current, to = next, "chain step");
                self.state = ChainState::Follow(next);
                Some(Ok(next))
            }
        }
    }
}

/// FAT16 chain from `start`, walked to completion.
pub fn cluster_chain(table: &[u8], start: u16) -> Result<Vec<u16>, ParseError> {
    ClusterChain::new(table, start).collect_clusters()
}
