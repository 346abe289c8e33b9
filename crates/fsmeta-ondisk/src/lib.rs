#![forbid(unsafe_code)]
//! On-disk format decoding for FAT12/16 volumes and NTFS run lists.
//!
//! Pure parsing crate: no I/O, no side effects. Decodes byte slices into
//! typed structures for FAT boot sectors, directory entries and cluster
//! chains, NTFS data-run lists, and the exFAT UTC offset byte.

pub mod exfat;
pub mod fat;
pub mod ntfs;

pub use exfat::ExfatUtcOffset;
pub use fat::{
    BootFieldDump, ClusterChain, ClusterChainIter, FatAttributeFlags, FatAttributes,
    FatBootSector, FatDate, FatDirEntry, FatTime, FatWidth, RootDirIter, VolumeGeometry,
    cluster_chain, dump_boot_fields, is_valid_entry, iter_root_dir,
};
pub use ntfs::{DataRun, RunList, RunListIter, decode_run_list};
