// SPDX-License-Identifier: GPL-3.0-only

//! Shared on-disk and domain types for the escache tools
//!
//! This crate defines the single source of truth for the escache member
//! superblock: the fixed binary layout, the flag bit-packing, the checksum
//! rule, and the numeric validation applied to every size before a device
//! is touched. It performs no I/O; `escache-format` owns the write paths
//! and `escache-sys` owns the device queries.

pub mod error;
pub mod marker;
pub mod size;
pub mod superblock;

pub use error::{CodecError, Result};
pub use marker::{RegistrationMarker, MARKER_LEN};
pub use size::{parse_size, parse_size_sectors, SECTOR_SIZE};
pub use superblock::{
    bdev_min_data_offset, csum, first_usable_bucket, magic_present, sb_offset, verify_csum,
    BdevState, CacheMode, CacheReplacement, SbVersion, Superblock, BDEV_DATA_START_DEFAULT,
    MIN_CACHE_BUCKETS, SB_COPIES_MAX, SB_JOURNAL_BUCKETS, SB_LABEL_SIZE, SB_MAGIC, SB_SECTOR,
    SB_SIZE, SB_START,
};
