// SPDX-License-Identifier: GPL-3.0-only

//! The escache member superblock
//!
//! One fixed-size 2256-byte record per on-disk copy, all integer fields
//! little-endian. The primary copy lives at sector 8; backing devices may
//! carry further copies at a one-slot (4096-byte) stride. The 64-bit
//! checksum at offset 0 covers the record from byte 8 through the end of
//! the journal-bucket array prefix sized by `njournal_buckets`.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use crc::{Crc, CRC_64_WE};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CodecError, Result};
use crate::size::SECTOR_SIZE;

/// Identifies a record as an escache superblock.
pub const SB_MAGIC: [u8; 16] = [
    0xc6, 0x85, 0x73, 0xf6, 0x4e, 0x1a, 0x45, 0xca, 0x82, 0x65, 0xf5, 0x7f, 0x48, 0xba, 0x6d, 0x81,
];

/// Sector of the primary superblock copy.
pub const SB_SECTOR: u64 = 8;

/// Byte offset of the primary superblock copy.
pub const SB_START: u64 = SB_SECTOR * SECTOR_SIZE;

/// Serialized size of one record.
pub const SB_SIZE: usize = 2256;

pub const SB_LABEL_SIZE: usize = 32;

/// Buckets reserved for the journal on a cache device.
pub const SB_JOURNAL_BUCKETS: u64 = 256;

/// Default first data sector on a backing device carrying no explicit
/// offset.
pub const BDEV_DATA_START_DEFAULT: u64 = 16;

/// Upper bound on backing-device superblock copies, and on the reset
/// index.
pub const SB_COPIES_MAX: u8 = 16;

/// A cache device with fewer buckets than this is not worth attaching.
pub const MIN_CACHE_BUCKETS: u64 = 128;

/// Sectors reserved ahead of the first usable cache bucket.
const SB_RESERVED_SECTORS: u16 = 23;

/// Byte offset of superblock copy `index` (0 = primary).
pub fn sb_offset(index: u8) -> u64 {
    SB_START * (u64::from(index) + 1)
}

/// Minimum backing data offset leaving room for `copies` superblock
/// copies at their fixed spacing.
pub fn bdev_min_data_offset(copies: u8) -> u64 {
    BDEV_DATA_START_DEFAULT + u64::from(copies) * SB_SECTOR
}

/// First usable bucket on a cache device of the given bucket size.
pub fn first_usable_bucket(bucket_size: u16) -> u16 {
    SB_RESERVED_SECTORS / bucket_size + 1
}

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_WE);

/// The 64-bit record checksum. CRC-64/WE, the polynomial the driver
/// verifies at attach time.
pub fn csum(bytes: &[u8]) -> u64 {
    CRC64.checksum(bytes)
}

/// Field placement within the serialized record.
mod layout {
    use std::ops::Range;

    pub const CSUM: Range<usize> = 0..8;
    pub const OFFSET: Range<usize> = 8..16;
    pub const VERSION: Range<usize> = 16..24;
    pub const MAGIC: Range<usize> = 24..40;
    pub const UUID: Range<usize> = 40..56;
    pub const SET_UUID: Range<usize> = 56..72;
    pub const LABEL: Range<usize> = 72..104;
    pub const FLAGS: Range<usize> = 104..112;
    pub const SEQ: Range<usize> = 112..120;
    // 64 reserved bytes, then the role-specific word: bucket count for
    // cache devices, data offset for backing devices.
    pub const ROLE_WORD: Range<usize> = 184..192;
    pub const BLOCK_SIZE: Range<usize> = 192..194;
    pub const BUCKET_SIZE: Range<usize> = 194..196;
    pub const NR_IN_SET: Range<usize> = 196..198;
    pub const NR_THIS_DEV: Range<usize> = 198..200;
    pub const LAST_MOUNT: Range<usize> = 200..204;
    pub const FIRST_BUCKET: Range<usize> = 204..206;
    pub const NJOURNAL: Range<usize> = 206..208;
    pub const JOURNAL: usize = 208;
}

const _: () = assert!(layout::JOURNAL + 8 * SB_JOURNAL_BUCKETS as usize == SB_SIZE);

/// On-disk version tag, doubling as the cache/backing discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SbVersion {
    Cache = 0,
    Backing = 1,
    /// Written by the driver, never by the format tool.
    CacheWithUuid = 3,
    BackingWithOffset = 4,
}

impl SbVersion {
    pub fn from_raw(raw: u64) -> Result<Self> {
        match raw {
            0 => Ok(Self::Cache),
            1 => Ok(Self::Backing),
            3 => Ok(Self::CacheWithUuid),
            4 => Ok(Self::BackingWithOffset),
            other => Err(CodecError::UnknownVersion(other)),
        }
    }

    pub fn raw(self) -> u64 {
        self as u64
    }

    pub fn is_backing(self) -> bool {
        matches!(self, Self::Backing | Self::BackingWithOffset)
    }
}

/// Write-propagation mode stored in a backing superblock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    #[default]
    Writethrough = 0,
    Writeback = 1,
}

/// Backing device state bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BdevState {
    #[default]
    None = 0,
    Clean = 1,
    Dirty = 2,
    Stale = 3,
}

/// Cache eviction policy stored in a cache superblock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheReplacement {
    #[default]
    Lru = 0,
    Fifo = 1,
    Random = 2,
}

impl FromStr for CacheReplacement {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "lru" => Ok(Self::Lru),
            "fifo" => Ok(Self::Fifo),
            "random" => Ok(Self::Random),
            other => Err(CodecError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for CacheReplacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lru => "lru",
            Self::Fifo => "fifo",
            Self::Random => "random",
        })
    }
}

// Flag word bit packing. Cache and backing devices interpret the same
// word differently; offsets and widths match the driver.
const CACHE_DISCARD_OFFSET: u32 = 1;
const CACHE_REPLACEMENT_OFFSET: u32 = 2;
const CACHE_REPLACEMENT_BITS: u32 = 3;
const BDEV_CACHE_MODE_BITS: u32 = 4;
const BDEV_STATE_OFFSET: u32 = 61;
const BDEV_STATE_BITS: u32 = 2;

fn get_bits(flags: u64, offset: u32, bits: u32) -> u64 {
    (flags >> offset) & ((1u64 << bits) - 1)
}

fn set_bits(flags: &mut u64, offset: u32, bits: u32, value: u64) {
    let mask = ((1u64 << bits) - 1) << offset;
    *flags = (*flags & !mask) | ((value << offset) & mask);
}

fn le_u16(buf: &[u8], r: Range<usize>) -> u16 {
    let mut b = [0u8; 2];
    b.copy_from_slice(&buf[r]);
    u16::from_le_bytes(b)
}

fn le_u32(buf: &[u8], r: Range<usize>) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[r]);
    u32::from_le_bytes(b)
}

fn le_u64(buf: &[u8], r: Range<usize>) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[r]);
    u64::from_le_bytes(b)
}

fn uuid_at(buf: &[u8], r: Range<usize>) -> Uuid {
    let mut b = [0u8; 16];
    b.copy_from_slice(&buf[r]);
    Uuid::from_bytes(b)
}

/// One decoded (or to-be-written) superblock record.
///
/// `nbuckets` and `data_offset` alias the same on-disk word; which one is
/// meaningful follows from `version`. Both are kept so a decoded record
/// round-trips without reinterpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    /// Stored checksum as read; `encode` always recomputes it.
    pub csum: u64,
    /// Sector this copy was written at.
    pub offset: u64,
    pub version: SbVersion,
    pub uuid: Uuid,
    pub set_uuid: Uuid,
    pub label: [u8; SB_LABEL_SIZE],
    pub flags: u64,
    pub seq: u64,
    /// Cache devices: total buckets (capacity / bucket_size).
    pub nbuckets: u64,
    /// Backing devices: first data sector, 0 when the default applies.
    pub data_offset: u64,
    pub block_size: u16,
    pub bucket_size: u16,
    pub nr_in_set: u16,
    pub nr_this_dev: u16,
    pub last_mount: u32,
    pub first_bucket: u16,
    pub njournal_buckets: u16,
}

impl Superblock {
    /// A zeroed record carrying only identity and geometry, the starting
    /// point of both write paths.
    pub fn new(version: SbVersion, uuid: Uuid, set_uuid: Uuid, block_size: u16, bucket_size: u16) -> Self {
        Self {
            csum: 0,
            offset: SB_SECTOR,
            version,
            uuid,
            set_uuid,
            label: [0; SB_LABEL_SIZE],
            flags: 0,
            seq: 0,
            nbuckets: 0,
            data_offset: 0,
            block_size,
            bucket_size,
            nr_in_set: 0,
            nr_this_dev: 0,
            last_mount: 0,
            first_bucket: 0,
            njournal_buckets: 0,
        }
    }

    pub fn cache_discard(&self) -> bool {
        get_bits(self.flags, CACHE_DISCARD_OFFSET, 1) != 0
    }

    pub fn set_cache_discard(&mut self, on: bool) {
        set_bits(&mut self.flags, CACHE_DISCARD_OFFSET, 1, u64::from(on));
    }

    pub fn cache_replacement(&self) -> CacheReplacement {
        match get_bits(self.flags, CACHE_REPLACEMENT_OFFSET, CACHE_REPLACEMENT_BITS) {
            1 => CacheReplacement::Fifo,
            2 => CacheReplacement::Random,
            _ => CacheReplacement::Lru,
        }
    }

    pub fn set_cache_replacement(&mut self, policy: CacheReplacement) {
        set_bits(
            &mut self.flags,
            CACHE_REPLACEMENT_OFFSET,
            CACHE_REPLACEMENT_BITS,
            policy as u64,
        );
    }

    pub fn bdev_cache_mode(&self) -> CacheMode {
        match get_bits(self.flags, 0, BDEV_CACHE_MODE_BITS) {
            1 => CacheMode::Writeback,
            _ => CacheMode::Writethrough,
        }
    }

    pub fn set_bdev_cache_mode(&mut self, mode: CacheMode) {
        set_bits(&mut self.flags, 0, BDEV_CACHE_MODE_BITS, mode as u64);
    }

    pub fn bdev_state(&self) -> BdevState {
        match get_bits(self.flags, BDEV_STATE_OFFSET, BDEV_STATE_BITS) {
            1 => BdevState::Clean,
            2 => BdevState::Dirty,
            3 => BdevState::Stale,
            _ => BdevState::None,
        }
    }

    pub fn set_bdev_state(&mut self, state: BdevState) {
        set_bits(
            &mut self.flags,
            BDEV_STATE_OFFSET,
            BDEV_STATE_BITS,
            state as u64,
        );
    }

    /// Serialize the record. The checksum field is recomputed from the
    /// serialized bytes; `self.csum` is ignored.
    pub fn encode(&self) -> [u8; SB_SIZE] {
        let mut buf = [0u8; SB_SIZE];

        buf[layout::OFFSET].copy_from_slice(&self.offset.to_le_bytes());
        buf[layout::VERSION].copy_from_slice(&self.version.raw().to_le_bytes());
        buf[layout::MAGIC].copy_from_slice(&SB_MAGIC);
        buf[layout::UUID].copy_from_slice(self.uuid.as_bytes());
        buf[layout::SET_UUID].copy_from_slice(self.set_uuid.as_bytes());
        buf[layout::LABEL].copy_from_slice(&self.label);
        buf[layout::FLAGS].copy_from_slice(&self.flags.to_le_bytes());
        buf[layout::SEQ].copy_from_slice(&self.seq.to_le_bytes());

        let role_word = if self.version.is_backing() {
            self.data_offset
        } else {
            self.nbuckets
        };
        buf[layout::ROLE_WORD].copy_from_slice(&role_word.to_le_bytes());

        buf[layout::BLOCK_SIZE].copy_from_slice(&self.block_size.to_le_bytes());
        buf[layout::BUCKET_SIZE].copy_from_slice(&self.bucket_size.to_le_bytes());
        buf[layout::NR_IN_SET].copy_from_slice(&self.nr_in_set.to_le_bytes());
        buf[layout::NR_THIS_DEV].copy_from_slice(&self.nr_this_dev.to_le_bytes());
        buf[layout::LAST_MOUNT].copy_from_slice(&self.last_mount.to_le_bytes());
        buf[layout::FIRST_BUCKET].copy_from_slice(&self.first_bucket.to_le_bytes());
        buf[layout::NJOURNAL].copy_from_slice(&self.njournal_buckets.to_le_bytes());

        let end = csum_end(self.njournal_buckets);
        let c = csum(&buf[layout::CSUM.end..end]);
        buf[layout::CSUM].copy_from_slice(&c.to_le_bytes());

        buf
    }

    /// Parse a record, requiring the magic and a known version.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < SB_SIZE {
            return Err(CodecError::Truncated { len: buf.len() });
        }
        if !magic_present(buf) {
            return Err(CodecError::BadMagic);
        }

        let version = SbVersion::from_raw(le_u64(buf, layout::VERSION))?;
        let role_word = le_u64(buf, layout::ROLE_WORD);
        let (nbuckets, data_offset) = if version.is_backing() {
            (0, role_word)
        } else {
            (role_word, 0)
        };

        let mut label = [0u8; SB_LABEL_SIZE];
        label.copy_from_slice(&buf[layout::LABEL]);

        Ok(Self {
            csum: le_u64(buf, layout::CSUM),
            offset: le_u64(buf, layout::OFFSET),
            version,
            uuid: uuid_at(buf, layout::UUID),
            set_uuid: uuid_at(buf, layout::SET_UUID),
            label,
            flags: le_u64(buf, layout::FLAGS),
            seq: le_u64(buf, layout::SEQ),
            nbuckets,
            data_offset,
            block_size: le_u16(buf, layout::BLOCK_SIZE),
            bucket_size: le_u16(buf, layout::BUCKET_SIZE),
            nr_in_set: le_u16(buf, layout::NR_IN_SET),
            nr_this_dev: le_u16(buf, layout::NR_THIS_DEV),
            last_mount: le_u32(buf, layout::LAST_MOUNT),
            first_bucket: le_u16(buf, layout::FIRST_BUCKET),
            njournal_buckets: le_u16(buf, layout::NJOURNAL),
        })
    }
}

/// Whether a raw buffer carries the escache magic at its record offset.
pub fn magic_present(buf: &[u8]) -> bool {
    buf.len() >= layout::MAGIC.end && buf[layout::MAGIC] == SB_MAGIC
}

/// Check the stored checksum of a serialized record.
pub fn verify_csum(buf: &[u8]) -> bool {
    if buf.len() < SB_SIZE {
        return false;
    }
    let stored = le_u64(buf, layout::CSUM);
    let end = csum_end(le_u16(buf, layout::NJOURNAL));
    csum(&buf[layout::CSUM.end..end]) == stored
}

/// End of the checksummed region: the header plus the journal-bucket
/// array prefix in use. Clamped so a corrupt count cannot index out of
/// the record.
fn csum_end(njournal_buckets: u16) -> usize {
    (layout::JOURNAL + 8 * usize::from(njournal_buckets)).min(SB_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cache_sb() -> Superblock {
        let mut sb = Superblock::new(
            SbVersion::Cache,
            Uuid::new_v4(),
            Uuid::new_v4(),
            8,
            1024,
        );
        sb.nbuckets = 4096;
        sb.nr_in_set = 1;
        sb.first_bucket = first_usable_bucket(1024);
        sb.set_cache_discard(true);
        sb.set_cache_replacement(CacheReplacement::Fifo);
        sb
    }

    #[test]
    fn layout_constants_are_consistent() {
        assert_eq!(SB_SIZE, 2256);
        assert_eq!(SB_START, 4096);
        assert_eq!(sb_offset(0), SB_START);
        assert_eq!(sb_offset(3), 4 * SB_START);
        assert_eq!(bdev_min_data_offset(1), 24);
        assert_eq!(bdev_min_data_offset(16), 144);
    }

    #[test]
    fn encode_places_fields_at_fixed_offsets() {
        let sb = sample_cache_sb();
        let buf = sb.encode();

        assert_eq!(&buf[24..40], &SB_MAGIC);
        assert_eq!(le_u64(&buf, 8..16), SB_SECTOR);
        assert_eq!(le_u64(&buf, 16..24), 0);
        assert_eq!(&buf[40..56], sb.uuid.as_bytes());
        assert_eq!(&buf[56..72], sb.set_uuid.as_bytes());
        assert_eq!(le_u64(&buf, 184..192), 4096);
        assert_eq!(le_u16(&buf, 192..194), 8);
        assert_eq!(le_u16(&buf, 194..196), 1024);
        assert_eq!(le_u16(&buf, 196..198), 1);
        assert_eq!(le_u16(&buf, 204..206), 1);
    }

    #[test]
    fn encode_decode_round_trips() {
        let sb = sample_cache_sb();
        let buf = sb.encode();
        let back = Superblock::decode(&buf).unwrap();
        assert_eq!(back.version, SbVersion::Cache);
        assert_eq!(back.uuid, sb.uuid);
        assert_eq!(back.set_uuid, sb.set_uuid);
        assert_eq!(back.nbuckets, sb.nbuckets);
        assert_eq!(back.block_size, sb.block_size);
        assert_eq!(back.bucket_size, sb.bucket_size);
        assert!(back.cache_discard());
        assert_eq!(back.cache_replacement(), CacheReplacement::Fifo);
    }

    #[test]
    fn checksum_covers_fresh_record_header() {
        let sb = sample_cache_sb();
        let buf = sb.encode();
        assert!(verify_csum(&buf));
        assert_eq!(le_u64(&buf, 0..8), csum(&buf[8..208]));

        // Any header flip breaks it.
        let mut bad = buf;
        bad[100] ^= 0xff;
        assert!(!verify_csum(&bad));
    }

    #[test]
    fn backing_record_stores_data_offset_in_role_word() {
        let mut sb = Superblock::new(
            SbVersion::BackingWithOffset,
            Uuid::new_v4(),
            Uuid::new_v4(),
            8,
            1024,
        );
        sb.data_offset = 40;
        sb.set_bdev_cache_mode(CacheMode::Writeback);
        sb.set_bdev_state(BdevState::Dirty);

        let buf = sb.encode();
        assert_eq!(le_u64(&buf, 184..192), 40);

        let back = Superblock::decode(&buf).unwrap();
        assert_eq!(back.data_offset, 40);
        assert_eq!(back.nbuckets, 0);
        assert_eq!(back.bdev_cache_mode(), CacheMode::Writeback);
        assert_eq!(back.bdev_state(), BdevState::Dirty);
    }

    #[test]
    fn bdev_state_lives_in_the_top_bits() {
        let mut sb = Superblock::new(
            SbVersion::Backing,
            Uuid::nil(),
            Uuid::nil(),
            8,
            1024,
        );
        sb.set_bdev_state(BdevState::Dirty);
        assert_eq!(sb.flags >> 61, 2);
        sb.set_bdev_cache_mode(CacheMode::Writeback);
        assert_eq!(sb.flags & 0xf, 1);
        assert_eq!(sb.bdev_state(), BdevState::Dirty);
    }

    #[test]
    fn decode_rejects_bad_magic_and_unknown_versions() {
        let sb = sample_cache_sb();
        let mut buf = sb.encode();

        let mut no_magic = buf;
        no_magic[24] ^= 1;
        assert!(matches!(
            Superblock::decode(&no_magic),
            Err(CodecError::BadMagic)
        ));
        assert!(!magic_present(&no_magic));

        buf[16..24].copy_from_slice(&99u64.to_le_bytes());
        assert!(matches!(
            Superblock::decode(&buf),
            Err(CodecError::UnknownVersion(99))
        ));

        assert!(matches!(
            Superblock::decode(&buf[..100]),
            Err(CodecError::Truncated { len: 100 })
        ));
    }

    #[test]
    fn first_usable_bucket_reserves_the_header() {
        assert_eq!(first_usable_bucket(1024), 1);
        assert_eq!(first_usable_bucket(16), 2);
        assert_eq!(first_usable_bucket(8), 3);
    }

    #[test]
    fn replacement_policy_parses_from_str() {
        assert_eq!("lru".parse::<CacheReplacement>().unwrap(), CacheReplacement::Lru);
        assert_eq!("fifo".parse::<CacheReplacement>().unwrap(), CacheReplacement::Fifo);
        assert_eq!("random".parse::<CacheReplacement>().unwrap(), CacheReplacement::Random);
        assert!("mru".parse::<CacheReplacement>().is_err());
    }
}
