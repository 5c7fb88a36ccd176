// SPDX-License-Identifier: GPL-3.0-only

//! Superblock write paths for escache member devices
//!
//! Two operations: `format_device` initializes a device from scratch
//! (cache or backing role), `reset_identity` reassigns the identifier
//! pair of one existing backing-device superblock copy in place. Both
//! open the device exclusively, validate every precondition before the
//! first write, and flush before closing. Devices in a batch are the
//! caller's concern; nothing here retries or rolls back.

pub mod error;
pub mod probe;
pub mod writer;

pub use error::{FormatError, Result};
pub use probe::{BlkidProbe, SignatureProbe};
pub use writer::{format_device, reset_identity};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use escache_types::{bdev_min_data_offset, CacheReplacement, RegistrationMarker, SbVersion};

/// Which half of the cache pair a device is being formatted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceRole {
    Cache,
    Backing,
}

/// Everything the format path needs, threaded explicitly — there is no
/// process-global state.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    /// Sectors; 0 is never valid here, the CLI substitutes the probed
    /// native size before calling in.
    pub block_size: u16,
    /// Sectors.
    pub bucket_size: u16,
    pub writeback: bool,
    pub discard: bool,
    /// Overwrite an existing escache superblock.
    pub wipe: bool,
    pub replacement_policy: CacheReplacement,
    /// First data sector on backing devices.
    pub data_offset: u64,
    pub set_uuid: Uuid,
    pub device_uuid: Uuid,
    /// Mark the backing superblock dirty so an attach resumes writeback.
    pub dirty: bool,
    /// Superblock copies on backing devices (primary included).
    pub copies: u8,
    /// Identity tag at device offset 0, at most one.
    pub marker: Option<RegistrationMarker>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            block_size: 1,
            bucket_size: 1024,
            writeback: false,
            discard: false,
            wipe: false,
            replacement_policy: CacheReplacement::Lru,
            data_offset: bdev_min_data_offset(1),
            set_uuid: Uuid::new_v4(),
            device_uuid: Uuid::new_v4(),
            dirty: false,
            copies: 1,
            marker: None,
        }
    }
}

/// Identifier pair of one written superblock copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyIdentity {
    pub index: u8,
    pub uuid: Uuid,
    pub set_uuid: Uuid,
}

/// Role-specific geometry of a freshly formatted device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleDetail {
    Cache {
        nbuckets: u64,
        nr_in_set: u16,
        nr_this_dev: u16,
        first_bucket: u16,
    },
    Backing {
        data_offset: u64,
    },
}

/// What `format_device` wrote, for the caller to report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatReport {
    pub device: String,
    pub version: SbVersion,
    pub block_size: u16,
    pub bucket_size: u16,
    pub primary: CopyIdentity,
    pub detail: RoleDetail,
    pub secondaries: Vec<CopyIdentity>,
}

/// What `reset_identity` rewrote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetReport {
    pub device: String,
    pub index: u8,
    pub uuid: Uuid,
    pub set_uuid: Uuid,
    pub version: SbVersion,
    pub block_size: u16,
    pub data_offset: u64,
}
