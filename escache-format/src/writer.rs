// SPDX-License-Identifier: GPL-3.0-only

//! The format and reset write sequences
//!
//! Write order on format is part of the crash-safety contract: the header
//! region is zeroed before the new record lands, so an interruption
//! leaves a device that is identifiably not escache and safely
//! re-formattable, never one carrying a stale identity.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::{FileExt, OpenOptionsExt};
use std::path::Path;

use tracing::debug;
use uuid::Uuid;

use escache_sys::geometry;
use escache_types::{
    bdev_min_data_offset, first_usable_bucket, magic_present, sb_offset, BdevState, CacheMode,
    SbVersion, Superblock, BDEV_DATA_START_DEFAULT, MIN_CACHE_BUCKETS, SB_JOURNAL_BUCKETS,
    SB_SIZE, SB_START, SECTOR_SIZE,
};

use crate::error::{FormatError, Result};
use crate::probe::SignatureProbe;
use crate::{CopyIdentity, DeviceRole, FormatOptions, FormatReport, ResetReport, RoleDetail};

fn open_exclusive(device: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_EXCL)
        .open(device)
        .map_err(|e| FormatError::Open {
            device: device.display().to_string(),
            source: e,
        })
}

/// Format one device as a cache or backing member.
///
/// Validates every precondition, then writes: zeroed header region,
/// optional identity marker, primary record, secondary copies (backing)
/// or zeroed journal buckets (cache), and flushes.
pub fn format_device(
    device: &Path,
    role: DeviceRole,
    opts: &FormatOptions,
    probe: &dyn SignatureProbe,
) -> Result<FormatReport> {
    let file = open_exclusive(device)?;

    let mut existing = [0u8; SB_SIZE];
    file.read_exact_at(&mut existing, SB_START)?;
    if magic_present(&existing) && !opts.wipe {
        return Err(FormatError::AlreadyFormatted {
            device: device.display().to_string(),
        });
    }

    if let Some(signature) = probe.probe(device)? {
        return Err(FormatError::ForeignSignature {
            device: device.display().to_string(),
            signature,
        });
    }

    let version = match role {
        DeviceRole::Cache => SbVersion::Cache,
        DeviceRole::Backing => SbVersion::Backing,
    };
    let mut sb = Superblock::new(
        version,
        opts.device_uuid,
        opts.set_uuid,
        opts.block_size,
        opts.bucket_size,
    );

    let detail = match role {
        DeviceRole::Backing => {
            if opts.dirty {
                sb.set_bdev_state(BdevState::Dirty);
            }
            sb.set_bdev_cache_mode(if opts.writeback {
                CacheMode::Writeback
            } else {
                CacheMode::Writethrough
            });

            if opts.data_offset != BDEV_DATA_START_DEFAULT {
                sb.version = SbVersion::BackingWithOffset;
                sb.data_offset = opts.data_offset;
            }

            let min = bdev_min_data_offset(opts.copies);
            if sb.data_offset < min {
                return Err(FormatError::DataOffsetTooSmall { min });
            }

            RoleDetail::Backing {
                data_offset: opts.data_offset,
            }
        }
        DeviceRole::Cache => {
            let capacity = geometry::device_size_sectors(&file)?;
            sb.nbuckets = capacity / u64::from(opts.bucket_size);
            if sb.nbuckets < MIN_CACHE_BUCKETS {
                return Err(FormatError::TooFewBuckets {
                    found: sb.nbuckets,
                    need: MIN_CACHE_BUCKETS,
                });
            }
            sb.nr_in_set = 1;
            sb.first_bucket = first_usable_bucket(opts.bucket_size);
            sb.set_cache_discard(opts.discard);
            sb.set_cache_replacement(opts.replacement_policy);

            RoleDetail::Cache {
                nbuckets: sb.nbuckets,
                nr_in_set: sb.nr_in_set,
                nr_this_dev: sb.nr_this_dev,
                first_bucket: sb.first_bucket,
            }
        }
    };

    // From here on the device is being modified. Zero first: a crash
    // between the zero and the record write leaves a non-escache device.
    let zeroes = [0u8; SB_START as usize];
    file.write_all_at(&zeroes, 0)?;

    if let Some(marker) = opts.marker {
        file.write_all_at(marker.as_bytes(), 0)?;
    }

    let primary = CopyIdentity {
        index: 0,
        uuid: sb.uuid,
        set_uuid: sb.set_uuid,
    };
    file.write_all_at(&sb.encode(), SB_START)?;
    debug!(
        "wrote primary superblock on {} (version {:?})",
        device.display(),
        sb.version
    );

    let mut secondaries = Vec::new();
    match role {
        DeviceRole::Backing => {
            // Secondary copies share geometry and version but get their
            // own identifier pair each.
            for index in 1..opts.copies {
                sb.uuid = Uuid::new_v4();
                sb.set_uuid = Uuid::new_v4();
                file.write_all_at(&sb.encode(), sb_offset(index))?;
                secondaries.push(CopyIdentity {
                    index,
                    uuid: sb.uuid,
                    set_uuid: sb.set_uuid,
                });
            }
        }
        DeviceRole::Cache => {
            zero_journal_buckets(&file, &sb, &zeroes)?;
        }
    }

    file.sync_all()?;

    Ok(FormatReport {
        device: device.display().to_string(),
        version: sb.version,
        block_size: sb.block_size,
        bucket_size: sb.bucket_size,
        primary,
        detail,
        secondaries,
    })
}

/// Zero the journal-reserved bucket range of a fresh cache device,
/// bucket by bucket in header-sized chunks.
fn zero_journal_buckets(file: &File, sb: &Superblock, zeroes: &[u8]) -> Result<()> {
    let bucket_bytes = u64::from(sb.bucket_size) * SECTOR_SIZE;
    let end = sb
        .nbuckets
        .min(u64::from(sb.first_bucket) + SB_JOURNAL_BUCKETS);

    for bucket in u64::from(sb.first_bucket)..end {
        let mut offset = bucket * bucket_bytes;
        let bucket_end = offset + bucket_bytes;
        while offset < bucket_end {
            let len = (bucket_end - offset).min(SB_START) as usize;
            file.write_all_at(&zeroes[..len], offset)?;
            offset += len as u64;
        }
    }
    Ok(())
}

/// Rewrite the identifier pair of one existing backing-device superblock
/// copy, leaving geometry and every other copy untouched.
pub fn reset_identity(
    device: &Path,
    index: u8,
    set_uuid: Uuid,
    device_uuid: Uuid,
    wipe: bool,
) -> Result<ResetReport> {
    let file = open_exclusive(device)?;

    let mut existing = [0u8; SB_SIZE];
    file.read_exact_at(&mut existing, sb_offset(index))?;

    if !magic_present(&existing) {
        return Err(FormatError::NotFormatted {
            device: device.display().to_string(),
            index,
        });
    }
    if !wipe {
        return Err(FormatError::AlreadyFormatted {
            device: device.display().to_string(),
        });
    }

    let old = Superblock::decode(&existing)?;
    if !old.version.is_backing() {
        return Err(FormatError::NotBackingDevice {
            device: device.display().to_string(),
        });
    }

    // A reset that changes nothing must not look like it succeeded.
    if old.uuid == device_uuid {
        return Err(FormatError::StaleIdentity { what: "bdev-uuid" });
    }
    if old.set_uuid == set_uuid {
        return Err(FormatError::StaleIdentity { what: "cset-uuid" });
    }

    let mut sb = Superblock::new(
        SbVersion::Backing,
        device_uuid,
        set_uuid,
        old.block_size,
        old.bucket_size,
    );
    if old.data_offset != BDEV_DATA_START_DEFAULT {
        sb.version = SbVersion::BackingWithOffset;
        sb.data_offset = old.data_offset;
    }

    file.write_all_at(&sb.encode(), sb_offset(index))?;
    file.sync_all()?;
    debug!(
        "reset superblock copy {} on {}",
        index,
        device.display()
    );

    Ok(ResetReport {
        device: device.display().to_string(),
        index,
        uuid: device_uuid,
        set_uuid,
        version: sb.version,
        block_size: sb.block_size,
        data_offset: old.data_offset,
    })
}
