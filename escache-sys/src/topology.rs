// SPDX-License-Identifier: GPL-3.0-only

//! Parent-disk resolution against the block-device sysfs tree
//!
//! Partition naming is not uniform: `sda1` suffixes the digits directly,
//! `nvme0n1p1` inserts a `p` separator, and a disk may itself end in `p`
//! (`sdp`), making `sdp1` ambiguous between the two conventions. The only
//! reliable tiebreaker without a device-type lookup is sysfs itself: a
//! partition appears as a directory under its parent disk, so each
//! candidate parent is tested for `<root>/<parent>/<device>/` existence —
//! digit-stripped candidate first, then the `p`-stripped one.

use std::path::{Path, PathBuf};

/// Root of the kernel's per-disk sysfs tree.
pub const SYS_BLOCK: &str = "/sys/block";

/// Directory the cache driver creates under a registered device.
pub const DRIVER_DIR: &str = "escache";

/// Resolve the parent disk of `device` against `/sys/block`.
///
/// `None` means "treat as a whole disk", never an error: too-short names,
/// names without a trailing digit run, and names matching no sysfs path
/// all land there.
pub fn resolve_parent(device: &str) -> Option<String> {
    resolve_parent_at(Path::new(SYS_BLOCK), device)
}

/// [`resolve_parent`] against an explicit sysfs root.
pub fn resolve_parent_at(root: &Path, device: &str) -> Option<String> {
    if device.len() < 2 {
        return None;
    }

    let bytes = device.as_bytes();
    let mut sep = 0usize; // index of a `p` separator, 0 = none
    let mut digits = 0usize; // index of the first trailing digit, 0 = no run
    for i in (0..bytes.len()).rev() {
        if bytes[i].is_ascii_digit() {
            digits = i;
        } else {
            if bytes[i] == b'p' && i != bytes.len() - 1 {
                sep = i;
            }
            break;
        }
    }

    // No trailing digits — a whole-disk name. A digit run reaching index
    // 0 (an all-digit name) is indistinguishable from "no run" here,
    // matching the original tool's behavior.
    if digits == 0 {
        return None;
    }

    // Strip only the digit run first, so a partition of a disk itself
    // named with a trailing `p` (sdp1 on sdp) resolves to the right disk.
    let candidate = &device[..digits];
    if root.join(candidate).join(device).is_dir() {
        return Some(candidate.to_string());
    }

    if sep == 0 {
        return None;
    }

    // Compound names: nvme0n1p1, drbd1p1 and friends.
    let candidate = &device[..sep];
    if root.join(candidate).join(device).is_dir() {
        return Some(candidate.to_string());
    }

    None
}

/// Sysfs path holding the driver's registration marker for `device`:
/// under the parent disk for partitions, directly under the device for
/// whole disks.
pub fn registration_path_at(root: &Path, device: &str) -> PathBuf {
    match resolve_parent_at(root, device) {
        Some(parent) => root.join(parent).join(device).join(DRIVER_DIR),
        None => root.join(device).join(DRIVER_DIR),
    }
}

/// [`registration_path_at`] against `/sys/block`.
pub fn registration_path(device: &str) -> PathBuf {
    registration_path_at(Path::new(SYS_BLOCK), device)
}
