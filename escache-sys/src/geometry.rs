// SPDX-License-Identifier: GPL-3.0-only

//! Device geometry queries
//!
//! Capacity and logical block size come from device-level ioctls; regular
//! files (loopback images, test scratch files) fall back to what stat
//! reports. All results are in 512-byte sectors, the unit every
//! superblock field uses.

use std::fs::{self, File};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use tracing::warn;

use crate::error::{Result, SysError};
use escache_types::SECTOR_SIZE;

// linux/fs.h: BLKSSZGET = _IO(0x12, 104)
const BLKSSZGET: libc::c_ulong = 0x1268;
// linux/fs.h: BLKGETSIZE64 = _IOR(0x12, 114, size_t)
const BLKGETSIZE64: libc::c_ulong = 0x8008_1272;

/// Total capacity of an open device or file, in sectors.
pub fn device_size_sectors(file: &File) -> Result<u64> {
    let meta = file.metadata()?;

    if meta.file_type().is_block_device() {
        let mut bytes: u64 = 0;
        let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKGETSIZE64, &mut bytes) };
        if ret < 0 {
            return Err(SysError::Ioctl {
                what: "BLKGETSIZE64",
                source: io::Error::last_os_error(),
            });
        }
        Ok(bytes / SECTOR_SIZE)
    } else {
        Ok(meta.len() / SECTOR_SIZE)
    }
}

fn ioctl_logical_block_size(file: &File) -> io::Result<u64> {
    let mut size: libc::c_int = 0;
    let ret = unsafe { libc::ioctl(file.as_raw_fd(), BLKSSZGET, &mut size) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(u64::try_from(size).unwrap_or(0))
}

fn sysfs_logical_block_size(devnode: &Path) -> io::Result<u64> {
    let dev_name = devnode
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "missing dev basename"))?;

    let path = Path::new("/sys/class/block")
        .join(dev_name)
        .join("queue/logical_block_size");

    let raw = fs::read_to_string(path)?;
    let value = raw
        .trim()
        .parse::<u64>()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(value)
}

/// Native block size of a device node, in sectors.
///
/// Block devices report their logical block size (not physical or
/// optimal I/O — the cache must stay transparent to the layer below);
/// ordinary files report the filesystem's preferred I/O size. Used only
/// to pick a default when the caller supplies no block size.
pub fn native_block_size(path: &Path) -> Result<u16> {
    let meta = fs::metadata(path)?;

    let bytes = if meta.file_type().is_block_device() {
        let file = File::open(path)?;
        match ioctl_logical_block_size(&file) {
            Ok(v) if v > 0 => v,
            Ok(v) => {
                warn!(
                    "suspicious logical block size from ioctl: {v}; device={}",
                    path.display()
                );
                sysfs_logical_block_size(path).map_err(|_| SysError::BlockSizeUnavailable {
                    device: path.display().to_string(),
                })?
            }
            Err(ioctl_err) => match sysfs_logical_block_size(path) {
                Ok(v) if v > 0 => v,
                _ => {
                    warn!(
                        "failed to determine logical block size; ioctl={ioctl_err}; device={}",
                        path.display()
                    );
                    return Err(SysError::BlockSizeUnavailable {
                        device: path.display().to_string(),
                    });
                }
            },
        }
    } else {
        meta.blksize()
    };

    u16::try_from(bytes / SECTOR_SIZE).map_err(|_| SysError::BlockSizeUnavailable {
        device: path.display().to_string(),
    })
}
