// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for the escache tools
//!
//! This crate provides the direct system interfaces the format and check
//! tools need:
//! - device capacity and logical-block-size queries (ioctl with sysfs
//!   and stat fallbacks)
//! - parent-disk resolution against the `/sys/block` tree
//! - raw identity-marker reads
//!
//! No policy lives here; callers decide what a missing parent or an
//! absent marker means.

pub mod error;
pub mod geometry;
pub mod marker;
pub mod topology;

pub use error::{Result, SysError};
pub use geometry::{device_size_sectors, native_block_size};
pub use marker::read_marker;
pub use topology::{
    registration_path, registration_path_at, resolve_parent, resolve_parent_at, DRIVER_DIR,
    SYS_BLOCK,
};
