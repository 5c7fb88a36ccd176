// SPDX-License-Identifier: GPL-3.0-only

use std::io;

use thiserror::Error;

use escache_sys::SysError;
use escache_types::CodecError;

/// Error types for the format and reset write paths
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("can't open device {device}: {source}")]
    Open {
        device: String,
        source: io::Error,
    },

    #[error("already an escache device on {device}, overwrite with --wipe-bcache")]
    AlreadyFormatted { device: String },

    #[error("{device} already has a non-escache superblock ({signature}), remove it using wipefs")]
    ForeignSignature { device: String, signature: String },

    #[error("signature probe tool (blkid) not found")]
    ProbeUnavailable,

    #[error("signature probe failed: {detail}")]
    ProbeFailed { detail: String },

    #[error("not enough buckets: {found}, need {need}")]
    TooFewBuckets { found: u64, need: u64 },

    #[error("data offset should be at least {min} sectors")]
    DataOffsetTooSmall { min: u64 },

    #[error("not an escache device on {device} at index {index}")]
    NotFormatted { device: String, index: u8 },

    #[error("device {device} is not a backing device")]
    NotBackingDevice { device: String },

    #[error("please specify a new {what}")]
    StaleIdentity { what: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Sys(#[from] SysError),
}

/// Result type alias for write-path operations
pub type Result<T> = std::result::Result<T, FormatError>;
