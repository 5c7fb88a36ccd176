// SPDX-License-Identifier: GPL-3.0-only

use std::io;

use thiserror::Error;

/// Error types for system-level device operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("ioctl {what} failed: {source}")]
    Ioctl {
        what: &'static str,
        source: io::Error,
    },

    #[error("cannot determine logical block size of {device}")]
    BlockSizeUnavailable { device: String },
}

/// Result type alias for system operations
pub type Result<T> = std::result::Result<T, SysError>;
