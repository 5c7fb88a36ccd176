// SPDX-License-Identifier: GPL-3.0-only

use thiserror::Error;

/// Error types for record codec and size validation failures
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("{what} must be a power of two")]
    NotPowerOfTwo { what: &'static str },

    #[error("{what} too large")]
    SizeTooLarge { what: &'static str },

    #[error("{what} too small")]
    SizeTooSmall { what: &'static str },

    #[error("invalid {what}: {value:?}")]
    BadSize { what: &'static str, value: String },

    #[error("superblock record truncated: {len} bytes")]
    Truncated { len: usize },

    #[error("bad superblock magic")]
    BadMagic,

    #[error("unknown superblock version {0}")]
    UnknownVersion(u64),

    #[error("unknown cache replacement policy {0:?}")]
    UnknownPolicy(String),
}

/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, CodecError>;
