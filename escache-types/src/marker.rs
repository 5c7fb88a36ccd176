// SPDX-License-Identifier: GPL-3.0-only

//! Device identity markers
//!
//! A formatted device may carry exactly one 10-byte literal tag at byte
//! offset 0, ahead of the superblock area. The registration-check
//! utilities read these ten bytes back with an exact comparison, so the
//! tag strings are part of the on-disk contract.

use serde::{Deserialize, Serialize};

/// Length of the identity tag at device offset 0.
pub const MARKER_LEN: usize = 10;

/// The two mutually exclusive identity tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationMarker {
    /// Alcubierre member device, `alcubierre` on disk.
    Alcubierre,
    /// Device udev must not auto-register, `##skipudev` on disk.
    SkipUdev,
}

impl RegistrationMarker {
    /// The exact bytes written at device offset 0.
    pub const fn as_bytes(self) -> &'static [u8; MARKER_LEN] {
        match self {
            Self::Alcubierre => b"alcubierre",
            Self::SkipUdev => b"##skipudev",
        }
    }

    /// Classify ten bytes read from device offset 0.
    pub fn from_bytes(buf: &[u8; MARKER_LEN]) -> Option<Self> {
        if buf == Self::Alcubierre.as_bytes() {
            Some(Self::Alcubierre)
        } else if buf == Self::SkipUdev.as_bytes() {
            Some(Self::SkipUdev)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_ten_bytes_and_distinct() {
        assert_eq!(RegistrationMarker::Alcubierre.as_bytes().len(), MARKER_LEN);
        assert_eq!(RegistrationMarker::SkipUdev.as_bytes().len(), MARKER_LEN);
        assert_ne!(
            RegistrationMarker::Alcubierre.as_bytes(),
            RegistrationMarker::SkipUdev.as_bytes()
        );
    }

    #[test]
    fn classifies_exact_tags_only() {
        assert_eq!(
            RegistrationMarker::from_bytes(b"alcubierre"),
            Some(RegistrationMarker::Alcubierre)
        );
        assert_eq!(
            RegistrationMarker::from_bytes(b"##skipudev"),
            Some(RegistrationMarker::SkipUdev)
        );
        assert_eq!(RegistrationMarker::from_bytes(b"alcubierrE"), None);
        assert_eq!(RegistrationMarker::from_bytes(&[0u8; MARKER_LEN]), None);
    }
}
