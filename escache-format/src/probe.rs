// SPDX-License-Identifier: GPL-3.0-only

//! Foreign-signature refusal
//!
//! Formatting over someone else's filesystem or partition table destroys
//! data no flag should be able to destroy, so the format path asks an
//! external probe before writing anything. The probe is a trait seam:
//! production shells out to `blkid -p`, tests substitute a stub.

use std::path::Path;
use std::process::Command;

use tracing::debug;

use crate::error::{FormatError, Result};

/// Signature type this tool's own records probe as. An existing escache
/// superblock is governed by the magic/wipe rule, not by the
/// foreign-signature refusal.
const OWN_TYPE: &str = "bcache";

/// Detects filesystem and partition-table signatures on a device.
pub trait SignatureProbe {
    /// `Some(name)` when a foreign signature is present, `None` when the
    /// device is clean or carries only this tool's own records.
    fn probe(&self, device: &Path) -> Result<Option<String>>;
}

/// Production probe shelling out to `blkid -p -o export`.
pub struct BlkidProbe;

impl SignatureProbe for BlkidProbe {
    fn probe(&self, device: &Path) -> Result<Option<String>> {
        let blkid = which::which("blkid").map_err(|_| FormatError::ProbeUnavailable)?;

        let output = Command::new(blkid)
            .args(["-p", "-o", "export"])
            .arg(device)
            .output()?;

        match output.status.code() {
            // Low-level probing found no signature at all.
            Some(2) => Ok(None),
            Some(0) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let found = classify_export(&stdout);
                debug!("blkid probe on {}: {:?}", device.display(), found);
                Ok(found)
            }
            _ => Err(FormatError::ProbeFailed {
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
        }
    }
}

/// Pick the signature name out of `blkid -o export` output. A superblock
/// type wins over a partition table; our own type is not foreign.
fn classify_export(export: &str) -> Option<String> {
    let mut fs_type = None;
    let mut pt_type = None;

    for line in export.lines() {
        if let Some((key, value)) = line.split_once('=') {
            match key {
                "TYPE" => fs_type = Some(value.to_string()),
                "PTTYPE" => pt_type = Some(value.to_string()),
                _ => {}
            }
        }
    }

    match fs_type {
        Some(t) if t == OWN_TYPE => None,
        Some(t) => Some(t),
        None => pt_type.map(|t| format!("{t} partition table")),
    }
}
