// SPDX-License-Identifier: GPL-3.0-only

//! Raw identity-marker reads
//!
//! The registration-check utilities classify a device by its first ten
//! bytes. A short read is an error (the caller is pointing us at
//! something that is not a device), unrecognized bytes are simply "no
//! marker".

use std::fs::File;
use std::io::Read;
use std::path::Path;

use escache_types::{RegistrationMarker, MARKER_LEN};

use crate::error::Result;

/// Read and classify the identity marker at device offset 0.
pub fn read_marker(device: &Path) -> Result<Option<RegistrationMarker>> {
    let mut file = File::open(device)?;
    let mut buf = [0u8; MARKER_LEN];
    file.read_exact(&mut buf)?;
    Ok(RegistrationMarker::from_bytes(&buf))
}
