// SPDX-License-Identifier: GPL-3.0-only

//! End-to-end exercises of the format and reset write paths against
//! scratch regular files. Regular files take the same code path as
//! device nodes apart from the capacity/blocksize ioctls, which fall
//! back to stat.

use std::path::Path;

use uuid::Uuid;

use escache_format::{
    format_device, reset_identity, DeviceRole, FormatError, FormatOptions, RoleDetail,
    SignatureProbe,
};
use escache_types::{
    sb_offset, verify_csum, SbVersion, Superblock, RegistrationMarker, MARKER_LEN, SB_SIZE,
    SB_START,
};

struct CleanProbe;

impl SignatureProbe for CleanProbe {
    fn probe(&self, _device: &Path) -> escache_format::Result<Option<String>> {
        Ok(None)
    }
}

struct ForeignProbe;

impl SignatureProbe for ForeignProbe {
    fn probe(&self, _device: &Path) -> escache_format::Result<Option<String>> {
        Ok(Some("ext4".to_string()))
    }
}

fn scratch_device(len: u64) -> tempfile::NamedTempFile {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.as_file().set_len(len).unwrap();
    tmp
}

fn read_record(path: &Path, index: u8) -> Vec<u8> {
    let all = std::fs::read(path).unwrap();
    let start = sb_offset(index) as usize;
    all[start..start + SB_SIZE].to_vec()
}

fn cache_opts() -> FormatOptions {
    FormatOptions {
        block_size: 8,
        bucket_size: 128,
        ..FormatOptions::default()
    }
}

fn backing_opts(copies: u8, data_offset: u64) -> FormatOptions {
    FormatOptions {
        block_size: 8,
        bucket_size: 1024,
        copies,
        data_offset,
        ..FormatOptions::default()
    }
}

#[test]
fn cache_format_round_trips() {
    let dev = scratch_device(16 * 1024 * 1024);
    let opts = cache_opts();

    let report = format_device(dev.path(), DeviceRole::Cache, &opts, &CleanProbe).unwrap();

    let raw = read_record(dev.path(), 0);
    assert!(verify_csum(&raw));

    let sb = Superblock::decode(&raw).unwrap();
    assert_eq!(sb.version, SbVersion::Cache);
    assert_eq!(sb.block_size, 8);
    assert_eq!(sb.bucket_size, 128);
    assert_eq!(sb.uuid, opts.device_uuid);
    assert_eq!(sb.set_uuid, opts.set_uuid);
    // 16 MiB of 64 KiB buckets.
    assert_eq!(sb.nbuckets, 256);
    assert_eq!(sb.nr_in_set, 1);
    assert_eq!(sb.nr_this_dev, 0);
    assert_eq!(sb.first_bucket, 1);

    assert_eq!(report.primary.uuid, opts.device_uuid);
    match report.detail {
        RoleDetail::Cache { nbuckets, .. } => assert_eq!(nbuckets, 256),
        RoleDetail::Backing { .. } => panic!("cache format reported backing detail"),
    }
    assert!(report.secondaries.is_empty());

    // No marker requested: the head of the device stays zeroed.
    let head = &std::fs::read(dev.path()).unwrap()[..MARKER_LEN];
    assert_eq!(head, &[0u8; MARKER_LEN]);
}

#[test]
fn cache_format_zeroes_the_journal_range() {
    let dev = scratch_device(16 * 1024 * 1024);
    // Dirty the area past the superblock first.
    std::fs::write(dev.path(), vec![0xaa; 16 * 1024 * 1024]).unwrap();
    dev.as_file().set_len(16 * 1024 * 1024).unwrap();

    format_device(dev.path(), DeviceRole::Cache, &cache_opts(), &CleanProbe).unwrap();

    let all = std::fs::read(dev.path()).unwrap();
    // Buckets 1.. are journal-reserved on this geometry (first_bucket = 1,
    // 256 total buckets) and must read back as zeroes.
    let bucket_bytes = 128 * 512;
    assert!(all[bucket_bytes..].iter().all(|b| *b == 0));
}

#[test]
fn backing_format_writes_every_copy() {
    let dev = scratch_device(1024 * 1024);
    let opts = backing_opts(3, 40);

    let report = format_device(dev.path(), DeviceRole::Backing, &opts, &CleanProbe).unwrap();
    assert_eq!(report.secondaries.len(), 2);

    let mut seen = Vec::new();
    for index in 0..3u8 {
        let raw = read_record(dev.path(), index);
        assert!(verify_csum(&raw), "copy {index} checksum");

        let sb = Superblock::decode(&raw).unwrap();
        assert_eq!(sb.version, SbVersion::BackingWithOffset);
        assert_eq!(sb.block_size, 8);
        assert_eq!(sb.bucket_size, 1024);
        assert_eq!(sb.data_offset, 40);
        seen.push((sb.uuid, sb.set_uuid));
    }

    // Copy 0 carries the requested identity, the rest are fresh pairs.
    assert_eq!(seen[0], (opts.device_uuid, opts.set_uuid));
    assert_ne!(seen[0].0, seen[1].0);
    assert_ne!(seen[1].0, seen[2].0);
    assert_ne!(seen[0].1, seen[1].1);

    // The report names the same identities the disk carries.
    for copy in &report.secondaries {
        assert_eq!(
            (copy.uuid, copy.set_uuid),
            seen[copy.index as usize],
            "reported identity of copy {}",
            copy.index
        );
    }
}

#[test]
fn markers_are_written_exactly_once_at_offset_zero() {
    for (marker, bytes) in [
        (RegistrationMarker::Alcubierre, b"alcubierre".as_slice()),
        (RegistrationMarker::SkipUdev, b"##skipudev".as_slice()),
    ] {
        let dev = scratch_device(16 * 1024 * 1024);
        let opts = FormatOptions {
            marker: Some(marker),
            ..cache_opts()
        };
        format_device(dev.path(), DeviceRole::Cache, &opts, &CleanProbe).unwrap();

        let all = std::fs::read(dev.path()).unwrap();
        assert_eq!(&all[..MARKER_LEN], bytes);
        // Between the marker and the record the header region is zero.
        assert!(all[MARKER_LEN..SB_START as usize].iter().all(|b| *b == 0));
    }
}

#[test]
fn dirty_writeback_flags_land_in_the_record() {
    let dev = scratch_device(1024 * 1024);
    let opts = FormatOptions {
        writeback: true,
        dirty: true,
        ..backing_opts(1, 24)
    };
    format_device(dev.path(), DeviceRole::Backing, &opts, &CleanProbe).unwrap();

    let sb = Superblock::decode(&read_record(dev.path(), 0)).unwrap();
    assert_eq!(sb.bdev_cache_mode(), escache_types::CacheMode::Writeback);
    assert_eq!(sb.bdev_state(), escache_types::BdevState::Dirty);
}

#[test]
fn foreign_signature_refuses_even_with_wipe() {
    let dev = scratch_device(16 * 1024 * 1024);
    let opts = FormatOptions {
        wipe: true,
        ..cache_opts()
    };

    let err = format_device(dev.path(), DeviceRole::Cache, &opts, &ForeignProbe).unwrap_err();
    assert!(matches!(err, FormatError::ForeignSignature { .. }));

    // Nothing was written.
    let all = std::fs::read(dev.path()).unwrap();
    assert!(all.iter().all(|b| *b == 0));
}

#[test]
fn small_data_offset_is_rejected_before_any_write() {
    let dev = scratch_device(1024 * 1024);
    let err = format_device(
        dev.path(),
        DeviceRole::Backing,
        &backing_opts(3, 24),
        &CleanProbe,
    )
    .unwrap_err();
    assert!(matches!(err, FormatError::DataOffsetTooSmall { min: 40 }));

    let all = std::fs::read(dev.path()).unwrap();
    assert!(all.iter().all(|b| *b == 0));
}

#[test]
fn undersized_cache_devices_are_rejected() {
    // 1 MiB of 512 KiB buckets is two buckets, far under the minimum.
    let dev = scratch_device(1024 * 1024);
    let opts = FormatOptions {
        block_size: 8,
        bucket_size: 1024,
        ..FormatOptions::default()
    };
    let err = format_device(dev.path(), DeviceRole::Cache, &opts, &CleanProbe).unwrap_err();
    assert!(matches!(err, FormatError::TooFewBuckets { found: 2, .. }));
}

#[test]
fn existing_record_needs_the_wipe_flag() {
    let dev = scratch_device(16 * 1024 * 1024);
    format_device(dev.path(), DeviceRole::Cache, &cache_opts(), &CleanProbe).unwrap();

    let err =
        format_device(dev.path(), DeviceRole::Cache, &cache_opts(), &CleanProbe).unwrap_err();
    assert!(matches!(err, FormatError::AlreadyFormatted { .. }));

    let opts = FormatOptions {
        wipe: true,
        ..cache_opts()
    };
    format_device(dev.path(), DeviceRole::Cache, &opts, &CleanProbe).unwrap();
}

#[test]
fn reset_touches_only_the_target_copy() {
    let dev = scratch_device(1024 * 1024);
    let opts = backing_opts(3, 40);
    format_device(dev.path(), DeviceRole::Backing, &opts, &CleanProbe).unwrap();

    let before: Vec<Vec<u8>> = (0..3).map(|i| read_record(dev.path(), i)).collect();

    let new_set = Uuid::new_v4();
    let new_dev = Uuid::new_v4();
    let report = reset_identity(dev.path(), 1, new_set, new_dev, true).unwrap();
    assert_eq!(report.index, 1);
    assert_eq!(report.block_size, 8);
    assert_eq!(report.data_offset, 40);

    let after: Vec<Vec<u8>> = (0..3).map(|i| read_record(dev.path(), i)).collect();
    assert_eq!(before[0], after[0]);
    assert_eq!(before[2], after[2]);
    assert_ne!(before[1], after[1]);

    let sb = Superblock::decode(&after[1]).unwrap();
    assert!(verify_csum(&after[1]));
    assert_eq!(sb.uuid, new_dev);
    assert_eq!(sb.set_uuid, new_set);
    assert_eq!(sb.version, SbVersion::BackingWithOffset);
    assert_eq!(sb.block_size, 8);
    assert_eq!(sb.bucket_size, 1024);
    assert_eq!(sb.data_offset, 40);
}

#[test]
fn reset_rejects_unchanged_identifiers() {
    let dev = scratch_device(1024 * 1024);
    let opts = backing_opts(1, 24);
    format_device(dev.path(), DeviceRole::Backing, &opts, &CleanProbe).unwrap();

    let err =
        reset_identity(dev.path(), 0, Uuid::new_v4(), opts.device_uuid, true).unwrap_err();
    assert!(matches!(
        err,
        FormatError::StaleIdentity { what: "bdev-uuid" }
    ));

    let err = reset_identity(dev.path(), 0, opts.set_uuid, Uuid::new_v4(), true).unwrap_err();
    assert!(matches!(
        err,
        FormatError::StaleIdentity { what: "cset-uuid" }
    ));
}

#[test]
fn reset_requires_an_existing_record_and_the_wipe_flag() {
    let blank = scratch_device(1024 * 1024);
    let err = reset_identity(blank.path(), 0, Uuid::new_v4(), Uuid::new_v4(), true).unwrap_err();
    assert!(matches!(err, FormatError::NotFormatted { index: 0, .. }));

    let dev = scratch_device(1024 * 1024);
    format_device(dev.path(), DeviceRole::Backing, &backing_opts(1, 24), &CleanProbe).unwrap();
    let err = reset_identity(dev.path(), 0, Uuid::new_v4(), Uuid::new_v4(), false).unwrap_err();
    assert!(matches!(err, FormatError::AlreadyFormatted { .. }));
}

#[test]
fn reset_refuses_cache_devices() {
    let dev = scratch_device(16 * 1024 * 1024);
    format_device(dev.path(), DeviceRole::Cache, &cache_opts(), &CleanProbe).unwrap();

    let err = reset_identity(dev.path(), 0, Uuid::new_v4(), Uuid::new_v4(), true).unwrap_err();
    assert!(matches!(err, FormatError::NotBackingDevice { .. }));
}

#[test]
fn format_report_serializes_with_stable_field_names() {
    let dev = scratch_device(1024 * 1024);
    let report = format_device(
        dev.path(),
        DeviceRole::Backing,
        &backing_opts(2, 40),
        &CleanProbe,
    )
    .unwrap();

    let json = serde_json::to_value(&report).unwrap();
    assert!(json.get("device").is_some());
    assert_eq!(json["version"], "backing_with_offset");
    assert!(json["primary"].get("uuid").is_some());
    assert!(json["primary"].get("set_uuid").is_some());
    assert_eq!(json["detail"]["backing"]["data_offset"], 40);
    assert_eq!(json["secondaries"].as_array().unwrap().len(), 1);
}

#[test]
fn blkid_probe_reports_a_zeroed_file_as_clean() {
    if which::which("blkid").is_err() {
        return;
    }
    let dev = scratch_device(1024 * 1024);
    let probe = escache_format::BlkidProbe;
    assert_eq!(probe.probe(dev.path()).unwrap(), None);
}
