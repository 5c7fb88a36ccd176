// SPDX-License-Identifier: GPL-3.0-only

//! make-escache: format block devices for use with the escache driver
//!
//! Devices are listed after `-C` (cache role) or `-B` (backing role) and
//! processed strictly in order, cache group first. The first failure
//! stops the run; devices already written stay written.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use uuid::Uuid;

use escache_format::{
    format_device, reset_identity, BlkidProbe, DeviceRole, FormatOptions, FormatReport,
    ResetReport, RoleDetail,
};
use escache_sys::native_block_size;
use escache_types::{
    bdev_min_data_offset, parse_size_sectors, CacheReplacement, RegistrationMarker, SB_COPIES_MAX,
};

#[derive(Parser)]
#[command(name = "make-escache")]
#[command(about = "Format block devices for use with the escache driver", long_about = None)]
struct Cli {
    /// Format the following devices as cache devices
    #[arg(short = 'C', long = "cache", value_name = "DEV", num_args = 1..)]
    cache: Vec<PathBuf>,

    /// Format the following devices as backing devices
    #[arg(short = 'B', long = "bdev", value_name = "DEV", num_args = 1..)]
    bdev: Vec<PathBuf>,

    /// Bucket size (power of two; k/m/g/t suffixes accepted)
    #[arg(short = 'b', long, value_name = "SIZE", default_value = "512k")]
    bucket: String,

    /// Block size (hard sector size of the SSD, often 2k); defaults to
    /// the largest native block size of the given devices
    #[arg(short = 'w', long, value_name = "SIZE")]
    block: Option<String>,

    /// Data offset in sectors
    #[arg(
        short = 'o',
        long = "data-offset",
        alias = "data_offset",
        value_name = "SECTORS"
    )]
    data_offset: Option<u64>,

    /// UUID for the cache set
    #[arg(short = 'u', long = "cset-uuid", value_name = "UUID")]
    cset_uuid: Option<Uuid>,

    /// UUID for the backing device; also marks its superblock dirty so
    /// writeback resumes once a cache set attaches
    #[arg(short = 'v', long = "bdev-uuid", value_name = "UUID")]
    bdev_uuid: Option<Uuid>,

    /// Enable writeback
    #[arg(long)]
    writeback: bool,

    /// Enable discards
    #[arg(long)]
    discard: bool,

    /// Overwrite an existing escache superblock
    #[arg(long = "wipe-bcache")]
    wipe_bcache: bool,

    /// Cache replacement policy (lru|fifo|random)
    #[arg(
        long = "cache-replacement-policy",
        alias = "cache_replacement_policy",
        value_name = "POLICY",
        default_value = "lru"
    )]
    cache_replacement_policy: CacheReplacement,

    /// Superblock copies to write on backing devices
    #[arg(
        short = 's',
        long = "sb-num",
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u8).range(0..=SB_COPIES_MAX as i64)
    )]
    sb_num: u8,

    /// Reset the identity UUIDs of the existing backing superblock copy
    /// at this index instead of formatting
    #[arg(
        short = 'r',
        long = "reset-cset-uuid",
        value_name = "IDX",
        value_parser = clap::value_parser!(u8).range(0..SB_COPIES_MAX as i64)
    )]
    reset_index: Option<u8>,

    /// Format an alcubierre device
    #[arg(short = 'A', long)]
    alcubierre: bool,

    /// Format a skip-udev-register device
    #[arg(short = 'S', long = "skip-udev-register")]
    skip_udev_register: bool,
}

fn main() -> Result<()> {
    // Logs to stderr; stdout carries the UUID/geometry report.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    if cli.cache.is_empty() && cli.bdev.is_empty() {
        bail!("please supply a device with -C or -B");
    }

    let bucket_size = parse_size_sectors(&cli.bucket, "bucket size")?;
    let block_size = match &cli.block {
        Some(size) => parse_size_sectors(size, "block size")?,
        None => {
            let mut size = 0u16;
            for dev in cli.cache.iter().chain(cli.bdev.iter()) {
                let native = native_block_size(dev)
                    .with_context(|| format!("probing block size of {}", dev.display()))?;
                size = size.max(native);
            }
            size
        }
    };

    if bucket_size < block_size {
        bail!("bucket size cannot be smaller than block size");
    }

    let min_offset = bdev_min_data_offset(cli.sb_num);
    let data_offset = match cli.data_offset {
        None => min_offset,
        Some(offset) if offset < min_offset => bail!(
            "bad data offset; minimum {min_offset} sectors for {} superblock copies",
            cli.sb_num
        ),
        Some(offset) => offset,
    };

    // -A wins when both markers are requested.
    if cli.alcubierre && cli.skip_udev_register {
        tracing::warn!("both -A and -S given; writing the alcubierre marker");
    }
    let marker = if cli.alcubierre {
        Some(RegistrationMarker::Alcubierre)
    } else if cli.skip_udev_register {
        Some(RegistrationMarker::SkipUdev)
    } else {
        None
    };

    let set_uuid = cli.cset_uuid.unwrap_or_else(Uuid::new_v4);
    let device_uuid = cli.bdev_uuid.unwrap_or_else(Uuid::new_v4);
    let dirty = cli.bdev_uuid.is_some();

    if let Some(index) = cli.reset_index {
        if cli.bdev.len() != 1 {
            bail!("only one backing device can be reset at a time");
        }
        let report =
            reset_identity(&cli.bdev[0], index, set_uuid, device_uuid, cli.wipe_bcache)?;
        print_reset(&report);
        return Ok(());
    }

    let opts = FormatOptions {
        block_size,
        bucket_size,
        writeback: cli.writeback,
        discard: cli.discard,
        wipe: cli.wipe_bcache,
        replacement_policy: cli.cache_replacement_policy,
        data_offset,
        set_uuid,
        device_uuid,
        dirty,
        copies: cli.sb_num,
        marker,
    };

    let probe = BlkidProbe;
    for dev in &cli.cache {
        let report = format_device(dev, DeviceRole::Cache, &opts, &probe)
            .with_context(|| format!("formatting cache device {}", dev.display()))?;
        print_format(&report);
    }
    for dev in &cli.bdev {
        let report = format_device(dev, DeviceRole::Backing, &opts, &probe)
            .with_context(|| format!("formatting backing device {}", dev.display()))?;
        print_format(&report);
    }

    Ok(())
}

fn print_format(report: &FormatReport) {
    match &report.detail {
        RoleDetail::Backing { data_offset } => {
            println!(
                "UUID:\t\t\t{}\n\
                 Set UUID:\t\t{}\n\
                 version:\t\t{}\n\
                 block_size:\t\t{}\n\
                 data_offset:\t\t{}",
                report.primary.uuid,
                report.primary.set_uuid,
                report.version.raw(),
                report.block_size,
                data_offset
            );
            for copy in &report.secondaries {
                println!(
                    "secondary UUID:\t\t{}\n\
                     Set UUID:\t\t{}\n\
                     version:\t\t{}\n\
                     block_size:\t\t{}\n\
                     data_offset:\t\t{}",
                    copy.uuid,
                    copy.set_uuid,
                    report.version.raw(),
                    report.block_size,
                    data_offset
                );
            }
        }
        RoleDetail::Cache {
            nbuckets,
            nr_in_set,
            nr_this_dev,
            first_bucket,
        } => {
            println!(
                "UUID:\t\t\t{}\n\
                 Set UUID:\t\t{}\n\
                 version:\t\t{}\n\
                 nbuckets:\t\t{}\n\
                 block_size:\t\t{}\n\
                 bucket_size:\t\t{}\n\
                 nr_in_set:\t\t{}\n\
                 nr_this_dev:\t\t{}\n\
                 first_bucket:\t\t{}",
                report.primary.uuid,
                report.primary.set_uuid,
                report.version.raw(),
                nbuckets,
                report.block_size,
                report.bucket_size,
                nr_in_set,
                nr_this_dev,
                first_bucket
            );
        }
    }
}

fn print_reset(report: &ResetReport) {
    println!(
        "UUID:\t\t\t{}\n\
         Set UUID:\t\t{}\n\
         version:\t\t{}\n\
         block_size:\t\t{}\n\
         data_offset:\t\t{}",
        report.uuid,
        report.set_uuid,
        report.version.raw(),
        report.block_size,
        report.data_offset
    );
}
