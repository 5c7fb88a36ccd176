// SPDX-License-Identifier: GPL-3.0-only

//! escache-check: report marker and registration status of one device
//!
//! Prints two independent `KEY=yes|no` lines for shell consumption.
//! Exits non-zero only when the device cannot be opened, read, or named.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;

use escache_sys::{read_marker, registration_path};

#[derive(Parser)]
#[command(name = "escache-check")]
#[command(about = "Report escache marker and registration status of a device", long_about = None)]
struct Cli {
    /// Device node, e.g. /dev/sdb1
    node: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    let marker = read_marker(Path::new(&cli.node))
        .with_context(|| format!("can not read device {}", cli.node))?;
    println!(
        "SKIPREGISTER_DEV={}",
        if marker.is_some() { "yes" } else { "no" }
    );

    let Some(name) = cli.node.strip_prefix("/dev/") else {
        bail!("can not parse /dev/<name> from {}", cli.node);
    };

    let registered = registration_path(name).exists();
    println!("DISK_REGISTERED={}", if registered { "yes" } else { "no" });

    Ok(())
}
