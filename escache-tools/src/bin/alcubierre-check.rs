// SPDX-License-Identifier: GPL-3.0-only

//! alcubierre-check: report alcubierre marker and set registration
//!
//! Unlike escache-check this looks for the driver directory directly
//! under the device's own sysfs entry; alcubierre members are whole
//! disks.

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;

use escache_sys::{read_marker, DRIVER_DIR, SYS_BLOCK};
use escache_types::RegistrationMarker;

#[derive(Parser)]
#[command(name = "alcubierre-check")]
#[command(about = "Report alcubierre marker and registration status of a device", long_about = None)]
struct Cli {
    /// Device node, e.g. /dev/sdb
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
        "ALCUBIERRE_DEV={}",
        if marker == Some(RegistrationMarker::Alcubierre) {
            "yes"
        } else {
            "no"
        }
    );

    let Some(name) = cli.node.strip_prefix("/dev/") else {
        bail!("can not parse /dev/<name> from {}", cli.node);
    };

    let set_path = Path::new(SYS_BLOCK).join(name).join(DRIVER_DIR).join("set");
    println!(
        "ALCUBIERRE_REGISTERED={}",
        if set_path.exists() { "yes" } else { "no" }
    );

    Ok(())
}
