// This file is part of fpgareload, an application to orchestrate FPGA image reloads on PCIe accelerator cards.
//
// Copyright 2025 Canonical Ltd.
//
// SPDX-License-Identifier: GPL-3.0-only
//
// fpgareload is free software: you can redistribute it and/or modify it under the terms of the GNU General Public License version 3, as published by the Free Software Foundation.
//
// fpgareload is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the implied warranties of MERCHANTABILITY, SATISFACTORY QUALITY, or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with this program.  If not, see http://www.gnu.org/licenses/.

//! FPGA reload daemon (fpgareload) - System service orchestrating FPGA image reloads.
//!
//! At startup the daemon:
//! 1. Loads the vendor and user configuration files
//! 2. Registers a reload controller and BMC trigger for every configured card
//! 3. Connects to the system DBus and advertises the service
//! 4. Serves requests until interrupted, then tears down every controller
//!
//! # DBus Service
//!
//! - **Service Name**: `com.canonical.fpgareload`
//! - **Status Interface**: `/com/canonical/fpgareload/status` - Read-only operations
//! - **Control Interface**: `/com/canonical/fpgareload/control` - Reloads and tunables
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (`trace`, `debug`, `info`, `warn`, `error`
//!   or `off`). Defaults to `info`

use clap::Parser;
use fpgareload::comm::dbus::{
    control_interface::ControlInterface, status_interface::StatusInterface,
};
use fpgareload::config;
use fpgareload::config::config_files::load_config;
use fpgareload::drivers::attach_card;
use fpgareload::pci::PciTopology;
use fpgareload::pci::sysfs::SysfsPci;
use fpgareload::reload::Registry;
use log::{error, info};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zbus::connection;

#[derive(Parser, Debug)]
#[command(name = "fpgareload", version, about = "FPGA image reload daemon")]
struct Cli {
    /// User configuration file, merged over the vendor one
    #[arg(long, default_value = config::USER_CONFIG_PATH)]
    config: PathBuf,
    /// Serve on the session bus instead of the system bus
    #[arg(long, default_value_t = false)]
    session: bool,
}

/// # Examples
///
/// ```bash
/// # Run with default logging (info level)
/// fpgareload
///
/// # Run with debug logging against a test config on the session bus
/// RUST_LOG=debug fpgareload --session --config ./config.toml
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = load_config(Path::new(config::VENDOR_CONFIG_PATH), &cli.config)?;
    let devices_dir = config.sysfs.devices_dir.clone();
    let topology: Arc<dyn PciTopology> = Arc::new(SysfsPci::new(config.sysfs));
    let registry = Arc::new(Registry::new(topology, config.settings));

    for card in &config.cards {
        if let Err(e) = attach_card(&registry, card, &devices_dir) {
            error!("{}: not managed: {e}", card.name);
        }
    }

    let builder = if cli.session {
        connection::Builder::session()?
    } else {
        connection::Builder::system()?
    };
    let _conn = builder
        .name("com.canonical.fpgareload")?
        .serve_at(
            "/com/canonical/fpgareload/status",
            StatusInterface::new(registry.clone()),
        )?
        .serve_at(
            "/com/canonical/fpgareload/control",
            ControlInterface::new(registry.clone()),
        )?
        .build()
        .await?;

    info!("Started com.canonical.fpgareload dbus service");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    registry.teardown_all();
    Ok(())
}
