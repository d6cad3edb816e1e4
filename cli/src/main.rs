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

//! Command-line client for the fpgareload daemon.
//!
//! ```bash
//! fpgareload_cli status
//! fpgareload_cli --controller n3000 images
//! fpgareload_cli --controller n3000 reload fpga_user1
//! fpgareload_cli wait 20
//! ```

mod proxies;
mod reload;
mod status;

use clap::{Parser, Subcommand};
use log::{debug, error};
use proxies::connect;
use reload::{cancel_handler, reload_handler, wait_handler};
use status::{images_handler, status_handler};

#[derive(Parser, Debug)]
#[command(name = "fpgareload_cli")]
#[command(bin_name = "fpgareload_cli")]
struct Cli {
    #[arg(
        long = "controller",
        help = r#"reload controller to operate on, as named in the daemon configuration.
Defaults to the first controller the daemon reports."#
    )]
    controller: Option<String>,
    /// Talk to a daemon running on the session bus
    #[arg(long, default_value_t = false)]
    session: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show every controller, or the state of the selected one
    Status,
    /// List the images the BMC can load
    Images,
    /// Reload the FPGA with an image and wait until the card is back
    Reload { image: String },
    /// Cancel the reload in progress
    Cancel,
    /// Show or set the settle time in seconds
    Wait { secs: Option<u32> },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    debug!("parsed cli command with {cli:?}");
    let connection = connect(cli.session).await?;
    let result = match cli.command {
        Commands::Status => status_handler(&connection, &cli.controller).await,
        Commands::Images => images_handler(&connection, &cli.controller).await,
        Commands::Reload { image } => reload_handler(&connection, &cli.controller, &image).await,
        Commands::Cancel => cancel_handler(&connection, &cli.controller).await,
        Commands::Wait { secs } => wait_handler(&connection, &cli.controller, secs).await,
    };
    match result {
        Ok(msg) => {
            println!("{msg}");
            Ok(())
        }
        Err(e) => {
            error!("{e}");
            Err(e.into())
        }
    }
}
