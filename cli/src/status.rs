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

use crate::proxies::status_proxy::StatusProxy;
use zbus::Connection;

/// Name of the first controller the daemon reports, used when `--controller` is not given.
pub async fn get_first_controller(connection: &Connection) -> Result<String, zbus::Error> {
    let proxy = StatusProxy::new(connection).await?;
    let controllers = proxy.get_controllers().await?;
    controllers
        .lines()
        .find_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .ok_or(zbus::Error::Failure(
            "The daemon manages no reload controllers.".to_string(),
        ))
}

/// Turns the daemon's controller lines into an ascii table.
fn controllers_table(controllers: &str) -> String {
    let mut ret_string = String::from(
        "---- CONTROLLERS ----\n\
        | name | target | root port | link control | state |\n",
    );
    for line in controllers.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 5 {
            continue;
        }
        let (name, target, bridge) = (fields[0], fields[1], fields[2]);
        let state = fields[fields.len() - 1];
        let link = fields[3..fields.len() - 1].join(" ");
        ret_string += format!("| {name} | {target} | {bridge} | {link} | {state} |\n").as_str();
    }
    ret_string
}

/// Full table, or one controller's state and wait time.
pub async fn status_handler(
    connection: &Connection,
    controller: &Option<String>,
) -> Result<String, zbus::Error> {
    let proxy = StatusProxy::new(connection).await?;
    match controller {
        None => Ok(controllers_table(&proxy.get_controllers().await?)),
        Some(name) => {
            let state = proxy.get_state(name).await?;
            let wait = proxy.get_wait_secs(name).await?;
            Ok(format!(
                "{name}: {} (wait {}s)",
                state.trim_end(),
                wait.trim_end()
            ))
        }
    }
}

pub async fn images_handler(
    connection: &Connection,
    controller: &Option<String>,
) -> Result<String, zbus::Error> {
    let name = match controller {
        Some(name) => name.clone(),
        None => get_first_controller(connection).await?,
    };
    let proxy = StatusProxy::new(connection).await?;
    Ok(proxy
        .get_available_images(&name)
        .await?
        .trim_end()
        .to_string())
}
