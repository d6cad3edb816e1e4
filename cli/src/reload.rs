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

use crate::proxies::control_proxy::ControlProxy;
use crate::status::get_first_controller;
use zbus::Connection;

async fn controller_or_first(
    connection: &Connection,
    controller: &Option<String>,
) -> Result<String, zbus::Error> {
    match controller {
        Some(name) => Ok(name.clone()),
        None => get_first_controller(connection).await,
    }
}

/// Blocks until the daemon finished the reload, which includes the settle wait.
pub async fn reload_handler(
    connection: &Connection,
    controller: &Option<String>,
    image: &str,
) -> Result<String, zbus::Error> {
    let name = controller_or_first(connection, controller).await?;
    let proxy = ControlProxy::new(connection).await?;
    proxy.image_reload(&name, image).await
}

pub async fn cancel_handler(
    connection: &Connection,
    controller: &Option<String>,
) -> Result<String, zbus::Error> {
    let name = controller_or_first(connection, controller).await?;
    let proxy = ControlProxy::new(connection).await?;
    proxy.cancel_reload(&name).await
}

/// Sets the wait tunable, or shows it when `secs` is not given.
pub async fn wait_handler(
    connection: &Connection,
    controller: &Option<String>,
    secs: Option<u32>,
) -> Result<String, zbus::Error> {
    let name = controller_or_first(connection, controller).await?;
    match secs {
        Some(secs) => {
            let proxy = ControlProxy::new(connection).await?;
            proxy.set_wait_secs(&name, secs).await
        }
        None => {
            let proxy = crate::proxies::status_proxy::StatusProxy::new(connection).await?;
            let wait = proxy.get_wait_secs(&name).await?;
            Ok(format!("{name}: wait {}s", wait.trim_end()))
        }
    }
}
