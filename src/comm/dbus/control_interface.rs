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

use crate::comm::dbus::find_controller;
use crate::error::ReloadError;
use crate::reload::{Registry, attrs};
use log::info;
use std::sync::Arc;
use zbus::{fdo, interface};

pub struct ControlInterface {
    registry: Arc<Registry>,
}

impl ControlInterface {
    pub fn new(registry: Arc<Registry>) -> Self {
        ControlInterface { registry }
    }
}

#[interface(name = "com.canonical.fpgareload.control")]
impl ControlInterface {
    /// Runs the whole reload on a blocking worker and replies once the card is back, or
    /// once the reload failed and the bus was re-enumerated.
    async fn image_reload(&self, controller_name: &str, image: &str) -> Result<String, fdo::Error> {
        info!("image_reload called with controller_name: {controller_name} and image: {image}");
        let controller = find_controller(&self.registry, controller_name)?;
        let buf = image.to_string();
        tokio::task::spawn_blocking(move || attrs::image_reload_store(&controller, &buf))
            .await
            .map_err(|e| ReloadError::Internal(format!("Reload worker did not finish: {e}")))??;
        Ok(format!("{controller_name} reloaded with image {image}"))
    }

    async fn cancel_reload(&self, controller_name: &str) -> Result<String, fdo::Error> {
        info!("cancel_reload called with controller_name: {controller_name}");
        let controller = find_controller(&self.registry, controller_name)?;
        if controller.cancel()? {
            Ok(format!("Cancelling reload of {controller_name}"))
        } else {
            Ok(format!("No reload of {controller_name} in progress"))
        }
    }

    async fn set_wait_secs(&self, controller_name: &str, secs: u32) -> Result<String, fdo::Error> {
        info!("set_wait_secs called with controller_name: {controller_name} and secs: {secs}");
        let controller = find_controller(&self.registry, controller_name)?;
        attrs::wait_secs_store(&controller, &secs.to_string())?;
        Ok(format!("Wait time of {controller_name} set to {secs}s"))
    }
}
