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
use log::trace;
use std::fmt::Write;
use std::sync::Arc;
use zbus::{fdo, interface};

pub struct StatusInterface {
    registry: Arc<Registry>,
}

impl StatusInterface {
    pub fn new(registry: Arc<Registry>) -> Self {
        StatusInterface { registry }
    }
}

#[interface(name = "com.canonical.fpgareload.status")]
impl StatusInterface {
    /// One line per registered controller: name, target, root port, link control and state.
    async fn get_controllers(&self) -> Result<String, fdo::Error> {
        trace!("get_controllers called");
        let mut out = String::new();
        for controller in self.registry.controllers()? {
            if !controller.is_registered()? {
                continue;
            }
            let link = match controller.slot_name() {
                Some(slot) => format!("{} (slot {slot})", controller.link_kind()),
                None => controller.link_kind().to_string(),
            };
            let _ = writeln!(
                out,
                "{} {} {} {} {}",
                controller.name()?,
                controller.target()?,
                controller.bridge(),
                link,
                controller.state()?
            );
        }
        Ok(out)
    }

    async fn get_state(&self, controller_name: &str) -> Result<String, fdo::Error> {
        trace!("get_state called with controller_name: {controller_name}");
        let controller = find_controller(&self.registry, controller_name)?;
        Ok(attrs::state_show(&controller)?)
    }

    /// Waits for a reload in flight to finish before asking the BMC.
    async fn get_available_images(&self, controller_name: &str) -> Result<String, fdo::Error> {
        trace!("get_available_images called with controller_name: {controller_name}");
        let controller = find_controller(&self.registry, controller_name)?;
        let images = tokio::task::spawn_blocking(move || attrs::available_images_show(&controller))
            .await
            .map_err(|e| ReloadError::Internal(format!("Image listing did not finish: {e}")))??;
        Ok(images)
    }

    async fn get_wait_secs(&self, controller_name: &str) -> Result<String, fdo::Error> {
        trace!("get_wait_secs called with controller_name: {controller_name}");
        let controller = find_controller(&self.registry, controller_name)?;
        Ok(attrs::wait_secs_show(&controller)?)
    }
}
