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

//! Concrete reload and trigger callbacks for cards driven through sysfs.
//!
//! The daemon has no kernel driver to call into. Instead each configured card gets an
//! [`UnbindPrepare`] that releases the drivers of its sub-devices, and a [`SysfsBmcTrigger`]
//! that talks to the BMC secure-update control directory.

pub mod bmc;
pub mod card;

pub use bmc::SysfsBmcTrigger;
pub use card::UnbindPrepare;

use crate::config::config_files::CardConfig;
use crate::error::{DriverError, ReloadError};
use crate::pci::PciAddress;
use crate::reload::{Controller, Registry, Trigger};
use log::info;
use std::path::Path;
use std::sync::Arc;

impl From<ReloadError> for DriverError {
    fn from(err: ReloadError) -> Self {
        DriverError::new(err.errno(), err.to_string())
    }
}

/// Register the controller and BMC trigger of one configured card.
pub fn attach_card(
    registry: &Registry,
    card: &CardConfig,
    devices_dir: &Path,
) -> Result<(Arc<Controller>, Trigger), ReloadError> {
    let target: PciAddress = card.target.parse()?;
    let bmc = SysfsBmcTrigger::new(&card.bmc_control);
    let anchor = bmc.anchor()?;
    let prepare = UnbindPrepare::new(devices_dir, card.unbind.clone());
    let controller = registry.register_controller(&target, Arc::new(prepare), &card.name)?;
    let trigger = match registry.register_trigger(Arc::new(bmc), &anchor) {
        Ok(trigger) => trigger,
        Err(e) => {
            registry.unregister_controller(&controller)?;
            return Err(e);
        }
    };
    info!(
        "{}: {} ready on {}",
        card.name,
        card.target,
        controller.bridge()
    );
    Ok((controller, trigger))
}
