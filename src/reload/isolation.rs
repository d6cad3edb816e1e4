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

use crate::error::ReloadError;
use crate::pci::{PciAddress, PciTopology};
use log::info;

/// Stop and remove every other function on the target's bus, highest address first, so
/// no other PF or VF driver touches the card while it reloads. Returns how many were removed.
pub fn isolate_siblings(
    topology: &dyn PciTopology,
    target: &PciAddress,
) -> Result<usize, ReloadError> {
    let _guard = topology.rescan_remove_lock().lock()?;
    let mut removed = 0;
    for dev in topology.bus_devices(target)?.iter().rev() {
        if dev == target {
            continue;
        }
        info!("Removing {dev}, sibling of {target}");
        topology.stop_and_remove(dev)?;
        removed += 1;
    }
    Ok(removed)
}
