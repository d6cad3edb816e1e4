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

use crate::error::{ReloadError, errno};
use crate::pci::{PciAddress, PciTopology};
use crate::reload::link_control::{LinkControl, LinkKind};
use log::{debug, info};
use std::sync::Arc;

/// For ports that cannot disable their link: drop the whole port from the bus and bring
/// everything back with a system-wide rescan.
pub struct BusRemoval {
    topology: Arc<dyn PciTopology>,
    bridge: PciAddress,
}

impl BusRemoval {
    pub fn new(topology: Arc<dyn PciTopology>, bridge: PciAddress) -> Self {
        BusRemoval { topology, bridge }
    }
}

impl LinkControl for BusRemoval {
    fn kind(&self) -> LinkKind {
        LinkKind::BusRemoval
    }

    fn bridge(&self) -> &PciAddress {
        &self.bridge
    }

    fn disable_link(&self) -> Result<(), ReloadError> {
        debug!("{}: no link control, leaving the link up", self.bridge);
        Ok(())
    }

    fn enable_link(&self) -> Result<(), ReloadError> {
        Ok(())
    }

    fn remove_subtree(&self) -> Result<(), ReloadError> {
        let _guard = self.topology.rescan_remove_lock().lock()?;
        info!("Removing {} and everything below it", self.bridge);
        self.topology.stop_and_remove(&self.bridge)
    }

    fn rescan(&self) -> Result<(), ReloadError> {
        let _guard = self.topology.rescan_remove_lock().lock()?;
        self.topology
            .rescan_all()
            .map_err(|e| ReloadError::rescan(self.bridge, e))?;
        if !self.topology.exists(&self.bridge) {
            return Err(ReloadError::RescanFailed {
                bridge: self.bridge.to_string(),
                code: errno::ENODEV,
                reason: "bridge did not come back after a full rescan".into(),
            });
        }
        Ok(())
    }

    fn release(&self) {}
}
