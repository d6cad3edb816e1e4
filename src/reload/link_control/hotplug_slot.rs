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

//! PCIe hotplug slot driven directly through the port's Slot and Link registers.
//!
//! Taking the slot down disables the link and, when the slot has a power controller, cuts
//! slot power. Bringing it up powers the slot, waits for it to settle, re-enables the link
//! and then insists on the data link layer reporting the link active and on no power fault
//! being latched. Functions below the slot are unconfigured (bus mastering, SERR and INTx
//! off) before they are removed, and the slot is configured again by scanning its bus.

use crate::error::{ReloadError, errno};
use crate::pci::regs::*;
use crate::pci::topology::{clear_and_set_u16, read_u16, read_u32};
use crate::pci::{PciAddress, PciTopology};
use crate::reload::link_control::raw_link::{set_link_disable, wait_for_link_active};
use crate::reload::link_control::{LinkControl, LinkKind};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub struct HotplugSlot {
    topology: Arc<dyn PciTopology>,
    bridge: PciAddress,
    cap: u16,
    name: String,
    power_controller: bool,
    power_settle: Duration,
    link_timeout: Duration,
}

impl HotplugSlot {
    /// Claims the slot, named after its Physical Slot Number. [`ReloadError::Busy`] if the
    /// name is already taken.
    pub fn new(
        topology: Arc<dyn PciTopology>,
        bridge: PciAddress,
        cap: u16,
        power_settle: Duration,
        link_timeout: Duration,
    ) -> Result<Self, ReloadError> {
        let sltcap = read_u32(topology.as_ref(), &bridge, cap + PCI_EXP_SLTCAP)?;
        let name = ((sltcap & PCI_EXP_SLTCAP_PSN) >> PCI_EXP_SLTCAP_PSN_SHIFT).to_string();
        let power_controller = sltcap & PCI_EXP_SLTCAP_PCP != 0;
        topology.claim_slot(&bridge, &name)?;
        info!("Claimed hotplug slot {name} on {bridge} (power controller: {power_controller})");
        Ok(HotplugSlot {
            topology,
            bridge,
            cap,
            name,
            power_controller,
            power_settle,
            link_timeout,
        })
    }

    fn set_power(&self, on: bool) -> Result<(), ReloadError> {
        if !self.power_controller {
            return Ok(());
        }
        debug!("Slot {}: power {}", self.name, if on { "on" } else { "off" });
        let value = if on {
            PCI_EXP_SLTCTL_PWR_ON
        } else {
            PCI_EXP_SLTCTL_PWR_OFF
        };
        clear_and_set_u16(
            self.topology.as_ref(),
            &self.bridge,
            self.cap + PCI_EXP_SLTCTL,
            PCI_EXP_SLTCTL_PCC,
            value,
        )
    }

    fn check_power_fault(&self) -> Result<(), ReloadError> {
        let status = read_u16(
            self.topology.as_ref(),
            &self.bridge,
            self.cap + PCI_EXP_SLTSTA,
        )?;
        if status & PCI_EXP_SLTSTA_PFD != 0 {
            return Err(ReloadError::LinkControl {
                bridge: self.bridge.to_string(),
                op: "power on slot",
                code: errno::EIO,
                reason: format!("power fault detected on slot {}", self.name),
            });
        }
        Ok(())
    }

    /// Best effort: stop the function from mastering the bus or raising interrupts.
    fn quiesce(&self, dev: &PciAddress) {
        if let Err(e) = clear_and_set_u16(
            self.topology.as_ref(),
            dev,
            PCI_COMMAND,
            PCI_COMMAND_MASTER | PCI_COMMAND_SERR,
            PCI_COMMAND_INTX_DISABLE,
        ) {
            warn!("Slot {}: could not quiesce {dev}: {e}", self.name);
        }
    }
}

impl LinkControl for HotplugSlot {
    fn kind(&self) -> LinkKind {
        LinkKind::HotplugSlot
    }

    fn bridge(&self) -> &PciAddress {
        &self.bridge
    }

    fn slot_name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn disable_link(&self) -> Result<(), ReloadError> {
        info!("Slot {}: disabling link and powering off", self.name);
        set_link_disable(self.topology.as_ref(), &self.bridge, self.cap, true)?;
        self.set_power(false)
    }

    fn enable_link(&self) -> Result<(), ReloadError> {
        info!("Slot {}: powering on and enabling link", self.name);
        if self.power_controller {
            self.set_power(true)?;
            thread::sleep(self.power_settle);
        }
        set_link_disable(self.topology.as_ref(), &self.bridge, self.cap, false)?;
        if !wait_for_link_active(
            self.topology.as_ref(),
            &self.bridge,
            self.cap,
            self.link_timeout,
        )? {
            return Err(ReloadError::LinkControl {
                bridge: self.bridge.to_string(),
                op: "enable link",
                code: errno::ETIMEDOUT,
                reason: format!("link did not train within {:?}", self.link_timeout),
            });
        }
        self.check_power_fault()
    }

    fn remove_subtree(&self) -> Result<(), ReloadError> {
        let _guard = self.topology.rescan_remove_lock().lock()?;
        let children = self.topology.subordinate_devices(&self.bridge)?;
        for child in children.iter().rev() {
            self.quiesce(child);
            self.topology.stop_and_remove(child)?;
        }
        Ok(())
    }

    fn rescan(&self) -> Result<(), ReloadError> {
        let _guard = self.topology.rescan_remove_lock().lock()?;
        let present = self.topology.subordinate_devices(&self.bridge)?;
        if present.iter().any(|dev| dev.device == 0 && dev.function == 0) {
            debug!("Slot {}: already configured", self.name);
            return Ok(());
        }
        let found = self
            .topology
            .rescan_bridge(&self.bridge)
            .map_err(|e| ReloadError::rescan(self.bridge, e))?;
        if found == 0 {
            if let Err(e) = set_link_disable(self.topology.as_ref(), &self.bridge, self.cap, true)
                .and_then(|_| self.set_power(false))
            {
                warn!("Slot {}: could not switch off empty slot: {e}", self.name);
            }
            return Err(ReloadError::RescanFailed {
                bridge: self.bridge.to_string(),
                code: errno::ENODEV,
                reason: format!("no device found in slot {}", self.name),
            });
        }
        Ok(())
    }

    fn release(&self) {
        info!("Releasing hotplug slot {} of {}", self.name, self.bridge);
        self.topology.release_slot(&self.bridge, &self.name);
    }
}
