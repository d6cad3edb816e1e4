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

use crate::config;
use crate::error::{ReloadError, errno};
use crate::pci::regs::*;
use crate::pci::topology::{clear_and_set_u16, read_u16};
use crate::pci::{PciAddress, PciTopology};
use crate::reload::link_control::{LinkControl, LinkKind};
use log::{debug, info, warn};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Set or clear Link Disable in the Link Control register of the port.
pub(super) fn set_link_disable(
    topology: &dyn PciTopology,
    bridge: &PciAddress,
    cap: u16,
    disable: bool,
) -> Result<(), ReloadError> {
    let lnkctl = read_u16(topology, bridge, cap + PCI_EXP_LNKCTL)?;
    if (lnkctl & PCI_EXP_LNKCTL_LD != 0) == disable {
        debug!("{bridge}: Link Disable already {}", if disable { "set" } else { "clear" });
        return Ok(());
    }
    let (clear, set) = if disable {
        (0, PCI_EXP_LNKCTL_LD)
    } else {
        (PCI_EXP_LNKCTL_LD, 0)
    };
    clear_and_set_u16(topology, bridge, cap + PCI_EXP_LNKCTL, clear, set)
}

/// Poll Data Link Layer Link Active until it is set or `timeout` passes.
pub(super) fn wait_for_link_active(
    topology: &dyn PciTopology,
    bridge: &PciAddress,
    cap: u16,
    timeout: Duration,
) -> Result<bool, ReloadError> {
    let deadline = Instant::now() + timeout;
    loop {
        if read_u16(topology, bridge, cap + PCI_EXP_LNKSTA)? & PCI_EXP_LNKSTA_DLLLA != 0 {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        thread::sleep(config::LINK_POLL_INTERVAL);
    }
}

pub struct RawLink {
    topology: Arc<dyn PciTopology>,
    bridge: PciAddress,
    cap: u16,
    link_timeout: Duration,
}

impl RawLink {
    pub fn new(
        topology: Arc<dyn PciTopology>,
        bridge: PciAddress,
        cap: u16,
        link_timeout: Duration,
    ) -> Self {
        RawLink {
            topology,
            bridge,
            cap,
            link_timeout,
        }
    }
}

impl LinkControl for RawLink {
    fn kind(&self) -> LinkKind {
        LinkKind::RawLink
    }

    fn bridge(&self) -> &PciAddress {
        &self.bridge
    }

    fn disable_link(&self) -> Result<(), ReloadError> {
        info!("Disabling link on {}", self.bridge);
        set_link_disable(self.topology.as_ref(), &self.bridge, self.cap, true)
    }

    fn enable_link(&self) -> Result<(), ReloadError> {
        info!("Enabling link on {}", self.bridge);
        set_link_disable(self.topology.as_ref(), &self.bridge, self.cap, false)?;
        // Not every port reports link state; the rescan decides whether the card came back.
        if !wait_for_link_active(
            self.topology.as_ref(),
            &self.bridge,
            self.cap,
            self.link_timeout,
        )? {
            warn!(
                "{}: link not active after {:?}",
                self.bridge, self.link_timeout
            );
        }
        Ok(())
    }

    fn remove_subtree(&self) -> Result<(), ReloadError> {
        let _guard = self.topology.rescan_remove_lock().lock()?;
        let children = self.topology.subordinate_devices(&self.bridge)?;
        for child in children.iter().rev() {
            self.topology.stop_and_remove(child)?;
        }
        Ok(())
    }

    fn rescan(&self) -> Result<(), ReloadError> {
        let _guard = self.topology.rescan_remove_lock().lock()?;
        let found = self
            .topology
            .rescan_bridge(&self.bridge)
            .map_err(|e| ReloadError::rescan(self.bridge, e))?;
        if found == 0 {
            return Err(ReloadError::RescanFailed {
                bridge: self.bridge.to_string(),
                code: errno::ENODEV,
                reason: "no device found after rescan".into(),
            });
        }
        info!("{}: {found} function(s) back after rescan", self.bridge);
        Ok(())
    }

    fn release(&self) {}
}
