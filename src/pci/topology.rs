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

//! The bus operations the reload core depends on, plus config space helpers built on them.
//!
//! Mutating calls ([`PciTopology::stop_and_remove`], [`PciTopology::rescan_bridge`],
//! [`PciTopology::rescan_all`]) do not serialise themselves. Callers hold the topology's
//! [`RescanRemoveLock`] around every walk-then-mutate sequence, the same way the kernel's
//! `pci_lock_rescan_remove()` is used.

use crate::error::ReloadError;
use crate::pci::regs::*;
use crate::pci::{DevicePath, PciAddress};
use log::trace;
use std::sync::{Mutex, MutexGuard};

/// Global lock serialising bus walks and mutations.
#[derive(Debug, Default)]
pub struct RescanRemoveLock(Mutex<()>);

impl RescanRemoveLock {
    pub fn new() -> Self {
        RescanRemoveLock(Mutex::new(()))
    }

    pub fn lock(&self) -> Result<MutexGuard<'_, ()>, ReloadError> {
        self.0.lock().map_err(|e| {
            ReloadError::Internal(format!("Failed to lock the rescan/remove lock: {e}"))
        })
    }
}

pub trait PciTopology: Send + Sync {
    /// Whether the function is currently enumerated.
    fn exists(&self, dev: &PciAddress) -> bool;

    fn device_path(&self, dev: &PciAddress) -> Result<DevicePath, ReloadError>;

    /// The bridge `dev` sits behind, or `None` directly below a host bridge.
    fn upstream_bridge(&self, dev: &PciAddress) -> Result<Option<PciAddress>, ReloadError>;

    /// Every enumerated function on the same bus as `dev`, including `dev`, in address order.
    fn bus_devices(&self, dev: &PciAddress) -> Result<Vec<PciAddress>, ReloadError>;

    /// Functions directly below `bridge`, in address order.
    fn subordinate_devices(&self, bridge: &PciAddress) -> Result<Vec<PciAddress>, ReloadError>;

    /// Unbind drivers from `dev` and everything below it, then drop them from the bus.
    fn stop_and_remove(&self, dev: &PciAddress) -> Result<(), ReloadError>;

    /// Scan the secondary bus of `bridge`. Returns how many functions are below it afterwards.
    fn rescan_bridge(&self, bridge: &PciAddress) -> Result<usize, ReloadError>;

    fn rescan_all(&self) -> Result<(), ReloadError>;

    fn read_config(&self, dev: &PciAddress, offset: u16, buf: &mut [u8])
    -> Result<(), ReloadError>;

    fn write_config(&self, dev: &PciAddress, offset: u16, data: &[u8]) -> Result<(), ReloadError>;

    /// Register a hotplug slot `name` for `bridge`. [`ReloadError::Busy`] if the name is taken.
    fn claim_slot(&self, bridge: &PciAddress, name: &str) -> Result<(), ReloadError>;

    fn release_slot(&self, bridge: &PciAddress, name: &str);

    fn rescan_remove_lock(&self) -> &RescanRemoveLock;
}

pub fn read_u16(
    topology: &dyn PciTopology,
    dev: &PciAddress,
    offset: u16,
) -> Result<u16, ReloadError> {
    let mut buf = [0u8; 2];
    topology.read_config(dev, offset, &mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

pub fn read_u32(
    topology: &dyn PciTopology,
    dev: &PciAddress,
    offset: u16,
) -> Result<u32, ReloadError> {
    let mut buf = [0u8; 4];
    topology.read_config(dev, offset, &mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub fn write_u16(
    topology: &dyn PciTopology,
    dev: &PciAddress,
    offset: u16,
    value: u16,
) -> Result<(), ReloadError> {
    topology.write_config(dev, offset, &value.to_le_bytes())
}

pub fn write_u32(
    topology: &dyn PciTopology,
    dev: &PciAddress,
    offset: u16,
    value: u32,
) -> Result<(), ReloadError> {
    topology.write_config(dev, offset, &value.to_le_bytes())
}

/// Read-modify-write a 16-bit register: clear `clear`, then set `set`.
pub fn clear_and_set_u16(
    topology: &dyn PciTopology,
    dev: &PciAddress,
    offset: u16,
    clear: u16,
    set: u16,
) -> Result<(), ReloadError> {
    let old = read_u16(topology, dev, offset)?;
    let new = (old & !clear) | set;
    trace!("{dev} config {offset:#x}: {old:#06x} -> {new:#06x}");
    write_u16(topology, dev, offset, new)
}

// Upper bound on list entries, so a corrupt or looping list terminates.
const CAP_TTL: usize = 48;
const EXT_CAP_TTL: usize = ((PCI_CFG_SPACE_EXP_SIZE - PCI_CFG_SPACE_SIZE) / 8) as usize;

/// Offset of standard capability `cap_id`, walking the list from `PCI_CAPABILITY_LIST`.
pub fn find_capability(
    topology: &dyn PciTopology,
    dev: &PciAddress,
    cap_id: u8,
) -> Result<Option<u16>, ReloadError> {
    if read_u16(topology, dev, PCI_STATUS)? & PCI_STATUS_CAP_LIST == 0 {
        return Ok(None);
    }
    let mut pos = [0u8; 1];
    topology.read_config(dev, PCI_CAPABILITY_LIST, &mut pos)?;
    let mut pos = u16::from(pos[0] & !3);
    for _ in 0..CAP_TTL {
        if pos < 0x40 {
            break;
        }
        let mut header = [0u8; 2];
        topology.read_config(dev, pos + PCI_CAP_LIST_ID, &mut header)?;
        if header[0] == 0xff {
            break;
        }
        if header[0] == cap_id {
            return Ok(Some(pos));
        }
        pos = u16::from(header[PCI_CAP_LIST_NEXT as usize] & !3);
    }
    Ok(None)
}

/// Offset of extended capability `cap_id`, walking the list from 0x100.
pub fn find_ext_capability(
    topology: &dyn PciTopology,
    dev: &PciAddress,
    cap_id: u16,
) -> Result<Option<u16>, ReloadError> {
    let mut pos = PCI_CFG_SPACE_SIZE;
    for _ in 0..EXT_CAP_TTL {
        let header = read_u32(topology, dev, pos)?;
        // No extended capabilities at all, or config space is not accessible.
        if header == 0 || header == 0xffff_ffff {
            return Ok(None);
        }
        if (header & 0xffff) as u16 == cap_id {
            return Ok(Some(pos));
        }
        pos = ((header >> 20) & 0xffc) as u16;
        if pos < PCI_CFG_SPACE_SIZE {
            break;
        }
    }
    Ok(None)
}

/// PCI Express device/port type from the capability flags, `None` for conventional PCI.
pub fn pcie_port_type(
    topology: &dyn PciTopology,
    dev: &PciAddress,
) -> Result<Option<u8>, ReloadError> {
    match find_capability(topology, dev, PCI_CAP_ID_EXP)? {
        Some(cap) => {
            let flags = read_u16(topology, dev, cap + PCI_EXP_FLAGS)?;
            Ok(Some(((flags & PCI_EXP_FLAGS_TYPE) >> 4) as u8))
        }
        None => Ok(None),
    }
}

/// The PCIe root port above `dev`.
///
/// Walks upstream bridges until one reports the root port type. Behind conventional PCI
/// bridges with no PCI Express capability the topmost bridge is used instead.
pub fn find_root_port(
    topology: &dyn PciTopology,
    dev: &PciAddress,
) -> Result<PciAddress, ReloadError> {
    let mut topmost = None;
    let mut current = topology.upstream_bridge(dev)?;
    while let Some(bridge) = current {
        if pcie_port_type(topology, &bridge)? == Some(PCI_EXP_TYPE_ROOT_PORT) {
            trace!("Root port of {dev} is {bridge}");
            return Ok(bridge);
        }
        topmost = Some(bridge);
        current = topology.upstream_bridge(&bridge)?;
    }
    topmost.ok_or_else(|| {
        ReloadError::InvalidArgument(format!("{dev} is not behind any PCI bridge"))
    })
}
