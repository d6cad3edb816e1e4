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

//! [`PciTopology`] over the kernel's sysfs PCI interface.
//!
//! | operation              | sysfs                                       |
//! |------------------------|---------------------------------------------|
//! | device path            | `realpath <devices_dir>/<bdf>`              |
//! | stop and remove        | `echo 1 > <devices_dir>/<bdf>/remove`       |
//! | rescan below a bridge  | `echo 1 > <devices_dir>/<bridge>/rescan`    |
//! | rescan everything      | `echo 1 > <rescan_path>`                    |
//! | config space           | positioned I/O on `<devices_dir>/<bdf>/config` |
//!
//! Hotplug slots are tracked in-process. A slot whose name already exists under
//! `slots_dir` with a `power` attribute belongs to a kernel hotplug driver and is reported
//! as busy.

use crate::config;
use crate::error::ReloadError;
use crate::pci::{DevicePath, PciAddress, PciTopology, RescanRemoveLock};
use crate::system_io::{fs_canonicalize, fs_read_at, fs_read_dir, fs_write, fs_write_at};
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysfsPaths {
    pub devices_dir: PathBuf,
    pub rescan_path: PathBuf,
    pub slots_dir: PathBuf,
}

impl Default for SysfsPaths {
    fn default() -> Self {
        SysfsPaths {
            devices_dir: config::PCI_DEVICES_DIR.into(),
            rescan_path: config::PCI_RESCAN_PATH.into(),
            slots_dir: config::PCI_SLOTS_DIR.into(),
        }
    }
}

#[derive(Debug)]
pub struct SysfsPci {
    paths: SysfsPaths,
    rescan_remove: RescanRemoveLock,
    slots: Mutex<BTreeMap<String, PciAddress>>,
}

impl SysfsPci {
    pub fn new(paths: SysfsPaths) -> Self {
        SysfsPci {
            paths,
            rescan_remove: RescanRemoveLock::new(),
            slots: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn paths(&self) -> &SysfsPaths {
        &self.paths
    }

    fn device_dir(&self, dev: &PciAddress) -> PathBuf {
        self.paths.devices_dir.join(dev.to_string())
    }

    fn enumerated(&self) -> Result<Vec<PciAddress>, ReloadError> {
        let mut devices: Vec<PciAddress> = fs_read_dir(&self.paths.devices_dir)?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        devices.sort();
        Ok(devices)
    }
}

impl PciTopology for SysfsPci {
    fn exists(&self, dev: &PciAddress) -> bool {
        self.device_dir(dev).exists()
    }

    fn device_path(&self, dev: &PciAddress) -> Result<DevicePath, ReloadError> {
        fs_canonicalize(&self.device_dir(dev)).map(DevicePath::new)
    }

    fn upstream_bridge(&self, dev: &PciAddress) -> Result<Option<PciAddress>, ReloadError> {
        Ok(self
            .device_path(dev)?
            .parent()
            .and_then(|parent| parent.pci_address()))
    }

    fn bus_devices(&self, dev: &PciAddress) -> Result<Vec<PciAddress>, ReloadError> {
        Ok(self
            .enumerated()?
            .into_iter()
            .filter(|other| other.same_bus(dev))
            .collect())
    }

    fn subordinate_devices(&self, bridge: &PciAddress) -> Result<Vec<PciAddress>, ReloadError> {
        // Child functions show up as subdirectories of the bridge's canonical directory.
        let bridge_path = self.device_path(bridge)?;
        let mut children: Vec<PciAddress> = fs_read_dir(bridge_path.as_path())?
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect();
        children.sort();
        Ok(children)
    }

    fn stop_and_remove(&self, dev: &PciAddress) -> Result<(), ReloadError> {
        info!("Removing {dev} from the bus");
        fs_write(&self.device_dir(dev).join("remove"), false, "1")
    }

    fn rescan_bridge(&self, bridge: &PciAddress) -> Result<usize, ReloadError> {
        info!("Rescanning below {bridge}");
        fs_write(&self.device_dir(bridge).join("rescan"), false, "1")?;
        Ok(self.subordinate_devices(bridge)?.len())
    }

    fn rescan_all(&self) -> Result<(), ReloadError> {
        info!("Rescanning all PCI buses");
        fs_write(&self.paths.rescan_path, false, "1")
    }

    fn read_config(
        &self,
        dev: &PciAddress,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<(), ReloadError> {
        fs_read_at(&self.device_dir(dev).join("config"), offset.into(), buf)
    }

    fn write_config(&self, dev: &PciAddress, offset: u16, data: &[u8]) -> Result<(), ReloadError> {
        fs_write_at(&self.device_dir(dev).join("config"), offset.into(), data)
    }

    fn claim_slot(&self, bridge: &PciAddress, name: &str) -> Result<(), ReloadError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| ReloadError::Internal(format!("Failed to lock slot table: {e}")))?;
        if let Some(owner) = slots.get(name) {
            return Err(ReloadError::Busy(format!(
                "slot {name} is already claimed for {owner}"
            )));
        }
        if self.paths.slots_dir.join(name).join("power").exists() {
            return Err(ReloadError::Busy(format!(
                "slot {name} is driven by a kernel hotplug driver"
            )));
        }
        debug!("Claimed slot {name} for {bridge}");
        slots.insert(name.to_string(), *bridge);
        Ok(())
    }

    fn release_slot(&self, bridge: &PciAddress, name: &str) {
        if let Ok(mut slots) = self.slots.lock() {
            if slots.get(name) == Some(bridge) {
                debug!("Released slot {name} of {bridge}");
                slots.remove(name);
            }
        }
    }

    fn rescan_remove_lock(&self) -> &RescanRemoveLock {
        &self.rescan_remove
    }
}
