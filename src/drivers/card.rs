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

use crate::error::DriverError;
use crate::pci::PciAddress;
use crate::reload::ReloadOps;
use crate::system_io::{fs_canonicalize, fs_read_dir, fs_write};
use log::{debug, info};
use std::path::{Path, PathBuf};

/// How deep below the PCI function sub-devices are looked for.
const MAX_DEPTH: usize = 4;

/// Prepares a card by unbinding the drivers of its sub-devices, deepest first.
///
/// Only drivers named in `drivers` are released. The PCI function's own driver stays bound
/// so that the card's management interfaces survive until the link goes down.
#[derive(Debug, Clone)]
pub struct UnbindPrepare {
    devices_dir: PathBuf,
    drivers: Vec<String>,
}

impl UnbindPrepare {
    pub fn new(devices_dir: impl Into<PathBuf>, drivers: Vec<String>) -> Self {
        UnbindPrepare {
            devices_dir: devices_dir.into(),
            drivers,
        }
    }

    fn unbind_below(&self, dir: &Path, depth: usize) -> Result<usize, DriverError> {
        if depth == 0 {
            return Ok(0);
        }
        let mut unbound = 0;
        let mut entries = fs_read_dir(dir)?;
        entries.sort();
        for entry in entries {
            let child = dir.join(&entry);
            if child.is_symlink() || !child.is_dir() {
                continue;
            }
            unbound += self.unbind_below(&child, depth - 1)?;

            let driver_link = child.join("driver");
            if !driver_link.is_symlink() {
                continue;
            }
            let driver = fs_canonicalize(&driver_link)?;
            let Some(driver_name) = driver.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !self.drivers.iter().any(|d| d == driver_name) {
                debug!("Leaving {entry} bound to {driver_name}");
                continue;
            }
            info!("Unbinding {entry} from {driver_name}");
            fs_write(&driver.join("unbind"), false, &entry)?;
            unbound += 1;
        }
        Ok(unbound)
    }
}

impl ReloadOps for UnbindPrepare {
    fn prepare(&self, target: &PciAddress) -> Result<(), DriverError> {
        if self.drivers.is_empty() {
            return Ok(());
        }
        let dir = fs_canonicalize(&self.devices_dir.join(target.to_string()))?;
        let unbound = self.unbind_below(&dir, MAX_DEPTH)?;
        info!("Unbound {unbound} sub-device(s) of {target}");
        Ok(())
    }
}
