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
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A PCI function address, `domain:bus:device.function`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PciAddress {
    pub domain: u16,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl PciAddress {
    pub const fn new(domain: u16, bus: u8, device: u8, function: u8) -> Self {
        PciAddress {
            domain,
            bus,
            device,
            function,
        }
    }

    /// Same domain, bus and device number: another function of the same physical device.
    pub fn same_slot(&self, other: &PciAddress) -> bool {
        self.domain == other.domain && self.bus == other.bus && self.device == other.device
    }

    pub fn same_bus(&self, other: &PciAddress) -> bool {
        self.domain == other.domain && self.bus == other.bus
    }
}

impl fmt::Display for PciAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

fn parse_hex<T: TryFrom<u32>>(s: &str, max: u32, full: &str) -> Result<T, ReloadError> {
    let invalid = || ReloadError::InvalidArgument(format!("{full:?} is not a valid PCI address"));
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let value = u32::from_str_radix(s, 16).map_err(|_| invalid())?;
    if value > max {
        return Err(invalid());
    }
    T::try_from(value).map_err(|_| invalid())
}

impl FromStr for PciAddress {
    type Err = ReloadError;

    /// Accepts `dddd:bb:dd.f` and the short `bb:dd.f` form (domain 0).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ReloadError::InvalidArgument(format!("{s:?} is not a valid PCI address"));
        let (rest, function) = s.rsplit_once('.').ok_or_else(invalid)?;
        let parts: Vec<&str> = rest.split(':').collect();
        let (domain, bus, device) = match parts.as_slice() {
            [domain, bus, device] => (*domain, *bus, *device),
            [bus, device] => ("0", *bus, *device),
            _ => return Err(invalid()),
        };
        Ok(PciAddress {
            domain: parse_hex(domain, 0xffff, s)?,
            bus: parse_hex(bus, 0xff, s)?,
            device: parse_hex(device, 0x1f, s)?,
            function: parse_hex(function, 0x7, s)?,
        })
    }
}

/// The canonical location of a device in the kernel's device hierarchy, e.g.
/// `/sys/devices/pci0000:00/0000:00:1c.0/0000:01:00.0`.
///
/// Every ancestor of a device is a path prefix of it, which is what trigger binding relies on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DevicePath(PathBuf);

impl DevicePath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DevicePath(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// `true` if `ancestor` is this device or one of its parents. Comparison is per path
    /// component, so `.../0000:01:00.1` is not below `.../0000:01:00.10`.
    pub fn is_descendant_of(&self, ancestor: &DevicePath) -> bool {
        self.0.starts_with(&ancestor.0)
    }

    pub fn parent(&self) -> Option<DevicePath> {
        self.0.parent().map(|p| DevicePath(p.to_path_buf()))
    }

    pub fn join(&self, child: impl AsRef<Path>) -> DevicePath {
        DevicePath(self.0.join(child))
    }

    /// The last component parsed as a PCI address, if it is one.
    pub fn pci_address(&self) -> Option<PciAddress> {
        self.0
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse().ok())
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}
