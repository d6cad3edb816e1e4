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

pub mod config_files;

use std::time::Duration;

/// The kernel's view of every PCI function. Typically `/sys/bus/pci/devices/`.
pub static PCI_DEVICES_DIR: &str = "/sys/bus/pci/devices/";

/// Writing `1` here re-enumerates every PCI bus in the system.
pub static PCI_RESCAN_PATH: &str = "/sys/bus/pci/rescan";

/// Slots registered by hotplug drivers, named after their Physical Slot Number.
pub static PCI_SLOTS_DIR: &str = "/sys/bus/pci/slots/";

/// Packaged defaults, shipped by the distribution.
pub static VENDOR_CONFIG_PATH: &str = "/usr/lib/fpgareload/config.toml";

/// Local overrides. Every value set here wins over the vendor file.
pub static USER_CONFIG_PATH: &str = "/etc/fpgareload/config.toml";

/// Seconds to wait for the BMC to finish loading an image before the link is restored.
pub const DEFAULT_WAIT_SECS: u64 = 10;

/// Time given to a slot after its power state changes.
pub const POWER_SETTLE: Duration = Duration::from_secs(1);

/// How long the data link layer may take to report the link active after power-on.
pub const LINK_TIMEOUT: Duration = Duration::from_secs(1);

pub const LINK_POLL_INTERVAL: Duration = Duration::from_millis(10);
