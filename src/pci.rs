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

//! PCI topology access.
//!
//! The reload core never touches sysfs directly. It sees the bus through [`PciTopology`],
//! implemented by [`sysfs::SysfsPci`] on a live system and by [`sim::SimPci`] in memory.

pub mod address;
pub mod regs;
pub mod sim;
pub mod sysfs;
pub mod topology;

pub use address::{DevicePath, PciAddress};
pub use topology::{PciTopology, RescanRemoveLock};
