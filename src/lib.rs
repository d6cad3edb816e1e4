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

//! Coordinated FPGA image reload for PCIe-attached accelerator cards.
//!
//! Reflashing an FPGA through its board management controller makes the card's PCI
//! functions vanish and come back. This crate drives that around the BMC: it removes the
//! card from the PCI tree, has the BMC load the new image, takes the link down for the
//! settle time and brings everything back, leaving the rest of the root complex alone.
//!
//! - [`reload`]: registry, controllers, the reload sequence and its link-control variants.
//! - [`pci`]: PCI topology access, through sysfs or an in-memory simulation.
//! - [`drivers`]: sysfs backed card and BMC callbacks used by the daemon.
//! - [`comm`]: the DBus control plane.
//! - [`config`]: constants and the TOML configuration files.

pub mod comm;
pub mod config;
pub mod drivers;
pub mod error;
pub mod pci;
pub mod reload;
pub mod system_io;
