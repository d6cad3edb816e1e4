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

//! Callbacks supplied by the drivers taking part in a reload.

use crate::error::DriverError;
use crate::pci::PciAddress;
use std::time::Duration;

/// Implemented by the card driver owning the target function.
pub trait ReloadOps: Send + Sync {
    /// Quiesce everything on the card that must not survive the reload, typically by
    /// releasing sub-device drivers. Called after siblings are removed and before the BMC
    /// is triggered.
    fn prepare(&self, target: &PciAddress) -> Result<(), DriverError>;
}

/// Implemented by the BMC driver that can start an image load.
pub trait TriggerOps: Send + Sync {
    /// Newline separated list of images the BMC can load.
    fn available_images(&self) -> Result<String, DriverError>;

    /// Start loading `image`. May report how long the hardware needs before the link can be
    /// restored; `None` keeps the controller's wait tunable.
    fn image_trigger(&self, image: &str) -> Result<Option<Duration>, DriverError>;
}
