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

use crate::error::{DriverError, ReloadError, errno};
use crate::pci::DevicePath;
use crate::reload::TriggerOps;
use crate::system_io::{fs_canonicalize, fs_read, fs_write};
use log::{info, trace};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// BMC secure-update control directory, holding `available_images` and `image_load`.
#[derive(Debug, Clone)]
pub struct SysfsBmcTrigger {
    control_dir: PathBuf,
}

impl SysfsBmcTrigger {
    pub fn new(control_dir: impl Into<PathBuf>) -> Self {
        SysfsBmcTrigger {
            control_dir: control_dir.into(),
        }
    }

    pub fn control_dir(&self) -> &Path {
        &self.control_dir
    }

    /// Canonical location of the control directory. It sits below the card's PCI function,
    /// which is how the trigger finds its controller.
    pub fn anchor(&self) -> Result<DevicePath, ReloadError> {
        fs_canonicalize(&self.control_dir).map(DevicePath::new)
    }
}

impl TriggerOps for SysfsBmcTrigger {
    fn available_images(&self) -> Result<String, DriverError> {
        Ok(fs_read(&self.control_dir.join("available_images"))?)
    }

    fn image_trigger(&self, image: &str) -> Result<Option<Duration>, DriverError> {
        let images = self.available_images()?;
        trace!("BMC offers {images:?}");
        if !images.split_whitespace().any(|offered| offered == image) {
            return Err(DriverError::new(
                errno::EINVAL,
                format!("image {image:?} is not one of {:?}", images.trim()),
            ));
        }
        info!("Asking BMC at {:?} to load {image}", self.control_dir);
        fs_write(&self.control_dir.join("image_load"), false, image)?;
        Ok(None)
    }
}
