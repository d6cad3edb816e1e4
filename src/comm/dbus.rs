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

pub mod control_interface;
pub mod status_interface;

use crate::error::ReloadError;
use crate::reload::{Controller, Registry};
use std::sync::Arc;

/// Look up a registered controller by the name its card was configured with.
pub(crate) fn find_controller(
    registry: &Registry,
    controller_name: &str,
) -> Result<Arc<Controller>, ReloadError> {
    if controller_name.is_empty() || !controller_name.is_ascii() {
        return Err(ReloadError::InvalidArgument(format!(
            "{controller_name:?} is not a valid controller name."
        )));
    }
    registry.find(controller_name)?.ok_or_else(|| {
        ReloadError::InvalidArgument(format!("Controller {controller_name} not found."))
    })
}
