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

use crate::pci::DevicePath;
use crate::reload::controller::{Controller, Target};
use std::sync::Arc;

/// Handle returned by [`crate::reload::Registry::register_trigger`].
///
/// The trigger itself lives inside its controller; this only says which one.
#[derive(Debug, Clone)]
pub struct Trigger {
    pub(crate) controller: Arc<Controller>,
}

impl Trigger {
    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }
}

/// Whether a trigger anchored at `anchor` belongs to the controller of `target`.
///
/// The anchor must sit at or below the target function, or at or below another function
/// of the same physical device (a security or management PF next to the FPGA PF).
pub(crate) fn anchored_to(target: &Target, anchor: &DevicePath) -> bool {
    if anchor.is_descendant_of(&target.path) {
        return true;
    }
    let target_parent = target.path.parent();
    let mut current = Some(anchor.clone());
    while let Some(path) = current {
        if let Some(addr) = path.pci_address() {
            if addr.same_slot(&target.address) && path.parent() == target_parent {
                return true;
            }
        }
        current = path.parent();
    }
    false
}
