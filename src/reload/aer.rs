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

//! Silence Advanced Error Reporting on a root port while its link is deliberately down.

use crate::error::ReloadError;
use crate::pci::regs::*;
use crate::pci::topology::{find_ext_capability, read_u32, write_u32};
use crate::pci::{PciAddress, PciTopology};
use log::{debug, warn};

/// The masks a root port had before [`AerMask::mask`] replaced them with all-ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AerMask {
    bridge: PciAddress,
    cap: u16,
    uncorrectable: u32,
    correctable: u32,
}

impl AerMask {
    /// Save both masks and mask everything. `None` if the port has no AER capability.
    pub fn mask(
        topology: &dyn PciTopology,
        bridge: &PciAddress,
    ) -> Result<Option<AerMask>, ReloadError> {
        let Some(cap) = find_ext_capability(topology, bridge, PCI_EXT_CAP_ID_ERR)? else {
            debug!("{bridge} has no AER capability, nothing to mask");
            return Ok(None);
        };
        let saved = AerMask {
            bridge: *bridge,
            cap,
            uncorrectable: read_u32(topology, bridge, cap + PCI_ERR_UNCOR_MASK)?,
            correctable: read_u32(topology, bridge, cap + PCI_ERR_COR_MASK)?,
        };
        debug!("Masking AER on {bridge}, saved {saved:?}");
        write_u32(topology, bridge, cap + PCI_ERR_UNCOR_MASK, u32::MAX)?;
        if let Err(e) = write_u32(topology, bridge, cap + PCI_ERR_COR_MASK, u32::MAX) {
            if let Err(undo) = write_u32(
                topology,
                bridge,
                cap + PCI_ERR_UNCOR_MASK,
                saved.uncorrectable,
            ) {
                warn!("{bridge}: could not unmask uncorrectable errors: {undo}");
            }
            return Err(e);
        }
        Ok(Some(saved))
    }

    pub fn restore(&self, topology: &dyn PciTopology) -> Result<(), ReloadError> {
        debug!("Restoring AER masks on {}", self.bridge);
        write_u32(
            topology,
            &self.bridge,
            self.cap + PCI_ERR_UNCOR_MASK,
            self.uncorrectable,
        )?;
        write_u32(
            topology,
            &self.bridge,
            self.cap + PCI_ERR_COR_MASK,
            self.correctable,
        )
    }
}
