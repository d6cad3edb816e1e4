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

//! How a controller takes the endpoint off the bus and brings it back.
//!
//! Three generations of hardware are covered:
//!
//! - [`RawLink`](raw_link::RawLink): toggle Link Disable in the root port's Link Control
//!   register and remove/rescan the functions below it.
//! - [`BusRemoval`](bus_removal::BusRemoval): no link control at all; remove the root port
//!   itself and rescan every bus.
//! - [`HotplugSlot`](hotplug_slot::HotplugSlot): drive the port as a PCIe hotplug slot with
//!   slot power control, link training and power fault checks.
//!
//! The variant is picked once per controller by [`select`].

pub mod bus_removal;
pub mod hotplug_slot;
pub mod raw_link;

use crate::error::ReloadError;
use crate::pci::regs::*;
use crate::pci::topology::{find_capability, read_u16, read_u32};
use crate::pci::{PciAddress, PciTopology};
use crate::reload::ReloadSettings;
use bus_removal::BusRemoval;
use hotplug_slot::HotplugSlot;
use log::info;
use raw_link::RawLink;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;

pub trait LinkControl: Send + Sync {
    fn kind(&self) -> LinkKind;

    fn bridge(&self) -> &PciAddress;

    fn slot_name(&self) -> Option<&str> {
        None
    }

    fn disable_link(&self) -> Result<(), ReloadError>;

    fn enable_link(&self) -> Result<(), ReloadError>;

    /// Remove every function that will vanish while the FPGA reloads.
    fn remove_subtree(&self) -> Result<(), ReloadError>;

    /// Re-enumerate what [`LinkControl::remove_subtree`] removed.
    fn rescan(&self) -> Result<(), ReloadError>;

    /// Give back anything claimed at construction. Called once, at teardown.
    fn release(&self);
}

/// Configured choice of link control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStrategy {
    /// Decide from the root port's capabilities.
    Auto,
    RawLink,
    BusRemoval,
    HotplugSlot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    RawLink,
    BusRemoval,
    HotplugSlot,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkKind::RawLink => "raw_link",
            LinkKind::BusRemoval => "bus_removal",
            LinkKind::HotplugSlot => "hotplug_slot",
        };
        write!(f, "{s}")
    }
}

/// Hot-plug capable slot: the port implements a slot and advertises Hot-Plug Capable.
fn is_hotplug_slot(
    topology: &dyn PciTopology,
    bridge: &PciAddress,
    cap: u16,
) -> Result<bool, ReloadError> {
    if read_u16(topology, bridge, cap + PCI_EXP_FLAGS)? & PCI_EXP_FLAGS_SLOT == 0 {
        return Ok(false);
    }
    Ok(read_u32(topology, bridge, cap + PCI_EXP_SLTCAP)? & PCI_EXP_SLTCAP_HPC != 0)
}

/// Build the link control for `bridge`.
///
/// With [`LinkStrategy::Auto`]: a hot-plug capable slot gets [`HotplugSlot`], any other
/// PCI Express port gets [`RawLink`], and a bridge without the PCI Express capability gets
/// [`BusRemoval`]. Forcing a PCI Express variant onto a bridge without the capability is an
/// [`ReloadError::InvalidArgument`].
pub fn select(
    topology: &Arc<dyn PciTopology>,
    bridge: &PciAddress,
    settings: &ReloadSettings,
) -> Result<Box<dyn LinkControl>, ReloadError> {
    let cap = find_capability(topology.as_ref(), bridge, PCI_CAP_ID_EXP)?;
    let kind = match (settings.link_strategy, cap) {
        (LinkStrategy::BusRemoval, _) | (LinkStrategy::Auto, None) => LinkKind::BusRemoval,
        (LinkStrategy::RawLink, Some(_)) => LinkKind::RawLink,
        (LinkStrategy::HotplugSlot, Some(_)) => LinkKind::HotplugSlot,
        (LinkStrategy::Auto, Some(cap)) => {
            if is_hotplug_slot(topology.as_ref(), bridge, cap)? {
                LinkKind::HotplugSlot
            } else {
                LinkKind::RawLink
            }
        }
        (strategy, None) => {
            return Err(ReloadError::InvalidArgument(format!(
                "{bridge} has no PCI Express capability, cannot use {strategy:?}"
            )));
        }
    };
    info!("Using {kind} link control on {bridge}");
    Ok(match (kind, cap) {
        (LinkKind::HotplugSlot, Some(cap)) => Box::new(HotplugSlot::new(
            topology.clone(),
            *bridge,
            cap,
            settings.power_settle,
            settings.link_timeout,
        )?),
        (LinkKind::RawLink, Some(cap)) => Box::new(RawLink::new(
            topology.clone(),
            *bridge,
            cap,
            settings.link_timeout,
        )),
        _ => Box::new(BusRemoval::new(topology.clone(), *bridge)),
    })
}
