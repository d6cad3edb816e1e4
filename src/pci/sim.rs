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

//! In-memory [`PciTopology`].
//!
//! Every function owns a 4 KiB config space. Root ports get a PCI Express capability at
//! 0x40 and, optionally, a hotplug slot and an AER extended capability at 0x100. The link
//! model is minimal: Data Link Layer Link Active follows Link Disable and slot power, and a
//! removed function only comes back on rescan while the link above it is active.
//!
//! Every successful mutation is appended to an event log with a timestamp so callers can
//! assert on ordering and on how long the link stayed down. Failures can be injected per
//! config register and for rescans.
//!
//! ```rust
//! use fpgareload::pci::sim::{RootPortOptions, SimPci};
//! use fpgareload::pci::{PciAddress, PciTopology};
//!
//! let root = PciAddress::new(0, 0, 0x1c, 0);
//! let fpga = PciAddress::new(0, 1, 0, 0);
//! let sim = SimPci::new()
//!     .with_root_port(root, RootPortOptions::default())
//!     .with_function(fpga, root);
//! assert_eq!(sim.subordinate_devices(&root).unwrap(), vec![fpga]);
//! ```

use crate::error::{ReloadError, errno};
use crate::pci::regs::*;
use crate::pci::{DevicePath, PciAddress, PciTopology, RescanRemoveLock};
use log::trace;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

const PCIE_CAP: u16 = 0x40;
const AER_CAP: u16 = PCI_CFG_SPACE_SIZE;
const SIM_VENDOR: u16 = 0x8086;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimOp {
    StopAndRemove(PciAddress),
    ConfigWrite {
        dev: PciAddress,
        offset: u16,
        data: Vec<u8>,
    },
    RescanBridge(PciAddress),
    RescanAll,
    ClaimSlot(String),
    ReleaseSlot(String),
    /// Free-form marker recorded by test callbacks through [`SimPci::record`].
    Note(String),
}

impl SimOp {
    /// Anything that changes bus state, as opposed to notes and slot bookkeeping.
    pub fn is_bus_mutation(&self) -> bool {
        matches!(
            self,
            SimOp::StopAndRemove(_)
                | SimOp::ConfigWrite { .. }
                | SimOp::RescanBridge(_)
                | SimOp::RescanAll
        )
    }

    /// A 16-bit write of `offset` on `dev`, returning the value written.
    pub fn config_write_u16(&self, dev: &PciAddress, offset: u16) -> Option<u16> {
        match self {
            SimOp::ConfigWrite {
                dev: d,
                offset: o,
                data,
            } if d == dev && *o == offset && data.len() == 2 => {
                Some(u16::from_le_bytes([data[0], data[1]]))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SimEvent {
    pub at: Instant,
    pub op: SimOp,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HotplugOptions {
    /// Physical Slot Number advertised in Slot Capabilities.
    pub slot_number: u32,
    pub power_controller: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RootPortOptions {
    pub pcie: bool,
    pub aer: bool,
    pub hotplug: Option<HotplugOptions>,
}

impl Default for RootPortOptions {
    fn default() -> Self {
        RootPortOptions {
            pcie: true,
            aer: false,
            hotplug: None,
        }
    }
}

#[derive(Debug, Clone)]
struct SimFunction {
    parent: Option<PciAddress>,
    path: DevicePath,
    config: Vec<u8>,
}

impl SimFunction {
    fn u16_at(&self, offset: u16) -> u16 {
        let o = offset as usize;
        u16::from_le_bytes([self.config[o], self.config[o + 1]])
    }

    fn set_u16(&mut self, offset: u16, value: u16) {
        let o = offset as usize;
        self.config[o..o + 2].copy_from_slice(&value.to_le_bytes());
    }

    fn set_u32(&mut self, offset: u16, value: u32) {
        let o = offset as usize;
        self.config[o..o + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn has_pcie(&self) -> bool {
        self.config[PCI_CAPABILITY_LIST as usize] as u16 == PCIE_CAP
    }

    /// Link up as seen from below this function. Always true for non-bridges.
    fn link_active(&self) -> bool {
        !self.has_pcie() || self.u16_at(PCIE_CAP + PCI_EXP_LNKSTA) & PCI_EXP_LNKSTA_DLLLA != 0
    }

    // Link active iff the link is not disabled and the slot, if any, is powered.
    fn update_link_state(&mut self) {
        if !self.has_pcie() {
            return;
        }
        let disabled = self.u16_at(PCIE_CAP + PCI_EXP_LNKCTL) & PCI_EXP_LNKCTL_LD != 0;
        let unpowered = self.u16_at(PCIE_CAP + PCI_EXP_SLTCTL) & PCI_EXP_SLTCTL_PCC != 0;
        let mut status = self.u16_at(PCIE_CAP + PCI_EXP_LNKSTA) & !PCI_EXP_LNKSTA_DLLLA;
        if !disabled && !unpowered {
            status |= PCI_EXP_LNKSTA_DLLLA;
        }
        self.set_u16(PCIE_CAP + PCI_EXP_LNKSTA, status);
    }
}

#[derive(Debug, Default)]
struct SimState {
    present: BTreeMap<PciAddress, SimFunction>,
    removed: BTreeMap<PciAddress, SimFunction>,
    slots: BTreeMap<String, Option<PciAddress>>,
    events: Vec<SimEvent>,
    failing_writes: BTreeSet<(PciAddress, u16)>,
    fail_rescan: bool,
}

impl SimState {
    fn record(&mut self, op: SimOp) {
        trace!("sim: {op:?}");
        self.events.push(SimEvent {
            at: Instant::now(),
            op,
        });
    }

    fn function(&self, dev: &PciAddress) -> Result<&SimFunction, ReloadError> {
        self.present.get(dev).ok_or_else(|| no_device(dev))
    }

    // Bring back removed functions whose parent is present with an active link, repeating
    // until nothing changes so that whole subtrees return.
    fn reinstate(&mut self, below: Option<&PciAddress>) {
        loop {
            let ready: Vec<PciAddress> = self
                .removed
                .iter()
                .filter(|(_, function)| match function.parent {
                    Some(parent) => {
                        self.present
                            .get(&parent)
                            .is_some_and(SimFunction::link_active)
                            && below.is_none_or(|bridge| self.is_below(&parent, bridge))
                    }
                    None => below.is_none(),
                })
                .map(|(addr, _)| *addr)
                .collect();
            if ready.is_empty() {
                return;
            }
            for addr in ready {
                if let Some(function) = self.removed.remove(&addr) {
                    self.present.insert(addr, function);
                }
            }
        }
    }

    fn is_below(&self, dev: &PciAddress, bridge: &PciAddress) -> bool {
        let mut current = Some(*dev);
        while let Some(addr) = current {
            if addr == *bridge {
                return true;
            }
            current = self.present.get(&addr).and_then(|f| f.parent);
        }
        false
    }
}

fn no_device(dev: &PciAddress) -> ReloadError {
    ReloadError::IORead {
        file: format!("/sys/bus/pci/devices/{dev}").into(),
        e: std::io::Error::from_raw_os_error(errno::ENODEV),
    }
}

fn injected(dev: &PciAddress, what: &str) -> ReloadError {
    ReloadError::IOWrite {
        data: what.to_string(),
        file: format!("/sys/bus/pci/devices/{dev}").into(),
        e: std::io::Error::from_raw_os_error(errno::EIO),
    }
}

#[derive(Debug, Default)]
pub struct SimPci {
    state: Mutex<SimState>,
    rescan_remove: RescanRemoveLock,
}

impl SimPci {
    pub fn new() -> Self {
        SimPci::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, SimState>, ReloadError> {
        self.state
            .lock()
            .map_err(|e| ReloadError::Internal(format!("Failed to lock simulated bus: {e}")))
    }

    fn insert(&self, addr: PciAddress, parent: Option<PciAddress>, config: Vec<u8>) {
        if let Ok(mut state) = self.state() {
            let path = match parent.and_then(|p| state.present.get(&p)) {
                Some(parent) => parent.path.join(addr.to_string()),
                None => DevicePath::new(format!(
                    "/sys/devices/pci{:04x}:{:02x}/{addr}",
                    addr.domain, addr.bus
                )),
            };
            state.present.insert(
                addr,
                SimFunction {
                    parent,
                    path,
                    config,
                },
            );
        }
    }

    /// Add a bridge directly below the host bridge.
    pub fn with_root_port(self, addr: PciAddress, options: RootPortOptions) -> Self {
        let mut function = SimFunction {
            parent: None,
            path: DevicePath::new(""),
            config: vec![0; PCI_CFG_SPACE_EXP_SIZE as usize],
        };
        function.set_u16(PCI_VENDOR_ID, SIM_VENDOR);
        function.set_u16(PCI_COMMAND, PCI_COMMAND_MEMORY | PCI_COMMAND_MASTER);
        if options.pcie {
            function.set_u16(PCI_STATUS, PCI_STATUS_CAP_LIST);
            function.config[PCI_CAPABILITY_LIST as usize] = PCIE_CAP as u8;
            function.config[PCIE_CAP as usize] = PCI_CAP_ID_EXP;
            let mut flags = 0x2 | (u16::from(PCI_EXP_TYPE_ROOT_PORT) << 4);
            if let Some(hotplug) = options.hotplug {
                flags |= PCI_EXP_FLAGS_SLOT;
                let mut sltcap = PCI_EXP_SLTCAP_HPC
                    | ((hotplug.slot_number << PCI_EXP_SLTCAP_PSN_SHIFT) & PCI_EXP_SLTCAP_PSN);
                if hotplug.power_controller {
                    sltcap |= PCI_EXP_SLTCAP_PCP;
                }
                function.set_u32(PCIE_CAP + PCI_EXP_SLTCAP, sltcap);
            }
            function.set_u16(PCIE_CAP + PCI_EXP_FLAGS, flags);
            function.update_link_state();
        }
        if options.aer {
            function.set_u32(AER_CAP, u32::from(PCI_EXT_CAP_ID_ERR) | (1 << 16));
        }
        self.insert(addr, None, function.config);
        self
    }

    /// Add an endpoint function below `parent`.
    pub fn with_function(self, addr: PciAddress, parent: PciAddress) -> Self {
        let mut function = SimFunction {
            parent: Some(parent),
            path: DevicePath::new(""),
            config: vec![0; PCI_CFG_SPACE_EXP_SIZE as usize],
        };
        function.set_u16(PCI_VENDOR_ID, SIM_VENDOR);
        function.set_u16(
            PCI_COMMAND,
            PCI_COMMAND_MEMORY | PCI_COMMAND_MASTER | PCI_COMMAND_SERR,
        );
        function.set_u16(PCI_STATUS, PCI_STATUS_CAP_LIST);
        function.config[PCI_CAPABILITY_LIST as usize] = PCIE_CAP as u8;
        function.config[PCIE_CAP as usize] = PCI_CAP_ID_EXP;
        function.set_u16(
            PCIE_CAP + PCI_EXP_FLAGS,
            0x2 | (u16::from(PCI_EXP_TYPE_ENDPOINT) << 4),
        );
        self.insert(addr, Some(parent), function.config);
        self
    }

    /// Make every write of `offset` on `dev` fail with EIO.
    pub fn fail_config_write(&self, dev: PciAddress, offset: u16) {
        if let Ok(mut state) = self.state() {
            state.failing_writes.insert((dev, offset));
        }
    }

    pub fn fail_rescan(&self, fail: bool) {
        if let Ok(mut state) = self.state() {
            state.fail_rescan = fail;
        }
    }

    /// Latch Power Fault Detected in the Slot Status of `bridge`.
    pub fn inject_power_fault(&self, bridge: PciAddress) {
        if let Ok(mut state) = self.state() {
            if let Some(function) = state.present.get_mut(&bridge) {
                let status = function.u16_at(PCIE_CAP + PCI_EXP_SLTSTA) | PCI_EXP_SLTSTA_PFD;
                function.set_u16(PCIE_CAP + PCI_EXP_SLTSTA, status);
            }
        }
    }

    /// Register a slot name as owned by some other hotplug controller.
    pub fn occupy_slot(&self, name: &str) {
        if let Ok(mut state) = self.state() {
            state.slots.insert(name.to_string(), None);
        }
    }

    pub fn record(&self, note: impl Into<String>) {
        if let Ok(mut state) = self.state() {
            state.record(SimOp::Note(note.into()));
        }
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.state().map(|s| s.events.clone()).unwrap_or_default()
    }

    pub fn ops(&self) -> Vec<SimOp> {
        self.events().into_iter().map(|e| e.op).collect()
    }

    pub fn clear_events(&self) {
        if let Ok(mut state) = self.state() {
            state.events.clear();
        }
    }

    pub fn is_present(&self, dev: &PciAddress) -> bool {
        self.state()
            .map(|s| s.present.contains_key(dev))
            .unwrap_or(false)
    }

    /// Peek at a register of a present or removed function without recording anything.
    pub fn config_u16(&self, dev: &PciAddress, offset: u16) -> Option<u16> {
        let state = self.state().ok()?;
        state
            .present
            .get(dev)
            .or_else(|| state.removed.get(dev))
            .map(|f| f.u16_at(offset))
    }

    pub fn config_u32(&self, dev: &PciAddress, offset: u16) -> Option<u32> {
        let lo = self.config_u16(dev, offset)?;
        let hi = self.config_u16(dev, offset + 2)?;
        Some(u32::from(lo) | (u32::from(hi) << 16))
    }

    pub fn slot_owner(&self, name: &str) -> Option<PciAddress> {
        self.state().ok()?.slots.get(name).copied().flatten()
    }
}

impl PciTopology for SimPci {
    fn exists(&self, dev: &PciAddress) -> bool {
        self.is_present(dev)
    }

    fn device_path(&self, dev: &PciAddress) -> Result<DevicePath, ReloadError> {
        Ok(self.state()?.function(dev)?.path.clone())
    }

    fn upstream_bridge(&self, dev: &PciAddress) -> Result<Option<PciAddress>, ReloadError> {
        Ok(self.state()?.function(dev)?.parent)
    }

    fn bus_devices(&self, dev: &PciAddress) -> Result<Vec<PciAddress>, ReloadError> {
        Ok(self
            .state()?
            .present
            .keys()
            .filter(|other| other.same_bus(dev))
            .copied()
            .collect())
    }

    fn subordinate_devices(&self, bridge: &PciAddress) -> Result<Vec<PciAddress>, ReloadError> {
        let state = self.state()?;
        state.function(bridge)?;
        Ok(state
            .present
            .iter()
            .filter(|(_, f)| f.parent == Some(*bridge))
            .map(|(addr, _)| *addr)
            .collect())
    }

    fn stop_and_remove(&self, dev: &PciAddress) -> Result<(), ReloadError> {
        let mut state = self.state()?;
        state.function(dev)?;
        let doomed: Vec<PciAddress> = state
            .present
            .keys()
            .filter(|addr| state.is_below(addr, dev))
            .copied()
            .collect();
        for addr in doomed {
            if let Some(function) = state.present.remove(&addr) {
                state.removed.insert(addr, function);
            }
        }
        state.record(SimOp::StopAndRemove(*dev));
        Ok(())
    }

    fn rescan_bridge(&self, bridge: &PciAddress) -> Result<usize, ReloadError> {
        let mut state = self.state()?;
        state.function(bridge)?;
        if state.fail_rescan {
            return Err(injected(bridge, "rescan"));
        }
        state.reinstate(Some(bridge));
        state.record(SimOp::RescanBridge(*bridge));
        Ok(state
            .present
            .values()
            .filter(|f| f.parent == Some(*bridge))
            .count())
    }

    fn rescan_all(&self) -> Result<(), ReloadError> {
        let mut state = self.state()?;
        if state.fail_rescan {
            return Err(injected(&PciAddress::new(0, 0, 0, 0), "rescan"));
        }
        state.reinstate(None);
        state.record(SimOp::RescanAll);
        Ok(())
    }

    fn read_config(
        &self,
        dev: &PciAddress,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<(), ReloadError> {
        let state = self.state()?;
        let function = state.function(dev)?;
        let start = offset as usize;
        let end = start + buf.len();
        if end > function.config.len() {
            return Err(injected(dev, "config read past end"));
        }
        buf.copy_from_slice(&function.config[start..end]);
        Ok(())
    }

    fn write_config(&self, dev: &PciAddress, offset: u16, data: &[u8]) -> Result<(), ReloadError> {
        let mut state = self.state()?;
        if state.failing_writes.contains(&(*dev, offset)) {
            return Err(injected(dev, &format!("config write at {offset:#x}")));
        }
        let function = state.present.get_mut(dev).ok_or_else(|| no_device(dev))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > function.config.len() {
            return Err(injected(dev, "config write past end"));
        }
        function.config[start..end].copy_from_slice(data);
        function.update_link_state();
        state.record(SimOp::ConfigWrite {
            dev: *dev,
            offset,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn claim_slot(&self, bridge: &PciAddress, name: &str) -> Result<(), ReloadError> {
        let mut state = self.state()?;
        if let Some(owner) = state.slots.get(name) {
            return Err(ReloadError::Busy(match owner {
                Some(owner) => format!("slot {name} is already claimed for {owner}"),
                None => format!("slot {name} is driven by another hotplug controller"),
            }));
        }
        state.slots.insert(name.to_string(), Some(*bridge));
        state.record(SimOp::ClaimSlot(name.to_string()));
        Ok(())
    }

    fn release_slot(&self, bridge: &PciAddress, name: &str) {
        if let Ok(mut state) = self.state() {
            if state.slots.get(name) == Some(&Some(*bridge)) {
                state.slots.remove(name);
                state.record(SimOp::ReleaseSlot(name.to_string()));
            }
        }
    }

    fn rescan_remove_lock(&self) -> &RescanRemoveLock {
        &self.rescan_remove
    }
}
