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

use crate::error::ReloadError;
use crate::pci::{DevicePath, PciAddress, PciTopology};
use crate::reload::cancel::CancelToken;
use crate::reload::link_control::{LinkControl, LinkKind};
use crate::reload::ops::{ReloadOps, TriggerOps};
use crate::reload::lock;
use log::{debug, info, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadState {
    Unknown,
    Reloading,
    Done,
    Fail,
}

impl fmt::Display for ReloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReloadState::Unknown => "unknown",
            ReloadState::Reloading => "reloading",
            ReloadState::Done => "done",
            ReloadState::Fail => "fail",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Target {
    pub address: PciAddress,
    pub path: DevicePath,
}

/// The trigger embedded in every controller. Populated when a BMC driver binds to it.
#[derive(Default)]
pub(crate) struct TriggerSlot {
    pub registered: bool,
    pub ops: Option<Arc<dyn TriggerOps>>,
    pub anchor: Option<DevicePath>,
    /// Wait applied after the last trigger: the tunable, or more if the hardware asked.
    pub wait_time: Duration,
}

pub(crate) struct ControllerFields {
    pub registered: bool,
    pub state: ReloadState,
    pub name: String,
    pub ops: Arc<dyn ReloadOps>,
    pub target: Target,
    pub trigger: TriggerSlot,
    /// The `wait_secs` tunable.
    pub wait_time: Duration,
    /// Present while a reload is in flight.
    pub cancel: Option<CancelToken>,
}

/// Reload controller for one root port.
///
/// Created by [`crate::reload::Registry::register_controller`] and shared as
/// `Arc<Controller>`. It stays alive in the registry after unregistration so that a card
/// re-probing on the same port gets the same controller (and hotplug slot) back.
pub struct Controller {
    pub(crate) bridge: PciAddress,
    pub(crate) topology: Arc<dyn PciTopology>,
    pub(crate) link: Box<dyn LinkControl>,
    pub(crate) mask_aer: bool,
    pub(crate) fields: Mutex<ControllerFields>,
    /// Held for a whole reload, and while listing images.
    pub(crate) sequence: Mutex<()>,
}

impl Controller {
    pub(crate) fn new(
        topology: Arc<dyn PciTopology>,
        link: Box<dyn LinkControl>,
        mask_aer: bool,
        fields: ControllerFields,
    ) -> Self {
        Controller {
            bridge: *link.bridge(),
            topology,
            link,
            mask_aer,
            fields: Mutex::new(fields),
            sequence: Mutex::new(()),
        }
    }

    pub(crate) fn fields(&self) -> Result<MutexGuard<'_, ControllerFields>, ReloadError> {
        lock(&self.fields, "controller fields")
    }

    /// The sequencing lock guards no data, so a reload that panicked does not poison it for
    /// the next caller.
    pub(crate) fn sequence(&self) -> MutexGuard<'_, ()> {
        self.sequence.lock().unwrap_or_else(|poisoned| {
            warn!("{}: previous reload panicked", self.bridge);
            self.sequence.clear_poison();
            poisoned.into_inner()
        })
    }

    pub fn bridge(&self) -> PciAddress {
        self.bridge
    }

    pub fn link_kind(&self) -> LinkKind {
        self.link.kind()
    }

    /// Name of the hotplug slot, for controllers driving one.
    pub fn slot_name(&self) -> Option<String> {
        self.link.slot_name().map(str::to_string)
    }

    pub fn name(&self) -> Result<String, ReloadError> {
        Ok(self.fields()?.name.clone())
    }

    pub fn state(&self) -> Result<ReloadState, ReloadError> {
        Ok(self.fields()?.state)
    }

    pub fn target(&self) -> Result<PciAddress, ReloadError> {
        Ok(self.fields()?.target.address)
    }

    pub fn is_registered(&self) -> Result<bool, ReloadError> {
        Ok(self.fields()?.registered)
    }

    pub fn has_trigger(&self) -> Result<bool, ReloadError> {
        Ok(self.fields()?.trigger.registered)
    }

    pub fn wait_time(&self) -> Result<Duration, ReloadError> {
        Ok(self.fields()?.wait_time)
    }

    /// The wait used by the last reload, including any time the BMC asked for.
    pub fn trigger_wait_time(&self) -> Result<Duration, ReloadError> {
        Ok(self.fields()?.trigger.wait_time)
    }

    /// Set the wait tunable. The bound trigger starts from the new value too.
    pub fn set_wait_time(&self, wait: Duration) -> Result<(), ReloadError> {
        let mut fields = self.fields()?;
        debug!("{}: wait time {:?} -> {wait:?}", fields.name, fields.wait_time);
        fields.wait_time = wait;
        fields.trigger.wait_time = wait;
        Ok(())
    }

    /// Cancel the reload in flight, if any. Returns whether there was one.
    ///
    /// A cancelled reload stops at the next step boundary or wakes from its settle wait,
    /// then restores the link and re-enumerates like any other failure.
    pub fn cancel(&self) -> Result<bool, ReloadError> {
        let fields = self.fields()?;
        match &fields.cancel {
            Some(token) => {
                info!("{}: cancelling reload", fields.name);
                token.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Ask the bound trigger which images it can load. Waits for any reload in flight.
    pub fn available_images(&self) -> Result<String, ReloadError> {
        let _sequence = self.sequence();
        let trigger = {
            let fields = self.fields()?;
            match (&fields.trigger.ops, fields.trigger.registered) {
                (Some(ops), true) => ops.clone(),
                _ => {
                    return Err(ReloadError::InvalidState(format!(
                        "{} has no registered trigger",
                        fields.name
                    )));
                }
            }
        };
        trigger
            .available_images()
            .map_err(|source| ReloadError::TriggerFailed {
                image: String::new(),
                source,
            })
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("bridge", &self.bridge)
            .field("link", &self.link.kind())
            .field("mask_aer", &self.mask_aer)
            .finish_non_exhaustive()
    }
}
