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

//! The set of reload controllers, one per root port.
//!
//! # Examples
//!
//! ```rust
//! use fpgareload::error::DriverError;
//! use fpgareload::pci::sim::{RootPortOptions, SimPci};
//! use fpgareload::pci::{PciAddress, PciTopology};
//! use fpgareload::reload::{Registry, ReloadOps, ReloadSettings};
//! use std::sync::Arc;
//!
//! struct Card;
//! impl ReloadOps for Card {
//!     fn prepare(&self, _target: &PciAddress) -> Result<(), DriverError> {
//!         Ok(())
//!     }
//! }
//!
//! let root = PciAddress::new(0, 0, 0x1c, 0);
//! let fpga = PciAddress::new(0, 1, 0, 0);
//! let topology: Arc<dyn PciTopology> = Arc::new(
//!     SimPci::new()
//!         .with_root_port(root, RootPortOptions::default())
//!         .with_function(fpga, root),
//! );
//! let registry = Registry::new(topology, ReloadSettings::default());
//! let controller = registry.register_controller(&fpga, Arc::new(Card), "n3000").unwrap();
//! assert_eq!(controller.bridge(), root);
//! ```

use crate::error::ReloadError;
use crate::pci::topology::find_root_port;
use crate::pci::{DevicePath, PciAddress, PciTopology};
use crate::reload::controller::{Controller, ControllerFields, ReloadState, Target, TriggerSlot};
use crate::reload::link_control;
use crate::reload::ops::{ReloadOps, TriggerOps};
use crate::reload::trigger::{Trigger, anchored_to};
use crate::reload::{ReloadSettings, lock};
use log::{debug, info};
use std::sync::{Arc, Mutex};

fn same_ops<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

pub struct Registry {
    topology: Arc<dyn PciTopology>,
    settings: ReloadSettings,
    controllers: Mutex<Vec<Arc<Controller>>>,
}

impl Registry {
    pub fn new(topology: Arc<dyn PciTopology>, settings: ReloadSettings) -> Self {
        Registry {
            topology,
            settings,
            controllers: Mutex::new(Vec::new()),
        }
    }

    pub fn topology(&self) -> &Arc<dyn PciTopology> {
        &self.topology
    }

    pub fn settings(&self) -> &ReloadSettings {
        &self.settings
    }

    /// Register the card driver of `target`.
    ///
    /// Registering the same target and ops again returns the existing controller. An
    /// unregistered controller on the same root port is reclaimed and rebound to the new
    /// target. Otherwise a new controller is created, claiming the hotplug slot if the port
    /// is driven as one.
    pub fn register_controller(
        &self,
        target: &PciAddress,
        ops: Arc<dyn ReloadOps>,
        name: &str,
    ) -> Result<Arc<Controller>, ReloadError> {
        if name.is_empty() {
            return Err(ReloadError::InvalidArgument(
                "a reload controller needs a name".into(),
            ));
        }
        if !self.topology.exists(target) {
            return Err(ReloadError::InvalidArgument(format!(
                "{target} is not a PCI device"
            )));
        }
        let path = self.topology.device_path(target)?;
        let bridge = find_root_port(self.topology.as_ref(), target)?;

        let mut controllers = lock(&self.controllers, "controller registry")?;

        for controller in controllers.iter().filter(|c| c.bridge == bridge) {
            let fields = controller.fields()?;
            if !fields.registered {
                continue;
            }
            if fields.target.address == *target && same_ops(&fields.ops, &ops) {
                debug!("{name}: already registered on {bridge}");
                return Ok(controller.clone());
            }
            return Err(ReloadError::Busy(format!(
                "{bridge} is already controlled by {}",
                fields.name
            )));
        }

        if let Some(controller) = controllers
            .iter()
            .find(|c| c.bridge == bridge && c.fields().is_ok_and(|f| !f.registered))
        {
            let mut fields = controller.fields()?;
            info!(
                "{name}: reclaiming controller on {bridge} (was {})",
                fields.name
            );
            fields.registered = true;
            fields.state = ReloadState::Unknown;
            fields.name = name.to_string();
            fields.ops = ops;
            fields.target = Target {
                address: *target,
                path,
            };
            return Ok(controller.clone());
        }

        let link = link_control::select(&self.topology, &bridge, &self.settings)?;
        let controller = Arc::new(Controller::new(
            self.topology.clone(),
            link,
            self.settings.mask_aer,
            ControllerFields {
                registered: true,
                state: ReloadState::Unknown,
                name: name.to_string(),
                ops,
                target: Target {
                    address: *target,
                    path,
                },
                trigger: TriggerSlot::default(),
                wait_time: self.settings.default_wait,
                cancel: None,
            },
        ));
        info!(
            "{name}: registered reload controller for {target} on {bridge} ({})",
            controller.link_kind()
        );
        controllers.push(controller.clone());
        Ok(controller)
    }

    /// Mark the controller unregistered. It stays in the registry to be reclaimed.
    pub fn unregister_controller(&self, controller: &Controller) -> Result<(), ReloadError> {
        let mut fields = controller.fields()?;
        info!("{}: unregistered", fields.name);
        fields.registered = false;
        Ok(())
    }

    /// Bind a BMC trigger to the registered controller whose target the anchor belongs to.
    pub fn register_trigger(
        &self,
        ops: Arc<dyn TriggerOps>,
        anchor: &DevicePath,
    ) -> Result<Trigger, ReloadError> {
        let controllers = lock(&self.controllers, "controller registry")?;
        for controller in controllers.iter() {
            let mut fields = controller.fields()?;
            if !fields.registered || !anchored_to(&fields.target, anchor) {
                continue;
            }
            if fields.trigger.registered {
                let same = fields
                    .trigger
                    .ops
                    .as_ref()
                    .is_some_and(|existing| same_ops(existing, &ops));
                if !same {
                    return Err(ReloadError::Busy(format!(
                        "{} already has a trigger",
                        fields.name
                    )));
                }
            }
            fields.trigger = TriggerSlot {
                registered: true,
                ops: Some(ops),
                anchor: Some(anchor.clone()),
                wait_time: fields.wait_time,
            };
            info!("{}: trigger registered at {anchor}", fields.name);
            return Ok(Trigger {
                controller: controller.clone(),
            });
        }
        Err(ReloadError::InvalidArgument(format!(
            "no reload controller owns {anchor}"
        )))
    }

    pub fn unregister_trigger(&self, trigger: &Trigger) -> Result<(), ReloadError> {
        let mut fields = trigger.controller.fields()?;
        info!("{}: trigger unregistered", fields.name);
        fields.trigger.registered = false;
        fields.trigger.ops = None;
        fields.trigger.anchor = None;
        Ok(())
    }

    /// Every controller, registered or not.
    pub fn controllers(&self) -> Result<Vec<Arc<Controller>>, ReloadError> {
        Ok(lock(&self.controllers, "controller registry")?.clone())
    }

    /// The registered controller called `name`.
    pub fn find(&self, name: &str) -> Result<Option<Arc<Controller>>, ReloadError> {
        let controllers = lock(&self.controllers, "controller registry")?;
        for controller in controllers.iter() {
            let fields = controller.fields()?;
            if fields.registered && fields.name == name {
                return Ok(Some(controller.clone()));
            }
        }
        Ok(None)
    }

    /// Drop every controller and release its slot. Reloads in flight are not waited for;
    /// they keep their `Arc<Controller>` until they finish.
    pub fn teardown_all(&self) {
        let drained: Vec<Arc<Controller>> = match self.controllers.lock() {
            Ok(mut controllers) => controllers.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for controller in drained {
            debug!("Tearing down controller on {}", controller.bridge);
            controller.link.release();
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.teardown_all();
    }
}
