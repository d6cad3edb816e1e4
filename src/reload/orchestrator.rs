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

//! The reload sequence.
//!
//! Once [`Controller::reload`] has passed its entry checks, a [`Restore`] guard is armed.
//! Whatever happens afterwards, including a panic in a driver callback, the guard brings a
//! disabled link back up, re-enumerates below the root port and restores AER masks.

use crate::error::ReloadError;
use crate::pci::PciAddress;
use crate::reload::aer::AerMask;
use crate::reload::cancel::CancelToken;
use crate::reload::controller::{Controller, ReloadState};
use crate::reload::isolation::isolate_siblings;
use crate::reload::ops::{ReloadOps, TriggerOps};
use log::{error, info, warn};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

/// What a reload needs, copied out of the controller fields at entry.
struct Plan {
    name: String,
    target: PciAddress,
    ops: Arc<dyn ReloadOps>,
    trigger: Arc<dyn TriggerOps>,
    wait: Duration,
    cancel: CancelToken,
}

struct Restore<'a> {
    controller: &'a Controller,
    name: &'a str,
    link_down: bool,
    aer: Option<AerMask>,
    finished: bool,
}

impl<'a> Restore<'a> {
    fn new(controller: &'a Controller, name: &'a str) -> Self {
        Restore {
            controller,
            name,
            link_down: false,
            aer: None,
            finished: false,
        }
    }

    /// Runs once. Returns the result of the rescan.
    fn finish(&mut self) -> Result<(), ReloadError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let link = &self.controller.link;
        if self.link_down {
            info!("{}: re-enabling link on {}", self.name, link.bridge());
            if let Err(e) = link.enable_link() {
                warn!("{}: could not re-enable link: {e}", self.name);
            }
            self.link_down = false;
        }
        info!("{}: re-enumerating below {}", self.name, link.bridge());
        let rescan = link.rescan();
        if let Some(aer) = self.aer.take() {
            if let Err(e) = aer.restore(self.controller.topology.as_ref()) {
                warn!("{}: could not restore AER masks: {e}", self.name);
            }
        }
        rescan
    }
}

impl Drop for Restore<'_> {
    /// Only reached without `finish` when a step unwound, so the reload counts as failed.
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.finish() {
            warn!("{}: rescan during unwind failed: {e}", self.name);
        }
        let mut fields = self
            .controller
            .fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        fields.cancel = None;
        fields.state = ReloadState::Fail;
        error!("{}: reload aborted by a panic", self.name);
    }
}

impl Controller {
    /// Reload the FPGA with `image` and bring the card back.
    ///
    /// Blocks for the whole sequence, including the settle wait. Only one reload runs per
    /// controller; a second caller waits for the first to finish.
    pub fn reload(&self, image: &str) -> Result<(), ReloadError> {
        if image.is_empty() {
            return Err(ReloadError::InvalidArgument("no image given".into()));
        }
        let _sequence = self.sequence();
        let plan = self.begin()?;
        info!(
            "{}: reloading {} with image {image:?}",
            plan.name, plan.target
        );

        let mut restore = Restore::new(self, &plan.name);
        let steps = self.run_steps(&plan, image, &mut restore);
        let rescan = restore.finish();
        drop(restore);

        let result = match (steps, rescan) {
            (Ok(()), Ok(())) => Ok(()),
            (Ok(()), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(rescan)) => {
                warn!("{}: rescan after failed reload also failed: {rescan}", plan.name);
                Err(e)
            }
        };
        self.end(&plan.name, &result)?;
        result
    }

    /// Entry checks, then mark the controller reloading. Nothing is touched on failure.
    fn begin(&self) -> Result<Plan, ReloadError> {
        let mut fields = self.fields()?;
        if !fields.registered {
            return Err(ReloadError::InvalidState(format!(
                "{} is not registered",
                fields.name
            )));
        }
        let trigger = match (&fields.trigger.ops, fields.trigger.registered) {
            (Some(ops), true) => ops.clone(),
            _ => {
                return Err(ReloadError::InvalidState(format!(
                    "{} has no registered trigger",
                    fields.name
                )));
            }
        };
        let cancel = CancelToken::new();
        fields.state = ReloadState::Reloading;
        fields.cancel = Some(cancel.clone());
        Ok(Plan {
            name: fields.name.clone(),
            target: fields.target.address,
            ops: fields.ops.clone(),
            trigger,
            wait: fields.wait_time,
            cancel,
        })
    }

    fn checkpoint(&self, plan: &Plan) -> Result<(), ReloadError> {
        if plan.cancel.is_cancelled() {
            return Err(ReloadError::Cancelled(plan.name.clone()));
        }
        Ok(())
    }

    fn run_steps(
        &self,
        plan: &Plan,
        image: &str,
        restore: &mut Restore<'_>,
    ) -> Result<(), ReloadError> {
        self.checkpoint(plan)?;
        let removed = isolate_siblings(self.topology.as_ref(), &plan.target)?;
        info!("{}: removed {removed} sibling function(s)", plan.name);

        self.checkpoint(plan)?;
        plan.ops
            .prepare(&plan.target)
            .map_err(|source| ReloadError::PrepareFailed {
                target: plan.target.to_string(),
                source,
            })?;
        info!("{}: card prepared", plan.name);

        self.checkpoint(plan)?;
        let reported =
            plan.trigger
                .image_trigger(image)
                .map_err(|source| ReloadError::TriggerFailed {
                    image: image.to_string(),
                    source,
                })?;
        let wait = reported.map_or(plan.wait, |reported| reported.max(plan.wait));
        self.fields()?.trigger.wait_time = wait;
        info!("{}: BMC loading {image:?}, settle time {wait:?}", plan.name);

        if self.mask_aer {
            restore.aer = AerMask::mask(self.topology.as_ref(), &self.bridge)?;
        }

        restore.link_down = true;
        self.link
            .disable_link()
            .map_err(|e| ReloadError::link_control(self.bridge, "disable link", e))?;
        self.link
            .remove_subtree()
            .map_err(|e| ReloadError::link_control(self.bridge, "remove subtree", e))?;

        if plan.cancel.wait_for(wait)? {
            return Err(ReloadError::Cancelled(plan.name.clone()));
        }

        restore.link_down = false;
        self.link
            .enable_link()
            .map_err(|e| ReloadError::link_control(self.bridge, "enable link", e))
    }

    fn end(&self, name: &str, result: &Result<(), ReloadError>) -> Result<(), ReloadError> {
        let mut fields = self.fields()?;
        fields.cancel = None;
        fields.state = match result {
            Ok(()) => {
                info!("{name}: reload done");
                ReloadState::Done
            }
            Err(e) => {
                error!("{name}: reload failed: {e}");
                ReloadState::Fail
            }
        };
        Ok(())
    }
}
