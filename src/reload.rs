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

//! Image reload orchestration.
//!
//! A card driver registers a [`Controller`] for the PCI function that disappears while the
//! BMC reflashes the FPGA. The BMC driver, which usually enumerates later, then binds a
//! [`Trigger`] to it by device ancestry. A reload runs the fixed sequence in
//! [`orchestrator`] under the controller's sequencing lock:
//!
//! 1. stop and remove sibling functions on the target's bus
//! 2. `prepare` the card
//! 3. ask the BMC to load the image
//! 4. take the link down and remove the subtree below the root port
//! 5. wait for the hardware to settle
//! 6. bring the link back and re-enumerate
//!
//! Re-enumeration is attempted whenever the sequence started, whatever step failed.
//!
//! Locking: the registry list lock is only held for lookups and registration, never during
//! a reload. Per controller, the sequencing lock is taken before the field lock.

pub mod aer;
pub mod attrs;
pub mod cancel;
pub mod controller;
pub mod isolation;
pub mod link_control;
pub mod ops;
pub mod orchestrator;
pub mod registry;
pub mod trigger;

pub use controller::{Controller, ReloadState};
pub use ops::{ReloadOps, TriggerOps};
pub use registry::Registry;
pub use trigger::Trigger;

use crate::config;
use crate::error::ReloadError;
use link_control::LinkStrategy;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Knobs applied to every controller a [`Registry`] creates.
#[derive(Debug, Clone, PartialEq)]
pub struct ReloadSettings {
    /// Initial value of the per-controller wait tunable.
    pub default_wait: Duration,
    pub link_strategy: LinkStrategy,
    /// Mask AER on the root port while the link is down.
    pub mask_aer: bool,
    pub power_settle: Duration,
    pub link_timeout: Duration,
}

impl Default for ReloadSettings {
    fn default() -> Self {
        ReloadSettings {
            default_wait: Duration::from_secs(config::DEFAULT_WAIT_SECS),
            link_strategy: LinkStrategy::Auto,
            mask_aer: false,
            power_settle: config::POWER_SETTLE,
            link_timeout: config::LINK_TIMEOUT,
        }
    }
}

pub(crate) fn lock<'a, T>(
    mutex: &'a Mutex<T>,
    what: &str,
) -> Result<MutexGuard<'a, T>, ReloadError> {
    mutex
        .lock()
        .map_err(|e| ReloadError::Internal(format!("Failed to lock {what}: {e}")))
}
