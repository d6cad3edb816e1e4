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
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// One-shot cancellation flag shared between a running reload and whoever may cancel it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;
        if let Ok(mut cancelled) = flag.lock() {
            *cancelled = true;
            cvar.notify_all();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.0.lock().map(|c| *c).unwrap_or(true)
    }

    /// Sleep for `timeout` unless cancelled first. Returns `true` if cancelled.
    pub fn wait_for(&self, timeout: Duration) -> Result<bool, ReloadError> {
        let (flag, cvar) = &*self.inner;
        let guard = flag
            .lock()
            .map_err(|e| ReloadError::Internal(format!("Failed to lock cancel flag: {e}")))?;
        let (cancelled, _) = cvar
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .map_err(|e| ReloadError::Internal(format!("Failed to wait on cancel flag: {e}")))?;
        Ok(*cancelled)
    }
}
