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

//! Text attributes of a controller, in the show/store form a control file would expose.
//!
//! Stores take the raw buffer written by the user and return the number of bytes consumed.
//! A trailing newline is accepted, as `echo` adds one.

use crate::error::ReloadError;
use crate::reload::controller::Controller;
use std::time::Duration;

fn trimmed(buf: &str) -> &str {
    buf.strip_suffix('\n').unwrap_or(buf)
}

/// Reload with the image named in `buf`. Blocks until the reload finished.
pub fn image_reload_store(controller: &Controller, buf: &str) -> Result<usize, ReloadError> {
    let image = trimmed(buf);
    if image.is_empty() {
        return Err(ReloadError::InvalidArgument("empty image name".into()));
    }
    controller.reload(image)?;
    Ok(buf.len())
}

pub fn available_images_show(controller: &Controller) -> Result<String, ReloadError> {
    let mut images = controller.available_images()?;
    if !images.ends_with('\n') {
        images.push('\n');
    }
    Ok(images)
}

pub fn state_show(controller: &Controller) -> Result<String, ReloadError> {
    Ok(format!("{}\n", controller.state()?))
}

pub fn name_show(controller: &Controller) -> Result<String, ReloadError> {
    Ok(format!("{}\n", controller.name()?))
}

pub fn wait_secs_show(controller: &Controller) -> Result<String, ReloadError> {
    Ok(format!("{}\n", controller.wait_time()?.as_secs()))
}

pub fn wait_secs_store(controller: &Controller, buf: &str) -> Result<usize, ReloadError> {
    let secs = trimmed(buf)
        .trim()
        .parse::<u64>()
        .map_err(|e| ReloadError::InvalidArgument(format!("bad wait_secs {buf:?}: {e}")))?;
    controller.set_wait_time(Duration::from_secs(secs))?;
    Ok(buf.len())
}
