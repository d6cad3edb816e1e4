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

use zbus::{Result, proxy};

#[proxy(
    default_service = "com.canonical.fpgareload",
    interface = "com.canonical.fpgareload.control",
    default_path = "/com/canonical/fpgareload/control"
)]
pub trait Control {
    async fn image_reload(&self, controller_name: &str, image: &str) -> Result<String>;
    async fn cancel_reload(&self, controller_name: &str) -> Result<String>;
    async fn set_wait_secs(&self, controller_name: &str, secs: u32) -> Result<String>;
}
