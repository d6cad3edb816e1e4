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

//! DBus proxy interfaces for the fpgareload daemon.
//!
//! # DBus Service Information
//!
//! - **Service Name**: `com.canonical.fpgareload`
//! - **Control Interface**: `com.canonical.fpgareload.control` at `/com/canonical/fpgareload/control`
//! - **Status Interface**: `com.canonical.fpgareload.status` at `/com/canonical/fpgareload/status`

pub mod control_proxy;
pub mod status_proxy;

use zbus::Connection;

/// The system bus, or the session bus when testing against a daemon started with `--session`.
pub async fn connect(session: bool) -> Result<Connection, zbus::Error> {
    if session {
        Connection::session().await
    } else {
        Connection::system().await
    }
}
