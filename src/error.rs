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

//! Error types shared by the reload core, the PCI backends and the DBus layer.
//!
//! [`ReloadError`] is the crate-wide error. Every variant maps to a negative Linux errno via
//! [`ReloadError::errno`] so that the control plane can keep the conventional "byte count or
//! negative error code" contract of a synchronous attribute write.
//!
//! [`DriverError`] is what the card driver and BMC trigger callbacks return. It carries the
//! driver's own errno which is propagated unchanged to the caller of a reload.

use log::error;
use std::path::PathBuf;
use zbus::fdo;

/// Linux errno values used by this crate (positive, as in `errno.h`).
pub mod errno {
    pub const EIO: i32 = 5;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const ENODEV: i32 = 19;
    pub const EINVAL: i32 = 22;
    pub const ETIMEDOUT: i32 = 110;
    pub const ECANCELED: i32 = 125;
}

/// Error reported by a card driver or BMC trigger callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{msg} (errno {code})")]
pub struct DriverError {
    pub code: i32,
    pub msg: String,
}

impl DriverError {
    pub fn new(code: i32, msg: impl Into<String>) -> Self {
        DriverError {
            code,
            msg: msg.into(),
        }
    }

    /// A driver error with nothing more to say than its errno.
    pub fn from_errno(code: i32) -> Self {
        DriverError::new(code, format!("driver callback returned {code}"))
    }

    /// The errno as a negative value, whatever sign the driver used.
    pub fn errno(&self) -> i32 {
        -self.code.abs()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("ReloadError::InvalidArgument: {0}")]
    InvalidArgument(String),
    #[error("ReloadError::InvalidState: {0}")]
    InvalidState(String),
    #[error("ReloadError::PrepareFailed: card driver could not prepare {target}: {source}")]
    PrepareFailed { target: String, source: DriverError },
    #[error("ReloadError::TriggerFailed: BMC did not start loading {image:?}: {source}")]
    TriggerFailed { image: String, source: DriverError },
    #[error("ReloadError::LinkControl: {op} on {bridge} failed: {reason}")]
    LinkControl {
        bridge: String,
        op: &'static str,
        code: i32,
        reason: String,
    },
    #[error("ReloadError::RescanFailed: re-enumeration below {bridge} failed: {reason}")]
    RescanFailed {
        bridge: String,
        code: i32,
        reason: String,
    },
    #[error("ReloadError::Busy: {0}")]
    Busy(String),
    #[error("ReloadError::Cancelled: reload of {0} was cancelled")]
    Cancelled(String),
    #[error("ReloadError::IORead: An IO error occurred when reading from {file:?}: {e}")]
    IORead { file: PathBuf, e: std::io::Error },
    #[error("ReloadError::IOWrite: An IO error occurred when writing {data:?} to {file:?}: {e}")]
    IOWrite {
        data: String,
        file: PathBuf,
        e: std::io::Error,
    },
    #[error("ReloadError::IOReadDir: An IO error occurred when reading directory {dir:?}: {e}")]
    IOReadDir { dir: PathBuf, e: std::io::Error },
    #[error("ReloadError::TomlDe: Failed to parse config {toml_string:?}: {e}")]
    TomlDe {
        toml_string: String,
        e: toml::de::Error,
    },
    #[error("ReloadError::Internal: An Internal error occurred: {0}")]
    Internal(String),
}

fn io_errno(e: &std::io::Error) -> i32 {
    -e.raw_os_error().unwrap_or(errno::EIO).abs()
}

impl ReloadError {
    /// The negative errno a synchronous control-plane write would return for this error.
    pub fn errno(&self) -> i32 {
        match self {
            ReloadError::InvalidArgument(..)
            | ReloadError::InvalidState(..)
            | ReloadError::TomlDe { .. } => -errno::EINVAL,
            ReloadError::PrepareFailed { source, .. } => source.errno(),
            ReloadError::TriggerFailed { source, .. } => source.errno(),
            ReloadError::LinkControl { code, .. } => -code.abs(),
            ReloadError::RescanFailed { code, .. } => -code.abs(),
            ReloadError::Busy(..) => -errno::EBUSY,
            ReloadError::Cancelled(..) => -errno::ECANCELED,
            ReloadError::IORead { e, .. } => io_errno(e),
            ReloadError::IOWrite { e, .. } => io_errno(e),
            ReloadError::IOReadDir { e, .. } => io_errno(e),
            ReloadError::Internal(..) => -errno::EIO,
        }
    }

    /// Wrap any error raised while driving the link or slot of `bridge`.
    pub(crate) fn link_control(bridge: impl ToString, op: &'static str, cause: ReloadError) -> Self {
        match cause {
            already @ ReloadError::LinkControl { .. } => already,
            other => ReloadError::LinkControl {
                bridge: bridge.to_string(),
                op,
                code: -other.errno(),
                reason: other.to_string(),
            },
        }
    }

    /// Wrap any error raised while re-enumerating below `bridge`.
    pub(crate) fn rescan(bridge: impl ToString, cause: ReloadError) -> Self {
        match cause {
            already @ ReloadError::RescanFailed { .. } => already,
            other => ReloadError::RescanFailed {
                bridge: bridge.to_string(),
                code: -other.errno(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<ReloadError> for fdo::Error {
    fn from(err: ReloadError) -> Self {
        error!("{err}");
        match err {
            ReloadError::InvalidArgument(..) => fdo::Error::InvalidArgs(err.to_string()),
            ReloadError::IORead { .. } => fdo::Error::IOError(err.to_string()),
            ReloadError::IOWrite { .. } => fdo::Error::IOError(err.to_string()),
            ReloadError::IOReadDir { .. } => fdo::Error::IOError(err.to_string()),
            _ => fdo::Error::Failed(err.to_string()),
        }
    }
}
