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

//! Error Wrapping File System I/O Helpers
//!
//! Thin wrappers around the standard file system calls used against sysfs, with trace
//! logging and conversion to [`ReloadError`] carrying the offending path.
//!
//! Includes: whole-file read and write, positioned reads and writes (PCI config space),
//! directory listing and symlink resolution.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use fpgareload::system_io::{fs_read, fs_write};
//! # use std::path::Path;
//! # fn example() -> Result<(), fpgareload::error::ReloadError> {
//! let images = fs_read(Path::new("/sys/bus/platform/devices/n3000bmc-sec-update.1.auto/control/available_images"))?;
//! fs_write(Path::new("/sys/bus/pci/rescan"), false, "1")?;
//! # Ok(())
//! # }
//! ```

use crate::error::ReloadError;
use log::trace;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// Read the contents of a file to a String.
///
/// # Returns: `Result<String, ReloadError>`
/// * `Ok(String)` - The complete contents of the file
/// * `Err(ReloadError::IORead)` - If the file cannot be read
pub fn fs_read(file_path: &Path) -> Result<String, ReloadError> {
    trace!("Attempting to read from {file_path:?}");
    let mut buf: String = String::new();
    let result = OpenOptions::new()
        .read(true)
        .open(file_path)
        .and_then(|mut f| f.read_to_string(&mut buf));

    match result {
        Ok(_) => {
            trace!("Reading done");
            Ok(buf)
        }
        Err(e) => Err(ReloadError::IORead {
            file: file_path.into(),
            e,
        }),
    }
}

/// Write a string value to a file.
///
/// # Arguments
///
/// * `file_path` - Path to the file to write
/// * `create` - If `true`, create the file if it doesn't exist; if `false`, file must already exist
/// * `value` - The string value to write
///
/// # Returns: `Result<(), ReloadError>`
/// * `Ok(())` - Write succeeded
/// * `Err(ReloadError::IOWrite)` - If the write fails
pub fn fs_write(file_path: &Path, create: bool, value: impl AsRef<str>) -> Result<(), ReloadError> {
    trace!(
        "Attempting to write {:?} to {:?}",
        value.as_ref(),
        file_path
    );
    let result = OpenOptions::new()
        .create(create)
        .read(false)
        .write(true)
        .open(file_path)
        .and_then(|mut f| write!(f, "{}", value.as_ref()));
    match result {
        Ok(_) => {
            trace!("Write done.");
            Ok(())
        }
        Err(e) => Err(ReloadError::IOWrite {
            data: value.as_ref().to_string(),
            file: file_path.into(),
            e,
        }),
    }
}

/// Fill `buf` from `file_path` starting at byte `offset`.
///
/// Used for PCI config space, where sysfs exposes the registers as a flat `config` file and
/// accesses must hit the exact register offset and width.
pub fn fs_read_at(file_path: &Path, offset: u64, buf: &mut [u8]) -> Result<(), ReloadError> {
    trace!(
        "Attempting to read {} bytes at {offset:#x} from {file_path:?}",
        buf.len()
    );
    OpenOptions::new()
        .read(true)
        .open(file_path)
        .and_then(|f| f.read_exact_at(buf, offset))
        .map_err(|e| ReloadError::IORead {
            file: file_path.into(),
            e,
        })
}

/// Write `data` to `file_path` at byte `offset` without truncating the file.
pub fn fs_write_at(file_path: &Path, offset: u64, data: &[u8]) -> Result<(), ReloadError> {
    trace!("Attempting to write {data:02x?} at {offset:#x} to {file_path:?}");
    OpenOptions::new()
        .write(true)
        .open(file_path)
        .and_then(|f| f.write_all_at(data, offset))
        .map_err(|e| ReloadError::IOWrite {
            data: format!("{data:02x?}"),
            file: file_path.into(),
            e,
        })
}

/// Read the contents of a directory and return entry names.
///
/// Entries that cannot be read are silently skipped.
///
/// # Returns: `Result<Vec<String>, ReloadError>`
/// * `Ok(Vec<String>)` - Entry names (not full paths)
/// * `Err(ReloadError::IOReadDir)` - If the directory cannot be read
pub fn fs_read_dir(dir: &Path) -> Result<Vec<String>, ReloadError> {
    trace!("Attempting to read directory '{dir:?}'");
    std::fs::read_dir(dir).map_or_else(
        |e| {
            Err(ReloadError::IOReadDir {
                dir: dir.to_owned(),
                e,
            })
        },
        |iter| {
            let ret = iter
                .filter_map(Result::ok)
                .map(|entry| entry.file_name().to_string_lossy().into_owned())
                .collect();
            trace!("Dir reading done.");
            Ok(ret)
        },
    )
}

/// Resolve every symlink in `path`.
///
/// sysfs exposes the same device under several class and bus directories; the canonical
/// path below `/sys/devices` is the only one that encodes the device's ancestry.
pub fn fs_canonicalize(path: &Path) -> Result<PathBuf, ReloadError> {
    trace!("Attempting to canonicalize {path:?}");
    std::fs::canonicalize(path).map_err(|e| ReloadError::IORead {
        file: path.into(),
        e,
    })
}
