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

//! TOML configuration for the daemon.
//!
//! Two files are read: the vendor file shipped with the package and the user file in `/etc`.
//! Both are optional. Values are merged field by field with the user file taking precedence;
//! anything still unset falls back to the constants in [`crate::config`].
//!
//! ```toml
//! [system_paths]
//! pci_devices_dir = "/sys/bus/pci/devices/"
//!
//! [reload]
//! wait_secs = 12
//! link_strategy = "raw_link"
//! mask_aer = true
//!
//! [[card]]
//! target = "0000:01:00.0"
//! name = "n3000"
//! bmc_control = "/sys/bus/platform/devices/n3000bmc-sec-update.1.auto/control"
//! unbind = ["dfl-fme", "dfl-port"]
//! ```

use crate::config;
use crate::error::ReloadError;
use crate::pci::sysfs::SysfsPaths;
use crate::reload::ReloadSettings;
use crate::reload::link_control::LinkStrategy;
use crate::system_io::fs_read;
use log::{debug, trace};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// This is the top level struct which holds all sections
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct TomlConfig {
    system_paths: Option<SystemPaths>,
    reload: Option<ReloadSection>,
    card: Option<Vec<CardConfig>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct SystemPaths {
    pci_devices_dir: Option<PathBuf>,
    pci_rescan_path: Option<PathBuf>,
    pci_slots_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct ReloadSection {
    wait_secs: Option<u64>,
    link_strategy: Option<LinkStrategy>,
    mask_aer: Option<bool>,
    power_settle_ms: Option<u64>,
}

/// One card managed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CardConfig {
    /// PCI address of the FPGA function that disappears during a reload.
    pub target: String,
    /// Label reported by `name_show` and used by the DBus interfaces.
    pub name: String,
    /// BMC sec-update control directory holding `available_images` and `image_load`.
    pub bmc_control: PathBuf,
    /// Drivers to release from the target's sub-devices before triggering.
    #[serde(default)]
    pub unbind: Vec<String>,
}

/// Fully resolved daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub sysfs: SysfsPaths,
    pub settings: ReloadSettings,
    pub cards: Vec<CardConfig>,
}

impl SystemPaths {
    fn merge(self, fallback: SystemPaths) -> SystemPaths {
        SystemPaths {
            pci_devices_dir: self.pci_devices_dir.or(fallback.pci_devices_dir),
            pci_rescan_path: self.pci_rescan_path.or(fallback.pci_rescan_path),
            pci_slots_dir: self.pci_slots_dir.or(fallback.pci_slots_dir),
        }
    }
}

impl From<SystemPaths> for SysfsPaths {
    fn from(value: SystemPaths) -> Self {
        trace!("Resolving sysfs paths from {value:?}");
        SysfsPaths {
            devices_dir: value.pci_devices_dir.unwrap_or_else(|| {
                trace!("No pci_devices_dir provided. Using hardcoded value.");
                config::PCI_DEVICES_DIR.into()
            }),
            rescan_path: value.pci_rescan_path.unwrap_or_else(|| {
                trace!("No pci_rescan_path provided. Using hardcoded value.");
                config::PCI_RESCAN_PATH.into()
            }),
            slots_dir: value.pci_slots_dir.unwrap_or_else(|| {
                trace!("No pci_slots_dir provided. Using hardcoded value.");
                config::PCI_SLOTS_DIR.into()
            }),
        }
    }
}

impl ReloadSection {
    fn merge(self, fallback: ReloadSection) -> ReloadSection {
        ReloadSection {
            wait_secs: self.wait_secs.or(fallback.wait_secs),
            link_strategy: self.link_strategy.or(fallback.link_strategy),
            mask_aer: self.mask_aer.or(fallback.mask_aer),
            power_settle_ms: self.power_settle_ms.or(fallback.power_settle_ms),
        }
    }
}

impl From<ReloadSection> for ReloadSettings {
    fn from(value: ReloadSection) -> Self {
        let defaults = ReloadSettings::default();
        ReloadSettings {
            default_wait: value
                .wait_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_wait),
            link_strategy: value.link_strategy.unwrap_or(defaults.link_strategy),
            mask_aer: value.mask_aer.unwrap_or(defaults.mask_aer),
            power_settle: value
                .power_settle_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.power_settle),
            link_timeout: defaults.link_timeout,
        }
    }
}

impl TomlConfig {
    /// Combine two files, keeping every value `self` sets. A `[[card]]` list is taken whole
    /// from whichever file defines one, user first.
    pub(crate) fn merge(self, fallback: TomlConfig) -> TomlConfig {
        TomlConfig {
            system_paths: Some(
                self.system_paths
                    .unwrap_or_default()
                    .merge(fallback.system_paths.unwrap_or_default()),
            ),
            reload: Some(
                self.reload
                    .unwrap_or_default()
                    .merge(fallback.reload.unwrap_or_default()),
            ),
            card: self.card.or(fallback.card),
        }
    }

    pub(crate) fn resolve(self) -> DaemonConfig {
        DaemonConfig {
            sysfs: self.system_paths.unwrap_or_default().into(),
            settings: self.reload.unwrap_or_default().into(),
            cards: self.card.unwrap_or_default(),
        }
    }
}

pub(crate) fn toml_str_to_config(toml_string: &str) -> Result<TomlConfig, ReloadError> {
    let config: TomlConfig = match toml::from_str(toml_string) {
        Ok(config) => config,
        Err(e) => {
            return Err(ReloadError::TomlDe {
                toml_string: toml_string.into(),
                e,
            });
        }
    };
    Ok(config)
}

fn config_from_file(file_path: &Path) -> Result<TomlConfig, ReloadError> {
    if !file_path.is_file() {
        debug!("Config file not found in {file_path:?}. Skipping.");
        return Ok(TomlConfig::default());
    }
    toml_str_to_config(&fs_read(file_path)?)
}

/// Load and merge the vendor and user config files.
///
/// A missing file contributes nothing. A file that exists but does not parse is an error,
/// so a typo in `/etc` never silently falls back to defaults.
pub fn load_config(vendor: &Path, user: &Path) -> Result<DaemonConfig, ReloadError> {
    let vendor_config = config_from_file(vendor)?;
    let user_config = config_from_file(user)?;
    let config = user_config.merge(vendor_config).resolve();
    trace!("Resolved config: {config:?}");
    Ok(config)
}
