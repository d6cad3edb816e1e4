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

//! Configuration space layout, named after the Linux `pci_regs.h` definitions.

pub const PCI_CFG_SPACE_SIZE: u16 = 0x100;
pub const PCI_CFG_SPACE_EXP_SIZE: u16 = 0x1000;

pub const PCI_VENDOR_ID: u16 = 0x00;
pub const PCI_COMMAND: u16 = 0x04;
pub const PCI_COMMAND_MEMORY: u16 = 0x0002;
pub const PCI_COMMAND_MASTER: u16 = 0x0004;
pub const PCI_COMMAND_SERR: u16 = 0x0100;
pub const PCI_COMMAND_INTX_DISABLE: u16 = 0x0400;

pub const PCI_STATUS: u16 = 0x06;
pub const PCI_STATUS_CAP_LIST: u16 = 0x0010;

pub const PCI_CAPABILITY_LIST: u16 = 0x34;
pub const PCI_CAP_LIST_ID: u16 = 0;
pub const PCI_CAP_LIST_NEXT: u16 = 1;
pub const PCI_CAP_ID_EXP: u8 = 0x10;

/// Offsets below are relative to the PCI Express capability.
pub const PCI_EXP_FLAGS: u16 = 0x02;
pub const PCI_EXP_FLAGS_TYPE: u16 = 0x00f0;
pub const PCI_EXP_FLAGS_SLOT: u16 = 0x0100;
pub const PCI_EXP_TYPE_ENDPOINT: u8 = 0x0;
pub const PCI_EXP_TYPE_ROOT_PORT: u8 = 0x4;
pub const PCI_EXP_TYPE_DOWNSTREAM: u8 = 0x6;

pub const PCI_EXP_LNKCTL: u16 = 0x10;
pub const PCI_EXP_LNKCTL_LD: u16 = 0x0010;
pub const PCI_EXP_LNKSTA: u16 = 0x12;
pub const PCI_EXP_LNKSTA_DLLLA: u16 = 0x2000;

pub const PCI_EXP_SLTCAP: u16 = 0x14;
pub const PCI_EXP_SLTCAP_PCP: u32 = 0x0000_0002;
pub const PCI_EXP_SLTCAP_HPC: u32 = 0x0000_0040;
pub const PCI_EXP_SLTCAP_PSN: u32 = 0xfff8_0000;
pub const PCI_EXP_SLTCAP_PSN_SHIFT: u32 = 19;

pub const PCI_EXP_SLTCTL: u16 = 0x18;
pub const PCI_EXP_SLTCTL_PCC: u16 = 0x0400;
pub const PCI_EXP_SLTCTL_PWR_ON: u16 = 0x0000;
pub const PCI_EXP_SLTCTL_PWR_OFF: u16 = 0x0400;

pub const PCI_EXP_SLTSTA: u16 = 0x1a;
pub const PCI_EXP_SLTSTA_PFD: u16 = 0x0002;

pub const PCI_EXT_CAP_ID_ERR: u16 = 0x0001;

/// Offsets below are relative to the AER extended capability.
pub const PCI_ERR_UNCOR_MASK: u16 = 0x08;
pub const PCI_ERR_COR_MASK: u16 = 0x14;
