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

use crate::common::*;
use fpgareload::error::{DriverError, errno};
use fpgareload::pci::regs::*;
use fpgareload::pci::sim::{HotplugOptions, RootPortOptions, SimOp};
use fpgareload::pci::{PciAddress, PciTopology};
use fpgareload::reload::link_control::LinkStrategy;
use fpgareload::reload::{Registry, ReloadOps, ReloadState, ReloadSettings};
use googletest::prelude::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn lnkctl(value: u16) -> SimOp {
    SimOp::ConfigWrite {
        dev: ROOT,
        offset: PCIE_CAP + PCI_EXP_LNKCTL,
        data: value.to_le_bytes().to_vec(),
    }
}

const HOTPLUG: RootPortOptions = RootPortOptions {
    pcie: true,
    aer: false,
    hotplug: Some(HotplugOptions {
        slot_number: 7,
        power_controller: true,
    }),
};

#[gtest]
fn raw_link_reload_runs_every_step_in_order() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);

    expect_that!(rig.controller.reload("fpga_user1"), ok(anything()));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Done)));
    expect_that!(
        rig.sim.ops(),
        elements_are![
            eq(&SimOp::StopAndRemove(FPGA_VF)),
            eq(&SimOp::StopAndRemove(FPGA_PF1)),
            eq(&SimOp::Note("prepare 0000:01:00.0".into())),
            eq(&SimOp::Note("trigger fpga_user1".into())),
            eq(&lnkctl(PCI_EXP_LNKCTL_LD)),
            eq(&SimOp::StopAndRemove(FPGA)),
            eq(&lnkctl(0)),
            eq(&SimOp::RescanBridge(ROOT)),
        ]
    );
    for dev in [FPGA, FPGA_PF1, FPGA_VF, NIC] {
        expect_that!(rig.sim.is_present(&dev), eq(true), "{dev} missing after reload");
    }
}

#[gtest]
fn link_stays_down_for_the_settle_time() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.controller.reload("fpga_user1").unwrap();

    let events = rig.sim.events();
    let down = events.iter().find(|e| is_link_disable(&e.op, true)).unwrap();
    let up = events.iter().find(|e| is_link_disable(&e.op, false)).unwrap();
    expect_that!(up.at.duration_since(down.at), ge(WAIT));
    expect_that!(rig.controller.trigger_wait_time(), ok(eq(&WAIT)));
}

#[gtest]
fn reported_wait_extends_the_settle_time() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    let reported = Duration::from_millis(120);
    rig.bmc.report_wait(reported);
    rig.controller.reload("fpga_user1").unwrap();

    let events = rig.sim.events();
    let down = events.iter().find(|e| is_link_disable(&e.op, true)).unwrap();
    let up = events.iter().find(|e| is_link_disable(&e.op, false)).unwrap();
    expect_that!(up.at.duration_since(down.at), ge(reported));
    expect_that!(rig.controller.trigger_wait_time(), ok(eq(&reported)));
    // The tunable itself is untouched.
    expect_that!(rig.controller.wait_time(), ok(eq(&WAIT)));
}

#[gtest]
fn shorter_reported_wait_keeps_the_tunable() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.bmc.report_wait(Duration::from_millis(1));
    rig.controller.reload("fpga_user1").unwrap();
    expect_that!(rig.controller.trigger_wait_time(), ok(eq(&WAIT)));
}

#[gtest]
fn trigger_failure_keeps_link_up_and_still_rescans() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.bmc.fail_with(-errno::EIO);

    let result = rig.controller.reload("fpga_user1");
    expect_that!(
        result,
        err(displays_as(contains_substring("ReloadError::TriggerFailed")))
    );
    expect_that!(result.map_err(|e| e.errno()), err(eq(-5)));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Fail)));

    let ops = rig.sim.ops();
    expect_that!(ops.iter().any(|op| is_link_disable(op, true)), eq(false));
    expect_that!(ops.last(), some(eq(&SimOp::RescanBridge(ROOT))));
    expect_that!(rig.sim.is_present(&FPGA_PF1), eq(true));
}

#[gtest]
fn prepare_failure_never_triggers() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.card.fail_with(errno::EBUSY);

    let result = rig.controller.reload("fpga_user1");
    expect_that!(
        result,
        err(displays_as(contains_substring("ReloadError::PrepareFailed")))
    );
    expect_that!(result.map_err(|e| e.errno()), err(eq(-16)));
    expect_that!(rig.bmc.calls(), eq(0));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Fail)));
    expect_that!(rig.sim.ops().iter().any(is_rescan), eq(true));
}

#[gtest]
fn reload_without_trigger_touches_nothing() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.registry.unregister_trigger(&rig.trigger).unwrap();
    rig.sim.clear_events();

    let result = rig.controller.reload("fpga_user1");
    expect_that!(
        result,
        err(displays_as(contains_substring("ReloadError::InvalidState")))
    );
    expect_that!(result.map_err(|e| e.errno()), err(eq(-errno::EINVAL)));
    expect_that!(rig.sim.ops(), is_empty());
    expect_that!(rig.card.calls(), eq(0));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Unknown)));
}

#[gtest]
fn reload_of_unregistered_controller_touches_nothing() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.registry.unregister_controller(&rig.controller).unwrap();

    expect_that!(
        rig.controller.reload("fpga_user1").map_err(|e| e.errno()),
        err(eq(-errno::EINVAL))
    );
    expect_that!(rig.sim.ops(), is_empty());
}

#[gtest]
fn empty_image_is_an_invalid_argument() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    expect_that!(
        rig.controller.reload(""),
        err(displays_as(contains_substring("ReloadError::InvalidArgument")))
    );
    expect_that!(rig.sim.ops(), is_empty());
}

#[gtest]
fn rescan_failure_after_successful_steps_fails_the_reload() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.sim.fail_rescan(true);

    let result = rig.controller.reload("fpga_user1");
    expect_that!(
        result,
        err(displays_as(contains_substring("ReloadError::RescanFailed")))
    );
    expect_that!(result.map_err(|e| e.errno()), err(eq(-errno::EIO)));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Fail)));
}

#[gtest]
fn rescan_failure_after_a_failed_step_keeps_the_step_error() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.sim.fail_rescan(true);
    rig.bmc.fail_with(errno::EIO);

    expect_that!(
        rig.controller.reload("fpga_user1"),
        err(displays_as(contains_substring("ReloadError::TriggerFailed")))
    );
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Fail)));
}

#[gtest]
fn link_disable_failure_is_a_link_control_error() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.sim.fail_config_write(ROOT, PCIE_CAP + PCI_EXP_LNKCTL);

    let result = rig.controller.reload("fpga_user1");
    expect_that!(
        result,
        err(displays_as(contains_substring("ReloadError::LinkControl")))
    );
    expect_that!(result.map_err(|e| e.errno()), err(eq(-errno::EIO)));
    // The subtree was never removed, so the rescan finds the card where it was.
    expect_that!(rig.sim.ops().last(), some(eq(&SimOp::RescanBridge(ROOT))));
    expect_that!(rig.sim.is_present(&FPGA), eq(true));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Fail)));
}

#[gtest]
fn bus_removal_removes_the_root_port_and_rescans_everything() {
    let rig = Rig::new(
        RootPortOptions {
            pcie: false,
            ..RootPortOptions::default()
        },
        LinkStrategy::Auto,
    );

    expect_that!(rig.controller.reload("fpga_user2"), ok(anything()));
    expect_that!(
        rig.sim.ops(),
        elements_are![
            eq(&SimOp::StopAndRemove(FPGA_VF)),
            eq(&SimOp::StopAndRemove(FPGA_PF1)),
            eq(&SimOp::Note("prepare 0000:01:00.0".into())),
            eq(&SimOp::Note("trigger fpga_user2".into())),
            eq(&SimOp::StopAndRemove(ROOT)),
            eq(&SimOp::RescanAll),
        ]
    );
    expect_that!(rig.sim.is_present(&ROOT), eq(true));
    expect_that!(rig.sim.is_present(&FPGA), eq(true));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Done)));
}

#[gtest]
fn hotplug_slot_powers_the_card_off_and_on() {
    let rig = Rig::new(HOTPLUG, LinkStrategy::Auto);
    let sltctl = PCIE_CAP + PCI_EXP_SLTCTL;

    expect_that!(rig.controller.reload("fpga_user1"), ok(anything()));
    let ops = rig.sim.ops();
    let trigger = position(&ops, |op| is_note(op, "trigger fpga_user1")).unwrap();
    let link_down = position(&ops, |op| is_link_disable(op, true)).unwrap();
    let power_off = position(&ops, |op| {
        op.config_write_u16(&ROOT, sltctl) == Some(PCI_EXP_SLTCTL_PWR_OFF)
    })
    .unwrap();
    let quiesce = position(&ops, |op| op.config_write_u16(&FPGA, PCI_COMMAND).is_some()).unwrap();
    let removed = position(&ops, |op| *op == SimOp::StopAndRemove(FPGA)).unwrap();
    let power_on = position(&ops, |op| {
        op.config_write_u16(&ROOT, sltctl) == Some(PCI_EXP_SLTCTL_PWR_ON)
    })
    .unwrap();
    let link_up = position(&ops, |op| is_link_disable(op, false)).unwrap();
    let rescan = position(&ops, |op| *op == SimOp::RescanBridge(ROOT)).unwrap();

    expect_that!(trigger, lt(link_down));
    expect_that!(link_down, lt(power_off));
    expect_that!(power_off, lt(quiesce));
    expect_that!(quiesce, lt(removed));
    expect_that!(removed, lt(power_on));
    expect_that!(power_on, lt(link_up));
    expect_that!(link_up, lt(rescan));
    expect_that!(rig.controller.slot_name(), some(eq(&"7".to_string())));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Done)));
}

#[gtest]
fn power_fault_after_power_on_fails_but_rescans() {
    let rig = Rig::new(HOTPLUG, LinkStrategy::Auto);
    rig.sim.inject_power_fault(ROOT);

    let result = rig.controller.reload("fpga_user1");
    expect_that!(
        result,
        err(displays_as(contains_substring("power fault detected on slot 7")))
    );
    expect_that!(result.map_err(|e| e.errno()), err(eq(-errno::EIO)));
    expect_that!(rig.sim.ops().last(), some(eq(&SimOp::RescanBridge(ROOT))));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Fail)));
}

#[gtest]
fn aer_is_masked_while_the_link_is_down() {
    let rig = Rig::with_settings(
        RootPortOptions {
            aer: true,
            ..RootPortOptions::default()
        },
        ReloadSettings {
            mask_aer: true,
            ..settings(LinkStrategy::Auto)
        },
    );
    let uncor = PCI_CFG_SPACE_SIZE + PCI_ERR_UNCOR_MASK;
    rig.sim.write_config(&ROOT, uncor, &0x10u32.to_le_bytes()).unwrap();
    rig.sim.clear_events();

    expect_that!(rig.controller.reload("fpga_user1"), ok(anything()));
    let ops = rig.sim.ops();
    let masked = position(&ops, |op| {
        *op == SimOp::ConfigWrite {
            dev: ROOT,
            offset: uncor,
            data: u32::MAX.to_le_bytes().to_vec(),
        }
    })
    .unwrap();
    let link_down = position(&ops, |op| is_link_disable(op, true)).unwrap();
    let rescan = position(&ops, |op| *op == SimOp::RescanBridge(ROOT)).unwrap();
    let restored = position(&ops, |op| {
        *op == SimOp::ConfigWrite {
            dev: ROOT,
            offset: uncor,
            data: 0x10u32.to_le_bytes().to_vec(),
        }
    })
    .unwrap();
    expect_that!(masked, lt(link_down));
    expect_that!(rescan, lt(restored));
    expect_that!(rig.sim.config_u32(&ROOT, uncor), some(eq(0x10)));
}

struct PanickingCard;

impl ReloadOps for PanickingCard {
    fn prepare(&self, _target: &PciAddress) -> std::result::Result<(), DriverError> {
        panic!("card driver bug");
    }
}

#[gtest]
fn panicking_driver_still_gets_a_rescan() {
    let sim = sim_card(RootPortOptions::default());
    let topology: Arc<dyn PciTopology> = sim.clone();
    let registry = Registry::new(topology, settings(LinkStrategy::Auto));
    let controller = registry
        .register_controller(&FPGA, Arc::new(PanickingCard), "n3000")
        .unwrap();
    registry
        .register_trigger(RecordingBmc::new(&sim), &bmc_anchor(&sim))
        .unwrap();
    sim.clear_events();

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        controller.reload("fpga_user1")
    }));
    expect_that!(outcome.is_err(), eq(true));
    expect_that!(sim.ops().last(), some(eq(&SimOp::RescanBridge(ROOT))));
    expect_that!(sim.is_present(&FPGA_PF1), eq(true));
    expect_that!(controller.state(), ok(eq(&ReloadState::Fail)));
    expect_that!(controller.cancel(), ok(eq(&false)));
}

#[gtest]
fn controller_is_usable_after_a_driver_panic() {
    let sim = sim_card(RootPortOptions::default());
    let topology: Arc<dyn PciTopology> = sim.clone();
    let registry = Registry::new(topology, settings(LinkStrategy::Auto));
    let controller = registry
        .register_controller(&FPGA, Arc::new(PanickingCard), "n3000")
        .unwrap();
    registry
        .register_trigger(RecordingBmc::new(&sim), &bmc_anchor(&sim))
        .unwrap();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        controller.reload("fpga_user1")
    }));
    assert_that!(outcome.is_err(), eq(true));
    expect_that!(
        controller.available_images(),
        ok(eq("fpga_factory fpga_user1 fpga_user2"))
    );

    registry.unregister_controller(&controller).unwrap();
    let card = RecordingCard::new(&sim);
    let again = registry
        .register_controller(&FPGA, card.clone(), "n3000")
        .unwrap();
    expect_that!(Arc::ptr_eq(&again, &controller), eq(true));

    expect_that!(again.reload("fpga_user1"), ok(anything()));
    expect_that!(again.state(), ok(eq(&ReloadState::Done)));
    expect_that!(card.calls(), eq(1));
}

#[gtest]
fn cancel_wakes_the_settle_wait_and_restores_the_card() {
    let rig = Rig::with_settings(
        RootPortOptions::default(),
        ReloadSettings {
            default_wait: Duration::from_secs(30),
            ..settings(LinkStrategy::Auto)
        },
    );
    let controller = rig.controller.clone();
    let start = Instant::now();
    let worker = std::thread::spawn(move || controller.reload("fpga_user1"));

    while !rig.sim.ops().iter().any(|op| *op == SimOp::StopAndRemove(FPGA)) {
        assert!(start.elapsed() < Duration::from_secs(10), "reload never reached the wait");
        std::thread::sleep(Duration::from_millis(5));
    }
    expect_that!(rig.controller.cancel(), ok(eq(&true)));

    let result = worker.join().unwrap();
    expect_that!(result.map_err(|e| e.errno()), err(eq(-errno::ECANCELED)));
    expect_that!(start.elapsed(), lt(Duration::from_secs(30)));
    expect_that!(rig.sim.is_present(&FPGA), eq(true));
    expect_that!(rig.sim.ops().last(), some(eq(&SimOp::RescanBridge(ROOT))));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Fail)));
    expect_that!(rig.controller.cancel(), ok(eq(&false)));
}

#[gtest]
fn cancel_without_reload_is_a_no_op() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    expect_that!(rig.controller.cancel(), ok(eq(&false)));
    expect_that!(rig.controller.reload("fpga_user1"), ok(anything()));
}

#[gtest]
fn reload_can_be_repeated() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.bmc.fail_with(errno::EIO);
    expect_that!(rig.controller.reload("fpga_user1"), err(anything()));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Fail)));

    rig.bmc.clear_failure();
    expect_that!(rig.controller.reload("fpga_user1"), ok(anything()));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Done)));
}
