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
use fpgareload::pci::PciTopology;
use fpgareload::pci::sim::RootPortOptions;
use fpgareload::reload::Registry;
use fpgareload::reload::link_control::LinkStrategy;
use googletest::prelude::*;
use rstest::*;
use std::sync::Arc;
use std::time::Duration;

struct Setup {
    sim: Arc<fpgareload::pci::sim::SimPci>,
    registry: Registry,
}

#[fixture]
fn setup() -> Setup {
    let sim = sim_card(RootPortOptions::default());
    let topology: Arc<dyn PciTopology> = sim.clone();
    let registry = Registry::new(topology, settings(LinkStrategy::Auto));
    registry
        .register_controller(&FPGA, RecordingCard::new(&sim), "n3000")
        .unwrap();
    registry
        .register_controller(&NIC, RecordingCard::new(&sim), "nic")
        .unwrap();
    Setup { sim, registry }
}

#[gtest]
#[rstest]
#[case::below_the_target(FPGA, "spi_master/spi0/spi0.0/n3000bmc-sec-update.1.auto", "n3000")]
#[case::below_a_sibling_pf(FPGA_PF1, "n3000bmc-sec-update.2.auto", "n3000")]
#[case::the_other_card(NIC, "bmc", "nic")]
fn trigger_binds_by_ancestry(
    setup: Setup,
    #[case] parent: fpgareload::pci::PciAddress,
    #[case] below: &str,
    #[case] expected: &str,
) {
    let anchor = setup.sim.device_path(&parent).unwrap().join(below);
    let trigger = setup
        .registry
        .register_trigger(RecordingBmc::new(&setup.sim), &anchor)
        .unwrap();
    expect_that!(trigger.controller().name(), ok(eq(expected)));
    expect_that!(trigger.controller().has_trigger(), ok(eq(&true)));
}

#[gtest]
#[rstest]
fn unrelated_anchor_is_rejected(setup: Setup) {
    let anchor = setup
        .sim
        .device_path(&OTHER_ROOT)
        .unwrap()
        .join("platform-bmc");
    expect_that!(
        setup
            .registry
            .register_trigger(RecordingBmc::new(&setup.sim), &anchor),
        err(displays_as(contains_substring("ReloadError::InvalidArgument")))
    );
}

#[gtest]
#[rstest]
fn unregistered_controller_does_not_bind(setup: Setup) {
    let controller = setup.registry.find("n3000").unwrap().unwrap();
    setup.registry.unregister_controller(&controller).unwrap();
    expect_that!(
        setup
            .registry
            .register_trigger(RecordingBmc::new(&setup.sim), &bmc_anchor(&setup.sim)),
        err(displays_as(contains_substring("no reload controller owns")))
    );
}

#[gtest]
#[rstest]
fn one_trigger_per_controller(setup: Setup) {
    let bmc = RecordingBmc::new(&setup.sim);
    let anchor = bmc_anchor(&setup.sim);
    setup.registry.register_trigger(bmc.clone(), &anchor).unwrap();

    expect_that!(
        setup.registry.register_trigger(bmc.clone(), &anchor),
        ok(anything())
    );
    expect_that!(
        setup
            .registry
            .register_trigger(RecordingBmc::new(&setup.sim), &anchor),
        err(displays_as(contains_substring("ReloadError::Busy")))
    );
}

#[gtest]
#[rstest]
fn trigger_starts_from_the_tunable(setup: Setup) {
    let controller = setup.registry.find("n3000").unwrap().unwrap();
    controller.set_wait_time(Duration::from_secs(3)).unwrap();
    setup
        .registry
        .register_trigger(RecordingBmc::new(&setup.sim), &bmc_anchor(&setup.sim))
        .unwrap();
    expect_that!(
        controller.trigger_wait_time(),
        ok(eq(&Duration::from_secs(3)))
    );
}

#[gtest]
fn unregistered_trigger_blocks_reload_and_images() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    expect_that!(
        rig.controller.available_images(),
        ok(eq("fpga_factory fpga_user1 fpga_user2"))
    );

    rig.registry.unregister_trigger(&rig.trigger).unwrap();
    expect_that!(rig.controller.has_trigger(), ok(eq(&false)));
    expect_that!(
        rig.controller.available_images(),
        err(displays_as(contains_substring("ReloadError::InvalidState")))
    );
    expect_that!(
        rig.controller.reload("fpga_user1"),
        err(displays_as(contains_substring("has no registered trigger")))
    );

    // A BMC driver that comes back binds again.
    rig.registry
        .register_trigger(RecordingBmc::new(&rig.sim), &bmc_anchor(&rig.sim))
        .unwrap();
    expect_that!(rig.controller.reload("fpga_user1"), ok(anything()));
}
