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
use fpgareload::pci::sim::{HotplugOptions, RootPortOptions, SimOp, SimPci};
use fpgareload::pci::{PciAddress, PciTopology};
use fpgareload::reload::link_control::{LinkKind, LinkStrategy};
use fpgareload::reload::{Registry, ReloadSettings, ReloadState};
use googletest::prelude::*;
use rstest::*;
use std::sync::Arc;
use std::time::{Duration, Instant};

const HOTPLUG: RootPortOptions = RootPortOptions {
    pcie: true,
    aer: false,
    hotplug: Some(HotplugOptions {
        slot_number: 7,
        power_controller: false,
    }),
};

fn registry(sim: &Arc<SimPci>) -> Registry {
    let topology: Arc<dyn PciTopology> = sim.clone();
    Registry::new(topology, settings(LinkStrategy::Auto))
}

#[gtest]
fn registering_twice_returns_the_same_controller() {
    let sim = sim_card(RootPortOptions::default());
    let registry = registry(&sim);
    let card = RecordingCard::new(&sim);

    let first = registry
        .register_controller(&FPGA, card.clone(), "n3000")
        .unwrap();
    let second = registry
        .register_controller(&FPGA, card.clone(), "n3000")
        .unwrap();
    expect_that!(Arc::ptr_eq(&first, &second), eq(true));
    expect_that!(registry.controllers().unwrap(), len(eq(1)));
}

#[gtest]
fn controller_takes_the_root_port_of_its_target() {
    let sim = sim_card(RootPortOptions::default());
    let registry = registry(&sim);
    let controller = registry
        .register_controller(&FPGA, RecordingCard::new(&sim), "n3000")
        .unwrap();

    expect_that!(controller.bridge(), eq(ROOT));
    expect_that!(controller.target(), ok(eq(&FPGA)));
    expect_that!(controller.link_kind(), eq(LinkKind::RawLink));
    expect_that!(controller.name(), ok(eq("n3000")));
    expect_that!(controller.state(), ok(eq(&ReloadState::Unknown)));
    expect_that!(controller.wait_time(), ok(eq(&WAIT)));
    expect_that!(controller.has_trigger(), ok(eq(&false)));
}

#[gtest]
#[rstest]
#[case::other_ops_same_target(FPGA)]
#[case::other_function_same_port(FPGA_PF1)]
fn a_bridge_has_one_owner(#[case] target: PciAddress) {
    let sim = sim_card(RootPortOptions::default());
    let registry = registry(&sim);
    registry
        .register_controller(&FPGA, RecordingCard::new(&sim), "n3000")
        .unwrap();

    expect_that!(
        registry.register_controller(&target, RecordingCard::new(&sim), "intruder"),
        err(displays_as(contains_substring("ReloadError::Busy")))
    );
    expect_that!(registry.controllers().unwrap(), len(eq(1)));
}

#[gtest]
#[rstest]
#[case::empty_name(FPGA, "", "needs a name")]
#[case::unknown_target(PciAddress::new(0, 9, 0, 0), "n3000", "is not a PCI device")]
fn rejected_registrations(#[case] target: PciAddress, #[case] name: &str, #[case] message: &str) {
    let sim = sim_card(RootPortOptions::default());
    let registry = registry(&sim);
    let result = registry.register_controller(&target, RecordingCard::new(&sim), name);
    expect_that!(
        result,
        err(displays_as(contains_substring("ReloadError::InvalidArgument")))
    );
    expect_that!(result, err(displays_as(contains_substring(message))));
    expect_that!(registry.controllers().unwrap(), is_empty());
}

#[gtest]
fn separate_root_ports_get_separate_controllers() {
    let sim = sim_card(RootPortOptions::default());
    let registry = registry(&sim);
    let fpga = registry
        .register_controller(&FPGA, RecordingCard::new(&sim), "n3000")
        .unwrap();
    let nic = registry
        .register_controller(&NIC, RecordingCard::new(&sim), "nic")
        .unwrap();

    expect_that!(nic.bridge(), eq(OTHER_ROOT));
    expect_that!(Arc::ptr_eq(&fpga, &nic), eq(false));
    expect_that!(registry.find("nic").unwrap().map(|c| c.bridge()), some(eq(OTHER_ROOT)));
    expect_that!(registry.find("d5005").unwrap().is_none(), eq(true));
}

#[gtest]
fn reclaim_reuses_controller_and_slot() {
    let sim = sim_card(HOTPLUG);
    let registry = registry(&sim);
    let first = registry
        .register_controller(&FPGA, RecordingCard::new(&sim), "n3000")
        .unwrap();
    expect_that!(first.slot_name(), some(eq(&"7".to_string())));
    expect_that!(sim.slot_owner("7"), some(eq(ROOT)));

    registry.unregister_controller(&first).unwrap();
    expect_that!(first.is_registered(), ok(eq(&false)));
    expect_that!(registry.find("n3000").unwrap().is_none(), eq(true));

    sim.clear_events();
    let second = registry
        .register_controller(&FPGA_PF1, RecordingCard::new(&sim), "n3000-pf1")
        .unwrap();
    expect_that!(Arc::ptr_eq(&first, &second), eq(true));
    expect_that!(second.is_registered(), ok(eq(&true)));
    expect_that!(second.target(), ok(eq(&FPGA_PF1)));
    expect_that!(second.name(), ok(eq("n3000-pf1")));
    expect_that!(second.slot_name(), some(eq(&"7".to_string())));
    // No second slot was claimed.
    expect_that!(sim.ops(), is_empty());
    expect_that!(registry.controllers().unwrap(), len(eq(1)));
}

#[gtest]
fn reclaim_keeps_the_bound_trigger() {
    let rig = Rig::new(HOTPLUG, LinkStrategy::Auto);
    rig.registry.unregister_controller(&rig.controller).unwrap();
    let again = rig
        .registry
        .register_controller(&FPGA, rig.card.clone(), "n3000")
        .unwrap();
    expect_that!(again.has_trigger(), ok(eq(&true)));
    expect_that!(again.reload("fpga_user1"), ok(anything()));
}

#[gtest]
fn slot_driven_by_another_controller_is_busy() {
    let sim = sim_card(HOTPLUG);
    sim.occupy_slot("7");
    let registry = registry(&sim);
    expect_that!(
        registry.register_controller(&FPGA, RecordingCard::new(&sim), "n3000"),
        err(displays_as(contains_substring("slot 7 is driven by another hotplug controller")))
    );
}

#[gtest]
fn teardown_releases_every_slot() {
    let sim = sim_card(HOTPLUG);
    let registry = registry(&sim);
    registry
        .register_controller(&FPGA, RecordingCard::new(&sim), "n3000")
        .unwrap();

    registry.teardown_all();
    expect_that!(sim.slot_owner("7"), none());
    expect_that!(registry.controllers().unwrap(), is_empty());
    expect_that!(registry.find("n3000").unwrap().is_none(), eq(true));
    expect_that!(sim.ops(), contains(eq(&SimOp::ReleaseSlot("7".into()))));
}

#[gtest]
fn dropping_the_registry_tears_down() {
    let sim = sim_card(HOTPLUG);
    {
        let registry = registry(&sim);
        registry
            .register_controller(&FPGA, RecordingCard::new(&sim), "n3000")
            .unwrap();
    }
    expect_that!(sim.slot_owner("7"), none());
}

#[gtest]
fn teardown_does_not_wait_for_a_reload() {
    let rig = Rig::with_settings(
        RootPortOptions::default(),
        ReloadSettings {
            default_wait: Duration::from_millis(400),
            ..settings(LinkStrategy::Auto)
        },
    );
    let controller = rig.controller.clone();
    let worker = std::thread::spawn(move || controller.reload("fpga_user1"));
    while rig.bmc.calls() == 0 {
        std::thread::sleep(Duration::from_millis(2));
    }

    let start = Instant::now();
    rig.registry.teardown_all();
    expect_that!(start.elapsed(), lt(Duration::from_millis(400)));

    expect_that!(worker.join().unwrap(), ok(anything()));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Done)));
}
