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
use fpgareload::pci::sim::{RootPortOptions, SimOp};
use fpgareload::reload::ReloadState;
use fpgareload::reload::attrs;
use fpgareload::reload::link_control::LinkStrategy;
use googletest::prelude::*;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn is_trigger(op: &SimOp) -> bool {
    matches!(op, SimOp::Note(note) if note.starts_with("trigger"))
}

#[gtest]
fn concurrent_reloads_are_serialised() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    let barrier = Arc::new(Barrier::new(2));
    let workers: Vec<_> = ["fpga_user1", "fpga_user2"]
        .into_iter()
        .map(|image| {
            let controller = rig.controller.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                controller.reload(image)
            })
        })
        .collect();
    for worker in workers {
        expect_that!(worker.join().unwrap(), ok(anything()));
    }

    // Each trigger is followed by its own rescan before the next trigger.
    let sequence: Vec<bool> = rig
        .sim
        .ops()
        .iter()
        .filter(|op| is_trigger(op) || is_rescan(op))
        .map(is_trigger)
        .collect();
    expect_that!(sequence, elements_are![eq(&true), eq(&false), eq(&true), eq(&false)]);
    expect_that!(rig.bmc.calls(), eq(2));
    expect_that!(rig.controller.state(), ok(eq(&ReloadState::Done)));
}

#[gtest]
fn image_listing_waits_for_the_reload() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.controller.set_wait_time(Duration::from_millis(200)).unwrap();
    let controller = rig.controller.clone();
    let worker = thread::spawn(move || controller.reload("fpga_user1"));
    while rig.bmc.calls() == 0 {
        thread::sleep(Duration::from_millis(2));
    }

    let images = attrs::available_images_show(&rig.controller);
    rig.sim.record("images listed");
    expect_that!(images, ok(eq("fpga_factory fpga_user1 fpga_user2\n")));
    expect_that!(worker.join().unwrap(), ok(anything()));

    let ops = rig.sim.ops();
    let rescan = position(&ops, is_rescan).unwrap();
    let listed = position(&ops, |op| is_note(op, "images listed")).unwrap();
    expect_that!(rescan, lt(listed));
}

#[gtest]
fn state_reads_do_not_wait_for_the_reload() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    rig.controller.set_wait_time(Duration::from_millis(200)).unwrap();
    let controller = rig.controller.clone();
    let worker = thread::spawn(move || controller.reload("fpga_user1"));
    while rig.bmc.calls() == 0 {
        thread::sleep(Duration::from_millis(2));
    }

    expect_that!(attrs::state_show(&rig.controller), ok(eq("reloading\n")));
    expect_that!(attrs::name_show(&rig.controller), ok(eq("n3000\n")));
    expect_that!(worker.join().unwrap(), ok(anything()));
    expect_that!(attrs::state_show(&rig.controller), ok(eq("done\n")));
}

#[gtest]
fn image_reload_store_reports_bytes_and_errno() {
    let rig = Rig::new(RootPortOptions::default(), LinkStrategy::Auto);
    expect_that!(
        attrs::image_reload_store(&rig.controller, "fpga_user1\n"),
        ok(eq(&11))
    );
    expect_that!(rig.sim.ops(), contains(eq(&SimOp::Note("trigger fpga_user1".into()))));

    rig.bmc.fail_with(-5);
    expect_that!(
        attrs::image_reload_store(&rig.controller, "fpga_user1\n").map_err(|e| e.errno()),
        err(eq(-5))
    );
}
