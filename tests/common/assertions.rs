// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 itsakeyfut
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Custom assertions for scheduler testing

use machina::core::devices::ScriptCpu;
use machina::core::{Scheduler, VirtualTime};

/// Assert the scheduler is at the expected virtual time
#[allow(dead_code)]
pub fn assert_now(sched: &Scheduler, expected: VirtualTime) {
    let actual = sched.now();
    assert_eq!(
        actual, expected,
        "Time mismatch: expected {}, got {}",
        expected, actual
    );
}

/// Assert the demo CPU serviced a number of interrupts in a range
#[allow(dead_code)]
pub fn assert_serviced_between(sched: &Scheduler, min: usize, max: usize) {
    let cpu = sched.lookup(":cpu").expect("No CPU in machine");
    let serviced = sched
        .device_as::<ScriptCpu>(cpu)
        .expect("CPU is not a ScriptCpu")
        .serviced
        .len();
    assert!(
        (min..=max).contains(&serviced),
        "Serviced interrupts: expected {}..={}, got {}",
        min,
        max,
        serviced
    );
}

/// Assert memory contains expected value at address
#[allow(dead_code)]
pub fn assert_memory_word(sched: &mut Scheduler, addr: u32, expected: u32) {
    let actual = sched.read32(addr).expect("Failed to read memory");
    assert_eq!(
        actual, expected,
        "Memory at 0x{:08X} mismatch: expected 0x{:08X}, got 0x{:08X}",
        addr, expected, actual
    );
}
