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

use super::super::*;
use crate::core::device::DeviceCaps;
use crate::core::execute::SuspendReason;
use crate::core::interrupt::{LineId, LineState};
use crate::core::time::VirtualTime;

const BASE: u32 = 0x1000;

fn quiet() -> SchedulerConfig {
    SchedulerConfig {
        stream_update_hz: 0,
        strict_handles: true,
        ..SchedulerConfig::default()
    }
}

fn started(devices: Vec<DeviceDescriptor>) -> Scheduler {
    let mut sched = Scheduler::new(quiet()).unwrap();
    for device in devices {
        sched.add_device(DeviceId::ROOT, device).unwrap();
    }
    sched.start().unwrap();
    sched
}

fn idle_cpu() -> DeviceDescriptor {
    DeviceDescriptor::new("cpu", ScriptCpu::new(vec![Op::Halt])).clock(1_000_000)
}

fn irqc() -> DeviceDescriptor {
    DeviceDescriptor::new("irqc", IrqController::new(BASE, &["a", "b"], ":cpu", "irq"))
}

// RAM

#[test]
fn test_ram_widths_share_storage() {
    let mut sched = started(vec![DeviceDescriptor::new("ram", Ram::new(0, 0x100))]);

    sched.write32(0x10, 0x1234_5678).unwrap();
    assert_eq!(sched.read8(0x10).unwrap(), 0x78);
    assert_eq!(sched.read16(0x12).unwrap(), 0x1234);

    sched.write8(0x13, 0xAB).unwrap();
    assert_eq!(sched.read32(0x10).unwrap(), 0xAB34_5678);
}

#[test]
fn test_rom_write_is_contained() {
    let mut sched = started(vec![DeviceDescriptor::new(
        "rom",
        Ram::rom(0x100, vec![0xEF, 0xBE, 0xAD, 0xDE]),
    )]);

    sched.write32(0x100, 0).unwrap();

    assert_eq!(sched.read32(0x100).unwrap(), 0xDEAD_BEEF);
    assert_eq!(sched.diagnostics().unhandled_writes, 1);
}

#[test]
fn test_ram_cleared_on_reset() {
    let mut sched = started(vec![DeviceDescriptor::new("ram", Ram::new(0, 0x100))]);
    sched.write32(0, 42).unwrap();

    sched.reset().unwrap();
    assert_eq!(sched.read32(0).unwrap(), 0);
}

// Interrupt controller

#[test]
fn test_masked_request_does_not_reach_cpu() {
    let mut sched = started(vec![idle_cpu(), irqc()]);
    let (cpu, ctrl) = (sched.lookup(":cpu").unwrap(), sched.lookup(":irqc").unwrap());

    sched.line_pulse(ctrl, LineId(1), VirtualTime::ZERO).unwrap();
    assert_eq!(sched.device_as::<IrqController>(ctrl).unwrap().status(), 0b10);
    assert_eq!(sched.line_state(cpu, IRQ).unwrap(), LineState::Clear);

    // Unmasking a pending source raises the output
    sched.write32(BASE + 4, 0b10).unwrap();
    assert_eq!(sched.line_state(cpu, IRQ).unwrap(), LineState::Assert);

    sched.write32(BASE, 0b10).unwrap();
    assert_eq!(sched.read32(BASE).unwrap(), 0);
    assert_eq!(sched.line_state(cpu, IRQ).unwrap(), LineState::Clear);
}

#[test]
fn test_controller_acknowledges_input_edges() {
    let mut sched = started(vec![idle_cpu(), irqc()]);
    let ctrl = sched.lookup(":irqc").unwrap();

    sched.line_pulse(ctrl, LineId(0), VirtualTime::ZERO).unwrap();

    assert!(!sched.line_pending_edge(ctrl, LineId(0)).unwrap());
    assert_eq!(sched.read32(BASE).unwrap(), 0b01);
}

#[test]
fn test_controller_needs_its_cpu() {
    let mut sched = Scheduler::new(quiet()).unwrap();
    sched.add_device(DeviceId::ROOT, irqc()).unwrap();

    assert!(sched.start().is_err());
}

// Interval timer

fn timer_machine() -> Scheduler {
    started(vec![
        idle_cpu(),
        irqc(),
        DeviceDescriptor::new("timer", IntervalTimer::new(0x2000, ":irqc", &["a", "b"])).clock(1_000_000),
    ])
}

#[test]
fn test_reset_on_target_repeats() {
    let mut sched = timer_machine();
    sched.write32(0x2008, 100).unwrap();
    sched
        .write32(0x2004, MODE_ENABLE | MODE_RESET_ON_TARGET | MODE_IRQ_ON_TARGET)
        .unwrap();

    sched.run_for(VirtualTime::from_millis(1)).unwrap();

    let timer = sched.lookup(":timer").unwrap();
    assert_eq!(sched.device_as::<IntervalTimer>(timer).unwrap().channel(0).unwrap().hits, 10);
    let ctrl = sched.lookup(":irqc").unwrap();
    assert_eq!(sched.device(ctrl).unwrap().lines.get(LineId(0)).unwrap().edge_count, 10);
}

#[test]
fn test_free_running_counter_wraps_past_target() {
    let mut sched = timer_machine();
    sched.write32(0x2008, 100).unwrap();
    sched.write32(0x2004, MODE_ENABLE | MODE_IRQ_ON_TARGET).unwrap();

    sched.run_for(VirtualTime::from_millis(1)).unwrap();

    assert_eq!(sched.read32(0x2000).unwrap(), 1_000);
    let timer = sched.lookup(":timer").unwrap();
    assert_eq!(sched.device_as::<IntervalTimer>(timer).unwrap().channel(0).unwrap().hits, 1);
}

#[test]
fn test_reached_flag_clears_on_read() {
    let mut sched = timer_machine();
    sched.write32(0x2018, 10).unwrap();
    sched.write32(0x2014, MODE_ENABLE | MODE_IRQ_ON_TARGET).unwrap();
    sched.run_for(VirtualTime::from_micros(20)).unwrap();

    assert_ne!(sched.read32(0x2014).unwrap() & MODE_REACHED_TARGET, 0);
    assert_eq!(sched.read32(0x2014).unwrap() & MODE_REACHED_TARGET, 0);
}

#[test]
fn test_disabled_channel_holds_counter() {
    let mut sched = timer_machine();
    sched.write32(0x2000, 77).unwrap();
    sched.run_for(VirtualTime::from_millis(1)).unwrap();

    assert_eq!(sched.read32(0x2000).unwrap(), 77);
    assert_eq!(sched.timers().armed(), 0);
}

#[test]
fn test_unknown_register_is_contained() {
    let mut sched = timer_machine();
    sched.write32(0x200C, 1).unwrap();

    assert_eq!(sched.diagnostics().unhandled_writes, 1);
}

// Tone generator

fn tone_machine() -> (Scheduler, crate::core::stream::StreamHandle) {
    let mut sched = started(vec![
        DeviceDescriptor::new("tone", ToneGenerator::new(0x3000, 1_000)).clock(1_000)
    ]);
    let tone = sched.lookup(":tone").unwrap();
    let stream = sched.device_as::<ToneGenerator>(tone).unwrap().stream().unwrap();
    (sched, stream)
}

#[test]
fn test_square_wave() {
    let (mut sched, stream) = tone_machine();
    sched.write32(0x3000, 2).unwrap();
    sched.write32(0x3004, 100).unwrap();

    sched.run_for(VirtualTime::from_millis(6)).unwrap();
    sched.stream_update(stream).unwrap();

    assert_eq!(sched.stream_drain(stream).unwrap(), vec![100, 100, -100, -100, 100, 100]);
}

#[test]
fn test_register_write_splits_stream() {
    let (mut sched, stream) = tone_machine();
    sched.write32(0x3000, 1).unwrap();
    sched.write32(0x3004, 10).unwrap();
    sched.run_for(VirtualTime::from_millis(3)).unwrap();

    // Samples before the write keep the old volume
    sched.write32(0x3004, 20).unwrap();
    sched.run_for(VirtualTime::from_millis(2)).unwrap();
    sched.stream_update(stream).unwrap();

    assert_eq!(sched.stream_drain(stream).unwrap(), vec![10, -10, 10, -20, 20]);
}

#[test]
fn test_silent_until_programmed() {
    let (mut sched, stream) = tone_machine();
    sched.run_for(VirtualTime::from_millis(4)).unwrap();
    sched.stream_update(stream).unwrap();

    assert_eq!(sched.stream_drain(stream).unwrap(), vec![0; 4]);
    let tone = sched.lookup(":tone").unwrap();
    assert!(sched.device(tone).unwrap().caps.contains(DeviceCaps::SOUND));
}

// Script CPU

fn cpu_machine(program: Vec<Op>) -> Scheduler {
    started(vec![DeviceDescriptor::new("cpu", ScriptCpu::new(program)).clock(1_000_000)])
}

#[test]
fn test_nop_spans_slices() {
    let mut sched = cpu_machine(vec![Op::Nop { cycles: 2_500 }, Op::Halt]);
    sched.run_for(VirtualTime::from_millis(5)).unwrap();

    let cpu = sched.lookup(":cpu").unwrap();
    assert_eq!(sched.device_as::<ScriptCpu>(cpu).unwrap().cycles(), 2_500);
    assert_eq!(sched.device_as::<ScriptCpu>(cpu).unwrap().pc(), 2);
    assert!(sched.exec_state(cpu).unwrap().suspend.contains(SuspendReason::HALT));
}

#[test]
fn test_nmi_wakes_waiting_core() {
    let mut sched = cpu_machine(vec![Op::WaitInterrupt, Op::Nop { cycles: 10 }, Op::Halt]);
    let cpu = sched.lookup(":cpu").unwrap();
    sched.run_for(VirtualTime::from_millis(1)).unwrap();
    assert!(sched.is_suspended(cpu));

    sched.line_pulse(cpu, NMI, VirtualTime::ZERO).unwrap();
    sched.run_for(VirtualTime::from_millis(1)).unwrap();

    let core = sched.device_as::<ScriptCpu>(cpu).unwrap();
    assert_eq!(core.serviced, vec![Serviced { line: NMI, cycle: 1 }]);
    assert_eq!(core.cycles(), 1 + INTERRUPT_CYCLES + 10);
}

#[test]
fn test_held_irq_released_by_acknowledge() {
    let mut sched = cpu_machine(vec![Op::Nop { cycles: 100 }, Op::Halt]);
    let cpu = sched.lookup(":cpu").unwrap();
    sched.line_set(cpu, IRQ, LineState::Hold).unwrap();

    sched.run_for(VirtualTime::from_millis(1)).unwrap();

    let core = sched.device_as::<ScriptCpu>(cpu).unwrap();
    assert_eq!(core.serviced, vec![Serviced { line: IRQ, cycle: 0 }]);
    assert_eq!(core.cycles(), INTERRUPT_CYCLES + 100);
    assert_eq!(sched.line_state(cpu, IRQ).unwrap(), LineState::Clear);
}

#[test]
fn test_spin_released_by_trigger() {
    let mut sched = cpu_machine(vec![Op::Spin { trigger: 7 }, Op::Nop { cycles: 5 }, Op::Halt]);
    let cpu = sched.lookup(":cpu").unwrap();
    sched.run_for(VirtualTime::from_millis(1)).unwrap();
    assert_eq!(sched.device_as::<ScriptCpu>(cpu).unwrap().cycles(), 1);

    sched.trigger(7);
    sched.run_for(VirtualTime::from_millis(1)).unwrap();
    assert_eq!(sched.device_as::<ScriptCpu>(cpu).unwrap().cycles(), 6);
}

#[test]
fn test_jump_loops_until_budget() {
    let mut sched = cpu_machine(vec![Op::Read { address: 0x10 }, Op::Jump { target: 0 }]);
    sched.run_for(VirtualTime::from_micros(10)).unwrap();

    let cpu = sched.lookup(":cpu").unwrap();
    let core = sched.device_as::<ScriptCpu>(cpu).unwrap();
    assert_eq!(core.cycles(), 10);
    assert_eq!(core.reads, vec![0; 5]);
    assert_eq!(sched.diagnostics().unhandled_reads, 5);
}
