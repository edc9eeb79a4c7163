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

//! Reference machine
//!
//! Small devices that exercise every contract of the core, and
//! [`demo_machine`] wiring them together:
//!
//! ```text
//! ┌─────────┐  timer0/timer1   ┌──────┐   irq   ┌─────┐
//! │  timer  │ ───────────────> │ irqc │ ──────> │ cpu │
//! └─────────┘   (pulses)       └──────┘         └─────┘
//!                                  ▲               │ reads/writes
//!                                  └───────────────┤
//!          ┌──────┐                                │
//!          │ tone │ <──────────────────────────────┤
//!          └──────┘                                │
//!          ┌──────┐                                │
//!          │ ram  │ <──────────────────────────────┘
//!          └──────┘
//! ```

mod interval_timer;
mod irq_controller;
mod ram;
mod script_cpu;
mod tone;

#[cfg(test)]
mod tests;

pub use interval_timer::{
    Channel, IntervalTimer, MODE_ENABLE, MODE_IRQ_ON_TARGET, MODE_REACHED_TARGET,
    MODE_RESET_ON_TARGET,
};
pub use irq_controller::IrqController;
pub use ram::Ram;
pub use script_cpu::{Op, ScriptCpu, Serviced, INTERRUPT_CYCLES, IRQ, NMI};
pub use tone::ToneGenerator;

use crate::core::config::SchedulerConfig;
use crate::core::device::{DeviceDescriptor, DeviceId};
use crate::core::error::Result;
use crate::core::scheduler::Scheduler;

/// Memory map of the demo machine
pub mod map {
    pub const RAM_BASE: u32 = 0x0000_0000;
    pub const RAM_SIZE: usize = 64 * 1024;
    pub const IRQC_BASE: u32 = 0x1F80_1070;
    pub const TIMER_BASE: u32 = 0x1F80_1100;
    pub const TONE_BASE: u32 = 0x1F80_1C00;
}

/// CPU clock of the demo machine
pub const CPU_CLOCK: u64 = 1_000_000;

/// Tone sample rate of the demo machine
pub const TONE_RATE: u32 = 24_000;

/// Timer 0 period in CPU cycles (1 ms)
pub const TICK_CYCLES: u32 = 1_000;

/// Boot program: program timer 0 for a 1 ms tick, start a tone, then
/// sleep until each interrupt and touch memory
pub fn demo_program() -> Vec<Op> {
    use map::*;
    vec![
        Op::Write {
            address: TIMER_BASE + 0x8,
            value: TICK_CYCLES,
        },
        Op::Write {
            address: TIMER_BASE + 0x4,
            value: MODE_ENABLE | MODE_RESET_ON_TARGET | MODE_IRQ_ON_TARGET,
        },
        Op::Write {
            address: IRQC_BASE + 0x4,
            value: 0b01,
        },
        Op::Write {
            address: TONE_BASE,
            value: 24,
        },
        Op::Write {
            address: TONE_BASE + 0x4,
            value: 8_000,
        },
        Op::WaitInterrupt,
        Op::Read { address: RAM_BASE },
        Op::Write {
            address: RAM_BASE + 4,
            value: 0xC0FF_EE00,
        },
        Op::Nop { cycles: 50 },
        Op::Jump { target: 5 },
    ]
}

/// Build (but do not start) the demo machine
pub fn demo_machine(config: SchedulerConfig) -> Result<Scheduler> {
    use map::*;
    let mut sched = Scheduler::new(config)?;

    let cpu = ScriptCpu::new(demo_program()).with_irq_ack(IRQC_BASE, u32::MAX);
    sched.add_device(DeviceId::ROOT, DeviceDescriptor::new("cpu", cpu).clock(CPU_CLOCK))?;
    sched.add_device(
        DeviceId::ROOT,
        DeviceDescriptor::new(
            "irqc",
            IrqController::new(IRQC_BASE, &["timer0", "timer1"], ":cpu", "irq"),
        ),
    )?;
    sched.add_device(
        DeviceId::ROOT,
        DeviceDescriptor::new(
            "timer",
            IntervalTimer::new(TIMER_BASE, ":irqc", &["timer0", "timer1"]),
        )
        .clock(CPU_CLOCK),
    )?;
    sched.add_device(
        DeviceId::ROOT,
        DeviceDescriptor::new("tone", ToneGenerator::new(TONE_BASE, TONE_RATE)).clock(TONE_RATE as u64),
    )?;
    sched.add_device(
        DeviceId::ROOT,
        DeviceDescriptor::new("ram", Ram::new(RAM_BASE, RAM_SIZE)),
    )?;

    log::debug!("Demo machine assembled with {} devices", sched.tree().len() - 1);
    Ok(sched)
}
