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

//! Test devices

use super::super::*;
pub use crate::core::device::{Device, DeviceCaps, DeviceContext, DeviceDescriptor, DeviceId};
pub use crate::core::error::{EmulatorError, Result};
pub use crate::core::execute::{Execute, SuspendReason};
pub use crate::core::interrupt::{LineConfig, LineId, LineKind, LineState};
pub use crate::core::memory::MemoryMapped;
pub use crate::core::stream::{SoundSource, StreamChunk, StreamGenerator};
pub use crate::core::time::VirtualTime;
pub use crate::core::timing::{TimerAction, TimerFired};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub type Log = Rc<RefCell<Vec<String>>>;

pub fn ms(n: u64) -> VirtualTime {
    VirtualTime::from_millis(n)
}

pub fn us(n: u64) -> VirtualTime {
    VirtualTime::from_micros(n)
}

pub fn quiet_config() -> SchedulerConfig {
    SchedulerConfig {
        stream_update_hz: 0,
        strict_handles: true,
        ..SchedulerConfig::default()
    }
}

pub fn started(config: SchedulerConfig, devices: Vec<DeviceDescriptor>) -> Scheduler {
    let mut sched = Scheduler::new(config).unwrap();
    for device in devices {
        sched.add_device(DeviceId::ROOT, device).unwrap();
    }
    sched.start().unwrap();
    sched
}

pub const IRQ: LineId = LineId(0);
pub const NMI: LineId = LineId(1);

fn test_lines() -> Vec<LineConfig> {
    vec![
        LineConfig::new("irq", LineKind::Level),
        LineConfig::new("nmi", LineKind::Edge),
    ]
}

/// Peripheral that logs its hooks
pub struct Probe {
    pub name: &'static str,
    pub log: Log,
}

impl Probe {
    pub fn new(name: &'static str, log: &Log) -> Self {
        Self {
            name,
            log: Rc::clone(log),
        }
    }

    fn note(&self, event: String) {
        self.log.borrow_mut().push(event);
    }
}

impl Device for Probe {
    fn input_lines(&self) -> Vec<LineConfig> {
        test_lines()
    }

    fn start(&mut self, _ctx: &mut DeviceContext<'_>) -> Result<()> {
        self.note(format!("start:{}", self.name));
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) -> Result<()> {
        self.note(format!("reset:{}", self.name));
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut DeviceContext<'_>) -> Result<()> {
        self.note(format!("stop:{}", self.name));
        Ok(())
    }

    fn timer_expired(&mut self, ctx: &mut DeviceContext<'_>, fired: TimerFired) -> Result<()> {
        self.note(format!("timer:{}:{}@{}", self.name, fired.param, ctx.now()));
        Ok(())
    }

    fn line_changed(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        line: LineId,
        state: LineState,
    ) -> Result<()> {
        self.note(format!("line:{}:{}:{:?}", self.name, line, state));
        Ok(())
    }
}

/// One scripted response of [`TestCpu`]
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Consume up to this many cycles
    Run(u64),
    /// Report one cycle more than the budget
    Overrun,
    /// Consume nothing
    Yield,
    WaitInterrupt,
    WaitTrigger(u32),
    /// Arm a one-shot `probe` timer and stop after one cycle
    Arm(VirtualTime),
    /// Fail with a device fault
    Fault,
    /// Change its own clock, then run the whole budget
    SetClock(u64),
}

/// CPU that runs its whole budget unless scripted otherwise
#[derive(Default)]
pub struct TestCpu {
    pub script: VecDeque<Step>,
    /// (local time, budget) of each call
    pub calls: Vec<(VirtualTime, u64)>,
    pub fired: Vec<VirtualTime>,
    pub lines: Vec<(LineId, LineState)>,
}

impl TestCpu {
    pub fn scripted(steps: &[Step]) -> Self {
        Self {
            script: steps.iter().copied().collect(),
            ..Self::default()
        }
    }
}

impl Device for TestCpu {
    fn capabilities(&self) -> DeviceCaps {
        DeviceCaps::EXECUTE
    }

    fn input_lines(&self) -> Vec<LineConfig> {
        test_lines()
    }

    fn timer_expired(&mut self, ctx: &mut DeviceContext<'_>, _fired: TimerFired) -> Result<()> {
        self.fired.push(ctx.now());
        Ok(())
    }

    fn line_changed(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        line: LineId,
        state: LineState,
    ) -> Result<()> {
        self.lines.push((line, state));
        Ok(())
    }

    fn as_execute(&mut self) -> Option<&mut dyn Execute> {
        Some(self)
    }
}

impl Execute for TestCpu {
    fn execute(&mut self, ctx: &mut DeviceContext<'_>, budget: u64) -> Result<u64> {
        self.calls.push((ctx.now(), budget));
        match self.script.pop_front() {
            None => Ok(budget),
            Some(Step::Run(cycles)) => Ok(cycles.min(budget)),
            Some(Step::Overrun) => Ok(budget + 1),
            Some(Step::Yield) => Ok(0),
            Some(Step::WaitInterrupt) => {
                ctx.spin_until_interrupt()?;
                Ok(1)
            }
            Some(Step::WaitTrigger(trigger)) => {
                ctx.spin_until_trigger(trigger)?;
                Ok(1)
            }
            Some(Step::Arm(delay)) => {
                let timer = ctx.timer_alloc("probe")?;
                ctx.timer_adjust(timer, delay, 0, VirtualTime::ZERO)?;
                Ok(1)
            }
            Some(Step::Fault) => Err(EmulatorError::fault(ctx.tag(), "illegal opcode")),
            Some(Step::SetClock(hz)) => {
                let id = ctx.id();
                ctx.scheduler().set_clock(id, hz)?;
                Ok(budget)
            }
        }
    }
}

/// Four 32-bit registers; the last one rejects writes
pub struct Regs {
    pub base: u32,
    pub words: [u32; 4],
}

impl Regs {
    pub fn at(base: u32) -> Self {
        Self { base, words: [0; 4] }
    }
}

impl Device for Regs {
    fn capabilities(&self) -> DeviceCaps {
        DeviceCaps::MEMORY
    }

    fn as_memory(&mut self) -> Option<&mut dyn MemoryMapped> {
        Some(self)
    }
}

impl MemoryMapped for Regs {
    fn address_range(&self) -> (u32, u32) {
        (self.base, self.base + 15)
    }

    fn read32(&mut self, _ctx: &mut DeviceContext<'_>, offset: u32) -> Result<u32> {
        Ok(self.words[(offset / 4) as usize])
    }

    fn write32(&mut self, ctx: &mut DeviceContext<'_>, offset: u32, value: u32) -> Result<()> {
        if offset >= 12 {
            return Err(EmulatorError::fault(ctx.tag(), "status register is read-only"));
        }
        self.words[(offset / 4) as usize] = value;
        Ok(())
    }
}

/// Sound device producing a constant level
pub struct Level {
    pub value: i16,
}

impl Device for Level {
    fn capabilities(&self) -> DeviceCaps {
        DeviceCaps::SOUND
    }

    fn as_sound(&mut self) -> Option<&mut dyn SoundSource> {
        Some(self)
    }
}

impl SoundSource for Level {
    fn generate(&mut self, chunk: &mut StreamChunk) -> Result<()> {
        chunk.fill(self.value);
        Ok(())
    }
}
