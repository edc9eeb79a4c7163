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

//! Test fixtures for common test scenarios

use machina::core::devices::{demo_machine, Op, ScriptCpu};
use machina::core::{
    Device, DeviceContext, DeviceDescriptor, DeviceId, Result, Scheduler, SchedulerConfig,
    TimerFired, TimerHandle, VirtualTime,
};
use std::cell::Cell;
use std::rc::Rc;

/// Configuration without the periodic stream flush
#[allow(dead_code)]
pub fn quiet_config() -> SchedulerConfig {
    SchedulerConfig {
        stream_update_hz: 0,
        strict_handles: true,
        ..SchedulerConfig::default()
    }
}

/// Started demo machine
#[allow(dead_code)]
pub fn started_demo(config: SchedulerConfig) -> Scheduler {
    let mut sched = demo_machine(config).expect("Failed to build demo machine");
    sched.start().expect("Failed to start demo machine");
    sched
}

/// Started machine with one scripted CPU
#[allow(dead_code)]
pub fn single_cpu(program: Vec<Op>, clock: u64) -> (Scheduler, DeviceId) {
    let mut sched = Scheduler::new(quiet_config()).expect("Failed to create scheduler");
    let cpu = sched
        .add_device(
            DeviceId::ROOT,
            DeviceDescriptor::new("cpu", ScriptCpu::new(program)).clock(clock),
        )
        .expect("Failed to add CPU");
    sched.start().expect("Failed to start");
    (sched, cpu)
}

/// Peripheral with a periodic timer counting its expirations
#[allow(dead_code)]
pub struct Ticker {
    pub period: VirtualTime,
    pub ticks: Rc<Cell<u64>>,
    pub timer: Option<TimerHandle>,
}

#[allow(dead_code)]
impl Ticker {
    pub fn new(period: VirtualTime) -> (Self, Rc<Cell<u64>>) {
        let ticks = Rc::new(Cell::new(0));
        let ticker = Self {
            period,
            ticks: Rc::clone(&ticks),
            timer: None,
        };
        (ticker, ticks)
    }
}

impl Device for Ticker {
    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> Result<()> {
        self.timer = Some(ctx.timer_alloc("tick")?);
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) -> Result<()> {
        if let Some(timer) = self.timer {
            ctx.timer_adjust(timer, self.period, 0, self.period)?;
        }
        Ok(())
    }

    fn timer_expired(&mut self, _ctx: &mut DeviceContext<'_>, _fired: TimerFired) -> Result<()> {
        self.ticks.set(self.ticks.get() + 1);
        Ok(())
    }
}
