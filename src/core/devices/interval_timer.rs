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

//! Programmable interval timer
//!
//! A bank of 16-bit up-counters clocked at the device clock. Counters are
//! not stepped: each channel remembers the value it had at some instant
//! and derives the current value from elapsed cycles. A core timer is armed
//! for the moment the counter reaches its target.
//!
//! ## Register Layout
//!
//! Each channel has 3 registers at 16-byte intervals:
//! - `base + n * 0x10 + 0x0`: Counter value (R/W)
//! - `base + n * 0x10 + 0x4`: Mode register (R/W)
//! - `base + n * 0x10 + 0x8`: Target value (R/W)
//!
//! ## Mode Register
//!
//! ```text
//! 11: Reached target (read-only, reset on read)
//! 4:  Interrupt on target
//! 3:  Reset counter to 0 when target reached
//! 0:  Counting enabled
//! ```
//!
//! On target with interrupts enabled the channel pulses its output line
//! on the interrupt target device.

use crate::core::device::{Device, DeviceCaps, DeviceContext, DeviceId};
use crate::core::error::{AccessKind, EmulatorError, Result};
use crate::core::interrupt::LineId;
use crate::core::memory::MemoryMapped;
use crate::core::time::VirtualTime;
use crate::core::timing::{TimerFired, TimerHandle};

pub const MODE_ENABLE: u32 = 1 << 0;
pub const MODE_RESET_ON_TARGET: u32 = 1 << 3;
pub const MODE_IRQ_ON_TARGET: u32 = 1 << 4;
pub const MODE_REACHED_TARGET: u32 = 1 << 11;

const MODE_WRITABLE: u32 = MODE_ENABLE | MODE_RESET_ON_TARGET | MODE_IRQ_ON_TARGET;
const COUNTER_RANGE: u64 = 0x1_0000;

/// One counter channel
#[derive(Debug, Clone, Default)]
pub struct Channel {
    /// Counter value at `since`
    counter: u16,
    since: VirtualTime,
    target: u16,
    mode: u32,
    reached_target: bool,
    /// Target hits since reset
    pub hits: u64,
    timer: Option<TimerHandle>,
    /// Resolved at start
    output: Option<LineId>,
}

impl Channel {
    fn enabled(&self) -> bool {
        self.mode & MODE_ENABLE != 0
    }

    fn counter_at(&self, now: VirtualTime, clock: u64) -> u16 {
        if !self.enabled() {
            return self.counter;
        }
        let elapsed = now.saturating_sub(self.since).as_cycles(clock);
        ((self.counter as u64 + elapsed) % COUNTER_RANGE) as u16
    }

    /// Fold elapsed cycles into the stored counter
    fn latch(&mut self, now: VirtualTime, clock: u64) {
        self.counter = self.counter_at(now, clock);
        self.since = now;
    }

    /// Cycles until the counter next equals the target
    fn cycles_to_target(&self, now: VirtualTime, clock: u64) -> u64 {
        let counter = self.counter_at(now, clock) as u64;
        let target = self.target as u64;
        if target > counter {
            target - counter
        } else {
            target + COUNTER_RANGE - counter
        }
    }
}

pub struct IntervalTimer {
    base: u32,
    channels: Vec<Channel>,
    irq_tag: String,
    irq_lines: Vec<&'static str>,
    irq_target: Option<DeviceId>,
}

impl IntervalTimer {
    /// Timer at `base` with one channel per line name; channel `n`
    /// pulses `lines[n]` on the device tagged `irq_tag`
    pub fn new(base: u32, irq_tag: impl Into<String>, lines: &[&'static str]) -> Self {
        Self {
            base,
            channels: vec![Channel::default(); lines.len()],
            irq_tag: irq_tag.into(),
            irq_lines: lines.to_vec(),
            irq_target: None,
        }
    }

    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    /// Current counter value of a channel
    pub fn counter(&self, index: usize, now: VirtualTime, clock: u64) -> Option<u16> {
        self.channels
            .get(index)
            .map(|channel| channel.counter_at(now, clock))
    }

    fn rearm(&mut self, ctx: &mut DeviceContext<'_>, index: usize) -> Result<()> {
        let (now, clock) = (ctx.now(), ctx.clock());
        let channel = &self.channels[index];
        let Some(timer) = channel.timer else {
            return Ok(());
        };
        if channel.enabled() && channel.mode & MODE_IRQ_ON_TARGET != 0 {
            let delay = VirtualTime::from_cycles(channel.cycles_to_target(now, clock), clock)?;
            ctx.timer_adjust(timer, delay, index as u64, VirtualTime::ZERO)
        } else {
            ctx.timer_cancel(timer)
        }
    }

    fn unhandled(&self, kind: AccessKind, offset: u32) -> EmulatorError {
        EmulatorError::UnhandledAccess {
            kind,
            address: self.base + offset,
            width: 4,
        }
    }
}

impl Device for IntervalTimer {
    fn capabilities(&self) -> DeviceCaps {
        DeviceCaps::MEMORY | DeviceCaps::PERIPHERAL
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> Result<()> {
        let target = ctx.lookup(&self.irq_tag)?;
        for (index, channel) in self.channels.iter_mut().enumerate() {
            channel.timer = Some(ctx.timer_alloc(&format!("channel{}", index))?);
            channel.output = Some(ctx.scheduler().line_by_name(target, self.irq_lines[index])?);
        }
        self.irq_target = Some(target);
        Ok(())
    }

    fn reset(&mut self, ctx: &mut DeviceContext<'_>) -> Result<()> {
        let now = ctx.now();
        for channel in &mut self.channels {
            channel.counter = 0;
            channel.since = now;
            channel.target = 0;
            channel.mode = 0;
            channel.reached_target = false;
            channel.hits = 0;
        }
        Ok(())
    }

    fn timer_expired(&mut self, ctx: &mut DeviceContext<'_>, fired: TimerFired) -> Result<()> {
        let index = fired.param as usize;
        let (now, clock) = (ctx.now(), ctx.clock());
        let Some(channel) = self.channels.get_mut(index) else {
            return Err(EmulatorError::fault(ctx.tag(), format!("no channel {}", index)));
        };

        channel.reached_target = true;
        channel.hits += 1;
        if channel.mode & MODE_RESET_ON_TARGET != 0 {
            channel.counter = 0;
            channel.since = now;
        } else {
            channel.latch(now, clock);
        }
        log::trace!("Timer {} reached target at {}", index, now);

        if let (Some(target), Some(line)) = (self.irq_target, channel.output) {
            ctx.line_pulse(target, line, VirtualTime::ZERO)?;
        }
        self.rearm(ctx, index)
    }

    fn as_memory(&mut self) -> Option<&mut dyn MemoryMapped> {
        Some(self)
    }
}

impl MemoryMapped for IntervalTimer {
    fn address_range(&self) -> (u32, u32) {
        let size = (self.channels.len().max(1) as u32) * 0x10;
        (self.base, self.base + size - 1)
    }

    fn read32(&mut self, ctx: &mut DeviceContext<'_>, offset: u32) -> Result<u32> {
        let (now, clock) = (ctx.now(), ctx.clock());
        let index = (offset / 0x10) as usize;
        let Some(channel) = self.channels.get_mut(index) else {
            return Err(self.unhandled(AccessKind::Read, offset));
        };
        match offset & 0xC {
            0x0 => Ok(channel.counter_at(now, clock) as u32),
            0x4 => {
                let mut value = channel.mode;
                if channel.reached_target {
                    value |= MODE_REACHED_TARGET;
                }
                // Reading mode resets the flag
                channel.reached_target = false;
                Ok(value)
            }
            0x8 => Ok(channel.target as u32),
            _ => Err(self.unhandled(AccessKind::Read, offset)),
        }
    }

    fn write32(&mut self, ctx: &mut DeviceContext<'_>, offset: u32, value: u32) -> Result<()> {
        let (now, clock) = (ctx.now(), ctx.clock());
        let index = (offset / 0x10) as usize;
        let Some(channel) = self.channels.get_mut(index) else {
            return Err(self.unhandled(AccessKind::Write, offset));
        };
        match offset & 0xC {
            0x0 => {
                channel.counter = value as u16;
                channel.since = now;
            }
            0x4 => {
                channel.latch(now, clock);
                channel.mode = value & MODE_WRITABLE;
                channel.reached_target = false;
                log::trace!("Timer {} mode = 0x{:04X}", index, channel.mode);
            }
            0x8 => {
                channel.latch(now, clock);
                channel.target = value as u16;
            }
            _ => return Err(self.unhandled(AccessKind::Write, offset)),
        }
        self.rearm(ctx, index)
    }
}
