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

//! Per-call view of the scheduler handed to device code

use super::{Device, DeviceId};
use crate::core::error::{EmulatorError, Result};
use crate::core::execute::SuspendReason;
use crate::core::interrupt::{LineId, LineState};
use crate::core::scheduler::Scheduler;
use crate::core::stream::{SoundSource, StreamGenerator, StreamHandle};
use crate::core::time::VirtualTime;
use crate::core::timing::{TimerAction, TimerHandle};

/// Scheduler access scoped to one device
///
/// Operations that take no device argument apply to the calling device:
/// timers are allocated on its behalf, `line_state` reads its own lines,
/// `suspend` suspends it. Cross-device operations name their target.
pub struct DeviceContext<'a> {
    sched: &'a mut Scheduler,
    id: DeviceId,
}

impl<'a> DeviceContext<'a> {
    pub(crate) fn new(sched: &'a mut Scheduler, id: DeviceId) -> Self {
        Self { sched, id }
    }

    /// Current virtual time as seen by the calling device
    pub fn now(&self) -> VirtualTime {
        self.sched.now()
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn tag(&self) -> &str {
        self.sched.tree().tag(self.id)
    }

    /// Clock of the calling device in Hz
    pub fn clock(&self) -> u64 {
        self.sched.tree().node(self.id).map_or(0, |node| node.clock)
    }

    /// Resolve an absolute (or root-relative) tag path
    pub fn lookup(&self, path: &str) -> Result<DeviceId> {
        self.sched
            .lookup(path)
            .ok_or_else(|| EmulatorError::UnknownDevice(path.to_string()))
    }

    /// Resolve a child of the calling device
    pub fn subdevice(&self, tag: &str) -> Result<DeviceId> {
        self.sched
            .tree()
            .subdevice(self.id, tag)
            .ok_or_else(|| EmulatorError::UnknownDevice(format!("{}:{}", self.tag(), tag)))
    }

    /// Resolve a sibling of the calling device
    pub fn sibling(&self, tag: &str) -> Result<DeviceId> {
        self.sched
            .tree()
            .sibling(self.id, tag)
            .ok_or_else(|| EmulatorError::UnknownDevice(tag.to_string()))
    }

    /// Typed view of another device that is not currently running
    pub fn device_as<T: Device>(&self, id: DeviceId) -> Option<&T> {
        self.sched.device_as::<T>(id)
    }

    pub fn device_as_mut<T: Device>(&mut self, id: DeviceId) -> Option<&mut T> {
        self.sched.device_as_mut::<T>(id)
    }

    // Timers

    /// Allocate a timer delivered to this device's `timer_expired`
    pub fn timer_alloc(&mut self, name: &str) -> Result<TimerHandle> {
        self.sched.timer_alloc(self.id, name, TimerAction::Device)
    }

    /// Allocate a timer with an explicit action
    pub fn timer_alloc_with(&mut self, name: &str, action: TimerAction) -> Result<TimerHandle> {
        self.sched.timer_alloc(self.id, name, action)
    }

    /// Fire-and-forget timer delivered to `timer_expired`, repeating
    /// every `delay` when `periodic`
    pub fn timer_set(
        &mut self,
        delay: VirtualTime,
        periodic: bool,
        param: u64,
    ) -> Result<TimerHandle> {
        self.sched
            .timer_set(self.id, delay, periodic, param, TimerAction::Device)
    }

    pub fn timer_adjust(
        &mut self,
        handle: TimerHandle,
        delay: VirtualTime,
        param: u64,
        period: VirtualTime,
    ) -> Result<()> {
        self.sched.timer_adjust(handle, delay, param, period)
    }

    pub fn timer_reset(&mut self, handle: TimerHandle, delay: VirtualTime) -> Result<()> {
        self.sched.timer_reset(handle, delay)
    }

    pub fn timer_cancel(&mut self, handle: TimerHandle) -> Result<()> {
        self.sched.timer_cancel(handle)
    }

    pub fn timer_enable(&mut self, handle: TimerHandle, enabled: bool) -> Result<()> {
        self.sched.timer_enable(handle, enabled)
    }

    pub fn timer_remaining(&self, handle: TimerHandle) -> Result<VirtualTime> {
        self.sched.timer_remaining(handle)
    }

    pub fn timer_elapsed(&self, handle: TimerHandle) -> Result<VirtualTime> {
        self.sched.timer_elapsed(handle)
    }

    // Lines

    pub fn line_set(&mut self, target: DeviceId, line: LineId, state: LineState) -> Result<()> {
        self.sched.line_set(target, line, state)
    }

    pub fn line_pulse(&mut self, target: DeviceId, line: LineId, width: VirtualTime) -> Result<()> {
        self.sched.line_pulse(target, line, width)
    }

    /// State of one of this device's own lines
    pub fn line_state(&self, line: LineId) -> Result<LineState> {
        self.sched.line_state(self.id, line)
    }

    /// Whether one of this device's own lines is asserted or held
    pub fn line_asserted(&self, line: LineId) -> bool {
        self.line_state(line).is_ok_and(|state| state.is_asserted())
    }

    /// Whether an edge is latched on one of this device's own lines
    pub fn pending_edge(&self, line: LineId) -> bool {
        self.sched.line_pending_edge(self.id, line).unwrap_or(false)
    }

    /// Acknowledge one of this device's own lines; returns the latched edge
    pub fn line_acknowledge(&mut self, line: LineId) -> Result<bool> {
        self.sched.line_acknowledge(self.id, line)
    }

    // Streams

    pub fn stream_create(
        &mut self,
        channels: usize,
        sample_rate: u32,
        generator: StreamGenerator,
    ) -> Result<StreamHandle> {
        self.sched
            .stream_create(self.id, channels, sample_rate, generator)
    }

    pub fn stream_update(&mut self, handle: StreamHandle) -> Result<()> {
        self.sched.stream_update(handle)
    }

    /// Bring a stream up to date with the caller supplying the generator
    ///
    /// A device owning a `StreamGenerator::Device` stream calls this from
    /// its own methods (before changing a register, say), since its box is
    /// checked out while it runs.
    pub fn stream_update_from(
        &mut self,
        handle: StreamHandle,
        source: &mut dyn SoundSource,
    ) -> Result<()> {
        self.sched.stream_update_from(handle, source)
    }

    pub fn set_sample_rate(&mut self, handle: StreamHandle, sample_rate: u32) -> Result<()> {
        self.sched.set_sample_rate(handle, sample_rate)
    }

    // Memory

    pub fn read8(&mut self, address: u32) -> Result<u8> {
        self.sched.read8(address)
    }

    pub fn read16(&mut self, address: u32) -> Result<u16> {
        self.sched.read16(address)
    }

    pub fn read32(&mut self, address: u32) -> Result<u32> {
        self.sched.read32(address)
    }

    pub fn write8(&mut self, address: u32, value: u8) -> Result<()> {
        self.sched.write8(address, value)
    }

    pub fn write16(&mut self, address: u32, value: u16) -> Result<()> {
        self.sched.write16(address, value)
    }

    pub fn write32(&mut self, address: u32, value: u32) -> Result<()> {
        self.sched.write32(address, value)
    }

    // Execution control

    pub fn suspend(&mut self, reason: SuspendReason) -> Result<()> {
        self.sched.suspend(self.id, reason)
    }

    pub fn resume(&mut self, target: DeviceId, reason: SuspendReason) -> Result<()> {
        self.sched.resume(target, reason)
    }

    /// Suspend the calling CPU until `trigger` is signalled
    pub fn spin_until_trigger(&mut self, trigger: u32) -> Result<()> {
        self.sched.spin_until_trigger(self.id, trigger)
    }

    /// Suspend the calling CPU until one of its lines asserts
    pub fn spin_until_interrupt(&mut self) -> Result<()> {
        self.sched.spin_until_interrupt(self.id)
    }

    pub fn trigger(&mut self, trigger: u32) {
        self.sched.trigger(trigger)
    }

    pub fn boost_interleave(&mut self, slice: VirtualTime, duration: VirtualTime) -> Result<()> {
        self.sched.boost_interleave(slice, duration)
    }

    /// Full scheduler access
    pub fn scheduler(&mut self) -> &mut Scheduler {
        self.sched
    }
}
