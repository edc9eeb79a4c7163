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

//! Scheduler
//!
//! One [`Scheduler`] drives one emulated machine. It owns the device tree,
//! every timer, line, stream and CPU execution state, and the virtual
//! clock. There is no global state: device code reaches the scheduler
//! through the [`DeviceContext`] it is handed.
//!
//! # Main loop
//!
//! ```text
//! run_until(t):
//!   while now < t:
//!     horizon = min(next timer, t, now + quantum)
//!     run every CPU up to the horizon (may lower it)
//!     now = horizon
//!     fire due timers one at a time, each at its own expiration
//! ```
//!
//! The scheduler's operations are split by concern:
//!
//! - `timers`: allocating and arming timers, stale-handle policy
//! - `lines`: driving and acknowledging input lines
//! - `streams`: stream creation, flushing and the mixer feed
//! - `bus`: memory-mapped dispatch
//! - `control`: suspend/resume, triggers, interleave boosts, clocks
//!
//! # Example
//!
//! ```
//! use machina::core::config::SchedulerConfig;
//! use machina::core::device::DeviceId;
//! use machina::core::scheduler::Scheduler;
//! use machina::core::time::VirtualTime;
//! use machina::core::timing::TimerAction;
//!
//! let mut sched = Scheduler::new(SchedulerConfig::default()).unwrap();
//! sched.start().unwrap();
//!
//! let tick = sched
//!     .timer_alloc(DeviceId::ROOT, "tick", TimerAction::Inert)
//!     .unwrap();
//! sched
//!     .timer_adjust(tick, VirtualTime::from_millis(5), 0, VirtualTime::ZERO)
//!     .unwrap();
//! sched.run_for(VirtualTime::from_millis(10)).unwrap();
//!
//! assert_eq!(sched.now(), VirtualTime::from_millis(10));
//! ```

mod bus;
mod control;
mod lines;
mod streams;
mod timers;

#[cfg(test)]
mod tests;

use crate::core::config::SchedulerConfig;
use crate::core::device::{
    Device, DeviceCaps, DeviceContext, DeviceDescriptor, DeviceId, DeviceNode, DeviceState,
    DeviceTree,
};
use crate::core::error::{AccessKind, EmulatorError, Result};
use crate::core::execute::{self, ExecState, ExecutionDriver};
use crate::core::interrupt::LineState;
use crate::core::memory::AddressMap;
use crate::core::stream::{SoundMixer, StreamTable};
use crate::core::time::VirtualTime;
use crate::core::timing::{TimerAction, TimerFired, TimerHandle, TimerManager};
use serde::Serialize;
use std::any::Any;

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Devices may be added
    Configuring,
    /// Started; time may advance
    Running,
    /// Torn down
    Stopped,
}

/// Temporarily tightened interleave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Boost {
    pub slice: VirtualTime,
    pub until: VirtualTime,
}

/// Counters of downgraded faults and scheduling activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diagnostics {
    pub unhandled_reads: u64,
    pub unhandled_writes: u64,
    pub device_faults: u64,
    pub not_modeled: u64,
    pub stale_handles: u64,
    pub overruns: u64,
    pub horizons: u64,
    pub timers_fired: u64,
    pub mixed_frames: u64,
}

/// Deterministic scheduler of one emulated machine
pub struct Scheduler {
    pub(crate) config: SchedulerConfig,
    pub(crate) tree: DeviceTree,
    pub(crate) timers: TimerManager,
    pub(crate) driver: ExecutionDriver,
    pub(crate) streams: StreamTable,
    pub(crate) mixer: SoundMixer,
    pub(crate) map: AddressMap,
    pub(crate) now: VirtualTime,
    /// Local time of the CPU currently executing
    pub(crate) exec_now: Option<VirtualTime>,
    pub(crate) exec_device: Option<DeviceId>,
    pub(crate) phase: Phase,
    pub(crate) frame_count: u64,
    pub(crate) frame_base: VirtualTime,
    pub(crate) boost: Option<Boost>,
    pub(crate) diagnostics: Diagnostics,
    pub(crate) flush_timer: Option<TimerHandle>,
}

impl Scheduler {
    /// Create an empty machine in the configuring phase
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration has an unusable rate.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        let mixer = SoundMixer::new(config.output_rate);
        Ok(Self {
            config,
            tree: DeviceTree::new(),
            timers: TimerManager::new(),
            driver: ExecutionDriver::new(),
            streams: StreamTable::new(),
            mixer,
            map: AddressMap::new(),
            now: VirtualTime::ZERO,
            exec_now: None,
            exec_device: None,
            phase: Phase::Configuring,
            frame_count: 0,
            frame_base: VirtualTime::ZERO,
            boost: None,
            diagnostics: Diagnostics::default(),
            flush_timer: None,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current virtual time
    ///
    /// While a CPU executes this is that CPU's local time.
    pub fn now(&self) -> VirtualTime {
        self.exec_now.unwrap_or(self.now)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn tree(&self) -> &DeviceTree {
        &self.tree
    }

    pub fn timers(&self) -> &TimerManager {
        &self.timers
    }

    pub fn streams(&self) -> &StreamTable {
        &self.streams
    }

    pub fn address_map(&self) -> &AddressMap {
        &self.map
    }

    pub fn exec_state(&self, id: DeviceId) -> Option<&ExecState> {
        self.driver.get(id)
    }

    pub fn exec_states(&self) -> impl Iterator<Item = &ExecState> + '_ {
        self.driver.iter()
    }

    /// Fault and activity counters
    pub fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            timers_fired: self.timers.fired_count(),
            ..self.diagnostics.clone()
        }
    }

    pub fn lookup(&self, path: &str) -> Option<DeviceId> {
        self.tree.lookup(path)
    }

    pub fn device(&self, id: DeviceId) -> Result<&DeviceNode> {
        self.tree.node(id)
    }

    /// Typed view of a device that is not currently running
    pub fn device_as<T: Device>(&self, id: DeviceId) -> Option<&T> {
        self.tree.device_as::<T>(id)
    }

    pub fn device_as_mut<T: Device>(&mut self, id: DeviceId) -> Option<&mut T> {
        self.tree.device_as_mut::<T>(id)
    }

    /// Run `f` with a device checked out and a context scoped to it
    pub fn with_device<R, F>(&mut self, id: DeviceId, f: F) -> Result<R>
    where
        F: FnOnce(&mut dyn Device, &mut DeviceContext<'_>) -> Result<R>,
    {
        self.tree.node(id)?;
        let mut device = self.tree.take(id).ok_or_else(|| EmulatorError::InvalidLifecycle {
            device: self.tree.tag(id).to_string(),
            reason: "device is already running".to_string(),
        })?;
        let result = {
            let mut ctx = DeviceContext::new(self, id);
            f(device.as_mut(), &mut ctx)
        };
        self.tree.put(id, device);
        result
    }

    /// Like [`Scheduler::with_device`], downcast to the concrete type
    pub fn with_device_as<T, R, F>(&mut self, id: DeviceId, f: F) -> Result<R>
    where
        T: Device,
        F: FnOnce(&mut T, &mut DeviceContext<'_>) -> Result<R>,
    {
        self.with_device(id, |device, ctx| {
            let any: &mut dyn Any = device;
            match any.downcast_mut::<T>() {
                Some(device) => f(device, ctx),
                None => Err(EmulatorError::Config(format!(
                    "'{}' is not a {}",
                    ctx.tag(),
                    std::any::type_name::<T>()
                ))),
            }
        })
    }

    // Configuration

    /// Add a device (and its children) under `parent`
    ///
    /// # Errors
    ///
    /// `InvalidLifecycle` once the machine has started; `DuplicateTag`,
    /// `InvalidClock` or `Config` for a malformed descriptor.
    pub fn add_device(&mut self, parent: DeviceId, descriptor: DeviceDescriptor) -> Result<DeviceId> {
        if self.phase != Phase::Configuring {
            return Err(EmulatorError::InvalidLifecycle {
                device: descriptor.tag,
                reason: "devices can only be added before start".to_string(),
            });
        }
        let DeviceDescriptor {
            tag,
            clock,
            caps,
            device,
            children,
        } = descriptor;

        let id = self.tree.insert(parent, &tag, clock, caps, device)?;
        let clock = self.tree.node(id)?.clock;

        if caps.contains(DeviceCaps::EXECUTE) {
            self.driver.add(ExecState::new(id, clock, self.now));
        }
        if caps.contains(DeviceCaps::MEMORY) {
            let range = self.with_device(id, |device, _| {
                Ok(device.as_memory().map(|memory| memory.address_range()))
            })?;
            if let Some((start, end)) = range {
                self.map.map(start, end, id)?;
            }
        }

        for child in children {
            self.add_device(id, child)?;
        }
        Ok(id)
    }

    /// Claim an extra address range (mirrors) for a memory device
    pub fn map_range(&mut self, id: DeviceId, start: u32, end: u32) -> Result<()> {
        if !self.tree.node(id)?.caps.contains(DeviceCaps::MEMORY) {
            return Err(EmulatorError::Config(format!(
                "'{}' is not a memory device",
                self.tree.tag(id)
            )));
        }
        self.map.map(start, end, id)
    }

    // Lifecycle

    /// Start every device (pre-order), then reset the machine
    pub fn start(&mut self) -> Result<()> {
        if self.phase != Phase::Configuring {
            return Err(EmulatorError::InvalidLifecycle {
                device: ":".to_string(),
                reason: "start may only run once".to_string(),
            });
        }

        for id in self.tree.pre_order() {
            let result = self.with_device(id, |device, ctx| device.start(ctx));
            self.contain(id, result)?;
            self.tree.node_mut(id)?.state = DeviceState::Running;
        }

        if self.config.stream_update_hz > 0 {
            let handle = self
                .timers
                .alloc(DeviceId::ROOT, "stream-flush", TimerAction::FlushStreams, false);
            self.flush_timer = Some(handle);
        }

        self.phase = Phase::Running;
        self.reset()?;
        log::info!(
            "Scheduler: '{}' started with {} devices ({} CPUs)",
            self.config.machine,
            self.tree.len() - 1,
            self.driver.len()
        );
        Ok(())
    }

    /// Reset every device
    ///
    /// Owned timers are disabled (transient ones dropped), lines cleared,
    /// streams and CPUs rebased at the current time; then `Device::reset`
    /// runs in pre-order.
    pub fn reset(&mut self) -> Result<()> {
        self.require_running("reset")?;
        let now = self.now;
        let order = self.tree.pre_order();

        for &id in &order {
            self.timers.disable_owner(id);
            self.tree.node_mut(id)?.lines.reset();
        }
        for (_, stream) in self.streams.iter_mut() {
            stream.rebase(now);
            stream.pending.clear();
        }
        for cpu in self.driver.iter_mut() {
            cpu.rebase(now);
            cpu.suspend = Default::default();
            cpu.awaited_trigger = None;
        }
        self.mixer.reset(now);
        self.boost = None;
        self.frame_base = now;
        self.frame_count = 0;

        if let Some(handle) = self.flush_timer {
            let period = VirtualTime::from_hertz_period(self.config.stream_update_hz)?;
            self.timers.adjust(handle, now, period, 0, period);
        }

        for id in order {
            let result = self.with_device(id, |device, ctx| device.reset(ctx));
            self.contain(id, result)?;
        }
        log::debug!("Scheduler: reset at {}", now);
        Ok(())
    }

    /// Stop every device (post-order) and release its resources
    pub fn stop(&mut self) -> Result<()> {
        self.require_running("stop")?;

        for id in self.tree.post_order() {
            let result = self.with_device(id, |device, ctx| device.stop(ctx));
            self.contain(id, result)?;

            self.timers.remove_owner(id);
            self.streams.remove_owner(id);
            self.driver.remove(id);
            self.map.unmap_device(id);
            self.tree.node_mut(id)?.state = DeviceState::Stopped;
        }
        self.flush_timer = None;
        self.phase = Phase::Stopped;
        log::info!("Scheduler: stopped at {}", self.now);
        Ok(())
    }

    fn require_running(&self, operation: &str) -> Result<()> {
        if self.phase != Phase::Running {
            return Err(EmulatorError::InvalidLifecycle {
                device: ":".to_string(),
                reason: format!("{} requires a started machine ({:?})", operation, self.phase),
            });
        }
        Ok(())
    }

    // Time

    /// Advance virtual time to exactly `target`
    ///
    /// # Errors
    ///
    /// `InvalidTimeRange` if `target` is in the past; any fatal error
    /// raised by a device.
    pub fn run_until(&mut self, target: VirtualTime) -> Result<()> {
        self.require_running("run_until")?;
        if target < self.now {
            return Err(EmulatorError::InvalidTimeRange(format!(
                "cannot run back to {} from {}",
                target, self.now
            )));
        }
        if target.is_never() {
            return Err(EmulatorError::InvalidTimeRange(
                "cannot run until never".to_string(),
            ));
        }

        self.fire_due()?;
        while self.now < target {
            let mut horizon = target;
            if let Some(next) = self.timers.next_expiration() {
                horizon = horizon.min(next.max(self.now));
            }
            if !self.driver.is_empty() {
                horizon = horizon.min(self.now.saturating_add(self.quantum()?));
            }

            let reached = execute::run_cpus(self, horizon)?;
            self.now = reached.max(self.now);
            self.diagnostics.horizons += 1;
            self.fire_due()?;
        }
        Ok(())
    }

    /// Advance virtual time by `duration`
    pub fn run_for(&mut self, duration: VirtualTime) -> Result<()> {
        let target = self.now.checked_add(duration)?;
        self.run_until(target)
    }

    /// Advance to the next frame boundary at `frame_rate_hz`
    ///
    /// Frame boundaries are computed from the frame count, so they never
    /// drift even when a frame period is not a whole number of ticks.
    pub fn advance_one_frame(&mut self) -> Result<()> {
        let next = self.frame_count + 1;
        let target = self
            .frame_base
            .checked_add(VirtualTime::from_cycles(next, self.config.frame_rate_hz)?)?;
        self.run_until(target)?;
        self.frame_count = next;
        Ok(())
    }

    fn quantum(&mut self) -> Result<VirtualTime> {
        let base = VirtualTime::from_hertz_period(self.config.max_quantum_hz)?;
        match self.boost {
            Some(boost) if boost.until > self.now => Ok(base.min(boost.slice)),
            Some(_) => {
                self.boost = None;
                Ok(base)
            }
            None => Ok(base),
        }
    }

    /// Fire every timer due at `now`, one at a time
    fn fire_due(&mut self) -> Result<()> {
        while let Some((fired, action)) = self.timers.begin_fire(self.now) {
            let mut action = action;
            let result = match action.as_mut() {
                Some(action) => self.dispatch_timer(fired, action),
                None => Ok(()),
            };
            self.timers.end_fire(fired.handle, action);
            self.contain(fired.handle.owner(), result)?;
        }
        Ok(())
    }

    fn dispatch_timer(&mut self, fired: TimerFired, action: &mut TimerAction) -> Result<()> {
        let owner = fired.handle.owner();
        match action {
            TimerAction::Device => {
                self.with_device(owner, |device, ctx| device.timer_expired(ctx, fired))
            }
            TimerAction::Callback(callback) => {
                let mut ctx = DeviceContext::new(self, owner);
                callback(&mut ctx, fired)
            }
            TimerAction::ClearLine { target, line } => {
                self.line_set(*target, *line, LineState::Clear)
            }
            TimerAction::FlushStreams => self.flush_streams(),
            TimerAction::Inert => Ok(()),
        }
    }

    // Error containment

    /// Downgrade a local hardware fault to a diagnostic; pass fatal errors on
    pub(crate) fn contain(&mut self, device: DeviceId, result: Result<()>) -> Result<()> {
        match result {
            Err(err) if !err.is_fatal() => {
                self.note_fault(device, &err);
                Ok(())
            }
            other => other,
        }
    }

    pub(crate) fn note_fault(&mut self, device: DeviceId, err: &EmulatorError) {
        match err {
            EmulatorError::UnhandledAccess {
                kind: AccessKind::Read,
                ..
            } => self.diagnostics.unhandled_reads += 1,
            EmulatorError::UnhandledAccess {
                kind: AccessKind::Write,
                ..
            } => self.diagnostics.unhandled_writes += 1,
            EmulatorError::NotModeled { .. } => self.diagnostics.not_modeled += 1,
            _ => self.diagnostics.device_faults += 1,
        }
        log::warn!("{} at {}: {}", self.tree.tag(device), self.now(), err);
    }
}
