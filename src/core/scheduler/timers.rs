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

//! Timer operations

use super::Scheduler;
use crate::core::device::{DeviceId, DeviceState};
use crate::core::error::{EmulatorError, Result};
use crate::core::time::VirtualTime;
use crate::core::timing::{TimerAction, TimerHandle};

impl Scheduler {
    /// Allocate a disabled timer owned by `owner`
    ///
    /// Snapshots find persistent timers again by owner and name, so a name
    /// may be used once per owner.
    ///
    /// # Errors
    ///
    /// `UnknownDevice` for a bad id, `InvalidLifecycle` for a stopped owner,
    /// `DuplicateTag` when `owner` already has a timer called `name`.
    pub fn timer_alloc(
        &mut self,
        owner: DeviceId,
        name: &str,
        action: TimerAction,
    ) -> Result<TimerHandle> {
        self.require_live_owner(owner)?;
        if self.timers.find(owner, name).is_some() {
            return Err(EmulatorError::DuplicateTag(format!(
                "timer '{}' of '{}'",
                name,
                self.tree.tag(owner)
            )));
        }
        Ok(self.timers.alloc(owner, name, action, false))
    }

    /// Arm a transient timer `delay` from now
    ///
    /// A one-shot is freed after it fires. With `periodic` the timer
    /// repeats every `delay` until cancelled, removed or its owner stops.
    pub fn timer_set(
        &mut self,
        owner: DeviceId,
        delay: VirtualTime,
        periodic: bool,
        param: u64,
        action: TimerAction,
    ) -> Result<TimerHandle> {
        self.require_live_owner(owner)?;
        if periodic && delay.is_zero() {
            return Err(EmulatorError::InvalidTimeRange(
                "periodic timer with a zero period".to_string(),
            ));
        }
        let handle = self.timers.alloc(owner, "transient", action, true);
        let period = if periodic { delay } else { VirtualTime::ZERO };
        let now = self.now();
        self.timers.adjust(handle, now, delay, param, period);
        Ok(handle)
    }

    /// Arm a timer `delay` from now with a parameter and period
    ///
    /// A zero period makes a one-shot; a `NEVER` delay disables.
    pub fn timer_adjust(
        &mut self,
        handle: TimerHandle,
        delay: VirtualTime,
        param: u64,
        period: VirtualTime,
    ) -> Result<()> {
        let now = self.now();
        if self.timers.adjust(handle, now, delay, param, period) {
            Ok(())
        } else {
            self.stale(handle, "adjust")
        }
    }

    /// Re-arm `delay` from now, keeping parameter and period
    pub fn timer_reset(&mut self, handle: TimerHandle, delay: VirtualTime) -> Result<()> {
        let now = self.now();
        if self.timers.reset(handle, now, delay) {
            Ok(())
        } else {
            self.stale(handle, "reset")
        }
    }

    /// Disarm a timer; cancelling twice is harmless
    pub fn timer_cancel(&mut self, handle: TimerHandle) -> Result<()> {
        if self.timers.cancel(handle) {
            Ok(())
        } else {
            self.stale(handle, "cancel")
        }
    }

    pub fn timer_enable(&mut self, handle: TimerHandle, enabled: bool) -> Result<()> {
        if self.timers.enable(handle, enabled) {
            Ok(())
        } else {
            self.stale(handle, "enable")
        }
    }

    /// Destroy a timer
    pub fn timer_remove(&mut self, handle: TimerHandle) -> Result<()> {
        if self.timers.remove(handle) {
            Ok(())
        } else {
            self.stale(handle, "remove")
        }
    }

    /// Time left before the timer fires (`NEVER` if disabled or retired)
    pub fn timer_remaining(&self, handle: TimerHandle) -> Result<VirtualTime> {
        match self.timers.remaining(handle, self.now()) {
            Some(remaining) => Ok(remaining),
            None => self.stale_value(handle),
        }
    }

    /// Time since the timer was last armed or fired
    pub fn timer_elapsed(&self, handle: TimerHandle) -> Result<VirtualTime> {
        match self.timers.elapsed(handle, self.now()) {
            Some(elapsed) => Ok(elapsed),
            None => self.stale_value(handle),
        }
    }

    /// Absolute expiration (`NEVER` if disabled or retired)
    pub fn timer_expire(&self, handle: TimerHandle) -> Result<VirtualTime> {
        match self.timers.expire(handle) {
            Some(expire) => Ok(expire),
            None => self.stale_value(handle),
        }
    }

    pub fn timer_enabled(&self, handle: TimerHandle) -> bool {
        self.timers.is_enabled(handle)
    }

    fn require_live_owner(&self, owner: DeviceId) -> Result<()> {
        let node = self.tree.node(owner)?;
        if node.state == DeviceState::Stopped {
            return Err(EmulatorError::InvalidLifecycle {
                device: node.tag.clone(),
                reason: "stopped devices cannot own timers".to_string(),
            });
        }
        Ok(())
    }

    fn owner_stopped(&self, handle: TimerHandle) -> bool {
        self.tree
            .node(handle.owner())
            .map_or(true, |node| node.state == DeviceState::Stopped)
    }

    /// Policy for an operation on a handle that no longer names a record
    ///
    /// A live owner means the handle named a transient one-shot that has
    /// already fired: nothing to do. A stopped owner means the caller kept
    /// a handle past teardown.
    fn stale(&mut self, handle: TimerHandle, operation: &str) -> Result<()> {
        self.diagnostics.stale_handles += 1;
        if !self.owner_stopped(handle) {
            log::trace!("Timing: {} of retired {} ignored", operation, handle);
            return Ok(());
        }
        if self.config.strict_handles {
            return Err(EmulatorError::UnknownTimer(handle.to_string()));
        }
        log::warn!("Timing: {} of {} after its owner stopped", operation, handle);
        Ok(())
    }

    fn stale_value(&self, handle: TimerHandle) -> Result<VirtualTime> {
        if self.owner_stopped(handle) && self.config.strict_handles {
            return Err(EmulatorError::UnknownTimer(handle.to_string()));
        }
        Ok(VirtualTime::NEVER)
    }
}
