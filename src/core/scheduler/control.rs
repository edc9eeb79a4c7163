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

//! Execution control: suspension, triggers, interleave and clocks

use super::{Boost, Scheduler};
use crate::core::device::DeviceId;
use crate::core::error::{EmulatorError, Result};
use crate::core::execute::{ExecState, SuspendReason};
use crate::core::time::{check_clock, VirtualTime};

impl Scheduler {
    fn cpu_mut(&mut self, id: DeviceId) -> Result<&mut ExecState> {
        self.tree.node(id)?;
        let tag = self.tree.tag(id).to_string();
        self.driver
            .get_mut(id)
            .ok_or(EmulatorError::InvalidLifecycle {
                device: tag,
                reason: "not an executing device".to_string(),
            })
    }

    /// Add a suspend reason; the CPU stops at its next return to the driver
    pub fn suspend(&mut self, id: DeviceId, reason: SuspendReason) -> Result<()> {
        self.cpu_mut(id)?.suspend |= reason;
        log::trace!("Execute: {} suspended ({:?})", self.tree.tag(id), reason);
        Ok(())
    }

    /// Remove a suspend reason
    pub fn resume(&mut self, id: DeviceId, reason: SuspendReason) -> Result<()> {
        let cpu = self.cpu_mut(id)?;
        cpu.suspend.remove(reason);
        if reason.contains(SuspendReason::TRIGGER) {
            cpu.awaited_trigger = None;
        }
        log::trace!("Execute: {} resumed ({:?})", self.tree.tag(id), reason);
        Ok(())
    }

    pub fn is_suspended(&self, id: DeviceId) -> bool {
        self.driver.get(id).is_some_and(|cpu| cpu.is_suspended())
    }

    /// Suspend a CPU until `trigger` is signalled
    pub fn spin_until_trigger(&mut self, id: DeviceId, trigger: u32) -> Result<()> {
        let cpu = self.cpu_mut(id)?;
        cpu.suspend |= SuspendReason::TRIGGER;
        cpu.awaited_trigger = Some(trigger);
        Ok(())
    }

    /// Suspend a CPU until one of its input lines rises
    pub fn spin_until_interrupt(&mut self, id: DeviceId) -> Result<()> {
        self.suspend(id, SuspendReason::WAIT_FOR_INTERRUPT)
    }

    /// Resume every CPU waiting for `trigger`
    pub fn trigger(&mut self, trigger: u32) {
        for cpu in self.driver.iter_mut() {
            if cpu.awaited_trigger == Some(trigger) {
                cpu.suspend.remove(SuspendReason::TRIGGER);
                cpu.awaited_trigger = None;
                log::trace!("Execute: trigger {} woke {}", trigger, cpu.device);
            }
        }
    }

    /// Interleave CPUs at most `slice` apart for the next `duration`
    ///
    /// Overlapping boosts combine to the finer slice and the later end.
    pub fn boost_interleave(&mut self, slice: VirtualTime, duration: VirtualTime) -> Result<()> {
        if slice.is_zero() || slice.is_never() {
            return Err(EmulatorError::InvalidTimeRange(format!(
                "interleave slice {} is not usable",
                slice
            )));
        }
        let until = self.now().checked_add(duration)?;
        self.boost = Some(match self.boost {
            Some(current) if current.until > self.now() => Boost {
                slice: current.slice.min(slice),
                until: current.until.max(until),
            },
            _ => Boost { slice, until },
        });
        log::debug!("Scheduler: interleave boosted to {} until {}", slice, until);
        Ok(())
    }

    /// Change a device's clock
    ///
    /// A CPU keeps its current position; cycles after it count at the new
    /// rate. A CPU changing its own clock does so after its current burst.
    pub fn set_clock(&mut self, id: DeviceId, hz: u64) -> Result<()> {
        check_clock(hz)?;
        self.tree.node_mut(id)?.clock = hz;
        let executing = self.exec_device == Some(id);
        if let Some(cpu) = self.driver.get_mut(id) {
            if executing {
                cpu.pending_clock = Some(hz);
            } else {
                cpu.change_clock(hz);
            }
        }
        log::debug!("Scheduler: {} clock set to {} Hz", self.tree.tag(id), hz);

        if self.tree.node(id)?.is_available() {
            let result = self.with_device(id, |device, ctx| device.clock_changed(ctx, hz));
            self.contain(id, result)?;
        }
        Ok(())
    }
}
