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

//! Timer registry
//!
//! Every timer in a session lives here, whichever device owns it. Records
//! sit in a slot arena addressed by generational [`TimerHandle`]s; armed
//! records are mirrored in a [`TimerQueue`] ordered by expiration.
//!
//! # Firing protocol
//!
//! The scheduler fires one timer at a time:
//!
//! 1. [`TimerManager::begin_fire`] pops the earliest due record, re-arms it
//!    at `expire + period` if periodic (disables it otherwise) and lends
//!    out its action
//! 2. the scheduler runs the action
//! 3. [`TimerManager::end_fire`] returns the action, or frees the record
//!    if it was a retired transient one-shot
//!
//! Because re-arming happens before the action runs, a callback that
//! adjusts its own timer overrides the default period, and a callback
//! that cancels its own periodic timer stops it for good.

mod queue;

pub use queue::{QueueKey, TimerQueue};

use crate::core::device::{DeviceContext, DeviceId};
use crate::core::error::Result;
use crate::core::interrupt::LineId;
use crate::core::time::VirtualTime;
use std::fmt;

/// Closure run when a timer expires
pub type TimerCallback = Box<dyn FnMut(&mut DeviceContext<'_>, TimerFired) -> Result<()>>;

/// What happens when a timer expires
pub enum TimerAction {
    /// Deliver to the owner's `Device::timer_expired`
    Device,
    /// Run a closure with a context scoped to the owner
    Callback(TimerCallback),
    /// Clear a line (the trailing edge of a pulse)
    ClearLine { target: DeviceId, line: LineId },
    /// Flush every sound stream and feed the mixer
    FlushStreams,
    /// Nothing; an armed inert timer is flagged in debug builds
    Inert,
}

impl TimerAction {
    /// Wrap a closure as a timer action
    pub fn callback<F>(f: F) -> Self
    where
        F: FnMut(&mut DeviceContext<'_>, TimerFired) -> Result<()> + 'static,
    {
        TimerAction::Callback(Box::new(f))
    }

    fn kind(&self) -> &'static str {
        match self {
            TimerAction::Device => "device",
            TimerAction::Callback(_) => "callback",
            TimerAction::ClearLine { .. } => "clear-line",
            TimerAction::FlushStreams => "flush-streams",
            TimerAction::Inert => "inert",
        }
    }
}

impl fmt::Debug for TimerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerAction::ClearLine { target, line } => f
                .debug_struct("ClearLine")
                .field("target", target)
                .field("line", line)
                .finish(),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Generational handle to a timer record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    owner: DeviceId,
    index: u32,
    generation: u32,
}

impl TimerHandle {
    /// Device owning the timer
    pub fn owner(&self) -> DeviceId {
        self.owner
    }
}

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "timer#{}.{} of {}",
            self.index, self.generation, self.owner
        )
    }
}

/// Details of an expiration, passed to the action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub handle: TimerHandle,
    pub param: u64,
    /// Time the timer was due (the current time while the action runs)
    pub expire: VirtualTime,
    pub period: VirtualTime,
}

/// One timer
#[derive(Debug)]
pub struct TimerRecord {
    pub owner: DeviceId,
    pub name: String,
    action: Option<TimerAction>,
    pub param: u64,
    /// When the timer was last armed (or last fired, for periodic timers)
    pub start: VirtualTime,
    pub expire: VirtualTime,
    /// Zero for one-shot timers
    pub period: VirtualTime,
    pub enabled: bool,
    /// Allocated on the fly; freed after a one-shot expiration
    pub transient: bool,
}

impl TimerRecord {
    /// Action kind, `None` while the action is running
    pub fn action(&self) -> Option<&TimerAction> {
        self.action.as_ref()
    }

    pub fn is_periodic(&self) -> bool {
        !self.period.is_zero() && !self.period.is_never()
    }
}

struct TimerSlot {
    generation: u32,
    record: Option<TimerRecord>,
}

/// Registry of all timers in a session
pub struct TimerManager {
    slots: Vec<TimerSlot>,
    free: Vec<u32>,
    queue: TimerQueue<u32>,
    fired: u64,
    inert_warnings: u64,
}

impl TimerManager {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            queue: TimerQueue::new(),
            fired: 0,
            inert_warnings: 0,
        }
    }

    /// Allocate a disabled timer
    pub fn alloc(
        &mut self,
        owner: DeviceId,
        name: impl Into<String>,
        action: TimerAction,
        transient: bool,
    ) -> TimerHandle {
        let record = TimerRecord {
            owner,
            name: name.into(),
            action: Some(action),
            param: 0,
            start: VirtualTime::ZERO,
            expire: VirtualTime::NEVER,
            period: VirtualTime::ZERO,
            enabled: false,
            transient,
        };

        let index = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.record = Some(record);
                index
            }
            None => {
                self.slots.push(TimerSlot {
                    generation: 0,
                    record: Some(record),
                });
                (self.slots.len() - 1) as u32
            }
        };

        let handle = TimerHandle {
            owner,
            index,
            generation: self.slots[index as usize].generation,
        };
        log::trace!("Timing: allocated {}", handle);
        handle
    }

    /// Record behind `handle`, `None` if the handle is stale
    pub fn get(&self, handle: TimerHandle) -> Option<&TimerRecord> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.record.as_ref()
    }

    fn get_mut(&mut self, handle: TimerHandle) -> Option<&mut TimerRecord> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.record.as_mut()
    }

    pub fn is_live(&self, handle: TimerHandle) -> bool {
        self.get(handle).is_some()
    }

    /// Arm a timer `delay` after `now`, with a new parameter and period
    ///
    /// A `NEVER` delay leaves the timer disabled. Returns `false` for a
    /// stale handle.
    pub fn adjust(
        &mut self,
        handle: TimerHandle,
        now: VirtualTime,
        delay: VirtualTime,
        param: u64,
        period: VirtualTime,
    ) -> bool {
        let Some(record) = self.get_mut(handle) else {
            return false;
        };
        record.param = param;
        record.period = period;
        self.arm(handle, now, delay);
        true
    }

    /// Re-arm `delay` after `now`, keeping parameter and period
    pub fn reset(&mut self, handle: TimerHandle, now: VirtualTime, delay: VirtualTime) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        self.arm(handle, now, delay);
        true
    }

    fn arm(&mut self, handle: TimerHandle, now: VirtualTime, delay: VirtualTime) {
        let expire = now.saturating_add(delay);
        let mut inert = false;
        if let Some(record) = self.get_mut(handle) {
            record.start = now;
            record.expire = expire;
            record.enabled = !expire.is_never();
            inert = record.enabled && matches!(record.action, Some(TimerAction::Inert));
            log::trace!(
                "Timing: '{}' armed for {} (period {})",
                record.name,
                expire,
                record.period
            );
        }
        if inert {
            self.inert_warnings += 1;
            if cfg!(debug_assertions) {
                log::warn!("Timing: {} armed without an action", handle);
            }
        }
        self.queue.schedule(handle.index, expire);
    }

    /// Enable or disable without changing the expiration
    pub fn enable(&mut self, handle: TimerHandle, enabled: bool) -> bool {
        let Some(record) = self.get_mut(handle) else {
            return false;
        };
        record.enabled = enabled && !record.expire.is_never();
        let expire = record.expire;
        let enabled = record.enabled;
        if enabled {
            self.queue.schedule(handle.index, expire);
        } else {
            self.queue.cancel(handle.index);
        }
        true
    }

    /// Disarm a timer; idempotent. Returns `false` for a stale handle.
    pub fn cancel(&mut self, handle: TimerHandle) -> bool {
        let Some(record) = self.get_mut(handle) else {
            return false;
        };
        record.enabled = false;
        record.expire = VirtualTime::NEVER;
        self.queue.cancel(handle.index);
        true
    }

    /// Destroy a timer, invalidating its handle
    pub fn remove(&mut self, handle: TimerHandle) -> bool {
        if !self.is_live(handle) {
            return false;
        }
        self.free_slot(handle.index);
        true
    }

    fn free_slot(&mut self, index: u32) {
        self.queue.cancel(index);
        let slot = &mut self.slots[index as usize];
        if slot.record.take().is_some() {
            slot.generation = slot.generation.wrapping_add(1);
            self.free.push(index);
        }
    }

    /// Time left until expiration (`NEVER` when disabled)
    pub fn remaining(&self, handle: TimerHandle, now: VirtualTime) -> Option<VirtualTime> {
        let record = self.get(handle)?;
        if !record.enabled {
            return Some(VirtualTime::NEVER);
        }
        Some(record.expire.saturating_sub(now))
    }

    /// Time since the timer was last armed or fired
    pub fn elapsed(&self, handle: TimerHandle, now: VirtualTime) -> Option<VirtualTime> {
        self.get(handle).map(|record| now.saturating_sub(record.start))
    }

    /// Absolute expiration (`NEVER` when disabled)
    pub fn expire(&self, handle: TimerHandle) -> Option<VirtualTime> {
        self.get(handle).map(|record| {
            if record.enabled {
                record.expire
            } else {
                VirtualTime::NEVER
            }
        })
    }

    pub fn is_enabled(&self, handle: TimerHandle) -> bool {
        self.get(handle).is_some_and(|record| record.enabled)
    }

    /// Earliest armed expiration
    pub fn next_expiration(&self) -> Option<VirtualTime> {
        self.queue.peek_next().map(|(when, _)| when)
    }

    /// Pop the earliest timer due at `now` and lend out its action
    pub fn begin_fire(&mut self, now: VirtualTime) -> Option<(TimerFired, Option<TimerAction>)> {
        let (_, index) = self.queue.pop_next_due(now)?;
        let slot = &mut self.slots[index as usize];
        let generation = slot.generation;
        let record = slot.record.as_mut()?;

        let fired = TimerFired {
            handle: TimerHandle {
                owner: record.owner,
                index,
                generation,
            },
            param: record.param,
            expire: record.expire,
            period: record.period,
        };

        let rearm = if record.is_periodic() {
            record.start = record.expire;
            record.expire = record.expire.saturating_add(record.period);
            // The next period lies past the end of representable time
            record.enabled = !record.expire.is_never();
            record.enabled.then_some(record.expire)
        } else {
            record.enabled = false;
            record.expire = VirtualTime::NEVER;
            None
        };
        let action = record.action.take();
        log::trace!("Timing: '{}' fired at {}", record.name, fired.expire);

        if let Some(next) = rearm {
            self.queue.schedule(index, next);
        }
        self.fired += 1;
        Some((fired, action))
    }

    /// Return a lent action; frees retired transient one-shots
    pub fn end_fire(&mut self, handle: TimerHandle, action: Option<TimerAction>) {
        let Some(record) = self.get_mut(handle) else {
            return;
        };
        if record.transient && !record.enabled {
            self.free_slot(handle.index);
            return;
        }
        if record.action.is_none() {
            record.action = action;
        }
    }

    /// Disable every timer of `owner` and drop its transient ones
    pub fn disable_owner(&mut self, owner: DeviceId) {
        for index in self.indices_of(owner) {
            let transient = self.slots[index as usize]
                .record
                .as_ref()
                .is_some_and(|record| record.transient);
            if transient {
                self.free_slot(index);
                continue;
            }
            if let Some(record) = self.slots[index as usize].record.as_mut() {
                record.enabled = false;
                record.expire = VirtualTime::NEVER;
            }
            self.queue.cancel(index);
        }
    }

    /// Destroy every timer of `owner`
    pub fn remove_owner(&mut self, owner: DeviceId) -> usize {
        let indices = self.indices_of(owner);
        let count = indices.len();
        for index in indices {
            self.free_slot(index);
        }
        count
    }

    fn indices_of(&self, owner: DeviceId) -> Vec<u32> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.record.as_ref().is_some_and(|r| r.owner == owner))
            .map(|(index, _)| index as u32)
            .collect()
    }

    /// Live timers with their handles, in slot order
    pub fn iter(&self) -> impl Iterator<Item = (TimerHandle, &TimerRecord)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.record.as_ref().map(|record| {
                (
                    TimerHandle {
                        owner: record.owner,
                        index: index as u32,
                        generation: slot.generation,
                    },
                    record,
                )
            })
        })
    }

    /// First persistent timer of `owner` called `name`
    pub fn find(&self, owner: DeviceId, name: &str) -> Option<TimerHandle> {
        self.iter()
            .find(|(_, record)| record.owner == owner && !record.transient && record.name == name)
            .map(|(handle, _)| handle)
    }

    /// Live timers, armed ones first in firing order
    pub fn in_firing_order(&self) -> Vec<(TimerHandle, &TimerRecord)> {
        let mut armed: Vec<(TimerHandle, &TimerRecord)> = Vec::with_capacity(self.queue.len());
        for (_, index) in self.queue.iter() {
            let slot = &self.slots[index as usize];
            if let Some(record) = slot.record.as_ref() {
                let handle = TimerHandle {
                    owner: record.owner,
                    index,
                    generation: slot.generation,
                };
                armed.push((handle, record));
            }
        }
        armed.extend(self.iter().filter(|(handle, _)| !self.queue.contains(handle.index)));
        armed
    }

    /// Overwrite a timer's schedule, as found in a snapshot
    pub(crate) fn restore(
        &mut self,
        handle: TimerHandle,
        start: VirtualTime,
        expire: VirtualTime,
        period: VirtualTime,
        param: u64,
        enabled: bool,
    ) -> bool {
        let Some(record) = self.get_mut(handle) else {
            return false;
        };
        record.start = start;
        record.expire = expire;
        record.period = period;
        record.param = param;
        record.enabled = enabled && !expire.is_never();
        if record.enabled {
            self.queue.schedule(handle.index, expire);
        } else {
            self.queue.cancel(handle.index);
        }
        true
    }

    /// Drop every transient timer
    pub(crate) fn remove_transient(&mut self) {
        let transient: Vec<u32> = self
            .iter()
            .filter(|(_, record)| record.transient)
            .map(|(handle, _)| handle.index)
            .collect();
        for index in transient {
            self.free_slot(index);
        }
    }

    /// Number of armed timers
    pub fn armed(&self) -> usize {
        self.queue.len()
    }

    /// Number of live timers
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|slot| slot.record.is_some()).count()
    }

    /// Expirations processed since the session began
    pub fn fired_count(&self) -> u64 {
        self.fired
    }

    /// Number of inert timers that were armed
    pub fn inert_warnings(&self) -> u64 {
        self.inert_warnings
    }
}

impl Default for TimerManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
