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

//! Execution driver
//!
//! CPU-like devices run in bursts up to a *horizon*: the earliest of the
//! next timer expiration, the run target and the end of the current
//! quantum. Each CPU keeps its own position as a base time plus a cycle
//! count at its own clock:
//!
//! ```text
//! local_time = base + from_cycles(cycles, clock)        (rounded up)
//! budget(h)  = as_cycles(h - base, clock) - cycles       (rounded down)
//! ```
//!
//! Rounding the budget down means a CPU never runs past the horizon, and
//! the fractional cycle left over at one horizon is still there at the
//! next because positions are always derived from the absolute count.
//!
//! CPUs are offered time round-robin. A CPU that returns less than its
//! budget is offered the rest in the next round; returning zero yields the
//! remainder of the horizon. Suspended CPUs have their cycles eaten up to
//! the horizon so they stay in step when they resume.

use crate::core::device::{DeviceContext, DeviceId};
use crate::core::error::{EmulatorError, Result};
use crate::core::scheduler::Scheduler;
use crate::core::time::VirtualTime;
use bitflags::bitflags;

/// Interface of devices that execute instructions
pub trait Execute {
    /// Run for at most `budget` cycles and return the cycles consumed
    ///
    /// Returning more than `budget` is a scheduling overrun and ends the
    /// session. Returning zero gives up the rest of the current horizon.
    /// During the call `ctx.now()` is the CPU's local time at entry.
    fn execute(&mut self, ctx: &mut DeviceContext<'_>, budget: u64) -> Result<u64>;
}

bitflags! {
    /// Reasons a CPU is not executing; it runs only when none is set
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SuspendReason: u32 {
        /// Halted by a HALT line or instruction
        const HALT = 1 << 0;
        /// Held in reset by another device
        const RESET = 1 << 1;
        /// Waiting for one of its input lines to assert
        const WAIT_FOR_INTERRUPT = 1 << 2;
        /// Waiting for a numbered trigger
        const TRIGGER = 1 << 3;
        /// Disabled by configuration
        const DISABLED = 1 << 4;
    }
}

/// Scheduling state of one CPU
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecState {
    pub device: DeviceId,
    pub clock: u64,
    /// Time corresponding to `cycles == 0`
    pub base: VirtualTime,
    /// Cycles run (or eaten) since `base`
    pub cycles: u64,
    /// Cycles actually executed since the session began
    pub total_cycles: u64,
    pub suspend: SuspendReason,
    pub awaited_trigger: Option<u32>,
    /// Clock change requested by the CPU itself, applied after its burst
    pub pending_clock: Option<u64>,
}

impl ExecState {
    pub fn new(device: DeviceId, clock: u64, now: VirtualTime) -> Self {
        Self {
            device,
            clock,
            base: now,
            cycles: 0,
            total_cycles: 0,
            suspend: SuspendReason::empty(),
            awaited_trigger: None,
            pending_clock: None,
        }
    }

    /// Current position of the CPU on the virtual time line
    pub fn local_time(&self) -> VirtualTime {
        VirtualTime::from_cycles(self.cycles, self.clock)
            .map(|elapsed| self.base.saturating_add(elapsed))
            .unwrap_or(VirtualTime::NEVER)
    }

    /// Whole cycles between `base` and `horizon`
    fn cycles_to(&self, horizon: VirtualTime) -> u64 {
        horizon.saturating_sub(self.base).as_cycles(self.clock)
    }

    /// Cycles the CPU may run without passing `horizon`
    pub fn budget_to(&self, horizon: VirtualTime) -> u64 {
        self.cycles_to(horizon).saturating_sub(self.cycles)
    }

    /// Skip ahead to `horizon` without executing
    pub fn eat_to(&mut self, horizon: VirtualTime) {
        self.cycles = self.cycles.max(self.cycles_to(horizon));
    }

    /// Fold whole seconds of cycles into the base time
    ///
    /// Exact, since a second is a whole number of cycles at any clock.
    pub fn normalize(&mut self) {
        let whole = self.cycles / self.clock;
        if whole > 0 {
            self.base = self.base.saturating_add(VirtualTime::from_seconds(whole));
            self.cycles -= whole * self.clock;
        }
    }

    /// Switch to a new clock at the current position
    pub fn change_clock(&mut self, clock: u64) {
        self.base = self.local_time();
        self.cycles = 0;
        self.clock = clock;
    }

    /// Move the position to `at` (reset, snapshot restore)
    pub fn rebase(&mut self, at: VirtualTime) {
        self.base = at;
        self.cycles = 0;
    }

    pub fn is_suspended(&self) -> bool {
        !self.suspend.is_empty()
    }
}

/// Execution states of every CPU, in round-robin order
#[derive(Debug, Default)]
pub struct ExecutionDriver {
    cpus: Vec<ExecState>,
}

impl ExecutionDriver {
    pub fn new() -> Self {
        Self { cpus: Vec::new() }
    }

    pub fn add(&mut self, state: ExecState) {
        self.cpus.retain(|cpu| cpu.device != state.device);
        self.cpus.push(state);
    }

    pub fn remove(&mut self, device: DeviceId) -> Option<ExecState> {
        let index = self.cpus.iter().position(|cpu| cpu.device == device)?;
        Some(self.cpus.remove(index))
    }

    pub fn get(&self, device: DeviceId) -> Option<&ExecState> {
        self.cpus.iter().find(|cpu| cpu.device == device)
    }

    pub fn get_mut(&mut self, device: DeviceId) -> Option<&mut ExecState> {
        self.cpus.iter_mut().find(|cpu| cpu.device == device)
    }

    pub fn ids(&self) -> Vec<DeviceId> {
        self.cpus.iter().map(|cpu| cpu.device).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecState> + '_ {
        self.cpus.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ExecState> + '_ {
        self.cpus.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }
}

/// Run every CPU up to `horizon`
///
/// Returns the horizon actually reached, which is lower than requested if
/// a CPU armed a timer that expires before it.
pub(crate) fn run_cpus(sched: &mut Scheduler, horizon: VirtualTime) -> Result<VirtualTime> {
    let ids = sched.driver.ids();
    let mut done = vec![false; ids.len()];
    let mut horizon = horizon;

    loop {
        let mut again = false;

        for (slot, &id) in ids.iter().enumerate() {
            if done[slot] {
                continue;
            }
            let Some(state) = sched.driver.get_mut(id) else {
                done[slot] = true;
                continue;
            };
            if state.is_suspended() {
                state.eat_to(horizon);
                done[slot] = true;
                continue;
            }
            let budget = state.budget_to(horizon);
            if budget == 0 {
                done[slot] = true;
                continue;
            }

            sched.exec_now = Some(state.local_time().max(sched.now));
            sched.exec_device = Some(id);
            let result = sched.with_device(id, |device, ctx| match device.as_execute() {
                Some(cpu) => cpu.execute(ctx, budget),
                None => Err(EmulatorError::InvalidLifecycle {
                    device: ctx.tag().to_string(),
                    reason: "scheduled for execution without an execute interface".to_string(),
                }),
            });
            sched.exec_now = None;
            sched.exec_device = None;

            let consumed = match result {
                Ok(consumed) => consumed,
                Err(err) if !err.is_fatal() => {
                    sched.note_fault(id, &err);
                    budget
                }
                Err(err) => return Err(err),
            };
            if consumed > budget {
                sched.diagnostics.overruns += 1;
                return Err(EmulatorError::SchedulingOverrun {
                    device: sched.tree().tag(id).to_string(),
                    budget,
                    consumed,
                });
            }

            if let Some(state) = sched.driver.get_mut(id) {
                state.cycles += consumed;
                state.total_cycles += consumed;
                if consumed == 0 {
                    state.eat_to(horizon);
                }
                if let Some(hz) = state.pending_clock.take() {
                    state.change_clock(hz);
                }
            }
            if consumed == 0 || consumed == budget {
                done[slot] = true;
            } else {
                again = true;
            }

            if let Some(next) = sched.timers.next_expiration() {
                if next < horizon {
                    log::trace!("Execute: horizon lowered from {} to {}", horizon, next);
                    horizon = next.max(sched.now);
                }
            }
        }

        if !again {
            break;
        }
    }

    for state in sched.driver.iter_mut() {
        state.normalize();
    }
    Ok(horizon)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CPU: DeviceId = DeviceId::ROOT;

    #[test]
    fn test_budget_never_passes_horizon() {
        // 3 Hz: one cycle is 1/3 s, not representable exactly
        let mut state = ExecState::new(CPU, 3, VirtualTime::ZERO);
        let horizon = VirtualTime::from_millis(500);

        assert_eq!(state.budget_to(horizon), 1);
        state.cycles += 1;
        assert!(state.local_time() <= horizon);
        assert_eq!(state.budget_to(horizon), 0);
    }

    #[test]
    fn test_fraction_carried_between_horizons() {
        let mut state = ExecState::new(CPU, 3, VirtualTime::ZERO);
        let mut executed = 0;

        // Ten horizons of 100 ms each: 0.3 cycles per horizon
        for step in 1..=10 {
            let budget = state.budget_to(VirtualTime::from_millis(100 * step));
            state.cycles += budget;
            executed += budget;
        }
        assert_eq!(executed, 3);
        assert_eq!(state.local_time(), VirtualTime::from_seconds(1));
    }

    #[test]
    fn test_eat_to_never_moves_backwards() {
        let mut state = ExecState::new(CPU, 1_000, VirtualTime::ZERO);
        state.cycles = 50;

        state.eat_to(VirtualTime::from_millis(20));
        assert_eq!(state.cycles, 50);
        state.eat_to(VirtualTime::from_millis(80));
        assert_eq!(state.cycles, 80);
    }

    #[test]
    fn test_normalize_is_exact() {
        let mut state = ExecState::new(CPU, 7, VirtualTime::ZERO);
        state.cycles = 7 * 3 + 2;
        let before = state.local_time();

        state.normalize();
        assert_eq!(state.cycles, 2);
        assert_eq!(state.base, VirtualTime::from_seconds(3));
        assert_eq!(state.local_time(), before);
    }

    #[test]
    fn test_change_clock_keeps_position() {
        let mut state = ExecState::new(CPU, 1_000, VirtualTime::ZERO);
        state.cycles = 500;

        state.change_clock(2_000);
        assert_eq!(state.base, VirtualTime::from_millis(500));
        assert_eq!(state.budget_to(VirtualTime::from_seconds(1)), 1_000);
    }

    #[test]
    fn test_suspend_reasons_combine() {
        let mut state = ExecState::new(CPU, 1_000, VirtualTime::ZERO);
        state.suspend |= SuspendReason::HALT | SuspendReason::TRIGGER;
        assert!(state.is_suspended());

        state.suspend.remove(SuspendReason::HALT);
        assert!(state.is_suspended());
        state.suspend.remove(SuspendReason::TRIGGER);
        assert!(!state.is_suspended());
    }

    #[test]
    fn test_driver_keeps_registration_order() {
        let mut driver = ExecutionDriver::new();
        let a = DeviceId::new(3);
        let b = DeviceId::new(1);
        driver.add(ExecState::new(a, 10, VirtualTime::ZERO));
        driver.add(ExecState::new(b, 10, VirtualTime::ZERO));

        assert_eq!(driver.ids(), vec![a, b]);
        assert!(driver.remove(a).is_some());
        assert_eq!(driver.ids(), vec![b]);
        assert!(driver.get(a).is_none());
    }
}
