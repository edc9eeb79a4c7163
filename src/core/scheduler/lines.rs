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

//! Line operations

use super::Scheduler;
use crate::core::device::{DeviceId, DeviceState};
use crate::core::error::{EmulatorError, Result};
use crate::core::execute::SuspendReason;
use crate::core::interrupt::{LineId, LineState};
use crate::core::time::VirtualTime;
use crate::core::timing::TimerAction;

impl Scheduler {
    fn unknown_line(&self, target: DeviceId, line: LineId) -> EmulatorError {
        EmulatorError::UnknownLine {
            device: self.tree.tag(target).to_string(),
            line: line.to_string(),
        }
    }

    /// Policy for driving a line of a stopped device
    ///
    /// Returns `true` when the operation must be skipped. With strict
    /// handles the use is an `UnknownLine` error.
    fn line_owner_stopped(
        &mut self,
        target: DeviceId,
        line: LineId,
        operation: &str,
    ) -> Result<bool> {
        if self.tree.node(target)?.state != DeviceState::Stopped {
            return Ok(false);
        }
        self.diagnostics.stale_handles += 1;
        if self.config.strict_handles {
            return Err(self.unknown_line(target, line));
        }
        log::warn!(
            "Line: {} of {} on stopped {}",
            operation,
            line,
            self.tree.tag(target)
        );
        Ok(true)
    }

    /// Drive an input line of `target`
    ///
    /// A rising line wakes a CPU waiting for an interrupt. If the state
    /// changed and the target is not the device currently running, its
    /// `Device::line_changed` hook is called.
    pub fn line_set(&mut self, target: DeviceId, line: LineId, state: LineState) -> Result<()> {
        if self.line_owner_stopped(target, line, "set")? {
            return Ok(());
        }
        let change = self.tree.node_mut(target)?.lines.set(line, state);
        let change = change.ok_or_else(|| self.unknown_line(target, line))?;
        if !change.changed() {
            return Ok(());
        }
        log::trace!(
            "Line: {} {} {:?} -> {:?} at {}",
            self.tree.tag(target),
            line,
            change.previous,
            change.current,
            self.now()
        );

        if change.rising {
            if let Some(cpu) = self.driver.get_mut(target) {
                if cpu.suspend.contains(SuspendReason::WAIT_FOR_INTERRUPT) {
                    cpu.suspend.remove(SuspendReason::WAIT_FOR_INTERRUPT);
                    log::trace!("Line: woke {}", target);
                }
            }
        }

        if target != DeviceId::ROOT && self.tree.node(target)?.is_available() {
            let result = self.with_device(target, |device, ctx| device.line_changed(ctx, line, state));
            self.contain(target, result)?;
        }
        Ok(())
    }

    /// Assert a line now and clear it `width` later
    ///
    /// The clear is a transient timer owned by `target`. With a zero width
    /// the line is cleared immediately; an edge line still latches.
    pub fn line_pulse(&mut self, target: DeviceId, line: LineId, width: VirtualTime) -> Result<()> {
        if self.line_owner_stopped(target, line, "pulse")? {
            return Ok(());
        }
        self.line_set(target, line, LineState::Assert)?;
        if width.is_zero() {
            return self.line_set(target, line, LineState::Clear);
        }
        self.timer_set(target, width, false, 0, TimerAction::ClearLine { target, line })?;
        Ok(())
    }

    pub fn line_state(&self, target: DeviceId, line: LineId) -> Result<LineState> {
        self.tree
            .node(target)?
            .lines
            .state(line)
            .ok_or_else(|| self.unknown_line(target, line))
    }

    pub fn line_pending_edge(&self, target: DeviceId, line: LineId) -> Result<bool> {
        let lines = &self.tree.node(target)?.lines;
        if lines.get(line).is_none() {
            return Err(self.unknown_line(target, line));
        }
        Ok(lines.pending_edge(line))
    }

    /// Clear a latched edge (and release a held line); returns the edge
    pub fn line_acknowledge(&mut self, target: DeviceId, line: LineId) -> Result<bool> {
        if self.line_owner_stopped(target, line, "acknowledge")? {
            return Ok(false);
        }
        if self.tree.node(target)?.lines.get(line).is_none() {
            return Err(self.unknown_line(target, line));
        }
        Ok(self.tree.node_mut(target)?.lines.acknowledge(line))
    }

    pub fn line_by_name(&self, target: DeviceId, name: &str) -> Result<LineId> {
        self.tree
            .node(target)?
            .lines
            .by_name(name)
            .ok_or_else(|| EmulatorError::UnknownLine {
                device: self.tree.tag(target).to_string(),
                line: name.to_string(),
            })
    }
}
