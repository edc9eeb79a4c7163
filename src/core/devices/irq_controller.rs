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

//! Interrupt controller
//!
//! Aggregates edge-triggered input lines into one CPU line.
//!
//! ## Registers
//!
//! ```text
//! Offset | Name   | Access
//! -------|--------|-------------------------------------------
//! 0x0    | STATUS | read flags; writing 1 to a bit clears it
//! 0x4    | MASK   | R/W; 1 = source reaches the CPU
//! ```
//!
//! Input `n` sets STATUS bit `n` on its rising edge. The CPU line is
//! asserted while `STATUS & MASK` is non-zero.

use crate::core::device::{Device, DeviceCaps, DeviceContext, DeviceId};
use crate::core::error::{AccessKind, EmulatorError, Result};
use crate::core::interrupt::{LineConfig, LineId, LineKind, LineState};
use crate::core::memory::MemoryMapped;

pub const STATUS: u32 = 0x0;
pub const MASK: u32 = 0x4;

pub struct IrqController {
    base: u32,
    inputs: Vec<&'static str>,
    cpu_tag: String,
    cpu_line: &'static str,
    status: u32,
    mask: u32,
    /// Resolved at start
    output: Option<(DeviceId, LineId)>,
    asserted: bool,
}

impl IrqController {
    /// Controller at `base` with one input per name, driving
    /// `cpu_line` of the device tagged `cpu_tag`
    pub fn new(
        base: u32,
        inputs: &[&'static str],
        cpu_tag: impl Into<String>,
        cpu_line: &'static str,
    ) -> Self {
        Self {
            base,
            inputs: inputs.to_vec(),
            cpu_tag: cpu_tag.into(),
            cpu_line,
            status: 0,
            mask: 0,
            output: None,
            asserted: false,
        }
    }

    pub fn status(&self) -> u32 {
        self.status
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// Set status bits directly (software-raised interrupts)
    pub fn request(&mut self, ctx: &mut DeviceContext<'_>, bits: u32) -> Result<()> {
        self.status |= bits;
        log::trace!("IRQ requested: 0x{:04X}, status=0x{:04X}", bits, self.status);
        self.update(ctx)
    }

    fn update(&mut self, ctx: &mut DeviceContext<'_>) -> Result<()> {
        let pending = self.status & self.mask != 0;
        if pending == self.asserted {
            return Ok(());
        }
        self.asserted = pending;
        if let Some((cpu, line)) = self.output {
            let state = if pending {
                LineState::Assert
            } else {
                LineState::Clear
            };
            ctx.line_set(cpu, line, state)?;
        }
        Ok(())
    }
}

impl Device for IrqController {
    fn capabilities(&self) -> DeviceCaps {
        DeviceCaps::MEMORY | DeviceCaps::PERIPHERAL
    }

    fn input_lines(&self) -> Vec<LineConfig> {
        self.inputs
            .iter()
            .map(|&name| LineConfig::new(name, LineKind::Edge))
            .collect()
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> Result<()> {
        let cpu = ctx.lookup(&self.cpu_tag)?;
        let line = ctx.scheduler().line_by_name(cpu, self.cpu_line)?;
        self.output = Some((cpu, line));
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) -> Result<()> {
        self.status = 0;
        self.mask = 0;
        self.asserted = false;
        Ok(())
    }

    fn line_changed(
        &mut self,
        ctx: &mut DeviceContext<'_>,
        line: LineId,
        state: LineState,
    ) -> Result<()> {
        if !state.is_asserted() {
            return Ok(());
        }
        ctx.line_acknowledge(line)?;
        self.request(ctx, 1 << line.0)
    }

    fn as_memory(&mut self) -> Option<&mut dyn MemoryMapped> {
        Some(self)
    }
}

impl MemoryMapped for IrqController {
    fn address_range(&self) -> (u32, u32) {
        (self.base, self.base + 7)
    }

    fn read32(&mut self, _ctx: &mut DeviceContext<'_>, offset: u32) -> Result<u32> {
        match offset & !0x3 {
            STATUS => Ok(self.status),
            _ => Ok(self.mask),
        }
    }

    fn write32(&mut self, ctx: &mut DeviceContext<'_>, offset: u32, value: u32) -> Result<()> {
        match offset {
            STATUS => {
                self.status &= !value;
                log::trace!("IRQ acknowledged, status=0x{:04X}", self.status);
            }
            MASK => {
                self.mask = value;
                log::debug!("IRQ mask set: 0x{:04X}", self.mask);
            }
            _ => {
                return Err(EmulatorError::UnhandledAccess {
                    kind: AccessKind::Write,
                    address: self.base + offset,
                    width: 4,
                })
            }
        }
        self.update(ctx)
    }
}
