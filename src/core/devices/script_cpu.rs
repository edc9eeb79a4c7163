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

//! Scripted CPU core
//!
//! Runs a fixed list of [`Op`]s instead of decoding instructions. It
//! exercises the whole execution contract: partial slices, memory
//! accesses at instruction time, voluntary yields, halts, spins and
//! interrupt sampling at instruction boundaries.
//!
//! Interrupts are sampled before every op: a latched `nmi` edge first,
//! then an asserted `irq` level. Servicing an `irq` performs the
//! configured acknowledge write (or acknowledges the line itself).

use crate::core::device::{Device, DeviceCaps, DeviceContext};
use crate::core::error::Result;
use crate::core::execute::{Execute, SuspendReason};
use crate::core::interrupt::{LineConfig, LineId, LineKind};

pub const IRQ: LineId = LineId(0);
pub const NMI: LineId = LineId(1);

/// Cycles spent entering an interrupt handler
pub const INTERRUPT_CYCLES: u64 = 1;

/// One scripted operation; each costs one cycle unless noted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    /// Burn cycles (may span several slices)
    Nop { cycles: u64 },
    Read { address: u32 },
    Write { address: u32, value: u32 },
    /// Suspend until resumed from outside (no cost)
    Halt,
    /// End the slice with nothing consumed (no cost)
    Yield,
    /// Wait for a trigger
    Spin { trigger: u32 },
    /// Wait for one of the input lines to assert
    WaitInterrupt,
    Jump { target: usize },
}

/// An interrupt taken by the core
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Serviced {
    pub line: LineId,
    /// Lifetime cycle count when it was taken
    pub cycle: u64,
}

pub struct ScriptCpu {
    program: Vec<Op>,
    pc: usize,
    /// Cycles left of a partially executed `Nop`
    stall: u64,
    cycles: u64,
    irq_ack: Option<(u32, u32)>,
    pub reads: Vec<u32>,
    pub serviced: Vec<Serviced>,
}

impl ScriptCpu {
    pub fn new(program: Vec<Op>) -> Self {
        Self {
            program,
            pc: 0,
            stall: 0,
            cycles: 0,
            irq_ack: None,
            reads: Vec::new(),
            serviced: Vec::new(),
        }
    }

    /// Acknowledge `irq` by writing `value` to `address`
    pub fn with_irq_ack(mut self, address: u32, value: u32) -> Self {
        self.irq_ack = Some((address, value));
        self
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    /// Cycles executed since reset
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn take_interrupt(&mut self, ctx: &mut DeviceContext<'_>) -> Result<bool> {
        let line = if ctx.pending_edge(NMI) {
            ctx.line_acknowledge(NMI)?;
            NMI
        } else if ctx.line_asserted(IRQ) {
            match self.irq_ack {
                Some((address, value)) => ctx.write32(address, value)?,
                None => {
                    ctx.line_acknowledge(IRQ)?;
                }
            }
            IRQ
        } else {
            return Ok(false);
        };
        log::trace!("{}: took {} at cycle {}", ctx.tag(), line, self.cycles);
        self.serviced.push(Serviced {
            line,
            cycle: self.cycles,
        });
        Ok(true)
    }
}

impl Device for ScriptCpu {
    fn capabilities(&self) -> DeviceCaps {
        DeviceCaps::EXECUTE
    }

    fn input_lines(&self) -> Vec<LineConfig> {
        vec![
            LineConfig::new("irq", LineKind::Level),
            LineConfig::new("nmi", LineKind::Edge),
        ]
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) -> Result<()> {
        self.pc = 0;
        self.stall = 0;
        self.cycles = 0;
        self.reads.clear();
        self.serviced.clear();
        Ok(())
    }

    fn as_execute(&mut self) -> Option<&mut dyn Execute> {
        Some(self)
    }
}

impl Execute for ScriptCpu {
    fn execute(&mut self, ctx: &mut DeviceContext<'_>, budget: u64) -> Result<u64> {
        let mut used = 0;

        while used < budget {
            if self.stall > 0 {
                let run = self.stall.min(budget - used);
                self.stall -= run;
                used += run;
                self.cycles += run;
                continue;
            }
            if self.take_interrupt(ctx)? {
                used += INTERRUPT_CYCLES;
                self.cycles += INTERRUPT_CYCLES;
                continue;
            }

            let Some(op) = self.program.get(self.pc).copied() else {
                ctx.suspend(SuspendReason::HALT)?;
                break;
            };
            match op {
                Op::Nop { cycles } => {
                    self.pc += 1;
                    self.stall = cycles;
                    continue;
                }
                Op::Read { address } => {
                    let value = ctx.read32(address)?;
                    self.reads.push(value);
                    self.pc += 1;
                }
                Op::Write { address, value } => {
                    ctx.write32(address, value)?;
                    self.pc += 1;
                }
                Op::Halt => {
                    self.pc += 1;
                    ctx.suspend(SuspendReason::HALT)?;
                    break;
                }
                Op::Yield => {
                    // Only an empty slice counts as a yield
                    if used == 0 {
                        self.pc += 1;
                    }
                    break;
                }
                Op::Spin { trigger } => {
                    self.pc += 1;
                    ctx.spin_until_trigger(trigger)?;
                }
                Op::WaitInterrupt => {
                    self.pc += 1;
                    ctx.spin_until_interrupt()?;
                }
                Op::Jump { target } => self.pc = target,
            }
            used += 1;
            self.cycles += 1;
            if matches!(op, Op::Spin { .. } | Op::WaitInterrupt) {
                break;
            }
        }
        Ok(used)
    }
}
