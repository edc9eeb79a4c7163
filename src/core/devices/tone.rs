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

//! Square-wave tone generator
//!
//! ## Registers
//!
//! ```text
//! Offset | Name        | Meaning
//! -------|-------------|------------------------------------------
//! 0x0    | HALF_PERIOD | samples per half wave, 0 = silent
//! 0x4    | VOLUME      | amplitude (signed 16-bit)
//! ```
//!
//! The stream is brought up to date before every register write, so a
//! change takes effect at the exact time of the write.

use crate::core::device::{Device, DeviceCaps, DeviceContext};
use crate::core::error::{AccessKind, EmulatorError, Result};
use crate::core::memory::MemoryMapped;
use crate::core::stream::{SoundSource, StreamChunk, StreamGenerator, StreamHandle};

pub const HALF_PERIOD: u32 = 0x0;
pub const VOLUME: u32 = 0x4;

pub struct ToneGenerator {
    base: u32,
    sample_rate: u32,
    half_period: u32,
    volume: i16,
    phase: u32,
    high: bool,
    stream: Option<StreamHandle>,
}

impl ToneGenerator {
    pub fn new(base: u32, sample_rate: u32) -> Self {
        Self {
            base,
            sample_rate,
            half_period: 0,
            volume: 0,
            phase: 0,
            high: true,
            stream: None,
        }
    }

    pub fn stream(&self) -> Option<StreamHandle> {
        self.stream
    }

    fn next_sample(&mut self) -> i16 {
        if self.half_period == 0 {
            return 0;
        }
        let sample = if self.high {
            self.volume
        } else {
            self.volume.saturating_neg()
        };
        self.phase += 1;
        if self.phase >= self.half_period {
            self.phase = 0;
            self.high = !self.high;
        }
        sample
    }
}

impl Device for ToneGenerator {
    fn capabilities(&self) -> DeviceCaps {
        DeviceCaps::SOUND | DeviceCaps::MEMORY
    }

    fn start(&mut self, ctx: &mut DeviceContext<'_>) -> Result<()> {
        self.stream = Some(ctx.stream_create(1, self.sample_rate, StreamGenerator::Device)?);
        Ok(())
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) -> Result<()> {
        self.half_period = 0;
        self.volume = 0;
        self.phase = 0;
        self.high = true;
        Ok(())
    }

    fn as_sound(&mut self) -> Option<&mut dyn SoundSource> {
        Some(self)
    }

    fn as_memory(&mut self) -> Option<&mut dyn MemoryMapped> {
        Some(self)
    }
}

impl SoundSource for ToneGenerator {
    fn generate(&mut self, chunk: &mut StreamChunk) -> Result<()> {
        for frame in 0..chunk.frames() {
            let sample = self.next_sample();
            chunk.set(frame, 0, sample);
        }
        Ok(())
    }
}

impl MemoryMapped for ToneGenerator {
    fn address_range(&self) -> (u32, u32) {
        (self.base, self.base + 7)
    }

    fn read32(&mut self, _ctx: &mut DeviceContext<'_>, offset: u32) -> Result<u32> {
        match offset & !0x3 {
            HALF_PERIOD => Ok(self.half_period),
            _ => Ok(self.volume as u16 as u32),
        }
    }

    fn write32(&mut self, ctx: &mut DeviceContext<'_>, offset: u32, value: u32) -> Result<()> {
        if let Some(stream) = self.stream {
            ctx.stream_update_from(stream, self)?;
        }
        match offset {
            HALF_PERIOD => {
                self.half_period = value;
                self.phase = 0;
            }
            VOLUME => self.volume = value as u16 as i16,
            _ => {
                return Err(EmulatorError::UnhandledAccess {
                    kind: AccessKind::Write,
                    address: self.base + offset,
                    width: 4,
                })
            }
        }
        Ok(())
    }
}
