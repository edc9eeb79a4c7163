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

//! Arena-backed RAM and ROM

use crate::core::device::{Device, DeviceCaps, DeviceContext};
use crate::core::error::{EmulatorError, Result};
use crate::core::memory::{ByteArena, MemoryMapped};

/// Memory device mapping a [`ByteArena`] at a fixed base address
pub struct Ram {
    base: u32,
    arena: ByteArena,
}

impl Ram {
    /// Zero-filled RAM of `size` bytes at `base`
    pub fn new(base: u32, size: usize) -> Self {
        Self {
            base,
            arena: ByteArena::new(size),
        }
    }

    /// Read-only memory holding `bytes`
    pub fn rom(base: u32, bytes: Vec<u8>) -> Self {
        Self {
            base,
            arena: ByteArena::rom(bytes),
        }
    }

    pub fn arena(&self) -> &ByteArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut ByteArena {
        &mut self.arena
    }

    /// Report faults with the absolute address
    fn absolute<T>(&self, result: Result<T>) -> Result<T> {
        result.map_err(|err| match err {
            EmulatorError::UnhandledAccess {
                kind,
                address,
                width,
            } => EmulatorError::UnhandledAccess {
                kind,
                address: self.base.wrapping_add(address),
                width,
            },
            other => other,
        })
    }
}

impl Device for Ram {
    fn capabilities(&self) -> DeviceCaps {
        DeviceCaps::MEMORY
    }

    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) -> Result<()> {
        if !self.arena.is_read_only() {
            self.arena.clear();
        }
        Ok(())
    }

    fn as_memory(&mut self) -> Option<&mut dyn MemoryMapped> {
        Some(self)
    }
}

impl MemoryMapped for Ram {
    fn address_range(&self) -> (u32, u32) {
        let len = self.arena.len().max(1) as u32;
        (self.base, self.base.saturating_add(len - 1))
    }

    fn read32(&mut self, _ctx: &mut DeviceContext<'_>, offset: u32) -> Result<u32> {
        self.absolute(self.arena.read32(offset))
    }

    fn write32(&mut self, _ctx: &mut DeviceContext<'_>, offset: u32, value: u32) -> Result<()> {
        let result = self.arena.write32(offset, value);
        self.absolute(result)
    }

    fn read16(&mut self, _ctx: &mut DeviceContext<'_>, offset: u32) -> Result<u16> {
        self.absolute(self.arena.read16(offset))
    }

    fn write16(&mut self, _ctx: &mut DeviceContext<'_>, offset: u32, value: u16) -> Result<()> {
        let result = self.arena.write16(offset, value);
        self.absolute(result)
    }

    fn read8(&mut self, _ctx: &mut DeviceContext<'_>, offset: u32) -> Result<u8> {
        self.absolute(self.arena.read8(offset))
    }

    fn write8(&mut self, _ctx: &mut DeviceContext<'_>, offset: u32, value: u8) -> Result<()> {
        let result = self.arena.write8(offset, value);
        self.absolute(result)
    }
}
