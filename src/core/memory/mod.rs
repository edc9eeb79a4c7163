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

//! Memory-mapped I/O
//!
//! Devices with the `MEMORY` capability implement [`MemoryMapped`] and
//! claim an address range in the scheduler's [`AddressMap`]. Accesses are
//! dispatched synchronously at the issuing instruction's time:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Scheduler::read32(addr)                  │
//! │   map.claimant(addr) -> (device, offset) │
//! │   device.as_memory().read32(ctx, offset) │
//! └──────────────────────────────────────────┘
//!         │ no claimant / device busy
//!         ▼
//!   UnhandledAccess: logged, counted,
//!   answered with the unmapped value
//! ```
//!
//! [`ByteArena`] is the storage most memory devices sit on.

mod arena;

pub use arena::ByteArena;

use crate::core::device::{DeviceContext, DeviceId};
use crate::core::error::{EmulatorError, Result};

/// Trait for memory-mapped devices
///
/// Devices implement the 32-bit entry points; 8-bit and 16-bit accesses
/// default to the aligned 32-bit word, with read-modify-write for stores.
///
/// Offsets are relative to the start of [`MemoryMapped::address_range`].
///
/// # Example
///
/// ```
/// use machina::core::device::DeviceContext;
/// use machina::core::error::Result;
/// use machina::core::memory::MemoryMapped;
///
/// struct Latch {
///     value: u32,
/// }
///
/// impl MemoryMapped for Latch {
///     fn address_range(&self) -> (u32, u32) {
///         (0x4000, 0x4003)
///     }
///
///     fn read32(&mut self, _ctx: &mut DeviceContext<'_>, _offset: u32) -> Result<u32> {
///         Ok(self.value)
///     }
///
///     fn write32(&mut self, _ctx: &mut DeviceContext<'_>, _offset: u32, value: u32) -> Result<()> {
///         self.value = value;
///         Ok(())
///     }
/// }
/// ```
pub trait MemoryMapped {
    /// Inclusive `(start, end)` of the claimed addresses
    fn address_range(&self) -> (u32, u32);

    /// Read a 32-bit value
    ///
    /// # Arguments
    ///
    /// * `ctx` - Context of the device being accessed
    /// * `offset` - Offset from the start of the range
    fn read32(&mut self, ctx: &mut DeviceContext<'_>, offset: u32) -> Result<u32>;

    /// Write a 32-bit value
    fn write32(&mut self, ctx: &mut DeviceContext<'_>, offset: u32, value: u32) -> Result<()>;

    /// Read a 16-bit value from the aligned word
    fn read16(&mut self, ctx: &mut DeviceContext<'_>, offset: u32) -> Result<u16> {
        let value = self.read32(ctx, offset & !0x03)?;
        let shift = (offset & 0x02) * 8;
        Ok(((value >> shift) & 0xFFFF) as u16)
    }

    /// Write a 16-bit value into the aligned word
    fn write16(&mut self, ctx: &mut DeviceContext<'_>, offset: u32, value: u16) -> Result<()> {
        let aligned = offset & !0x03;
        let shift = (offset & 0x02) * 8;
        let mask = !(0xFFFFu32 << shift);
        let current = self.read32(ctx, aligned)?;
        self.write32(ctx, aligned, (current & mask) | ((value as u32) << shift))
    }

    /// Read an 8-bit value from the aligned word
    fn read8(&mut self, ctx: &mut DeviceContext<'_>, offset: u32) -> Result<u8> {
        let value = self.read32(ctx, offset & !0x03)?;
        let shift = (offset & 0x03) * 8;
        Ok(((value >> shift) & 0xFF) as u8)
    }

    /// Write an 8-bit value into the aligned word
    fn write8(&mut self, ctx: &mut DeviceContext<'_>, offset: u32, value: u8) -> Result<()> {
        let aligned = offset & !0x03;
        let shift = (offset & 0x03) * 8;
        let mask = !(0xFFu32 << shift);
        let current = self.read32(ctx, aligned)?;
        self.write32(ctx, aligned, (current & mask) | ((value as u32) << shift))
    }
}

/// One claimed range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry {
    pub start: u32,
    pub end: u32,
    pub device: DeviceId,
}

/// Routing table from absolute addresses to devices
#[derive(Debug, Default)]
pub struct AddressMap {
    /// Sorted by `start`, never overlapping
    entries: Vec<MapEntry>,
}

impl AddressMap {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Claim `start..=end` for `device`
    ///
    /// # Errors
    ///
    /// `Config` for an empty range or one overlapping an existing claim.
    pub fn map(&mut self, start: u32, end: u32, device: DeviceId) -> Result<()> {
        if end < start {
            return Err(EmulatorError::Config(format!(
                "empty address range 0x{:08X}-0x{:08X}",
                start, end
            )));
        }
        if let Some(other) = self
            .entries
            .iter()
            .find(|entry| start <= entry.end && entry.start <= end)
        {
            return Err(EmulatorError::Config(format!(
                "range 0x{:08X}-0x{:08X} overlaps 0x{:08X}-0x{:08X} of {}",
                start, end, other.start, other.end, other.device
            )));
        }
        let index = self.entries.partition_point(|entry| entry.start < start);
        self.entries.insert(index, MapEntry { start, end, device });
        Ok(())
    }

    /// Device claiming `address` and the offset into its range
    pub fn claimant(&self, address: u32) -> Option<(DeviceId, u32)> {
        let index = self.entries.partition_point(|entry| entry.start <= address);
        let entry = self.entries.get(index.checked_sub(1)?)?;
        (address <= entry.end).then(|| (entry.device, address - entry.start))
    }

    /// Drop every range claimed by `device`
    pub fn unmap_device(&mut self, device: DeviceId) {
        self.entries.retain(|entry| entry.device != device);
    }

    pub fn entries(&self) -> &[MapEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests;
