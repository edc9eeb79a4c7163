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

//! Bounds-checked byte storage
//!
//! A [`ByteArena`] owns the bytes of a RAM or ROM and hands out
//! little-endian reads and writes by offset. Optional banking splits the
//! arena into equal banks; the banked accessors then read through the
//! selected bank, the way a bank-switched ROM window works.

use crate::core::error::{AccessKind, EmulatorError, Result};

/// Owned little-endian byte storage with bank views
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteArena {
    data: Vec<u8>,
    bank_size: usize,
    bank: usize,
    read_only: bool,
}

impl ByteArena {
    /// Zero-filled writable arena of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
            bank_size: size,
            bank: 0,
            read_only: false,
        }
    }

    /// Read-only arena holding `bytes`
    pub fn rom(bytes: Vec<u8>) -> Self {
        let bank_size = bytes.len();
        Self {
            data: bytes,
            bank_size,
            bank: 0,
            read_only: true,
        }
    }

    /// Split into banks of `bank_size` bytes
    ///
    /// # Errors
    ///
    /// `Config` if the size does not divide the arena.
    pub fn with_banks(mut self, bank_size: usize) -> Result<Self> {
        if bank_size == 0 || self.data.len() % bank_size != 0 {
            return Err(EmulatorError::Config(format!(
                "bank size {} does not divide arena of {} bytes",
                bank_size,
                self.data.len()
            )));
        }
        self.bank_size = bank_size;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn bank_count(&self) -> usize {
        self.data.len().checked_div(self.bank_size).unwrap_or(0)
    }

    pub fn selected_bank(&self) -> usize {
        self.bank
    }

    pub fn select_bank(&mut self, bank: usize) -> Result<()> {
        if bank >= self.bank_count() {
            return Err(EmulatorError::fault(
                "arena",
                format!("bank {} of {}", bank, self.bank_count()),
            ));
        }
        self.bank = bank;
        Ok(())
    }

    /// Bytes of one bank
    pub fn bank(&self, bank: usize) -> Option<&[u8]> {
        let start = bank.checked_mul(self.bank_size)?;
        self.data.get(start..start.checked_add(self.bank_size)?)
    }

    fn range(&self, kind: AccessKind, offset: u32, width: u8) -> Result<std::ops::Range<usize>> {
        let start = offset as usize;
        let end = start + width as usize;
        if end > self.data.len() {
            return Err(EmulatorError::UnhandledAccess {
                kind,
                address: offset,
                width,
            });
        }
        Ok(start..end)
    }

    fn read_le(&self, offset: u32, width: u8) -> Result<u32> {
        let range = self.range(AccessKind::Read, offset, width)?;
        Ok(self.data[range]
            .iter()
            .rev()
            .fold(0u32, |acc, &byte| (acc << 8) | byte as u32))
    }

    fn write_le(&mut self, offset: u32, width: u8, value: u32) -> Result<()> {
        let range = self.range(AccessKind::Write, offset, width)?;
        if self.read_only {
            return Err(EmulatorError::UnhandledAccess {
                kind: AccessKind::Write,
                address: offset,
                width,
            });
        }
        for (i, byte) in self.data[range].iter_mut().enumerate() {
            *byte = (value >> (i * 8)) as u8;
        }
        Ok(())
    }

    pub fn read8(&self, offset: u32) -> Result<u8> {
        self.read_le(offset, 1).map(|v| v as u8)
    }

    pub fn read16(&self, offset: u32) -> Result<u16> {
        self.read_le(offset, 2).map(|v| v as u16)
    }

    pub fn read32(&self, offset: u32) -> Result<u32> {
        self.read_le(offset, 4)
    }

    pub fn write8(&mut self, offset: u32, value: u8) -> Result<()> {
        self.write_le(offset, 1, value as u32)
    }

    pub fn write16(&mut self, offset: u32, value: u16) -> Result<()> {
        self.write_le(offset, 2, value as u32)
    }

    pub fn write32(&mut self, offset: u32, value: u32) -> Result<()> {
        self.write_le(offset, 4, value)
    }

    /// Read through the selected bank
    pub fn banked_read8(&self, offset: u32) -> Result<u8> {
        if offset as usize >= self.bank_size {
            return Err(EmulatorError::UnhandledAccess {
                kind: AccessKind::Read,
                address: offset,
                width: 1,
            });
        }
        self.read8((self.bank * self.bank_size) as u32 + offset)
    }

    /// Copy `bytes` in at `offset`, ignoring the read-only flag
    pub fn load(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(bytes.len())
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                EmulatorError::Config(format!(
                    "{} bytes at {} do not fit in {} bytes",
                    bytes.len(),
                    offset,
                    self.data.len()
                ))
            })?;
        self.data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }
}
