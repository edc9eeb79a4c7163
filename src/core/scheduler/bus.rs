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

//! Memory-mapped dispatch

use super::Scheduler;
use crate::core::device::{DeviceContext, DeviceId};
use crate::core::error::{AccessKind, EmulatorError, Result};
use crate::core::memory::MemoryMapped;

impl Scheduler {
    /// Route one access to the device claiming `address`
    ///
    /// `Ok(None)` means the access was not answered (nobody claims the
    /// address, the claimant is the device issuing the access, or the
    /// handler reported a local fault); the fault has been counted.
    fn dispatch<R, F>(
        &mut self,
        kind: AccessKind,
        address: u32,
        width: u8,
        access: F,
    ) -> Result<Option<R>>
    where
        F: FnOnce(&mut dyn MemoryMapped, &mut DeviceContext<'_>, u32) -> Result<R>,
    {
        let unhandled = EmulatorError::UnhandledAccess {
            kind,
            address,
            width,
        };
        let Some((device, offset)) = self.map.claimant(address) else {
            self.note_fault(DeviceId::ROOT, &unhandled);
            return Ok(None);
        };
        if !self.tree.node(device)?.is_available() {
            self.note_fault(device, &unhandled);
            return Ok(None);
        }

        let result = self.with_device(device, |dev, ctx| match dev.as_memory() {
            Some(memory) => access(memory, ctx, offset),
            None => Err(unhandled),
        });
        match result {
            Ok(value) => Ok(Some(value)),
            Err(err) if !err.is_fatal() => {
                self.note_fault(device, &err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn read8(&mut self, address: u32) -> Result<u8> {
        let value = self.dispatch(AccessKind::Read, address, 1, |m, ctx, offset| m.read8(ctx, offset))?;
        Ok(value.unwrap_or(self.config.unmapped_value as u8))
    }

    pub fn read16(&mut self, address: u32) -> Result<u16> {
        let value = self.dispatch(AccessKind::Read, address, 2, |m, ctx, offset| m.read16(ctx, offset))?;
        Ok(value.unwrap_or(self.config.unmapped_value as u16))
    }

    pub fn read32(&mut self, address: u32) -> Result<u32> {
        let value = self.dispatch(AccessKind::Read, address, 4, |m, ctx, offset| m.read32(ctx, offset))?;
        Ok(value.unwrap_or(self.config.unmapped_value))
    }

    pub fn write8(&mut self, address: u32, value: u8) -> Result<()> {
        self.dispatch(AccessKind::Write, address, 1, |m, ctx, offset| m.write8(ctx, offset, value))?;
        Ok(())
    }

    pub fn write16(&mut self, address: u32, value: u16) -> Result<()> {
        self.dispatch(AccessKind::Write, address, 2, |m, ctx, offset| m.write16(ctx, offset, value))?;
        Ok(())
    }

    pub fn write32(&mut self, address: u32, value: u32) -> Result<()> {
        self.dispatch(AccessKind::Write, address, 4, |m, ctx, offset| m.write32(ctx, offset, value))?;
        Ok(())
    }

    /// Ask a device to translate a logical address
    pub fn translate_address(&mut self, id: DeviceId, address: u32) -> Result<u32> {
        self.with_device(id, |device, ctx| device.translate_address(ctx, address))
    }
}
