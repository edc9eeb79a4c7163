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

//! Stream operations

use super::Scheduler;
use crate::core::device::{DeviceCaps, DeviceId};
use crate::core::error::{EmulatorError, Result};
use crate::core::stream::{SoundSource, StreamChunk, StreamGenerator, StreamHandle};
use crate::core::time::{check_clock, VirtualTime};

impl Scheduler {
    /// Create a stream owned by `owner`, starting at the current time
    ///
    /// # Errors
    ///
    /// `Config` if a `Device` generator is requested by a device without
    /// the `SOUND` capability, or for zero channels; `InvalidClock` for
    /// an unsupported rate.
    pub fn stream_create(
        &mut self,
        owner: DeviceId,
        channels: usize,
        sample_rate: u32,
        generator: StreamGenerator,
    ) -> Result<StreamHandle> {
        let node = self.tree.node(owner)?;
        if matches!(generator, StreamGenerator::Device) && !node.caps.contains(DeviceCaps::SOUND) {
            return Err(EmulatorError::Config(format!(
                "'{}' has no sound capability to generate a stream",
                node.tag
            )));
        }
        let now = self.now();
        let handle = self
            .streams
            .create(owner, channels, sample_rate, now, generator)?;
        log::debug!(
            "Stream: {} for '{}' ({} ch at {} Hz)",
            handle,
            self.tree.tag(owner),
            channels,
            sample_rate
        );
        Ok(handle)
    }

    /// Bring a stream up to the current time
    pub fn stream_update(&mut self, handle: StreamHandle) -> Result<()> {
        let now = self.now();
        self.flush_to(handle, now).map(|_| ())
    }

    /// Generate the samples a stream owes up to `when`
    ///
    /// Returns the number of frames generated. Repeating a flush for the
    /// same time generates nothing.
    ///
    /// # Errors
    ///
    /// `InvalidTimeRange` if `when` is in the future; `InvalidLifecycle`
    /// if the stream's device generator is the device currently running
    /// (use [`Scheduler::stream_update_from`]).
    pub fn flush_to(&mut self, handle: StreamHandle, when: VirtualTime) -> Result<u64> {
        let (owner, mut chunk, due) = match self.plan_flush(handle, when)? {
            Some(plan) => plan,
            None => return Ok(0),
        };

        let mut generator = self.streams.get_mut(handle)?.take_generator().ok_or_else(|| {
            EmulatorError::InvalidLifecycle {
                device: self.tree.tag(owner).to_string(),
                reason: format!("{} flushed while generating", handle),
            }
        })?;
        let result = match &mut generator {
            StreamGenerator::Func(generate) => generate(&mut chunk),
            StreamGenerator::Device => {
                if self.tree.node(owner)?.is_available() {
                    self.with_device(owner, |device, ctx| match device.as_sound() {
                        Some(source) => source.generate(&mut chunk),
                        None => Err(EmulatorError::fault(ctx.tag(), "stream owner lost its sound interface")),
                    })
                } else {
                    Err(EmulatorError::InvalidLifecycle {
                        device: self.tree.tag(owner).to_string(),
                        reason: format!("{} updated while its owner is running", handle),
                    })
                }
            }
        };
        self.streams.get_mut(handle)?.put_generator(generator);

        self.finish_flush(handle, owner, chunk, result)?;
        Ok(due)
    }

    /// Flush a stream with the caller acting as its generator
    pub fn stream_update_from(
        &mut self,
        handle: StreamHandle,
        source: &mut dyn SoundSource,
    ) -> Result<()> {
        let now = self.now();
        if let Some((owner, mut chunk, _)) = self.plan_flush(handle, now)? {
            let result = source.generate(&mut chunk);
            self.finish_flush(handle, owner, chunk, result)?;
        }
        Ok(())
    }

    fn plan_flush(
        &self,
        handle: StreamHandle,
        when: VirtualTime,
    ) -> Result<Option<(DeviceId, StreamChunk, u64)>> {
        if when > self.now() {
            return Err(EmulatorError::InvalidTimeRange(format!(
                "{} flushed to {} ahead of now {}",
                handle,
                when,
                self.now()
            )));
        }
        let stream = self.streams.get(handle)?;
        let due = stream.samples_due(when);
        if due == 0 {
            return Ok(None);
        }
        Ok(Some((stream.owner, stream.next_chunk(handle, due), due)))
    }

    fn finish_flush(
        &mut self,
        handle: StreamHandle,
        owner: DeviceId,
        chunk: StreamChunk,
        result: Result<()>,
    ) -> Result<()> {
        // A failed generator still advances (with silence) so time keeps moving
        self.contain(owner, result)?;
        self.streams.get_mut(handle)?.commit(chunk);
        Ok(())
    }

    /// Change a stream's rate; samples up to now use the old rate
    pub fn set_sample_rate(&mut self, handle: StreamHandle, sample_rate: u32) -> Result<()> {
        check_clock(sample_rate as u64)?;
        self.stream_update(handle)?;
        let stream = self.streams.get_mut(handle)?;
        let position = stream.position();
        stream.rebase(position);
        stream.sample_rate = sample_rate;
        Ok(())
    }

    /// Take the produced but unmixed samples of a stream
    pub fn stream_drain(&mut self, handle: StreamHandle) -> Result<Vec<i16>> {
        Ok(std::mem::take(&mut self.streams.get_mut(handle)?.pending))
    }

    /// Time up to which a stream has produced samples
    pub fn stream_position(&self, handle: StreamHandle) -> Result<VirtualTime> {
        Ok(self.streams.get(handle)?.position())
    }

    /// Flush every stream and feed the mixer
    pub(crate) fn flush_streams(&mut self) -> Result<()> {
        let now = self.now();
        for handle in self.streams.handles() {
            self.flush_to(handle, now)?;
        }
        let frames = self.mixer.mix(now, &mut self.streams);
        self.diagnostics.mixed_frames += frames as u64;
        Ok(())
    }

    /// Drain the mixer's stereo output
    pub fn take_audio(&mut self) -> Vec<(i16, i16)> {
        self.mixer.take()
    }
}
