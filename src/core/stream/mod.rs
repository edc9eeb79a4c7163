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

//! Sound stream synchronisation
//!
//! Sound devices do not produce samples on their own schedule. Each stream
//! remembers how many samples it has produced since its base time and is
//! brought up to date only when someone needs it to be: before the owning
//! device changes a register, or when the machine-level flush timer feeds
//! the mixer.
//!
//! ```text
//! target = floor((now - base) * sample_rate)
//! generate(target - samples_done) samples, then samples_done = target
//! ```
//!
//! Flushing twice at the same time generates nothing the second time, and
//! a stream's position never passes the current time.

mod mixer;

pub use mixer::SoundMixer;

use crate::core::device::DeviceId;
use crate::core::error::{EmulatorError, Result};
use crate::core::time::VirtualTime;
use std::fmt;

/// Handle to a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle(u32);

impl StreamHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

/// Interface of devices that produce samples
pub trait SoundSource {
    /// Fill `chunk` with its `frames()` frames of output
    fn generate(&mut self, chunk: &mut StreamChunk) -> Result<()>;
}

/// Closure producing samples for a stream
pub type GeneratorFn = Box<dyn FnMut(&mut StreamChunk) -> Result<()>>;

/// Where a stream's samples come from
pub enum StreamGenerator {
    /// The owner's [`SoundSource`]
    Device,
    /// A closure
    Func(GeneratorFn),
}

impl StreamGenerator {
    pub fn func<F>(f: F) -> Self
    where
        F: FnMut(&mut StreamChunk) -> Result<()> + 'static,
    {
        StreamGenerator::Func(Box::new(f))
    }
}

impl fmt::Debug for StreamGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamGenerator::Device => write!(f, "Device"),
            StreamGenerator::Func(_) => write!(f, "Func"),
        }
    }
}

/// A block of interleaved samples requested from a generator
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub stream: StreamHandle,
    /// Index of the first frame, counted from the stream's base time
    pub start_sample: u64,
    /// Time of the first frame
    pub start: VirtualTime,
    pub sample_rate: u32,
    channels: usize,
    data: Vec<i16>,
}

impl StreamChunk {
    pub fn new(
        stream: StreamHandle,
        start_sample: u64,
        start: VirtualTime,
        sample_rate: u32,
        channels: usize,
        frames: usize,
    ) -> Self {
        Self {
            stream,
            start_sample,
            start,
            sample_rate,
            channels,
            data: vec![0; frames * channels],
        }
    }

    pub fn frames(&self) -> usize {
        self.data.len() / self.channels.max(1)
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn set(&mut self, frame: usize, channel: usize, value: i16) {
        if channel < self.channels {
            if let Some(sample) = self.data.get_mut(frame * self.channels + channel) {
                *sample = value;
            }
        }
    }

    /// Samples of one frame, one per channel
    pub fn frame_mut(&mut self, frame: usize) -> &mut [i16] {
        let start = (frame * self.channels).min(self.data.len());
        let end = (start + self.channels).min(self.data.len());
        &mut self.data[start..end]
    }

    pub fn fill(&mut self, value: i16) {
        self.data.fill(value);
    }

    pub fn data(&self) -> &[i16] {
        &self.data
    }

    pub(crate) fn into_data(self) -> Vec<i16> {
        self.data
    }
}

/// One stream
#[derive(Debug)]
pub struct StreamRecord {
    pub owner: DeviceId,
    pub channels: usize,
    pub sample_rate: u32,
    /// Time of sample 0
    pub base: VirtualTime,
    /// Samples produced since `base`
    pub samples_done: u64,
    /// Produced samples not yet consumed, interleaved
    pub pending: Vec<i16>,
    pub generate_calls: u64,
    pub samples_generated: u64,
    generator: Option<StreamGenerator>,
}

impl StreamRecord {
    /// Time up to which samples exist (rounded up to the tick)
    pub fn position(&self) -> VirtualTime {
        VirtualTime::from_cycles(self.samples_done, self.sample_rate as u64)
            .map(|elapsed| self.base.saturating_add(elapsed))
            .unwrap_or(VirtualTime::NEVER)
    }

    /// Samples needed to reach `when`, 0 if already there
    pub fn samples_due(&self, when: VirtualTime) -> u64 {
        when.saturating_sub(self.base)
            .as_cycles(self.sample_rate as u64)
            .saturating_sub(self.samples_done)
    }

    /// Empty chunk for the next `frames` frames
    pub fn next_chunk(&self, handle: StreamHandle, frames: u64) -> StreamChunk {
        StreamChunk::new(
            handle,
            self.samples_done,
            self.position(),
            self.sample_rate,
            self.channels,
            frames as usize,
        )
    }

    /// Append a generated chunk and advance
    pub fn commit(&mut self, chunk: StreamChunk) {
        let frames = chunk.frames() as u64;
        self.samples_done += frames;
        self.samples_generated += frames;
        self.generate_calls += 1;
        self.pending.extend(chunk.into_data());
    }

    /// Restart counting from `at`
    pub fn rebase(&mut self, at: VirtualTime) {
        self.base = at;
        self.samples_done = 0;
    }

    pub fn pending_frames(&self) -> usize {
        self.pending.len() / self.channels.max(1)
    }

    pub fn is_device_generated(&self) -> bool {
        matches!(self.generator, Some(StreamGenerator::Device))
    }

    pub(crate) fn take_generator(&mut self) -> Option<StreamGenerator> {
        self.generator.take()
    }

    pub(crate) fn put_generator(&mut self, generator: StreamGenerator) {
        self.generator = Some(generator);
    }
}

/// All streams of a session
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: Vec<Option<StreamRecord>>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self {
            streams: Vec::new(),
        }
    }

    pub fn create(
        &mut self,
        owner: DeviceId,
        channels: usize,
        sample_rate: u32,
        base: VirtualTime,
        generator: StreamGenerator,
    ) -> Result<StreamHandle> {
        crate::core::time::check_clock(sample_rate as u64)?;
        if channels == 0 {
            return Err(EmulatorError::Config(
                "a stream needs at least one channel".to_string(),
            ));
        }
        let handle = StreamHandle(self.streams.len() as u32);
        self.streams.push(Some(StreamRecord {
            owner,
            channels,
            sample_rate,
            base,
            samples_done: 0,
            pending: Vec::new(),
            generate_calls: 0,
            samples_generated: 0,
            generator: Some(generator),
        }));
        Ok(handle)
    }

    pub fn get(&self, handle: StreamHandle) -> Result<&StreamRecord> {
        self.streams
            .get(handle.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| EmulatorError::UnknownStream(handle.to_string()))
    }

    pub fn get_mut(&mut self, handle: StreamHandle) -> Result<&mut StreamRecord> {
        self.streams
            .get_mut(handle.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| EmulatorError::UnknownStream(handle.to_string()))
    }

    /// Release every stream of `owner`
    pub fn remove_owner(&mut self, owner: DeviceId) -> usize {
        let mut removed = 0;
        for slot in &mut self.streams {
            if slot.as_ref().is_some_and(|stream| stream.owner == owner) {
                *slot = None;
                removed += 1;
            }
        }
        removed
    }

    pub fn handles(&self) -> Vec<StreamHandle> {
        self.iter().map(|(handle, _)| handle).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (StreamHandle, &StreamRecord)> + '_ {
        self.streams.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref()
                .map(|stream| (StreamHandle(index as u32), stream))
        })
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (StreamHandle, &mut StreamRecord)> + '_ {
        self.streams
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.as_mut()
                    .map(|stream| (StreamHandle(index as u32), stream))
            })
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
