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

//! Final mixer
//!
//! Consumes the pending output of every stream and resamples it to stereo
//! frames at the output rate by sample-and-hold. Sums saturate at the
//! `i16` range.

use super::StreamTable;
use crate::core::time::VirtualTime;
use std::collections::HashMap;
use std::mem;

/// Stereo mixer feeding the audio output
#[derive(Debug)]
pub struct SoundMixer {
    output_rate: u32,
    base: VirtualTime,
    frames_done: u64,
    output: Vec<(i16, i16)>,
    /// Last frame of each stream, repeated when a stream produced nothing
    held: HashMap<usize, (i16, i16)>,
}

impl SoundMixer {
    pub fn new(output_rate: u32) -> Self {
        Self {
            output_rate,
            base: VirtualTime::ZERO,
            frames_done: 0,
            output: Vec::new(),
            held: HashMap::new(),
        }
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Mix everything streams produced up to `now` and clear their output
    ///
    /// Returns the number of stereo frames appended.
    pub fn mix(&mut self, now: VirtualTime, streams: &mut StreamTable) -> usize {
        let target = now
            .saturating_sub(self.base)
            .as_cycles(self.output_rate as u64);
        let frames = target.saturating_sub(self.frames_done) as usize;
        if frames == 0 {
            return 0;
        }

        let mut left = vec![0i32; frames];
        let mut right = vec![0i32; frames];

        for (handle, stream) in streams.iter_mut() {
            let channels = stream.channels;
            let available = stream.pending_frames();
            let pending = mem::take(&mut stream.pending);
            let held = self.held.entry(handle.index()).or_insert((0, 0));

            for k in 0..frames {
                if available > 0 {
                    let index = k * available / frames;
                    let frame = &pending[index * channels..(index + 1) * channels];
                    *held = match frame {
                        [mono] => (*mono, *mono),
                        [l, r, ..] => (*l, *r),
                        [] => *held,
                    };
                }
                left[k] += held.0 as i32;
                right[k] += held.1 as i32;
            }
        }

        let clamp = |v: i32| v.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
        self.output
            .extend(left.into_iter().zip(right).map(|(l, r)| (clamp(l), clamp(r))));
        self.frames_done += frames as u64;

        let whole = self.frames_done / self.output_rate as u64;
        if whole > 0 {
            self.base = self.base.saturating_add(VirtualTime::from_seconds(whole));
            self.frames_done -= whole * self.output_rate as u64;
        }
        frames
    }

    /// Drain mixed frames
    pub fn take(&mut self) -> Vec<(i16, i16)> {
        mem::take(&mut self.output)
    }

    pub fn buffered(&self) -> usize {
        self.output.len()
    }

    /// Restart at `now` with nothing buffered
    pub fn reset(&mut self, now: VirtualTime) {
        self.base = now;
        self.frames_done = 0;
        self.output.clear();
        self.held.clear();
    }
}
