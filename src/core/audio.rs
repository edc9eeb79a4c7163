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

//! Host audio output using cpal
//!
//! Plays the stereo frames the scheduler's mixer produces. The output
//! stream runs on cpal's audio thread; frames are handed over through a
//! shared queue.

use crate::core::error::{EmulatorError, Result};
use crate::core::scheduler::Scheduler;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

type FrameQueue = Arc<Mutex<VecDeque<(i16, i16)>>>;

fn lock(queue: &FrameQueue) -> MutexGuard<'_, VecDeque<(i16, i16)>> {
    queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Audio output backend
///
/// # Example
///
/// ```no_run
/// use machina::core::audio::AudioBackend;
///
/// let mut audio = AudioBackend::new(48_000).unwrap();
/// audio.queue_samples(&[(100, 100); 100]);
/// ```
pub struct AudioBackend {
    /// Kept alive for playback
    #[allow(dead_code)]
    stream: cpal::Stream,
    queue: FrameQueue,
    sample_rate: u32,
}

impl AudioBackend {
    /// Open the default output device
    ///
    /// `expected_rate` is the mixer's output rate; a device running at a
    /// different rate is used anyway, with a warning.
    ///
    /// # Errors
    ///
    /// `Config` if there is no stereo output device or the stream cannot
    /// be started.
    pub fn new(expected_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EmulatorError::Config("no audio output device available".to_string()))?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());

        let config = device
            .default_output_config()
            .map_err(|e| EmulatorError::Config(format!("audio device '{}': {}", name, e)))?;
        let sample_rate = config.sample_rate().0;
        let channels = config.channels();
        if channels != 2 {
            return Err(EmulatorError::Config(format!(
                "audio output needs 2 channels, '{}' has {}",
                name, channels
            )));
        }
        if sample_rate != expected_rate {
            log::warn!(
                "Audio: device runs at {} Hz, mixer at {} Hz; playback will drift",
                sample_rate,
                expected_rate
            );
        }
        log::info!("Audio: using '{}' at {} Hz", name, sample_rate);

        let queue: FrameQueue = Arc::new(Mutex::new(VecDeque::new()));
        let feed = Arc::clone(&queue);
        let stream = device
            .build_output_stream(
                &config.into(),
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut queue = lock(&feed);
                    for frame in data.chunks_mut(2) {
                        let (left, right) = queue.pop_front().unwrap_or((0, 0));
                        frame[0] = left as f32 / 32768.0;
                        frame[1] = right as f32 / 32768.0;
                    }
                },
                |err| log::error!("Audio: stream error: {}", err),
                None,
            )
            .map_err(|e| EmulatorError::Config(format!("audio stream: {}", e)))?;
        stream
            .play()
            .map_err(|e| EmulatorError::Config(format!("audio playback: {}", e)))?;

        Ok(Self {
            stream,
            queue,
            sample_rate,
        })
    }

    /// Queue stereo frames for playback
    pub fn queue_samples(&mut self, samples: &[(i16, i16)]) {
        lock(&self.queue).extend(samples.iter());
    }

    /// Move everything the mixer produced into the playback queue
    ///
    /// Returns the number of frames queued.
    pub fn pump(&mut self, sched: &mut Scheduler) -> usize {
        let frames = sched.take_audio();
        self.queue_samples(&frames);
        frames.len()
    }

    /// Frames waiting to be played
    pub fn buffer_level(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Hosts without an audio device (CI) skip the checks

    #[test]
    fn test_backend_creation() {
        match AudioBackend::new(48_000) {
            Ok(audio) => {
                assert!(audio.sample_rate() > 0);
                assert_eq!(audio.buffer_level(), 0);
            }
            Err(e) => println!("Audio backend unavailable: {}", e),
        }
    }

    #[test]
    fn test_pump_moves_mixer_output() {
        use crate::core::config::SchedulerConfig;
        use crate::core::time::VirtualTime;

        let Ok(mut audio) = AudioBackend::new(48_000) else {
            return;
        };
        let mut sched = Scheduler::new(SchedulerConfig::default()).unwrap();
        sched.start().unwrap();
        sched.run_for(VirtualTime::from_millis(20)).unwrap();

        let queued = audio.pump(&mut sched);
        assert_eq!(queued, 960);
        assert!(sched.take_audio().is_empty());
    }
}
