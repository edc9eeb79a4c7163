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

//! Scheduling core
//!
//! This module contains the pieces of a deterministic machine:
//! - Virtual time and clock conversion
//! - Timers and their ordered queue
//! - The device tree and device contracts
//! - CPU execution budgets and suspension
//! - Interrupt/control lines
//! - Sound streams and the mixer
//! - Memory-mapped dispatch
//! - The scheduler tying them together, plus snapshots
//! - A small reference machine

#[cfg(feature = "audio")]
pub mod audio;
pub mod config;
pub mod device;
pub mod devices;
pub mod error;
pub mod execute;
pub mod interrupt;
pub mod memory;
pub mod save_state;
pub mod scheduler;
pub mod stream;
pub mod time;
pub mod timing;

// Re-export commonly used types
pub use config::SchedulerConfig;
pub use device::{Device, DeviceCaps, DeviceContext, DeviceDescriptor, DeviceId};
pub use error::{EmulatorError, Result};
pub use execute::{Execute, SuspendReason};
pub use interrupt::{LineId, LineKind, LineState};
pub use save_state::SchedulerState;
pub use scheduler::{Diagnostics, Phase, Scheduler};
pub use stream::{SoundSource, StreamGenerator, StreamHandle};
pub use time::VirtualTime;
pub use timing::{TimerAction, TimerFired, TimerHandle};
