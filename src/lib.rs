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

//! Deterministic scheduling core for multi-chip hardware emulation
//!
//! A machine is a tree of devices sharing one virtual timeline. CPUs run
//! in bounded slices, peripherals react to timers and lines, sound
//! streams are generated lazily up to the instant something observes
//! them. Given the same inputs, a run produces the same event order,
//! the same memory accesses and the same audio.
//!
//! # Example
//!
//! ```
//! use machina::core::devices::{demo_machine, ScriptCpu};
//! use machina::core::{SchedulerConfig, VirtualTime};
//!
//! let mut sched = demo_machine(SchedulerConfig::default()).unwrap();
//! sched.start().unwrap();
//!
//! // Ten frames at 60 Hz
//! for _ in 0..10 {
//!     sched.advance_one_frame().unwrap();
//! }
//!
//! let cpu = sched.lookup(":cpu").unwrap();
//! assert!(!sched.device_as::<ScriptCpu>(cpu).unwrap().serviced.is_empty());
//! assert!(sched.now() > VirtualTime::from_millis(160));
//! ```

pub mod core;
