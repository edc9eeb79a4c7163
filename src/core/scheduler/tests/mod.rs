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

//! Scheduler tests
//!
//! - `fixtures`: test devices shared by the other modules
//! - `timers`: run loop ordering and timer operations
//! - `execution`: CPU budgets, suspension and clocks
//! - `lines`: line driving, pulses and wake-ups
//! - `streams`: stream flushing and the mixer feed
//! - `bus`: memory-mapped dispatch and unhandled accesses
//! - `lifecycle`: start/reset/stop and stale handles

#[cfg(test)]
mod fixtures;


#[cfg(test)]
mod execution;
