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

//! Scheduling state snapshots
//!
//! A [`SchedulerState`] captures everything the scheduler itself owns at
//! one instant: the virtual clock, every timer, stream positions, CPU
//! execution states and input lines. Device-internal registers are not
//! part of it; devices snapshot those themselves.
//!
//! # Format
//!
//! Snapshots are encoded with bincode for compact binary storage and can be
//! rendered as JSON for inspection. Devices, timers and streams are
//! identified by tag path and name, not by handle, so a snapshot can be
//! restored into a freshly built machine with the same layout.
//!
//! # Version Compatibility
//!
//! Snapshots carry a version number. Decoding or restoring a snapshot with
//! a different version fails with a `SaveState` error.
//!
//! # Example
//!
//! ```
//! use machina::core::config::SchedulerConfig;
//! use machina::core::save_state::SchedulerState;
//! use machina::core::scheduler::Scheduler;
//! use machina::core::time::VirtualTime;
//!
//! let mut sched = Scheduler::new(SchedulerConfig::default()).unwrap();
//! sched.start().unwrap();
//! sched.run_for(VirtualTime::from_millis(3)).unwrap();
//!
//! let bytes = sched.save_state().encode().unwrap();
//! let state = SchedulerState::decode(&bytes).unwrap();
//! assert_eq!(state.now, VirtualTime::from_millis(3));
//! ```

use crate::core::device::DeviceId;
use crate::core::error::{EmulatorError, Result};
use crate::core::execute::SuspendReason;
use crate::core::interrupt::{LineId, LineState};
use crate::core::scheduler::{Phase, Scheduler};
use crate::core::time::VirtualTime;
use crate::core::timing::TimerAction;
use bincode::{config, Decode, Encode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot version for compatibility checking
///
/// Incremented whenever the layout changes incompatibly.
pub const SCHEDULER_STATE_VERSION: u32 = 1;

/// Complete scheduling state of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct SchedulerState {
    /// Version number for compatibility checking
    pub version: u32,

    pub metadata: StateMetadata,

    /// Virtual time of the snapshot
    pub now: VirtualTime,

    /// Time frame counting restarted at
    pub frame_base: VirtualTime,

    /// Timers, armed ones first in firing order
    pub timers: Vec<TimerState>,

    pub streams: Vec<StreamState>,

    pub cpus: Vec<CpuState>,

    /// Input lines that are not in their power-on state
    pub lines: Vec<LineSnapshot>,
}

/// When and where the snapshot was taken
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
#[bincode(encode_bounds = "", decode_bounds = "")]
pub struct StateMetadata {
    /// Wall-clock time of the snapshot
    #[bincode(with_serde)]
    pub timestamp: DateTime<Utc>,

    /// Machine name from the configuration
    pub machine: String,

    /// Frames completed at snapshot time
    pub frame_count: u64,
}

/// What a timer does when it fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum ActionKind {
    Device,
    /// A closure; it survives only if the timer itself survives
    Callback,
    ClearLine { target: String, line: u16 },
    FlushStreams,
    Inert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct TimerState {
    /// Tag path of the owner
    pub owner: String,
    pub name: String,
    pub start: VirtualTime,
    pub expire: VirtualTime,
    pub period: VirtualTime,
    pub param: u64,
    pub enabled: bool,
    pub transient: bool,
    pub action: ActionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct StreamState {
    pub owner: String,
    /// Position among the owner's streams in creation order
    pub ordinal: u32,
    pub sample_rate: u32,
    pub base: VirtualTime,
    pub samples_done: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct CpuState {
    pub tag: String,
    pub clock: u64,
    pub base: VirtualTime,
    pub cycles: u64,
    pub total_cycles: u64,
    /// `SuspendReason` bits
    pub suspend: u32,
    pub awaited_trigger: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct LineSnapshot {
    pub device: String,
    pub line: u16,
    pub state: LineState,
    pub pending_edge: bool,
    pub edge_count: u64,
}

impl SchedulerState {
    /// Encode to bytes
    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::encode_to_vec(self, config::standard())
            .map_err(|e| EmulatorError::SaveState(format!("encoding failed: {}", e)))
    }

    /// Decode from bytes, checking the version
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (state, _): (SchedulerState, usize) =
            bincode::decode_from_slice(bytes, config::standard())
                .map_err(|e| EmulatorError::SaveState(format!("decoding failed: {}", e)))?;
        state.check_version()?;
        Ok(state)
    }

    /// Pretty JSON for inspection
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EmulatorError::SaveState(format!("JSON rendering failed: {}", e)))
    }

    fn check_version(&self) -> Result<()> {
        if self.version != SCHEDULER_STATE_VERSION {
            return Err(EmulatorError::SaveState(format!(
                "incompatible snapshot version: expected {}, got {}",
                SCHEDULER_STATE_VERSION, self.version
            )));
        }
        Ok(())
    }
}

impl Scheduler {
    /// Capture the scheduling state
    pub fn save_state(&self) -> SchedulerState {
        let tree = self.tree();
        let now = self.now();

        let timers = self
            .timers
            .in_firing_order()
            .into_iter()
            .map(|(handle, record)| TimerState {
                owner: tree.tag(handle.owner()).to_string(),
                name: record.name.clone(),
                start: record.start,
                expire: record.expire,
                period: record.period,
                param: record.param,
                enabled: record.enabled,
                transient: record.transient,
                action: match record.action() {
                    Some(TimerAction::Device) | None => ActionKind::Device,
                    Some(TimerAction::Callback(_)) => ActionKind::Callback,
                    Some(TimerAction::ClearLine { target, line }) => ActionKind::ClearLine {
                        target: tree.tag(*target).to_string(),
                        line: line.0,
                    },
                    Some(TimerAction::FlushStreams) => ActionKind::FlushStreams,
                    Some(TimerAction::Inert) => ActionKind::Inert,
                },
            })
            .collect();

        let mut ordinals: HashMap<DeviceId, u32> = HashMap::new();
        let streams = self
            .streams
            .iter()
            .map(|(_, stream)| {
                let ordinal = ordinals.entry(stream.owner).or_insert(0);
                let state = StreamState {
                    owner: tree.tag(stream.owner).to_string(),
                    ordinal: *ordinal,
                    sample_rate: stream.sample_rate,
                    base: stream.base,
                    samples_done: stream.samples_done,
                };
                *ordinal += 1;
                state
            })
            .collect();

        let cpus = self
            .exec_states()
            .map(|cpu| CpuState {
                tag: tree.tag(cpu.device).to_string(),
                clock: cpu.clock,
                base: cpu.base,
                cycles: cpu.cycles,
                total_cycles: cpu.total_cycles,
                suspend: cpu.suspend.bits(),
                awaited_trigger: cpu.awaited_trigger,
            })
            .collect();

        let lines = tree
            .iter()
            .flat_map(|(_, node)| {
                node.lines
                    .iter()
                    .filter(|(_, line)| {
                        line.state.is_asserted() || line.pending_edge || line.edge_count > 0
                    })
                    .map(|(id, line)| LineSnapshot {
                        device: node.tag.clone(),
                        line: id.0,
                        state: line.state,
                        pending_edge: line.pending_edge,
                        edge_count: line.edge_count,
                    })
            })
            .collect();

        SchedulerState {
            version: SCHEDULER_STATE_VERSION,
            metadata: StateMetadata {
                timestamp: Utc::now(),
                machine: self.config().machine.clone(),
                frame_count: self.frame_count(),
            },
            now,
            frame_base: self.frame_base,
            timers,
            streams,
            cpus,
            lines,
        }
    }

    /// Return the scheduling state to a snapshot
    ///
    /// Persistent timers are matched by owner tag and name, streams by owner
    /// tag and creation order. Transient timers are recreated except those
    /// running closures, which are skipped with a warning.
    ///
    /// # Errors
    ///
    /// `SaveState` for a version mismatch, `InvalidLifecycle` if the
    /// machine is not running, `UnknownDevice` for a tag missing from this
    /// machine.
    pub fn restore_state(&mut self, state: &SchedulerState) -> Result<()> {
        state.check_version()?;
        if self.phase() != Phase::Running {
            return Err(EmulatorError::InvalidLifecycle {
                device: ":".to_string(),
                reason: "snapshots restore into a running machine".to_string(),
            });
        }

        self.now = state.now;
        self.frame_base = state.frame_base;
        self.frame_count = state.metadata.frame_count;
        self.boost = None;
        self.mixer.reset(state.now);

        self.restore_timers(&state.timers)?;

        let mut owned: HashMap<DeviceId, Vec<_>> = HashMap::new();
        for handle in self.streams.handles() {
            let owner = self.streams.get(handle)?.owner;
            owned.entry(owner).or_default().push(handle);
        }
        for saved in &state.streams {
            let owner = self.resolve(&saved.owner)?;
            let handle = owned
                .get(&owner)
                .and_then(|handles| handles.get(saved.ordinal as usize))
                .copied()
                .ok_or_else(|| {
                    EmulatorError::SaveState(format!(
                        "'{}' has no stream #{}",
                        saved.owner, saved.ordinal
                    ))
                })?;
            let stream = self.streams.get_mut(handle)?;
            stream.sample_rate = saved.sample_rate;
            stream.base = saved.base;
            stream.samples_done = saved.samples_done;
            stream.pending.clear();
        }

        for saved in &state.cpus {
            let id = self.resolve(&saved.tag)?;
            self.tree.node_mut(id)?.clock = saved.clock;
            let cpu = self.driver.get_mut(id).ok_or_else(|| {
                EmulatorError::SaveState(format!("'{}' is not an executing device", saved.tag))
            })?;
            cpu.clock = saved.clock;
            cpu.base = saved.base;
            cpu.cycles = saved.cycles;
            cpu.total_cycles = saved.total_cycles;
            cpu.suspend = SuspendReason::from_bits_truncate(saved.suspend);
            cpu.awaited_trigger = saved.awaited_trigger;
            cpu.pending_clock = None;
        }

        for id in self.tree.pre_order() {
            self.tree.node_mut(id)?.lines.reset();
        }
        for saved in &state.lines {
            let id = self.resolve(&saved.device)?;
            self.tree.node_mut(id)?.lines.restore(
                LineId(saved.line),
                saved.state,
                saved.pending_edge,
                saved.edge_count,
            );
        }

        log::info!(
            "Scheduler: restored snapshot of '{}' at {}",
            state.metadata.machine,
            state.now
        );
        Ok(())
    }

    fn restore_timers(&mut self, saved: &[TimerState]) -> Result<()> {
        self.timers.remove_transient();
        let mut restored = Vec::with_capacity(saved.len());

        for timer in saved {
            let owner = self.resolve(&timer.owner)?;
            let handle = if timer.transient {
                let action = match &timer.action {
                    ActionKind::Device => TimerAction::Device,
                    ActionKind::ClearLine { target, line } => TimerAction::ClearLine {
                        target: self.resolve(target)?,
                        line: LineId(*line),
                    },
                    ActionKind::Inert => TimerAction::Inert,
                    ActionKind::Callback | ActionKind::FlushStreams => {
                        log::warn!(
                            "Snapshot: transient {:?} timer of '{}' cannot be rebuilt",
                            timer.action,
                            timer.owner
                        );
                        continue;
                    }
                };
                self.timers.alloc(owner, timer.name.clone(), action, true)
            } else {
                match self.timers.find(owner, &timer.name) {
                    Some(handle) => handle,
                    None => {
                        log::warn!(
                            "Snapshot: timer '{}' of '{}' does not exist here",
                            timer.name,
                            timer.owner
                        );
                        continue;
                    }
                }
            };
            self.timers.restore(
                handle,
                timer.start,
                timer.expire,
                timer.period,
                timer.param,
                timer.enabled,
            );
            restored.push(handle);
        }

        // Timers the snapshot does not mention were not armed back then
        let untouched: Vec<_> = self
            .timers
            .iter()
            .map(|(handle, _)| handle)
            .filter(|handle| !restored.contains(handle))
            .collect();
        for handle in untouched {
            self.timers.cancel(handle);
        }
        Ok(())
    }

    fn resolve(&self, tag: &str) -> Result<DeviceId> {
        self.lookup(tag)
            .ok_or_else(|| EmulatorError::UnknownDevice(tag.to_string()))
    }
}
