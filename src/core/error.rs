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

/// Scheduler error types
use thiserror::Error;

/// Result type for scheduler operations
pub type Result<T> = std::result::Result<T, EmulatorError>;

/// Main error type for the scheduling core
///
/// Variants split into two groups, see [`EmulatorError::is_fatal`]:
/// faults local to emulated hardware (unmapped accesses, unimplemented
/// registers) which the scheduler logs and survives, and violations of the
/// engine's own invariants which end the session.
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    #[error("Invalid clock rate: {hz} Hz (valid range: 1-{max})")]
    InvalidClock { hz: u64, max: u64 },

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Unknown timer: {0}")]
    UnknownTimer(String),

    #[error("Unknown line {line} on device '{device}'")]
    UnknownLine { device: String, line: String },

    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("Scheduling overrun on '{device}': consumed {consumed} cycles of a {budget} cycle budget")]
    SchedulingOverrun {
        device: String,
        budget: u64,
        consumed: u64,
    },

    #[error("Unhandled {width}-byte {kind} at 0x{address:08X}")]
    UnhandledAccess {
        kind: AccessKind,
        address: u32,
        width: u8,
    },

    #[error("'{device}': {feature} is not modeled")]
    NotModeled {
        device: String,
        feature: &'static str,
    },

    #[error("Device fault in '{device}': {reason}")]
    DeviceFault { device: String, reason: String },

    #[error("Duplicate tag: {0}")]
    DuplicateTag(String),

    #[error("Invalid lifecycle transition for '{device}': {reason}")]
    InvalidLifecycle { device: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Save state error: {0}")]
    SaveState(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

/// Direction of a memory-mapped access, used in diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessKind::Read => write!(f, "read"),
            AccessKind::Write => write!(f, "write"),
        }
    }
}

impl EmulatorError {
    /// Whether this error breaks the scheduling engine's own guarantees
    ///
    /// Non-fatal errors describe emulated hardware that is missing or
    /// incomplete. The scheduler downgrades them to diagnostics and keeps
    /// the simulation running with a benign default.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EmulatorError::UnhandledAccess { .. }
                | EmulatorError::NotModeled { .. }
                | EmulatorError::DeviceFault { .. }
        )
    }

    /// Shorthand for a device-local fault
    pub fn fault(device: impl Into<String>, reason: impl Into<String>) -> Self {
        EmulatorError::DeviceFault {
            device: device.into(),
            reason: reason.into(),
        }
    }
}
