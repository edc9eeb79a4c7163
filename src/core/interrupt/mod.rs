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

//! Interrupt and control lines
//!
//! Each device declares its input lines once, through
//! [`crate::core::device::Device::input_lines`]. The scheduler keeps a
//! [`LineSet`] per device and routes `line_set` / `line_pulse` calls to
//! it; the owning device samples its lines at its own instruction
//! boundaries.
//!
//! ## Line semantics
//!
//! ```text
//! Kind  | Clear -> Assert/Hold             | acknowledge
//! ------|----------------------------------|-------------------------------
//! Level | state changes, nothing latched   | Hold returns to Clear
//! Edge  | pending_edge latched, count += 1 | clears pending_edge; Hold -> Clear
//! ```
//!
//! `Hold` is an asserted state the device clears by acknowledging, the
//! way a CPU's interrupt acknowledge cycle drops a held request.

#[cfg(test)]
mod tests;

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a line in its device's declaration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LineId(pub u16);

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line{}", self.0)
    }
}

/// Electrical state of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Encode, Decode)]
pub enum LineState {
    #[default]
    Clear,
    Assert,
    /// Asserted until acknowledged
    Hold,
}

impl LineState {
    pub fn is_asserted(self) -> bool {
        !matches!(self, LineState::Clear)
    }
}

/// How the receiving device samples the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// The current state matters
    Level,
    /// Clear-to-asserted transitions are latched
    Edge,
}

/// Declaration of an input line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineConfig {
    pub name: &'static str,
    pub kind: LineKind,
}

impl LineConfig {
    pub fn new(name: &'static str, kind: LineKind) -> Self {
        Self { name, kind }
    }
}

/// One input line
#[derive(Debug, Clone)]
pub struct Line {
    pub name: &'static str,
    pub kind: LineKind,
    pub state: LineState,
    /// Latched rising edge not yet acknowledged (edge lines only)
    pub pending_edge: bool,
    /// Rising edges seen since the session began
    pub edge_count: u64,
}

/// Outcome of a state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineChange {
    pub previous: LineState,
    pub current: LineState,
    /// The line went from clear to asserted
    pub rising: bool,
}

impl LineChange {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

/// Input lines of one device
///
/// # Example
///
/// ```
/// use machina::core::interrupt::{LineConfig, LineId, LineKind, LineSet, LineState};
///
/// let mut lines = LineSet::new(vec![LineConfig::new("nmi", LineKind::Edge)]);
/// let nmi = LineId(0);
///
/// lines.set(nmi, LineState::Assert);
/// lines.set(nmi, LineState::Clear);
/// // The edge stays latched after the line drops
/// assert!(lines.pending_edge(nmi));
/// assert!(lines.acknowledge(nmi));
/// assert!(!lines.pending_edge(nmi));
/// ```
#[derive(Debug, Clone, Default)]
pub struct LineSet {
    lines: Vec<Line>,
}

impl LineSet {
    pub fn new(configs: Vec<LineConfig>) -> Self {
        Self {
            lines: configs
                .into_iter()
                .map(|config| Line {
                    name: config.name,
                    kind: config.kind,
                    state: LineState::Clear,
                    pending_edge: false,
                    edge_count: 0,
                })
                .collect(),
        }
    }

    pub fn get(&self, id: LineId) -> Option<&Line> {
        self.lines.get(id.0 as usize)
    }

    /// Drive a line; `None` if the line does not exist
    pub fn set(&mut self, id: LineId, state: LineState) -> Option<LineChange> {
        let line = self.lines.get_mut(id.0 as usize)?;
        let previous = line.state;
        let rising = !previous.is_asserted() && state.is_asserted();
        line.state = state;
        if rising {
            line.edge_count += 1;
            if line.kind == LineKind::Edge {
                line.pending_edge = true;
            }
        }
        Some(LineChange {
            previous,
            current: state,
            rising,
        })
    }

    pub fn state(&self, id: LineId) -> Option<LineState> {
        self.get(id).map(|line| line.state)
    }

    pub fn pending_edge(&self, id: LineId) -> bool {
        self.get(id).is_some_and(|line| line.pending_edge)
    }

    /// Acknowledge a line; returns whether an edge was latched
    ///
    /// A `Hold` line also returns to `Clear`.
    pub fn acknowledge(&mut self, id: LineId) -> bool {
        let Some(line) = self.lines.get_mut(id.0 as usize) else {
            return false;
        };
        let had_edge = std::mem::take(&mut line.pending_edge);
        if line.state == LineState::Hold {
            line.state = LineState::Clear;
        }
        had_edge
    }

    pub fn by_name(&self, name: &str) -> Option<LineId> {
        self.lines
            .iter()
            .position(|line| line.name == name)
            .map(|index| LineId(index as u16))
    }

    /// Whether any line is asserted or has a latched edge
    pub fn any_active(&self) -> bool {
        self.lines
            .iter()
            .any(|line| line.state.is_asserted() || line.pending_edge)
    }

    /// Return every line to `Clear` with nothing latched
    pub fn reset(&mut self) {
        for line in &mut self.lines {
            line.state = LineState::Clear;
            line.pending_edge = false;
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (LineId, &Line)> + '_ {
        self.lines
            .iter()
            .enumerate()
            .map(|(index, line)| (LineId(index as u16), line))
    }

    /// Overwrite a line's dynamic state (used when restoring snapshots)
    pub(crate) fn restore(&mut self, id: LineId, state: LineState, pending_edge: bool, edge_count: u64) {
        if let Some(line) = self.lines.get_mut(id.0 as usize) {
            line.state = state;
            line.pending_edge = pending_edge;
            line.edge_count = edge_count;
        }
    }
}
