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

//! Device tree and lifecycle
//!
//! Devices live in an arena owned by the scheduler and are addressed by
//! [`DeviceId`]. Each node carries its tag path (`:parent:child`), clock,
//! capability flags, input lines and the boxed behaviour implementing
//! [`Device`]. The root node (`":"`) belongs to the scheduler and owns
//! machine-level timers.
//!
//! # Lifecycle
//!
//! ```text
//! Constructed --start--> Running <--reset--> Running --stop--> Stopped
//! ```
//!
//! Devices are added only while the machine is being configured. `start`
//! runs once per device in pre-order after the tree is complete, so every
//! tag resolves by then. `stop` runs in post-order.
//!
//! # Calling into devices
//!
//! While a device method runs, its box is checked out of the arena and the
//! method receives a [`DeviceContext`] borrowing the scheduler. A device
//! that is checked out cannot be re-entered: accesses routed to it are
//! reported instead of recursing.

mod context;

pub use context::DeviceContext;

use crate::core::error::{EmulatorError, Result};
use crate::core::execute::Execute;
use crate::core::interrupt::{LineConfig, LineId, LineSet, LineState};
use crate::core::memory::MemoryMapped;
use crate::core::stream::SoundSource;
use crate::core::timing::TimerFired;
use bitflags::bitflags;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;

/// Index of a device in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(u32);

impl DeviceId {
    /// The scheduler-owned root device
    pub const ROOT: DeviceId = DeviceId(0);

    pub(crate) fn new(index: usize) -> Self {
        DeviceId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

bitflags! {
    /// Capabilities a device offers to the scheduler
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceCaps: u32 {
        /// Runs instructions through [`Execute`]
        const EXECUTE = 1 << 0;
        /// Produces samples through [`SoundSource`]
        const SOUND = 1 << 1;
        /// Answers bus accesses through [`MemoryMapped`]
        const MEMORY = 1 << 2;
        /// Has registers or lines but no dedicated interface
        const PERIPHERAL = 1 << 3;
    }
}

/// Lifecycle state of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Constructed,
    Running,
    Stopped,
}

/// Behaviour of an emulated device
///
/// Every hook has a no-op default, so a device implements only what it
/// uses. Capability accessors must agree with [`Device::capabilities`]:
/// registration fails if a declared capability has no accessor.
pub trait Device: Any {
    /// Capabilities declared by this device
    fn capabilities(&self) -> DeviceCaps {
        DeviceCaps::PERIPHERAL
    }

    /// Input lines; a line's position in the list is its [`LineId`]
    fn input_lines(&self) -> Vec<LineConfig> {
        Vec::new()
    }

    /// One-time setup after the whole tree exists
    fn start(&mut self, _ctx: &mut DeviceContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Return to the power-on state
    ///
    /// Timers owned by the device have already been disabled (not
    /// destroyed) when this runs.
    fn reset(&mut self, _ctx: &mut DeviceContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Teardown; the device's timers and streams are released afterwards
    fn stop(&mut self, _ctx: &mut DeviceContext<'_>) -> Result<()> {
        Ok(())
    }

    /// A timer with [`crate::core::timing::TimerAction::Device`] expired
    fn timer_expired(&mut self, _ctx: &mut DeviceContext<'_>, _fired: TimerFired) -> Result<()> {
        Ok(())
    }

    /// One of this device's input lines changed state
    fn line_changed(
        &mut self,
        _ctx: &mut DeviceContext<'_>,
        _line: LineId,
        _state: LineState,
    ) -> Result<()> {
        Ok(())
    }

    /// The device clock was changed with `set_clock`
    fn clock_changed(&mut self, _ctx: &mut DeviceContext<'_>, _hz: u64) -> Result<()> {
        Ok(())
    }

    /// Translate a logical address to a physical one
    fn translate_address(&mut self, ctx: &mut DeviceContext<'_>, _address: u32) -> Result<u32> {
        Err(EmulatorError::NotModeled {
            device: ctx.tag().to_string(),
            feature: "address translation",
        })
    }

    fn as_execute(&mut self) -> Option<&mut dyn Execute> {
        None
    }

    fn as_sound(&mut self) -> Option<&mut dyn SoundSource> {
        None
    }

    fn as_memory(&mut self) -> Option<&mut dyn MemoryMapped> {
        None
    }
}

/// Description of a device to add to the tree
///
/// # Example
///
/// ```
/// use machina::core::device::{Device, DeviceDescriptor};
///
/// struct Latch;
/// impl Device for Latch {}
///
/// let board = DeviceDescriptor::new("board", Latch)
///     .clock(8_000_000)
///     .child(DeviceDescriptor::new("latch", Latch));
/// assert_eq!(board.children.len(), 1);
/// ```
pub struct DeviceDescriptor {
    /// Tag relative to the parent (no `:`)
    pub tag: String,
    /// Clock in Hz, 0 to inherit the parent's
    pub clock: u64,
    pub caps: DeviceCaps,
    pub device: Box<dyn Device>,
    pub children: Vec<DeviceDescriptor>,
}

impl DeviceDescriptor {
    pub fn new(tag: impl Into<String>, device: impl Device) -> Self {
        Self::boxed(tag, Box::new(device))
    }

    pub fn boxed(tag: impl Into<String>, device: Box<dyn Device>) -> Self {
        let caps = device.capabilities();
        Self {
            tag: tag.into(),
            clock: 0,
            caps,
            device,
            children: Vec::new(),
        }
    }

    pub fn clock(mut self, hz: u64) -> Self {
        self.clock = hz;
        self
    }

    pub fn caps(mut self, caps: DeviceCaps) -> Self {
        self.caps = caps;
        self
    }

    pub fn child(mut self, child: DeviceDescriptor) -> Self {
        self.children.push(child);
        self
    }
}

/// A node of the device tree
pub struct DeviceNode {
    pub tag: String,
    pub parent: Option<DeviceId>,
    pub children: Vec<DeviceId>,
    pub clock: u64,
    pub caps: DeviceCaps,
    pub state: DeviceState,
    pub lines: LineSet,
    device: Option<Box<dyn Device>>,
}

impl DeviceNode {
    /// Whether the behaviour box is in the arena (not currently running)
    pub fn is_available(&self) -> bool {
        self.device.is_some()
    }
}

/// Arena of devices indexed by [`DeviceId`]
pub struct DeviceTree {
    nodes: Vec<DeviceNode>,
    by_tag: HashMap<String, DeviceId>,
}

struct RootDevice;

impl Device for RootDevice {}

impl DeviceTree {
    pub fn new() -> Self {
        let root = DeviceNode {
            tag: ":".to_string(),
            parent: None,
            children: Vec::new(),
            clock: 0,
            caps: DeviceCaps::empty(),
            state: DeviceState::Constructed,
            lines: LineSet::default(),
            device: Some(Box::new(RootDevice)),
        };
        let mut by_tag = HashMap::new();
        by_tag.insert(":".to_string(), DeviceId::ROOT);
        Self {
            nodes: vec![root],
            by_tag,
        }
    }

    /// Insert one node (children are added by the caller)
    ///
    /// Validates the tag, the effective clock and the declared capabilities.
    pub fn insert(
        &mut self,
        parent: DeviceId,
        tag: &str,
        clock: u64,
        caps: DeviceCaps,
        mut device: Box<dyn Device>,
    ) -> Result<DeviceId> {
        if tag.is_empty() || tag.contains(':') {
            return Err(EmulatorError::Config(format!(
                "invalid device tag '{}'",
                tag
            )));
        }
        let parent_node = self.node(parent)?;
        let path = if parent == DeviceId::ROOT {
            format!(":{}", tag)
        } else {
            format!("{}:{}", parent_node.tag, tag)
        };
        if self.by_tag.contains_key(&path) {
            return Err(EmulatorError::DuplicateTag(path));
        }

        let clock = if clock == 0 { parent_node.clock } else { clock };
        if caps.intersects(DeviceCaps::EXECUTE | DeviceCaps::SOUND) || clock != 0 {
            crate::core::time::check_clock(clock)?;
        }

        let missing = [
            (DeviceCaps::EXECUTE, device.as_execute().is_none(), "execute"),
            (DeviceCaps::SOUND, device.as_sound().is_none(), "sound"),
            (DeviceCaps::MEMORY, device.as_memory().is_none(), "memory"),
        ]
        .into_iter()
        .find(|(flag, absent, _)| caps.contains(*flag) && *absent);
        if let Some((_, _, name)) = missing {
            return Err(EmulatorError::Config(format!(
                "'{}' declares the {} capability without implementing it",
                path, name
            )));
        }

        let lines = LineSet::new(device.input_lines());
        let id = DeviceId::new(self.nodes.len());
        self.nodes.push(DeviceNode {
            tag: path.clone(),
            parent: Some(parent),
            children: Vec::new(),
            clock,
            caps,
            state: DeviceState::Constructed,
            lines,
            device: Some(device),
        });
        self.nodes[parent.index()].children.push(id);
        self.by_tag.insert(path.clone(), id);
        log::debug!("Device: added '{}' as {} ({:?}, {} Hz)", path, id, caps, clock);
        Ok(id)
    }

    pub fn node(&self, id: DeviceId) -> Result<&DeviceNode> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| EmulatorError::UnknownDevice(id.to_string()))
    }

    pub fn node_mut(&mut self, id: DeviceId) -> Result<&mut DeviceNode> {
        self.nodes
            .get_mut(id.index())
            .ok_or_else(|| EmulatorError::UnknownDevice(id.to_string()))
    }

    /// Resolve a tag path
    ///
    /// Absolute paths start with `:`; anything else is taken relative to
    /// the root, so `"cpu"` and `":cpu"` name the same device.
    pub fn lookup(&self, path: &str) -> Option<DeviceId> {
        if path.starts_with(':') {
            self.by_tag.get(path).copied()
        } else {
            self.by_tag.get(&format!(":{}", path)).copied()
        }
    }

    /// Resolve `tag` relative to `from` (a child of it)
    pub fn subdevice(&self, from: DeviceId, tag: &str) -> Option<DeviceId> {
        let base = &self.nodes.get(from.index())?.tag;
        if from == DeviceId::ROOT {
            self.lookup(tag)
        } else {
            self.by_tag.get(&format!("{}:{}", base, tag)).copied()
        }
    }

    /// Resolve `tag` as a sibling of `from`
    pub fn sibling(&self, from: DeviceId, tag: &str) -> Option<DeviceId> {
        let parent = self.nodes.get(from.index())?.parent?;
        self.subdevice(parent, tag)
    }

    pub fn tag(&self, id: DeviceId) -> &str {
        self.nodes.get(id.index()).map_or("?", |node| node.tag.as_str())
    }

    /// Devices in pre-order (parents before children), root first
    pub fn pre_order(&self) -> Vec<DeviceId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![DeviceId::ROOT];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.index()].children.iter().rev().copied());
        }
        order
    }

    /// Devices in post-order (children before parents), root last
    pub fn post_order(&self) -> Vec<DeviceId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        self.collect_post(DeviceId::ROOT, &mut order);
        order
    }

    fn collect_post(&self, id: DeviceId, order: &mut Vec<DeviceId>) {
        for &child in &self.nodes[id.index()].children {
            self.collect_post(child, order);
        }
        order.push(id);
    }

    /// Check a device's behaviour out of the arena
    pub(crate) fn take(&mut self, id: DeviceId) -> Option<Box<dyn Device>> {
        self.nodes.get_mut(id.index())?.device.take()
    }

    pub(crate) fn put(&mut self, id: DeviceId, device: Box<dyn Device>) {
        if let Some(node) = self.nodes.get_mut(id.index()) {
            node.device = Some(device);
        }
    }

    /// Typed view of a device that is not currently running
    pub fn device_as<T: Device>(&self, id: DeviceId) -> Option<&T> {
        let device: &dyn Any = self.nodes.get(id.index())?.device.as_deref()?;
        device.downcast_ref::<T>()
    }

    pub fn device_as_mut<T: Device>(&mut self, id: DeviceId) -> Option<&mut T> {
        let device: &mut dyn Any = self.nodes.get_mut(id.index())?.device.as_deref_mut()?;
        device.downcast_mut::<T>()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeviceId, &DeviceNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(index, node)| (DeviceId::new(index), node))
    }
}

impl Default for DeviceTree {
    fn default() -> Self {
        Self::new()
    }
}
