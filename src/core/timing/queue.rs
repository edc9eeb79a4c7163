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

//! Ordered set of armed timers
//!
//! Entries are keyed by `(expiration, sequence)`. The sequence number is
//! handed out on every insertion, so two timers due at the same virtual time
//! pop in the order they were (re)scheduled, independent of addresses or
//! hash order.

use crate::core::time::VirtualTime;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;

/// Position of an entry in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct QueueKey {
    /// Expiration time
    pub expire: VirtualTime,
    /// Insertion sequence, breaks ties between equal expirations
    pub seq: u64,
}

/// Timer queue
///
/// `T` is the identifier of a timer record; the queue only stores ordering.
/// Scheduling, repositioning and cancelling are O(log n).
///
/// # Example
///
/// ```
/// use machina::core::time::VirtualTime;
/// use machina::core::timing::TimerQueue;
///
/// let mut queue = TimerQueue::new();
/// queue.schedule("b", VirtualTime::from_millis(2));
/// queue.schedule("a", VirtualTime::from_millis(1));
///
/// assert_eq!(queue.peek_next(), Some((VirtualTime::from_millis(1), "a")));
/// let due = queue.pop_due(VirtualTime::from_millis(2));
/// assert_eq!(due.len(), 2);
/// assert!(queue.is_empty());
/// ```
#[derive(Debug)]
pub struct TimerQueue<T> {
    order: BTreeMap<QueueKey, T>,
    keys: HashMap<T, QueueKey>,
    next_seq: u64,
}

impl<T: Copy + Eq + Hash> TimerQueue<T> {
    pub fn new() -> Self {
        Self {
            order: BTreeMap::new(),
            keys: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Insert `id` at `when`, or move it there if it is already queued
    ///
    /// Scheduling at `NEVER` removes the entry: a timer that can never
    /// expire is disabled and does not take part in the ordering.
    pub fn schedule(&mut self, id: T, when: VirtualTime) {
        self.cancel(id);
        if when.is_never() {
            return;
        }
        let key = QueueKey {
            expire: when,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.order.insert(key, id);
        self.keys.insert(id, key);
    }

    /// Earliest entry, without removing it
    pub fn peek_next(&self) -> Option<(VirtualTime, T)> {
        self.order
            .first_key_value()
            .map(|(key, id)| (key.expire, *id))
    }

    /// Remove and return the earliest entry if it is due at `now`
    pub fn pop_next_due(&mut self, now: VirtualTime) -> Option<(VirtualTime, T)> {
        let (key, _) = self.order.first_key_value()?;
        if key.expire > now {
            return None;
        }
        let (key, id) = self.order.pop_first()?;
        self.keys.remove(&id);
        Some((key.expire, id))
    }

    /// Remove and return every entry due at `now`, earliest first
    pub fn pop_due(&mut self, now: VirtualTime) -> Vec<(VirtualTime, T)> {
        let mut due = Vec::new();
        while let Some(entry) = self.pop_next_due(now) {
            due.push(entry);
        }
        due
    }

    /// Remove `id`; returns whether it was queued
    pub fn cancel(&mut self, id: T) -> bool {
        match self.keys.remove(&id) {
            Some(key) => {
                self.order.remove(&key);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: T) -> bool {
        self.keys.contains_key(&id)
    }

    /// Queued expiration of `id`
    pub fn expiration_of(&self, id: T) -> Option<VirtualTime> {
        self.keys.get(&id).map(|key| key.expire)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.keys.clear();
    }

    /// Entries in firing order
    pub fn iter(&self) -> impl Iterator<Item = (VirtualTime, T)> + '_ {
        self.order.iter().map(|(key, id)| (key.expire, *id))
    }
}

impl<T: Copy + Eq + Hash> Default for TimerQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
