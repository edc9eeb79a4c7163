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

//! Address map tests

use super::super::*;

fn dev(n: usize) -> DeviceId {
    DeviceId::new(n)
}

#[test]
fn test_claimant_and_offset() {
    let mut map = AddressMap::new();
    map.map(0x1000, 0x1FFF, dev(1)).unwrap();
    map.map(0x0000, 0x00FF, dev(2)).unwrap();

    assert_eq!(map.claimant(0x1000), Some((dev(1), 0)));
    assert_eq!(map.claimant(0x1FFF), Some((dev(1), 0xFFF)));
    assert_eq!(map.claimant(0x0010), Some((dev(2), 0x10)));
    assert_eq!(map.claimant(0x0100), None);
    assert_eq!(map.claimant(0x2000), None);
}

#[test]
fn test_overlap_rejected() {
    let mut map = AddressMap::new();
    map.map(0x1000, 0x1FFF, dev(1)).unwrap();

    assert!(map.map(0x1FFF, 0x2FFF, dev(2)).is_err());
    assert!(map.map(0x0000, 0x1000, dev(2)).is_err());
    assert!(map.map(0x1100, 0x1200, dev(2)).is_err());
    assert!(map.map(0x2000, 0x2FFF, dev(2)).is_ok());
    assert_eq!(map.entries().len(), 2);
}

#[test]
fn test_empty_range_rejected() {
    let mut map = AddressMap::new();
    assert!(matches!(
        map.map(0x10, 0x0F, dev(1)),
        Err(EmulatorError::Config(_))
    ));
}

#[test]
fn test_top_of_address_space() {
    let mut map = AddressMap::new();
    map.map(0xFFFF_FF00, 0xFFFF_FFFF, dev(1)).unwrap();
    assert_eq!(map.claimant(0xFFFF_FFFF), Some((dev(1), 0xFF)));
}

#[test]
fn test_unmap_device() {
    let mut map = AddressMap::new();
    map.map(0x0, 0xF, dev(1)).unwrap();
    map.map(0x10, 0x1F, dev(2)).unwrap();

    map.unmap_device(dev(1));
    assert_eq!(map.claimant(0x4), None);
    assert!(map.claimant(0x14).is_some());
}
