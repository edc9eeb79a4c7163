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

//! Property tests of the scheduling guarantees

mod common;

use common::fixtures::{quiet_config, single_cpu, Ticker};
use machina::core::devices::Op;
use machina::core::{
    DeviceDescriptor, DeviceId, Scheduler, StreamGenerator, TimerAction, VirtualTime,
};
use proptest::prelude::*;
use std::cell::RefCell;
use std::rc::Rc;

proptest! {
    #[test]
    fn prop_cycle_round_trip(cycles in 0u64..1_000_000_000, hz in 1u64..=1_000_000_000_000) {
        let t = VirtualTime::from_cycles(cycles, hz).unwrap();
        prop_assert_eq!(t.as_cycles(hz), cycles);
    }

    #[test]
    fn prop_conversion_is_monotonic(a in 0u64..10_000_000, b in 0u64..10_000_000, hz in 1u64..100_000_000) {
        let (lo, hi) = (a.min(b), a.max(b));
        prop_assert!(VirtualTime::from_cycles(lo, hz).unwrap() <= VirtualTime::from_cycles(hi, hz).unwrap());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_busy_cpu_never_passes_now(
        clock in 1_000u64..50_000_000,
        nop in 1u64..5_000,
        steps in prop::collection::vec(1u64..3_000, 1..8),
    ) {
        let program = vec![Op::Nop { cycles: nop }, Op::Jump { target: 0 }];
        let (mut sched, cpu) = single_cpu(program, clock);

        for micros in steps {
            sched.run_for(VirtualTime::from_micros(micros)).unwrap();
            let state = sched.exec_state(cpu).unwrap();
            prop_assert!(state.local_time() <= sched.now());
            prop_assert_eq!(state.total_cycles, sched.now().as_cycles(clock));
        }
    }

    #[test]
    fn prop_timers_fire_in_time_then_arming_order(delays in prop::collection::vec(0u64..50, 1..24)) {
        let (ticker, _) = Ticker::new(VirtualTime::from_seconds(10));
        let mut sched = Scheduler::new(quiet_config()).unwrap();
        let owner = sched
            .add_device(DeviceId::ROOT, DeviceDescriptor::new("owner", ticker))
            .unwrap();
        sched.start().unwrap();

        let fired: Rc<RefCell<Vec<(VirtualTime, u64)>>> = Rc::new(RefCell::new(Vec::new()));
        for (index, &delay) in delays.iter().enumerate() {
            let log = Rc::clone(&fired);
            sched
                .timer_set(
                    owner,
                    VirtualTime::from_micros(delay),
                    false,
                    index as u64,
                    TimerAction::callback(move |ctx, fired| {
                        log.borrow_mut().push((ctx.now(), fired.param));
                        Ok(())
                    }),
                )
                .unwrap();
        }
        sched.run_for(VirtualTime::from_micros(60)).unwrap();

        let mut expected: Vec<(VirtualTime, u64)> = delays
            .iter()
            .enumerate()
            .map(|(index, &delay)| (VirtualTime::from_micros(delay), index as u64))
            .collect();
        // Stable: equal times keep arming order
        expected.sort_by_key(|&(time, _)| time);
        prop_assert_eq!(fired.borrow().clone(), expected);
    }

    #[test]
    fn prop_flush_is_idempotent(
        rate in 1u32..96_000,
        first in 0u64..20_000,
        second in 0u64..20_000,
    ) {
        let mut sched = Scheduler::new(quiet_config()).unwrap();
        sched.start().unwrap();
        let handle = sched
            .stream_create(DeviceId::ROOT, 1, rate, StreamGenerator::func(|chunk| {
                chunk.fill(1);
                Ok(())
            }))
            .unwrap();

        sched.run_for(VirtualTime::from_micros(first)).unwrap();
        let now = sched.now();
        let produced = sched.flush_to(handle, now).unwrap();
        prop_assert_eq!(sched.flush_to(handle, now).unwrap(), 0);

        sched.run_for(VirtualTime::from_micros(second)).unwrap();
        let total = produced + sched.flush_to(handle, sched.now()).unwrap();
        prop_assert_eq!(total, sched.now().as_cycles(rate as u64));
        prop_assert_eq!(sched.stream_drain(handle).unwrap().len() as u64, total);
    }
}
