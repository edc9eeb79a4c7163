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

//! CPU execution tests

use super::super::*;
use super::fixtures::*;

fn cpu(tag: &str, hz: u64, steps: &[Step]) -> DeviceDescriptor {
    DeviceDescriptor::new(tag, TestCpu::scripted(steps)).clock(hz)
}

fn calls(sched: &Scheduler, id: DeviceId) -> Vec<(VirtualTime, u64)> {
    sched.device_as::<TestCpu>(id).unwrap().calls.clone()
}

#[test]
fn test_incommensurate_clocks_stay_exact() {
    let mut sched = started(quiet_config(), vec![cpu("three", 3, &[]), cpu("seven", 7, &[])]);
    let three = sched.lookup("three").unwrap();
    let seven = sched.lookup("seven").unwrap();

    sched.run_for(VirtualTime::from_seconds(1)).unwrap();
    assert_eq!(sched.exec_state(three).unwrap().total_cycles, 3);
    assert_eq!(sched.exec_state(seven).unwrap().total_cycles, 7);

    sched.run_for(VirtualTime::from_seconds(2)).unwrap();
    assert_eq!(sched.exec_state(three).unwrap().total_cycles, 9);
    assert_eq!(sched.exec_state(seven).unwrap().total_cycles, 21);
    assert_eq!(
        sched.exec_state(seven).unwrap().local_time(),
        VirtualTime::from_seconds(3)
    );
}

#[test]
fn test_cpu_never_runs_past_horizon() {
    let mut sched = started(quiet_config(), vec![cpu("cpu", 1_000_000, &[])]);
    let id = sched.lookup("cpu").unwrap();

    sched.run_for(ms(3)).unwrap();
    // Default quantum is 1 ms
    let calls = calls(&sched, id);
    assert_eq!(calls, vec![(ms(0), 1_000), (ms(1), 1_000), (ms(2), 1_000)]);
}

#[test]
fn test_overrun_is_fatal() {
    let mut sched = started(quiet_config(), vec![cpu("cpu", 1_000_000, &[Step::Overrun])]);

    let err = sched.run_for(ms(1)).unwrap_err();
    assert!(matches!(
        err,
        EmulatorError::SchedulingOverrun {
            budget: 1_000,
            consumed: 1_001,
            ..
        }
    ));
    assert!(err.is_fatal());
    assert_eq!(sched.diagnostics().overruns, 1);
}

#[test]
fn test_yield_gives_up_rest_of_slice() {
    let mut sched = started(quiet_config(), vec![cpu("cpu", 1_000_000, &[Step::Yield])]);
    let id = sched.lookup("cpu").unwrap();

    sched.run_for(ms(2)).unwrap();
    let state = sched.exec_state(id).unwrap();
    assert_eq!(state.total_cycles, 1_000);
    assert_eq!(state.local_time(), ms(2));
    assert_eq!(calls(&sched, id).len(), 2);
}

#[test]
fn test_device_fault_is_contained() {
    let mut sched = started(quiet_config(), vec![cpu("cpu", 1_000_000, &[Step::Fault])]);
    let id = sched.lookup("cpu").unwrap();

    sched.run_for(ms(2)).unwrap();
    assert_eq!(sched.diagnostics().device_faults, 1);
    // The failed slice still counts as spent
    assert_eq!(sched.exec_state(id).unwrap().total_cycles, 2_000);
}

#[test]
fn test_timer_armed_mid_slice_lowers_horizon() {
    let mut sched = started(quiet_config(), vec![cpu("cpu", 1_000_000, &[Step::Arm(us(150))])]);
    let id = sched.lookup("cpu").unwrap();

    sched.run_for(ms(1)).unwrap();
    let cpu = sched.device_as::<TestCpu>(id).unwrap();
    assert_eq!(cpu.fired, vec![us(150)]);
    assert_eq!(cpu.calls[0], (ms(0), 1_000));
    assert_eq!(cpu.calls[1], (VirtualTime::from_nanos(1_000), 149));
}

#[test]
fn test_wait_for_interrupt_wakes_on_line() {
    let mut sched = started(quiet_config(), vec![cpu("cpu", 1_000_000, &[Step::WaitInterrupt])]);
    let id = sched.lookup("cpu").unwrap();

    let irq = sched
        .timer_alloc(
            DeviceId::ROOT,
            "irq",
            TimerAction::callback(move |ctx, _| ctx.line_set(id, IRQ, LineState::Assert)),
        )
        .unwrap();
    sched.timer_adjust(irq, ms(5), 0, VirtualTime::ZERO).unwrap();

    sched.run_for(ms(4)).unwrap();
    assert!(sched.is_suspended(id));
    assert_eq!(sched.exec_state(id).unwrap().total_cycles, 1);

    sched.run_for(ms(6)).unwrap();
    assert!(!sched.is_suspended(id));
    assert_eq!(sched.exec_state(id).unwrap().total_cycles, 5_001);
    let cpu = sched.device_as::<TestCpu>(id).unwrap();
    assert_eq!(cpu.lines, vec![(IRQ, LineState::Assert)]);
}

#[test]
fn test_trigger_releases_waiting_cpu() {
    let mut sched = started(quiet_config(), vec![cpu("cpu", 1_000_000, &[Step::WaitTrigger(7)])]);
    let id = sched.lookup("cpu").unwrap();

    let kick = sched
        .timer_alloc(
            DeviceId::ROOT,
            "kick",
            TimerAction::callback(|ctx, _| {
                ctx.trigger(3);
                ctx.trigger(7);
                Ok(())
            }),
        )
        .unwrap();
    sched.timer_adjust(kick, ms(2), 0, VirtualTime::ZERO).unwrap();

    sched.run_for(ms(1)).unwrap();
    assert_eq!(sched.exec_state(id).unwrap().awaited_trigger, Some(7));

    sched.run_for(ms(2)).unwrap();
    let state = sched.exec_state(id).unwrap();
    assert!(!state.is_suspended());
    assert_eq!(state.awaited_trigger, None);
    assert_eq!(state.total_cycles, 1_001);
}

#[test]
fn test_suspend_requires_cpu() {
    let log: Log = Default::default();
    let mut sched = started(quiet_config(), vec![DeviceDescriptor::new("probe", Probe::new("p", &log))]);
    let probe = sched.lookup("probe").unwrap();

    assert!(matches!(
        sched.suspend(probe, SuspendReason::HALT),
        Err(EmulatorError::InvalidLifecycle { .. })
    ));
}

#[test]
fn test_halt_and_resume() {
    let mut sched = started(quiet_config(), vec![cpu("cpu", 1_000_000, &[])]);
    let id = sched.lookup("cpu").unwrap();

    sched.suspend(id, SuspendReason::HALT | SuspendReason::DISABLED).unwrap();
    sched.run_for(ms(2)).unwrap();
    assert_eq!(sched.exec_state(id).unwrap().total_cycles, 0);

    sched.resume(id, SuspendReason::HALT).unwrap();
    assert!(sched.is_suspended(id));
    sched.resume(id, SuspendReason::DISABLED).unwrap();
    sched.run_for(ms(1)).unwrap();
    assert_eq!(sched.exec_state(id).unwrap().total_cycles, 1_000);
}

#[test]
fn test_set_clock_between_runs() {
    let mut sched = started(quiet_config(), vec![cpu("cpu", 1_000_000, &[])]);
    let id = sched.lookup("cpu").unwrap();

    sched.run_for(ms(1)).unwrap();
    sched.set_clock(id, 2_000_000).unwrap();
    sched.run_for(ms(1)).unwrap();

    assert_eq!(sched.exec_state(id).unwrap().total_cycles, 3_000);
    assert_eq!(sched.device(id).unwrap().clock, 2_000_000);
    assert!(matches!(
        sched.set_clock(id, 0),
        Err(EmulatorError::InvalidClock { hz: 0, .. })
    ));
}

#[test]
fn test_own_clock_change_applies_after_slice() {
    let mut sched = started(
        quiet_config(),
        vec![cpu("cpu", 1_000_000, &[Step::SetClock(2_000_000)])],
    );
    let id = sched.lookup("cpu").unwrap();

    sched.run_for(ms(2)).unwrap();
    assert_eq!(calls(&sched, id), vec![(ms(0), 1_000), (ms(1), 2_000)]);
}

#[test]
fn test_boost_tightens_interleave_then_expires() {
    let mut sched = started(quiet_config(), vec![cpu("a", 1_000_000, &[]), cpu("b", 1_000_000, &[])]);
    let a = sched.lookup("a").unwrap();

    assert!(matches!(
        sched.boost_interleave(VirtualTime::ZERO, ms(1)),
        Err(EmulatorError::InvalidTimeRange(_))
    ));
    sched.boost_interleave(us(100), ms(1)).unwrap();

    sched.run_for(ms(1)).unwrap();
    assert_eq!(calls(&sched, a).len(), 10);

    sched.run_for(ms(1)).unwrap();
    assert_eq!(calls(&sched, a).len(), 11);
}

#[test]
fn test_frames_follow_frame_rate() {
    let mut sched = started(quiet_config(), vec![]);

    for _ in 0..3 {
        sched.advance_one_frame().unwrap();
    }
    assert_eq!(sched.frame_count(), 3);
    assert_eq!(sched.now(), VirtualTime::from_cycles(3, 60).unwrap());

    for _ in 0..57 {
        sched.advance_one_frame().unwrap();
    }
    assert_eq!(sched.now(), VirtualTime::from_seconds(1));
}
