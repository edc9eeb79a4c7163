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

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use machina::core::devices::{demo_machine, Op, ScriptCpu};
use machina::core::time::VirtualTime;
use machina::core::timing::TimerQueue;
use machina::core::{DeviceDescriptor, DeviceId, Scheduler, SchedulerConfig};
use std::hint::black_box;

fn quiet() -> SchedulerConfig {
    SchedulerConfig {
        stream_update_hz: 0,
        strict_handles: false,
        ..SchedulerConfig::default()
    }
}

fn time_conversion_benchmark(c: &mut Criterion) {
    c.bench_function("from_cycles", |b| {
        b.iter(|| black_box(VirtualTime::from_cycles(black_box(33_868_800), black_box(44_100))));
    });

    c.bench_function("as_cycles", |b| {
        let t = VirtualTime::from_micros(16_683);
        b.iter(|| black_box(black_box(t).as_cycles(black_box(33_868_800))));
    });
}

fn timer_queue_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("timer_queue");

    for size in [16u32, 256, 4096] {
        group.bench_with_input(BenchmarkId::new("schedule_pop", size), &size, |b, &size| {
            b.iter(|| {
                let mut queue = TimerQueue::new();
                for id in 0..size {
                    // Spread over a few distinct instants to exercise ties
                    queue.schedule(id, VirtualTime::from_micros((id % 7) as u64));
                }
                black_box(queue.pop_due(VirtualTime::from_micros(10)).len());
            });
        });
    }

    group.finish();
}

fn run_loop_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_loop");

    group.bench_function("busy_cpu_1ms", |b| {
        let mut sched = Scheduler::new(quiet()).unwrap();
        let program = vec![Op::Nop { cycles: 10 }, Op::Jump { target: 0 }];
        sched
            .add_device(
                DeviceId::ROOT,
                DeviceDescriptor::new("cpu", ScriptCpu::new(program)).clock(33_868_800),
            )
            .unwrap();
        sched.start().unwrap();

        b.iter(|| {
            sched.run_for(VirtualTime::from_millis(1)).unwrap();
        });
    });

    group.bench_function("demo_machine_frame", |b| {
        let mut sched = demo_machine(SchedulerConfig::default()).unwrap();
        sched.start().unwrap();

        b.iter(|| {
            sched.advance_one_frame().unwrap();
            black_box(sched.take_audio().len());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    time_conversion_benchmark,
    timer_queue_benchmark,
    run_loop_benchmark
);
criterion_main!(benches);
