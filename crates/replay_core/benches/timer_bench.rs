/*
    ReplayPC
    Deterministic x86 code block, segmentation and timer core.
    Derived from MartyPC (https://github.com/dbalsom/martypc)

    Copyright 2022-2025 Daniel Balsom
    Copyright 2025 ReplayPC contributors

    Permission is hereby granted, free of charge, to any person obtaining a
    copy of this software and associated documentation files (the “Software”),
    to deal in the Software without restriction, including without limitation
    the rights to use, copy, modify, merge, publish, distribute, sublicense,
    and/or sell copies of the Software, and to permit persons to whom the
    Software is furnished to do so, subject to the following conditions:

    The above copyright notice and this permission notice shall be included in
    all copies or substantial portions of the Software.

    THE SOFTWARE IS PROVIDED “AS IS”, WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
    IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
    FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
    AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
    LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING
    FROM, OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER
    DEALINGS IN THE SOFTWARE.

    ---------------------------------------------------------------------------

    benches::timer_bench.rs

    Benchmarks for the timer queue.

*/

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use replay_core::timer::{TimerEvent, TimerHandler, TimerOwner, VirtualClock};

struct Rearm {
    period: u64,
}

impl TimerHandler for Rearm {
    fn on_timer(&mut self, clock: &mut VirtualClock, event: TimerEvent) {
        _ = clock.set_expiry(event.id, event.now + self.period);
    }
}

pub fn timer_queue_bench(c: &mut Criterion) {
    let mut clock = VirtualClock::new();
    let mut rng = StdRng::seed_from_u64(0);
    let ids: Vec<_> = (0..64).map(|i| clock.new_timer(TimerOwner(i))).collect();
    for id in &ids {
        clock.set_expiry(*id, rng.gen_range(0..1000)).unwrap();
    }

    c.bench_function("timer_rearm_random", |b| {
        b.iter(|| {
            let id = ids[rng.gen_range(0..ids.len())];
            let expiry = clock.now() + rng.gen_range(0..1000);
            black_box(clock.set_expiry(id, expiry)).unwrap();
        });
    });

    let mut handler = Rearm { period: 100 };
    c.bench_function("timer_step_periodic", |b| {
        b.iter(|| {
            _ = black_box(clock.step(&mut handler));
        });
    });
}

criterion_group!(benches, timer_queue_bench);
criterion_main!(benches);
