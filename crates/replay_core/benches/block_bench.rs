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

    benches::block_bench.rs

    Benchmarks for code block construction and dispatch.

*/

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::{rngs::StdRng, Rng, SeedableRng};

use replay_core::{
    codeblock::{BlockExecutor, CodeBlockManagerBuilder, Flow, Instruction},
    memory::RamMemory,
    EmuResult,
};

struct NullExecutor;

impl BlockExecutor for NullExecutor {
    fn execute(&mut self, instruction: &Instruction) -> EmuResult<Flow> {
        black_box(instruction);
        Ok(Flow::Continue)
    }

    fn skip(&mut self, length: usize, count: usize) {
        black_box((length, count));
    }
}

fn random_memory(size: usize) -> RamMemory {
    let mut rng = StdRng::seed_from_u64(0);
    RamMemory::from_bytes((0..size).map(|_| rng.gen()).collect())
}

pub fn block_build_bench(c: &mut Criterion) {
    let manager = CodeBlockManagerBuilder::new().build().unwrap();
    let ram = random_memory(0x10000);
    let mut rng = StdRng::seed_from_u64(1);

    c.bench_function("block_build_random_real", |b| {
        b.iter(|| {
            let offset = rng.gen_range(0..0x10000);
            _ = black_box(manager.get_real_mode_block_at(&ram, offset));
        });
    });

    c.bench_function("block_build_random_protected32", |b| {
        b.iter(|| {
            let offset = rng.gen_range(0..0x10000);
            _ = black_box(manager.get_protected_mode_block_at(&ram, offset, true));
        });
    });
}

pub fn block_execute_bench(c: &mut Criterion) {
    // 64 NOPs and a HLT
    let mut bytes = vec![0x90; 64];
    bytes.push(0xF4);
    let ram = RamMemory::from_bytes(bytes);

    let manager = CodeBlockManagerBuilder::new().build().unwrap();
    let baseline = manager.get_real_mode_block_at(&ram, 0).unwrap();

    c.bench_function("block_execute_baseline_nops", |b| {
        b.iter(|| {
            _ = black_box(baseline.execute(&ram, &mut NullExecutor));
        });
    });

    let manager = CodeBlockManagerBuilder::new().with_hot_threshold(Some(1)).build().unwrap();
    let block = manager.get_real_mode_block_at(&ram, 0).unwrap();
    let optimised = match block.execute(&ram, &mut NullExecutor).unwrap() {
        replay_core::codeblock::BlockOutcome::Replaced(block) => block,
        _ => panic!("expected promotion"),
    };

    c.bench_function("block_execute_optimised_nops", |b| {
        b.iter(|| {
            _ = black_box(optimised.execute(&ram, &mut NullExecutor));
        });
    });
}

criterion_group!(benches, block_build_bench, block_execute_bench);
criterion_main!(benches);
