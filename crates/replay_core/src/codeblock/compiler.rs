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

    codeblock::compiler.rs

    Block compilers turn a decoded instruction sequence into the op list a
    code block executes. The baseline compiler maps instructions one to one;
    the optimising compiler is used when a block is promoted and fuses runs
    of NOPs into a single op.

*/

use enum_dispatch::enum_dispatch;

use crate::{
    codeblock::{decoder::Instruction, opcodes::InstructionFlow, BlockTier},
    cpu_common::ProcessorException,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MicroOp {
    Execute(Instruction),
    /// `count` consecutive one-byte NOPs covering `length` bytes.
    NopRun {
        offset: usize,
        length: usize,
        count: usize,
    },
    Raise {
        offset: usize,
        length: usize,
        exception: ProcessorException,
    },
}

impl MicroOp {
    pub fn instruction_count(&self) -> usize {
        match self {
            MicroOp::NopRun { count, .. } => *count,
            _ => 1,
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            MicroOp::Execute(i) => i.offset,
            MicroOp::NopRun { offset, .. } | MicroOp::Raise { offset, .. } => *offset,
        }
    }

    pub fn length(&self) -> usize {
        match self {
            MicroOp::Execute(i) => i.length,
            MicroOp::NopRun { length, .. } | MicroOp::Raise { length, .. } => *length,
        }
    }
}

#[enum_dispatch]
#[derive(Clone, Debug)]
pub enum CompilerDispatch {
    BaselineCompiler,
    OptimisingCompiler,
}

#[enum_dispatch(CompilerDispatch)]
pub trait BlockCompiler {
    fn tier(&self) -> BlockTier;
    fn compile(&self, instructions: Vec<Instruction>) -> Vec<MicroOp>;
}

fn lower(instruction: Instruction) -> MicroOp {
    match instruction.flow {
        InstructionFlow::Invalid(exception) => MicroOp::Raise {
            offset: instruction.offset,
            length: instruction.length,
            exception,
        },
        _ => MicroOp::Execute(instruction),
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct BaselineCompiler;

impl BlockCompiler for BaselineCompiler {
    fn tier(&self) -> BlockTier {
        BlockTier::Baseline
    }

    fn compile(&self, instructions: Vec<Instruction>) -> Vec<MicroOp> {
        instructions.into_iter().map(lower).collect()
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct OptimisingCompiler;

impl BlockCompiler for OptimisingCompiler {
    fn tier(&self) -> BlockTier {
        BlockTier::Optimised
    }

    fn compile(&self, instructions: Vec<Instruction>) -> Vec<MicroOp> {
        let mut ops: Vec<MicroOp> = Vec::with_capacity(instructions.len());

        for instruction in instructions {
            if instruction.is_nop() {
                match ops.last_mut() {
                    Some(MicroOp::NopRun { length, count, .. }) => {
                        *length += instruction.length;
                        *count += 1;
                        continue;
                    }
                    Some(last) if matches!(&*last, MicroOp::Execute(previous) if previous.is_nop()) => {
                        *last = MicroOp::NopRun {
                            offset: last.offset(),
                            length: last.length() + instruction.length,
                            count: 2,
                        };
                        continue;
                    }
                    _ => {}
                }
            }
            ops.push(lower(instruction));
        }
        ops
    }
}
