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

    codeblock::mod.rs

    Code blocks are the unit of execution. A block is built from the guest
    bytes at an offset by the factory chain of one CPU mode, and is either a
    compiled sequence of ops or a spanning stub for an instruction that runs
    off the end of the region it was requested from.

    Executing a block either runs it or hands back a replacement block that
    the caller must execute instead. Replacement happens when the guest has
    overwritten the block's bytes, when a baseline block becomes hot, or when
    a spanning stub can now be decoded in full.

*/

pub mod compiler;
pub mod decoder;
pub mod factory;
pub mod manager;
pub mod opcodes;

use std::{cell::Cell, rc::Rc};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

pub use compiler::MicroOp;
pub use decoder::{BranchTarget, Instruction};
pub use factory::{CodeBlockFactory, FactoryChain};
pub use manager::{CodeBlockManager, CodeBlockManagerBuilder};

use crate::{
    cpu_common::{CpuMode, EmuResult, ProcessorException},
    memory::Memory,
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumString)]
pub enum BlockTier {
    #[default]
    Baseline,
    Optimised,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Leave the block early, e.g. after a taken branch or a pending interrupt.
    Exit,
}

/// Implemented by the CPU to carry out the ops of a code block.
pub trait BlockExecutor {
    fn execute(&mut self, instruction: &Instruction) -> EmuResult<Flow>;

    /// Step over `count` instructions occupying `length` bytes that have no effect beyond advancing IP.
    fn skip(&mut self, length: usize, count: usize);
}

#[derive(Debug)]
pub enum BlockOutcome {
    Executed { instructions: usize },
    /// Nothing was executed; run the returned block in place of this one.
    Replaced(CodeBlock),
}

#[derive(Clone, Debug)]
pub struct CompiledBlock {
    start: usize,
    length: usize,
    instruction_count: usize,
    tier: BlockTier,
    ops: Vec<MicroOp>,
    code_version: u64,
    executions: Cell<u32>,
}

impl CompiledBlock {
    pub fn new(
        start: usize,
        length: usize,
        instruction_count: usize,
        tier: BlockTier,
        ops: Vec<MicroOp>,
        code_version: u64,
    ) -> Self {
        Self {
            start,
            length,
            instruction_count,
            tier,
            ops,
            code_version,
            executions: Cell::new(0),
        }
    }
}

#[derive(Clone, Debug)]
pub enum BlockKind {
    Compiled(CompiledBlock),
    Spanning { start: usize },
}

#[derive(Clone, Debug)]
pub struct CodeBlock {
    mode: CpuMode,
    cs_default_32: bool,
    chain: Rc<FactoryChain>,
    kind: BlockKind,
}

impl CodeBlock {
    pub(crate) fn new(mode: CpuMode, cs_default_32: bool, chain: Rc<FactoryChain>, kind: BlockKind) -> Self {
        Self {
            mode,
            cs_default_32,
            chain,
            kind,
        }
    }

    pub fn mode(&self) -> CpuMode {
        self.mode
    }

    pub fn kind(&self) -> &BlockKind {
        &self.kind
    }

    pub fn start(&self) -> usize {
        match &self.kind {
            BlockKind::Compiled(block) => block.start,
            BlockKind::Spanning { start } => *start,
        }
    }

    /// Number of guest bytes the block was decoded from. A spanning stub has not consumed any.
    pub fn byte_length(&self) -> usize {
        match &self.kind {
            BlockKind::Compiled(block) => block.length,
            BlockKind::Spanning { .. } => 0,
        }
    }

    /// Number of guest instructions in the block. A spanning stub stands for its one straddling
    /// instruction.
    pub fn instruction_count(&self) -> usize {
        match &self.kind {
            BlockKind::Compiled(block) => block.instruction_count,
            BlockKind::Spanning { .. } => 1,
        }
    }

    pub fn is_spanning(&self) -> bool {
        matches!(self.kind, BlockKind::Spanning { .. })
    }

    pub fn tier(&self) -> Option<BlockTier> {
        match &self.kind {
            BlockKind::Compiled(block) => Some(block.tier),
            BlockKind::Spanning { .. } => None,
        }
    }

    pub fn ops(&self) -> &[MicroOp] {
        match &self.kind {
            BlockKind::Compiled(block) => &block.ops,
            BlockKind::Spanning { .. } => &[],
        }
    }

    pub fn executions(&self) -> u32 {
        match &self.kind {
            BlockKind::Compiled(block) => block.executions.get(),
            BlockKind::Spanning { .. } => 0,
        }
    }

    /// Offset of the first byte after the block.
    pub fn end(&self) -> usize {
        self.start() + self.byte_length()
    }

    /// Execute the block against `memory`, the region it was built from.
    pub fn execute<M, E>(&self, memory: &M, executor: &mut E) -> EmuResult<BlockOutcome>
    where
        M: Memory + ?Sized,
        E: BlockExecutor,
    {
        let block = match &self.kind {
            BlockKind::Compiled(block) => block,
            BlockKind::Spanning { start } => return self.execute_spanning(memory, *start),
        };

        if memory.code_version(block.start as u32, block.length) != block.code_version {
            log::debug!("{} mode block at {:08X} modified, rebuilding", self.mode, block.start);
            let replacement = self.chain.build(memory, block.start, self.cs_default_32, BlockTier::Baseline)?;
            return Ok(BlockOutcome::Replaced(replacement));
        }

        let executions = block.executions.get().saturating_add(1);
        block.executions.set(executions);
        if let Some(threshold) = self.chain.hot_threshold() {
            if block.tier == BlockTier::Baseline && executions >= threshold {
                log::debug!(
                    "{} mode block at {:08X} hot after {} executions, promoting",
                    self.mode,
                    block.start,
                    executions
                );
                let replacement = self.chain.build(memory, block.start, self.cs_default_32, BlockTier::Optimised)?;
                return Ok(BlockOutcome::Replaced(replacement));
            }
        }

        let mut instructions = 0;
        for op in &block.ops {
            match op {
                MicroOp::Execute(instruction) => {
                    instructions += 1;
                    if executor.execute(instruction)? == Flow::Exit {
                        break;
                    }
                }
                MicroOp::NopRun { length, count, .. } => {
                    executor.skip(*length, *count);
                    instructions += count;
                }
                MicroOp::Raise { offset, exception, .. } => {
                    log::trace!("Block op at {:08X} raises {}", offset, exception);
                    return Err((*exception).into());
                }
            }
        }
        Ok(BlockOutcome::Executed { instructions })
    }

    fn execute_spanning<M: Memory + ?Sized>(&self, memory: &M, start: usize) -> EmuResult<BlockOutcome> {
        let replacement = self.chain.build(memory, start, self.cs_default_32, BlockTier::Baseline)?;
        if replacement.is_spanning() {
            log::debug!(
                "{} mode instruction at {:08X} still runs past the end of memory",
                self.mode,
                start
            );
            return Err(ProcessorException::GENERAL_PROTECTION_0.into());
        }
        Ok(BlockOutcome::Replaced(replacement))
    }
}
