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

    codeblock::factory.rs

    A CodeBlockFactory pairs a decoder with a compiler. A FactoryChain holds
    the factories for one CPU mode and asks each in turn for a block.

*/

use std::rc::Rc;

use crate::{
    bytequeue::{ByteCursor, ByteSource},
    codeblock::{
        compiler::{BlockCompiler, CompilerDispatch},
        decoder::Decoder,
        BlockKind,
        BlockTier,
        CodeBlock,
        CompiledBlock,
    },
    cpu_common::{fatal, CpuMode, EmuResult, InternalError},
    memerror::MemError,
    memory::Memory,
};

#[derive(Debug)]
pub struct CodeBlockFactory {
    decoder: Decoder,
    compiler: CompilerDispatch,
    limit: usize,
}

impl CodeBlockFactory {
    pub fn new(mode: CpuMode, compiler: impl Into<CompilerDispatch>, limit: usize) -> Self {
        Self {
            decoder: Decoder::new(mode),
            compiler: compiler.into(),
            limit,
        }
    }

    pub fn tier(&self) -> BlockTier {
        self.compiler.tier()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Build a block from the cursor position. Returns `None` if this factory's compiler is of a
    /// higher tier than was requested.
    pub fn make_block<M: Memory + ?Sized>(
        &self,
        cursor: &mut ByteCursor<M>,
        cs_default_32: bool,
        requested: BlockTier,
    ) -> Result<Option<CompiledBlock>, MemError> {
        if self.tier() > requested {
            return Ok(None);
        }

        let start = cursor.offset();
        let default_32 = self.decoder.mode().default_operand_size_32(cs_default_32);
        let instructions = self.decoder.decode_block(cursor, default_32, self.limit)?;

        let end = instructions.last().map_or(start, |i| i.next_offset());
        let length = end - start;
        let count = instructions.len();
        let version = cursor.memory().code_version(start as u32, length);
        let ops = self.compiler.compile(instructions);

        Ok(Some(CompiledBlock::new(start, length, count, self.tier(), ops, version)))
    }
}

/// The ordered factories for one CPU mode.
#[derive(Debug)]
pub struct FactoryChain {
    mode: CpuMode,
    factories: Vec<CodeBlockFactory>,
    hot_threshold: Option<u32>,
}

impl FactoryChain {
    /// `hot_threshold` is dropped when no factory in the chain can build an optimised block.
    pub fn new(mode: CpuMode, factories: Vec<CodeBlockFactory>, hot_threshold: Option<u32>) -> Self {
        let can_promote = factories.iter().any(|f| f.tier() == BlockTier::Optimised);
        Self {
            mode,
            factories,
            hot_threshold: hot_threshold.filter(|_| can_promote),
        }
    }

    pub fn mode(&self) -> CpuMode {
        self.mode
    }

    /// The execution count at which a baseline block is promoted. Chains without an optimising
    /// factory never promote.
    pub fn hot_threshold(&self) -> Option<u32> {
        self.hot_threshold
    }

    /// Build a block at `offset` in `memory`.
    ///
    /// If the first instruction runs past the end of the region, a spanning stub bound to this
    /// chain is returned. If no factory produces a block, that is an internal error.
    pub fn build<M: Memory + ?Sized>(
        self: &Rc<Self>,
        memory: &M,
        offset: usize,
        cs_default_32: bool,
        requested: BlockTier,
    ) -> EmuResult<CodeBlock> {
        let mut cursor = ByteCursor::new(memory, offset);

        for factory in &self.factories {
            cursor.reset();
            match factory.make_block(&mut cursor, cs_default_32, requested) {
                Ok(Some(block)) => {
                    log::trace!(
                        "Built {} {} mode block at {:08X}: {} instructions, {} bytes",
                        block.tier,
                        self.mode,
                        offset,
                        block.instruction_count,
                        block.length
                    );
                    return Ok(CodeBlock::new(
                        self.mode,
                        cs_default_32,
                        Rc::clone(self),
                        BlockKind::Compiled(block),
                    ));
                }
                Ok(None) => continue,
                Err(e) => {
                    log::debug!("Spanning {} mode block at {:08X}: {}", self.mode, offset, e);
                    return Ok(CodeBlock::new(
                        self.mode,
                        cs_default_32,
                        Rc::clone(self),
                        BlockKind::Spanning { start: offset },
                    ));
                }
            }
        }

        Err(fatal(InternalError::NoBlockProduced(self.mode)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codeblock::compiler::{BaselineCompiler, OptimisingCompiler},
        memory::RamMemory,
    };

    fn chain(factories: Vec<CodeBlockFactory>, hot: Option<u32>) -> Rc<FactoryChain> {
        Rc::new(FactoryChain::new(CpuMode::Real, factories, hot))
    }

    #[test]
    fn optimising_factory_declines_baseline_requests() {
        let ram = RamMemory::from_bytes(vec![0x90, 0x90, 0xC3]);
        let chain = chain(
            vec![
                CodeBlockFactory::new(CpuMode::Real, OptimisingCompiler, 100),
                CodeBlockFactory::new(CpuMode::Real, BaselineCompiler, 100),
            ],
            Some(4),
        );
        let block = chain.build(&ram, 0, false, BlockTier::Baseline).unwrap();
        assert_eq!(block.tier(), Some(BlockTier::Baseline));
        assert_eq!(block.ops().len(), 3);

        let block = chain.build(&ram, 0, false, BlockTier::Optimised).unwrap();
        assert_eq!(block.tier(), Some(BlockTier::Optimised));
        assert_eq!(block.ops().len(), 2);
        assert_eq!(block.instruction_count(), 3);
    }

    #[test]
    fn empty_chain_is_fatal() {
        let ram = RamMemory::from_bytes(vec![0x90, 0xC3]);
        let chain = chain(vec![CodeBlockFactory::new(CpuMode::Real, OptimisingCompiler, 100)], None);
        let err = chain.build(&ram, 0, false, BlockTier::Baseline).unwrap_err();
        assert_eq!(err, fatal(InternalError::NoBlockProduced(CpuMode::Real)));
    }

    #[test]
    fn partial_first_instruction_is_spanning() {
        let ram = RamMemory::from_bytes(vec![0x90, 0xEA, 0x00]);
        let chain = chain(vec![CodeBlockFactory::new(CpuMode::Real, BaselineCompiler, 100)], None);
        let block = chain.build(&ram, 1, false, BlockTier::Baseline).unwrap();
        assert!(block.is_spanning());
        assert_eq!(block.start(), 1);
        assert_eq!(block.mode(), CpuMode::Real);
    }

    #[test]
    fn no_promotion_without_optimiser() {
        let baseline_only = chain(vec![CodeBlockFactory::new(CpuMode::Real, BaselineCompiler, 100)], Some(2));
        assert_eq!(baseline_only.hot_threshold(), None);

        let tiered = chain(
            vec![
                CodeBlockFactory::new(CpuMode::Real, OptimisingCompiler, 100),
                CodeBlockFactory::new(CpuMode::Real, BaselineCompiler, 100),
            ],
            Some(2),
        );
        assert_eq!(tiered.hot_threshold(), Some(2));
    }
}
