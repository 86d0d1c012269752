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

    codeblock::manager.rs

    The CodeBlockManager owns one factory chain per CPU mode and builds
    blocks on request. Blocks are not cached here; callers hold on to the
    blocks they are given and swap in replacements as execution reports them.

*/

use std::rc::Rc;

use anyhow::Result;

use crate::{
    codeblock::{
        compiler::{BaselineCompiler, OptimisingCompiler},
        BlockTier,
        CodeBlock,
        CodeBlockFactory,
        FactoryChain,
    },
    coreconfig::{CoreConfig, DEFAULT_BLOCK_LIMIT},
    cpu_common::{CpuMode, EmuResult},
    memory::Memory,
};

pub struct CodeBlockManager {
    real: Rc<FactoryChain>,
    protected: Rc<FactoryChain>,
    virtual8086: Rc<FactoryChain>,
    block_limit: usize,
}

impl CodeBlockManager {
    fn new(block_limit: usize, hot_threshold: Option<u32>) -> Self {
        let make_chain = |mode: CpuMode| {
            let mut factories = Vec::with_capacity(2);
            if hot_threshold.is_some() {
                factories.push(CodeBlockFactory::new(mode, OptimisingCompiler, block_limit));
            }
            factories.push(CodeBlockFactory::new(mode, BaselineCompiler, block_limit));
            Rc::new(FactoryChain::new(mode, factories, hot_threshold))
        };

        Self {
            real: make_chain(CpuMode::Real),
            protected: make_chain(CpuMode::Protected),
            virtual8086: make_chain(CpuMode::Virtual8086),
            block_limit,
        }
    }

    pub fn block_limit(&self) -> usize {
        self.block_limit
    }

    pub fn chain(&self, mode: CpuMode) -> &Rc<FactoryChain> {
        match mode {
            CpuMode::Real => &self.real,
            CpuMode::Protected => &self.protected,
            CpuMode::Virtual8086 => &self.virtual8086,
        }
    }

    pub fn get_real_mode_block_at<M: Memory + ?Sized>(&self, memory: &M, offset: usize) -> EmuResult<CodeBlock> {
        self.real.build(memory, offset, false, BlockTier::Baseline)
    }

    /// Build a protected mode block. `size32` is the default operand size (D) flag of the current
    /// code segment.
    pub fn get_protected_mode_block_at<M: Memory + ?Sized>(
        &self,
        memory: &M,
        offset: usize,
        size32: bool,
    ) -> EmuResult<CodeBlock> {
        self.protected.build(memory, offset, size32, BlockTier::Baseline)
    }

    pub fn get_virtual8086_mode_block_at<M: Memory + ?Sized>(&self, memory: &M, offset: usize) -> EmuResult<CodeBlock> {
        self.virtual8086.build(memory, offset, false, BlockTier::Baseline)
    }

    pub fn get_block_at<M: Memory + ?Sized>(
        &self,
        mode: CpuMode,
        memory: &M,
        offset: usize,
        size32: bool,
    ) -> EmuResult<CodeBlock> {
        match mode {
            CpuMode::Real => self.get_real_mode_block_at(memory, offset),
            CpuMode::Protected => self.get_protected_mode_block_at(memory, offset, size32),
            CpuMode::Virtual8086 => self.get_virtual8086_mode_block_at(memory, offset),
        }
    }
}

#[derive(Default)]
pub struct CodeBlockManagerBuilder {
    block_limit: Option<usize>,
    hot_threshold: Option<u32>,
}

impl CodeBlockManagerBuilder {
    pub fn new() -> CodeBlockManagerBuilder {
        CodeBlockManagerBuilder { ..Default::default() }
    }

    pub fn with_config(mut self, config: &CoreConfig) -> Self {
        self.block_limit = Some(config.block_limit);
        self.hot_threshold = config.hot_threshold;
        self
    }

    pub fn with_block_limit(mut self, block_limit: usize) -> Self {
        self.block_limit = Some(block_limit);
        self
    }

    pub fn with_hot_threshold(mut self, hot_threshold: Option<u32>) -> Self {
        self.hot_threshold = hot_threshold;
        self
    }

    pub fn build(self) -> Result<CodeBlockManager> {
        let block_limit = self.block_limit.unwrap_or(DEFAULT_BLOCK_LIMIT);
        CoreConfig {
            block_limit,
            hot_threshold: self.hot_threshold,
            ..Default::default()
        }
        .validate()?;

        log::debug!(
            "Creating code block manager: limit {}, hot threshold {:?}",
            block_limit,
            self.hot_threshold
        );
        Ok(CodeBlockManager::new(block_limit, self.hot_threshold))
    }
}
