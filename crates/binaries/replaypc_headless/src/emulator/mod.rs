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

    replaypc_headless::emulator::mod.rs

    The headless emulator: guest memory, the code block manager, a virtual
    clock driven by executed instructions and the replay trace.

*/

pub mod executor;

use std::rc::Rc;

use anyhow::{anyhow, Context};
use replay_config::ConfigFileParams;
use replay_core::{
    codeblock::{BlockOutcome, CodeBlock, CodeBlockManager, CodeBlockManagerBuilder},
    memory::RamMemory,
    timer::{TimerEvent, TimerHandler, TimerId, TimerOwner, VirtualClock},
    tracelogger::{TraceLogger, TraceSink},
    CpuMode,
    EmuError,
    ReplayHashMap,
};

use crate::emulator::executor::FlowExecutor;

/// Owner id of the periodic demonstration timer.
pub const TICK_TIMER_OWNER: TimerOwner = TimerOwner(0);

/// Re-arms a periodic timer and records every event in the trace.
struct TickHandler<'a> {
    trace: &'a mut TraceLogger,
    period: u64,
    ticks: u64,
}

impl TimerHandler for TickHandler<'_> {
    fn on_timer(&mut self, clock: &mut VirtualClock, event: TimerEvent) {
        self.trace.trace_timer(&event);
        self.ticks += 1;
        if let Err(e) = clock.set_expiry(event.id, event.expiry + self.period) {
            log::error!("Failed to re-arm timer {:?}: {}", event.id, e);
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub blocks: u64,
    pub instructions: u64,
    pub replacements: u64,
    pub timer_events: u64,
    pub exception: Option<String>,
    pub halted: bool,
    /// Hex MD5 digest of the trace.
    pub fingerprint: String,
}

pub struct Emulator {
    memory: RamMemory,
    manager: CodeBlockManager,
    blocks: ReplayHashMap<usize, Rc<CodeBlock>>,
    clock: VirtualClock,
    tick_timer: Option<(TimerId, u64)>,
    trace: TraceLogger,
    mode: CpuMode,
    code32: bool,
    entry: usize,
    max_blocks: u64,
}

impl Emulator {
    pub fn from_config(config: &ConfigFileParams, image: &[u8], trace: TraceLogger) -> anyhow::Result<Self> {
        let mut memory = RamMemory::new(config.emulator.memory_size);
        memory
            .copy_from(image, config.emulator.load_address as usize)
            .context("Failed to load guest image")?;

        let manager = CodeBlockManagerBuilder::new().with_config(&config.core).build()?;

        let mut clock = VirtualClock::new();
        let tick_timer = match config.emulator.timer_period {
            Some(0) => return Err(anyhow!("timer_period must be non-zero")),
            Some(period) => {
                let id = clock.new_timer(TICK_TIMER_OWNER);
                clock.set_expiry(id, period)?;
                Some((id, period))
            }
            None => None,
        };

        Ok(Self {
            memory,
            manager,
            blocks: ReplayHashMap::default(),
            clock,
            tick_timer,
            trace,
            mode: config.emulator.mode,
            code32: config.emulator.code32,
            entry: config.emulator.load_address as usize,
            max_blocks: config.emulator.max_blocks,
        })
    }

    /// Build a trace logger for the trace options in `config`.
    pub fn trace_from_config(config: &ConfigFileParams) -> anyhow::Result<TraceLogger> {
        if let Some(path) = &config.emulator.trace_file {
            TraceLogger::from_filename(path)
                .with_context(|| format!("Couldn't create trace file {}", path.display()))
        }
        else if config.emulator.trace_console {
            Ok(TraceLogger::new(TraceSink::Console))
        }
        else {
            Ok(TraceLogger::default())
        }
    }

    pub fn trace(&self) -> &TraceLogger {
        &self.trace
    }

    /// Fetch the cached block at `ip`, building it on first use.
    fn block_at(&mut self, ip: usize) -> Result<Rc<CodeBlock>, EmuError> {
        if let Some(block) = self.blocks.get(&ip) {
            return Ok(block.clone());
        }
        let block = Rc::new(self.manager.get_block_at(self.mode, &self.memory, ip, self.code32)?);
        self.blocks.insert(ip, block.clone());
        Ok(block)
    }

    /// Run until the guest halts, raises an exception or `max_blocks` blocks have executed.
    /// Internal errors abort the run.
    pub fn run(&mut self) -> anyhow::Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut executor = FlowExecutor::new(self.entry);
        let mut block = self.block_at(self.entry)?;

        while summary.blocks < self.max_blocks {
            self.trace.trace_block(&block);
            match block.execute(&self.memory, &mut executor) {
                Ok(BlockOutcome::Executed { instructions }) => {
                    summary.blocks += 1;
                    summary.instructions += instructions as u64;
                    self.tick(summary.instructions, &mut summary)?;
                    if executor.is_halted() {
                        summary.halted = true;
                        break;
                    }
                    block = self.block_at(executor.ip())?;
                }
                Ok(BlockOutcome::Replaced(replacement)) => {
                    summary.replacements += 1;
                    block = Rc::new(replacement);
                    self.blocks.insert(block.start(), block.clone());
                }
                Err(EmuError::Exception(exception)) => {
                    // No interrupt delivery; the exception ends the run.
                    log::debug!("Guest raised {} in block at {:08X}", exception, block.start());
                    self.trace.trace_note(exception.to_string());
                    summary.exception = Some(exception.to_string());
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.trace.flush();
        summary.fingerprint = format!("{:x}", self.trace.fingerprint());
        Ok(summary)
    }

    fn tick(&mut self, now: u64, summary: &mut RunSummary) -> anyhow::Result<()> {
        let Some((_, period)) = self.tick_timer
        else {
            return Ok(());
        };
        let mut handler = TickHandler {
            trace: &mut self.trace,
            period,
            ticks: 0,
        };
        self.clock.advance_to(now, &mut handler)?;
        summary.timer_events += handler.ticks;
        Ok(())
    }
}
