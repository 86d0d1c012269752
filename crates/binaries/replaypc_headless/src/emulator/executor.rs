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

    replaypc_headless::emulator::executor.rs

    A block executor that carries out control flow only. Data operations
    have no effect; branches are followed so that the block trace walks the
    guest program the way a CPU would.

*/

use replay_core::{
    codeblock::{opcodes::InstructionFlow, BlockExecutor, BranchTarget, Flow, Instruction},
    EmuResult,
};

const MAX_CALL_DEPTH: usize = 256;

#[derive(Debug, Default)]
pub struct FlowExecutor {
    ip: usize,
    halted: bool,
    returns: Vec<usize>,
    branches_taken: u64,
    conditionals_seen: u64,
}

impl FlowExecutor {
    pub fn new(ip: usize) -> Self {
        Self {
            ip,
            ..Default::default()
        }
    }

    pub fn ip(&self) -> usize {
        self.ip
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn branches_taken(&self) -> u64 {
        self.branches_taken
    }

    fn take(&mut self, instruction: &Instruction) -> Flow {
        self.ip = match (instruction.relative_target(), instruction.branch) {
            (Some(target), _) => target,
            (None, Some(BranchTarget::Far { offset, .. })) => offset as usize,
            // Indirect; the target is not known without register state.
            _ => return Flow::Continue,
        };
        self.branches_taken += 1;
        Flow::Exit
    }
}

impl BlockExecutor for FlowExecutor {
    fn execute(&mut self, instruction: &Instruction) -> EmuResult<Flow> {
        self.ip = instruction.next_offset();

        let flow = match instruction.flow {
            InstructionFlow::Jump => self.take(instruction),
            InstructionFlow::ConditionalJump => {
                // Alternate taken and not taken so loops terminate deterministically.
                self.conditionals_seen += 1;
                if self.conditionals_seen % 2 == 0 {
                    self.take(instruction)
                }
                else {
                    Flow::Exit
                }
            }
            InstructionFlow::Call => {
                if self.returns.len() < MAX_CALL_DEPTH {
                    self.returns.push(self.ip);
                }
                self.take(instruction)
            }
            InstructionFlow::Return => {
                match self.returns.pop() {
                    Some(ip) => self.ip = ip,
                    None => self.halted = true,
                }
                Flow::Exit
            }
            InstructionFlow::Halt => {
                self.halted = true;
                Flow::Exit
            }
            InstructionFlow::Interrupt | InstructionFlow::ModeChange => Flow::Exit,
            _ => Flow::Continue,
        };
        Ok(flow)
    }

    fn skip(&mut self, length: usize, _count: usize) {
        self.ip += length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_core::{
        codeblock::{BlockOutcome, CodeBlockManagerBuilder},
        memory::RamMemory,
    };

    fn run_block(bytes: Vec<u8>, executor: &mut FlowExecutor) {
        let ram = RamMemory::from_bytes(bytes);
        let manager = CodeBlockManagerBuilder::new().build().unwrap();
        let block = manager.get_real_mode_block_at(&ram, executor.ip()).unwrap();
        assert!(matches!(block.execute(&ram, executor).unwrap(), BlockOutcome::Executed { .. }));
    }

    #[test]
    fn follows_short_jump() {
        let mut executor = FlowExecutor::new(0);
        // nop; jmp +4
        run_block(vec![0x90, 0xEB, 0x04, 0x90, 0x90, 0x90, 0x90, 0x90, 0xF4], &mut executor);
        assert_eq!(executor.ip(), 7);
        assert_eq!(executor.branches_taken(), 1);
    }

    #[test]
    fn call_and_return() {
        // call +1; hlt; ret
        let bytes = vec![0xE8, 0x01, 0x00, 0xF4, 0xC3];
        let mut executor = FlowExecutor::new(0);
        run_block(bytes.clone(), &mut executor);
        assert_eq!(executor.ip(), 4);
        run_block(bytes.clone(), &mut executor);
        assert_eq!(executor.ip(), 3);
        run_block(bytes, &mut executor);
        assert!(executor.is_halted());
    }

    #[test]
    fn conditional_jumps_alternate() {
        // jz -2 (to itself)
        let bytes = vec![0x74, 0xFE];
        let mut executor = FlowExecutor::new(0);
        run_block(bytes.clone(), &mut executor);
        assert_eq!(executor.ip(), 2);
        let mut executor = FlowExecutor {
            conditionals_seen: 1,
            ..Default::default()
        };
        run_block(bytes, &mut executor);
        assert_eq!(executor.ip(), 0);
    }
}
