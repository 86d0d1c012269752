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

    codeblock::decoder.rs

    Length and boundary decoding of x86 instructions into block-sized
    instruction sequences.

*/

use crate::{
    bytequeue::ByteSource,
    codeblock::opcodes::{self, Immediate, InstructionFlow, OpcodeInfo, MAX_INSTRUCTION_LENGTH},
    cpu_common::{
        CpuMode,
        OPCODE_PREFIX_0F,
        OPCODE_PREFIX_ADDRESS_SIZE,
        OPCODE_PREFIX_CS_OVERRIDE,
        OPCODE_PREFIX_DS_OVERRIDE,
        OPCODE_PREFIX_ES_OVERRIDE,
        OPCODE_PREFIX_FS_OVERRIDE,
        OPCODE_PREFIX_GS_OVERRIDE,
        OPCODE_PREFIX_LOCK,
        OPCODE_PREFIX_OPERAND_SIZE,
        OPCODE_PREFIX_REP,
        OPCODE_PREFIX_REPMASK,
        OPCODE_PREFIX_REPNE,
        OPCODE_PREFIX_SS_OVERRIDE,
        OPCODE_SEG_OVERRIDE_MASK,
    },
    memerror::MemError,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BranchTarget {
    /// Displacement from the end of the instruction.
    Relative(i32),
    Far { selector: u16, offset: u32 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the first prefix byte within the decoded region.
    pub offset: usize,
    pub length: usize,
    /// Opcode, with 0x0F-escaped opcodes stored as 0x0Fxx.
    pub opcode: u16,
    pub prefixes: u32,
    pub modrm: Option<u8>,
    pub operand_size_32: bool,
    pub address_size_32: bool,
    pub flow: InstructionFlow,
    pub branch: Option<BranchTarget>,
}

impl Instruction {
    pub fn next_offset(&self) -> usize {
        self.offset + self.length
    }

    /// Resolve a relative branch to an offset in the decoded region.
    pub fn relative_target(&self) -> Option<usize> {
        match self.branch {
            Some(BranchTarget::Relative(disp)) => Some(self.next_offset().wrapping_add_signed(disp as isize)),
            _ => None,
        }
    }

    pub fn is_nop(&self) -> bool {
        self.opcode == 0x90 && self.prefixes == 0
    }
}

/// Decodes instructions for a single CPU mode.
#[derive(Copy, Clone, Debug)]
pub struct Decoder {
    mode: CpuMode,
}

impl Decoder {
    pub fn new(mode: CpuMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> CpuMode {
        self.mode
    }

    /// Decode one instruction. Undefined encodings are returned as instructions with an
    /// [InstructionFlow::Invalid] flow; only running out of bytes is an error.
    pub fn decode_instruction<S: ByteSource>(&self, source: &mut S, default_32: bool) -> Result<Instruction, MemError> {
        let start = source.offset();
        let mut prefixes = 0u32;
        let mut prefix_count = 0;

        let mut byte = source.next_byte()?;
        while opcodes::is_prefix(byte) {
            let prefix = match byte {
                0x26 => OPCODE_PREFIX_ES_OVERRIDE,
                0x2E => OPCODE_PREFIX_CS_OVERRIDE,
                0x36 => OPCODE_PREFIX_SS_OVERRIDE,
                0x3E => OPCODE_PREFIX_DS_OVERRIDE,
                0x64 => OPCODE_PREFIX_FS_OVERRIDE,
                0x65 => OPCODE_PREFIX_GS_OVERRIDE,
                0x66 => OPCODE_PREFIX_OPERAND_SIZE,
                0x67 => OPCODE_PREFIX_ADDRESS_SIZE,
                0xF0 => OPCODE_PREFIX_LOCK,
                0xF2 => OPCODE_PREFIX_REPNE,
                _ => OPCODE_PREFIX_REP,
            };
            // Only the last segment override and the last repeat prefix apply.
            if prefix & OPCODE_SEG_OVERRIDE_MASK != 0 {
                prefixes &= !OPCODE_SEG_OVERRIDE_MASK;
            }
            if prefix & OPCODE_PREFIX_REPMASK != 0 {
                prefixes &= !OPCODE_PREFIX_REPMASK;
            }
            prefixes |= prefix;
            prefix_count += 1;

            if prefix_count >= MAX_INSTRUCTION_LENGTH {
                log::trace!("Prefix run at {:08X} exceeds maximum instruction length", start);
                return Ok(Instruction {
                    offset: start,
                    length: MAX_INSTRUCTION_LENGTH,
                    opcode: byte as u16,
                    prefixes,
                    modrm: None,
                    operand_size_32: default_32,
                    address_size_32: default_32,
                    flow: InstructionFlow::TOO_LONG,
                    branch: None,
                });
            }
            byte = source.next_byte()?;
        }

        let operand_size_32 = default_32 ^ (prefixes & OPCODE_PREFIX_OPERAND_SIZE != 0);
        let address_size_32 = default_32 ^ (prefixes & OPCODE_PREFIX_ADDRESS_SIZE != 0);

        let (opcode, mut info) = if byte == 0x0F {
            let second = source.next_byte()?;
            prefixes |= OPCODE_PREFIX_0F;
            (0x0F00 | second as u16, opcodes::two_byte(second))
        }
        else {
            (byte as u16, opcodes::one_byte(byte))
        };

        let modrm = if info.modrm {
            let modrm = source.next_byte()?;
            info = opcodes::refine(self.mode, opcode, modrm, info);
            if !opcodes::ignores_modrm_mode(opcode) {
                Self::read_displacement(source, modrm, address_size_32)?;
            }
            Some(modrm)
        }
        else {
            None
        };

        let branch = Self::read_immediate(source, &info, operand_size_32, address_size_32)?;

        let length = source.offset() - start;
        let flow = if length > MAX_INSTRUCTION_LENGTH {
            InstructionFlow::TOO_LONG
        }
        else {
            info.flow
        };

        Ok(Instruction {
            offset: start,
            length,
            opcode,
            prefixes,
            modrm,
            operand_size_32,
            address_size_32,
            flow,
            branch,
        })
    }

    fn read_displacement<S: ByteSource>(source: &mut S, modrm: u8, address_size_32: bool) -> Result<(), MemError> {
        let mode = modrm >> 6;
        let rm = modrm & 0x07;

        let displacement = if address_size_32 {
            let mut base_is_disp32 = rm == 0x05;
            if mode != 0x03 && rm == 0x04 {
                let sib = source.next_byte()?;
                base_is_disp32 = sib & 0x07 == 0x05;
            }
            match mode {
                0x00 if base_is_disp32 => 4,
                0x01 => 1,
                0x02 => 4,
                _ => 0,
            }
        }
        else {
            match mode {
                0x00 if rm == 0x06 => 2,
                0x01 => 1,
                0x02 => 2,
                _ => 0,
            }
        };

        for _ in 0..displacement {
            source.next_byte()?;
        }
        Ok(())
    }

    fn read_immediate<S: ByteSource>(
        source: &mut S,
        info: &OpcodeInfo,
        operand_size_32: bool,
        address_size_32: bool,
    ) -> Result<Option<BranchTarget>, MemError> {
        let relative = |disp: i32| info.relative.then_some(BranchTarget::Relative(disp));

        let branch = match info.immediate {
            Immediate::None => None,
            Immediate::Byte => relative(source.next_byte()? as i8 as i32),
            Immediate::Word => {
                source.next_u16()?;
                None
            }
            Immediate::WordByte => {
                source.next_u16()?;
                source.next_byte()?;
                None
            }
            Immediate::Full => {
                if operand_size_32 {
                    relative(source.next_u32()? as i32)
                }
                else {
                    relative(source.next_u16()? as i16 as i32)
                }
            }
            Immediate::FarPointer => {
                let offset = if operand_size_32 {
                    source.next_u32()?
                }
                else {
                    source.next_u16()? as u32
                };
                let selector = source.next_u16()?;
                Some(BranchTarget::Far { selector, offset })
            }
            Immediate::MemOffset => {
                if address_size_32 {
                    source.next_u32()?;
                }
                else {
                    source.next_u16()?;
                }
                None
            }
        };
        Ok(branch)
    }

    /// Decode up to `limit` instructions, stopping after the first block terminator.
    ///
    /// Running out of bytes inside the first instruction is an error. Running out later ends the
    /// block at the last complete instruction. An interrupt-shadow instruction is never left as
    /// the final instruction of a block unless it is the only one.
    pub fn decode_block<S: ByteSource>(
        &self,
        source: &mut S,
        default_32: bool,
        limit: usize,
    ) -> Result<Vec<Instruction>, MemError> {
        let mut instructions: Vec<Instruction> = Vec::new();

        loop {
            match self.decode_instruction(source, default_32) {
                Ok(instruction) => {
                    if instruction.flow.is_shadow() && instructions.len() + 1 >= limit && !instructions.is_empty() {
                        // The shadowed successor would land in the next block.
                        break;
                    }
                    let terminates = instruction.flow.is_terminator();
                    instructions.push(instruction);
                    if terminates || instructions.len() >= limit {
                        break;
                    }
                }
                Err(e) => {
                    if instructions.is_empty() {
                        return Err(e);
                    }
                    if instructions.len() == 1 && instructions[0].flow.is_shadow() {
                        // A lone shadow instruction whose successor is cut off straddles the region.
                        return Err(e);
                    }
                    log::trace!("Block at {:08X} truncated at region end: {}", instructions[0].offset, e);
                    break;
                }
            }
        }

        while instructions.len() > 1 && instructions.last().is_some_and(|i| i.flow.is_shadow()) {
            instructions.pop();
        }
        Ok(instructions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytequeue::ByteCursor,
        cpu_common::{ExceptionType, ProcessorException},
        memory::RamMemory,
    };

    fn decode_one(mode: CpuMode, bytes: &[u8], default_32: bool) -> Instruction {
        let ram = RamMemory::from_bytes(bytes.to_vec());
        let mut cursor = ByteCursor::new(&ram, 0);
        Decoder::new(mode).decode_instruction(&mut cursor, default_32).unwrap()
    }

    fn decode_block(mode: CpuMode, bytes: &[u8], limit: usize) -> Result<Vec<Instruction>, MemError> {
        let ram = RamMemory::from_bytes(bytes.to_vec());
        let mut cursor = ByteCursor::new(&ram, 0);
        Decoder::new(mode).decode_block(&mut cursor, false, limit)
    }

    #[test]
    fn instruction_lengths_16() {
        let cases: &[(&[u8], usize)] = &[
            (&[0x90], 1),
            (&[0xB8, 0x34, 0x12], 3),
            (&[0x66, 0xB8, 0x78, 0x56, 0x34, 0x12], 6),
            (&[0x8B, 0x06, 0x00, 0x10], 4),       // mov ax, [1000]
            (&[0x8B, 0x47, 0x02], 3),             // mov ax, [bx+2]
            (&[0xC7, 0x87, 0x00, 0x01, 0x34, 0x12], 6), // mov word [bx+100], 1234
            (&[0xF6, 0xC0, 0x01], 3),             // test al, 1
            (&[0xF6, 0xD0], 2),                   // not al
            (&[0xC8, 0x10, 0x00, 0x01], 4),       // enter 10, 1
            (&[0xA1, 0x00, 0x20], 3),             // mov ax, [2000]
            (&[0x67, 0x8B, 0x04, 0x24], 4),       // mov ax, [esp]
            (&[0x0F, 0x20, 0xC0], 3),             // mov eax, cr0
            (&[0x0F, 0xBA, 0xE0, 0x05], 4),       // bt ax, 5
        ];
        for (bytes, length) in cases {
            let i = decode_one(CpuMode::Real, bytes, false);
            assert_eq!(i.length, *length, "{:02X?}", bytes);
        }
    }

    #[test]
    fn instruction_lengths_32() {
        // mov eax, [ebp+ecx*4+12345678]
        let i = decode_one(CpuMode::Protected, &[0x8B, 0x84, 0x8D, 0x78, 0x56, 0x34, 0x12], true);
        assert_eq!(i.length, 7);
        // mov eax, [disp32] via sib with no base
        let i = decode_one(CpuMode::Protected, &[0x8B, 0x04, 0x25, 0, 0, 0, 0], true);
        assert_eq!(i.length, 7);
        // call rel32
        let i = decode_one(CpuMode::Protected, &[0xE8, 0x10, 0, 0, 0], true);
        assert_eq!(i.length, 5);
        assert_eq!(i.relative_target(), Some(0x15));
        // jmp far ptr16:32
        let i = decode_one(CpuMode::Protected, &[0xEA, 0x00, 0x10, 0, 0, 0x08, 0x00], true);
        assert_eq!(
            i.branch,
            Some(BranchTarget::Far {
                selector: 0x0008,
                offset: 0x1000
            })
        );
    }

    #[test]
    fn relative_branch_targets() {
        let i = decode_one(CpuMode::Real, &[0xEB, 0xFE], false);
        assert_eq!(i.relative_target(), Some(0));
        let i = decode_one(CpuMode::Real, &[0x0F, 0x84, 0x00, 0x01], false);
        assert_eq!(i.flow, InstructionFlow::ConditionalJump);
        assert_eq!(i.relative_target(), Some(0x104));
    }

    #[test]
    fn undefined_opcode_ends_block() {
        let block = decode_block(CpuMode::Real, &[0x90, 0x0F, 0x0B, 0x90, 0x90], 100).unwrap();
        assert_eq!(block.len(), 2);
        assert_eq!(
            block[1].flow,
            InstructionFlow::Invalid(ProcessorException::without_code(ExceptionType::InvalidOpcode))
        );
    }

    #[test]
    fn overlong_prefix_run_raises_gp() {
        let mut bytes = vec![0x66; 16];
        bytes.push(0x90);
        let i = decode_one(CpuMode::Real, &bytes, false);
        assert_eq!(i.length, MAX_INSTRUCTION_LENGTH);
        assert_eq!(i.flow, InstructionFlow::TOO_LONG);
    }

    #[test]
    fn block_respects_limit() {
        let bytes = vec![0x90; 64];
        let block = decode_block(CpuMode::Real, &bytes, 10).unwrap();
        assert_eq!(block.len(), 10);
    }

    #[test]
    fn truncated_after_first_instruction() {
        // nop; mov ax, imm16 cut off
        let block = decode_block(CpuMode::Real, &[0x90, 0xB8, 0x34], 100).unwrap();
        assert_eq!(block.len(), 1);
        // Cut off inside the first instruction
        assert!(decode_block(CpuMode::Real, &[0xB8, 0x34], 100).is_err());
    }

    #[test]
    fn shadow_never_last_at_limit() {
        // nop; sti; nop with a limit of two: the block ends before sti.
        let block = decode_block(CpuMode::Real, &[0x90, 0xFB, 0x90, 0xC3], 2).unwrap();
        assert_eq!(block.len(), 1);
        // With room for the pair, sti and its successor stay together.
        let block = decode_block(CpuMode::Real, &[0x90, 0xFB, 0x90, 0xC3], 3).unwrap();
        assert_eq!(block.len(), 3);
        assert_eq!(block[1].opcode, 0xFB);
    }

    #[test]
    fn shadow_never_last_at_region_end() {
        let block = decode_block(CpuMode::Real, &[0x90, 0x90, 0xFB], 100).unwrap();
        assert_eq!(block.len(), 2);
        // A lone sti whose successor is missing straddles the region end.
        assert!(decode_block(CpuMode::Real, &[0xFB], 100).is_err());
        // sti followed by a terminator ends naturally.
        let block = decode_block(CpuMode::Real, &[0xFB, 0xC3], 100).unwrap();
        assert_eq!(block.len(), 2);
    }

    /// Random code with shadow and terminator opcodes mixed in more often than chance.
    fn random_code(rng: &mut rand::rngs::StdRng, len: usize) -> Vec<u8> {
        use rand::Rng;
        const SEEDED: [u8; 8] = [0xFB, 0x17, 0x8E, 0x90, 0x90, 0xC3, 0xEB, 0x66];
        (0..len)
            .map(|_| match rng.gen_range(0..4) {
                0 => SEEDED[rng.gen_range(0..SEEDED.len())],
                _ => rng.gen(),
            })
            .collect()
    }

    #[test]
    fn random_blocks_respect_limit_and_shadow() {
        use rand::{Rng, SeedableRng};

        let mut rng = rand::rngs::StdRng::seed_from_u64(0xB10C);
        let mut blocks = 0;
        for _ in 0..400 {
            let len = rng.gen_range(1..48);
            let bytes = random_code(&mut rng, len);
            let ram = RamMemory::from_bytes(bytes);
            let start = rng.gen_range(0..len);

            for mode in [CpuMode::Real, CpuMode::Protected, CpuMode::Virtual8086] {
                let default_32 = mode == CpuMode::Protected && rng.gen_bool(0.5);
                for limit in 2..=8 {
                    let mut cursor = ByteCursor::new(&ram, start);
                    let Ok(block) = Decoder::new(mode).decode_block(&mut cursor, default_32, limit)
                    else {
                        continue;
                    };
                    blocks += 1;

                    assert!(!block.is_empty() && block.len() <= limit, "{} instructions, limit {}", block.len(), limit);
                    assert_eq!(block[0].offset, start);
                    for pair in block.windows(2) {
                        assert_eq!(pair[0].next_offset(), pair[1].offset);
                        assert!(!pair[0].flow.is_terminator());
                    }
                    if block.len() > 1 {
                        assert!(!block[block.len() - 1].flow.is_shadow());
                    }
                    assert!(block[block.len() - 1].next_offset() <= len);
                }
            }
        }
        assert!(blocks > 0);
    }

    #[test]
    fn mov_ss_is_a_shadow() {
        let block = decode_block(CpuMode::Real, &[0x8E, 0xD0, 0x89, 0xC4, 0xF4], 100).unwrap();
        assert_eq!(block.len(), 3);
        assert!(block[0].flow.is_shadow());
        assert_eq!(block[2].flow, InstructionFlow::Halt);
    }
}
