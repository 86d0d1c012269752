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

    codeblock::opcodes.rs

    Opcode attribute tables. The decoder only needs to know how long an
    instruction is and whether it ends a code block, so each entry records
    whether a ModRM byte follows, what kind of immediate follows, and how
    the instruction affects control flow.

*/

use crate::cpu_common::{CpuMode, ExceptionType, ProcessorException};

pub const MAX_INSTRUCTION_LENGTH: usize = 15;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Immediate {
    None,
    /// Ib, or rel8 for relative branches.
    Byte,
    /// Iw
    Word,
    /// Iw followed by Ib (ENTER)
    WordByte,
    /// Iz: a word or doubleword depending on operand size.
    Full,
    /// Ap: a far pointer, offset by operand size followed by a selector.
    FarPointer,
    /// A memory offset sized by address size (MOV A0-A3).
    MemOffset,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstructionFlow {
    Sequential,
    Jump,
    ConditionalJump,
    Call,
    Return,
    Interrupt,
    Halt,
    /// Instructions that may change the CPU mode or the flags that block decoding depends on.
    ModeChange,
    /// STI, MOV SS and POP SS inhibit interrupts until after the next instruction.
    InterruptShadow,
    Invalid(ProcessorException),
}

impl InstructionFlow {
    pub const UNDEFINED: InstructionFlow =
        InstructionFlow::Invalid(ProcessorException::without_code(ExceptionType::InvalidOpcode));
    pub const TOO_LONG: InstructionFlow = InstructionFlow::Invalid(ProcessorException::GENERAL_PROTECTION_0);

    /// True if a code block must end after this instruction.
    pub fn is_terminator(&self) -> bool {
        !matches!(self, InstructionFlow::Sequential | InstructionFlow::InterruptShadow)
    }

    pub fn is_shadow(&self) -> bool {
        matches!(self, InstructionFlow::InterruptShadow)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OpcodeInfo {
    pub modrm: bool,
    pub immediate: Immediate,
    pub flow: InstructionFlow,
    pub relative: bool,
}

impl OpcodeInfo {
    const fn plain() -> Self {
        Self {
            modrm: false,
            immediate: Immediate::None,
            flow: InstructionFlow::Sequential,
            relative: false,
        }
    }

    const fn modrm() -> Self {
        Self {
            modrm: true,
            ..Self::plain()
        }
    }

    const fn imm(immediate: Immediate) -> Self {
        Self {
            immediate,
            ..Self::plain()
        }
    }

    const fn modrm_imm(immediate: Immediate) -> Self {
        Self {
            modrm: true,
            immediate,
            ..Self::plain()
        }
    }

    const fn flow(mut self, flow: InstructionFlow) -> Self {
        self.flow = flow;
        self
    }

    const fn rel(mut self) -> Self {
        self.relative = true;
        self
    }

    pub const fn undefined() -> Self {
        Self::plain().flow(InstructionFlow::UNDEFINED)
    }
}

pub fn is_prefix(byte: u8) -> bool {
    matches!(
        byte,
        0x26 | 0x2E | 0x36 | 0x3E | 0x64 | 0x65 | 0x66 | 0x67 | 0xF0 | 0xF2 | 0xF3
    )
}

/// Attributes of a single-byte opcode. Prefix bytes and 0x0F are handled by the decoder before
/// this table is consulted.
pub fn one_byte(op: u8) -> OpcodeInfo {
    use Immediate::*;
    use InstructionFlow::*;

    match op {
        0x00..=0x3F => match op & 0x07 {
            0..=3 => OpcodeInfo::modrm(),
            4 => OpcodeInfo::imm(Byte),
            5 => OpcodeInfo::imm(Full),
            _ if op == 0x17 => OpcodeInfo::plain().flow(InterruptShadow),
            _ => OpcodeInfo::plain(),
        },
        0x40..=0x61 => OpcodeInfo::plain(),
        0x62 | 0x63 => OpcodeInfo::modrm(),
        0x64..=0x67 => OpcodeInfo::plain(),
        0x68 => OpcodeInfo::imm(Full),
        0x69 => OpcodeInfo::modrm_imm(Full),
        0x6A => OpcodeInfo::imm(Byte),
        0x6B => OpcodeInfo::modrm_imm(Byte),
        0x6C..=0x6F => OpcodeInfo::plain(),
        0x70..=0x7F => OpcodeInfo::imm(Byte).flow(ConditionalJump).rel(),
        0x80 | 0x82 | 0x83 => OpcodeInfo::modrm_imm(Byte),
        0x81 => OpcodeInfo::modrm_imm(Full),
        0x84..=0x8F => OpcodeInfo::modrm(),
        0x90..=0x99 => OpcodeInfo::plain(),
        0x9A => OpcodeInfo::imm(FarPointer).flow(Call),
        0x9B | 0x9C | 0x9E | 0x9F => OpcodeInfo::plain(),
        0x9D => OpcodeInfo::plain().flow(ModeChange),
        0xA0..=0xA3 => OpcodeInfo::imm(MemOffset),
        0xA4..=0xA7 | 0xAA..=0xAF => OpcodeInfo::plain(),
        0xA8 => OpcodeInfo::imm(Byte),
        0xA9 => OpcodeInfo::imm(Full),
        0xB0..=0xB7 => OpcodeInfo::imm(Byte),
        0xB8..=0xBF => OpcodeInfo::imm(Full),
        0xC0 | 0xC1 | 0xC6 => OpcodeInfo::modrm_imm(Byte),
        0xC2 | 0xCA => OpcodeInfo::imm(Word).flow(Return),
        0xC3 | 0xCB | 0xCF => OpcodeInfo::plain().flow(Return),
        0xC4 | 0xC5 => OpcodeInfo::modrm(),
        0xC7 => OpcodeInfo::modrm_imm(Full),
        0xC8 => OpcodeInfo::imm(WordByte),
        0xC9 => OpcodeInfo::plain(),
        0xCC | 0xCE => OpcodeInfo::plain().flow(Interrupt),
        0xCD => OpcodeInfo::imm(Byte).flow(Interrupt),
        0xD0..=0xD3 => OpcodeInfo::modrm(),
        0xD4 | 0xD5 => OpcodeInfo::imm(Byte),
        0xD6 | 0xD7 => OpcodeInfo::plain(),
        0xD8..=0xDF => OpcodeInfo::modrm(),
        0xE0..=0xE3 => OpcodeInfo::imm(Byte).flow(ConditionalJump).rel(),
        0xE4..=0xE7 => OpcodeInfo::imm(Byte),
        0xE8 => OpcodeInfo::imm(Full).flow(Call).rel(),
        0xE9 => OpcodeInfo::imm(Full).flow(Jump).rel(),
        0xEA => OpcodeInfo::imm(FarPointer).flow(Jump),
        0xEB => OpcodeInfo::imm(Byte).flow(Jump).rel(),
        0xEC..=0xEF => OpcodeInfo::plain(),
        0xF0 | 0xF2 | 0xF3 => OpcodeInfo::plain(),
        0xF1 => OpcodeInfo::plain().flow(Interrupt),
        0xF4 => OpcodeInfo::plain().flow(Halt),
        0xF5 | 0xF8..=0xFA | 0xFC | 0xFD => OpcodeInfo::plain(),
        0xF6 | 0xF7 | 0xFE | 0xFF => OpcodeInfo::modrm(),
        0xFB => OpcodeInfo::plain().flow(InterruptShadow),
    }
}

/// Attributes of a two-byte (0x0F-escaped) opcode, given the second byte.
pub fn two_byte(op: u8) -> OpcodeInfo {
    use Immediate::*;
    use InstructionFlow::*;

    match op {
        0x00..=0x03 => OpcodeInfo::modrm(),
        0x06 | 0x08 | 0x09 => OpcodeInfo::plain(),
        0x20 | 0x21 | 0x23 | 0x24 | 0x26 => OpcodeInfo::modrm(),
        0x22 => OpcodeInfo::modrm().flow(ModeChange),
        0x30..=0x33 => OpcodeInfo::plain(),
        0x40..=0x4F => OpcodeInfo::modrm(),
        0x80..=0x8F => OpcodeInfo::imm(Full).flow(ConditionalJump).rel(),
        0x90..=0x9F => OpcodeInfo::modrm(),
        0xA0..=0xA2 | 0xA8 | 0xA9 => OpcodeInfo::plain(),
        0xAA => OpcodeInfo::plain().flow(ModeChange),
        0xA3 | 0xA5 | 0xAB | 0xAD | 0xAF => OpcodeInfo::modrm(),
        0xA4 | 0xAC | 0xBA => OpcodeInfo::modrm_imm(Byte),
        0xB0..=0xB7 | 0xBB..=0xBF => OpcodeInfo::modrm(),
        0xC0 | 0xC1 | 0xC7 => OpcodeInfo::modrm(),
        0xC8..=0xCF => OpcodeInfo::plain(),
        _ => OpcodeInfo::undefined(),
    }
}

/// MOV to and from control, debug and test registers always treat the ModRM as a register form.
pub fn ignores_modrm_mode(opcode: u16) -> bool {
    matches!(opcode, 0x0F20..=0x0F26)
}

/// Apply the ModRM reg/mod fields (and the CPU mode) to an opcode's attributes. Group opcodes
/// choose their immediate and flow by the reg field; several forms are undefined.
pub fn refine(mode: CpuMode, opcode: u16, modrm: u8, info: OpcodeInfo) -> OpcodeInfo {
    use InstructionFlow::*;

    let reg = (modrm >> 3) & 0x07;
    let register_form = modrm >> 6 == 0x03;
    let protected = matches!(mode, CpuMode::Protected);

    match opcode {
        0x63 if !protected => OpcodeInfo::undefined(),
        0x62 | 0x8D | 0xC4 | 0xC5 if register_form => OpcodeInfo::undefined(),
        0x8C if reg > 5 => OpcodeInfo::undefined(),
        0x8E => match reg {
            1 | 6 | 7 => OpcodeInfo::undefined(),
            2 => info.flow(InterruptShadow),
            _ => info,
        },
        0x8F | 0xC6 | 0xC7 if reg != 0 => OpcodeInfo::undefined(),
        0xF6 if reg < 2 => OpcodeInfo {
            immediate: Immediate::Byte,
            ..info
        },
        0xF7 if reg < 2 => OpcodeInfo {
            immediate: Immediate::Full,
            ..info
        },
        0xFE if reg > 1 => OpcodeInfo::undefined(),
        0xFF => match reg {
            2 => info.flow(Call),
            3 if !register_form => info.flow(Call),
            4 => info.flow(Jump),
            5 if !register_form => info.flow(Jump),
            3 | 5 | 7 => OpcodeInfo::undefined(),
            _ => info,
        },
        0x0F00 if !protected || reg > 5 => OpcodeInfo::undefined(),
        0x0F01 => match reg {
            5 => OpcodeInfo::undefined(),
            6 => info.flow(ModeChange),
            0..=3 | 7 if register_form => OpcodeInfo::undefined(),
            _ => info,
        },
        0x0FB2 | 0x0FB4 | 0x0FB5 if register_form => OpcodeInfo::undefined(),
        0x0FBA if reg < 4 => OpcodeInfo::undefined(),
        0x0FC7 if reg != 1 || register_form => OpcodeInfo::undefined(),
        _ => info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_one_byte_opcode_has_an_entry() {
        for op in 0..=0xFFu8 {
            let info = one_byte(op);
            if info.relative {
                assert!(info.flow.is_terminator(), "relative opcode {:02X} must end a block", op);
            }
        }
    }

    #[test]
    fn shadow_instructions() {
        assert!(one_byte(0xFB).flow.is_shadow());
        assert!(one_byte(0x17).flow.is_shadow());
        assert!(!one_byte(0x1F).flow.is_shadow());
        // MOV SS, AX
        let mov_ss = refine(CpuMode::Real, 0x8E, 0xD0, one_byte(0x8E));
        assert!(mov_ss.flow.is_shadow());
        // MOV DS, AX
        let mov_ds = refine(CpuMode::Real, 0x8E, 0xD8, one_byte(0x8E));
        assert_eq!(mov_ds.flow, InstructionFlow::Sequential);
    }

    #[test]
    fn group_refinement() {
        // TEST r/m8, imm8
        assert_eq!(refine(CpuMode::Real, 0xF6, 0xC0, one_byte(0xF6)).immediate, Immediate::Byte);
        // NOT r/m8
        assert_eq!(refine(CpuMode::Real, 0xF6, 0xD0, one_byte(0xF6)).immediate, Immediate::None);
        // JMP FAR with a register operand is undefined
        assert_eq!(
            refine(CpuMode::Real, 0xFF, 0xE8, one_byte(0xFF)).flow,
            InstructionFlow::UNDEFINED
        );
        assert_eq!(refine(CpuMode::Real, 0xFF, 0x2E, one_byte(0xFF)).flow, InstructionFlow::Jump);
        // ARPL only exists in protected mode
        assert_eq!(
            refine(CpuMode::Virtual8086, 0x63, 0xC0, one_byte(0x63)).flow,
            InstructionFlow::UNDEFINED
        );
        assert_eq!(
            refine(CpuMode::Protected, 0x63, 0xC0, one_byte(0x63)).flow,
            InstructionFlow::Sequential
        );
    }

    #[test]
    fn terminators() {
        for op in [0xC3u8, 0xCB, 0xCF, 0xCD, 0xF4, 0x9D, 0xEA, 0x9A, 0xE2] {
            assert!(one_byte(op).flow.is_terminator(), "{:02X}", op);
        }
        assert!(two_byte(0x22).flow.is_terminator());
        assert!(two_byte(0x84).flow.is_terminator());
        assert!(two_byte(0xAA).flow.is_terminator());
        assert!(two_byte(0x0B).flow.is_terminator());
        assert!(!two_byte(0xB6).flow.is_terminator());
    }
}
