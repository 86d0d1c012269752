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

    cpu_common::mod.rs

    Types shared by the code block pipeline and the segment model: the CPU
    execution mode, processor exceptions and the core error type.

*/

pub mod error;
pub mod exception;

pub use error::{fatal, EmuError, EmuResult, InternalError};
pub use exception::{ExceptionType, ProcessorException};

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

// Instruction prefixes
pub const OPCODE_PREFIX_0F: u32 = 0b_1000_0000_0000_0000;
pub const OPCODE_PREFIX_ES_OVERRIDE: u32 = 0b_0000_0000_0100;
pub const OPCODE_PREFIX_CS_OVERRIDE: u32 = 0b_0000_0000_1000;
pub const OPCODE_PREFIX_SS_OVERRIDE: u32 = 0b_0000_0001_0000;
pub const OPCODE_PREFIX_DS_OVERRIDE: u32 = 0b_0000_0010_0000;
pub const OPCODE_PREFIX_FS_OVERRIDE: u32 = 0b_0100_0000_0000_0000;
pub const OPCODE_PREFIX_GS_OVERRIDE: u32 = 0b_0010_0000_0000_0000;
pub const OPCODE_SEG_OVERRIDE_MASK: u32 = 0b_0110_0000_0011_1100;
pub const OPCODE_PREFIX_LOCK: u32 = 0b_0000_1000_0000;
pub const OPCODE_PREFIX_REPNE: u32 = 0b_0001_0000_0000;
pub const OPCODE_PREFIX_REP: u32 = 0b_0010_0000_0000;
pub const OPCODE_PREFIX_REPMASK: u32 = 0b_0011_0000_0000;
pub const OPCODE_PREFIX_OPERAND_SIZE: u32 = 0b_0100_0000_0000;
pub const OPCODE_PREFIX_ADDRESS_SIZE: u32 = 0b_1000_0000_0000;

/// The processor mode a code block was decoded for. Each mode has its own factory chain.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum CpuMode {
    #[default]
    #[strum(serialize = "real")]
    Real,
    #[strum(serialize = "protected")]
    Protected,
    #[serde(alias = "v86")]
    #[strum(to_string = "v86", serialize = "virtual8086")]
    Virtual8086,
}

impl CpuMode {
    /// Real and virtual-8086 code is always decoded with 16-bit defaults.
    pub fn default_operand_size_32(&self, cs_default_size: bool) -> bool {
        match self {
            CpuMode::Protected => cs_default_size,
            CpuMode::Real | CpuMode::Virtual8086 => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn cpu_mode_names() {
        assert_eq!(CpuMode::from_str("Protected"), Ok(CpuMode::Protected));
        assert_eq!(CpuMode::from_str("virtual8086"), Ok(CpuMode::Virtual8086));
        assert_eq!(CpuMode::from_str("v86"), Ok(CpuMode::Virtual8086));
        assert_eq!(CpuMode::Virtual8086.to_string(), "v86");
        assert!(CpuMode::from_str("long").is_err());
    }

    #[test]
    fn only_protected_mode_honours_code_size() {
        assert!(CpuMode::Protected.default_operand_size_32(true));
        assert!(!CpuMode::Real.default_operand_size_32(true));
        assert!(!CpuMode::Virtual8086.default_operand_size_32(true));
    }
}
