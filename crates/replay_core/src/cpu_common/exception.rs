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

    cpu_common::exception.rs

    Guest-visible processor exceptions. These are raised by segment checks
    and by compiled blocks, and are vectored through the guest interrupt
    mechanism by the CPU driver.

*/

use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum ExceptionType {
    #[strum(serialize = "#DE")]
    DivideError,
    #[strum(serialize = "#DB")]
    Debug,
    #[strum(serialize = "NMI")]
    NonMaskableInterrupt,
    #[strum(serialize = "#BP")]
    Breakpoint,
    #[strum(serialize = "#OF")]
    Overflow,
    #[strum(serialize = "#BR")]
    BoundRange,
    #[strum(serialize = "#UD")]
    InvalidOpcode,
    #[strum(serialize = "#NM")]
    DeviceNotAvailable,
    #[strum(serialize = "#DF")]
    DoubleFault,
    #[strum(serialize = "#TS")]
    InvalidTss,
    #[strum(serialize = "#NP")]
    SegmentNotPresent,
    #[strum(serialize = "#SS")]
    StackSegment,
    #[strum(serialize = "#GP")]
    GeneralProtection,
    #[strum(serialize = "#PF")]
    PageFault,
    #[strum(serialize = "#MF")]
    FloatingPoint,
    #[strum(serialize = "#AC")]
    AlignmentCheck,
}

impl ExceptionType {
    pub const fn vector(&self) -> u8 {
        match self {
            ExceptionType::DivideError => 0,
            ExceptionType::Debug => 1,
            ExceptionType::NonMaskableInterrupt => 2,
            ExceptionType::Breakpoint => 3,
            ExceptionType::Overflow => 4,
            ExceptionType::BoundRange => 5,
            ExceptionType::InvalidOpcode => 6,
            ExceptionType::DeviceNotAvailable => 7,
            ExceptionType::DoubleFault => 8,
            ExceptionType::InvalidTss => 10,
            ExceptionType::SegmentNotPresent => 11,
            ExceptionType::StackSegment => 12,
            ExceptionType::GeneralProtection => 13,
            ExceptionType::PageFault => 14,
            ExceptionType::FloatingPoint => 16,
            ExceptionType::AlignmentCheck => 17,
        }
    }
}

/// A processor exception with its fault class and optional error code.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorException {
    pub kind: ExceptionType,
    pub error_code: u32,
    pub has_error_code: bool,
}

impl ProcessorException {
    pub const GENERAL_PROTECTION_0: ProcessorException =
        ProcessorException::new(ExceptionType::GeneralProtection, 0, true);

    pub const fn new(kind: ExceptionType, error_code: u32, has_error_code: bool) -> Self {
        Self {
            kind,
            error_code,
            has_error_code,
        }
    }

    pub const fn without_code(kind: ExceptionType) -> Self {
        Self::new(kind, 0, false)
    }

    pub const fn general_protection(error_code: u32) -> Self {
        Self::new(ExceptionType::GeneralProtection, error_code, true)
    }

    /// Selector-based faults report the selector with its RPL bits cleared.
    pub const fn general_protection_selector(selector: u16) -> Self {
        Self::general_protection((selector & 0xFFFC) as u32)
    }

    pub const fn segment_not_present(selector: u16) -> Self {
        Self::new(ExceptionType::SegmentNotPresent, (selector & 0xFFFC) as u32, true)
    }

    pub const fn stack_segment(selector: u16) -> Self {
        Self::new(ExceptionType::StackSegment, (selector & 0xFFFC) as u32, true)
    }

    pub const fn vector(&self) -> u8 {
        self.kind.vector()
    }
}

impl fmt::Display for ProcessorException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_error_code {
            write!(f, "{}({:#X}) [vector {}]", self.kind, self.error_code, self.vector())
        }
        else {
            write!(f, "{} [vector {}]", self.kind, self.vector())
        }
    }
}

impl std::error::Error for ProcessorException {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_faults_clear_rpl() {
        let gp = ProcessorException::general_protection_selector(0x002B);
        assert_eq!(gp.error_code, 0x0028);
        assert!(gp.has_error_code);
        assert_eq!(gp.vector(), 13);

        let np = ProcessorException::segment_not_present(0x0013);
        assert_eq!(np.kind, ExceptionType::SegmentNotPresent);
        assert_eq!(np.error_code, 0x0010);
    }

    #[test]
    fn display_includes_mnemonic() {
        assert_eq!(ProcessorException::GENERAL_PROTECTION_0.to_string(), "#GP(0x0) [vector 13]");
        let ud = ProcessorException::without_code(ExceptionType::InvalidOpcode);
        assert_eq!(ud.to_string(), "#UD [vector 6]");
    }
}
