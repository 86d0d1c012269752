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

    segment::descriptor.rs

    Bit layouts of 64-bit segment and gate descriptors, and the 5-bit
    descriptor type code (S bit plus type nibble).

*/

use modular_bitfield::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, FromRepr};

/// Mask for the S bit and type nibble of a raw descriptor, bits 40-44.
pub const DESCRIPTOR_TYPE_MASK: u64 = 0x1F << 40;

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct SegmentDescriptor {
    pub limit_low: B16,
    pub base_low: B24,
    pub segment_type: B4,
    pub s: bool,
    pub dpl: B2,
    pub present: bool,
    pub limit_high: B4,
    pub avl: bool,
    pub l: bool,
    pub db: bool,
    pub g: bool,
    pub base_high: B8,
}

impl SegmentDescriptor {
    pub fn from_raw(raw: u64) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }

    pub fn base(&self) -> u32 {
        self.base_low() | ((self.base_high() as u32) << 24)
    }

    pub fn raw_limit(&self) -> u32 {
        self.limit_low() as u32 | ((self.limit_high() as u32) << 16)
    }

    /// The limit in bytes. With the granularity bit set the 20-bit limit counts 4K pages.
    pub fn scaled_limit(&self) -> u32 {
        let raw = self.raw_limit();
        if self.g() {
            (raw << 12) | 0xFFF
        }
        else {
            raw
        }
    }
}

#[bitfield]
#[derive(Copy, Clone, Debug)]
pub struct GateDescriptor {
    pub offset_low: B16,
    pub selector: B16,
    pub param_count: B5,
    #[skip]
    reserved: B3,
    pub gate_type: B4,
    pub s: bool,
    pub dpl: B2,
    pub present: bool,
    pub offset_high: B16,
}

impl GateDescriptor {
    pub fn from_raw(raw: u64) -> Self {
        Self::from_bytes(raw.to_le_bytes())
    }
}

/// The 5-bit type code of a descriptor. Codes 0x00, 0x08, 0x0A and 0x0D are reserved and have
/// no variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromRepr)]
#[repr(u8)]
pub enum DescriptorType {
    #[strum(serialize = "16-bit TSS (Available)")]
    Available16BitTss = 0x01,
    #[strum(serialize = "LDT")]
    Ldt = 0x02,
    #[strum(serialize = "16-bit TSS (Busy)")]
    Busy16BitTss = 0x03,
    #[strum(serialize = "16-bit Call Gate")]
    CallGate16Bit = 0x04,
    #[strum(serialize = "Task Gate")]
    TaskGate = 0x05,
    #[strum(serialize = "16-bit Interrupt Gate")]
    InterruptGate16Bit = 0x06,
    #[strum(serialize = "16-bit Trap Gate")]
    TrapGate16Bit = 0x07,
    #[strum(serialize = "32-bit TSS (Available)")]
    Available32BitTss = 0x09,
    #[strum(serialize = "32-bit TSS (Busy)")]
    Busy32BitTss = 0x0B,
    #[strum(serialize = "32-bit Call Gate")]
    CallGate32Bit = 0x0C,
    #[strum(serialize = "32-bit Interrupt Gate")]
    InterruptGate32Bit = 0x0E,
    #[strum(serialize = "32-bit Trap Gate")]
    TrapGate32Bit = 0x0F,
    #[strum(serialize = "Data Segment: Read-Only")]
    ReadOnlyData = 0x10,
    #[strum(serialize = "Data Segment: Read-Only, Accessed")]
    ReadOnlyAccessedData = 0x11,
    #[strum(serialize = "Data Segment: Read/Write")]
    ReadWriteData = 0x12,
    #[strum(serialize = "Data Segment: Read/Write, Accessed")]
    ReadWriteAccessedData = 0x13,
    #[strum(serialize = "Data Segment: Read-Only, Expand-Down")]
    ReadOnlyExpandDownData = 0x14,
    #[strum(serialize = "Data Segment: Read-Only, Expand-Down, Accessed")]
    ReadOnlyExpandDownAccessedData = 0x15,
    #[strum(serialize = "Data Segment: Read/Write, Expand-Down")]
    ReadWriteExpandDownData = 0x16,
    #[strum(serialize = "Data Segment: Read/Write, Expand-Down, Accessed")]
    ReadWriteExpandDownAccessedData = 0x17,
    #[strum(serialize = "Code Segment: Execute-Only")]
    ExecuteOnlyCode = 0x18,
    #[strum(serialize = "Code Segment: Execute-Only, Accessed")]
    ExecuteOnlyAccessedCode = 0x19,
    #[strum(serialize = "Code Segment: Execute/Read")]
    ExecuteReadCode = 0x1A,
    #[strum(serialize = "Code Segment: Execute/Read, Accessed")]
    ExecuteReadAccessedCode = 0x1B,
    #[strum(serialize = "Code Segment: Execute-Only, Conforming")]
    ExecuteOnlyConformingCode = 0x1C,
    #[strum(serialize = "Code Segment: Execute-Only, Conforming, Accessed")]
    ExecuteOnlyConformingAccessedCode = 0x1D,
    #[strum(serialize = "Code Segment: Execute/Read, Conforming")]
    ExecuteReadConformingCode = 0x1E,
    #[strum(serialize = "Code Segment: Execute/Read, Conforming, Accessed")]
    ExecuteReadConformingAccessedCode = 0x1F,
}

impl DescriptorType {
    /// Extract the type code from bits 40-44 of a raw descriptor.
    pub fn code_of(descriptor: u64) -> u8 {
        ((descriptor & DESCRIPTOR_TYPE_MASK) >> 40) as u8
    }

    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Types that are only decoded under [crate::coreconfig::UnimplementedSegmentPolicy::Emulate].
    pub fn is_unimplemented(&self) -> bool {
        matches!(
            self,
            DescriptorType::ReadOnlyExpandDownData
                | DescriptorType::ReadOnlyExpandDownAccessedData
                | DescriptorType::ReadWriteExpandDownAccessedData
                | DescriptorType::ExecuteOnlyAccessedCode
                | DescriptorType::ExecuteOnlyConformingCode
        )
    }

    pub fn is_system(&self) -> bool {
        self.code() & 0x10 == 0
    }

    pub fn is_gate(&self) -> bool {
        matches!(
            self,
            DescriptorType::CallGate16Bit
                | DescriptorType::TaskGate
                | DescriptorType::InterruptGate16Bit
                | DescriptorType::TrapGate16Bit
                | DescriptorType::CallGate32Bit
                | DescriptorType::InterruptGate32Bit
                | DescriptorType::TrapGate32Bit
        )
    }

    pub fn is_32bit_gate(&self) -> bool {
        matches!(
            self,
            DescriptorType::CallGate32Bit | DescriptorType::InterruptGate32Bit | DescriptorType::TrapGate32Bit
        )
    }

    pub fn is_code(&self) -> bool {
        self.code() & 0x18 == 0x18
    }

    pub fn is_data(&self) -> bool {
        self.code() & 0x18 == 0x10
    }

    pub fn is_conforming(&self) -> bool {
        self.is_code() && self.code() & 0x04 != 0
    }

    pub fn is_expand_down(&self) -> bool {
        self.is_data() && self.code() & 0x04 != 0
    }

    /// Data segments are always readable; code segments only with the R bit.
    pub fn is_readable(&self) -> bool {
        !self.is_code() || self.code() & 0x02 != 0
    }

    pub fn is_writable(&self) -> bool {
        !self.is_code() && (self.is_system() || self.code() & 0x02 != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_flat_code_descriptor() {
        // base 0, limit 0xFFFFF pages, present, DPL 0, 32-bit execute/read code
        let desc = SegmentDescriptor::from_raw(0x00CF_9A00_0000_FFFF);
        assert_eq!(desc.base(), 0);
        assert_eq!(desc.raw_limit(), 0xFFFFF);
        assert_eq!(desc.scaled_limit(), 0xFFFF_FFFF);
        assert!(desc.present());
        assert!(desc.db());
        assert_eq!(desc.dpl(), 0);
        assert_eq!(DescriptorType::code_of(0x00CF_9A00_0000_FFFF), 0x1A);
    }

    #[test]
    fn decode_split_base() {
        let desc = SegmentDescriptor::from_raw(0x1200_F234_5678_0FFF);
        assert_eq!(desc.base(), 0x1234_5678);
        assert_eq!(desc.raw_limit(), 0x0FFF);
        assert_eq!(desc.dpl(), 3);
        assert_eq!(desc.segment_type(), 0x2);
        assert!(desc.s());
    }

    #[test]
    fn decode_gate() {
        // 32-bit call gate, selector 0x0008, offset 0x12345678, 2 params, DPL 3
        let gate = GateDescriptor::from_raw(0x1234_EC02_0008_5678);
        assert_eq!(gate.selector(), 0x0008);
        assert_eq!(gate.offset_low(), 0x5678);
        assert_eq!(gate.offset_high(), 0x1234);
        assert_eq!(gate.param_count(), 2);
        assert_eq!(gate.dpl(), 3);
        assert!(gate.present());
        assert_eq!(DescriptorType::code_of(0x1234_EC02_0008_5678), 0x0C);
    }

    #[test]
    fn reserved_codes_have_no_type() {
        for code in [0x00, 0x08, 0x0A, 0x0D] {
            assert!(DescriptorType::from_repr(code).is_none());
        }
        let implemented = (0..0x20u8).filter_map(DescriptorType::from_repr).count();
        assert_eq!(implemented, 28);
    }

    #[test]
    fn type_properties() {
        assert!(DescriptorType::ExecuteOnlyCode.is_code());
        assert!(!DescriptorType::ExecuteOnlyCode.is_readable());
        assert!(DescriptorType::ExecuteReadConformingCode.is_conforming());
        assert!(DescriptorType::ReadWriteExpandDownData.is_expand_down());
        assert!(DescriptorType::ReadWriteExpandDownData.is_writable());
        assert!(!DescriptorType::ReadOnlyAccessedData.is_writable());
        assert!(DescriptorType::TaskGate.is_gate());
        assert!(DescriptorType::Ldt.is_system());
        assert!(!DescriptorType::Ldt.is_gate());
    }
}
