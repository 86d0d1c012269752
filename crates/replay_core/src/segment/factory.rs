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

    segment::factory.rs

    Segment construction for each CPU mode. Protected mode segments are
    dispatched on the 5-bit descriptor type code.

*/

use crate::{
    coreconfig::UnimplementedSegmentPolicy,
    cpu_common::{fatal, EmuResult, InternalError, ProcessorException},
    memory::AddressSpaceId,
    segment::{
        descriptor::{DescriptorType, GateDescriptor, SegmentDescriptor},
        DescriptorSegment,
        GateSegment,
        Segment,
        SegmentKind,
    },
};

pub fn create_real_mode_segment(space: AddressSpaceId, selector: u16) -> Segment {
    Segment::new(space, selector, SegmentKind::RealMode {
        base: (selector as u32) << 4,
    })
}

pub fn create_virtual8086_mode_segment(space: AddressSpaceId, selector: u16, is_code: bool) -> Segment {
    let mut segment = Segment::new(space, selector, SegmentKind::Virtual8086 {
        base: (selector as u32) << 4,
        is_code,
    });
    // Virtual-8086 code always runs at privilege level 3.
    segment.rpl = 3;
    segment
}

/// A segment covering the GDT or IDT, as loaded by LGDT/LIDT.
pub fn create_descriptor_table_segment(space: AddressSpaceId, base: u32, limit: u32) -> Segment {
    Segment::new(space, 0, SegmentKind::DescriptorTable { base, limit })
}

/// Decode a raw 64-bit descriptor into a segment.
///
/// Reserved type codes raise #GP(0). The expand-down read-only and accessed code types are only
/// decoded when `policy` is [UnimplementedSegmentPolicy::Emulate].
pub fn create_protected_mode_segment(
    space: AddressSpaceId,
    selector: u16,
    descriptor: u64,
    policy: UnimplementedSegmentPolicy,
) -> EmuResult<Segment> {
    let code = DescriptorType::code_of(descriptor);
    let Some(descriptor_type) = DescriptorType::from_repr(code)
    else {
        log::debug!("Reserved descriptor type {:02X} for selector {:04X}", code, selector);
        return Err(ProcessorException::GENERAL_PROTECTION_0.into());
    };

    if descriptor_type.is_unimplemented() && policy == UnimplementedSegmentPolicy::Fatal {
        return Err(fatal(InternalError::UnimplementedSegmentType(descriptor_type)));
    }

    let kind = if descriptor_type.is_gate() {
        let gate = GateDescriptor::from_raw(descriptor);
        let target_offset = if descriptor_type.is_32bit_gate() {
            gate.offset_low() as u32 | ((gate.offset_high() as u32) << 16)
        }
        else {
            gate.offset_low() as u32
        };
        SegmentKind::Gate(GateSegment {
            descriptor_type,
            target_selector: gate.selector(),
            target_offset,
            parameter_count: gate.param_count(),
            dpl: gate.dpl(),
            present: gate.present(),
            descriptor,
        })
    }
    else {
        let raw = SegmentDescriptor::from_raw(descriptor);
        SegmentKind::Descriptor(DescriptorSegment {
            descriptor_type,
            base: raw.base(),
            raw_limit: raw.raw_limit(),
            limit: raw.scaled_limit(),
            dpl: raw.dpl(),
            present: raw.present(),
            default_size_32: raw.db(),
            granularity: raw.g(),
            available: raw.avl(),
            descriptor,
        })
    };

    Ok(Segment::new(space, selector, kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_common::EmuError;

    const FATAL: UnimplementedSegmentPolicy = UnimplementedSegmentPolicy::Fatal;
    const EMULATE: UnimplementedSegmentPolicy = UnimplementedSegmentPolicy::Emulate;

    fn with_type(code: u8) -> u64 {
        // present, limit 0xFFFF, base 0
        0x0000_8000_0000_FFFF | ((code as u64) << 40)
    }

    #[test]
    fn reserved_codes_raise_gp() {
        for code in [0x00u8, 0x08, 0x0A, 0x0D] {
            for policy in [FATAL, EMULATE] {
                let result = create_protected_mode_segment(AddressSpaceId(0), 0x08, with_type(code), policy);
                assert_eq!(
                    result,
                    Err(EmuError::Exception(ProcessorException::GENERAL_PROTECTION_0)),
                    "type {:02X}",
                    code
                );
            }
        }
    }

    #[test]
    fn unimplemented_codes_follow_policy() {
        for code in [0x14u8, 0x15, 0x17, 0x19, 0x1C] {
            let err = create_protected_mode_segment(AddressSpaceId(0), 0x08, with_type(code), FATAL).unwrap_err();
            assert!(
                matches!(err, EmuError::Internal(InternalError::UnimplementedSegmentType(t)) if t.code() == code)
            );
            let seg = create_protected_mode_segment(AddressSpaceId(0), 0x08, with_type(code), EMULATE).unwrap();
            assert_eq!(seg.type_code(), Ok(code));
        }
    }

    #[test]
    fn every_implemented_code_decodes() {
        for code in 0x01..0x20u8 {
            if matches!(code, 0x08 | 0x0A | 0x0D | 0x14 | 0x15 | 0x17 | 0x19 | 0x1C) {
                continue;
            }
            let seg = create_protected_mode_segment(AddressSpaceId(0), 0x08, with_type(code), FATAL).unwrap();
            assert_eq!(seg.type_code(), Ok(code));
            assert_eq!(seg.is_system(), code < 0x10);
        }
    }

    #[test]
    fn emulated_read_only_expand_down() {
        let seg = create_protected_mode_segment(AddressSpaceId(0), 0x10, with_type(0x14) & !0xFFFF, EMULATE).unwrap();
        assert!(seg.translate_address_read(0x10).is_ok());
        assert!(seg.translate_address_write(0x10).is_err());
    }

    #[test]
    fn emulated_execute_only_code() {
        use crate::segment::Access;
        let gp0 = || EmuError::Exception(ProcessorException::GENERAL_PROTECTION_0);

        for code in [0x19u8, 0x1C] {
            // base 0x1000, limit 0xFFFF, DPL 0
            let descriptor = with_type(code) | (0x1000u64 << 16);
            let mut seg = create_protected_mode_segment(AddressSpaceId(0), 0x08, descriptor, EMULATE).unwrap();
            assert_eq!(seg.translate_address_execute(0x10), Ok(0x1010), "type {:02X}", code);
            assert_eq!(seg.translate(0xFFFE, 2, Access::Execute), Ok(0x10FFE));
            assert_eq!(seg.translate(0xFFFF, 2, Access::Execute), Err(gp0()));
            assert_eq!(seg.translate_address_read(0x10), Err(gp0()));
            assert_eq!(seg.translate_address_write(0x10), Err(gp0()));

            seg.set_rpl(3).unwrap();
            let fetched = seg.translate_address_execute(0x10);
            if code == 0x1C {
                // Conforming code ignores RPL.
                assert_eq!(fetched, Ok(0x1010));
            }
            else {
                assert_eq!(
                    fetched,
                    Err(EmuError::Exception(ProcessorException::general_protection_selector(0x0B)))
                );
            }
        }
    }

    #[test]
    fn sixteen_bit_gate_ignores_high_offset() {
        let seg = create_protected_mode_segment(AddressSpaceId(0), 0x20, 0x1234_8400_0010_5678, FATAL).unwrap();
        assert_eq!(seg.gate_target(), Some((0x0010, 0x5678, 0)));
        assert_eq!(seg.default_size_32(), Ok(false));
    }

    #[test]
    fn virtual8086_segments_run_at_ring_3() {
        let seg = create_virtual8086_mode_segment(AddressSpaceId(0), 0xB800, false);
        assert_eq!(seg.base(), Ok(0xB8000));
        assert_eq!(seg.rpl(), Ok(3));
        assert_eq!(seg.dpl(), Ok(3));
        assert_eq!(seg.limit(), Ok(0xFFFF));
    }

    #[test]
    fn descriptor_table_segment() {
        let seg = create_descriptor_table_segment(AddressSpaceId(0), 0x8000, 0x17);
        assert_eq!(seg.translate(0x10, 8, crate::segment::Access::Read), Ok(0x8010));
        assert!(seg.translate(0x18, 1, crate::segment::Access::Read).is_err());
    }
}
