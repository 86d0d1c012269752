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

    segment::mod.rs

    Segments mediate every addressed guest memory access. A Segment is a
    closed set of variants: the NULL segment, real mode and virtual-8086
    segments, descriptor table segments (GDTR/IDTR), and protected mode
    segments decoded from a descriptor. Each access is translated to a
    linear address through limit, privilege and presence checks before the
    backing address space is touched.

*/

pub mod descriptor;
pub mod factory;
pub mod load;

use serde::{Deserialize, Serialize};

pub use descriptor::{DescriptorType, GateDescriptor, SegmentDescriptor};
pub use factory::{
    create_descriptor_table_segment,
    create_protected_mode_segment,
    create_real_mode_segment,
    create_virtual8086_mode_segment,
};
pub use load::{DescriptorTables, SegmentLoader};

use crate::{
    cpu_common::{fatal, EmuResult, InternalError, ProcessorException},
    memory::{AddressSpaceId, AddressSpaceTable, Memory, MemoryDispatch},
};

pub const REAL_MODE_LIMIT: u32 = 0xFFFF;

/// A protected mode code, data or system segment decoded from a descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorSegment {
    pub descriptor_type: DescriptorType,
    pub base: u32,
    pub raw_limit: u32,
    /// Limit after granularity scaling.
    pub limit: u32,
    pub dpl: u8,
    pub present: bool,
    pub default_size_32: bool,
    pub granularity: bool,
    pub available: bool,
    pub descriptor: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateSegment {
    pub descriptor_type: DescriptorType,
    pub target_selector: u16,
    pub target_offset: u32,
    pub parameter_count: u8,
    pub dpl: u8,
    pub present: bool,
    pub descriptor: u64,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    Null,
    RealMode { base: u32 },
    Virtual8086 { base: u32, is_code: bool },
    DescriptorTable { base: u32, limit: u32 },
    Descriptor(DescriptorSegment),
    Gate(GateSegment),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    space: AddressSpaceId,
    selector: u16,
    rpl: u8,
    kind: SegmentKind,
}

/// The NULL segment. It reports itself present and not a system segment; every translation
/// raises #GP(0).
pub const NULL_SEGMENT: Segment = Segment {
    space: AddressSpaceId(0),
    selector: 0,
    rpl: 0,
    kind: SegmentKind::Null,
};

impl Segment {
    pub(crate) fn new(space: AddressSpaceId, selector: u16, kind: SegmentKind) -> Self {
        Self {
            space,
            selector,
            rpl: (selector & 0x03) as u8,
            kind,
        }
    }

    pub fn kind(&self) -> &SegmentKind {
        &self.kind
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, SegmentKind::Null)
    }

    pub fn address_space(&self) -> AddressSpaceId {
        self.space
    }

    /// Retarget the segment at another address space.
    pub fn set_address_space(&mut self, space: AddressSpaceId) {
        self.space = space;
    }

    pub fn selector(&self) -> u16 {
        self.selector
    }

    pub fn is_present(&self) -> bool {
        match &self.kind {
            SegmentKind::Descriptor(d) => d.present,
            SegmentKind::Gate(g) => g.present,
            _ => true,
        }
    }

    pub fn is_system(&self) -> bool {
        match &self.kind {
            SegmentKind::Descriptor(d) => d.descriptor_type.is_system(),
            SegmentKind::Gate(_) => true,
            _ => false,
        }
    }

    /// The 5-bit descriptor type code. Real mode segments behave as read/write accessed data
    /// and virtual-8086 code segments as execute/read accessed code.
    pub fn type_code(&self) -> EmuResult<u8> {
        match &self.kind {
            SegmentKind::Null => Err(ProcessorException::GENERAL_PROTECTION_0.into()),
            SegmentKind::RealMode { .. } | SegmentKind::DescriptorTable { .. } => {
                Ok(DescriptorType::ReadWriteAccessedData.code())
            }
            SegmentKind::Virtual8086 { is_code, .. } => Ok(if *is_code {
                DescriptorType::ExecuteReadAccessedCode.code()
            }
            else {
                DescriptorType::ReadWriteAccessedData.code()
            }),
            SegmentKind::Descriptor(d) => Ok(d.descriptor_type.code()),
            SegmentKind::Gate(g) => Ok(g.descriptor_type.code()),
        }
    }

    pub fn descriptor_type(&self) -> Option<DescriptorType> {
        match &self.kind {
            SegmentKind::Descriptor(d) => Some(d.descriptor_type),
            SegmentKind::Gate(g) => Some(g.descriptor_type),
            _ => None,
        }
    }

    pub fn base(&self) -> EmuResult<u32> {
        match &self.kind {
            SegmentKind::Null => Err(fatal(InternalError::NullSegment("base"))),
            SegmentKind::RealMode { base }
            | SegmentKind::Virtual8086 { base, .. }
            | SegmentKind::DescriptorTable { base, .. } => Ok(*base),
            SegmentKind::Descriptor(d) => Ok(d.base),
            SegmentKind::Gate(_) => Err(fatal(InternalError::GateNotAddressable("base"))),
        }
    }

    /// The effective limit in bytes.
    pub fn limit(&self) -> EmuResult<u32> {
        match &self.kind {
            SegmentKind::Null => Err(fatal(InternalError::NullSegment("limit"))),
            SegmentKind::RealMode { .. } | SegmentKind::Virtual8086 { .. } => Ok(REAL_MODE_LIMIT),
            SegmentKind::DescriptorTable { limit, .. } => Ok(*limit),
            SegmentKind::Descriptor(d) => Ok(d.limit),
            SegmentKind::Gate(_) => Err(fatal(InternalError::GateNotAddressable("limit"))),
        }
    }

    /// The limit field as stored in the descriptor, before granularity scaling.
    pub fn raw_limit(&self) -> EmuResult<u32> {
        match &self.kind {
            SegmentKind::Descriptor(d) => Ok(d.raw_limit),
            SegmentKind::Null => Err(fatal(InternalError::NullSegment("raw_limit"))),
            _ => self.limit(),
        }
    }

    pub fn dpl(&self) -> EmuResult<u8> {
        match &self.kind {
            SegmentKind::Null => Err(fatal(InternalError::NullSegment("dpl"))),
            SegmentKind::RealMode { .. } | SegmentKind::DescriptorTable { .. } => Ok(0),
            SegmentKind::Virtual8086 { .. } => Ok(3),
            SegmentKind::Descriptor(d) => Ok(d.dpl),
            SegmentKind::Gate(g) => Ok(g.dpl),
        }
    }

    pub fn rpl(&self) -> EmuResult<u8> {
        match &self.kind {
            SegmentKind::Null => Err(fatal(InternalError::NullSegment("rpl"))),
            _ => Ok(self.rpl),
        }
    }

    pub fn set_rpl(&mut self, rpl: u8) -> EmuResult<()> {
        match &self.kind {
            SegmentKind::Null => Err(fatal(InternalError::NullSegment("set_rpl"))),
            _ => {
                self.rpl = rpl & 0x03;
                self.selector = (self.selector & 0xFFFC) | self.rpl as u16;
                Ok(())
            }
        }
    }

    /// The D/B flag. Real mode and virtual-8086 segments are always 16-bit.
    pub fn default_size_32(&self) -> EmuResult<bool> {
        match &self.kind {
            SegmentKind::Null => Err(fatal(InternalError::NullSegment("default_size_32"))),
            SegmentKind::RealMode { .. } | SegmentKind::Virtual8086 { .. } | SegmentKind::DescriptorTable { .. } => {
                Ok(false)
            }
            SegmentKind::Descriptor(d) => Ok(d.default_size_32),
            SegmentKind::Gate(g) => Ok(g.descriptor_type.is_32bit_gate()),
        }
    }

    /// Gate target as (selector, offset, parameter count).
    pub fn gate_target(&self) -> Option<(u16, u32, u8)> {
        match &self.kind {
            SegmentKind::Gate(g) => Some((g.target_selector, g.target_offset, g.parameter_count)),
            _ => None,
        }
    }

    /// Check that `offset` lies within the segment limit.
    pub fn check_address(&self, offset: u32) -> EmuResult<()> {
        match &self.kind {
            SegmentKind::Null => Err(ProcessorException::GENERAL_PROTECTION_0.into()),
            SegmentKind::Gate(_) => Err(ProcessorException::general_protection_selector(self.selector).into()),
            _ => self.check_limit(offset, 1),
        }
    }

    fn check_limit(&self, offset: u32, size: u32) -> EmuResult<()> {
        // A zero-byte access touches nothing and is always within the limit.
        let Some(span) = size.checked_sub(1)
        else {
            return Ok(());
        };
        let last = offset.checked_add(span);
        let in_range = match (&self.kind, last) {
            (_, None) => false,
            (SegmentKind::Descriptor(d), Some(last)) if d.descriptor_type.is_expand_down() => {
                // Expand-down segments cover (limit, upper].
                let upper = if d.default_size_32 { 0xFFFF_FFFF } else { 0xFFFF };
                offset > d.limit && last <= upper
            }
            (_, Some(last)) => match self.limit() {
                Ok(limit) => last <= limit,
                Err(_) => false,
            },
        };
        if in_range {
            Ok(())
        }
        else {
            log::trace!(
                "Segment {:04X} limit violation at offset {:08X} size {}",
                self.selector,
                offset,
                size
            );
            Err(ProcessorException::GENERAL_PROTECTION_0.into())
        }
    }

    /// Translate `size` bytes at `offset` to a linear address for the given kind of access.
    pub fn translate(&self, offset: u32, size: u32, access: Access) -> EmuResult<u32> {
        match &self.kind {
            SegmentKind::Null => Err(ProcessorException::GENERAL_PROTECTION_0.into()),
            SegmentKind::Gate(_) => Err(ProcessorException::general_protection_selector(self.selector).into()),
            SegmentKind::RealMode { base }
            | SegmentKind::Virtual8086 { base, .. }
            | SegmentKind::DescriptorTable { base, .. } => {
                self.check_limit(offset, size)?;
                Ok(base.wrapping_add(offset))
            }
            SegmentKind::Descriptor(d) => {
                if !d.present {
                    return Err(ProcessorException::segment_not_present(self.selector).into());
                }
                let kind = d.descriptor_type;
                if !kind.is_system() && !kind.is_conforming() && self.rpl > d.dpl {
                    return Err(ProcessorException::general_protection_selector(self.selector).into());
                }
                let permitted = match access {
                    Access::Read => kind.is_readable(),
                    Access::Write => kind.is_writable(),
                    Access::Execute => kind.is_code(),
                };
                if !permitted {
                    log::trace!("{:?} of {} segment {:04X} denied", access, kind, self.selector);
                    return Err(ProcessorException::GENERAL_PROTECTION_0.into());
                }
                self.check_limit(offset, size)?;
                Ok(d.base.wrapping_add(offset))
            }
        }
    }

    pub fn translate_address_read(&self, offset: u32) -> EmuResult<u32> {
        self.translate(offset, 1, Access::Read)
    }

    pub fn translate_address_write(&self, offset: u32) -> EmuResult<u32> {
        self.translate(offset, 1, Access::Write)
    }

    pub fn translate_address_execute(&self, offset: u32) -> EmuResult<u32> {
        self.translate(offset, 1, Access::Execute)
    }

    fn memory<'a>(&self, spaces: &'a AddressSpaceTable) -> EmuResult<&'a MemoryDispatch> {
        spaces.get(self.space)
    }

    fn memory_mut<'a>(&self, spaces: &'a mut AddressSpaceTable) -> EmuResult<&'a mut MemoryDispatch> {
        spaces.get_mut(self.space)
    }

    pub fn get_byte(&self, spaces: &AddressSpaceTable, offset: u32) -> EmuResult<u8> {
        let address = self.translate(offset, 1, Access::Read)?;
        Ok(self.memory(spaces)?.get_byte(address))
    }

    pub fn get_word(&self, spaces: &AddressSpaceTable, offset: u32) -> EmuResult<u16> {
        let address = self.translate(offset, 2, Access::Read)?;
        Ok(self.memory(spaces)?.get_word(address))
    }

    pub fn get_doubleword(&self, spaces: &AddressSpaceTable, offset: u32) -> EmuResult<u32> {
        let address = self.translate(offset, 4, Access::Read)?;
        Ok(self.memory(spaces)?.get_doubleword(address))
    }

    /// Quadwords are accessed as two doublewords, each translated on its own.
    pub fn get_quadword(&self, spaces: &AddressSpaceTable, offset: u32) -> EmuResult<u64> {
        let low = self.translate(offset, 4, Access::Read)?;
        let high = self.translate(offset.wrapping_add(4), 4, Access::Read)?;
        let memory = self.memory(spaces)?;
        Ok(memory.get_doubleword(low) as u64 | ((memory.get_doubleword(high) as u64) << 32))
    }

    pub fn set_byte(&self, spaces: &mut AddressSpaceTable, offset: u32, data: u8) -> EmuResult<()> {
        let address = self.translate(offset, 1, Access::Write)?;
        self.memory_mut(spaces)?.set_byte(address, data);
        Ok(())
    }

    pub fn set_word(&self, spaces: &mut AddressSpaceTable, offset: u32, data: u16) -> EmuResult<()> {
        let address = self.translate(offset, 2, Access::Write)?;
        self.memory_mut(spaces)?.set_word(address, data);
        Ok(())
    }

    pub fn set_doubleword(&self, spaces: &mut AddressSpaceTable, offset: u32, data: u32) -> EmuResult<()> {
        let address = self.translate(offset, 4, Access::Write)?;
        self.memory_mut(spaces)?.set_doubleword(address, data);
        Ok(())
    }

    /// Both halves are translated before either is written.
    pub fn set_quadword(&self, spaces: &mut AddressSpaceTable, offset: u32, data: u64) -> EmuResult<()> {
        let low = self.translate(offset, 4, Access::Write)?;
        let high = self.translate(offset.wrapping_add(4), 4, Access::Write)?;
        let memory = self.memory_mut(spaces)?;
        memory.set_doubleword(low, data as u32);
        memory.set_doubleword(high, (data >> 32) as u32);
        Ok(())
    }
}
