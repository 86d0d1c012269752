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

    segment::load.rs

    Descriptor fetch and the protection checks made when a selector is
    loaded into a segment register in protected mode.

*/

use crate::{
    coreconfig::UnimplementedSegmentPolicy,
    cpu_common::{EmuResult, ProcessorException},
    memory::AddressSpaceTable,
    segment::{create_protected_mode_segment, Segment, NULL_SEGMENT},
};

/// The descriptor tables a selector may index. `ldt` is the NULL segment when no LDT is loaded.
#[derive(Copy, Clone, Debug)]
pub struct DescriptorTables {
    pub gdt: Segment,
    pub ldt: Segment,
}

impl DescriptorTables {
    pub fn new(gdt: Segment) -> Self {
        Self { gdt, ldt: NULL_SEGMENT }
    }

    pub fn with_ldt(mut self, ldt: Segment) -> Self {
        self.ldt = ldt;
        self
    }
}

fn is_null_selector(selector: u16) -> bool {
    selector & 0xFFFC == 0
}

pub struct SegmentLoader {
    policy: UnimplementedSegmentPolicy,
}

impl SegmentLoader {
    pub fn new(policy: UnimplementedSegmentPolicy) -> Self {
        Self { policy }
    }

    /// Read the raw descriptor for `selector` from the GDT, or the LDT if the TI bit is set.
    pub fn fetch_descriptor(
        &self,
        spaces: &AddressSpaceTable,
        tables: &DescriptorTables,
        selector: u16,
    ) -> EmuResult<u64> {
        let table = if selector & 0x04 != 0 { &tables.ldt } else { &tables.gdt };
        let gp = ProcessorException::general_protection_selector(selector);
        if table.is_null() {
            return Err(gp.into());
        }

        let offset = (selector & 0xFFF8) as u32;
        if table.check_address(offset + 7).is_err() {
            log::trace!("Selector {:04X} beyond descriptor table limit", selector);
            return Err(gp.into());
        }
        table.get_quadword(spaces, offset).map_err(|e| if e.is_fatal() { e } else { gp.into() })
    }

    fn fetch_segment(
        &self,
        spaces: &AddressSpaceTable,
        tables: &DescriptorTables,
        selector: u16,
    ) -> EmuResult<Segment> {
        let descriptor = self.fetch_descriptor(spaces, tables, selector)?;
        let space = tables.gdt.address_space();
        create_protected_mode_segment(space, selector, descriptor, self.policy)
    }

    /// Load DS, ES, FS or GS. A null selector yields the NULL segment.
    pub fn load_data_segment(
        &self,
        spaces: &AddressSpaceTable,
        tables: &DescriptorTables,
        selector: u16,
        cpl: u8,
    ) -> EmuResult<Segment> {
        if is_null_selector(selector) {
            return Ok(NULL_SEGMENT);
        }
        let gp = ProcessorException::general_protection_selector(selector);
        let segment = self.fetch_segment(spaces, tables, selector)?;
        let Some(kind) = segment.descriptor_type()
        else {
            return Err(gp.into());
        };

        if kind.is_system() || (kind.is_code() && !kind.is_readable()) {
            return Err(gp.into());
        }
        if !kind.is_conforming() {
            let effective = cpl.max(segment.rpl()?);
            if segment.dpl()? < effective {
                return Err(gp.into());
            }
        }
        if !segment.is_present() {
            return Err(ProcessorException::segment_not_present(selector).into());
        }
        Ok(segment)
    }

    /// Load SS. The segment must be a present, writable data segment at the current privilege level.
    pub fn load_stack_segment(
        &self,
        spaces: &AddressSpaceTable,
        tables: &DescriptorTables,
        selector: u16,
        cpl: u8,
    ) -> EmuResult<Segment> {
        if is_null_selector(selector) {
            return Err(ProcessorException::GENERAL_PROTECTION_0.into());
        }
        let gp = ProcessorException::general_protection_selector(selector);
        if (selector & 0x03) as u8 != cpl {
            return Err(gp.into());
        }
        let segment = self.fetch_segment(spaces, tables, selector)?;
        match segment.descriptor_type() {
            Some(kind) if kind.is_data() && kind.is_writable() => {}
            _ => return Err(gp.into()),
        }
        if segment.dpl()? != cpl {
            return Err(gp.into());
        }
        if !segment.is_present() {
            return Err(ProcessorException::stack_segment(selector).into());
        }
        Ok(segment)
    }

    /// Load CS for a direct far jump or call to a code segment at the same privilege level.
    /// The returned segment carries the current privilege level as its RPL.
    pub fn load_code_segment(
        &self,
        spaces: &AddressSpaceTable,
        tables: &DescriptorTables,
        selector: u16,
        cpl: u8,
    ) -> EmuResult<Segment> {
        if is_null_selector(selector) {
            return Err(ProcessorException::GENERAL_PROTECTION_0.into());
        }
        let gp = ProcessorException::general_protection_selector(selector);
        let mut segment = self.fetch_segment(spaces, tables, selector)?;
        let Some(kind) = segment.descriptor_type()
        else {
            return Err(gp.into());
        };
        if !kind.is_code() {
            return Err(gp.into());
        }

        let dpl = segment.dpl()?;
        if kind.is_conforming() {
            if dpl > cpl {
                return Err(gp.into());
            }
        }
        else if dpl != cpl || segment.rpl()? > cpl {
            return Err(gp.into());
        }
        if !segment.is_present() {
            return Err(ProcessorException::segment_not_present(selector).into());
        }
        segment.set_rpl(cpl)?;
        Ok(segment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cpu_common::ExceptionType,
        memory::{AddressSpaceId, RamMemory},
        segment::create_descriptor_table_segment,
    };

    const GDT_BASE: u32 = 0x1000;

    // GDT layout used by these tests.
    const DESCRIPTORS: [u64; 8] = [
        0,
        0x00CF_9A00_0000_FFFF, // 0x08: ring 0 code, execute/read
        0x00CF_9200_0000_FFFF, // 0x10: ring 0 data, read/write
        0x00CF_F200_0000_FFFF, // 0x18: ring 3 data, read/write
        0x00CF_9800_0000_FFFF, // 0x20: ring 0 code, execute-only
        0x00CF_1200_0000_FFFF, // 0x28: ring 0 data, not present
        0x00CF_9E00_0000_FFFF, // 0x30: ring 0 conforming code, execute/read
        0x00CF_9000_0000_FFFF, // 0x38: ring 0 data, read-only
    ];

    fn setup() -> (AddressSpaceTable, DescriptorTables) {
        let mut ram = RamMemory::new(0x10000);
        for (i, descriptor) in DESCRIPTORS.iter().enumerate() {
            ram.copy_from(&descriptor.to_le_bytes(), GDT_BASE as usize + i * 8).unwrap();
        }
        let mut spaces = AddressSpaceTable::new();
        let space = spaces.insert(ram);
        let gdt = create_descriptor_table_segment(space, GDT_BASE, (DESCRIPTORS.len() * 8 - 1) as u32);
        (spaces, DescriptorTables::new(gdt))
    }

    fn loader() -> SegmentLoader {
        SegmentLoader::new(UnimplementedSegmentPolicy::Fatal)
    }

    fn kind_of<T: std::fmt::Debug>(result: EmuResult<T>) -> ExceptionType {
        result.unwrap_err().exception().unwrap().kind
    }

    #[test]
    fn fetch_checks_table_limit() {
        let (spaces, tables) = setup();
        assert_eq!(loader().fetch_descriptor(&spaces, &tables, 0x10), Ok(DESCRIPTORS[2]));
        assert_eq!(
            loader().fetch_descriptor(&spaces, &tables, 0x40),
            Err(ProcessorException::general_protection_selector(0x40).into())
        );
        // TI set with no LDT loaded
        assert_eq!(
            loader().fetch_descriptor(&spaces, &tables, 0x0C),
            Err(ProcessorException::general_protection_selector(0x0C).into())
        );
    }

    #[test]
    fn fetch_from_ldt() {
        let (spaces, tables) = setup();
        let ldt = create_descriptor_table_segment(AddressSpaceId(0), GDT_BASE + 0x08, 0x0F);
        let tables = tables.with_ldt(ldt);
        // LDT index 1 is GDT entry 2
        assert_eq!(loader().fetch_descriptor(&spaces, &tables, 0x0C), Ok(DESCRIPTORS[2]));
    }

    #[test]
    fn data_segment_loads() {
        let (spaces, tables) = setup();
        let loader = loader();
        assert!(loader.load_data_segment(&spaces, &tables, 0x0000, 0).unwrap().is_null());
        assert_eq!(loader.load_data_segment(&spaces, &tables, 0x10, 0).unwrap().base(), Ok(0));
        // Readable code may be loaded into a data segment register.
        assert!(loader.load_data_segment(&spaces, &tables, 0x08, 0).is_ok());
        // Execute-only code may not.
        assert_eq!(kind_of(loader.load_data_segment(&spaces, &tables, 0x20, 0)), ExceptionType::GeneralProtection);
        // Ring 0 data from ring 3
        assert_eq!(kind_of(loader.load_data_segment(&spaces, &tables, 0x13, 3)), ExceptionType::GeneralProtection);
        assert!(loader.load_data_segment(&spaces, &tables, 0x1B, 3).is_ok());
        // Conforming code skips the privilege check
        assert!(loader.load_data_segment(&spaces, &tables, 0x33, 3).is_ok());
        assert_eq!(kind_of(loader.load_data_segment(&spaces, &tables, 0x28, 0)), ExceptionType::SegmentNotPresent);
    }

    #[test]
    fn stack_segment_loads() {
        let (spaces, tables) = setup();
        let loader = loader();
        assert_eq!(
            loader.load_stack_segment(&spaces, &tables, 0x0000, 0),
            Err(ProcessorException::GENERAL_PROTECTION_0.into())
        );
        assert!(loader.load_stack_segment(&spaces, &tables, 0x10, 0).is_ok());
        // RPL must equal CPL
        assert_eq!(kind_of(loader.load_stack_segment(&spaces, &tables, 0x13, 0)), ExceptionType::GeneralProtection);
        // Read-only data
        assert_eq!(kind_of(loader.load_stack_segment(&spaces, &tables, 0x38, 0)), ExceptionType::GeneralProtection);
        // Code
        assert_eq!(kind_of(loader.load_stack_segment(&spaces, &tables, 0x08, 0)), ExceptionType::GeneralProtection);
        // DPL must equal CPL
        assert_eq!(kind_of(loader.load_stack_segment(&spaces, &tables, 0x13, 3)), ExceptionType::GeneralProtection);
        assert_eq!(kind_of(loader.load_stack_segment(&spaces, &tables, 0x28, 0)), ExceptionType::StackSegment);
    }

    #[test]
    fn code_segment_loads() {
        let (spaces, tables) = setup();
        let loader = loader();
        let cs = loader.load_code_segment(&spaces, &tables, 0x08, 0).unwrap();
        assert_eq!(cs.default_size_32(), Ok(true));
        assert_eq!(cs.rpl(), Ok(0));
        assert_eq!(kind_of(loader.load_code_segment(&spaces, &tables, 0x10, 0)), ExceptionType::GeneralProtection);
        // Non-conforming ring 0 code from ring 3
        assert_eq!(kind_of(loader.load_code_segment(&spaces, &tables, 0x0B, 3)), ExceptionType::GeneralProtection);
        // Conforming code keeps the caller's privilege level
        let cs = loader.load_code_segment(&spaces, &tables, 0x30, 3).unwrap();
        assert_eq!(cs.rpl(), Ok(3));
        assert_eq!(cs.selector(), 0x33);
    }
}
