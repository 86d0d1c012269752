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

    memory::rom.rs

    Read-only guest memory, used for BIOS and option ROM images.

*/

use crate::memory::{Memory, OPEN_BUS_BYTE};

pub struct RomMemory {
    data: Vec<u8>,
}

impl RomMemory {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl Memory for RomMemory {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn get_byte(&self, address: u32) -> u8 {
        self.data.get(address as usize).copied().unwrap_or(OPEN_BUS_BYTE)
    }

    fn set_byte(&mut self, address: u32, data: u8) {
        log::trace!("Ignored write to ROM at {:08X}: {:02X}", address, data);
    }

    /// ROM contents never change.
    fn code_version(&self, _address: u32, _len: usize) -> u64 {
        0
    }

    fn is_read_only(&self) -> bool {
        true
    }
}
