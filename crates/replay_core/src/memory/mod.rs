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

    memory::mod.rs

    Guest memory regions. Code blocks are decoded out of a region and
    segments address a region by id through the address space table.

*/

pub mod ram;
pub mod rom;

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

pub use ram::RamMemory;
pub use rom::RomMemory;

use crate::cpu_common::{fatal, EmuResult, InternalError};

pub const OPEN_BUS_BYTE: u8 = 0xFF;

#[enum_dispatch]
pub enum MemoryDispatch {
    RamMemory,
    RomMemory,
}

/// A byte-addressable guest memory region. Multi-byte accesses are little-endian.
/// Reads past the end of the region return open bus (0xFF); writes past the end are dropped.
#[enum_dispatch(MemoryDispatch)]
pub trait Memory {
    fn size(&self) -> usize;
    fn get_byte(&self, address: u32) -> u8;
    fn set_byte(&mut self, address: u32, data: u8);

    /// Return a value that changes whenever any byte in `address..address + len` may have been
    /// written. Blocks compare this against the value captured when they were decoded.
    fn code_version(&self, address: u32, len: usize) -> u64;

    fn is_read_only(&self) -> bool {
        false
    }

    fn get_word(&self, address: u32) -> u16 {
        u16::from_le_bytes([self.get_byte(address), self.get_byte(address.wrapping_add(1))])
    }

    fn set_word(&mut self, address: u32, data: u16) {
        let [lo, hi] = data.to_le_bytes();
        self.set_byte(address, lo);
        self.set_byte(address.wrapping_add(1), hi);
    }

    fn get_doubleword(&self, address: u32) -> u32 {
        u32::from_le_bytes([
            self.get_byte(address),
            self.get_byte(address.wrapping_add(1)),
            self.get_byte(address.wrapping_add(2)),
            self.get_byte(address.wrapping_add(3)),
        ])
    }

    fn set_doubleword(&mut self, address: u32, data: u32) {
        for (i, byte) in data.to_le_bytes().into_iter().enumerate() {
            self.set_byte(address.wrapping_add(i as u32), byte);
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressSpaceId(pub u32);

/// Owns every guest memory region. Segments refer to regions by [AddressSpaceId] so that they
/// can be serialized and rebound without holding references.
#[derive(Default)]
pub struct AddressSpaceTable {
    spaces: Vec<MemoryDispatch>,
}

impl AddressSpaceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, memory: impl Into<MemoryDispatch>) -> AddressSpaceId {
        let id = AddressSpaceId(self.spaces.len() as u32);
        self.spaces.push(memory.into());
        log::debug!("Registered address space {:?}", id);
        id
    }

    pub fn get(&self, id: AddressSpaceId) -> EmuResult<&MemoryDispatch> {
        self.spaces
            .get(id.0 as usize)
            .ok_or_else(|| fatal(InternalError::UnknownAddressSpace(id)))
    }

    pub fn get_mut(&mut self, id: AddressSpaceId) -> EmuResult<&mut MemoryDispatch> {
        self.spaces
            .get_mut(id.0 as usize)
            .ok_or_else(|| fatal(InternalError::UnknownAddressSpace(id)))
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}
