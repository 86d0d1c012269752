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

    memory::ram.rs

    Read/write guest memory with per-page write versions. Any store to a
    page bumps its version, which is how code blocks detect that the bytes
    they were decoded from have been modified.

*/

use crate::{
    memerror::MemError,
    memory::{Memory, OPEN_BUS_BYTE},
};

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

pub struct RamMemory {
    data: Vec<u8>,
    page_versions: Vec<u64>,
}

impl RamMemory {
    pub fn new(size: usize) -> Self {
        Self::from_bytes(vec![0; size])
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        let pages = data.len().div_ceil(PAGE_SIZE);
        Self {
            data,
            page_versions: vec![0; pages],
        }
    }

    /// Copy `src` into memory at `location`. The copy is rejected as a whole if it would not fit.
    pub fn copy_from(&mut self, src: &[u8], location: usize) -> Result<(), MemError> {
        let end = location.checked_add(src.len()).filter(|end| *end <= self.data.len());
        let Some(end) = end
        else {
            return Err(MemError::CopyOutOfRange {
                location,
                len: src.len(),
                size: self.data.len(),
            });
        };
        self.data[location..end].copy_from_slice(src);
        if !src.is_empty() {
            for page in (location >> PAGE_SHIFT)..=((end - 1) >> PAGE_SHIFT) {
                self.page_versions[page] += 1;
            }
        }
        Ok(())
    }

    pub fn page_version(&self, page: usize) -> u64 {
        self.page_versions.get(page).copied().unwrap_or(0)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Memory for RamMemory {
    fn size(&self) -> usize {
        self.data.len()
    }

    fn get_byte(&self, address: u32) -> u8 {
        self.data.get(address as usize).copied().unwrap_or(OPEN_BUS_BYTE)
    }

    fn set_byte(&mut self, address: u32, data: u8) {
        let address = address as usize;
        if let Some(byte) = self.data.get_mut(address) {
            *byte = data;
            self.page_versions[address >> PAGE_SHIFT] += 1;
        }
    }

    fn code_version(&self, address: u32, len: usize) -> u64 {
        if len == 0 || self.data.is_empty() {
            return 0;
        }
        let first = (address as usize) >> PAGE_SHIFT;
        let last = ((address as usize).saturating_add(len - 1) >> PAGE_SHIFT).min(self.page_versions.len() - 1);
        if first > last {
            return 0;
        }
        // Versions only ever increase, so the sum changes on any write to a spanned page.
        self.page_versions[first..=last]
            .iter()
            .fold(0u64, |acc, v| acc.wrapping_add(*v))
    }
}
