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

    bytequeue.rs

    Implements the ByteSource trait and ByteCursor, a bounded sequential
    reader over a guest memory region. The instruction decoder reads through
    ByteSource so that blocks may be decoded from any byte provider.

*/

use crate::{
    memerror::MemError,
    memory::Memory,
};

pub trait ByteSource {
    /// The current read position, relative to the start of the backing region.
    fn offset(&self) -> usize;
    fn next_byte(&mut self) -> Result<u8, MemError>;
    fn skip(&mut self, count: usize) -> Result<(), MemError>;
    /// Rewind to the position the source was attached at.
    fn reset(&mut self);

    fn next_u16(&mut self) -> Result<u16, MemError> {
        let lo = self.next_byte()?;
        let hi = self.next_byte()?;
        Ok(u16::from_le_bytes([lo, hi]))
    }

    fn next_u32(&mut self) -> Result<u32, MemError> {
        let lo = self.next_u16()?;
        let hi = self.next_u16()?;
        Ok((lo as u32) | ((hi as u32) << 16))
    }
}

pub struct ByteCursor<'a, M: Memory + ?Sized> {
    memory: &'a M,
    origin: usize,
    offset: usize,
}

impl<'a, M: Memory + ?Sized> ByteCursor<'a, M> {
    pub fn new(memory: &'a M, offset: usize) -> Self {
        Self {
            memory,
            origin: offset,
            offset,
        }
    }

    pub fn origin(&self) -> usize {
        self.origin
    }

    pub fn memory(&self) -> &'a M {
        self.memory
    }

    fn out_of_range(&self, offset: usize) -> MemError {
        MemError::OutOfRange {
            offset: offset as u64,
            size: self.memory.size(),
        }
    }
}

impl<'a, M: Memory + ?Sized> ByteSource for ByteCursor<'a, M> {
    fn offset(&self) -> usize {
        self.offset
    }

    fn next_byte(&mut self) -> Result<u8, MemError> {
        if self.offset >= self.memory.size() {
            return Err(self.out_of_range(self.offset));
        }
        let byte = self.memory.get_byte(self.offset as u32);
        self.offset += 1;
        Ok(byte)
    }

    fn skip(&mut self, count: usize) -> Result<(), MemError> {
        // A skip may not land on the end of the region, unlike a read of the final byte.
        let target = self.offset.saturating_add(count);
        if target >= self.memory.size() {
            return Err(self.out_of_range(target));
        }
        self.offset = target;
        Ok(())
    }

    fn reset(&mut self) {
        self.offset = self.origin;
    }
}
