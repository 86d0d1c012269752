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

    cpu_common::error.rs

    This module defines the common error type for the core. Errors are either
    guest-visible processor exceptions, which the CPU driver delivers as guest
    interrupts, or internal consistency failures, which end the run.

*/

use thiserror::Error;

use crate::{
    cpu_common::{CpuMode, ProcessorException},
    memory::AddressSpaceId,
    segment::DescriptorType,
    timer::TimerId,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InternalError {
    #[error("can't find nor make a suitable {0} mode code block")]
    NoBlockProduced(CpuMode),
    #[error("NULL segment {0}()")]
    NullSegment(&'static str),
    #[error("unimplemented segment type {code:#04X}: {0}", code = .0.code())]
    UnimplementedSegmentType(DescriptorType),
    #[error("gate descriptor has no {0}")]
    GateNotAddressable(&'static str),
    #[error("no address space registered for {0:?}")]
    UnknownAddressSpace(AddressSpaceId),
    #[error("no timer registered for {0:?}")]
    UnknownTimer(TimerId),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmuError {
    #[error("processor exception: {0}")]
    Exception(#[from] ProcessorException),
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}

impl EmuError {
    /// Internal errors terminate the run; exceptions are delivered to the guest.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EmuError::Internal(_))
    }

    pub fn exception(&self) -> Option<&ProcessorException> {
        match self {
            EmuError::Exception(e) => Some(e),
            EmuError::Internal(_) => None,
        }
    }
}

pub type EmuResult<T> = Result<T, EmuError>;

/// Report an internal consistency failure. Every fatal error passes through here so that it is
/// logged where it is detected, even if a caller later discards the error value.
pub fn fatal(err: InternalError) -> EmuError {
    log::error!("Critical error: {}", err);
    EmuError::Internal(err)
}
