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

    --------------------------------------------------------------------------

    lib.rs

    Deterministic emulation core. Contains code block construction and
    dispatch, the segmented address model and the virtual-clock timer queue.

*/

pub mod bytequeue;
pub mod codeblock;
pub mod coreconfig;
pub mod cpu_common;
pub mod memerror;
pub mod memory;
pub mod segment;
pub mod timer;
pub mod tracelogger;

pub use cpu_common::{CpuMode, EmuError, EmuResult, ExceptionType, InternalError, ProcessorException};

/// Use FxHashMap for internal lookup tables. Iteration order of these maps is never observed, so
/// determinism does not depend on the hasher.
pub use fxhash::FxBuildHasher;
pub type ReplayHashMap<K, V> = std::collections::HashMap<K, V, FxBuildHasher>;
