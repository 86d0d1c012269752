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

    replay_config::bpaf_config::mod.rs

    Command line arguments. Every argument is optional; anything given
    here takes priority over the configuration file.

*/

use std::path::PathBuf;

use bpaf::Bpaf;
use replay_core::{coreconfig::UnimplementedSegmentPolicy, CpuMode};

#[derive(Bpaf, Debug, Default)]
#[bpaf(options, version, generate(cli_args))]
pub struct CmdLineArgs {
    #[bpaf(long("config_file"), long("configfile"))]
    pub config_file: Option<PathBuf>,

    /// Raw guest image to load
    #[bpaf(long)]
    pub image: Option<PathBuf>,

    /// Offset in guest memory at which to load the image and begin execution
    #[bpaf(long)]
    pub load_address: Option<u32>,

    /// CPU mode: real, protected or v86
    #[bpaf(long)]
    pub mode: Option<CpuMode>,

    /// Decode protected mode code with a 32-bit default operand size
    #[bpaf(long("code32"), switch)]
    pub code32: bool,

    #[bpaf(long)]
    pub max_blocks: Option<u64>,

    #[bpaf(long)]
    pub block_limit: Option<usize>,

    #[bpaf(long)]
    pub hot_threshold: Option<u32>,

    /// fatal or emulate
    #[bpaf(long)]
    pub unimplemented_segments: Option<UnimplementedSegmentPolicy>,

    #[bpaf(long)]
    pub timer_period: Option<u64>,

    #[bpaf(long("trace_file"), long("tracefile"))]
    pub trace_file: Option<PathBuf>,

    /// Print the block trace to the console
    #[bpaf(long, switch)]
    pub trace_console: bool,
}
