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

    coreconfig.rs

    Runtime options for the emulation core. These replace what would
    otherwise be process-wide settings: the code block instruction limit,
    the promotion threshold and the policy for descriptor types the segment
    model does not decode by default.

*/

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

pub const DEFAULT_BLOCK_LIMIT: usize = 1000;
pub const MIN_BLOCK_LIMIT: usize = 2;

/// How to treat the expand-down read-only data and accessed code descriptor types
/// (type codes 0x14, 0x15, 0x17, 0x19 and 0x1C).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive, serialize_all = "lowercase")]
pub enum UnimplementedSegmentPolicy {
    /// Stop with an internal error when one of these descriptors is loaded.
    #[default]
    #[serde(alias = "Fatal")]
    Fatal,
    /// Decode them with their architectural semantics.
    #[serde(alias = "Emulate")]
    Emulate,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub block_limit: usize,
    pub hot_threshold: Option<u32>,
    pub unimplemented_segments: UnimplementedSegmentPolicy,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            block_limit: DEFAULT_BLOCK_LIMIT,
            hot_threshold: None,
            unimplemented_segments: UnimplementedSegmentPolicy::Fatal,
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.block_limit < MIN_BLOCK_LIMIT {
            anyhow::bail!(
                "block_limit must be at least {}, got {}",
                MIN_BLOCK_LIMIT,
                self.block_limit
            );
        }
        if let Some(0) = self.hot_threshold {
            anyhow::bail!("hot_threshold must be non-zero when set");
        }
        Ok(())
    }
}
