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

    replay_config::lib.rs

    Routines to parse the configuration file and command line arguments.

*/

//! This crate reads the ReplayPC configuration from a TOML file and overlays command line
//! arguments on top of it. Command line arguments always take priority over the configuration
//! file.

mod bpaf_config;

use std::path::{Path, PathBuf};

pub use bpaf_config::{cli_args, CmdLineArgs};
use replay_core::{coreconfig::CoreConfig, CpuMode};
use serde_derive::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "./replaypc.toml";
pub const DEFAULT_MEMORY_SIZE: usize = 0x10_0000;
pub const DEFAULT_MAX_BLOCKS: u64 = 100_000;

const fn _default_memory_size() -> usize {
    DEFAULT_MEMORY_SIZE
}
const fn _default_max_blocks() -> u64 {
    DEFAULT_MAX_BLOCKS
}

#[derive(Debug, Deserialize)]
pub struct Emulator {
    pub image: Option<PathBuf>,
    #[serde(default)]
    pub load_address: u32,
    #[serde(default = "_default_memory_size")]
    pub memory_size: usize,
    #[serde(default)]
    pub mode: CpuMode,
    #[serde(default)]
    pub code32: bool,
    #[serde(default = "_default_max_blocks")]
    pub max_blocks: u64,
    /// Period of the demonstration timer in executed instructions. None disables it.
    pub timer_period: Option<u64>,
    pub trace_file: Option<PathBuf>,
    #[serde(default)]
    pub trace_console: bool,
}

impl Default for Emulator {
    fn default() -> Self {
        Self {
            image: None,
            load_address: 0,
            memory_size: DEFAULT_MEMORY_SIZE,
            mode: CpuMode::Real,
            code32: false,
            max_blocks: DEFAULT_MAX_BLOCKS,
            timer_period: None,
            trace_file: None,
            trace_console: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ConfigFileParams {
    #[serde(default)]
    pub emulator: Emulator,
    #[serde(default)]
    pub core: CoreConfig,
}

impl ConfigFileParams {
    pub fn overlay(&mut self, shell_args: CmdLineArgs) {
        if let Some(image) = shell_args.image {
            self.emulator.image = Some(image);
        }
        if let Some(load_address) = shell_args.load_address {
            self.emulator.load_address = load_address;
        }
        if let Some(mode) = shell_args.mode {
            self.emulator.mode = mode;
        }
        self.emulator.code32 |= shell_args.code32;

        if let Some(max_blocks) = shell_args.max_blocks {
            self.emulator.max_blocks = max_blocks;
        }
        if let Some(timer_period) = shell_args.timer_period {
            self.emulator.timer_period = Some(timer_period);
        }
        if let Some(trace_file) = shell_args.trace_file {
            self.emulator.trace_file = Some(trace_file);
        }
        self.emulator.trace_console |= shell_args.trace_console;

        // Core options
        if let Some(block_limit) = shell_args.block_limit {
            self.core.block_limit = block_limit;
        }
        if let Some(hot_threshold) = shell_args.hot_threshold {
            self.core.hot_threshold = Some(hot_threshold);
        }
        if let Some(policy) = shell_args.unimplemented_segments {
            self.core.unimplemented_segments = policy;
        }
    }
}

pub fn read_config(toml_string: impl AsRef<str>, shell_args: CmdLineArgs) -> Result<ConfigFileParams, anyhow::Error> {
    let mut toml_args: ConfigFileParams = toml::from_str(toml_string.as_ref())?;

    // Command line arguments override config file arguments
    toml_args.overlay(shell_args);
    toml_args.core.validate()?;

    Ok(toml_args)
}

/// Read the TOML configuration from a file path, parse and overlay command line arguments.
/// A missing file at the default path is not an error; the defaults are used instead. A file named
/// explicitly with `--config_file` must exist.
pub fn read_config_file<P>(default_path: P) -> Result<ConfigFileParams, anyhow::Error>
where
    P: AsRef<Path>,
{
    log::debug!("Reading command line arguments...");
    let shell_args = cli_args().run();

    let toml_string = if let Some(configfile_path) = shell_args.config_file.as_ref() {
        std::fs::read_to_string(configfile_path)?
    }
    else {
        match std::fs::read_to_string(default_path.as_ref()) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!(
                    "No configuration file at {}, using defaults",
                    default_path.as_ref().display()
                );
                String::new()
            }
            Err(e) => return Err(e.into()),
        }
    };

    read_config(toml_string, shell_args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replay_core::coreconfig::{UnimplementedSegmentPolicy, DEFAULT_BLOCK_LIMIT};

    #[test]
    fn empty_config_uses_defaults() {
        let config = read_config("", CmdLineArgs::default()).unwrap();
        assert_eq!(config.emulator.memory_size, DEFAULT_MEMORY_SIZE);
        assert_eq!(config.emulator.max_blocks, DEFAULT_MAX_BLOCKS);
        assert_eq!(config.emulator.mode, CpuMode::Real);
        assert_eq!(config.core.block_limit, DEFAULT_BLOCK_LIMIT);
        assert_eq!(config.core.hot_threshold, None);
    }

    #[test]
    fn command_line_overrides_file() {
        let toml = r#"
            [emulator]
            mode = "protected"
            max_blocks = 10
            timer_period = 500

            [core]
            block_limit = 64
            hot_threshold = 8
            unimplemented_segments = "Emulate"
        "#;
        let args = CmdLineArgs {
            max_blocks: Some(20),
            block_limit: Some(16),
            ..Default::default()
        };
        let config = read_config(toml, args).unwrap();
        assert_eq!(config.emulator.mode, CpuMode::Protected);
        assert_eq!(config.emulator.max_blocks, 20);
        assert_eq!(config.emulator.timer_period, Some(500));
        assert_eq!(config.core.block_limit, 16);
        assert_eq!(config.core.hot_threshold, Some(8));
        assert_eq!(config.core.unimplemented_segments, UnimplementedSegmentPolicy::Emulate);
    }

    #[test]
    fn invalid_core_config_is_rejected() {
        assert!(read_config("[core]\nblock_limit = 1\n", CmdLineArgs::default()).is_err());
        let args = CmdLineArgs {
            hot_threshold: Some(0),
            ..Default::default()
        };
        assert!(read_config("", args).is_err());
    }

    #[test]
    fn segment_policy_accepts_lowercase() {
        let config = read_config("[core]\nunimplemented_segments = \"emulate\"\n", CmdLineArgs::default()).unwrap();
        assert_eq!(config.core.unimplemented_segments, UnimplementedSegmentPolicy::Emulate);
        let config = read_config("[core]\nunimplemented_segments = \"fatal\"\n", CmdLineArgs::default()).unwrap();
        assert_eq!(config.core.unimplemented_segments, UnimplementedSegmentPolicy::Fatal);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(read_config("[emulator\nmode = ", CmdLineArgs::default()).is_err());
    }
}
