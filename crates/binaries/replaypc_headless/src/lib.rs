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

    replaypc_headless::lib.rs

    ReplayPC headless front-end main library component.

*/

//! Runs a raw guest image through the code block pipeline with a periodic virtual timer, and
//! prints a fingerprint of the block and timer trace. Two runs of the same image with the same
//! configuration always print the same fingerprint.

#![forbid(unsafe_code)]

pub mod emulator;

use anyhow::Context;

use crate::emulator::Emulator;

pub fn run() {
    env_logger::init();

    let config = match replay_config::read_config_file(replay_config::DEFAULT_CONFIG_FILE) {
        Ok(config) => config,
        Err(e) => match e.downcast_ref::<std::io::Error>() {
            Some(e) => {
                eprintln!("IO error reading configuration file:\n{}", e);
                std::process::exit(1);
            }
            None => {
                eprintln!(
                    "Failed to parse configuration. There may be a typo or otherwise invalid toml:\n{}",
                    e
                );
                std::process::exit(1);
            }
        },
    };

    if let Err(e) = run_headless(config) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

pub fn run_headless(config: replay_config::ConfigFileParams) -> anyhow::Result<()> {
    let Some(image_path) = config.emulator.image.as_ref()
    else {
        anyhow::bail!("No guest image specified. Set emulator.image or pass --image.");
    };
    let image =
        std::fs::read(image_path).with_context(|| format!("Couldn't read image {}", image_path.display()))?;
    log::debug!("Loaded {} byte image from {}", image.len(), image_path.display());

    let trace = Emulator::trace_from_config(&config)?;
    let mut emu = Emulator::from_config(&config, &image, trace)?;
    let summary = emu.run()?;

    println!("mode:          {}", config.emulator.mode);
    println!("blocks:        {}", summary.blocks);
    println!("instructions:  {}", summary.instructions);
    println!("replacements:  {}", summary.replacements);
    println!("timer events:  {}", summary.timer_events);
    match &summary.exception {
        Some(exception) => println!("stopped by:    {}", exception),
        None if summary.halted => println!("stopped by:    halt"),
        None => println!("stopped by:    block budget"),
    }
    println!("fingerprint:   {}", summary.fingerprint);
    Ok(())
}
