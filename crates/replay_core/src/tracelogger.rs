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

    tracelogger.rs

    Replay trace sink. Records one line per dispatched code block and per
    fired timer, and folds every record into a running MD5 fingerprint so
    two runs can be compared without keeping their traces.

*/

use std::{
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use crate::{codeblock::CodeBlock, timer::TimerEvent, CpuMode};

/// Running MD5 digest over every trace record. Each record is digested with a trailing newline,
/// so the digest of a file sink equals the digest of the file it wrote.
#[derive(Clone)]
pub struct TraceFingerprint(md5::Context);

impl Default for TraceFingerprint {
    fn default() -> Self {
        TraceFingerprint(md5::Context::new())
    }
}

impl fmt::Debug for TraceFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceFingerprint({:x})", self.digest())
    }
}

impl TraceFingerprint {
    pub fn update(&mut self, line: &str) {
        self.0.consume(line.as_bytes());
        self.0.consume(b"\n");
    }

    /// Digest of the records seen so far. Further records may still be added.
    pub fn digest(&self) -> md5::Digest {
        self.0.clone().compute()
    }
}

#[derive(Debug, Default)]
pub enum TraceSink {
    FileWriter(BufWriter<File>),
    Console,
    Buffer(Vec<String>),
    #[default]
    None,
}

#[derive(Debug, Default)]
pub struct TraceLogger {
    sink: TraceSink,
    fingerprint: TraceFingerprint,
    records: u64,
}

impl TraceLogger {
    pub fn new(sink: TraceSink) -> Self {
        Self {
            sink,
            ..Default::default()
        }
    }

    pub fn from_filename<S: AsRef<Path>>(filename: S) -> std::io::Result<Self> {
        let file = File::create(filename)?;
        Ok(Self::new(TraceSink::FileWriter(BufWriter::new(file))))
    }

    fn record(&mut self, line: String) {
        self.fingerprint.update(&line);
        self.records += 1;
        match &mut self.sink {
            TraceSink::FileWriter(buf) => {
                if let Err(e) = writeln!(buf, "{}", line) {
                    log::error!("Failed to write trace log: {}", e);
                }
            }
            TraceSink::Console => println!("{}", line),
            TraceSink::Buffer(lines) => lines.push(line),
            TraceSink::None => (),
        }
    }

    /// Record a block about to be executed.
    pub fn trace_block(&mut self, block: &CodeBlock) {
        let mode = match block.mode() {
            CpuMode::Real => "R",
            CpuMode::Protected => "P",
            CpuMode::Virtual8086 => "V",
        };
        let line = match block.tier() {
            Some(tier) => format!(
                "B {} {:08X} +{} n={} {}",
                mode,
                block.start(),
                block.byte_length(),
                block.instruction_count(),
                tier
            ),
            None => format!("B {} {:08X} spanning", mode, block.start()),
        };
        self.record(line);
    }

    pub fn trace_timer(&mut self, event: &TimerEvent) {
        self.record(format!(
            "T {} owner={} expiry={} now={}",
            event.id.0, event.owner.0, event.expiry, event.now
        ));
    }

    /// Record a free-form line, such as a raised exception.
    pub fn trace_note<S: AsRef<str>>(&mut self, note: S) {
        self.record(format!("N {}", note.as_ref()));
    }

    pub fn fingerprint(&self) -> md5::Digest {
        self.fingerprint.digest()
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    /// Lines captured by a [TraceSink::Buffer] sink.
    pub fn lines(&self) -> &[String] {
        match &self.sink {
            TraceSink::Buffer(lines) => lines,
            _ => &[],
        }
    }

    pub fn flush(&mut self) {
        if let TraceSink::FileWriter(file) = &mut self.sink {
            if let Err(e) = file.flush() {
                log::error!("Failed to flush trace log: {}", e);
            }
        }
    }

    #[inline(always)]
    pub fn is_some(&self) -> bool {
        !matches!(self.sink, TraceSink::None)
    }
}
