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

    timer::mod.rs

    Deterministic timers. Every device callback is ordered by the timer
    queue on virtual time alone, with ties broken by the order in which
    timers were offered, so a replay dispatches events in exactly the order
    of the original run.

*/

pub mod clock;
pub mod queue;

use serde::{Deserialize, Serialize};

pub use clock::{TimerHandler, VirtualClock};
pub use queue::TimerPriorityQueue;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimerId(pub u32);

/// Identifies the device that receives a timer's callback.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerOwner(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timer {
    id: TimerId,
    owner: TimerOwner,
    expiry: u64,
    enqueued: bool,
}

impl Timer {
    pub fn new(id: TimerId, owner: TimerOwner) -> Self {
        Self {
            id,
            owner,
            expiry: 0,
            enqueued: false,
        }
    }

    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn owner(&self) -> TimerOwner {
        self.owner
    }

    pub fn expiry(&self) -> u64 {
        self.expiry
    }

    /// Set the expiry. An enqueued timer must be re-offered for the change to take effect.
    pub fn set_expiry(&mut self, expiry: u64) {
        self.expiry = expiry;
    }

    pub fn is_enqueued(&self) -> bool {
        self.enqueued
    }
}

/// Delivered to a [TimerHandler] when a timer fires.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerEvent {
    pub id: TimerId,
    pub owner: TimerOwner,
    pub expiry: u64,
    /// Virtual time at dispatch. Never earlier than `expiry`.
    pub now: u64,
}
