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

    timer::clock.rs

    Virtual clock. Owns every timer and the queue that orders them, and
    advances virtual time only by dispatching expired timers.

*/

use serde::{Deserialize, Serialize};

use crate::{
    cpu_common::{fatal, EmuResult, InternalError},
    timer::{Timer, TimerEvent, TimerId, TimerOwner, TimerPriorityQueue},
};

/// Receives timer callbacks. The handler may re-arm or disable timers through `clock`.
pub trait TimerHandler {
    fn on_timer(&mut self, clock: &mut VirtualClock, event: TimerEvent);
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VirtualClock {
    now: u64,
    timers: Vec<Timer>,
    queue: TimerPriorityQueue,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn new_timer(&mut self, owner: TimerOwner) -> TimerId {
        let id = TimerId(self.timers.len() as u32);
        self.timers.push(Timer::new(id, owner));
        log::debug!("Created timer {:?} for owner {:?}", id, owner);
        id
    }

    pub fn timer(&self, id: TimerId) -> EmuResult<&Timer> {
        self.timers
            .get(id.0 as usize)
            .ok_or_else(|| fatal(InternalError::UnknownTimer(id)))
    }

    fn timer_mut(&mut self, id: TimerId) -> EmuResult<&mut Timer> {
        self.timers
            .get_mut(id.0 as usize)
            .ok_or_else(|| fatal(InternalError::UnknownTimer(id)))
    }

    /// Arm `id` to fire at `expiry`, replacing any pending expiry.
    pub fn set_expiry(&mut self, id: TimerId, expiry: u64) -> EmuResult<()> {
        let timer = self.timers.get_mut(id.0 as usize).ok_or_else(|| fatal(InternalError::UnknownTimer(id)))?;
        timer.set_expiry(expiry);
        self.queue.offer(timer);
        Ok(())
    }

    /// Disarm `id`. Returns whether it was pending.
    pub fn disable(&mut self, id: TimerId) -> EmuResult<bool> {
        let timer = self.timers.get_mut(id.0 as usize).ok_or_else(|| fatal(InternalError::UnknownTimer(id)))?;
        Ok(self.queue.remove(timer))
    }

    pub fn is_enabled(&self, id: TimerId) -> EmuResult<bool> {
        Ok(self.timer(id)?.is_enqueued())
    }

    pub fn next_expiry(&self) -> Option<u64> {
        self.queue.peek_expiry()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> &TimerPriorityQueue {
        &self.queue
    }

    /// Fire the earliest pending timer, advancing virtual time to its expiry if that lies ahead.
    pub fn step<H: TimerHandler>(&mut self, handler: &mut H) -> EmuResult<Option<TimerEvent>> {
        let Some((expiry, id)) = self.queue.pop()
        else {
            return Ok(None);
        };
        let now = self.now.max(expiry);
        self.now = now;

        let timer = self.timer_mut(id)?;
        timer.enqueued = false;
        let event = TimerEvent {
            id,
            owner: timer.owner(),
            expiry,
            now,
        };
        log::trace!("Timer {:?} fired at {} (expiry {})", id, event.now, expiry);
        handler.on_timer(self, event);
        Ok(Some(event))
    }

    /// Fire every timer that expires at or before `target`, including timers armed by handlers
    /// during this call, then advance virtual time to `target`. Returns the number fired.
    pub fn advance_to<H: TimerHandler>(&mut self, target: u64, handler: &mut H) -> EmuResult<usize> {
        let mut fired = 0;
        while matches!(self.queue.peek_expiry(), Some(expiry) if expiry <= target) {
            self.step(handler)?;
            fired += 1;
        }
        self.now = self.now.max(target);
        Ok(fired)
    }
}
