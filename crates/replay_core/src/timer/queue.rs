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

    timer::queue.rs

    Priority queue of pending timers, ordered by expiry and then by offer
    order. The queue links timer ids only; timers themselves are owned by
    the virtual clock.

*/

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    timer::{Timer, TimerId},
    ReplayHashMap,
};

/// Queue key: expiry, then a sequence number that increases with every offer.
type QueueKey = (u64, u64);

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(from = "Vec<QueueEntry>", into = "Vec<QueueEntry>")]
pub struct TimerPriorityQueue {
    order: BTreeMap<QueueKey, TimerId>,
    keys: ReplayHashMap<TimerId, QueueKey>,
    next_sequence: u64,
}

/// Serialized form of one queue position.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub expiry: u64,
    pub id: TimerId,
}

impl TimerPriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, id: TimerId, expiry: u64) {
        let key = (expiry, self.next_sequence);
        self.next_sequence += 1;
        self.order.insert(key, id);
        self.keys.insert(id, key);
    }

    fn unlink(&mut self, id: TimerId) -> bool {
        match self.keys.remove(&id) {
            Some(key) => {
                self.order.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Insert `timer` at its expiry, after every timer already queued with the same or an earlier
    /// expiry. A timer that is already queued is moved rather than duplicated.
    pub fn offer(&mut self, timer: &mut Timer) {
        if self.unlink(timer.id) {
            log::trace!("Timer {:?} re-offered, moving to {}", timer.id, timer.expiry);
        }
        self.insert(timer.id, timer.expiry);
        timer.enqueued = true;
    }

    /// Remove `timer` if it is queued. Returns whether it was.
    pub fn remove(&mut self, timer: &mut Timer) -> bool {
        timer.enqueued = false;
        self.unlink(timer.id)
    }

    /// The earliest timer, if any.
    pub fn peek(&self) -> Option<TimerId> {
        self.order.first_key_value().map(|(_, id)| *id)
    }

    pub fn peek_expiry(&self) -> Option<u64> {
        self.order.first_key_value().map(|((expiry, _), _)| *expiry)
    }

    /// Remove and return the earliest timer with its expiry. The caller owns the timer and is
    /// responsible for clearing its enqueued flag.
    pub fn pop(&mut self) -> Option<(u64, TimerId)> {
        let ((expiry, _), id) = self.order.pop_first()?;
        self.keys.remove(&id);
        Some((expiry, id))
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.keys.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Queued timers in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = QueueEntry> + '_ {
        self.order.iter().map(|((expiry, _), id)| QueueEntry {
            expiry: *expiry,
            id: *id,
        })
    }
}

impl From<Vec<QueueEntry>> for TimerPriorityQueue {
    fn from(entries: Vec<QueueEntry>) -> Self {
        let mut queue = TimerPriorityQueue::new();
        for entry in entries {
            queue.unlink(entry.id);
            queue.insert(entry.id, entry.expiry);
        }
        queue
    }
}

impl From<TimerPriorityQueue> for Vec<QueueEntry> {
    fn from(queue: TimerPriorityQueue) -> Self {
        queue.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerOwner;

    fn timer(id: u32, expiry: u64) -> Timer {
        let mut t = Timer::new(TimerId(id), TimerOwner(0));
        t.set_expiry(expiry);
        t
    }

    fn drain(queue: &mut TimerPriorityQueue) -> Vec<u32> {
        std::iter::from_fn(|| queue.pop()).map(|(_, id)| id.0).collect()
    }

    #[test]
    fn equal_expiries_pop_in_offer_order() {
        let mut queue = TimerPriorityQueue::new();
        let (mut a, mut b, mut c) = (timer(1, 100), timer(2, 100), timer(3, 50));
        queue.offer(&mut a);
        queue.offer(&mut b);
        queue.offer(&mut c);
        assert_eq!(queue.peek(), Some(TimerId(3)));
        assert_eq!(drain(&mut queue), vec![3, 1, 2]);
    }

    #[test]
    fn peek_on_empty_queue() {
        let queue = TimerPriorityQueue::new();
        assert_eq!(queue.peek(), None);
        assert_eq!(queue.peek_expiry(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn removed_timers_never_pop() {
        let mut queue = TimerPriorityQueue::new();
        let mut timers: Vec<Timer> = (0..5).map(|i| timer(i, 10 * i as u64)).collect();
        for t in timers.iter_mut() {
            queue.offer(t);
        }
        assert!(queue.remove(&mut timers[2]));
        assert!(!timers[2].is_enqueued());
        // Removing again is a no-op.
        assert!(!queue.remove(&mut timers[2]));
        assert_eq!(drain(&mut queue), vec![0, 1, 3, 4]);
    }

    #[test]
    fn reoffer_moves_timer() {
        let mut queue = TimerPriorityQueue::new();
        let (mut a, mut b) = (timer(1, 10), timer(2, 20));
        queue.offer(&mut a);
        queue.offer(&mut b);
        a.set_expiry(30);
        queue.offer(&mut a);
        assert_eq!(queue.len(), 2);
        assert_eq!(drain(&mut queue), vec![2, 1]);
    }

    #[test]
    fn reoffer_at_same_expiry_goes_to_back() {
        let mut queue = TimerPriorityQueue::new();
        let (mut a, mut b) = (timer(1, 10), timer(2, 10));
        queue.offer(&mut a);
        queue.offer(&mut b);
        queue.offer(&mut a);
        assert_eq!(drain(&mut queue), vec![2, 1]);
    }

    #[test]
    fn random_operations_match_reference_model() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x5EED_7155);
        for _ in 0..200 {
            let mut queue = TimerPriorityQueue::new();
            let mut timers: Vec<Timer> = (0..12).map(|i| timer(i, 0)).collect();
            // (expiry, offer sequence, id) for every queued timer
            let mut model: Vec<(u64, u64, u32)> = Vec::new();
            let mut sequence = 0u64;

            for _ in 0..300 {
                let i = rng.gen_range(0..timers.len());
                let id = i as u32;
                match rng.gen_range(0..4) {
                    0 | 1 => {
                        // A narrow expiry range forces plenty of ties.
                        let expiry = rng.gen_range(0..16);
                        timers[i].set_expiry(expiry);
                        queue.offer(&mut timers[i]);
                        model.retain(|e| e.2 != id);
                        model.push((expiry, sequence, id));
                        sequence += 1;
                    }
                    2 => {
                        let queued = model.iter().any(|e| e.2 == id);
                        assert_eq!(queue.remove(&mut timers[i]), queued);
                        assert!(!timers[i].is_enqueued());
                        model.retain(|e| e.2 != id);
                    }
                    _ => {
                        let expected = model.iter().copied().min_by_key(|e| (e.0, e.1));
                        assert_eq!(queue.pop(), expected.map(|(expiry, _, id)| (expiry, TimerId(id))));
                        if let Some((_, _, popped)) = expected {
                            model.retain(|e| e.2 != popped);
                            timers[popped as usize].enqueued = false;
                        }
                    }
                }

                assert_eq!(queue.len(), model.len());
                assert_eq!(queue.peek_expiry(), model.iter().map(|e| e.0).min());
                for t in &timers {
                    let queued = model.iter().any(|e| e.2 == t.id().0);
                    assert_eq!(queue.contains(t.id()), queued);
                    assert_eq!(t.is_enqueued(), queued);
                }
            }

            model.sort_by_key(|e| (e.0, e.1));
            let expected: Vec<u32> = model.iter().map(|e| e.2).collect();
            assert_eq!(drain(&mut queue), expected);
        }
    }

    #[test]
    fn serde_preserves_order_and_identity() {
        let mut queue = TimerPriorityQueue::new();
        for (id, expiry) in [(7, 100), (3, 100), (9, 5), (1, 100), (4, 60)] {
            queue.offer(&mut timer(id, expiry));
        }
        let before: Vec<QueueEntry> = queue.iter().collect();

        let json = serde_json::to_string(&queue).unwrap();
        let mut restored: TimerPriorityQueue = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.iter().collect::<Vec<_>>(), before);

        // Ties offered after a restore still go behind the restored entries.
        restored.offer(&mut timer(2, 100));
        assert_eq!(drain(&mut restored), vec![9, 4, 7, 3, 1, 2]);
    }
}
