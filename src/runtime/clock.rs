//! Virtual clocks.
//!
//! A virtual clock only moves when the engine has nothing else to do: no ready token and no
//! returned site call. Each idle round advances every clock by one tick and releases the
//! timers that became due, so the relative order of timed events is fixed by their delays
//! alone, never by how long the real work in between took.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ClockId(pub(crate) usize);

impl ClockId {
    /// The clock every engine starts with; it backs the builtin `Vtimer`.
    pub const DEFAULT: ClockId = ClockId(0);

    pub const fn new(index: usize) -> Self {
        Self(index)
    }
}

struct Timer<T> {
    deadline: u64,
    seq: u64,
    payload: T,
}

impl<T> PartialEq for Timer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<T> Eq for Timer<T> {}

impl<T> Ord for Timer<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap: earliest deadline first, then registration order
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for Timer<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

pub struct VirtualClock<T> {
    now: u64,
    next_seq: u64,
    timers: BinaryHeap<Timer<T>>,
}

impl<T> Default for VirtualClock<T> {
    fn default() -> Self {
        Self {
            now: 0,
            next_seq: 0,
            timers: BinaryHeap::new(),
        }
    }
}

impl<T> VirtualClock<T> {
    /// A clock that joins the others late, at their current tick.
    pub fn starting_at(now: u64) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    pub fn is_idle(&self) -> bool {
        self.timers.is_empty()
    }

    /// Registers `payload` to be released `delay` ticks from now.
    pub fn schedule(&mut self, delay: u64, payload: T) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Timer {
            deadline: self.now.saturating_add(delay),
            seq,
            payload,
        });
    }

    /// Forgets every timer whose payload fails `keep`. A clock left with no timers is idle.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        self.timers.retain(|timer| keep(&timer.payload));
    }

    /// Moves the clock one tick forward and returns everything that became due, in order.
    pub fn tick(&mut self) -> Vec<T> {
        self.now += 1;
        let mut due = vec![];
        while self
            .timers
            .peek()
            .is_some_and(|timer| timer.deadline <= self.now)
        {
            if let Some(timer) = self.timers.pop() {
                due.push(timer.payload);
            }
        }
        due
    }
}
