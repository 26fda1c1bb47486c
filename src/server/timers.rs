use std::cmp;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use mio::Token;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timeout {
    /// The client at `token` hasn't finished sending its request.
    RequestRead { token: Token, serial: u64 },
    /// The handler for request `serial` hasn't completed its response.
    Completion(u64),
}

#[derive(Clone, Copy, PartialEq, Eq)]
struct TimerEntry {
    deadline: Instant,
    timeout: Timeout,
}

impl cmp::PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        Ord::cmp(&self.deadline, &other.deadline)
    }
}

/// Deadlines ordered soonest first. Entries are never cancelled; a fired
/// timeout is checked against the current state of whatever it names.
#[derive(Default)]
pub struct TimerQueue {
    heap: BinaryHeap<cmp::Reverse<TimerEntry>>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, deadline: Instant, timeout: Timeout) {
        self.heap.push(cmp::Reverse(TimerEntry { deadline, timeout }));
    }

    /// Time until the next deadline, zero if one has already passed.
    pub fn next_wait(&self, now: Instant) -> Option<Duration> {
        self.heap
            .peek()
            .map(|e| e.0.deadline.saturating_duration_since(now))
    }

    /// Move every timeout due at `now` into `expired`.
    pub fn expire(&mut self, now: Instant, expired: &mut Vec<Timeout>) {
        while let Some(entry) = self.heap.peek() {
            if entry.0.deadline > now {
                break;
            }

            if let Some(entry) = self.heap.pop() {
                expired.push(entry.0.timeout);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
