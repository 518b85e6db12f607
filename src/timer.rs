//! Timer registry: deadline-keyed callbacks with a repeat policy.
//!
//! Deadlines advance relative to the previous target, never the firing time,
//! so repeated timers do not drift when processing lags.

use std::{
    collections::BTreeMap,
    fmt::Display,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use crate::eventloop::TimerCallback;

/// Monotonic timer identifier, never reused in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    pub(crate) fn alloc(counter: &mut u64) -> TimerId {
        let id = TimerId(*counter);

        *counter += 1;

        id
    }
}

impl Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer({})", self.0)
    }
}

/// How many rounds a timer fires before it is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    /// Fire exactly this many times; `Times(0)` registers nothing.
    Times(u64),
    /// Fire until cancelled.
    Forever,
}

/// Verdict a timer callback returns for its next round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Keep the configured interval.
    Continue,
    /// Override the next interval; a zero duration cancels.
    After(Duration),
    /// Remove the registration now.
    Cancel,
}

pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    pub(crate) interval: Duration,
    repeat: Repeat,
    pub(crate) callback: TimerCallback,
}

impl TimerEntry {
    pub(crate) fn new(
        deadline: Instant,
        interval: Duration,
        repeat: Repeat,
        callback: TimerCallback,
    ) -> Self {
        Self {
            deadline,
            interval,
            repeat,
            callback,
        }
    }

    /// Close one firing round; `true` means the count is exhausted.
    /// [`TimerQueue::insert`] rejects `Times(0)`, so the count is >= 1 here.
    pub(crate) fn finish_round(&mut self) -> bool {
        match &mut self.repeat {
            Repeat::Forever => false,
            Repeat::Times(n) => {
                *n -= 1;

                *n == 0
            }
        }
    }
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    entries: BTreeMap<TimerId, TimerEntry>,
}

impl TimerQueue {
    pub(crate) fn insert(&mut self, id: TimerId, entry: TimerEntry) {
        if let Repeat::Times(0) = entry.repeat {
            return;
        }

        self.entries.insert(id, entry);
    }

    /// Idempotent; `false` when the id is unknown.
    pub(crate) fn cancel(&mut self, id: TimerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn remove(&mut self, id: TimerId) {
        self.entries.remove(&id);
    }

    pub(crate) fn entry_mut(&mut self, id: TimerId) -> Option<&mut TimerEntry> {
        self.entries.get_mut(&id)
    }

    /// Earliest pending deadline, linear scan.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    /// Ids due at `now`, ascending; identical deadlines fire lowest id first.
    pub(crate) fn due_ids(&self, now: Instant) -> Vec<TimerId> {
        self.entries
            .iter()
            .filter(|(_, entry)| entry.deadline <= now)
            .map(|(id, _)| *id)
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Time source for the loop; swap in [`ManualClock`] for deterministic tests.
pub trait Clock {
    fn now(&self) -> Instant;
}

/// Default monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock, shared between the loop and the test driving it.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<Instant>>);

impl ManualClock {
    pub fn new() -> Self {
        Self(Arc::new(Mutex::new(Instant::now())))
    }

    pub fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.0.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> TimerCallback {
        Box::new(|_, _| Next::Continue)
    }

    fn entry(deadline: Instant) -> TimerEntry {
        TimerEntry::new(deadline, Duration::from_millis(100), Repeat::Forever, noop())
    }

    #[test]
    fn identical_deadlines_fire_ascending_id() {
        let mut counter = 0;
        let mut queue = TimerQueue::default();
        let now = Instant::now();

        let a = TimerId::alloc(&mut counter);
        let b = TimerId::alloc(&mut counter);
        let c = TimerId::alloc(&mut counter);

        // inserted out of id order on purpose
        queue.insert(c, entry(now));
        queue.insert(a, entry(now));
        queue.insert(b, entry(now + Duration::from_millis(500)));

        assert_eq!(queue.due_ids(now), vec![a, c]);
        assert_eq!(
            queue.due_ids(now + Duration::from_secs(1)),
            vec![a, b, c]
        );
    }

    #[test]
    fn next_deadline_is_earliest() {
        let mut counter = 0;
        let mut queue = TimerQueue::default();
        let now = Instant::now();

        assert_eq!(queue.next_deadline(), None);

        queue.insert(
            TimerId::alloc(&mut counter),
            entry(now + Duration::from_millis(300)),
        );
        queue.insert(
            TimerId::alloc(&mut counter),
            entry(now + Duration::from_millis(50)),
        );

        assert_eq!(queue.next_deadline(), Some(now + Duration::from_millis(50)));
    }

    #[test]
    fn zero_count_registers_nothing() {
        let mut counter = 0;
        let mut queue = TimerQueue::default();
        let id = TimerId::alloc(&mut counter);

        queue.insert(
            id,
            TimerEntry::new(
                Instant::now(),
                Duration::from_millis(10),
                Repeat::Times(0),
                noop(),
            ),
        );

        assert_eq!(queue.len(), 0);
        assert!(!queue.cancel(id));
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut counter = 0;
        let mut queue = TimerQueue::default();
        let id = TimerId::alloc(&mut counter);

        queue.insert(id, entry(Instant::now()));

        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        let base = clock.now();

        clock.advance(Duration::from_millis(250));

        assert_eq!(clock.now(), base + Duration::from_millis(250));
    }
}
