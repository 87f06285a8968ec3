// SPDX-License-Identifier: Apache-2.0

//! Priority-ordered execution of flush work.
//!
//! A min-heap of scheduled entries ordered by `(deadline, priority,
//! insertion)`: earlier deadlines run first, ties break toward the lower
//! priority number, and equal entries keep their insertion order.
//! Periodic entries re-enter the heap at `deadline + period` after each
//! run, so cadence does not drift with execution time. Actions always run
//! outside the heap lock.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use svcctl_aggregation::Clock;

type Action = Box<dyn FnMut() + Send>;

struct ScheduledEntry {
    when_nanos: u64,
    priority: u32,
    seq: u64,
    period: Option<Duration>,
    action: Action,
}

impl ScheduledEntry {
    fn key(&self) -> (u64, u32, u64) {
        (self.when_nanos, self.priority, self.seq)
    }
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// A time-ordered, priority-tie-broken task queue with its own run loop.
pub struct Scheduler {
    heap: Mutex<BinaryHeap<Reverse<ScheduledEntry>>>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    next_seq: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Creates an empty scheduler reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            next_seq: AtomicU64::new(0),
            clock,
        }
    }

    /// Schedules a one-shot action `delay` from now.
    pub fn schedule(&self, delay: Duration, priority: u32, action: impl FnOnce() + Send + 'static) {
        let mut action = Some(action);
        self.push(
            delay,
            None,
            priority,
            Box::new(move || {
                if let Some(run) = action.take() {
                    run();
                }
            }),
        );
    }

    /// Schedules a recurring action, first firing one `period` from now.
    pub fn schedule_periodic(
        &self,
        period: Duration,
        priority: u32,
        action: impl FnMut() + Send + 'static,
    ) {
        self.push(period, Some(period), priority, Box::new(action));
    }

    fn push(&self, delay: Duration, period: Option<Duration>, priority: u32, action: Action) {
        let when_nanos = self
            .clock
            .now_nanos()
            .saturating_add(delay.as_nanos() as u64);
        let entry = ScheduledEntry {
            when_nanos,
            priority,
            seq: self.next_seq.fetch_add(1, AtomicOrdering::Relaxed),
            period,
            action,
        };
        self.heap.lock().push(Reverse(entry));
        // A new head may be earlier than whatever the run loop sleeps on.
        let _ = self.wakeup.notify_all();
    }

    /// Runs until the heap empties or [`Scheduler::stop`] is called,
    /// sleeping between deadlines.
    pub fn run(&self) {
        loop {
            if self.shutdown.load(AtomicOrdering::Acquire) {
                return;
            }
            let mut heap = self.heap.lock();
            let Some(head_due) = heap.peek().map(|Reverse(entry)| entry.when_nanos) else {
                return;
            };
            let now = self.clock.now_nanos();
            if head_due > now {
                let gap = Duration::from_nanos(head_due - now);
                let _ = self.wakeup.wait_for(&mut heap, gap);
                continue;
            }
            let Some(Reverse(entry)) = heap.pop() else {
                continue;
            };
            drop(heap);
            self.run_entry(entry);
        }
    }

    /// Runs every due entry, returning as soon as the head is still in
    /// the future (or the heap is empty). Never sleeps.
    pub fn run_pending(&self) {
        loop {
            if self.shutdown.load(AtomicOrdering::Acquire) {
                return;
            }
            let mut heap = self.heap.lock();
            let due = heap
                .peek()
                .is_some_and(|Reverse(entry)| entry.when_nanos <= self.clock.now_nanos());
            if !due {
                return;
            }
            let Some(Reverse(entry)) = heap.pop() else {
                return;
            };
            drop(heap);
            self.run_entry(entry);
        }
    }

    /// Stops the run loop and prevents periodic entries from
    /// re-entering. Idempotent.
    pub fn stop(&self) {
        self.shutdown.store(true, AtomicOrdering::Release);
        let _ = self.wakeup.notify_all();
    }

    /// Number of entries waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.heap.lock().len()
    }

    fn run_entry(&self, mut entry: ScheduledEntry) {
        (entry.action)();
        let Some(period) = entry.period else {
            return;
        };
        if self.shutdown.load(AtomicOrdering::Acquire) {
            return;
        }
        entry.when_nanos = entry
            .when_nanos
            .saturating_add(period.as_nanos() as u64);
        entry.seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.heap.lock().push(Reverse(entry));
        let _ = self.wakeup.notify_all();
    }
}
