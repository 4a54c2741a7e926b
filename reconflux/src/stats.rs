//! Task counters and the status envelope used by the controller's global
//! quiescence detector.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Tracks the number of in-flight user-callback invocations for a module.
///
/// Incremented on entry to any block that invokes `setup`, `handle_event`,
/// `handle_batch`, `finish`, `report`, or `cleanup`, and decremented on exit
/// regardless of outcome — acquire a [`TaskCounterGuard`] rather than
/// managing the count by hand, so a panicking or early-returning callback
/// still decrements it.
#[derive(Debug, Default)]
pub struct TaskCounter {
    count: AtomicUsize,
}

impl TaskCounter {
    /// Builds a counter starting at zero.
    pub fn new() -> Arc<Self> {
        Arc::new(TaskCounter { count: AtomicUsize::new(0) })
    }

    /// Increments the counter and returns a guard that decrements it on
    /// drop.
    pub fn enter(self: &Arc<Self>) -> TaskCounterGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        TaskCounterGuard { counter: Arc::clone(self) }
    }

    /// The number of in-flight callback invocations right now.
    pub fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

/// RAII guard returned by [`TaskCounter::enter`]. Decrements the counter
/// when dropped, however the guarded block exits.
pub struct TaskCounterGuard {
    counter: Arc<TaskCounter>,
}

impl Drop for TaskCounterGuard {
    fn drop(&mut self) {
        self.counter.count.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Queue depth pair reported in a [`Status`] snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct EventCounts {
    /// Items currently buffered in the incoming queue.
    pub incoming: usize,
    /// Items currently buffered in the outgoing queue.
    pub outgoing: usize,
}

/// A point-in-time snapshot of a module's progress, as exposed to the
/// controller. Reads of the underlying counters are advisory — the
/// controller's quiescence detector must re-sample before trusting
/// [`Status::finished`] (see the two-phase check in the concurrency model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct Status {
    /// Current incoming/outgoing queue depths.
    pub events: EventCounts,
    /// Number of in-flight callback invocations.
    pub tasks: usize,
    /// Whether the module has entered quarantine.
    pub errored: bool,
    /// `tasks > 0`, i.e. whether a callback is in flight right now.
    pub running: bool,
}

impl Status {
    /// `¬running ∧ incoming empty ∧ outgoing empty`.
    pub fn finished(&self) -> bool {
        !self.running && self.events.incoming == 0 && self.events.outgoing == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_increments_and_decrements() {
        let counter = TaskCounter::new();
        assert_eq!(counter.get(), 0);
        {
            let _g1 = counter.enter();
            assert_eq!(counter.get(), 1);
            let _g2 = counter.enter();
            assert_eq!(counter.get(), 2);
        }
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn guard_decrements_on_early_return() {
        let counter = TaskCounter::new();
        fn scoped(counter: &Arc<TaskCounter>) {
            let _guard = counter.enter();
            if true {
                return;
            }
        }
        scoped(&counter);
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn finished_requires_empty_queues_and_no_tasks() {
        let running = Status {
            events: EventCounts { incoming: 0, outgoing: 0 },
            tasks: 1,
            errored: false,
            running: true,
        };
        assert!(running.running);
        assert!(!running.finished());

        let quiescent = Status {
            events: EventCounts { incoming: 0, outgoing: 0 },
            tasks: 0,
            errored: false,
            running: false,
        };
        assert!(quiescent.finished());

        let draining = Status {
            events: EventCounts { incoming: 2, outgoing: 0 },
            tasks: 0,
            errored: false,
            running: false,
        };
        assert!(!draining.finished());
    }
}
