//! The queue pair every module owns: a bounded, priority-ordered incoming
//! queue and outgoing queue, plus the three condition variables that
//! synchronize workers with producers and the controller.
//!
//! A Python `asyncio.Condition` wakes every waiter on notify; [`Notify`] only
//! wakes one waiter per `notify_one` permit by default, so every notify here
//! uses `notify_waiters` to preserve "wake all awaiters" semantics.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::event::Event;

/// Per-event options accompanying an outgoing emit, passed through to the
/// controller untouched.
#[derive(Clone, Default)]
pub struct EmitOptions {
    /// Invoked by the controller once the event has been accepted
    /// downstream.
    pub on_success_callback: Option<std::sync::Arc<dyn Fn(&Event) + Send + Sync>>,
    /// If set, the controller may drop this event rather than routing it
    /// when this predicate holds.
    pub abort_if: bool,
    /// Hint that this event should skip normal scheduling and be routed as
    /// soon as possible.
    pub quick: bool,
}

impl std::fmt::Debug for EmitOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmitOptions")
            .field("has_on_success_callback", &self.on_success_callback.is_some())
            .field("abort_if", &self.abort_if)
            .field("quick", &self.quick)
            .finish()
    }
}

trait Prioritized {
    fn priority(&self) -> u8;
}

impl Prioritized for Event {
    fn priority(&self) -> u8 {
        Event::priority(self)
    }
}

impl Prioritized for (Event, EmitOptions) {
    fn priority(&self) -> u8 {
        self.0.priority()
    }
}

struct Slot<T> {
    priority: u8,
    seq: u64,
    value: T,
}

impl<T> PartialEq for Slot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl<T> Eq for Slot<T> {}

impl<T> Ord for Slot<T> {
    // BinaryHeap is a max-heap; invert priority (lower value = higher
    // priority) and invert sequence (earlier arrival = higher priority) so
    // `.pop()` yields the lowest-priority-number, earliest-arrival item.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl<T> PartialOrd for Slot<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A bounded priority queue, stable FIFO within a priority band. Lazily
/// empty until first push; may be permanently disabled (quarantine), at
/// which point every subsequent push is a silent no-op.
struct PriorityQueue<T> {
    heap: Mutex<BinaryHeap<Slot<T>>>,
    seq: AtomicU64,
    disabled: AtomicBool,
}

impl<T: Prioritized> PriorityQueue<T> {
    fn new() -> Self {
        PriorityQueue {
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            disabled: AtomicBool::new(false),
        }
    }

    /// Enqueues `value`. Returns `false` without enqueuing if the queue has
    /// been disabled — `queue_event` must be idempotent against a disabled
    /// queue, never an error.
    fn push(&self, value: T) -> bool {
        if self.disabled.load(AtomicOrdering::Acquire) {
            return false;
        }
        let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
        let priority = value.priority();
        let mut heap = self.heap.lock().expect("queue mutex poisoned");
        heap.push(Slot { priority, seq, value });
        true
    }

    fn try_pop(&self) -> Option<T> {
        let mut heap = self.heap.lock().expect("queue mutex poisoned");
        heap.pop().map(|slot| slot.value)
    }

    fn len(&self) -> usize {
        self.heap.lock().expect("queue mutex poisoned").len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_disabled(&self) -> bool {
        self.disabled.load(AtomicOrdering::Acquire)
    }

    /// Synchronously drains every queued item and permanently disables the
    /// queue. A disabled queue is never re-enabled.
    fn disable_and_drain(&self) -> Vec<T> {
        self.disabled.store(true, AtomicOrdering::Release);
        let mut heap = self.heap.lock().expect("queue mutex poisoned");
        let drained = std::mem::take(&mut *heap).into_sorted_vec();
        drained.into_iter().map(|slot| slot.value).collect()
    }
}

/// Incoming and outgoing priority queues plus the three condition variables
/// that coordinate a module's workers with its producers and the
/// controller.
pub struct QueuePair {
    incoming: PriorityQueue<Event>,
    outgoing: PriorityQueue<(Event, EmitOptions)>,
    /// Signalled after a successful enqueue onto `incoming`.
    pub event_received: Notify,
    /// Signalled after the controller drains one item from `outgoing`.
    pub event_dequeued: Notify,
    /// Reserved for the controller's global quiescence detector.
    pub event_queued: Notify,
}

impl Default for QueuePair {
    fn default() -> Self {
        Self::new()
    }
}

impl QueuePair {
    /// Builds a fresh, enabled queue pair.
    pub fn new() -> Self {
        QueuePair {
            incoming: PriorityQueue::new(),
            outgoing: PriorityQueue::new(),
            event_received: Notify::new(),
            event_dequeued: Notify::new(),
            event_queued: Notify::new(),
        }
    }

    /// Enqueues an event for this module to process. Idempotent against a
    /// disabled queue (never throws, never blocks).
    pub fn queue_event(&self, event: Event) {
        if self.incoming.push(event) {
            self.event_received.notify_waiters();
        }
    }

    /// Non-blocking dequeue from the incoming queue.
    pub fn try_dequeue_incoming(&self) -> Option<Event> {
        self.incoming.try_pop()
    }

    /// Enqueues a derived event for the controller to route downstream.
    pub fn queue_outgoing_event(&self, event: Event, options: EmitOptions) {
        if self.outgoing.push((event, options)) {
            self.event_queued.notify_waiters();
        }
    }

    /// Controller-facing drain primitive: removes one item from the
    /// outgoing queue and wakes any worker suspended on backpressure.
    pub fn dequeue_outgoing_event(&self) -> Option<(Event, EmitOptions)> {
        let item = self.outgoing.try_pop();
        if item.is_some() {
            self.event_dequeued.notify_waiters();
        }
        item
    }

    /// Number of items currently buffered in the incoming queue.
    pub fn incoming_len(&self) -> usize {
        self.incoming.len()
    }

    /// Number of items currently buffered in the outgoing queue.
    pub fn outgoing_len(&self) -> usize {
        self.outgoing.len()
    }

    /// `true` once [`Self::quarantine_incoming`] has been called.
    pub fn is_incoming_disabled(&self) -> bool {
        self.incoming.is_disabled()
    }

    /// Synchronously drains and permanently disables the incoming queue.
    /// Called exactly once, from `set_error_state`. The outgoing queue is
    /// left alive so pending outputs can still be harvested.
    pub fn quarantine_incoming(&self) -> Vec<Event> {
        let drained = self.incoming.disable_and_drain();
        // Wake anyone blocked dequeuing so they observe the disabled queue
        // on their very next attempt instead of hanging forever.
        self.event_received.notify_waiters();
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ev(priority: u8) -> Event {
        Event::new("DOMAIN", 0, HashSet::new(), None, crate::event::EventData::Empty, priority)
    }

    #[test]
    fn pops_lowest_priority_number_first() {
        let q = QueuePair::new();
        q.queue_event(ev(3));
        q.queue_event(ev(1));
        q.queue_event(ev(2));
        assert_eq!(q.try_dequeue_incoming().unwrap().priority(), 1);
        assert_eq!(q.try_dequeue_incoming().unwrap().priority(), 2);
        assert_eq!(q.try_dequeue_incoming().unwrap().priority(), 3);
    }

    #[test]
    fn stable_fifo_within_priority_band() {
        let q = QueuePair::new();
        for i in 0..5u8 {
            q.queue_event(Event::new(
                format!("E{i}"),
                0,
                HashSet::new(),
                None,
                crate::event::EventData::Empty,
                2,
            ));
        }
        let mut seen = Vec::new();
        while let Some(e) = q.try_dequeue_incoming() {
            seen.push(e.event_type().to_string());
        }
        assert_eq!(seen, vec!["E0", "E1", "E2", "E3", "E4"]);
    }

    #[test]
    fn disabled_queue_silently_drops_pushes() {
        let q = QueuePair::new();
        q.queue_event(ev(1));
        let drained = q.quarantine_incoming();
        assert_eq!(drained.len(), 1);
        assert!(q.is_incoming_disabled());
        q.queue_event(ev(1));
        assert!(q.try_dequeue_incoming().is_none());
    }

    #[test]
    fn dequeue_outgoing_notifies_dequeued() {
        let q = QueuePair::new();
        q.queue_outgoing_event(ev(1), EmitOptions::default());
        assert_eq!(q.outgoing_len(), 1);
        let (event, _opts) = q.dequeue_outgoing_event().unwrap();
        assert_eq!(event.priority(), 1);
        assert_eq!(q.outgoing_len(), 0);
    }
}
