//! The event data model: an immutable record exchanged between modules.
//!
//! Events form a DAG through [`Event::source`]: each event optionally
//! references the event that caused it to be minted. The reference is a
//! cheap `Arc` clone, never a cycle — a module only ever sets `source` to an
//! event it already holds, at construction time.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Reserved sentinel event type. Bypasses all filtering and triggers
/// [`crate::module::Module::finish`].
pub const FINISHED: &str = "FINISHED";

/// Recognized tag marking an event as a scan target.
pub const TAG_TARGET: &str = "target";

/// Recognized tag marking a URL as only fetchable through the HTTP-fetch
/// module (`httpx`-equivalent), never scanned directly by other modules.
pub const TAG_HTTPX_ONLY: &str = "httpx-only";

/// Lowest numeric priority value (highest scheduling priority).
pub const PRIORITY_MIN: u8 = 1;
/// Highest numeric priority value (lowest scheduling priority).
pub const PRIORITY_MAX: u8 = 5;

/// Opaque payload carried by an [`Event`].
///
/// The shape of `data` depends on `event_type`; this is represented as a
/// tagged variant over the payload kinds the core itself ever inspects, plus
/// an opaque fallback so modules this core doesn't know about can still ride
/// along unmodified.
#[derive(Debug, Clone, PartialEq)]
pub enum EventData {
    /// A bare string payload (hostname, URL, IP literal, ...).
    Text(String),
    /// A structured payload with no special meaning to the core.
    Opaque(serde_json::Value),
    /// No payload.
    Empty,
}

impl Default for EventData {
    fn default() -> Self {
        EventData::Empty
    }
}

#[derive(Debug)]
struct EventInner {
    event_type: String,
    scope_distance: i64,
    tags: HashSet<String>,
    source: Option<Event>,
    module: OnceLock<String>,
    data: EventData,
    stats_recorded: AtomicBool,
    priority: u8,
}

/// An immutable, cheaply-cloneable record flowing through the pipeline.
///
/// `Event` is a thin `Arc` handle; cloning it is an atomic refcount bump, not
/// a deep copy, which is what lets `source` form a DAG without duplicating
/// history on every hop.
#[derive(Debug, Clone)]
pub struct Event {
    inner: Arc<EventInner>,
}

impl Event {
    /// Builds a new event. `priority` is clamped into `[PRIORITY_MIN,
    /// PRIORITY_MAX]`. A negative `scope_distance` is accepted here (the
    /// admission filter, not construction, is where invalid distances are
    /// rejected) so that malformed input can still be observed and logged.
    pub fn new(
        event_type: impl Into<String>,
        scope_distance: i64,
        tags: HashSet<String>,
        source: Option<Event>,
        data: EventData,
        priority: u8,
    ) -> Self {
        Event {
            inner: Arc::new(EventInner {
                event_type: event_type.into(),
                scope_distance,
                tags,
                source,
                module: OnceLock::new(),
                data,
                stats_recorded: AtomicBool::new(false),
                priority: priority.clamp(PRIORITY_MIN, PRIORITY_MAX),
            }),
        }
    }

    /// Builds the reserved `FINISHED` sentinel event.
    pub fn finished() -> Self {
        Event::new(FINISHED, 0, HashSet::new(), None, EventData::Empty, PRIORITY_MIN)
    }

    /// The event's type tag.
    pub fn event_type(&self) -> &str {
        &self.inner.event_type
    }

    /// `true` for the reserved `FINISHED` sentinel.
    pub fn is_finished(&self) -> bool {
        self.inner.event_type == FINISHED
    }

    /// Graph distance from the nearest seed target. Negative values are
    /// invalid and must be rejected by the admission filter before reaching
    /// a module's handler.
    pub fn scope_distance(&self) -> i64 {
        self.inner.scope_distance
    }

    /// The event's tag set.
    pub fn tags(&self) -> &HashSet<String> {
        &self.inner.tags
    }

    /// Shorthand for `tags().contains(tag)`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.inner.tags.contains(tag)
    }

    /// The event that caused this one to be minted, if any.
    pub fn source(&self) -> Option<&Event> {
        self.inner.source.as_ref()
    }

    /// The module that produced this event, if attribution has been set.
    pub fn module(&self) -> Option<&str> {
        self.inner.module.get().map(String::as_str)
    }

    /// Fills in module attribution if it has not already been set. Returns
    /// `true` if this call performed the assignment. Single-assignment: a
    /// second caller observes `false` and the original attribution stands.
    pub fn set_module_if_unset(&self, module: impl Into<String>) -> bool {
        self.inner.module.set(module.into()).is_ok()
    }

    /// The event's opaque payload.
    pub fn data(&self) -> &EventData {
        &self.inner.data
    }

    /// Scheduling priority, 1 (highest) through 5 (lowest).
    pub fn priority(&self) -> u8 {
        self.inner.priority
    }

    /// Flips the one-shot "already counted in stats" latch. Returns the
    /// previous value: `false` means this call is the one that should record
    /// the stat, `true` means some earlier caller already did.
    pub fn mark_stats_recorded(&self) -> bool {
        self.inner.stats_recorded.swap(true, Ordering::AcqRel)
    }

    /// Whether the produced-event stat has already been recorded for this
    /// event.
    pub fn stats_recorded(&self) -> bool {
        self.inner.stats_recorded.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_is_clamped() {
        let e = Event::new("PORT", 0, HashSet::new(), None, EventData::Empty, 9);
        assert_eq!(e.priority(), PRIORITY_MAX);
        let e = Event::new("PORT", 0, HashSet::new(), None, EventData::Empty, 0);
        assert_eq!(e.priority(), PRIORITY_MIN);
    }

    #[test]
    fn module_attribution_is_single_assignment() {
        let e = Event::new("DOMAIN", 0, HashSet::new(), None, EventData::Empty, 3);
        assert!(e.set_module_if_unset("dnsresolve"));
        assert!(!e.set_module_if_unset("other"));
        assert_eq!(e.module(), Some("dnsresolve"));
    }

    #[test]
    fn stats_latch_flips_once() {
        let e = Event::new("DOMAIN", 0, HashSet::new(), None, EventData::Empty, 3);
        assert!(!e.mark_stats_recorded());
        assert!(e.mark_stats_recorded());
    }

    #[test]
    fn finished_is_recognized() {
        assert!(Event::finished().is_finished());
        let e = Event::new("DOMAIN", 0, HashSet::new(), None, EventData::Empty, 1);
        assert!(!e.is_finished());
    }

    #[test]
    fn source_chain_is_a_dag_by_sharing() {
        let root = Event::new("IP_RANGE", 0, HashSet::new(), None, EventData::Empty, 2);
        let child = Event::new(
            "IP_ADDRESS",
            0,
            HashSet::new(),
            Some(root.clone()),
            EventData::Empty,
            2,
        );
        assert_eq!(child.source().unwrap().event_type(), "IP_RANGE");
    }
}
