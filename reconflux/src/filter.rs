//! The admission filter: two gating stages with different purposes.
//!
//! Pre-check runs synchronously on the producer side before an event is
//! enqueued at all, rejecting the cheap, common cases. Post-check runs on
//! the consumer side at dispatch time and additionally enforces scope and a
//! user-supplied predicate, either of which may depend on mutable scan
//! state (and so may suspend).

use crate::event::{Event, TAG_HTTPX_ONLY, TAG_TARGET};
use crate::module::{ModuleFlags, ModuleKind, ModuleSpec};

/// The name reserved for the module that speculates `IP_ADDRESS` events out
/// of an `IP_RANGE` (CIDR) event. Any other module watching both types is
/// assumed to want the range, not every enumerated host, and is filtered
/// accordingly.
pub const SPECULATE_MODULE_NAME: &str = "speculate";

/// The name reserved for the module allowed to fetch `httpx-only` URLs
/// directly.
pub const HTTP_FETCH_MODULE_NAME: &str = "httpx";

/// The result of a pre-check or post-check pass. A reject with an empty
/// reason is silent (not logged) — used for the high-frequency "type not
/// watched" case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    /// The event may proceed.
    Accept,
    /// The event is rejected for `reason`, possibly empty (silent).
    Reject(String),
}

impl FilterOutcome {
    /// `true` for [`FilterOutcome::Accept`].
    pub fn is_accept(&self) -> bool {
        matches!(self, FilterOutcome::Accept)
    }

    /// The rejection reason, or `""` for an accepted event.
    pub fn reason(&self) -> &str {
        match self {
            FilterOutcome::Accept => "",
            FilterOutcome::Reject(reason) => reason,
        }
    }
}

/// Synchronous, producer-side admission check run before an event is
/// enqueued. `errored` is the module's current quarantine state.
pub fn precheck(spec: &ModuleSpec, errored: bool, event: &Event) -> FilterOutcome {
    if event.is_finished() {
        return FilterOutcome::Accept;
    }

    if errored {
        return FilterOutcome::Reject("module in error state".into());
    }

    if !spec.watches(event.event_type()) {
        // Silent: this is the overwhelmingly common rejection and would
        // otherwise drown every other log line.
        return FilterOutcome::Reject(String::new());
    }

    if spec.target_only && !event.has_tag(TAG_TARGET) {
        return FilterOutcome::Reject("module only accepts target events".into());
    }

    if event.event_type().starts_with("URL")
        && event.has_tag(TAG_HTTPX_ONLY)
        && spec.name != HTTP_FETCH_MODULE_NAME
    {
        return FilterOutcome::Reject("extension httpx-only".into());
    }

    if is_speculated_cidr_host(event) && spec.name != SPECULATE_MODULE_NAME && spec.watches_both_ip_range_and_address()
    {
        return FilterOutcome::Reject("module consumes IP ranges directly".into());
    }

    FilterOutcome::Accept
}

fn is_speculated_cidr_host(event: &Event) -> bool {
    event.event_type() == "IP_ADDRESS"
        && event.source().map(Event::event_type) == Some("IP_RANGE")
        && event.module() == Some(SPECULATE_MODULE_NAME)
}

/// The maximum `scope_distance` a non-output module will accept, given its
/// declarative configuration and the scan's current search distance.
pub fn max_scope_distance(spec: &ModuleSpec, scope_search_distance: i64) -> i64 {
    if spec.in_scope_only || spec.target_only {
        0
    } else {
        (scope_search_distance + spec.scope_distance_modifier.unwrap_or(0)).max(0)
    }
}

/// The scope- and whitelist-related half of post-check. Does not run the
/// user-supplied `filter_event` predicate or the output-module stats latch —
/// those require access to the module's callbacks and are layered on by the
/// caller (see [`crate::module::ModuleRuntime`]).
pub fn postcheck_builtin(
    spec: &ModuleSpec,
    event: &Event,
    in_whitelist: bool,
    scope_search_distance: i64,
) -> FilterOutcome {
    if event.is_finished() {
        return FilterOutcome::Accept;
    }

    if spec.flags.contains(ModuleFlags::ACTIVE) && event.has_tag(TAG_TARGET) && !in_whitelist {
        return FilterOutcome::Reject("not in whitelist; active module".into());
    }

    if spec.kind != ModuleKind::Output {
        if spec.in_scope_only && event.scope_distance() > 0 {
            return FilterOutcome::Reject("module is configured to be in scope only".into());
        }

        if spec.scope_distance_modifier.is_some() {
            if event.scope_distance() < 0 {
                return FilterOutcome::Reject("invalid scope distance".into());
            }
            if event.scope_distance() > max_scope_distance(spec, scope_search_distance) {
                return FilterOutcome::Reject("exceeds maximum scope distance".into());
            }
        }
    }

    FilterOutcome::Accept
}

/// Wraps a custom `filter_event` result with the standard prefix, matching
/// the "it did not meet custom filter criteria" phrasing used for every
/// module's bespoke predicate.
pub fn wrap_custom_filter_reject(reason: &str) -> FilterOutcome {
    if reason.is_empty() {
        FilterOutcome::Reject("it did not meet custom filter criteria".into())
    } else {
        FilterOutcome::Reject(format!("it did not meet custom filter criteria: {reason}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventData;
    use std::collections::HashSet;

    fn spec(name: &str) -> ModuleSpec {
        ModuleSpec::new(name, ModuleKind::Scan)
    }

    fn tags(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn finished_bypasses_precheck() {
        let s = spec("dnsresolve");
        let outcome = precheck(&s, true, &Event::finished());
        assert_eq!(outcome, FilterOutcome::Accept);
    }

    #[test]
    fn errored_module_rejects_everything_but_finished() {
        let mut s = spec("dnsresolve");
        s.watched_events.insert("DOMAIN".into());
        let e = Event::new("DOMAIN", 0, HashSet::new(), None, EventData::Empty, 3);
        assert_eq!(
            precheck(&s, true, &e),
            FilterOutcome::Reject("module in error state".into())
        );
    }

    #[test]
    fn unwatched_type_is_silently_rejected() {
        let mut s = spec("dnsresolve");
        s.watched_events.insert("DOMAIN".into());
        let e = Event::new("URL", 0, HashSet::new(), None, EventData::Empty, 3);
        assert_eq!(precheck(&s, false, &e), FilterOutcome::Reject(String::new()));
    }

    #[test]
    fn target_only_rejects_untagged_events() {
        let mut s = spec("dnsresolve");
        s.watched_events.insert("DOMAIN".into());
        s.target_only = true;
        let e = Event::new("DOMAIN", 0, HashSet::new(), None, EventData::Empty, 3);
        assert!(!precheck(&s, false, &e).is_accept());
        let e2 = Event::new("DOMAIN", 0, tags(&["target"]), None, EventData::Empty, 3);
        assert!(precheck(&s, false, &e2).is_accept());
    }

    #[test]
    fn httpx_only_url_rejected_for_non_httpx_module() {
        let mut s = spec("portscan");
        s.watched_events.insert("URL".into());
        let e = Event::new("URL_UNVERIFIED", 0, tags(&["httpx-only"]), None, EventData::Empty, 3);
        assert!(!precheck(&s, false, &e).is_accept());

        let mut httpx = spec(HTTP_FETCH_MODULE_NAME);
        httpx.watched_events.insert("URL".into());
        let e2 = Event::new("URL_UNVERIFIED", 0, tags(&["httpx-only"]), None, EventData::Empty, 3);
        assert!(precheck(&httpx, false, &e2).is_accept());
    }

    #[test]
    fn cidr_dedup_rejects_modules_watching_both_types() {
        let range = Event::new("IP_RANGE", 0, HashSet::new(), None, EventData::Empty, 3);
        let host = Event::new("IP_ADDRESS", 0, HashSet::new(), Some(range), EventData::Empty, 3);
        assert!(host.set_module_if_unset(SPECULATE_MODULE_NAME));

        let mut s = spec("portscan");
        s.watched_events.insert("IP_RANGE".into());
        s.watched_events.insert("IP_ADDRESS".into());
        assert_eq!(
            precheck(&s, false, &host),
            FilterOutcome::Reject("module consumes IP ranges directly".into())
        );

        let mut speculate = spec(SPECULATE_MODULE_NAME);
        speculate.watched_events.insert("IP_RANGE".into());
        speculate.watched_events.insert("IP_ADDRESS".into());
        assert!(precheck(&speculate, false, &host).is_accept());
    }

    #[test]
    fn in_scope_only_rejects_nonzero_distance() {
        let mut s = spec("portscan");
        s.watched_events.insert("*".into());
        s.in_scope_only = true;
        let far = Event::new("DOMAIN", 1, HashSet::new(), None, EventData::Empty, 3);
        assert_eq!(
            postcheck_builtin(&s, &far, true, 2),
            FilterOutcome::Reject("module is configured to be in scope only".into())
        );
        let near = Event::new("DOMAIN", 0, HashSet::new(), None, EventData::Empty, 3);
        assert!(postcheck_builtin(&s, &near, true, 2).is_accept());
    }

    #[test]
    fn scope_distance_modifier_bounds_distance() {
        let mut s = spec("portscan");
        s.watched_events.insert("*".into());
        s.scope_distance_modifier = Some(1);
        // scope_search_distance = 1 => max_scope_distance = 2
        let ok = Event::new("DOMAIN", 2, HashSet::new(), None, EventData::Empty, 3);
        assert!(postcheck_builtin(&s, &ok, true, 1).is_accept());
        let too_far = Event::new("DOMAIN", 3, HashSet::new(), None, EventData::Empty, 3);
        assert!(!postcheck_builtin(&s, &too_far, true, 1).is_accept());
        let invalid = Event::new("DOMAIN", -1, HashSet::new(), None, EventData::Empty, 3);
        assert!(!postcheck_builtin(&s, &invalid, true, 1).is_accept());
    }

    #[test]
    fn active_module_requires_whitelist_membership() {
        let mut s = spec("portscan");
        s.watched_events.insert("*".into());
        s.flags = ModuleFlags::ACTIVE;
        let e = Event::new("IP_ADDRESS", 0, tags(&["target"]), None, EventData::Empty, 3);
        assert!(!postcheck_builtin(&s, &e, false, 0).is_accept());
        assert!(postcheck_builtin(&s, &e, true, 0).is_accept());
    }
}
