//! The contract a module uses to reach the scan controller: minting events,
//! querying scope/whitelist state, recording stats, and making outbound
//! requests.
//!
//! Concrete scan bootstrap, target management, and HTTP/DNS plumbing are
//! out of scope for this crate; [`ScanController`] is the seam a host
//! application implements to supply them.

use std::collections::HashSet;

use async_trait::async_trait;

use crate::error::Error;
use crate::event::{Event, EventData};

/// Everything a module needs from the surrounding scan to do its job,
/// injected once at module construction rather than reached for through
/// ambient global state.
#[async_trait]
pub trait ScanController: Send + Sync {
    /// `true` once the scan has begun winding down. Polled cooperatively by
    /// worker loops; in-flight callbacks are never interrupted because of
    /// it.
    fn stopping(&self) -> bool;

    /// Membership test used by the post-check whitelist rule for active
    /// modules.
    fn whitelisted(&self, event: &Event) -> bool;

    /// The scan's current search distance, used to compute a module's
    /// effective maximum scope distance.
    fn scope_search_distance(&self) -> i64;

    /// Mints a new event. May fail validation (e.g. malformed payload for
    /// the given type).
    async fn make_event(
        &self,
        event_type: &str,
        scope_distance: i64,
        tags: HashSet<String>,
        source: Option<Event>,
        data: EventData,
        priority: u8,
    ) -> Result<Event, Error>;

    /// Records that `module` consumed `event`.
    async fn event_consumed(&self, event: &Event, module: &str);

    /// Records that an output module produced `event`.
    async fn event_produced(&self, event: &Event);

    /// The HTTP/DNS request helper. A `None` return signals failure and is
    /// what drives [`crate::module::ModuleContext::request_with_fail_count`]'s
    /// threshold counter.
    async fn request(&self, url: &str) -> Option<serde_json::Value>;

    /// Scoped acquisition of an error-catching context: logs `err` tagged
    /// with `context` and suppresses it. Never propagates.
    fn acatch(&self, context: &str, err: &Error) {
        crate::logging::warning(&format!("{context}: {err}"), Some(err));
    }
}
