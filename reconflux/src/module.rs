//! The module runtime: per-module lifecycle, worker tasks, batching, and
//! error quarantine. This is the core of the crate — everything else
//! (queues, filters, the controller contract) exists to serve this loop.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_yaml::Value;
use tokio::task::JoinHandle;

use crate::config::ModuleOptions;
use crate::controller::ScanController;
use crate::error::Error;
use crate::event::{Event, EventData};
use crate::filter::{self, FilterOutcome};
use crate::logging::{self, LogLevel};
use crate::queue::{EmitOptions, QueuePair};
use crate::stats::{EventCounts, Status, TaskCounter};

bitflags::bitflags! {
    /// A module's declared behavioral flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ModuleFlags: u8 {
        /// Never touches the target directly (reads only).
        const PASSIVE = 0b01;
        /// Directly interacts with the target; subject to whitelist gating.
        const ACTIVE  = 0b10;
    }
}

/// Whether a module is an ordinary scan-graph stage or a terminal output
/// sink. Output modules skip scope gating and additionally record a
/// produced-event stat on first successful post-check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// An ordinary pipeline stage.
    Scan,
    /// A terminal sink (report writers, data exporters, ...).
    Output,
}

/// A module's declarative, type-level configuration — the knobs a module
/// author sets once, as opposed to the mutable runtime state in
/// [`ModuleRuntime`].
#[derive(Debug, Clone)]
pub struct ModuleSpec {
    /// The module's unique name, used in filter rules and logging.
    pub name: String,
    /// Scan stage or output sink.
    pub kind: ModuleKind,
    /// Event types this module wants to see. `"*"` means any.
    pub watched_events: HashSet<String>,
    /// Event types this module may emit. Descriptive only — not enforced by
    /// the runtime.
    pub produced_events: HashSet<String>,
    /// Behavioral flags.
    pub flags: ModuleFlags,
    /// Whether this module wants to see events the controller has already
    /// flagged as duplicates. Descriptive; deduplication itself is a
    /// controller concern (at-least-once delivery, fingerprint-based).
    pub accept_dupes: bool,
    /// Whether this module's own outputs should be suppressed from
    /// downstream deduplication accounting. Descriptive, as above.
    pub suppress_dupes: bool,
    /// Adjustment applied to the scan's search distance to compute this
    /// module's maximum acceptable scope distance. `None` disables the
    /// scope-distance post-check entirely.
    pub scope_distance_modifier: Option<i64>,
    /// Only accept events tagged `target`.
    pub target_only: bool,
    /// Only accept events with `scope_distance == 0`.
    pub in_scope_only: bool,
    /// Number of concurrent worker tasks to spawn.
    pub max_event_handlers: usize,
    /// `1` for the single-event dispatch arm; `>1` for the batch arm.
    pub batch_size: usize,
    /// Historical tail-latency bound for partially-filled batches. Kept for
    /// configuration fidelity; see `DESIGN.md` for why the runtime does not
    /// drive a periodic `report()` off of it.
    pub batch_wait: Duration,
    /// Consecutive null request responses before this module self-quarantines.
    pub failed_request_abort_threshold: usize,
    /// Scheduling priority inherited by events this module mints, 1
    /// (highest) through 5 (lowest).
    pub priority: u8,
    /// Outgoing queue capacity before backpressure kicks in. `0` = unbounded.
    pub qsize: usize,
    /// This module's declared configuration surface. Controller-supplied
    /// overrides are merged against it at construction time, before `setup()`
    /// runs; an unknown override key fails construction outright.
    pub options: ModuleOptions,
}

impl ModuleSpec {
    /// A spec with conservative single-worker, single-event, unbounded
    /// defaults.
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        ModuleSpec {
            name: name.into(),
            kind,
            watched_events: HashSet::new(),
            produced_events: HashSet::new(),
            flags: ModuleFlags::PASSIVE,
            accept_dupes: false,
            suppress_dupes: false,
            scope_distance_modifier: None,
            target_only: false,
            in_scope_only: false,
            max_event_handlers: 1,
            batch_size: 1,
            batch_wait: Duration::from_secs(0),
            failed_request_abort_threshold: usize::MAX,
            priority: 3,
            qsize: 0,
            options: ModuleOptions::new(),
        }
    }

    /// `true` if `event_type` is in [`Self::watched_events`], or the module
    /// watches everything (`"*"`).
    pub fn watches(&self, event_type: &str) -> bool {
        self.watched_events.contains("*") || self.watched_events.contains(event_type)
    }

    pub(crate) fn watches_both_ip_range_and_address(&self) -> bool {
        self.watched_events.contains("IP_RANGE") && self.watched_events.contains("IP_ADDRESS")
    }
}

/// The outcome of a module's `setup()` callback.
#[derive(Debug, Clone)]
pub enum SetupOutcome {
    /// Setup succeeded; workers will be started.
    Success {
        /// An optional informational message to log.
        message: Option<String>,
    },
    /// Setup failed unrecoverably; the module is permanently disabled and
    /// never started.
    HardFail(String),
    /// Setup failed in an expected, recoverable way (e.g. a missing
    /// optional wordlist); the module is disabled but the scan continues
    /// without reporting a hard failure.
    SoftFail(String),
}

/// Building block for a `setup()` that requires an optional API key: the
/// module supplies whether a key is configured and whether its own ping
/// check passed. Not invoked by the runtime itself.
pub fn require_api_key_outcome(api_key_configured: bool, ping_ok: bool) -> SetupOutcome {
    if !api_key_configured {
        return SetupOutcome::SoftFail("no API key configured".into());
    }
    if ping_ok {
        SetupOutcome::Success { message: None }
    } else {
        SetupOutcome::SoftFail("API key failed to validate".into())
    }
}

/// The capability interface every module implements. All methods have
/// sensible no-op defaults; a module overrides only the ones it needs.
#[async_trait]
pub trait Module: Send + Sync {
    /// This module's declarative configuration.
    fn spec(&self) -> &ModuleSpec;

    /// Runs once before workers start. See [`SetupOutcome`] for the
    /// true/false/message mapping.
    async fn setup(&self, _ctx: &ModuleContext<'_>) -> Result<SetupOutcome, Error> {
        Ok(SetupOutcome::Success { message: None })
    }

    /// Handles a single admitted event (`batch_size == 1`).
    async fn handle_event(&self, _event: Event, _ctx: &ModuleContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    /// Handles a batch of admitted events (`batch_size > 1`).
    async fn handle_batch(&self, _events: Vec<Event>, _ctx: &ModuleContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    /// Runs when a `FINISHED` sentinel is observed. May run more than once
    /// per module lifetime.
    async fn finish(&self, _ctx: &ModuleContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    /// Runs exactly once, immediately after the first `finish()`.
    async fn report(&self, _ctx: &ModuleContext<'_>) -> Result<(), Error> {
        Ok(())
    }

    /// Custom post-check predicate, run after the built-in scope/whitelist
    /// checks accept an event.
    async fn filter_event(&self, _event: &Event, _ctx: &ModuleContext<'_>) -> FilterOutcome {
        FilterOutcome::Accept
    }

    /// Runs exactly once per module per scan, best-effort (errors are
    /// logged and swallowed).
    async fn cleanup(&self, _ctx: &ModuleContext<'_>) -> Result<(), Error> {
        Ok(())
    }
}

/// Borrowed handle a module's callbacks use to reach the scan controller
/// and mint/emit events, scoped to a single callback invocation.
pub struct ModuleContext<'a> {
    runtime: &'a ModuleRuntime,
}

impl<'a> ModuleContext<'a> {
    /// The scan controller this module was constructed against.
    pub fn scan(&self) -> &dyn ScanController {
        self.runtime.scan.as_ref()
    }

    /// This module's declarative configuration.
    pub fn spec(&self) -> &ModuleSpec {
        &self.runtime.spec
    }

    /// This module's effective configuration: declared defaults merged with
    /// the controller-supplied overrides given at construction time.
    pub fn config(&self) -> &IndexMap<String, Value> {
        &self.runtime.config
    }

    /// Mints a new event via the scan controller, attributing it to this
    /// module if it doesn't already carry attribution. A validation failure
    /// either propagates (`raise_error = true`) or is warned-and-dropped.
    pub async fn make_event(
        &self,
        event_type: &str,
        scope_distance: i64,
        tags: HashSet<String>,
        source: Option<Event>,
        data: EventData,
        raise_error: bool,
    ) -> Result<Option<Event>, Error> {
        match self
            .runtime
            .scan
            .make_event(event_type, scope_distance, tags, source, data, self.runtime.spec.priority)
            .await
        {
            Ok(event) => {
                event.set_module_if_unset(self.runtime.spec.name.clone());
                Ok(Some(event))
            }
            Err(e) if raise_error => Err(e),
            Err(e) => {
                self.runtime.scan.acatch("make_event", &e);
                Ok(None)
            }
        }
    }

    /// Mints an event and queues it on the outgoing queue for the
    /// controller to route downstream. Never raises; a validation failure
    /// is warned and the call returns `Ok(None)`.
    pub async fn emit_event(
        &self,
        event_type: &str,
        scope_distance: i64,
        tags: HashSet<String>,
        source: Option<Event>,
        data: EventData,
        options: EmitOptions,
    ) -> Result<Option<Event>, Error> {
        let event = self
            .make_event(event_type, scope_distance, tags, source, data, false)
            .await?;
        if let Some(event) = &event {
            self.runtime.queues.queue_outgoing_event(event.clone(), options);
        }
        Ok(event)
    }

    /// Wraps the scan's request helper: a `None` response increments this
    /// module's failure counter, a `Some` response resets it. Crossing
    /// `failed_request_abort_threshold` self-quarantines the module.
    pub async fn request_with_fail_count(&self, url: &str) -> Option<serde_json::Value> {
        let result = self.runtime.scan.request(url).await;
        match &result {
            Some(_) => self.runtime.request_failures.store(0, Ordering::Release),
            None => {
                let failures = self.runtime.request_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.runtime.spec.failed_request_abort_threshold {
                    self.runtime
                        .set_error_state("exceeded failed-request threshold")
                        .await;
                }
            }
        }
        result
    }
}

/// The owning, shared handle for a running module: its declarative spec,
/// its queue pair, its error/cleanup/task-count state, and a reference to
/// the scan controller it was constructed against.
pub struct ModuleRuntime {
    spec: ModuleSpec,
    module: Arc<dyn Module>,
    scan: Arc<dyn ScanController>,
    config: IndexMap<String, Value>,
    queues: QueuePair,
    errored: AtomicBool,
    cleanedup: AtomicBool,
    reported: AtomicBool,
    task_counter: Arc<TaskCounter>,
    request_failures: AtomicUsize,
    cleanup_callbacks: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ModuleRuntime {
    /// Builds a runtime around `module`, wired to `scan`, merging
    /// controller-supplied `config_overrides` against the module's declared
    /// [`ModuleOptions`]. An override key the module never declared fails
    /// construction with [`Error::Configuration`] — the module never reaches
    /// the worker-start state. Does not start workers; call [`Self::setup`]
    /// then [`Self::start`].
    pub fn new(
        module: Arc<dyn Module>,
        scan: Arc<dyn ScanController>,
        config_overrides: &HashMap<String, Value>,
    ) -> Result<Arc<Self>, Error> {
        let spec = module.spec().clone();
        let config = spec.options.merge(config_overrides)?;
        Ok(Arc::new(ModuleRuntime {
            spec,
            module,
            scan,
            config,
            queues: QueuePair::new(),
            errored: AtomicBool::new(false),
            cleanedup: AtomicBool::new(false),
            reported: AtomicBool::new(false),
            task_counter: TaskCounter::new(),
            request_failures: AtomicUsize::new(0),
            cleanup_callbacks: Mutex::new(Vec::new()),
            workers: Mutex::new(Vec::new()),
        }))
    }

    /// This module's name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// This module's declarative configuration.
    pub fn spec(&self) -> &ModuleSpec {
        &self.spec
    }

    /// `true` once this module has entered quarantine.
    pub fn errored(&self) -> bool {
        self.errored.load(Ordering::Acquire)
    }

    /// A point-in-time status snapshot.
    pub fn status(&self) -> Status {
        let tasks = self.task_counter.get();
        Status {
            events: EventCounts {
                incoming: self.queues.incoming_len(),
                outgoing: self.queues.outgoing_len(),
            },
            tasks,
            errored: self.errored(),
            running: tasks > 0,
        }
    }

    /// `status().running`.
    pub fn running(&self) -> bool {
        self.status().running
    }

    /// `status().finished()`.
    pub fn finished(&self) -> bool {
        self.status().finished()
    }

    /// Producer-side entry point: runs pre-check and enqueues on accept.
    /// Never blocks, never errors — a rejection is logged (if the reason is
    /// non-empty) and dropped.
    pub fn queue_event(&self, event: Event) {
        match filter::precheck(&self.spec, self.errored(), &event) {
            FilterOutcome::Accept => self.queues.queue_event(event),
            FilterOutcome::Reject(reason) if !reason.is_empty() => {
                logging::log(LogLevel::Debug, &self.spec.name, &format!("rejected event: {reason}"), None);
            }
            FilterOutcome::Reject(_) => {}
        }
    }

    /// Controller-facing drain primitive.
    pub fn dequeue_outgoing_event(&self) -> Option<(Event, EmitOptions)> {
        self.queues.dequeue_outgoing_event()
    }

    /// Idempotently enters quarantine: sets `errored`, drains and disables
    /// the incoming queue. The outgoing queue is left alive.
    pub async fn set_error_state(&self, message: impl Into<String>) {
        if self
            .errored
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let message = message.into();
            logging::log(
                LogLevel::Warning,
                &self.spec.name,
                &format!("entering error state: {message}"),
                None,
            );
            self.queues.quarantine_incoming();
        }
    }

    /// Registers a callback to run once, after the module's own
    /// [`Module::cleanup`], in registration order.
    pub fn register_cleanup_callback(&self, cb: impl Fn() + Send + Sync + 'static) {
        self.cleanup_callbacks
            .lock()
            .expect("cleanup callback lock poisoned")
            .push(Box::new(cb));
    }

    /// Runs `setup()` and interprets its outcome. Returns `true` if the
    /// module should proceed to [`Self::start`].
    pub async fn setup(self: &Arc<Self>) -> bool {
        let ctx = ModuleContext { runtime: self };
        let outcome = {
            let _guard = self.task_counter.enter();
            self.module.setup(&ctx).await
        };
        match outcome {
            Ok(SetupOutcome::Success { message }) => {
                if let Some(msg) = message {
                    logging::log(LogLevel::Info, &self.spec.name, &msg, None);
                }
                true
            }
            Ok(SetupOutcome::SoftFail(reason)) | Err(Error::Wordlist(reason)) => {
                logging::log(
                    LogLevel::Warning,
                    &self.spec.name,
                    &format!("setup soft-failed: {reason}"),
                    None,
                );
                self.set_error_state(reason).await;
                false
            }
            Ok(SetupOutcome::HardFail(reason)) => {
                logging::log(LogLevel::Error, &self.spec.name, &format!("setup failed: {reason}"), None);
                self.set_error_state(reason).await;
                false
            }
            Err(e) => {
                logging::log(LogLevel::Error, &self.spec.name, "setup failed", Some(&e));
                let message = e.to_string();
                self.set_error_state(message).await;
                false
            }
        }
    }

    /// Spawns exactly `max_event_handlers` worker tasks. Should only be
    /// called after [`Self::setup`] returns `true`.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().expect("workers lock poisoned");
        for _ in 0..self.spec.max_event_handlers {
            let runtime = Arc::clone(self);
            workers.push(tokio::spawn(async move {
                runtime.run_worker().await;
            }));
        }
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            if self.scan.stopping() {
                return;
            }

            backpressure_gate(&self.queues, self.spec.qsize).await;

            if self.spec.batch_size <= 1 {
                match dequeue_incoming_blocking(&self.queues).await {
                    Some(event) => self.dispatch_one(event).await,
                    None => return,
                }
            } else {
                let submitted = self.run_batch().await;
                if !submitted {
                    let notified = self.queues.event_received.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();
                    if self.queues.incoming_len() > 0 {
                        continue;
                    }
                    if self.queues.is_incoming_disabled() {
                        return;
                    }
                    notified.await;
                }
            }
        }
    }

    async fn dispatch_one(self: &Arc<Self>, event: Event) {
        let ctx = ModuleContext { runtime: self };
        let outcome = self.postcheck(&event, &ctx).await;
        if !outcome.is_accept() {
            if !outcome.reason().is_empty() {
                logging::log(
                    LogLevel::Debug,
                    &self.spec.name,
                    &format!("post-check rejected event: {}", outcome.reason()),
                    None,
                );
            }
            return;
        }

        if event.is_finished() {
            self.run_finish(&ctx).await;
            return;
        }

        self.scan.event_consumed(&event, &self.spec.name).await;
        let _guard = self.task_counter.enter();
        if let Err(e) = self.module.handle_event(event, &ctx).await {
            self.scan.acatch("handle_event", &e);
        }
    }

    /// Attempts to assemble and dispatch one batch. Returns `true` if
    /// `handle_batch` ran or `finish` was triggered — i.e. whether the
    /// caller should avoid waiting on `event_received` before retrying.
    async fn run_batch(self: &Arc<Self>) -> bool {
        let ctx = ModuleContext { runtime: self };
        let mut batch = Vec::with_capacity(self.spec.batch_size);
        let mut finish_flag = false;

        // One-over (batch_size + 1 attempts) is deliberate: it lets the
        // drain detect that the queue is still saturated after filling a
        // full batch.
        for _ in 0..=self.spec.batch_size {
            let event = match self.queues.try_dequeue_incoming() {
                Some(event) => event,
                None => break,
            };
            if event.is_finished() {
                finish_flag = true;
                continue;
            }
            let outcome = self.postcheck(&event, &ctx).await;
            if outcome.is_accept() {
                self.scan.event_consumed(&event, &self.spec.name).await;
                batch.push(event);
            } else if !outcome.reason().is_empty() {
                logging::log(
                    LogLevel::Debug,
                    &self.spec.name,
                    &format!("post-check rejected event: {}", outcome.reason()),
                    None,
                );
            }
        }

        let submitted = !batch.is_empty();
        if submitted {
            let _guard = self.task_counter.enter();
            if let Err(e) = self.module.handle_batch(batch, &ctx).await {
                self.scan.acatch("handle_batch", &e);
            }
        }

        if finish_flag {
            self.run_finish(&ctx).await;
        }

        submitted || finish_flag
    }

    async fn run_finish(self: &Arc<Self>, ctx: &ModuleContext<'_>) {
        {
            let _guard = self.task_counter.enter();
            if let Err(e) = self.module.finish(ctx).await {
                self.scan.acatch("finish", &e);
            }
        }
        // report() fires exactly once, here, rather than off the
        // idle-batch timer the design notes identify as dead code upstream.
        if !self.reported.swap(true, Ordering::AcqRel) {
            let _guard = self.task_counter.enter();
            if let Err(e) = self.module.report(ctx).await {
                self.scan.acatch("report", &e);
            }
        }
    }

    async fn postcheck(self: &Arc<Self>, event: &Event, ctx: &ModuleContext<'_>) -> FilterOutcome {
        if event.is_finished() {
            return FilterOutcome::Accept;
        }

        let builtin = filter::postcheck_builtin(
            &self.spec,
            event,
            self.scan.whitelisted(event),
            self.scan.scope_search_distance(),
        );
        if !builtin.is_accept() {
            return builtin;
        }

        if let FilterOutcome::Reject(reason) = self.module.filter_event(event, ctx).await {
            return filter::wrap_custom_filter_reject(&reason);
        }

        if self.spec.kind == ModuleKind::Output && !event.mark_stats_recorded() {
            self.scan.event_produced(event).await;
        }

        FilterOutcome::Accept
    }

    /// Runs `cleanup()` then every registered cleanup callback, in
    /// registration order. Idempotent: a second call is a no-op.
    pub async fn cleanup(self: &Arc<Self>) {
        if self
            .cleanedup
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let ctx = ModuleContext { runtime: self };
        {
            let _guard = self.task_counter.enter();
            if let Err(e) = self.module.cleanup(&ctx).await {
                self.scan.acatch("cleanup", &e);
            }
        }

        let callbacks = std::mem::take(&mut *self.cleanup_callbacks.lock().expect("cleanup callback lock poisoned"));
        for cb in callbacks {
            cb();
        }
    }
}

async fn dequeue_incoming_blocking(queues: &QueuePair) -> Option<Event> {
    loop {
        let notified = queues.event_received.notified();
        tokio::pin!(notified);
        // Registers this waiter before the re-check below, so a
        // `notify_waiters()` landing between the check and the `.await`
        // still wakes us instead of being lost.
        notified.as_mut().enable();
        if let Some(event) = queues.try_dequeue_incoming() {
            return Some(event);
        }
        if queues.is_incoming_disabled() {
            return None;
        }
        notified.await;
    }
}

async fn backpressure_gate(queues: &QueuePair, qsize: usize) {
    if qsize == 0 {
        return;
    }
    loop {
        let notified = queues.event_dequeued.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if queues.outgoing_len() < qsize {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubController {
        stopping: AtomicBool,
    }

    #[async_trait]
    impl ScanController for StubController {
        fn stopping(&self) -> bool {
            self.stopping.load(Ordering::Acquire)
        }
        fn whitelisted(&self, _event: &Event) -> bool {
            true
        }
        fn scope_search_distance(&self) -> i64 {
            1
        }
        async fn make_event(
            &self,
            event_type: &str,
            scope_distance: i64,
            tags: HashSet<String>,
            source: Option<Event>,
            data: EventData,
            priority: u8,
        ) -> Result<Event, Error> {
            Ok(Event::new(event_type, scope_distance, tags, source, data, priority))
        }
        async fn event_consumed(&self, _event: &Event, _module: &str) {}
        async fn event_produced(&self, _event: &Event) {}
        async fn request(&self, _url: &str) -> Option<serde_json::Value> {
            None
        }
    }

    struct CountingModule {
        spec: ModuleSpec,
        handled: Arc<AtomicUsize>,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Module for CountingModule {
        fn spec(&self) -> &ModuleSpec {
            &self.spec
        }
        async fn handle_event(&self, _event: Event, _ctx: &ModuleContext<'_>) -> Result<(), Error> {
            self.handled.fetch_add(1, Ordering::AcqRel);
            Ok(())
        }
        async fn finish(&self, _ctx: &ModuleContext<'_>) -> Result<(), Error> {
            self.finished.fetch_add(1, Ordering::AcqRel);
            Ok(())
        }
    }

    #[tokio::test]
    async fn single_event_arm_dispatches_and_quarantines_cleanly() {
        let mut spec = ModuleSpec::new("counter", ModuleKind::Scan);
        spec.watched_events.insert("*".into());
        spec.max_event_handlers = 1;

        let handled = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        let module = Arc::new(CountingModule {
            spec,
            handled: Arc::clone(&handled),
            finished: Arc::clone(&finished),
        });
        let scan = Arc::new(StubController { stopping: AtomicBool::new(false) });
        let runtime = ModuleRuntime::new(module, scan, &HashMap::new()).expect("config merge");

        assert!(runtime.setup().await);
        runtime.start();

        runtime.queue_event(Event::new("DOMAIN", 0, HashSet::new(), None, EventData::Empty, 3));
        runtime.queue_event(Event::finished());

        for _ in 0..200 {
            if finished.load(Ordering::Acquire) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert_eq!(handled.load(Ordering::Acquire), 1);
        assert_eq!(finished.load(Ordering::Acquire), 1);
    }

    #[test]
    fn unknown_config_override_key_fails_construction() {
        let mut spec = ModuleSpec::new("counter", ModuleKind::Scan);
        spec.watched_events.insert("*".into());
        spec.options = ModuleOptions::new().declare("threads", Value::from(4), "worker count");

        let module = Arc::new(CountingModule {
            spec,
            handled: Arc::new(AtomicUsize::new(0)),
            finished: Arc::new(AtomicUsize::new(0)),
        });
        let scan = Arc::new(StubController { stopping: AtomicBool::new(false) });
        let mut overrides = HashMap::new();
        overrides.insert("thredas".to_string(), Value::from(8));

        let result = ModuleRuntime::new(module, scan, &overrides);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn require_api_key_outcome_soft_fails_without_key() {
        assert!(matches!(require_api_key_outcome(false, false), SetupOutcome::SoftFail(_)));
        assert!(matches!(require_api_key_outcome(true, false), SetupOutcome::SoftFail(_)));
        assert!(matches!(
            require_api_key_outcome(true, true),
            SetupOutcome::Success { .. }
        ));
    }
}
