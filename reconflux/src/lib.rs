//! Module execution core for a modular reconnaissance pipeline.
//!
//! This crate owns the event model, the per-module worker runtime, the
//! two-stage admission filter, the priority queue pair, and the scan
//! controller seam a host application implements. It does not own scan
//! bootstrap, target management, or any concrete HTTP/DNS/output backend —
//! those live on the other side of [`controller::ScanController`].

pub mod config;
pub mod controller;
pub mod error;
pub mod event;
pub mod filter;
pub mod logging;
pub mod module;
pub mod queue;
pub mod stats;

pub use config::{parse_duration_value, ModuleOptions};
pub use controller::ScanController;
pub use error::Error;
pub use event::{Event, EventData};
pub use filter::FilterOutcome;
pub use module::{Module, ModuleContext, ModuleFlags, ModuleKind, ModuleRuntime, ModuleSpec, SetupOutcome};
pub use queue::{EmitOptions, QueuePair};
pub use stats::{EventCounts, Status, TaskCounter};
