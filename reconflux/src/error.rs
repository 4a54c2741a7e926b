//! Error taxonomy for the module execution core.

/// Errors surfaced by the event runtime, admission filter, queues, and
/// configuration layer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A minted [`crate::event::Event`] failed validation (e.g. a negative
    /// `scope_distance`). Surfaced to the caller when `raise_error` was
    /// requested; otherwise the caller is expected to warn and drop it.
    #[error("event validation failed: {0}")]
    Validation(String),

    /// Setup failed because a required wordlist could not be loaded. This
    /// variant always soft-fails a module rather than hard-failing it.
    #[error("wordlist error: {0}")]
    Wordlist(String),

    /// A controller-supplied configuration override referenced an option key
    /// the module never declared, or a declared option's default value and
    /// the override could not be reconciled to the same shape.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An internal invariant was violated (negative scope distance reaching
    /// a point that should have been filtered, access to a disabled queue,
    /// and the like). These are logged at debug and the offending event is
    /// dropped; they never propagate out of the runtime.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Unable to serialize or deserialize a YAML configuration value.
    #[error("unable to process YAML value")]
    Yaml(
        #[from]
        #[source]
        serde_yaml::Error,
    ),

    /// Unable to serialize or deserialize a JSON configuration value.
    #[error("unable to process JSON value")]
    Json(
        #[from]
        #[source]
        serde_json::Error,
    ),

    /// An internal channel connecting a module's workers to its queue pair
    /// closed unexpectedly.
    #[error("internal channel closed: {0}")]
    ChannelClosed(String),

    /// A module's internal lock was poisoned by a panicking holder.
    #[error("unable to secure internal lock")]
    UnableToSecureLock,

    /// The module has already entered quarantine and cannot be restarted.
    #[error("module {0} is quarantined: {1}")]
    Quarantined(String, String),
}
