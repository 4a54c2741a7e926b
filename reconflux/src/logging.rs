//! The twelve-level logging taxonomy modules expect, mapped onto
//! [`tracing`]'s five severities.
//!
//! `warning`, `hugewarning`, `error`, and `critical` are meant to capture a
//! traceback of whatever's currently propagating. Rust has no notion of "the
//! currently-propagating exception" outside of `panic!`, so these instead
//! take the error that was just caught and render its full [`std::error::Error::source`]
//! chain into the event in place of a traceback.

use std::error::Error as StdError;

/// One of the twelve recognized logging levels. Carried as a field on every
/// emitted event so a structured-log consumer can recover the original
/// taxonomy even though the underlying severity is coarser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Always-on, undecorated output.
    Stdout,
    /// Standard debug detail.
    Debug,
    /// More detail than `debug`.
    Verbose,
    /// More detail still.
    HugeVerbose,
    /// Standard informational output.
    Info,
    /// Emphasized informational output.
    HugeInfo,
    /// A positive result worth calling out.
    Success,
    /// Emphasized success.
    HugeSuccess,
    /// Standard warning; captures the causing error's chain, if given.
    Warning,
    /// Emphasized warning; captures the causing error's chain, if given.
    HugeWarning,
    /// Standard error; captures the causing error's chain, if given.
    Error,
    /// Scan-fatal condition; captures the causing error's chain, if given.
    Critical,
}

impl LogLevel {
    fn name(self) -> &'static str {
        match self {
            LogLevel::Stdout => "stdout",
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
            LogLevel::HugeVerbose => "hugeverbose",
            LogLevel::Info => "info",
            LogLevel::HugeInfo => "hugeinfo",
            LogLevel::Success => "success",
            LogLevel::HugeSuccess => "hugesuccess",
            LogLevel::Warning => "warning",
            LogLevel::HugeWarning => "hugewarning",
            LogLevel::Error => "error",
            LogLevel::Critical => "critical",
        }
    }

    /// `true` for the four levels that attach a causing error's chain.
    fn captures_cause(self) -> bool {
        matches!(
            self,
            LogLevel::Warning | LogLevel::HugeWarning | LogLevel::Error | LogLevel::Critical
        )
    }
}

fn render_chain(err: &(dyn StdError + 'static)) -> String {
    let mut chain = vec![err.to_string()];
    let mut cause = err.source();
    while let Some(e) = cause {
        chain.push(e.to_string());
        cause = e.source();
    }
    chain.join(" <- ")
}

/// Emits a structured log event at `level` for `module`, optionally
/// attaching the chain of `cause` for the four levels that capture one.
pub fn log(level: LogLevel, module: &str, message: &str, cause: Option<&(dyn StdError + 'static)>) {
    let recon_level = level.name();
    let chain = if level.captures_cause() {
        cause.map(render_chain)
    } else {
        None
    };

    match (level, &chain) {
        (LogLevel::Debug | LogLevel::Verbose | LogLevel::HugeVerbose, _) => {
            tracing::debug!(recon.level = recon_level, module, "{message}");
        }
        (_, Some(chain)) => {
            match level {
                LogLevel::Error | LogLevel::Critical => {
                    tracing::error!(recon.level = recon_level, module, cause = %chain, "{message}");
                }
                _ => {
                    tracing::warn!(recon.level = recon_level, module, cause = %chain, "{message}");
                }
            }
        }
        (LogLevel::Warning | LogLevel::HugeWarning, None) => {
            tracing::warn!(recon.level = recon_level, module, "{message}");
        }
        (LogLevel::Error | LogLevel::Critical, None) => {
            tracing::error!(recon.level = recon_level, module, "{message}");
        }
        _ => {
            tracing::info!(recon.level = recon_level, module, "{message}");
        }
    }
}

/// Shorthand for [`log`] at [`LogLevel::Warning`], outside of a module
/// context (no `module` field).
pub fn warning(message: &str, cause: Option<&(dyn StdError + 'static)>) {
    log(LogLevel::Warning, "-", message, cause);
}
