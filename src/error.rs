//! The engine's error taxonomy and reporting sink (component C6).
//!
//! The closed set of [`ErrorKind`]s mirrors `spec.md` §7. Every fallible entry point in
//! this crate returns `Result<T, Error>`; there is no panicking or unwinding path for
//! conditions the spec classifies as recoverable. Non-fatal conditions (device probing
//! failures, misuse no-ops, recovered xruns) are additionally routed through the
//! process-wide [`ReportingSink`] rather than being returned as an `Err`, per the
//! propagation policy in `spec.md` §7.

use std::fmt;
use std::sync::{Mutex, OnceLock};

/// The closed set of error kinds the engine can report.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Non-fatal; logged and does not interrupt the caller.
    Warning,
    /// Catch-all for conditions not covered by a more specific kind.
    Unspecified,
    /// No devices are visible for the selected backend.
    NoDevicesFound,
    /// The device index or descriptor is invalid.
    InvalidDevice,
    /// The stream handle is invalid (e.g. used after `close`).
    InvalidStream,
    /// The API was called out of order (e.g. `start` on a closed stream).
    InvalidUse,
    /// A parameter value is out of range or unsupported.
    InvalidParameter,
    /// Allocation failed.
    MemoryError,
    /// The native backend reported an unrecoverable error.
    DriverError,
    /// A host OS call failed.
    SystemError,
    /// Spawning or joining the driver thread failed.
    ThreadError,
}

impl ErrorKind {
    /// Whether this kind is non-fatal (propagated only through the reporting sink, not
    /// as an `Err` the caller must handle).
    pub fn is_warning(self) -> bool {
        matches!(self, ErrorKind::Warning)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Warning => "warning",
            ErrorKind::Unspecified => "unspecified error",
            ErrorKind::NoDevicesFound => "no devices found",
            ErrorKind::InvalidDevice => "invalid device",
            ErrorKind::InvalidStream => "invalid stream",
            ErrorKind::InvalidUse => "invalid use",
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::MemoryError => "memory error",
            ErrorKind::DriverError => "driver error",
            ErrorKind::SystemError => "system error",
            ErrorKind::ThreadError => "thread error",
        };
        f.write_str(s)
    }
}

/// An error kind paired with a human-readable message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Construct a new error of the given kind with a message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error {
            kind,
            message: message.into(),
        }
    }

    /// The error's kind.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message, independent of the kind's own `Display`.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

/// A user-installable hook receiving `(kind, message)` for every error or warning the
/// engine reports, fatal or not. If unset, messages are printed to stderr; fatal kinds
/// additionally unwind to the caller as a normal `Err` regardless of whether a sink is
/// installed.
pub type ReportFn = dyn Fn(ErrorKind, &str) + Send + Sync + 'static;

static SINK: OnceLock<Mutex<Option<Box<ReportFn>>>> = OnceLock::new();

fn sink() -> &'static Mutex<Option<Box<ReportFn>>> {
    SINK.get_or_init(|| Mutex::new(None))
}

/// Installs a process-wide reporting sink. Replaces any previously installed sink.
pub fn set_reporting_sink<F>(f: F)
where
    F: Fn(ErrorKind, &str) + Send + Sync + 'static,
{
    *sink().lock().unwrap() = Some(Box::new(f));
}

/// Removes the reporting sink, reverting to the stderr fallback.
pub fn clear_reporting_sink() {
    *sink().lock().unwrap() = None;
}

/// Routes `(kind, message)` through the installed sink, or to stderr if none is
/// installed. Used internally for every `ErrorKind::Warning` and for fatal errors at
/// the point they are raised (in addition to being returned as `Err`).
pub fn report(kind: ErrorKind, message: &str) {
    let guard = sink().lock().unwrap();
    match guard.as_ref() {
        Some(f) => f(kind, message),
        None => eprintln!("[{}] {}", kind, message),
    }
    if kind.is_warning() {
        log::warn!("{message}");
    } else {
        log::error!("{message}");
    }
}

/// Reports a warning and returns `Ok(())`, for the "misuse is a no-op" propagation rule
/// in `spec.md` §7.
pub fn warn_noop(message: &str) {
    report(ErrorKind::Warning, message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn sink_receives_reports() {
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        set_reporting_sink(move |_kind, _msg| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        report(ErrorKind::Warning, "test warning");
        assert_eq!(count.load(Ordering::SeqCst), 1);
        clear_reporting_sink();
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = Error::new(ErrorKind::InvalidDevice, "index 9 out of range");
        let text = err.to_string();
        assert!(text.contains("invalid device"));
        assert!(text.contains("index 9 out of range"));
    }
}
