//! Exception guard: capture a failing task's panic or error for cross-thread transport (C2).
//!
//! The host bridge (`bridge`) runs arbitrary [`crate::bridge::Task`]s on the host's GUI
//! thread. A task can fail in two ways in Rust: it can return `Err(Error)`, or it can
//! panic. Neither can be allowed to propagate past the bridge boundary — a panic must
//! not take down the GUI thread's worker loop, and an error must be carried back to the
//! submitter as a value, not raised. [`ExceptionGuard`] is that value.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

/// A captured failure, safe to move across a thread boundary.
///
/// Mirrors spec §3's `(exception_type_name, exception_value, formatted_traceback)` tuple.
/// Rust has no runtime exception type names, so `exception_type_name` is a fixed
/// classification (`"Panic"` or the `Error` variant name) and `formatted_traceback` is a
/// best-effort rendering of the failure site, not a full stack unwind.
#[derive(Debug, Clone)]
pub struct ExceptionGuard {
    /// Coarse classification of what failed: `"Panic"` or an `Error` variant name.
    pub exception_type_name: String,
    /// Human-readable failure message.
    pub exception_value: String,
    /// Best-effort description of where the failure originated.
    pub formatted_traceback: String,
}

impl ExceptionGuard {
    /// Builds a guard directly from an [`crate::Error`], classifying it by variant name.
    pub fn from_error(err: &crate::Error) -> Self {
        let exception_type_name = error_variant_name(err).to_string();
        Self {
            exception_type_name,
            exception_value: err.to_string(),
            formatted_traceback: format!("raised at bridge task boundary: {err}"),
        }
    }

    /// Builds a guard from a caught panic payload (as produced by [`catch_unwind`]).
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };

        Self {
            exception_type_name: "Panic".to_string(),
            exception_value: message.clone(),
            formatted_traceback: format!("panicked at bridge task boundary: {message}"),
        }
    }
}

fn error_variant_name(err: &crate::Error) -> &'static str {
    use crate::Error::*;
    match err {
        Http(_) => "Http",
        Json(_) => "Json",
        Config(_) => "Config",
        Api(_) => "Api",
        Stream(_) => "Stream",
        Tool(_) => "Tool",
        InvalidInput(_) => "InvalidInput",
        Timeout => "Timeout",
        CodeRepairExhausted { .. } => "CodeRepairExhausted",
        Transport(_) => "Transport",
        PortAcquisition { .. } => "PortAcquisition",
        BridgeShutdown => "BridgeShutdown",
        Other(_) => "Other",
    }
}

/// Runs `f`, capturing either a panic or an `Err` into an [`ExceptionGuard`].
///
/// This is the scoped construct from spec §4.2: it activates on entry and, on exit,
/// guarantees that exactly one of `Ok(T)` or `Err(ExceptionGuard)` is produced — the
/// panic (if any) never propagates past this call.
pub fn guarded<T, F>(f: F) -> Result<T, ExceptionGuard>
where
    F: FnOnce() -> crate::Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ExceptionGuard::from_error(&err)),
        Err(payload) => Err(ExceptionGuard::from_panic(payload)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guarded_happy_path_returns_value() {
        let result = guarded(|| Ok::<_, crate::Error>(42));
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn guarded_captures_error_without_raising() {
        let result = guarded(|| Err::<i32, _>(crate::Error::tool("bad")));
        let guard = result.unwrap_err();
        assert_eq!(guard.exception_type_name, "Tool");
        assert_eq!(guard.exception_value, "Tool execution error: bad");
    }

    #[test]
    fn guarded_captures_panic_without_raising() {
        let result: Result<i32, ExceptionGuard> = guarded(|| panic!("boom"));
        let guard = result.unwrap_err();
        assert_eq!(guard.exception_type_name, "Panic");
        assert_eq!(guard.exception_value, "boom");
    }

    #[test]
    fn guarded_captures_panic_with_string_payload() {
        let result: Result<i32, ExceptionGuard> =
            guarded(|| panic!("{}", "formatted boom".to_string()));
        let guard = result.unwrap_err();
        assert_eq!(guard.exception_value, "formatted boom");
    }
}
