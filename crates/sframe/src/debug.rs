//! Opt-in debug tracing.
//!
//! Tracing is forwarded to the [`log`] facade, but only when the
//! `SFRAME_DEBUG` environment variable is present. The variable is read the
//! first time a trace point is hit and never again.

/// The environment variable that turns on debug tracing.
pub const DEBUG_ENV: &str = "SFRAME_DEBUG";

#[cfg(feature = "std")]
pub(crate) fn enabled() -> bool {
    use std::sync::OnceLock;

    static ENABLED: OnceLock<bool> = OnceLock::new();

    *ENABLED.get_or_init(|| std::env::var_os(DEBUG_ENV).is_some())
}

#[cfg(not(feature = "std"))]
pub(crate) fn enabled() -> bool {
    false
}

macro_rules! debug {
    ($($arg:tt)*) => {
        if $crate::debug::enabled() {
            ::log::debug!(target: "sframe", $($arg)*);
        }
    };
}

pub(crate) use debug;
