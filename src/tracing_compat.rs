//! Logging facade for runtime diagnostics.
//!
//! With the `tracing-integration` feature (on by default) the macros below are
//! the ones from the `tracing` crate, so a subscriber installed by the
//! measured application or by a test sees every warning with its structured
//! `rank` / `location` fields. Without the feature they expand to nothing and
//! the enter/exit hot path carries no logging cost at all.
//!
//! ```rust,ignore
//! use hpctrace::tracing_compat::{debug, warn};
//!
//! debug!(location = 3, region = %handle, "enter");
//! warn!(rank = 0, "Trace buffer flush. Increase total memory.");
//! let _finalize = info_span!("finalize", rank = 0).entered();
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, info_span, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! Macros that discard their arguments.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    /// No-op span macro returning a [`NoopSpan`](super::NoopSpan).
    #[macro_export]
    macro_rules! info_span {
        ($($arg:tt)*) => {
            $crate::tracing_compat::NoopSpan
        };
    }

    pub use crate::{debug, error, info, info_span, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;

/// Span stand-in used when logging is compiled out.
#[cfg(not(feature = "tracing-integration"))]
#[derive(Debug, Clone, Copy)]
pub struct NoopSpan;

#[cfg(not(feature = "tracing-integration"))]
impl NoopSpan {
    /// Does nothing.
    #[must_use]
    pub const fn entered(self) -> Self {
        self
    }
}
