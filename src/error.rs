//! Error types and severity classification for the measurement runtime.
//!
//! Errors are explicit and typed. Every [`ErrorKind`] carries a fixed
//! [`Severity`] that decides what the runtime does with it:
//!
//! - **Fatal**: the measurement can no longer be trusted (out of memory on
//!   the first trace chunk, a definition referenced before it was unified, an
//!   invalid timer, a timestamp that went backwards). Adapter entry points
//!   route these through [`abort_on_fatal`], which logs a diagnostic and
//!   aborts the process so a partial archive is never mistaken for a complete
//!   one.
//! - **Warning**: recording continues in a degraded mode and a diagnostic
//!   is logged with rank and location context (intermediate buffer flushes,
//!   duplicate metric definitions, deprecated configuration).
//! - **Recoverable**: the caller can correct the request and retry (an
//!   unknown handle, an exit on an empty stack).
//!
//! Duplicate definitions are not errors at all: interning returns the
//! existing handle.

use core::fmt;
use std::sync::Arc;

use crate::tracing_compat::{error, warn};

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Definitions ===
    /// The definition manager was closed for unification.
    DefinitionsClosed,
    /// A handle does not name a definition in this manager.
    InvalidHandle,
    /// The unified back-reference of a definition was already set.
    UnifiedAlreadySet,
    /// A metric was defined again with different properties.
    DuplicateMetric,

    // === Stack ===
    /// Exit on a location whose current task has no open region.
    StackUnderflow,
    /// The region passed to exit does not match the top of the stack.
    RegionMismatch,
    /// The task handle is stale or belongs to another location.
    UnknownTask,

    // === Memory ===
    /// The page budget is exhausted.
    OutOfMemory,
    /// A single record does not fit into one trace chunk.
    RecordTooLarge,

    // === Timer ===
    /// The configured timer is not available.
    InvalidTimer,
    /// A location observed a timestamp older than its last one.
    TimestampOrder,

    // === Thread model ===
    /// A thread event arrived in a state the thread model cannot accept.
    ThreadState,

    // === Unification ===
    /// A definition referenced a handle that was not unified yet.
    UnifyOrder,
    /// A mapping table was requested before unification finished.
    NotUnified,

    // === Archive ===
    /// The archive substrate failed.
    ArchiveIo,
    /// Archive data is malformed.
    ArchiveFormat,
    /// A write was attempted on a closed buffer or archive.
    BufferClosed,
    /// Intermediate flush under memory pressure; recording was disabled.
    BufferFlushed,

    // === IPC ===
    /// A collective operation failed or was called out of order.
    IpcFailed,

    // === Configuration ===
    /// A configuration value is invalid.
    InvalidConfig,
    /// A deprecated configuration variable was used.
    DeprecatedConfig,

    // === Lifecycle ===
    /// A subsystem hook failed.
    SubsystemFailed,
    /// An operation was called in the wrong measurement phase.
    InvalidPhase,

    // === Internal ===
    /// Internal runtime error (bug).
    Internal,
}

/// Error category for grouping related kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Definition interning and lookup.
    Definitions,
    /// Region stacks and tasks.
    Stack,
    /// Page budget and chunk allocation.
    Memory,
    /// Clocks and timestamps.
    Timer,
    /// Thread-model bookkeeping.
    Thread,
    /// Cross-process unification.
    Unification,
    /// Trace archive output.
    Archive,
    /// Collective communication.
    Ipc,
    /// Configuration resolution.
    Config,
    /// Subsystem lifecycle and measurement phases.
    Lifecycle,
    /// Runtime bugs.
    Internal,
}

/// What the runtime does with an error of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Caller-correctable; no diagnostic is required.
    Recoverable,
    /// Recording continues, a diagnostic is logged.
    Warning,
    /// The measurement cannot continue; the process aborts.
    Fatal,
}

impl ErrorKind {
    /// Returns the category for this error kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::DefinitionsClosed
            | Self::InvalidHandle
            | Self::UnifiedAlreadySet
            | Self::DuplicateMetric => ErrorCategory::Definitions,
            Self::StackUnderflow | Self::RegionMismatch | Self::UnknownTask => {
                ErrorCategory::Stack
            }
            Self::OutOfMemory | Self::RecordTooLarge => ErrorCategory::Memory,
            Self::InvalidTimer | Self::TimestampOrder => ErrorCategory::Timer,
            Self::ThreadState => ErrorCategory::Thread,
            Self::UnifyOrder | Self::NotUnified => ErrorCategory::Unification,
            Self::ArchiveIo | Self::ArchiveFormat | Self::BufferClosed | Self::BufferFlushed => {
                ErrorCategory::Archive
            }
            Self::IpcFailed => ErrorCategory::Ipc,
            Self::InvalidConfig | Self::DeprecatedConfig => ErrorCategory::Config,
            Self::SubsystemFailed | Self::InvalidPhase => ErrorCategory::Lifecycle,
            Self::Internal => ErrorCategory::Internal,
        }
    }

    /// Returns the severity of this error kind.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        match self {
            Self::DuplicateMetric
            | Self::RegionMismatch
            | Self::BufferFlushed
            | Self::DeprecatedConfig => Severity::Warning,
            Self::InvalidHandle
            | Self::StackUnderflow
            | Self::UnknownTask
            | Self::InvalidConfig
            | Self::InvalidPhase => Severity::Recoverable,
            Self::DefinitionsClosed
            | Self::UnifiedAlreadySet
            | Self::OutOfMemory
            | Self::RecordTooLarge
            | Self::InvalidTimer
            | Self::TimestampOrder
            | Self::ThreadState
            | Self::UnifyOrder
            | Self::NotUnified
            | Self::ArchiveIo
            | Self::ArchiveFormat
            | Self::BufferClosed
            | Self::IpcFailed
            | Self::SubsystemFailed
            | Self::Internal => Severity::Fatal,
        }
    }

    /// Returns true if errors of this kind must terminate the process.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.severity(), Severity::Fatal)
    }
}

/// Where an error happened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Process rank.
    pub rank: Option<u32>,
    /// Process-local location id.
    pub location: Option<u32>,
}

impl ErrorContext {
    /// Context naming a rank and a location.
    #[must_use]
    pub const fn at(rank: u32, location: u32) -> Self {
        Self {
            rank: Some(rank),
            location: Some(location),
        }
    }
}

/// The main error type of the measurement runtime.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext {
                rank: None,
                location: None,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the severity of the error.
    #[must_use]
    pub const fn severity(&self) -> Severity {
        self.kind.severity()
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns true if the error must terminate the process.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds rank/location context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the error context.
    #[must_use]
    pub const fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Creates an out-of-memory error naming the budget to raise.
    #[must_use]
    pub fn out_of_memory(total_memory: usize) -> Self {
        Self::new(ErrorKind::OutOfMemory).with_message(format!(
            "Out of memory. Please increase HPCTRACE_TOTAL_MEMORY={total_memory} and try again."
        ))
    }

    /// Creates an error for a handle that was used before it was unified.
    #[must_use]
    pub fn unify_order(kind: impl fmt::Display, handle: u32) -> Self {
        Self::new(ErrorKind::UnifyOrder).with_message(format!(
            "{kind} definition {handle} referenced before it was unified"
        ))
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }

    /// Logs this error as a diagnostic with its rank/location context.
    pub fn report(&self) {
        let rank = self.context.rank;
        let location = self.context.location;
        match self.severity() {
            Severity::Fatal => error!(?rank, ?location, kind = ?self.kind, "{}", self),
            Severity::Warning | Severity::Recoverable => {
                warn!(?rank, ?location, kind = ?self.kind, "{}", self);
            }
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::new(ErrorKind::ArchiveFormat)
            .with_message("record encoding failed")
            .with_source(e)
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::new(ErrorKind::ArchiveFormat)
            .with_message("record decoding failed")
            .with_source(e)
    }
}

/// A specialized Result type for measurement operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Logs a fatal error and aborts the process.
pub fn fatal(err: &Error) -> ! {
    err.report();
    eprintln!("[hpctrace] fatal: {err}");
    std::process::abort()
}

/// Terminates on fatal errors and reports everything else.
///
/// Returns `Some(value)` on success and `None` when a non-fatal error was
/// reported. This is the boundary adapters use around the event API.
pub fn abort_on_fatal<T>(result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) if err.is_fatal() => fatal(&err),
        Err(err) => {
            err.report();
            None
        }
    }
}

/// Extension trait adding context to measurement results.
pub trait ResultExt<T> {
    /// Attaches rank/location context to the error, if any.
    fn at_location(self, rank: u32, location: u32) -> Result<T>;

    /// Attaches a message to the error, if any.
    fn context_msg(self, msg: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn at_location(self, rank: u32, location: u32) -> Self {
        self.map_err(|e| e.with_context(ErrorContext::at(rank, location)))
    }

    fn context_msg(self, msg: impl Into<String>) -> Self {
        self.map_err(|e| e.with_message(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_classification() {
        assert!(ErrorKind::OutOfMemory.is_fatal());
        assert!(ErrorKind::UnifyOrder.is_fatal());
        assert!(ErrorKind::TimestampOrder.is_fatal());
        assert!(ErrorKind::InvalidTimer.is_fatal());
        assert_eq!(ErrorKind::BufferFlushed.severity(), Severity::Warning);
        assert_eq!(ErrorKind::DuplicateMetric.severity(), Severity::Warning);
        assert_eq!(ErrorKind::DeprecatedConfig.severity(), Severity::Warning);
        assert_eq!(ErrorKind::StackUnderflow.severity(), Severity::Recoverable);
    }

    #[test]
    fn display_includes_message() {
        let err = Error::new(ErrorKind::InvalidHandle).with_message("region 7");
        assert_eq!(err.to_string(), "InvalidHandle: region 7");
    }

    #[test]
    fn out_of_memory_names_budget() {
        let err = Error::out_of_memory(16_384_000);
        assert!(err
            .message()
            .unwrap()
            .contains("HPCTRACE_TOTAL_MEMORY=16384000"));
        assert_eq!(err.category(), ErrorCategory::Memory);
    }

    #[test]
    fn context_is_attached() {
        let result: Result<()> = Err(Error::new(ErrorKind::StackUnderflow));
        let err = result.at_location(3, 1).unwrap_err();
        assert_eq!(err.context().rank, Some(3));
        assert_eq!(err.context().location, Some(1));
    }

    #[test]
    fn abort_on_fatal_passes_warnings_through() {
        let value = abort_on_fatal::<u32>(Err(Error::new(ErrorKind::RegionMismatch)));
        assert_eq!(value, None);
        assert_eq!(abort_on_fatal(Ok(5)), Some(5));
    }
}
