//! hpctrace: a measurement runtime for parallel and distributed applications.
//!
//! # Overview
//!
//! hpctrace records region enter/exit events, thread fork/join and
//! create/wait events, counters and parameters from many concurrently
//! executing locations (OS threads, OpenMP threads, MPI ranks), and at the
//! end of the run produces one consistent, globally deduplicated trace
//! archive.
//!
//! Instrumentation adapters (compiler hooks, MPI wrappers, OpenMP
//! rewriting) are not part of this crate. They call the small event and
//! definition API of [`Measurement`] and plug into its lifecycle as
//! [`Subsystem`]s.
//!
//! # Core Guarantees
//!
//! - **Interning**: every named entity is defined once per process; a
//!   duplicate definition returns the first handle
//! - **Lock- and allocation-free hot path**: after warm-up, enter and exit
//!   only touch the calling thread's checked-out stack frames and trace
//!   chunks
//! - **Balanced stacks**: open regions are exited innermost first at the
//!   end of the measurement, filtered regions never reach the trace
//! - **Bounded memory**: trace buffers draw from one page budget; running
//!   out mid-run flushes and stops recording instead of failing
//! - **One numbering**: unification maps every process's definitions onto a
//!   single global table, in a reproducible order
//!
//! # Module Structure
//!
//! - [`measurement`]: the event API and the measurement lifecycle
//! - [`definitions`]: the definition manager and unified copies
//! - [`task`]: per-location region stacks
//! - [`thread`]: create/wait and fork/join thread models
//! - [`location`]: locations and their per-subsystem data
//! - [`trace`]: event records, buffers, the flush protocol and the archive
//! - [`unify`]: cross-process unification
//! - [`ipc`]: collectives between processes
//! - [`memory`]: the page allocator behind trace buffers
//! - [`subsystem`]: paradigm adapter lifecycle hooks
//! - [`config`]: configuration from defaults, environment and files
//! - [`timer`]: timestamp sources
//! - [`types`]: tags carried by definitions
//! - [`error`]: error types and severities
//! - [`util`]: internal utilities (arenas, deterministic hashing)
//!
//! # Example
//!
//! ```no_run
//! use hpctrace::{CreateWait, Measurement, MeasurementConfig, RegionInfo};
//!
//! # fn main() -> hpctrace::Result<()> {
//! let config = MeasurementConfig::from_env()?;
//! let measurement: Measurement<CreateWait> = Measurement::builder(config).build()?;
//! let solve = measurement.define_region(&RegionInfo::new("solve"))?;
//! measurement.enter_region(solve)?;
//! measurement.exit_region(solve)?;
//! measurement.finalize()?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod definitions;
pub mod error;
pub mod ipc;
pub mod location;
pub mod measurement;
pub mod memory;
pub mod subsystem;
pub mod task;
pub mod thread;
pub mod timer;
pub mod trace;
pub mod tracing_compat;
pub mod types;
pub mod unify;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use config::{MeasurementConfig, RegionFilter};
pub use definitions::{
    AttributeHandle, DefinitionManager, MetricHandle, ParameterHandle, RegionHandle, RegionInfo,
    SourceFileHandle, StringHandle,
};
pub use error::{abort_on_fatal, Error, ErrorCategory, ErrorKind, Result, ResultExt, Severity};
pub use ipc::{Ipc, LocalGroup, SingleProcess};
pub use location::Location;
pub use measurement::{Measurement, MeasurementBuilder, MeasurementSummary, Phase, ThreadSpawn};
pub use subsystem::{Subsystem, SubsystemContext, SubsystemId};
pub use thread::{CreateWait, ForkJoin, TeamPosition, ThreadModel};
pub use timer::TimerKind;
pub use trace::{ArchiveReader, AttributeValue, MemorySubstrate, PosixSubstrate};
pub use types::{AttributeType, MetricValueType, Paradigm, ParameterType, RegionType};
