//! The measurement: one process's event API and lifecycle.
//!
//! A [`Measurement`] owns everything a process records into: the definition
//! manager, the location registry, the subsystems, the page allocator and
//! the archive. Adapters call its event API from any thread; every call
//! touches only the recorder of the calling thread's location, which the
//! thread checked out at its last thread event.
//!
//! # Lifecycle
//!
//! ```text
//!   builder().build()      register, init, initial location, begin
//!        │
//!        ▼
//!     Running ── enter / exit / triggers / thread events ──┐
//!        │                                                 │
//!     end()        subsystems end, open regions unwound ◀──┘
//!        │
//!     finalize()   pre_unify, final flush, unify, definitions,
//!                  anchor, post_unify, finalize, deregister
//!        ▼
//!    Finalized
//! ```
//!
//! # Module Structure
//!
//! - [`builder`]: assembling a measurement from its configuration
//! - [`events`]: regions, metrics, parameters and attributes
//! - [`threads`]: fork/join and create/wait thread events
//! - [`finalize`]: ending, unification and archive output
//! - `recorder`: the per-location state the hot path mutates

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::MeasurementConfig;
use crate::definitions::DefinitionManager;
use crate::error::{Error, ErrorKind, Result};
use crate::ipc::Ipc;
use crate::location::{Location, LocationRegistry};
use crate::memory::PageAllocator;
use crate::subsystem::{SubsystemContext, SubsystemRegistry};
use crate::thread::{LocationFactory, ThreadContext, ThreadData, ThreadModel};
use crate::timer::Clock;
use crate::trace::{
    Archive, ChunkedBuffer, EventRecord, MeasurementFlush, PagedMemory, TraceEvent, TraceStatus,
    WriteOutcome,
};
use crate::tracing_compat::debug;
use crate::types::{LocationType, Paradigm};

pub mod builder;
pub mod events;
pub mod finalize;
mod recorder;
pub mod threads;

pub use builder::MeasurementBuilder;
pub use finalize::MeasurementSummary;
pub use threads::ThreadSpawn;

use recorder::{LocationTrace, Recorder};

/// Name of the initial location of every process.
pub const INITIAL_LOCATION_NAME: &str = "Master thread";

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Where a measurement is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Events are accepted.
    Running = 0,
    /// Events are rejected; finalization has not run.
    Ended = 1,
    /// Archive written, subsystems torn down.
    Finalized = 2,
}

impl Phase {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Ended,
            _ => Self::Finalized,
        }
    }
}

/// One process's measurement, generic over its thread model.
pub struct Measurement<M: ThreadModel> {
    instance: u64,
    config: MeasurementConfig,
    ipc: Arc<dyn Ipc>,
    clock: Arc<Clock>,
    definitions: DefinitionManager,
    locations: LocationRegistry,
    subsystems: SubsystemRegistry,
    model: M,
    allocator: Arc<PageAllocator>,
    status: Arc<TraceStatus>,
    flush: Arc<MeasurementFlush>,
    memory: Arc<PagedMemory>,
    archive: Option<Arc<Archive>>,
    initial: Mutex<Option<Arc<ThreadData<M::Private>>>>,
    phase: AtomicU8,
    begin_timestamp: AtomicU64,
    fork_sequence: AtomicU32,
    create_sequence: AtomicU32,
}

impl<M: ThreadModel> fmt::Debug for Measurement<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Measurement")
            .field("instance", &self.instance)
            .field("rank", &self.rank())
            .field("paradigm", &M::PARADIGM)
            .field("phase", &self.phase())
            .field("locations", &self.locations.len())
            .finish_non_exhaustive()
    }
}

impl<M: ThreadModel> Measurement<M> {
    /// Starts configuring a measurement.
    #[must_use]
    pub fn builder(config: MeasurementConfig) -> MeasurementBuilder<M> {
        MeasurementBuilder::new(config)
    }

    /// The resolved configuration.
    #[must_use]
    pub const fn config(&self) -> &MeasurementConfig {
        &self.config
    }

    /// This process's rank.
    #[must_use]
    pub fn rank(&self) -> u32 {
        self.ipc.rank()
    }

    /// Number of processes.
    #[must_use]
    pub fn size(&self) -> u32 {
        self.ipc.size()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// The process-local definitions.
    #[must_use]
    pub const fn definitions(&self) -> &DefinitionManager {
        &self.definitions
    }

    /// All locations of this process.
    #[must_use]
    pub const fn locations(&self) -> &LocationRegistry {
        &self.locations
    }

    /// The thread model.
    #[must_use]
    pub const fn model(&self) -> &M {
        &self.model
    }

    /// The clock events are stamped with.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Process-wide flush and recording latches.
    #[must_use]
    pub fn status(&self) -> &TraceStatus {
        &self.status
    }

    /// The page allocator trace buffers draw from.
    #[must_use]
    pub fn allocator(&self) -> &PageAllocator {
        &self.allocator
    }

    /// The archive, when tracing is enabled.
    #[must_use]
    pub fn archive(&self) -> Option<&Arc<Archive>> {
        self.archive.as_ref()
    }

    /// The registered subsystems.
    #[must_use]
    pub const fn subsystems(&self) -> &SubsystemRegistry {
        &self.subsystems
    }

    /// True while more than one thread of the model's paradigm runs.
    #[must_use]
    pub fn in_parallel(&self) -> bool {
        self.model.in_parallel()
    }

    /// The initial location of this process.
    pub fn initial_location(&self) -> Result<Arc<Location>> {
        self.initial
            .lock()
            .as_ref()
            .map(|data| Arc::clone(data.location()))
            .ok_or_else(|| invalid_phase("measurement has no initial thread"))
    }

    /// The thread data current on the calling thread.
    pub fn current_thread(&self) -> Result<Arc<ThreadData<M::Private>>> {
        self.model.current(self.instance).ok_or_else(|| {
            Error::new(ErrorKind::ThreadState)
                .with_message("calling thread is not known to the measurement")
        })
    }

    /// The location of the calling thread.
    pub fn current_location(&self) -> Result<Arc<Location>> {
        self.current_thread().map(|data| Arc::clone(data.location()))
    }

    fn thread_context(&self) -> ThreadContext<'_> {
        ThreadContext {
            instance: self.instance,
            factory: self,
        }
    }

    fn subsystem_context<'a>(
        &'a self,
        mappings: Option<&'a crate::definitions::DefinitionMappings>,
    ) -> SubsystemContext<'a> {
        SubsystemContext {
            rank: self.rank(),
            size: self.size(),
            definitions: &self.definitions,
            mappings,
        }
    }

    fn ensure_running(&self) -> Result<()> {
        match self.phase() {
            Phase::Running => Ok(()),
            phase => Err(invalid_phase(format!("event in phase {phase:?}"))),
        }
    }

    /// Stamps `event` and appends it to the location's buffer, with the
    /// attributes collected since the previous event.
    fn record_in(
        &self,
        location: &Location,
        recorder: &mut Recorder,
        event: TraceEvent,
    ) -> Result<()> {
        let timestamp = self.clock.now();
        location.check_timestamp(timestamp)?;
        let Some(trace) = recorder.trace.as_mut() else {
            return Ok(());
        };
        if self.status.recording_disabled() {
            trace.pending.clear();
            return Ok(());
        }
        let mut record = EventRecord::new(timestamp, event);
        record.attributes = std::mem::take(&mut trace.pending);
        let written = trace.buffer.write(&record);
        // Hand the attribute storage back so its capacity is reused.
        trace.pending = record.attributes;
        trace.pending.clear();
        let outcome = written.map_err(|err| err.with_context(location.error_context()))?;
        if outcome == WriteOutcome::Flushed {
            Error::new(ErrorKind::BufferFlushed)
                .with_message(format!(
                    "trace buffer of location \"{}\" flushed, recording disabled",
                    location.name()
                ))
                .with_context(location.error_context())
                .report();
        }
        Ok(())
    }

    /// Runs `f` on the recorder of `location`, or of the calling thread's
    /// location when `location` is `None`.
    fn with_recorder<R>(
        &self,
        location: Option<&Location>,
        f: impl FnOnce(&Location, &mut Recorder) -> Result<R>,
    ) -> Result<R> {
        recorder::with_recorder(self.instance, location, f)
    }

    /// Makes the calling thread the one recording on `location`.
    fn attach(&self, location: &Arc<Location>) -> Result<()> {
        recorder::attach(self.instance, location)
    }

    /// Parks the recorder the calling thread holds, if any.
    fn detach(&self) {
        recorder::detach(self.instance);
    }

    fn record(&self, location: &Location, event: TraceEvent) -> Result<()> {
        self.with_recorder(Some(location), |location, recorder| {
            self.record_in(location, recorder, event)
        })
    }
}

impl<M: ThreadModel> LocationFactory for Measurement<M> {
    fn create_location(
        &self,
        name: &str,
        paradigm: Paradigm,
        parent: Option<&Location>,
    ) -> Result<Arc<Location>> {
        let location = self.locations.create(
            &self.definitions,
            name,
            LocationType::CpuThread,
            paradigm,
            parent.map(Location::id),
        )?;
        let trace = match &self.archive {
            Some(archive) => Some(LocationTrace {
                buffer: ChunkedBuffer::new(
                    location.global_id(),
                    self.config.chunk_size,
                    Arc::clone(&self.flush) as _,
                    Arc::clone(&self.memory) as _,
                    Box::new(archive.event_writer(location.global_id())?),
                ),
                pending: Vec::new(),
            }),
            None => None,
        };
        recorder::park_new(&location, Recorder::new(trace));
        self.subsystems.init_location(&location, parent)?;
        debug!(
            rank = location.rank(),
            location = location.id(),
            name,
            ?paradigm,
            "location created"
        );
        Ok(location)
    }
}

impl<M: ThreadModel> Drop for Measurement<M> {
    fn drop(&mut self) {
        self.detach();
    }
}

fn invalid_phase(detail: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidPhase).with_message(detail)
}
