use core::fmt;

use serde::{Deserialize, Serialize};

/// Concurrency or communication model an adapter instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Paradigm {
    /// Measurement-internal regions (flushes, unification).
    Measurement,
    /// Manual user instrumentation.
    User,
    /// Compiler-inserted function instrumentation.
    Compiler,
    /// Sampling-based attribution.
    Sampling,
    /// Message passing between processes.
    Mpi,
    /// One-sided communication.
    Shmem,
    /// Fork/join threading.
    OpenMp,
    /// Create/wait threading.
    Pthread,
    /// Threads not created by an instrumented paradigm.
    OrphanThread,
    /// GPU streams.
    Cuda,
    /// OpenCL command queues.
    OpenCl,
    /// OpenACC directives.
    OpenAcc,
    /// OpenMP target offloading.
    OpenMpTarget,
    /// POSIX and ISO C I/O.
    Io,
}

/// Coarse classification of a [`Paradigm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParadigmClass {
    /// Inter-process communication.
    Mpp,
    /// Fork/join threading.
    ThreadForkJoin,
    /// Create/wait threading.
    ThreadCreateWait,
    /// Accelerator offloading.
    Accelerator,
    /// Everything else.
    Other,
}

impl Paradigm {
    /// Human-readable name, also used as the name of synthesized groups.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Measurement => "MEASUREMENT",
            Self::User => "USER",
            Self::Compiler => "COMPILER",
            Self::Sampling => "SAMPLING",
            Self::Mpi => "MPI",
            Self::Shmem => "SHMEM",
            Self::OpenMp => "OPENMP",
            Self::Pthread => "PTHREAD",
            Self::OrphanThread => "ORPHAN_THREAD",
            Self::Cuda => "CUDA",
            Self::OpenCl => "OPENCL",
            Self::OpenAcc => "OPENACC",
            Self::OpenMpTarget => "OPENMP_TARGET",
            Self::Io => "IO",
        }
    }

    /// Returns the class of this paradigm.
    #[must_use]
    pub const fn class(self) -> ParadigmClass {
        match self {
            Self::Mpi | Self::Shmem => ParadigmClass::Mpp,
            Self::OpenMp => ParadigmClass::ThreadForkJoin,
            Self::Pthread | Self::OrphanThread => ParadigmClass::ThreadCreateWait,
            Self::Cuda | Self::OpenCl | Self::OpenAcc | Self::OpenMpTarget => {
                ParadigmClass::Accelerator
            }
            Self::Measurement | Self::User | Self::Compiler | Self::Sampling | Self::Io => {
                ParadigmClass::Other
            }
        }
    }
}

impl fmt::Display for Paradigm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What kind of code a region covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RegionType {
    /// Not specified by the adapter.
    #[default]
    Unknown,
    /// A function body.
    Function,
    /// A loop.
    Loop,
    /// A user-annotated region.
    User,
    /// A code block.
    Code,
    /// A program phase.
    Phase,
    /// A dynamic region whose instances are distinguished.
    Dynamic,
    /// A parallel construct.
    Parallel,
    /// A sections construct.
    Sections,
    /// A single section.
    Section,
    /// A workshare construct.
    Workshare,
    /// A single construct.
    Single,
    /// A master construct.
    Master,
    /// A critical section.
    Critical,
    /// An atomic update.
    Atomic,
    /// An explicit barrier.
    Barrier,
    /// An implicit barrier.
    ImplicitBarrier,
    /// A flush directive.
    Flush,
    /// A task construct.
    Task,
    /// A task creation point.
    TaskCreate,
    /// A taskwait point.
    TaskWait,
    /// A thread creation call.
    ThreadCreate,
    /// A thread wait call.
    ThreadWait,
    /// A library wrapper.
    Wrapper,
    /// A region created by the measurement itself.
    Artificial,
    /// Point-to-point communication.
    PointToPoint,
    /// Collective communication.
    Collective,
}

/// Classification of a group definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupType {
    /// Not specified.
    Unknown,
    /// Global location ids.
    Locations,
    /// Region handles.
    Regions,
    /// Metric handles.
    Metrics,
    /// All locations of one paradigm across every process.
    CommLocations,
    /// Positions within a paradigm's location group.
    CommGroup,
    /// The single-member self group of a paradigm.
    CommSelf,
    /// The threads of one process that form a thread team.
    ThreadTeam,
}

/// Kind of execution stream a location measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationType {
    /// An OS or runtime thread.
    CpuThread,
    /// An accelerator stream.
    Gpu,
    /// A source of asynchronous metric values.
    Metric,
}

/// Kind of a location group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocationGroupType {
    /// An operating-system process.
    Process,
    /// An accelerator context.
    Accelerator,
}

/// Value type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    /// Signed integer.
    Int64,
    /// Unsigned integer.
    Uint64,
    /// Floating point.
    Double,
    /// String handle.
    String,
    /// Region handle.
    Region,
    /// Location id.
    Location,
}

/// Value type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParameterType {
    /// Signed integer.
    Int64,
    /// Unsigned integer.
    Uint64,
    /// String handle.
    String,
}

/// Value type of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricValueType {
    /// Signed integer.
    Int64,
    /// Unsigned integer.
    Uint64,
    /// Floating point.
    Double,
}
