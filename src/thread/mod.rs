//! Thread models: how new execution streams map onto locations.
//!
//! Two families of threading paradigms are reconciled into one ancestry
//! view. Both keep a [`ThreadData`] per running thread that names its
//! location and its parent; they differ in how thread data is created and
//! reused:
//!
//! - [`CreateWait`] (pthreads): every begun thread gets a fresh location,
//!   registered in a mutex-protected id list for unification.
//! - [`ForkJoin`] (OpenMP): a parent keeps one child slot per team rank and
//!   reuses the child's location whenever that slot is entered again. A team
//!   of one reuses the parent's thread data outright.
//!
//! The model is a type parameter of the measurement, so a process uses
//! exactly one model and every call is statically dispatched.
//!
//! # Module Structure
//!
//! - [`current`]: the per-OS-thread current thread data
//! - [`create_wait`]: the create/wait model
//! - [`fork_join`]: the fork/join model

use std::fmt;
use std::sync::Arc;

use crate::definitions::DefinitionManager;
use crate::error::{Error, ErrorKind, Result};
use crate::ipc::Ipc;
use crate::location::Location;
use crate::types::{GroupType, Paradigm};

pub(crate) mod current;
pub mod create_wait;
pub mod fork_join;

pub use create_wait::{CreateWait, CreateWaitPrivate};
pub use fork_join::{ForkJoin, ForkJoinPrivate};

/// Creates locations on behalf of a thread model.
///
/// The measurement implements this so that a new location is defined,
/// given its task stack and buffers, and announced to the subsystems.
pub trait LocationFactory: Send + Sync {
    /// Creates a CPU-thread location.
    fn create_location(
        &self,
        name: &str,
        paradigm: Paradigm,
        parent: Option<&Location>,
    ) -> Result<Arc<Location>>;
}

/// What a thread model sees of the measurement at thread events.
#[derive(Clone, Copy)]
pub struct ThreadContext<'a> {
    /// Id under which the current thread data is stored.
    pub instance: u64,
    /// Creates new locations.
    pub factory: &'a dyn LocationFactory,
}

impl fmt::Debug for ThreadContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadContext")
            .field("instance", &self.instance)
            .finish_non_exhaustive()
    }
}

/// What a thread model sees of the measurement before unification.
#[derive(Debug, Clone, Copy)]
pub struct PreUnifyContext<'a> {
    /// Process-local definitions.
    pub definitions: &'a DefinitionManager,
    /// Collectives.
    pub ipc: &'a dyn Ipc,
}

/// Per-thread record: the thread's location, its parent and model data.
pub struct ThreadData<P> {
    location: Arc<Location>,
    parent: Option<Arc<ThreadData<P>>>,
    model: P,
}

impl<P> fmt::Debug for ThreadData<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadData")
            .field("location", &self.location.id())
            .field("parent", &self.parent.as_ref().map(|p| p.location.id()))
            .finish_non_exhaustive()
    }
}

impl<P: Default> ThreadData<P> {
    /// Thread data for `location` below `parent`.
    #[must_use]
    pub fn new(location: Arc<Location>, parent: Option<Arc<Self>>) -> Self {
        Self {
            location,
            parent,
            model: P::default(),
        }
    }
}

impl<P> ThreadData<P> {
    /// The location this thread records on.
    #[must_use]
    pub const fn location(&self) -> &Arc<Location> {
        &self.location
    }

    /// The thread data this one was begun from.
    #[must_use]
    pub const fn parent(&self) -> Option<&Arc<Self>> {
        self.parent.as_ref()
    }

    /// Model-specific data.
    #[must_use]
    pub const fn model(&self) -> &P {
        &self.model
    }

    /// True for the thread data of the initial thread.
    #[must_use]
    pub const fn is_initial(&self) -> bool {
        self.parent.is_none()
    }
}

/// Team membership passed to begin and end hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamPosition {
    /// Rank of the thread within its team.
    pub thread_id: u32,
    /// Number of threads in the team.
    pub team_size: u32,
}

impl TeamPosition {
    /// A lone thread.
    pub const SINGLE: Self = Self {
        thread_id: 0,
        team_size: 1,
    };
}

/// Result of a begin hook.
#[derive(Debug)]
pub struct ThreadBegin<P> {
    /// The thread data now current on the calling thread.
    pub data: Arc<ThreadData<P>>,
    /// True if a new location was created for it.
    pub location_created: bool,
}

/// A threading paradigm's bookkeeping.
pub trait ThreadModel: Default + Send + Sync + 'static {
    /// Model data stored in every [`ThreadData`].
    type Private: Default + Send + Sync + 'static;

    /// The paradigm whose threads this model tracks.
    const PARADIGM: Paradigm;

    /// Registers the initial thread, which is made current.
    fn on_initialize(&self, ctx: &ThreadContext<'_>, initial: &Arc<ThreadData<Self::Private>>);

    /// A thread is about to create `requested` threads.
    fn on_create(&self, parent: &ThreadData<Self::Private>, requested: u32) -> Result<()>;

    /// A new thread begins below `parent`. The returned thread data is
    /// current on the calling thread afterwards.
    fn on_begin(
        &self,
        ctx: &ThreadContext<'_>,
        parent: &Arc<ThreadData<Self::Private>>,
        sequence: u32,
        team: TeamPosition,
    ) -> Result<ThreadBegin<Self::Private>>;

    /// The thread owning `current` ends. Returns the thread data that is
    /// current afterwards, if any.
    fn on_end(
        &self,
        ctx: &ThreadContext<'_>,
        current: &Arc<ThreadData<Self::Private>>,
        team: TeamPosition,
    ) -> Result<Option<Arc<ThreadData<Self::Private>>>>;

    /// True while more than one thread of this paradigm is active.
    fn in_parallel(&self) -> bool;

    /// Defines the paradigm's thread-team group and communicator.
    fn pre_unify(&self, ctx: &PreUnifyContext<'_>) -> Result<()>;

    /// Checks the initial thread data at the end of measurement.
    fn on_finalize(&self, initial: &ThreadData<Self::Private>) -> Result<()>;

    /// The thread data current on this OS thread.
    fn current(&self, instance: u64) -> Option<Arc<ThreadData<Self::Private>>> {
        current::get(instance)
    }

    /// The location of the thread data current on this OS thread.
    fn current_location(&self, instance: u64) -> Option<Arc<Location>> {
        self.current(instance).map(|data| Arc::clone(data.location()))
    }
}

pub(crate) fn thread_state(detail: impl Into<String>) -> Error {
    Error::new(ErrorKind::ThreadState).with_message(detail)
}

/// Defines the cross-process group of this paradigm's locations, then a
/// local thread-team group holding their positions in it and a
/// communicator over that team.
///
/// `global_ids` are the global ids of this process's locations of the
/// paradigm, in registration order.
pub(crate) fn define_thread_team(
    ctx: &PreUnifyContext<'_>,
    paradigm: Paradigm,
    team_name: &str,
    global_ids: &[u64],
) -> Result<()> {
    let offset = crate::unify::define_paradigm_locations(
        ctx.ipc,
        ctx.definitions,
        paradigm,
        paradigm.name(),
        global_ids,
    )?;
    let positions: Vec<u64> = (0..global_ids.len() as u64)
        .map(|i| u64::from(offset) + i)
        .collect();
    let group = ctx
        .definitions
        .define_group(GroupType::ThreadTeam, paradigm, team_name, positions)?;
    ctx.definitions
        .define_communicator("", group, None, paradigm)?;
    Ok(())
}
