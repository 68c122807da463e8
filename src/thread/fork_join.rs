//! The fork/join model (OpenMP).
//!
//! A forking thread's data holds one child slot per team rank. The first
//! time a slot is entered a child is created: rank 0 shares the parent's
//! location, every other rank gets a new one. Entering the same slot in a
//! later parallel region reuses the child and its location.
//!
//! A team of one thread creates no child at all. The parent's data stays
//! current and its `reuse_count` records how many such teams are open, so
//! that team end and join can tell the two cases apart.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    current, define_thread_team, thread_state, PreUnifyContext, TeamPosition, ThreadBegin,
    ThreadContext, ThreadData, ThreadModel,
};
use crate::error::Result;
use crate::location::Location;
use crate::tracing_compat::debug;
use crate::types::Paradigm;

type ForkJoinData = ThreadData<ForkJoinPrivate>;

/// Model data of a fork/join thread.
#[derive(Debug, Default)]
pub struct ForkJoinPrivate {
    children: Mutex<Vec<Option<Arc<ForkJoinData>>>>,
    reuse_count: AtomicU32,
    fork_size: AtomicU32,
}

impl ForkJoinPrivate {
    /// Number of open single-thread teams that reuse this thread data.
    #[must_use]
    pub fn reuse_count(&self) -> u32 {
        self.reuse_count.load(Ordering::Acquire)
    }

    /// Size of the children array.
    #[must_use]
    pub fn child_slots(&self) -> usize {
        self.children.lock().len()
    }

    /// The child in team slot `thread_id`, if it was ever entered.
    #[must_use]
    pub fn child(&self, thread_id: u32) -> Option<Arc<ForkJoinData>> {
        self.children.lock().get(thread_id as usize).cloned().flatten()
    }
}

/// Fork/join bookkeeping of one process.
#[derive(Debug, Default)]
pub struct ForkJoin {
    location_ids: Mutex<Vec<u32>>,
    active_teams: AtomicU32,
}

fn root_of(data: &ForkJoinData) -> &ForkJoinData {
    let mut cursor = data;
    while let Some(parent) = cursor.parent() {
        cursor = parent;
    }
    cursor
}

fn same_location(a: &Location, b: &Location) -> bool {
    a.id() == b.id()
}

/// Name of a new location for team rank `thread_id` below `parent`.
///
/// First-level threads are "OMP thread N". Nested threads extend the name
/// of the location they were forked from with one ":0" per enclosing level
/// that shares that location, then ":N".
fn location_name(parent: &ForkJoinData, thread_id: u32) -> String {
    let Some(mut cursor) = parent.parent() else {
        return format!("OMP thread {thread_id}");
    };
    let parent_location = parent.location();
    let initial = root_of(parent);
    let mut name;
    if same_location(parent_location, initial.location()) {
        name = String::from("OMP thread 0");
        loop {
            if cursor.is_initial() {
                break;
            }
            name.push_str(":0");
            match cursor.parent() {
                Some(next) => cursor = next,
                None => break,
            }
        }
    } else {
        name = parent_location.name().to_owned();
        loop {
            if !same_location(cursor.location(), parent_location) {
                break;
            }
            name.push_str(":0");
            match cursor.parent() {
                Some(next) => cursor = next,
                None => break,
            }
        }
    }
    name.push_str(&format!(":{thread_id}"));
    name
}

/// Drops the child slots below `data`; children point back at their parent.
fn release_children(data: &ForkJoinData) {
    let children = std::mem::take(&mut *data.model().children.lock());
    for child in children.into_iter().flatten() {
        release_children(&child);
    }
}

impl ForkJoin {
    /// Local ids of every location this model uses, initial thread first.
    #[must_use]
    pub fn location_ids(&self) -> Vec<u32> {
        self.location_ids.lock().clone()
    }

    /// Ends the parallel region forked from the data `current` descends
    /// from. Returns the thread data that is current afterwards.
    pub fn on_join(
        &self,
        ctx: &ThreadContext<'_>,
        current: &Arc<ForkJoinData>,
    ) -> Result<Arc<ForkJoinData>> {
        let forker = if current.model().reuse_count() != 0 {
            current.model().reuse_count.fetch_sub(1, Ordering::AcqRel);
            Arc::clone(current)
        } else {
            let parent = current
                .parent()
                .ok_or_else(|| thread_state("join without an enclosing fork"))?;
            current::set(ctx.instance, Arc::clone(parent));
            Arc::clone(parent)
        };
        if forker.model().fork_size.swap(0, Ordering::AcqRel) > 1 {
            self.active_teams.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(forker)
    }
}

impl ThreadModel for ForkJoin {
    type Private = ForkJoinPrivate;

    const PARADIGM: Paradigm = Paradigm::OpenMp;

    fn on_initialize(&self, ctx: &ThreadContext<'_>, initial: &Arc<ForkJoinData>) {
        self.location_ids.lock().push(initial.location().id());
        current::set(ctx.instance, Arc::clone(initial));
    }

    fn on_create(&self, parent: &ForkJoinData, requested: u32) -> Result<()> {
        let mut children = parent.model().children.lock();
        if children.len() < requested as usize {
            children.resize(requested as usize, None);
        }
        drop(children);
        parent.model().fork_size.store(requested, Ordering::Release);
        if requested > 1 {
            self.active_teams.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn on_begin(
        &self,
        ctx: &ThreadContext<'_>,
        parent: &Arc<ForkJoinData>,
        _sequence: u32,
        team: TeamPosition,
    ) -> Result<ThreadBegin<Self::Private>> {
        if team.team_size == 1 {
            parent.model().reuse_count.fetch_add(1, Ordering::AcqRel);
            return Ok(ThreadBegin {
                data: Arc::clone(parent),
                location_created: false,
            });
        }

        let mut children = parent.model().children.lock();
        let slots = children.len();
        let slot = children.get_mut(team.thread_id as usize).ok_or_else(|| {
            thread_state(format!(
                "More threads created than requested: {} >= {slots}",
                team.thread_id
            ))
        })?;
        let mut location_created = false;
        let data = if let Some(existing) = slot.as_ref() {
            Arc::clone(existing)
        } else {
            let location = if team.thread_id == 0 {
                Arc::clone(parent.location())
            } else {
                let name = location_name(parent, team.thread_id);
                location_created = true;
                ctx.factory.create_location(
                    &name,
                    Self::PARADIGM,
                    Some(parent.location().as_ref()),
                )?
            };
            let child = Arc::new(ThreadData::new(location, Some(Arc::clone(parent))));
            *slot = Some(Arc::clone(&child));
            child
        };
        drop(children);

        if location_created {
            self.location_ids.lock().push(data.location().id());
            debug!(
                location = data.location().id(),
                name = data.location().name(),
                "OpenMP location created"
            );
        }
        current::set(ctx.instance, Arc::clone(&data));
        Ok(ThreadBegin {
            data,
            location_created,
        })
    }

    fn on_end(
        &self,
        _ctx: &ThreadContext<'_>,
        current: &Arc<ForkJoinData>,
        team: TeamPosition,
    ) -> Result<Option<Arc<ForkJoinData>>> {
        let reuse = current.model().reuse_count();
        if team.team_size == 1 {
            if reuse == 0 {
                return Err(thread_state("single-thread team ended without reuse"));
            }
            return Ok(Some(Arc::clone(current)));
        }
        if reuse != 0 {
            return Err(thread_state(format!(
                "team of {} ended with {reuse} open single-thread teams",
                team.team_size
            )));
        }
        Ok(current.parent().cloned())
    }

    fn in_parallel(&self) -> bool {
        self.active_teams.load(Ordering::Acquire) > 0
    }

    fn pre_unify(&self, ctx: &PreUnifyContext<'_>) -> Result<()> {
        let rank = u64::from(ctx.ipc.rank());
        let global_ids: Vec<u64> = self
            .location_ids()
            .into_iter()
            .map(|id| (u64::from(id) << 32) | rank)
            .collect();
        define_thread_team(ctx, Self::PARADIGM, "OMP threads", &global_ids)
    }

    fn on_finalize(&self, initial: &ForkJoinData) -> Result<()> {
        match initial.model().reuse_count() {
            0 => {
                release_children(initial);
                Ok(())
            }
            open => Err(thread_state(format!(
                "{open} single-thread teams still open at finalization"
            ))),
        }
    }
}
