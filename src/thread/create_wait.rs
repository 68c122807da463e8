//! The create/wait model (pthreads).
//!
//! Threads are created by one thread and joined (waited for) later, in no
//! particular structure, so the number of threads is not known up front.
//! Every begun thread gets a new location named after the sequence count
//! of its create event; locations are never reused.

use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    current, define_thread_team, thread_state, PreUnifyContext, TeamPosition, ThreadBegin,
    ThreadContext, ThreadData, ThreadModel,
};
use crate::error::Result;
use crate::location::Location;
use crate::tracing_compat::{debug, trace};
use crate::types::Paradigm;

/// Initial capacity of the location id list; it doubles when full.
pub const INITIAL_LOCATION_CAPACITY: usize = 16;

/// Create/wait threads carry no model data.
#[derive(Debug, Default)]
pub struct CreateWaitPrivate;

#[derive(Debug)]
struct Registry {
    location_ids: Vec<u32>,
    active_locations: usize,
}

impl Registry {
    fn push(&mut self, id: u32) {
        if self.location_ids.len() == self.location_ids.capacity() {
            let grow = self.location_ids.capacity().max(INITIAL_LOCATION_CAPACITY);
            self.location_ids.reserve_exact(grow);
        }
        self.location_ids.push(id);
    }
}

/// Create/wait bookkeeping of one process.
#[derive(Debug)]
pub struct CreateWait {
    registry: Mutex<Registry>,
}

impl Default for CreateWait {
    fn default() -> Self {
        Self {
            registry: Mutex::new(Registry {
                location_ids: Vec::with_capacity(INITIAL_LOCATION_CAPACITY),
                active_locations: 0,
            }),
        }
    }
}

impl CreateWait {
    /// Local ids of every location this model created, initial thread first.
    #[must_use]
    pub fn location_ids(&self) -> Vec<u32> {
        self.registry.lock().location_ids.clone()
    }

    /// Capacity of the id list.
    #[must_use]
    pub fn location_capacity(&self) -> usize {
        self.registry.lock().location_ids.capacity()
    }

    /// Threads currently running, the initial one included.
    #[must_use]
    pub fn active_locations(&self) -> usize {
        self.registry.lock().active_locations
    }

    /// A waited-for thread's location needs no bookkeeping.
    pub fn on_wait(&self, waiter: &Location) {
        trace!(location = waiter.id(), "thread wait");
    }
}

impl ThreadModel for CreateWait {
    type Private = CreateWaitPrivate;

    const PARADIGM: Paradigm = Paradigm::Pthread;

    fn on_initialize(&self, ctx: &ThreadContext<'_>, initial: &Arc<ThreadData<Self::Private>>) {
        let mut registry = self.registry.lock();
        registry.active_locations = 1;
        registry.push(initial.location().id());
        drop(registry);
        current::set(ctx.instance, Arc::clone(initial));
    }

    fn on_create(&self, _parent: &ThreadData<Self::Private>, _requested: u32) -> Result<()> {
        Ok(())
    }

    fn on_begin(
        &self,
        ctx: &ThreadContext<'_>,
        parent: &Arc<ThreadData<Self::Private>>,
        sequence: u32,
        _team: TeamPosition,
    ) -> Result<ThreadBegin<Self::Private>> {
        let name = format!("Pthread thread {sequence}");
        let location =
            ctx.factory
                .create_location(&name, Self::PARADIGM, Some(parent.location().as_ref()))?;
        let data = Arc::new(ThreadData::new(location, Some(Arc::clone(parent))));
        current::set(ctx.instance, Arc::clone(&data));

        let mut registry = self.registry.lock();
        registry.push(data.location().id());
        registry.active_locations += 1;
        debug!(
            location = data.location().id(),
            sequence,
            active = registry.active_locations,
            "pthread location created"
        );
        drop(registry);

        Ok(ThreadBegin {
            data,
            location_created: true,
        })
    }

    fn on_end(
        &self,
        ctx: &ThreadContext<'_>,
        current: &Arc<ThreadData<Self::Private>>,
        _team: TeamPosition,
    ) -> Result<Option<Arc<ThreadData<Self::Private>>>> {
        if current.is_initial() {
            return Err(thread_state("the initial thread cannot end"));
        }
        let mut registry = self.registry.lock();
        registry.active_locations = registry.active_locations.saturating_sub(1);
        drop(registry);
        current::clear(ctx.instance);
        Ok(None)
    }

    fn in_parallel(&self) -> bool {
        self.registry.lock().active_locations > 1
    }

    fn pre_unify(&self, ctx: &PreUnifyContext<'_>) -> Result<()> {
        let rank = u64::from(ctx.ipc.rank());
        let global_ids: Vec<u64> = self
            .location_ids()
            .into_iter()
            .map(|id| (u64::from(id) << 32) | rank)
            .collect();
        define_thread_team(ctx, Self::PARADIGM, "PTHREAD threads", &global_ids)
    }

    fn on_finalize(&self, _initial: &ThreadData<Self::Private>) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{Definition, GroupDef};
    use crate::ipc::SingleProcess;
    use crate::test_utils::TestFactory;
    use crate::types::GroupType;

    fn setup() -> (TestFactory, CreateWait, Arc<ThreadData<CreateWaitPrivate>>) {
        let factory = TestFactory::new();
        let model = CreateWait::default();
        let initial = Arc::new(ThreadData::new(factory.initial(), None));
        (factory, model, initial)
    }

    #[test]
    fn every_thread_gets_a_fresh_location() {
        let (factory, model, initial) = setup();
        let ctx = ThreadContext {
            instance: factory.instance(),
            factory: &factory,
        };
        model.on_initialize(&ctx, &initial);
        assert!(!model.in_parallel());

        model.on_create(&initial, 1).unwrap();
        let first = model.on_begin(&ctx, &initial, 1, TeamPosition::SINGLE).unwrap();
        assert!(first.location_created);
        assert_eq!(first.data.location().name(), "Pthread thread 1");
        assert_eq!(first.data.location().parent(), Some(initial.location().id()));
        assert!(model.in_parallel());
        assert!(Arc::ptr_eq(&model.current(ctx.instance).unwrap(), &first.data));

        assert!(model.on_end(&ctx, &first.data, TeamPosition::SINGLE).unwrap().is_none());
        assert!(model.current(ctx.instance).is_none());
        assert!(!model.in_parallel());

        // A second thread with the same parent never reuses the first one's location.
        let second = model.on_begin(&ctx, &initial, 2, TeamPosition::SINGLE).unwrap();
        assert_ne!(second.data.location().id(), first.data.location().id());
        assert_eq!(factory.locations().len(), 3);
    }

    #[test]
    fn registry_doubles_its_capacity() {
        let (factory, model, initial) = setup();
        let ctx = ThreadContext {
            instance: factory.instance(),
            factory: &factory,
        };
        model.on_initialize(&ctx, &initial);
        assert_eq!(model.location_capacity(), INITIAL_LOCATION_CAPACITY);
        for sequence in 1..=INITIAL_LOCATION_CAPACITY as u32 {
            model
                .on_begin(&ctx, &initial, sequence, TeamPosition::SINGLE)
                .unwrap();
        }
        assert_eq!(model.location_ids().len(), INITIAL_LOCATION_CAPACITY + 1);
        assert!(model.location_capacity() >= 2 * INITIAL_LOCATION_CAPACITY);
        assert_eq!(model.active_locations(), INITIAL_LOCATION_CAPACITY + 1);
    }

    #[test]
    fn initial_thread_cannot_end() {
        let (factory, model, initial) = setup();
        let ctx = ThreadContext {
            instance: factory.instance(),
            factory: &factory,
        };
        model.on_initialize(&ctx, &initial);
        let err = model
            .on_end(&ctx, &initial, TeamPosition::SINGLE)
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ThreadState);
    }

    #[test]
    fn pre_unify_defines_the_thread_team() {
        let (factory, model, initial) = setup();
        let ctx = ThreadContext {
            instance: factory.instance(),
            factory: &factory,
        };
        model.on_initialize(&ctx, &initial);
        model.on_begin(&ctx, &initial, 1, TeamPosition::SINGLE).unwrap();

        let ipc = SingleProcess::new();
        model
            .pre_unify(&PreUnifyContext {
                definitions: factory.definitions(),
                ipc: &ipc,
            })
            .unwrap();
        let groups: Vec<GroupDef> = GroupDef::table(factory.definitions())
            .lock()
            .iter()
            .map(|(_, group)| group.clone())
            .collect();
        let team = groups
            .iter()
            .find(|group| group.group_type == GroupType::ThreadTeam)
            .unwrap();
        assert_eq!(team.members, vec![0, 1]);
        let locations = groups
            .iter()
            .find(|group| group.group_type == GroupType::CommLocations)
            .unwrap();
        assert_eq!(locations.members, vec![0, 1 << 32]);
    }
}
