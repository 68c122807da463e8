//! Paradigm adapters and their lifecycle hooks.
//!
//! Every adapter (MPI, OpenMP, CUDA, POSIX I/O, user regions) implements
//! [`Subsystem`] and is registered into a [`SubsystemRegistry`] in a fixed
//! order. Hooks run in that order; the teardown hooks (`finalize_location`,
//! `finalize`) run in reverse, so a subsystem can rely on every subsystem
//! registered before it being alive for its whole lifetime.
//!
//! # Lifecycle
//!
//! ```text
//! register → init → (init_location)* → begin
//!   → end → (finalize_location)* → pre_unify → post_unify
//!   → finalize → deregister
//! ```
//!
//! A failing `register`, `init`, `pre_unify` or `post_unify` hook aborts the
//! measurement with [`ErrorKind::SubsystemFailed`].

use std::fmt;

use parking_lot::Mutex;

use crate::definitions::{DefinitionManager, DefinitionMappings};
use crate::error::{Error, ErrorKind, Result};
use crate::location::Location;
use crate::tracing_compat::debug;

/// Registration index of a subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubsystemId(u32);

impl SubsystemId {
    /// Registration index.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// The location data slot reserved for this subsystem.
    #[must_use]
    pub const fn slot(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SubsystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subsystem#{}", self.0)
    }
}

/// What the hooks can see of the measurement.
#[derive(Debug, Clone, Copy)]
pub struct SubsystemContext<'a> {
    /// Process rank.
    pub rank: u32,
    /// Number of processes.
    pub size: u32,
    /// The process-local definitions.
    pub definitions: &'a DefinitionManager,
    /// This process's local→unified mappings, once unification ran.
    pub mappings: Option<&'a DefinitionMappings>,
}

/// Lifecycle hooks of one paradigm adapter. All hooks default to no-ops.
#[allow(unused_variables)]
pub trait Subsystem: Send {
    /// Name used in diagnostics.
    fn name(&self) -> &'static str;

    /// Called once with the subsystem's id.
    fn register(&mut self, id: SubsystemId) -> Result<()> {
        Ok(())
    }

    /// Called after all subsystems are registered.
    fn init(&mut self, ctx: &SubsystemContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called for every new location, with its parent if it has one.
    fn init_location(&mut self, location: &Location, parent: Option<&Location>) -> Result<()> {
        Ok(())
    }

    /// Measurement begins.
    fn begin(&mut self) {}

    /// Measurement ends.
    fn end(&mut self) {}

    /// Called for every location during finalization, in reverse order.
    fn finalize_location(&mut self, location: &Location) {}

    /// Called before unification; adapters define their late definitions.
    fn pre_unify(&mut self, ctx: &SubsystemContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called after unification with the mappings available.
    fn post_unify(&mut self, ctx: &SubsystemContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Releases resources, in reverse order.
    fn finalize(&mut self) {}

    /// Last hook.
    fn deregister(&mut self) {}
}

fn failed(name: &str, hook: &str, err: Error) -> Error {
    Error::new(ErrorKind::SubsystemFailed)
        .with_message(format!("subsystem \"{name}\" failed in {hook}: {err}"))
        .with_source(err)
}

/// Ordered collection of subsystems.
#[derive(Default)]
pub struct SubsystemRegistry {
    subsystems: Mutex<Vec<Box<dyn Subsystem>>>,
}

impl fmt::Debug for SubsystemRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl SubsystemRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a subsystem and runs its `register` hook.
    pub fn register(&self, mut subsystem: Box<dyn Subsystem>) -> Result<SubsystemId> {
        let mut subsystems = self.subsystems.lock();
        let id = SubsystemId(u32::try_from(subsystems.len()).map_err(|_| {
            Error::internal("too many subsystems")
        })?);
        subsystem
            .register(id)
            .map_err(|err| failed(subsystem.name(), "register", err))?;
        debug!(subsystem = subsystem.name(), id = id.index(), "subsystem registered");
        subsystems.push(subsystem);
        Ok(id)
    }

    /// Names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.subsystems.lock().iter().map(|s| s.name()).collect()
    }

    /// Number of subsystems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subsystems.lock().len()
    }

    /// True if none are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn each_fallible(
        &self,
        hook: &str,
        mut f: impl FnMut(&mut dyn Subsystem) -> Result<()>,
    ) -> Result<()> {
        for subsystem in self.subsystems.lock().iter_mut() {
            f(subsystem.as_mut()).map_err(|err| failed(subsystem.name(), hook, err))?;
        }
        Ok(())
    }

    /// Runs `init` in order.
    pub fn init(&self, ctx: &SubsystemContext<'_>) -> Result<()> {
        self.each_fallible("init", |s| s.init(ctx))
    }

    /// Runs `init_location` in order.
    pub fn init_location(&self, location: &Location, parent: Option<&Location>) -> Result<()> {
        self.each_fallible("init_location", |s| s.init_location(location, parent))
    }

    /// Runs `begin` in order.
    pub fn begin(&self) {
        self.subsystems.lock().iter_mut().for_each(|s| s.begin());
    }

    /// Runs `end` in order.
    pub fn end(&self) {
        self.subsystems.lock().iter_mut().for_each(|s| s.end());
    }

    /// Runs `finalize_location` in reverse order.
    pub fn finalize_location(&self, location: &Location) {
        self.subsystems
            .lock()
            .iter_mut()
            .rev()
            .for_each(|s| s.finalize_location(location));
    }

    /// Runs `pre_unify` in order.
    pub fn pre_unify(&self, ctx: &SubsystemContext<'_>) -> Result<()> {
        self.each_fallible("pre_unify", |s| s.pre_unify(ctx))
    }

    /// Runs `post_unify` in order.
    pub fn post_unify(&self, ctx: &SubsystemContext<'_>) -> Result<()> {
        self.each_fallible("post_unify", |s| s.post_unify(ctx))
    }

    /// Runs `finalize` in reverse order.
    pub fn finalize(&self) {
        self.subsystems
            .lock()
            .iter_mut()
            .rev()
            .for_each(|s| s.finalize());
    }

    /// Runs `deregister` in order and empties the registry.
    pub fn deregister(&self) {
        let mut subsystems = self.subsystems.lock();
        for subsystem in subsystems.iter_mut() {
            subsystem.deregister();
        }
        subsystems.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_init: bool,
    }

    impl Subsystem for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn register(&mut self, id: SubsystemId) -> Result<()> {
            self.log.lock().push(format!("{}:register:{}", self.name, id.index()));
            Ok(())
        }

        fn init(&mut self, _ctx: &SubsystemContext<'_>) -> Result<()> {
            if self.fail_init {
                return Err(Error::new(ErrorKind::InvalidConfig));
            }
            self.log.lock().push(format!("{}:init", self.name));
            Ok(())
        }

        fn finalize(&mut self) {
            self.log.lock().push(format!("{}:finalize", self.name));
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>, fail_init: bool) -> Box<dyn Subsystem> {
        Box::new(Recorder {
            name,
            log: Arc::clone(log),
            fail_init,
        })
    }

    #[test]
    fn hooks_run_in_order_and_teardown_reversed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = SubsystemRegistry::new();
        let a = registry.register(recorder("a", &log, false)).unwrap();
        let b = registry.register(recorder("b", &log, false)).unwrap();
        assert_eq!(b.slot(), a.slot() + 1);
        assert_eq!(a.slot(), 0);

        let defs = DefinitionManager::new();
        let ctx = SubsystemContext {
            rank: 0,
            size: 1,
            definitions: &defs,
            mappings: None,
        };
        registry.init(&ctx).unwrap();
        registry.finalize();
        assert_eq!(
            *log.lock(),
            vec![
                "a:register:0",
                "b:register:1",
                "a:init",
                "b:init",
                "b:finalize",
                "a:finalize"
            ]
        );
    }

    struct Visits {
        id: Option<SubsystemId>,
        seen: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl Subsystem for Visits {
        fn name(&self) -> &'static str {
            "visits"
        }

        fn register(&mut self, id: SubsystemId) -> Result<()> {
            self.id = Some(id);
            Ok(())
        }

        fn init_location(&mut self, location: &Location, _parent: Option<&Location>) -> Result<()> {
            if let Some(id) = self.id {
                location.data().set_slot(id.slot(), location.id() + 100);
            }
            Ok(())
        }

        fn finalize_location(&mut self, location: &Location) {
            let Some(id) = self.id else { return };
            if let Some(&value) = location.data().slot::<u32>(id.slot()) {
                self.seen.lock().push((location.id(), value));
            }
        }
    }

    #[test]
    fn subsystems_keep_per_location_state_in_their_slot() {
        use crate::location::LocationRegistry;
        use crate::types::{LocationType, Paradigm};

        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let registry = SubsystemRegistry::new();
        registry.register(recorder("a", &log, false)).unwrap();
        let visits = registry
            .register(Box::new(Visits {
                id: None,
                seen: Arc::clone(&seen),
            }))
            .unwrap();
        assert_eq!(visits.slot(), 1);

        let defs = DefinitionManager::new();
        let locations = LocationRegistry::new(0);
        for name in ["main", "worker"] {
            let location = locations
                .create(&defs, name, LocationType::CpuThread, Paradigm::Pthread, None)
                .unwrap();
            registry.init_location(&location, None).unwrap();
        }
        for location in locations.all() {
            registry.finalize_location(&location);
        }
        assert_eq!(*seen.lock(), vec![(0, 100), (1, 101)]);
        assert!(locations.get(0).unwrap().data().slot::<u32>(0).is_none());
    }

    #[test]
    fn failing_init_is_fatal() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = SubsystemRegistry::new();
        registry.register(recorder("bad", &log, true)).unwrap();
        let defs = DefinitionManager::new();
        let ctx = SubsystemContext {
            rank: 0,
            size: 1,
            definitions: &defs,
            mappings: None,
        };
        let err = registry.init(&ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubsystemFailed);
        assert!(err.is_fatal());
        assert!(err.message().unwrap().contains("\"bad\""));
    }
}
