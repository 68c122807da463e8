//! Thread events.
//!
//! The creating thread obtains a [`ThreadSpawn`] (from [`Measurement::fork`]
//! or [`Measurement::thread_create`]) and hands it to the threads it starts,
//! which pass it to their begin event. The spawn carries the parent's thread
//! data and the sequence count that pairs the events in the trace.
//!
//! Begin and join events make the calling thread the one recording on the
//! location the model assigned it; end events give the location back.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::Measurement;
use crate::error::Result;
use crate::location::Location;
use crate::thread::{
    CreateWait, CreateWaitPrivate, ForkJoin, ForkJoinPrivate, TeamPosition, ThreadData,
    ThreadModel,
};
use crate::trace::TraceEvent;

/// What a creating thread hands to the threads it starts.
pub struct ThreadSpawn<P> {
    parent: Arc<ThreadData<P>>,
    sequence: u32,
}

impl<P> ThreadSpawn<P> {
    /// The creating thread's data.
    #[must_use]
    pub const fn parent(&self) -> &Arc<ThreadData<P>> {
        &self.parent
    }

    /// Sequence count of the fork or create event.
    #[must_use]
    pub const fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl<P> Clone for ThreadSpawn<P> {
    fn clone(&self) -> Self {
        Self {
            parent: Arc::clone(&self.parent),
            sequence: self.sequence,
        }
    }
}

impl<P> fmt::Debug for ThreadSpawn<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSpawn")
            .field("parent", &self.parent.location().id())
            .field("sequence", &self.sequence)
            .finish()
    }
}

// =========================================================================
// Fork/join
// =========================================================================

impl Measurement<ForkJoin> {
    /// The calling thread is about to start a team of `requested` threads.
    pub fn fork(&self, requested: u32) -> Result<ThreadSpawn<ForkJoinPrivate>> {
        self.ensure_running()?;
        let parent = self.current_thread()?;
        self.model.on_create(&parent, requested)?;
        let sequence = self.fork_sequence.fetch_add(1, Ordering::AcqRel) + 1;
        self.record(
            parent.location(),
            TraceEvent::ThreadFork {
                paradigm: ForkJoin::PARADIGM,
                requested,
            },
        )?;
        Ok(ThreadSpawn { parent, sequence })
    }

    /// The calling thread starts as member `team.thread_id` of the team
    /// forked by `fork`. Returns the location it records on.
    pub fn team_begin(
        &self,
        fork: &ThreadSpawn<ForkJoinPrivate>,
        team: TeamPosition,
    ) -> Result<Arc<Location>> {
        self.ensure_running()?;
        let begun =
            self.model
                .on_begin(&self.thread_context(), &fork.parent, fork.sequence, team)?;
        let location = Arc::clone(begun.data.location());
        self.attach(&location)?;
        self.record(
            &location,
            TraceEvent::ThreadTeamBegin {
                paradigm: ForkJoin::PARADIGM,
                team_size: team.team_size,
            },
        )?;
        Ok(location)
    }

    /// The calling thread leaves its team.
    pub fn team_end(&self, team: TeamPosition) -> Result<()> {
        self.ensure_running()?;
        let current = self.current_thread()?;
        self.record(
            current.location(),
            TraceEvent::ThreadTeamEnd {
                paradigm: ForkJoin::PARADIGM,
                team_size: team.team_size,
            },
        )?;
        let next = self.model.on_end(&self.thread_context(), &current, team)?;
        // Worker threads give their location back; thread 0 keeps recording
        // on the location it shares with the forking thread.
        match next {
            Some(next) if Arc::ptr_eq(next.location(), current.location()) => {}
            _ => self.detach(),
        }
        Ok(())
    }

    /// The forking thread joins its team; its own thread data becomes
    /// current again.
    pub fn join(&self) -> Result<()> {
        self.ensure_running()?;
        let current = self.current_thread()?;
        let forker = self.model.on_join(&self.thread_context(), &current)?;
        self.attach(forker.location())?;
        self.record(
            forker.location(),
            TraceEvent::ThreadJoin {
                paradigm: ForkJoin::PARADIGM,
            },
        )
    }
}

// =========================================================================
// Create/wait
// =========================================================================

impl Measurement<CreateWait> {
    /// The calling thread creates a thread.
    pub fn thread_create(&self) -> Result<ThreadSpawn<CreateWaitPrivate>> {
        self.ensure_running()?;
        let parent = self.current_thread()?;
        self.model.on_create(&parent, 1)?;
        let sequence = self.create_sequence.fetch_add(1, Ordering::AcqRel) + 1;
        self.record(
            parent.location(),
            TraceEvent::ThreadCreate {
                paradigm: CreateWait::PARADIGM,
                sequence,
            },
        )?;
        Ok(ThreadSpawn { parent, sequence })
    }

    /// The calling thread is the one created by `spawn`. It gets a new
    /// location, which is returned.
    pub fn thread_begin(&self, spawn: &ThreadSpawn<CreateWaitPrivate>) -> Result<Arc<Location>> {
        self.ensure_running()?;
        let begun = self.model.on_begin(
            &self.thread_context(),
            &spawn.parent,
            spawn.sequence,
            TeamPosition::SINGLE,
        )?;
        let location = Arc::clone(begun.data.location());
        self.attach(&location)?;
        self.record(
            &location,
            TraceEvent::ThreadBegin {
                paradigm: CreateWait::PARADIGM,
                sequence: spawn.sequence,
            },
        )?;
        Ok(location)
    }

    /// The calling thread, created by `spawn`, ends. Regions it left open
    /// are exited first.
    pub fn thread_end(&self, spawn: &ThreadSpawn<CreateWaitPrivate>) -> Result<()> {
        self.ensure_running()?;
        let current = self.current_thread()?;
        let location = Arc::clone(current.location());
        self.exit_all_on(&location)?;
        self.record(
            &location,
            TraceEvent::ThreadEnd {
                paradigm: CreateWait::PARADIGM,
                sequence: spawn.sequence,
            },
        )?;
        self.model
            .on_end(&self.thread_context(), &current, TeamPosition::SINGLE)?;
        self.detach();
        Ok(())
    }

    /// The calling thread waited for the thread created by `spawn`.
    pub fn thread_wait(&self, spawn: &ThreadSpawn<CreateWaitPrivate>) -> Result<()> {
        self.ensure_running()?;
        let location = self.current_location()?;
        self.record(
            &location,
            TraceEvent::ThreadWait {
                paradigm: CreateWait::PARADIGM,
                sequence: spawn.sequence,
            },
        )?;
        self.model.on_wait(&location);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeasurementConfig;
    use crate::error::ErrorKind;
    use crate::timer::TimerKind;
    use crate::trace::MemorySubstrate;

    fn config() -> MeasurementConfig {
        MeasurementConfig::default().with_timer(TimerKind::Logical)
    }

    #[test]
    fn fork_join_team_on_os_threads() {
        let m: Measurement<ForkJoin> = Measurement::builder(config())
            .substrate(Arc::new(MemorySubstrate::new()))
            .build()
            .unwrap();
        let initial = m.initial_location().unwrap();
        let body = m
            .define_region(&crate::definitions::RegionInfo::new("body"))
            .unwrap();

        for _round in 0..2 {
            let fork = m.fork(3).unwrap();
            assert!(m.in_parallel());
            std::thread::scope(|s| {
                for thread_id in 1..3 {
                    let fork = fork.clone();
                    let m = &m;
                    s.spawn(move || {
                        let team = TeamPosition {
                            thread_id,
                            team_size: 3,
                        };
                        let location = m.team_begin(&fork, team).unwrap();
                        assert_eq!(location.name(), format!("OMP thread {thread_id}"));
                        m.enter_region(body).unwrap();
                        assert_eq!(m.stack_depth().unwrap(), 1);
                        m.exit_region(body).unwrap();
                        m.team_end(team).unwrap();
                        // The worker gave its location back.
                        assert_eq!(m.stack_depth().unwrap_err().kind(), ErrorKind::ThreadState);
                    });
                }
            });
            let team = TeamPosition {
                thread_id: 0,
                team_size: 3,
            };
            let master = m.team_begin(&fork, team).unwrap();
            assert_eq!(master.id(), initial.id());
            m.enter_region(body).unwrap();
            m.team_end(team).unwrap();
            // Thread 0 keeps recording on the forking thread's location.
            assert_eq!(m.stack_depth().unwrap(), 1);
            m.exit_region(body).unwrap();
            m.join().unwrap();
            assert!(!m.in_parallel());
        }
        // The second parallel region reused the first one's locations.
        assert_eq!(m.locations().len(), 3);
        assert_eq!(m.current_location().unwrap().id(), initial.id());
    }

    #[test]
    fn create_wait_gives_every_thread_a_location() {
        let m: Measurement<CreateWait> = Measurement::builder(config())
            .substrate(Arc::new(MemorySubstrate::new()))
            .build()
            .unwrap();
        let spawns: Vec<_> = (0..3).map(|_| m.thread_create().unwrap()).collect();
        std::thread::scope(|s| {
            for spawn in &spawns {
                let m = &m;
                s.spawn(move || {
                    let location = m.thread_begin(spawn).unwrap();
                    assert_eq!(location.name(), format!("Pthread thread {}", spawn.sequence()));
                    m.thread_end(spawn).unwrap();
                    assert_eq!(m.current_location().unwrap_err().kind(), ErrorKind::ThreadState);
                });
            }
        });
        for spawn in &spawns {
            m.thread_wait(spawn).unwrap();
        }
        assert_eq!(m.locations().len(), 4);
        assert_eq!(m.model().location_ids().len(), 4);
        assert_eq!(m.model().active_locations(), 1);
    }
}
