//! Ending a measurement and writing its archive.
//!
//! Finalization is collective: every rank calls [`Measurement::finalize`]
//! and takes part in the same sequence of barriers, gathers and broadcasts.
//!
//! ```text
//!   finalize_location (all locations)
//!   thread model finalize
//!   subsystems pre_unify, thread-team definitions     (collective)
//!   epoch reduction                                   (collective)
//!   final flush of every event buffer
//!   unification                                       (collective)
//!   subsystems post_unify
//!   local definitions, anchor gather                  (collective)
//!   rank 0: global definitions + anchor
//!   subsystems finalize, deregister
//! ```

use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::{invalid_phase, recorder, Measurement, Phase};
use crate::error::{ErrorKind, Result, ResultExt};
use crate::ipc::gather_value;
use crate::location::Location;
use crate::thread::{PreUnifyContext, ThreadModel};
use crate::trace::file::ARCHIVE_VERSION;
use crate::trace::{Anchor, AnchorLocation, GlobalDefinitions, LocalDefinitions};
use crate::tracing_compat::{debug, info, info_span, warn};
use crate::unify::{unify, Epoch, Unification};

/// What finalization produced on one rank.
#[derive(Debug)]
pub struct MeasurementSummary {
    /// The rank.
    pub rank: u32,
    /// Locations of this rank.
    pub locations: usize,
    /// Records written by this rank.
    pub events: u64,
    /// Time span of the measurement across all ranks.
    pub epoch: Epoch,
    /// True if an intermediate flush stopped recording.
    pub recording_disabled: bool,
    /// Mappings of this rank, and the unified definitions on rank 0.
    pub unification: Unification,
}

impl<M: ThreadModel> Measurement<M> {
    /// Stops accepting events and exits every region still open, on every
    /// location. Locations another thread is still recording on are left
    /// as they are.
    pub fn end(&self) -> Result<()> {
        self.phase
            .compare_exchange(
                Phase::Running as u8,
                Phase::Ended as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|phase| invalid_phase(format!("end in phase {:?}", Phase::from_u8(phase))))?;
        self.subsystems.end();
        self.detach();
        for location in self.locations.all() {
            let open = match self.exit_all_on(&location) {
                Ok(open) => open,
                Err(err) if err.kind() == ErrorKind::ThreadState => {
                    warn!(location = location.id(), error = %err, "open regions not exited at end");
                    continue;
                }
                Err(err) => return Err(err),
            };
            if !open.is_empty() {
                debug!(
                    location = location.id(),
                    regions = open.len(),
                    "open regions exited at end"
                );
            }
        }
        Ok(())
    }

    /// Ends the measurement if needed, unifies the definitions across all
    /// ranks and writes the archive.
    pub fn finalize(&self) -> Result<MeasurementSummary> {
        match self.phase() {
            Phase::Running => self.end()?,
            Phase::Ended => {}
            Phase::Finalized => return Err(invalid_phase("measurement is already finalized")),
        }
        let rank = self.rank();
        let _span = info_span!("finalize", rank).entered();
        let locations = self.locations.all();
        for location in &locations {
            self.subsystems.finalize_location(location);
        }
        let initial = self.initial.lock().clone();
        if let Some(initial) = initial {
            self.model.on_finalize(&initial)?;
        }

        self.subsystems.pre_unify(&self.subsystem_context(None))?;
        self.model.pre_unify(&PreUnifyContext {
            definitions: &self.definitions,
            ipc: self.ipc.as_ref(),
        })?;

        let begin = self.begin_timestamp.load(Ordering::Acquire);
        let epoch = Epoch::new(begin, self.clock.now()).reduce(self.ipc.as_ref())?;

        let events = self.flush_buffers(&locations)?;

        let unification = unify(self.ipc.as_ref(), &self.definitions)?;
        self.subsystems
            .post_unify(&self.subsystem_context(Some(unification.mappings())))?;

        self.write_archive(&locations, &unification, epoch)?;

        self.subsystems.finalize();
        self.subsystems.deregister();
        self.phase.store(Phase::Finalized as u8, Ordering::Release);
        self.allocator.trim();
        info!(
            rank,
            locations = locations.len(),
            events,
            recording_disabled = self.status.recording_disabled(),
            "measurement finalized"
        );
        Ok(MeasurementSummary {
            rank,
            locations: locations.len(),
            events,
            epoch,
            recording_disabled: self.status.recording_disabled(),
            unification,
        })
    }

    fn flush_buffers(&self, locations: &[Arc<Location>]) -> Result<u64> {
        let Some(archive) = &self.archive else {
            return Ok(0);
        };
        let mut events = 0;
        for location in locations {
            let trace = match recorder::take(location) {
                Ok(recorder) => recorder.trace,
                Err(err) => {
                    warn!(location = location.id(), error = %err, "event buffer lost");
                    None
                }
            };
            if let Some(mut trace) = trace {
                trace
                    .buffer
                    .flush_final()
                    .at_location(location.rank(), location.id())?;
            }
            let written = archive.event_count(location.global_id());
            if self.config.verbose {
                info!(location = location.id(), events = written, "event buffer flushed");
            } else {
                debug!(location = location.id(), events = written, "event buffer flushed");
            }
            events += written;
        }
        Ok(events)
    }

    fn write_archive(
        &self,
        locations: &[Arc<Location>],
        unification: &Unification,
        epoch: Epoch,
    ) -> Result<()> {
        let Some(archive) = &self.archive else {
            return Ok(());
        };
        let rank = self.rank();
        for location in locations {
            archive.write_local_definitions(&LocalDefinitions {
                location: location.global_id(),
                rank,
                mappings: unification.mappings().clone(),
            })?;
        }

        let listed: Vec<AnchorLocation> = locations
            .iter()
            .map(|location| AnchorLocation {
                global_id: location.global_id(),
                rank,
                name: location.name().to_owned(),
                events: archive.event_count(location.global_id()),
            })
            .collect();
        let gathered = gather_value(self.ipc.as_ref(), &listed, 0)?;
        match (gathered, unification.unified()) {
            (Some(per_rank), Some(unified)) => {
                archive.write_global_definitions(&GlobalDefinitions {
                    definitions: unified.snapshot(),
                    epoch,
                    timer_resolution: self.clock.resolution(),
                })?;
                archive.close(&Anchor {
                    version: ARCHIVE_VERSION,
                    creator: format!("hpctrace {}", env!("CARGO_PKG_VERSION")),
                    rank_count: self.size(),
                    config: *archive.config(),
                    epoch,
                    locations: per_rank.into_iter().flatten().collect(),
                })?;
            }
            _ => archive.release(),
        }
        self.ipc.barrier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeasurementConfig;
    use crate::definitions::RegionInfo;
    use crate::error::ErrorKind;
    use crate::thread::CreateWait;
    use crate::timer::TimerKind;
    use crate::trace::{ArchiveReader, FileSubstrate, MemorySubstrate};

    #[test]
    fn finalize_writes_a_readable_archive() {
        let substrate = MemorySubstrate::new();
        let m: Measurement<CreateWait> =
            Measurement::builder(MeasurementConfig::default().with_timer(TimerKind::Logical))
                .substrate(Arc::new(substrate.clone()))
                .build()
                .unwrap();
        let a = m.define_region(&RegionInfo::new("A")).unwrap();
        let b = m.define_region(&RegionInfo::new("B")).unwrap();
        m.enter_region(a).unwrap();
        m.enter_region(b).unwrap();

        let summary = m.finalize().unwrap();
        assert_eq!(m.phase(), Phase::Finalized);
        assert_eq!(summary.events, 4);
        assert!(summary.unification.unified().is_some());
        assert!(summary.epoch.begin <= summary.epoch.end);

        let reader = ArchiveReader::open(Arc::new(substrate) as Arc<dyn FileSubstrate>).unwrap();
        let location = reader.locations()[0];
        let names: Vec<_> = reader.region_events(location).unwrap();
        assert_eq!(
            names,
            vec![
                ("enter", "A".to_string()),
                ("enter", "B".to_string()),
                ("leave", "B".to_string()),
                ("leave", "A".to_string()),
            ]
        );
        assert_eq!(reader.anchor().rank_count, 1);

        let err = m.finalize().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPhase);
        assert_eq!(m.enter_region(a).unwrap_err().kind(), ErrorKind::InvalidPhase);
    }

    #[test]
    fn finalize_without_tracing_still_unifies() {
        let m: Measurement<CreateWait> = Measurement::builder(
            MeasurementConfig::default()
                .with_timer(TimerKind::Logical)
                .with_tracing(false),
        )
        .build()
        .unwrap();
        assert!(m.archive().is_none());
        let region = m.define_region(&RegionInfo::new("quiet")).unwrap();
        m.enter_region(region).unwrap();
        m.exit_region(region).unwrap();
        let summary = m.finalize().unwrap();
        assert_eq!(summary.events, 0);
        assert!(m.definitions().is_fully_unified());
    }
}
