//! Assembling a measurement.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Measurement, Phase, INITIAL_LOCATION_NAME, NEXT_INSTANCE};
use crate::config::MeasurementConfig;
use crate::definitions::DefinitionManager;
use crate::error::Result;
use crate::ipc::{Ipc, SingleProcess};
use crate::location::LocationRegistry;
use crate::memory::PageAllocator;
use crate::subsystem::{Subsystem, SubsystemRegistry};
use crate::thread::{LocationFactory, ThreadData, ThreadModel};
use crate::timer::Clock;
use crate::trace::{
    Archive, ArchiveConfig, ArchiveError, CompressionMode, FileSubstrate, MeasurementFlush,
    PagedMemory, PosixSubstrate, TraceStatus,
};
use crate::tracing_compat::info;
use crate::types::LocationGroupType;

/// Builder for a [`Measurement`].
pub struct MeasurementBuilder<M> {
    config: MeasurementConfig,
    ipc: Option<Arc<dyn Ipc>>,
    substrate: Option<Arc<dyn FileSubstrate>>,
    subsystems: Vec<Box<dyn Subsystem>>,
    _model: PhantomData<fn() -> M>,
}

impl<M> std::fmt::Debug for MeasurementBuilder<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeasurementBuilder")
            .field("config", &self.config)
            .field("ipc", &self.ipc)
            .field("substrate", &self.substrate)
            .field("subsystems", &self.subsystems.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl<M: ThreadModel> MeasurementBuilder<M> {
    /// A builder over `config`, single-process, writing to the configured
    /// experiment directory.
    #[must_use]
    pub fn new(config: MeasurementConfig) -> Self {
        Self {
            config,
            ipc: None,
            substrate: None,
            subsystems: Vec::new(),
            _model: PhantomData,
        }
    }

    /// Sets the collectives used for unification.
    #[must_use]
    pub fn ipc(mut self, ipc: Arc<dyn Ipc>) -> Self {
        self.ipc = Some(ipc);
        self
    }

    /// Writes the archive through `substrate` instead of the experiment
    /// directory.
    #[must_use]
    pub fn substrate(mut self, substrate: Arc<dyn FileSubstrate>) -> Self {
        self.substrate = Some(substrate);
        self
    }

    /// Registers a subsystem. Hooks run in registration order.
    #[must_use]
    pub fn subsystem(mut self, subsystem: Box<dyn Subsystem>) -> Self {
        self.subsystems.push(subsystem);
        self
    }

    fn open_archive(&self) -> Result<Option<Arc<Archive>>> {
        if !self.config.enable_tracing {
            return Ok(None);
        }
        let substrate = match &self.substrate {
            Some(substrate) => Arc::clone(substrate),
            None => Arc::new(
                PosixSubstrate::new(&self.config.experiment_directory).map_err(ArchiveError::from)?,
            ),
        };
        let compression = if self.config.compress {
            CompressionMode::enabled()
        } else {
            CompressionMode::None
        };
        Ok(Some(Archive::open(
            substrate,
            ArchiveConfig::with_chunk_size(self.config.chunk_size, compression),
        )))
    }

    /// Validates the configuration, runs the subsystems' `register` and
    /// `init` hooks, creates the initial location and begins measuring.
    pub fn build(self) -> Result<Measurement<M>> {
        self.config.validate()?;
        let ipc = self
            .ipc
            .clone()
            .unwrap_or_else(|| Arc::new(SingleProcess::new()));
        let rank = ipc.rank();
        let clock = Arc::new(Clock::new(self.config.timer));
        let allocator = PageAllocator::new(self.config.total_memory, self.config.page_size)?;
        let status = Arc::new(TraceStatus::default());
        let flush = Arc::new(MeasurementFlush::new(Arc::clone(&clock), rank, Arc::clone(&status)));
        let memory = Arc::new(PagedMemory::new(Arc::clone(&allocator)));
        let archive = self.open_archive()?;

        let definitions = DefinitionManager::new();
        definitions.define_location_group(
            rank,
            &format!("Process {rank}"),
            LocationGroupType::Process,
        )?;

        let subsystems = SubsystemRegistry::new();
        for subsystem in self.subsystems {
            subsystems.register(subsystem)?;
        }

        let measurement = Measurement {
            instance: NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed),
            config: self.config,
            ipc,
            clock,
            definitions,
            locations: LocationRegistry::new(rank),
            subsystems,
            model: M::default(),
            allocator,
            status,
            flush,
            memory,
            archive,
            initial: Mutex::new(None),
            phase: AtomicU8::new(Phase::Running as u8),
            begin_timestamp: AtomicU64::new(0),
            fork_sequence: AtomicU32::new(0),
            create_sequence: AtomicU32::new(0),
        };
        measurement
            .subsystems
            .init(&measurement.subsystem_context(None))?;

        let location = measurement.create_location(INITIAL_LOCATION_NAME, M::PARADIGM, None)?;
        let initial = Arc::new(ThreadData::new(location, None));
        measurement
            .model
            .on_initialize(&measurement.thread_context(), &initial);
        measurement.attach(initial.location())?;
        *measurement.initial.lock() = Some(initial);

        measurement
            .begin_timestamp
            .store(measurement.clock.now(), Ordering::Release);
        measurement.subsystems.begin();
        info!(
            rank,
            size = measurement.size(),
            paradigm = M::PARADIGM.name(),
            tracing = measurement.config.enable_tracing,
            "measurement initialized"
        );
        Ok(measurement)
    }
}
