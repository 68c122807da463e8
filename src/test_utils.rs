//! Test utilities for hpctrace.
//!
//! This module provides shared helpers for unit tests:
//! - Consistent tracing-based logging initialization
//! - A lock serializing tests that mutate environment variables
//! - A standalone [`LocationFactory`] for exercising thread models without
//!   a full measurement

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

use tracing_subscriber::fmt::format::FmtSpan;

use crate::definitions::DefinitionManager;
use crate::error::Result;
use crate::location::{Location, LocationRegistry};
use crate::thread::LocationFactory;
use crate::types::{LocationType, Paradigm};

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

// Kept apart from measurement instance ids.
static NEXT_TEST_INSTANCE: AtomicU64 = AtomicU64::new(1 << 48);

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Creates bare locations.
#[derive(Debug)]
pub(crate) struct TestFactory {
    instance: u64,
    definitions: DefinitionManager,
    locations: LocationRegistry,
    initial: Arc<Location>,
}

impl TestFactory {
    /// A factory for rank 0 holding one initial location.
    pub(crate) fn new() -> Self {
        init_test_logging();
        let definitions = DefinitionManager::new();
        let locations = LocationRegistry::new(0);
        let initial = locations
            .create(
                &definitions,
                "Master thread",
                LocationType::CpuThread,
                Paradigm::Measurement,
                None,
            )
            .expect("initial location");
        Self {
            instance: NEXT_TEST_INSTANCE.fetch_add(1, Ordering::Relaxed),
            definitions,
            locations,
            initial,
        }
    }

    /// Id under which thread data is stored.
    pub(crate) const fn instance(&self) -> u64 {
        self.instance
    }

    /// The first location.
    pub(crate) fn initial(&self) -> Arc<Location> {
        Arc::clone(&self.initial)
    }

    /// Locations created so far, the initial one included.
    pub(crate) fn locations(&self) -> &LocationRegistry {
        &self.locations
    }

    /// The definitions locations are defined in.
    pub(crate) const fn definitions(&self) -> &DefinitionManager {
        &self.definitions
    }
}

impl LocationFactory for TestFactory {
    fn create_location(
        &self,
        name: &str,
        paradigm: Paradigm,
        parent: Option<&Location>,
    ) -> Result<Arc<Location>> {
        self.locations.create(
            &self.definitions,
            name,
            LocationType::CpuThread,
            paradigm,
            parent.map(Location::id),
        )
    }
}
