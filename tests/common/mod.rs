#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use std::sync::{Arc, Once};
use std::thread;

use hpctrace::ipc::LocalGroupMember;
use hpctrace::timer::TimerKind;
use hpctrace::trace::FileSubstrate;
use hpctrace::{
    CreateWait, LocalGroup, Measurement, MeasurementConfig, MemorySubstrate, ThreadModel,
};
use proptest::prelude::ProptestConfig;
use proptest::test_runner::RngSeed;
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// Seed used for property tests on CI when no seed is given.
pub const CI_PROPTEST_SEED: u64 = 0x5EED_5EED;

const PROPTEST_SEED_ENV: &str = "HPCTRACE_PROPTEST_SEED";

/// Proptest settings for `cases` cases.
///
/// `HPCTRACE_PROPTEST_SEED` fixes the seed; on CI a fixed seed is used
/// unless proptest's own `PROPTEST_RNG_SEED` already chose one.
#[must_use]
pub fn test_proptest_config(cases: u32) -> ProptestConfig {
    let mut config = ProptestConfig::with_cases(cases);
    let seed = std::env::var(PROPTEST_SEED_ENV)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .or_else(|| std::env::var("CI").is_ok().then_some(CI_PROPTEST_SEED));
    if let Some(seed) = seed.filter(|_| matches!(config.rng_seed, RngSeed::Random)) {
        config.rng_seed = RngSeed::Fixed(seed);
    }
    config
}

/// Initialize test logging with trace-level output.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
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

/// A config with a logical clock, so timestamps never collide.
#[must_use]
pub fn test_config() -> MeasurementConfig {
    MeasurementConfig::default().with_timer(TimerKind::Logical)
}

/// A single-process measurement writing into `substrate`.
pub fn test_measurement<M: ThreadModel>(
    config: MeasurementConfig,
    substrate: &MemorySubstrate,
) -> Measurement<M> {
    init_test_logging();
    Measurement::builder(config)
        .substrate(Arc::new(substrate.clone()))
        .build()
        .expect("failed to build test measurement")
}

/// Runs `body` once per rank of an in-process group of `size` ranks, each
/// on its own thread with its own measurement. All ranks write into one
/// shared substrate. Results are returned in rank order.
pub fn run_ranks<T, F>(size: u32, substrate: &MemorySubstrate, body: F) -> Vec<T>
where
    T: Send,
    F: Fn(Measurement<CreateWait>) -> T + Sync,
{
    init_test_logging();
    let members = LocalGroup::new(size);
    thread::scope(|s| {
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                let body = &body;
                let substrate = substrate.clone();
                s.spawn(move || {
                    let measurement = Measurement::builder(test_config())
                        .ipc(Arc::new(member))
                        .substrate(Arc::new(substrate))
                        .build()
                        .expect("failed to build rank measurement");
                    body(measurement)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("rank thread panicked"))
            .collect()
    })
}

/// The substrate as a trait object, for [`hpctrace::ArchiveReader`].
#[must_use]
pub fn as_substrate(substrate: &MemorySubstrate) -> Arc<dyn FileSubstrate> {
    Arc::new(substrate.clone())
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}
