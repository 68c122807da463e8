//! Configuration resolution as seen by a measurement.

#[macro_use]
mod common;

use common::*;
use hpctrace::config::{parse_size, RegionFilter, MIN_CHUNK_SIZE};
use hpctrace::{CreateWait, ErrorKind, Measurement, MeasurementConfig, RegionInfo};

#[test]
fn invalid_config_is_rejected_at_build() {
    init_test_logging();
    let config = test_config().with_chunk_size(MIN_CHUNK_SIZE - 1);
    let err = Measurement::<CreateWait>::builder(config).build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    assert!(!err.is_fatal());
}

#[test]
fn size_values_accept_suffixes() {
    assert_eq!(parse_size("HPCTRACE_TOTAL_MEMORY", "3k").unwrap(), 3072);
    let err = parse_size("HPCTRACE_TOTAL_MEMORY", "3 parsecs").unwrap_err();
    assert!(err.to_string().contains("HPCTRACE_TOTAL_MEMORY"));
}

#[test]
fn filter_list_drives_region_definition() {
    init_test_logging();
    let mut config = test_config().with_tracing(false);
    config.filter = RegionFilter::parse("omp_* , *_tmp");
    let m: Measurement<CreateWait> = Measurement::builder(config).build().unwrap();
    assert!(m
        .define_region(&RegionInfo::new("omp_barrier"))
        .unwrap()
        .is_filtered());
    assert!(m
        .define_region(&RegionInfo::new("buffer_tmp"))
        .unwrap()
        .is_filtered());
    assert!(m.define_region(&RegionInfo::new("compute")).unwrap().is_valid());
}

#[cfg(feature = "config-file")]
#[test]
fn toml_file_overrides_defaults() {
    use hpctrace::config::{apply_toml_config, parse_toml_file};
    use std::io::Write;

    init_test_logging();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[memory]
total_memory = "8M"
page_size = "4k"

[tracing]
enabled = false
chunk_size = 65536
timer = "logical"
filter_regions = ["MPI_*"]
verbose = true
"#
    )
    .unwrap();

    let toml = parse_toml_file(file.path()).unwrap();
    let mut config = MeasurementConfig::default();
    apply_toml_config(&mut config, &toml).unwrap();
    config.validate().unwrap();
    assert_eq!(config.total_memory, 8 * 1024 * 1024);
    assert_eq!(config.page_size, 4096);
    assert_eq!(config.chunk_size, 65536);
    assert!(!config.enable_tracing);
    assert!(config.verbose);
    assert!(config.filter.is_filtered("MPI_Allreduce"));
}

#[cfg(feature = "config-file")]
#[test]
fn malformed_toml_is_an_invalid_config() {
    let err = hpctrace::config::parse_toml_str("[memory\ntotal_memory = ").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfig);
}
