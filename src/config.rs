//! Measurement configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`with_total_memory(..)`)
//! 2. **Environment variables**: values from `HPCTRACE_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: [`MeasurementConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `HPCTRACE_TOTAL_MEMORY` | size | `total_memory` |
//! | `HPCTRACE_PAGE_SIZE` | size | `page_size` |
//! | `HPCTRACE_ENABLE_TRACING` | `bool` | `enable_tracing` |
//! | `HPCTRACE_TRACING_COMPRESS` | `bool` | `compress` |
//! | `HPCTRACE_TRACING_CHUNK_SIZE` | size | `chunk_size` |
//! | `HPCTRACE_EXPERIMENT_DIRECTORY` | path | `experiment_directory` |
//! | `HPCTRACE_TIMER` | timer name | `timer` |
//! | `HPCTRACE_FILTER_REGIONS` | patterns | `filter` |
//! | `HPCTRACE_VERBOSE` | `bool` | `verbose` |
//! | `HPCTRACE_TRACE_BUFFER` | size | deprecated alias of `HPCTRACE_TOTAL_MEMORY` |
//!
//! Sizes accept a `k`, `M` or `G` suffix (powers of 1024), optionally
//! followed by `b`/`B`. Filter patterns are separated by commas or
//! whitespace; `*` matches any run of characters.

use std::path::PathBuf;

use crate::error::{Error, ErrorKind, Result};
use crate::timer::TimerKind;
use crate::trace::archive::DEFAULT_EVENT_CHUNK_SIZE;

/// Environment variable name for the total memory budget.
pub const ENV_TOTAL_MEMORY: &str = "HPCTRACE_TOTAL_MEMORY";
/// Environment variable name for the page size.
pub const ENV_PAGE_SIZE: &str = "HPCTRACE_PAGE_SIZE";
/// Environment variable name for the tracing toggle.
pub const ENV_ENABLE_TRACING: &str = "HPCTRACE_ENABLE_TRACING";
/// Environment variable name for trace compression.
pub const ENV_TRACING_COMPRESS: &str = "HPCTRACE_TRACING_COMPRESS";
/// Environment variable name for the event chunk size.
pub const ENV_TRACING_CHUNK_SIZE: &str = "HPCTRACE_TRACING_CHUNK_SIZE";
/// Environment variable name for the archive directory.
pub const ENV_EXPERIMENT_DIRECTORY: &str = "HPCTRACE_EXPERIMENT_DIRECTORY";
/// Environment variable name for the timer.
pub const ENV_TIMER: &str = "HPCTRACE_TIMER";
/// Environment variable name for region filter patterns.
pub const ENV_FILTER_REGIONS: &str = "HPCTRACE_FILTER_REGIONS";
/// Environment variable name for verbose diagnostics.
pub const ENV_VERBOSE: &str = "HPCTRACE_VERBOSE";
/// Deprecated alias of [`ENV_TOTAL_MEMORY`].
pub const ENV_TRACE_BUFFER: &str = "HPCTRACE_TRACE_BUFFER";

/// Default total memory budget.
pub const DEFAULT_TOTAL_MEMORY: usize = 16_384_000;
/// Default page size.
pub const DEFAULT_PAGE_SIZE: usize = 8192;
/// Smallest accepted chunk size.
pub const MIN_CHUNK_SIZE: usize = 256;

// =========================================================================
// Region filter
// =========================================================================

/// Region names excluded from the trace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionFilter {
    patterns: Vec<String>,
}

impl RegionFilter {
    /// A filter excluding regions that match any of `patterns`.
    #[must_use]
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
        }
    }

    /// Parses a comma- or whitespace-separated pattern list.
    #[must_use]
    pub fn parse(list: &str) -> Self {
        Self::new(
            list.split(|c: char| c == ',' || c.is_whitespace())
                .map(str::trim)
                .filter(|p| !p.is_empty()),
        )
    }

    /// Adds a pattern.
    pub fn push(&mut self, pattern: impl Into<String>) {
        self.patterns.push(pattern.into());
    }

    /// The patterns.
    #[must_use]
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// True if no pattern is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// True if `name` matches a pattern.
    #[must_use]
    pub fn is_filtered(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| glob_match(p.as_bytes(), name.as_bytes()))
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}

// =========================================================================
// Configuration
// =========================================================================

/// Resolved measurement settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasurementConfig {
    /// Bytes available to all trace buffers of the process.
    pub total_memory: usize,
    /// Size of one memory page.
    pub page_size: usize,
    /// Whether events are recorded at all.
    pub enable_tracing: bool,
    /// Whether archive frames are compressed.
    pub compress: bool,
    /// Size of one event chunk.
    pub chunk_size: usize,
    /// Where the archive is written.
    pub experiment_directory: PathBuf,
    /// Timestamp source.
    pub timer: TimerKind,
    /// Regions excluded from the trace.
    pub filter: RegionFilter,
    /// Log flush and unification details at info level.
    pub verbose: bool,
}

impl Default for MeasurementConfig {
    fn default() -> Self {
        Self {
            total_memory: DEFAULT_TOTAL_MEMORY,
            page_size: DEFAULT_PAGE_SIZE,
            enable_tracing: true,
            compress: true,
            chunk_size: DEFAULT_EVENT_CHUNK_SIZE,
            experiment_directory: PathBuf::from("hpctrace-measurement"),
            timer: TimerKind::default(),
            filter: RegionFilter::default(),
            verbose: false,
        }
    }
}

impl MeasurementConfig {
    /// Defaults overridden by the environment, validated.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the total memory budget.
    #[must_use]
    pub const fn with_total_memory(mut self, bytes: usize) -> Self {
        self.total_memory = bytes;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub const fn with_page_size(mut self, bytes: usize) -> Self {
        self.page_size = bytes;
        self
    }

    /// Enables or disables tracing.
    #[must_use]
    pub const fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }

    /// Enables or disables compression.
    #[must_use]
    pub const fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Sets the event chunk size.
    #[must_use]
    pub const fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    /// Sets the archive directory.
    #[must_use]
    pub fn with_experiment_directory(mut self, path: impl Into<PathBuf>) -> Self {
        self.experiment_directory = path.into();
        self
    }

    /// Sets the timer.
    #[must_use]
    pub const fn with_timer(mut self, timer: TimerKind) -> Self {
        self.timer = timer;
        self
    }

    /// Adds a region filter pattern.
    #[must_use]
    pub fn with_filter(mut self, pattern: impl Into<String>) -> Self {
        self.filter.push(pattern);
        self
    }

    /// Enables verbose diagnostics.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Checks the settings against each other.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(invalid("page size must be positive"));
        }
        if self.total_memory < self.page_size {
            return Err(invalid(format!(
                "total memory {} is smaller than one page of {} bytes",
                self.total_memory, self.page_size
            )));
        }
        if self.chunk_size < MIN_CHUNK_SIZE {
            return Err(invalid(format!(
                "chunk size {} is below the minimum of {MIN_CHUNK_SIZE}",
                self.chunk_size
            )));
        }
        if self.chunk_size > self.total_memory {
            return Err(invalid(format!(
                "chunk size {} exceeds the total memory {}",
                self.chunk_size, self.total_memory
            )));
        }
        Ok(())
    }
}

fn invalid(detail: impl Into<String>) -> Error {
    Error::new(ErrorKind::InvalidConfig).with_message(detail)
}

// =========================================================================
// Environment
// =========================================================================

/// Apply environment variable overrides to a [`MeasurementConfig`].
///
/// Only variables that are set in the environment are applied. Returns an
/// error if a variable is set but contains an unparseable value. The
/// deprecated [`ENV_TRACE_BUFFER`] is honored with a warning unless
/// [`ENV_TOTAL_MEMORY`] is set as well.
pub fn apply_env_overrides(config: &mut MeasurementConfig) -> Result<()> {
    if let Some(val) = read_env(ENV_TRACE_BUFFER) {
        Error::new(ErrorKind::DeprecatedConfig)
            .with_message(format!("{ENV_TRACE_BUFFER} is deprecated, use {ENV_TOTAL_MEMORY}"))
            .report();
        if read_env(ENV_TOTAL_MEMORY).is_none() {
            config.total_memory = parse_size(ENV_TRACE_BUFFER, &val)?;
        }
    }
    if let Some(val) = read_env(ENV_TOTAL_MEMORY) {
        config.total_memory = parse_size(ENV_TOTAL_MEMORY, &val)?;
    }
    if let Some(val) = read_env(ENV_PAGE_SIZE) {
        config.page_size = parse_size(ENV_PAGE_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_ENABLE_TRACING) {
        config.enable_tracing = parse_bool(ENV_ENABLE_TRACING, &val)?;
    }
    if let Some(val) = read_env(ENV_TRACING_COMPRESS) {
        config.compress = parse_bool(ENV_TRACING_COMPRESS, &val)?;
    }
    if let Some(val) = read_env(ENV_TRACING_CHUNK_SIZE) {
        config.chunk_size = parse_size(ENV_TRACING_CHUNK_SIZE, &val)?;
    }
    if let Some(val) = read_env(ENV_EXPERIMENT_DIRECTORY) {
        config.experiment_directory = PathBuf::from(val);
    }
    if let Some(val) = read_env(ENV_TIMER) {
        config.timer = val.parse()?;
    }
    if let Some(val) = read_env(ENV_FILTER_REGIONS) {
        config.filter = RegionFilter::parse(&val);
    }
    if let Some(val) = read_env(ENV_VERBOSE) {
        config.verbose = parse_bool(ENV_VERBOSE, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Parses a byte size with an optional `k`/`M`/`G` suffix.
pub fn parse_size(var_name: &str, val: &str) -> Result<usize> {
    let trimmed = val.trim();
    let without_b = trimmed
        .strip_suffix(['b', 'B'])
        .unwrap_or(trimmed);
    let (digits, factor) = match without_b.char_indices().last() {
        Some((at, 'k' | 'K')) => (&without_b[..at], 1024),
        Some((at, 'm' | 'M')) => (&without_b[..at], 1024 * 1024),
        Some((at, 'g' | 'G')) => (&without_b[..at], 1024 * 1024 * 1024),
        _ => (without_b, 1),
    };
    digits
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(factor))
        .ok_or_else(|| {
            invalid(format!(
                "invalid value for {var_name}: expected size (e.g. 4096, 16M), got {val:?}"
            ))
        })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(format!(
            "invalid value for {var_name}: expected bool (true/false/1/0/yes/no), got {val:?}"
        ))),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// A size given either as a number of bytes or as a suffixed string.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum SizeValue {
    /// Plain bytes.
    Bytes(usize),
    /// `"16M"` and friends.
    Text(String),
}

#[cfg(feature = "config-file")]
impl SizeValue {
    fn resolve(&self, key: &str) -> Result<usize> {
        match self {
            Self::Bytes(n) => Ok(*n),
            Self::Text(text) => parse_size(key, text),
        }
    }
}

/// TOML-deserializable measurement configuration.
///
/// ```toml
/// [memory]
/// total_memory = "64M"
/// page_size = 8192
///
/// [tracing]
/// enabled = true
/// compress = false
/// chunk_size = "1M"
/// experiment_directory = "run-42"
/// timer = "monotonic"
/// filter_regions = ["MPI_*", "helper"]
/// verbose = false
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct MeasurementTomlConfig {
    /// Memory settings.
    #[serde(default)]
    pub memory: MemoryToml,
    /// Tracing settings.
    #[serde(default)]
    pub tracing: TracingToml,
}

/// Memory section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct MemoryToml {
    /// Total memory budget.
    pub total_memory: Option<SizeValue>,
    /// Page size.
    pub page_size: Option<SizeValue>,
}

/// Tracing section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct TracingToml {
    /// Whether events are recorded.
    pub enabled: Option<bool>,
    /// Whether frames are compressed.
    pub compress: Option<bool>,
    /// Event chunk size.
    pub chunk_size: Option<SizeValue>,
    /// Archive directory.
    pub experiment_directory: Option<PathBuf>,
    /// Timer name.
    pub timer: Option<String>,
    /// Region filter patterns.
    pub filter_regions: Option<Vec<String>>,
    /// Verbose diagnostics.
    pub verbose: Option<bool>,
}

/// Apply a parsed TOML config to a [`MeasurementConfig`].
///
/// Only fields that are present in the TOML override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut MeasurementConfig, toml: &MeasurementTomlConfig) -> Result<()> {
    if let Some(v) = &toml.memory.total_memory {
        config.total_memory = v.resolve("memory.total_memory")?;
    }
    if let Some(v) = &toml.memory.page_size {
        config.page_size = v.resolve("memory.page_size")?;
    }
    if let Some(v) = toml.tracing.enabled {
        config.enable_tracing = v;
    }
    if let Some(v) = toml.tracing.compress {
        config.compress = v;
    }
    if let Some(v) = &toml.tracing.chunk_size {
        config.chunk_size = v.resolve("tracing.chunk_size")?;
    }
    if let Some(v) = &toml.tracing.experiment_directory {
        config.experiment_directory.clone_from(v);
    }
    if let Some(v) = &toml.tracing.timer {
        config.timer = v.parse()?;
    }
    if let Some(v) = &toml.tracing.filter_regions {
        config.filter = RegionFilter::new(v.iter().cloned());
    }
    if let Some(v) = toml.tracing.verbose {
        config.verbose = v;
    }
    Ok(())
}

/// Parse a TOML string into a [`MeasurementTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<MeasurementTomlConfig> {
    toml::from_str(toml_str).map_err(|e| invalid(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into a [`MeasurementTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<MeasurementTomlConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        invalid(format!("failed to read config file {}: {e}", path.display()))
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================
