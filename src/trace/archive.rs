//! The trace archive: one directory-like namespace per experiment.
//!
//! ```text
//! traces.json          anchor (rank 0): locations, event counts, epoch
//! global.def           unified definitions (rank 0)
//! loc_<id>.evt         event stream of one location
//! loc_<id>.def         mapping tables of one location
//! ```
//!
//! Files are written through a [`FileSubstrate`], so the same archive code
//! writes plain files ([`PosixSubstrate`]) or keeps everything in memory
//! ([`MemorySubstrate`]) for tests and for collecting output in-process.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::file::{encode_frame, encode_record, ArchiveError, CompressionMode, FileHeader};
use super::flush::FileType;
use crate::definitions::{DefinitionMappings, DefinitionSnapshot};
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{debug, info};
use crate::unify::Epoch;

/// Default size of an event chunk.
pub const DEFAULT_EVENT_CHUNK_SIZE: usize = 1024 * 1024;

/// Definition chunks are this many times larger than event chunks.
pub const DEFINITION_CHUNK_FACTOR: usize = 4;

/// Name of the anchor file.
pub const ANCHOR_FILE: &str = "traces.json";

/// Name of the global definition file.
pub const GLOBAL_DEFS_FILE: &str = "global.def";

/// File name of a location's event stream.
#[must_use]
pub fn event_file(location: u64) -> String {
    format!("loc_{location}.evt")
}

/// File name of a location's local definitions.
#[must_use]
pub fn local_defs_file(location: u64) -> String {
    format!("loc_{location}.def")
}

// =============================================================================
// Substrates
// =============================================================================

/// Storage behind an archive.
pub trait FileSubstrate: Send + Sync + fmt::Debug {
    /// Creates `name`, truncating it if it exists.
    fn create(&self, name: &str) -> io::Result<()>;

    /// Appends to `name`, which must have been created.
    fn append(&self, name: &str, bytes: &[u8]) -> io::Result<()>;

    /// Reads all of `name`.
    fn read(&self, name: &str) -> io::Result<Vec<u8>>;

    /// True if `name` exists.
    fn exists(&self, name: &str) -> bool;
}

/// Plain files below a root directory.
#[derive(Debug, Clone)]
pub struct PosixSubstrate {
    root: PathBuf,
}

impl PosixSubstrate {
    /// Creates the root directory if needed.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// The archive directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileSubstrate for PosixSubstrate {
    fn create(&self, name: &str) -> io::Result<()> {
        fs::File::create(self.root.join(name)).map(drop)
    }

    fn append(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(self.root.join(name))?;
        file.write_all(bytes)
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.root.join(name))
    }

    fn exists(&self, name: &str) -> bool {
        self.root.join(name).is_file()
    }
}

/// Files kept in memory. Clones share their contents.
#[derive(Debug, Clone, Default)]
pub struct MemorySubstrate {
    files: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemorySubstrate {
    /// An empty substrate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all files, sorted.
    #[must_use]
    pub fn file_names(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    /// Size of `name` in bytes.
    #[must_use]
    pub fn file_len(&self, name: &str) -> Option<usize> {
        self.files.lock().get(name).map(Vec::len)
    }
}

impl FileSubstrate for MemorySubstrate {
    fn create(&self, name: &str) -> io::Result<()> {
        self.files.lock().insert(name.to_string(), Vec::new());
        Ok(())
    }

    fn append(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let mut files = self.files.lock();
        let file = files
            .get_mut(name)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))?;
        file.extend_from_slice(bytes);
        Ok(())
    }

    fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        self.files
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, name.to_string()))
    }

    fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }
}

// =============================================================================
// Archive content
// =============================================================================

/// Archive-wide settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Frame compression.
    pub compression: CompressionMode,
    /// Size of one event chunk.
    pub event_chunk_size: usize,
    /// Size of one definition chunk.
    pub definition_chunk_size: usize,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self::with_chunk_size(DEFAULT_EVENT_CHUNK_SIZE, CompressionMode::None)
    }
}

impl ArchiveConfig {
    /// Settings for event chunks of `event_chunk_size` bytes.
    #[must_use]
    pub const fn with_chunk_size(event_chunk_size: usize, compression: CompressionMode) -> Self {
        Self {
            compression,
            event_chunk_size,
            definition_chunk_size: event_chunk_size * DEFINITION_CHUNK_FACTOR,
        }
    }
}

/// Content of a local definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalDefinitions {
    /// Global id of the location.
    pub location: u64,
    /// Rank that wrote the file.
    pub rank: u32,
    /// Local→unified tables of the writing process.
    pub mappings: DefinitionMappings,
}

/// Content of the global definition file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalDefinitions {
    /// All unified definitions.
    pub definitions: DefinitionSnapshot,
    /// Time span of the measurement across ranks.
    pub epoch: Epoch,
    /// Timer ticks per second.
    pub timer_resolution: u64,
}

/// One location as listed in the anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorLocation {
    /// Global id.
    pub global_id: u64,
    /// Owning rank.
    pub rank: u32,
    /// Location name.
    pub name: String,
    /// Number of records in its event file.
    pub events: u64,
}

/// The archive's table of contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    /// Archive format version.
    pub version: u16,
    /// Producer and version.
    pub creator: String,
    /// Number of ranks.
    pub rank_count: u32,
    /// Settings the archive was written with.
    pub config: ArchiveConfig,
    /// Time span of the measurement.
    pub epoch: Epoch,
    /// Every location of every rank.
    pub locations: Vec<AnchorLocation>,
}

// =============================================================================
// Archive
// =============================================================================

#[derive(Debug, Default)]
struct StreamStats {
    records: u64,
    chunks: u64,
}

/// Writer side of an archive.
#[derive(Debug)]
pub struct Archive {
    substrate: Arc<dyn FileSubstrate>,
    config: ArchiveConfig,
    streams: Mutex<BTreeMap<u64, StreamStats>>,
    closed: AtomicBool,
}

impl Archive {
    /// Opens an archive on `substrate`.
    #[must_use]
    pub fn open(substrate: Arc<dyn FileSubstrate>, config: ArchiveConfig) -> Arc<Self> {
        debug!(
            compression = ?config.compression,
            chunk_size = config.event_chunk_size,
            "archive opened"
        );
        Arc::new(Self {
            substrate,
            config,
            streams: Mutex::new(BTreeMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Archive settings.
    #[must_use]
    pub const fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// The storage behind this archive.
    #[must_use]
    pub fn substrate(&self) -> &Arc<dyn FileSubstrate> {
        &self.substrate
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::new(ErrorKind::BufferClosed).with_message("archive is closed"));
        }
        Ok(())
    }

    fn create_file(&self, name: &str, file_type: FileType, location: u64) -> Result<()> {
        let header = FileHeader::new(file_type, self.config.compression, location);
        self.substrate.create(name).map_err(ArchiveError::from)?;
        self.substrate
            .append(name, &header.encode())
            .map_err(ArchiveError::from)?;
        Ok(())
    }

    fn append_frames(&self, name: &str, raw: &[u8], chunk_size: usize) -> Result<()> {
        for piece in raw.chunks(chunk_size.max(1)) {
            let frame = encode_frame(piece, self.config.compression);
            self.substrate
                .append(name, &frame)
                .map_err(ArchiveError::from)?;
        }
        Ok(())
    }

    /// Creates the event file of `location` and returns its writer.
    pub fn event_writer(self: &Arc<Self>, location: u64) -> Result<EventWriter> {
        self.check_open()?;
        self.create_file(&event_file(location), FileType::Events, location)?;
        self.streams.lock().insert(location, StreamStats::default());
        Ok(EventWriter {
            archive: Arc::clone(self),
            location,
        })
    }

    /// Appends one chunk holding `records` records to an event file.
    pub fn write_event_chunk(&self, location: u64, raw: &[u8], records: u64) -> Result<()> {
        self.check_open()?;
        let frame = encode_frame(raw, self.config.compression);
        self.substrate
            .append(&event_file(location), &frame)
            .map_err(ArchiveError::from)?;
        let mut streams = self.streams.lock();
        let stats = streams.entry(location).or_default();
        stats.records += records;
        stats.chunks += 1;
        Ok(())
    }

    /// Records written to the event file of `location`.
    #[must_use]
    pub fn event_count(&self, location: u64) -> u64 {
        self.streams
            .lock()
            .get(&location)
            .map_or(0, |stats| stats.records)
    }

    /// Chunks written to the event file of `location`.
    #[must_use]
    pub fn chunk_count(&self, location: u64) -> u64 {
        self.streams
            .lock()
            .get(&location)
            .map_or(0, |stats| stats.chunks)
    }

    /// Writes the local definition file of one location.
    pub fn write_local_definitions(&self, definitions: &LocalDefinitions) -> Result<()> {
        self.check_open()?;
        let name = local_defs_file(definitions.location);
        self.create_file(&name, FileType::LocalDefs, definitions.location)?;
        let mut raw = Vec::new();
        encode_record(definitions, &mut raw)?;
        self.append_frames(&name, &raw, self.config.definition_chunk_size)
    }

    /// Writes the global definition file.
    pub fn write_global_definitions(&self, definitions: &GlobalDefinitions) -> Result<()> {
        self.check_open()?;
        self.create_file(GLOBAL_DEFS_FILE, FileType::GlobalDefs, 0)?;
        let mut raw = Vec::new();
        encode_record(definitions, &mut raw)?;
        self.append_frames(GLOBAL_DEFS_FILE, &raw, self.config.definition_chunk_size)
    }

    /// Writes the anchor and closes the archive.
    pub fn close(&self, anchor: &Anchor) -> Result<()> {
        self.check_open()?;
        let json = serde_json::to_vec_pretty(anchor).map_err(ArchiveError::from)?;
        self.substrate
            .create(ANCHOR_FILE)
            .and_then(|()| self.substrate.append(ANCHOR_FILE, &json))
            .map_err(ArchiveError::from)?;
        self.closed.store(true, Ordering::Release);
        info!(
            locations = anchor.locations.len(),
            ranks = anchor.rank_count,
            "archive closed"
        );
        Ok(())
    }

    /// Marks the archive closed without writing an anchor (non-root ranks).
    pub fn release(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// True once closed or released.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Destination of a buffer's flushed chunks.
pub trait ChunkSink: Send + fmt::Debug {
    /// Writes one chunk holding `records` records.
    fn write_chunk(&mut self, raw: &[u8], records: u64) -> Result<()>;
}

/// The event file of one location.
#[derive(Debug)]
pub struct EventWriter {
    archive: Arc<Archive>,
    location: u64,
}

impl EventWriter {
    /// Global id of the location.
    #[must_use]
    pub const fn location(&self) -> u64 {
        self.location
    }
}

impl ChunkSink for EventWriter {
    fn write_chunk(&mut self, raw: &[u8], records: u64) -> Result<()> {
        self.archive.write_event_chunk(self.location, raw, records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_substrate_shares_contents() {
        let substrate = MemorySubstrate::new();
        let clone = substrate.clone();
        substrate.create("a").unwrap();
        substrate.append("a", b"xy").unwrap();
        assert_eq!(clone.read("a").unwrap(), b"xy");
        assert!(clone.append("missing", b"z").is_err());
        assert_eq!(clone.file_names(), vec!["a".to_string()]);
    }

    #[test]
    fn posix_substrate_appends() {
        let dir = tempfile::tempdir().unwrap();
        let substrate = PosixSubstrate::new(dir.path().join("archive")).unwrap();
        substrate.create("f").unwrap();
        substrate.append("f", b"one").unwrap();
        substrate.append("f", b"two").unwrap();
        assert_eq!(substrate.read("f").unwrap(), b"onetwo");
        assert!(substrate.exists("f"));
        assert!(!substrate.exists("g"));
    }

    #[test]
    fn event_counts_are_tracked() {
        let substrate = MemorySubstrate::new();
        let archive = Archive::open(Arc::new(substrate.clone()), ArchiveConfig::default());
        let mut writer = archive.event_writer(7).unwrap();
        writer.write_chunk(b"", 0).unwrap();
        writer.write_chunk(b"", 3).unwrap();
        assert_eq!(archive.event_count(7), 3);
        assert_eq!(archive.chunk_count(7), 2);
        assert!(substrate.exists(&event_file(7)));
    }

    #[test]
    fn closed_archive_rejects_writes() {
        let archive = Archive::open(Arc::new(MemorySubstrate::new()), ArchiveConfig::default());
        archive.release();
        let err = archive.event_writer(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BufferClosed);
    }

    #[test]
    fn definition_chunks_are_larger() {
        let config = ArchiveConfig::default();
        assert_eq!(config.event_chunk_size, 1024 * 1024);
        assert_eq!(config.definition_chunk_size, 4 * 1024 * 1024);
    }
}
