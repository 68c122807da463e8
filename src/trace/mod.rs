//! Trace output: event records, buffers, the flush protocol and the archive.
//!
//! ```text
//!   Measurement::enter ──▶ EventRecord ──▶ ChunkedBuffer (per location)
//!                                              │  pages from PagedMemory
//!                                              │  policy from MeasurementFlush
//!                                              ▼
//!                                          EventWriter ──▶ Archive ──▶ FileSubstrate
//! ```
//!
//! # Submodules
//!
//! - [`event`]: event records and attribute values
//! - [`flush`]: flush and memory callbacks, tracing latches
//! - [`buffer`]: the chunked per-location buffer
//! - [`file`]: file header, frame and record framing
//! - [`archive`]: substrates, archive writer, anchor
//! - [`reader`]: reading an archive back

pub mod archive;
pub mod buffer;
pub mod event;
pub mod file;
pub mod flush;
pub mod reader;

pub use archive::{
    Anchor, AnchorLocation, Archive, ArchiveConfig, ChunkSink, EventWriter, FileSubstrate,
    GlobalDefinitions, LocalDefinitions, MemorySubstrate, PosixSubstrate,
};
pub use buffer::{BufferState, ChunkedBuffer, WriteOutcome};
pub use event::{Attribute, AttributeValue, EventRecord, MetricValue, TraceEvent};
pub use file::{ArchiveError, CompressionMode};
pub use flush::{
    FileType, FlushCallbacks, FlushType, MeasurementFlush, MemoryCallbacks, PagedMemory,
    TraceStatus,
};
pub use reader::ArchiveReader;
