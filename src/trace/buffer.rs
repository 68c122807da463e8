//! Chunked event buffers.
//!
//! Every location owns one [`ChunkedBuffer`]. Records are appended to
//! fixed-size chunks obtained through the [`MemoryCallbacks`]; when no chunk
//! can be obtained the buffer asks its [`FlushCallbacks`] and writes its
//! chunks to its [`ChunkSink`].
//!
//! ```text
//!           write             no chunk             flush(final)
//!   Open ─────────▶ Accumulating ───────▶ Flushing ─────────────▶ Closed
//!                        ▲                   │
//!                        └───────────────────┘
//!                         chunks released
//! ```
//!
//! Running out of memory before the first chunk is fatal, since no event
//! could ever be recorded. Running out later triggers an intermediate flush:
//! the chunks are written, a [`TraceEvent::BufferFlush`] record marks the gap
//! and the buffer stops recording.

use std::sync::Arc;

use super::archive::ChunkSink;
use super::event::{EventRecord, TraceEvent};
use super::file::encode_record;
use super::flush::{FileType, FlushCallbacks, FlushType, MemoryCallbacks};
use crate::error::{Error, ErrorKind, Result};
use crate::memory::{ChunkRef, PageManager};
use crate::tracing_compat::{debug, trace};

/// Lifecycle state of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// No chunk allocated yet.
    Open,
    /// Holding records.
    Accumulating,
    /// Writing chunks out.
    Flushing,
    /// Final flush done.
    Closed,
}

/// What happened to a written record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record is buffered.
    Recorded,
    /// Recording is disabled; the record was discarded.
    Dropped,
    /// The record triggered an intermediate flush. It is stored after
    /// the flush marker; later records are dropped.
    Flushed,
}

#[derive(Debug, Clone, Copy)]
struct Chunk {
    chunk: ChunkRef,
    used: usize,
    records: u64,
}

/// Buffer of one location's event stream.
pub struct ChunkedBuffer {
    file_type: FileType,
    location: u64,
    chunk_size: usize,
    state: BufferState,
    manager: Option<PageManager>,
    chunks: Vec<Chunk>,
    scratch: Vec<u8>,
    last_timestamp: u64,
    disabled: bool,
    flushes: u32,
    flush: Arc<dyn FlushCallbacks>,
    memory: Arc<dyn MemoryCallbacks>,
    sink: Box<dyn ChunkSink>,
}

impl std::fmt::Debug for ChunkedBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedBuffer")
            .field("location", &self.location)
            .field("state", &self.state)
            .field("chunks", &self.chunks.len())
            .field("disabled", &self.disabled)
            .finish_non_exhaustive()
    }
}

fn lost_after_flush(location: u64, what: &str) -> Error {
    Error::internal(format!(
        "no chunk for the {what} after the intermediate flush of location {location}"
    ))
}

impl ChunkedBuffer {
    /// An event buffer for `location` writing chunks of `chunk_size` bytes.
    #[must_use]
    pub fn new(
        location: u64,
        chunk_size: usize,
        flush: Arc<dyn FlushCallbacks>,
        memory: Arc<dyn MemoryCallbacks>,
        sink: Box<dyn ChunkSink>,
    ) -> Self {
        Self {
            file_type: FileType::Events,
            location,
            chunk_size,
            state: BufferState::Open,
            manager: None,
            chunks: Vec::new(),
            scratch: Vec::with_capacity(128),
            last_timestamp: 0,
            disabled: false,
            flushes: 0,
            flush,
            memory,
            sink,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> BufferState {
        self.state
    }

    /// Global id of the location.
    #[must_use]
    pub const fn location(&self) -> u64 {
        self.location
    }

    /// True once an intermediate flush disabled this buffer.
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Number of flushes so far, the final one included.
    #[must_use]
    pub const fn flushes(&self) -> u32 {
        self.flushes
    }

    /// Chunks currently held.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Records currently held.
    #[must_use]
    pub fn buffered_records(&self) -> u64 {
        self.chunks.iter().map(|chunk| chunk.records).sum()
    }

    /// Appends a record.
    pub fn write(&mut self, record: &EventRecord) -> Result<WriteOutcome> {
        match self.state {
            BufferState::Closed => {
                return Err(Error::new(ErrorKind::BufferClosed)
                    .with_message(format!("event buffer of location {} is closed", self.location)));
            }
            BufferState::Flushing => {
                return Err(Error::internal("write while the buffer is flushing"));
            }
            BufferState::Open | BufferState::Accumulating => {}
        }
        if self.disabled {
            return Ok(WriteOutcome::Dropped);
        }

        self.scratch.clear();
        encode_record(record, &mut self.scratch)?;
        let framed = self.scratch.len();
        if framed > self.chunk_size {
            return Err(Error::new(ErrorKind::RecordTooLarge).with_message(format!(
                "{} record of {framed} bytes exceeds the chunk size {}",
                record.event.name(),
                self.chunk_size
            )));
        }

        let mut outcome = WriteOutcome::Recorded;
        if !self.has_room(framed) && !self.next_chunk() {
            if self.chunks.is_empty() && self.flushes == 0 {
                return Err(Error::out_of_memory(self.memory.budget()));
            }
            self.intermediate_flush(framed)?;
            outcome = WriteOutcome::Flushed;
        }
        self.append_scratch()?;
        self.last_timestamp = record.timestamp;
        Ok(outcome)
    }

    fn has_room(&self, framed: usize) -> bool {
        self.chunks
            .last()
            .is_some_and(|chunk| self.chunk_size - chunk.used >= framed)
    }

    fn next_chunk(&mut self) -> bool {
        let Some(chunk) =
            self.memory
                .allocate(self.file_type, self.location, &mut self.manager, self.chunk_size)
        else {
            return false;
        };
        trace!(location = self.location, chunk_size = self.chunk_size, "chunk allocated");
        self.chunks.push(Chunk {
            chunk,
            used: 0,
            records: 0,
        });
        self.state = BufferState::Accumulating;
        true
    }

    fn append_scratch(&mut self) -> Result<()> {
        let scratch = std::mem::take(&mut self.scratch);
        let appended = self.append(&scratch);
        self.scratch = scratch;
        appended
    }

    fn append(&mut self, framed: &[u8]) -> Result<()> {
        let (Some(manager), Some(last)) = (self.manager.as_mut(), self.chunks.last_mut()) else {
            return Err(Error::internal(format!(
                "event buffer of location {} has no chunk to append to",
                self.location
            )));
        };
        let len = framed.len();
        manager.chunk_mut(last.chunk)[last.used..last.used + len].copy_from_slice(framed);
        last.used += len;
        last.records += 1;
        Ok(())
    }

    fn write_out(&mut self, is_final: bool) -> Result<()> {
        self.state = BufferState::Flushing;
        let decision = self.flush.pre_flush(self.file_type, self.location, is_final);
        if decision == FlushType::Flush {
            if let Some(manager) = self.manager.as_ref() {
                for chunk in &self.chunks {
                    let bytes = &manager.chunk(chunk.chunk)[..chunk.used];
                    self.sink.write_chunk(bytes, chunk.records)?;
                }
            }
        }
        let written = self.chunks.len();
        self.chunks.clear();
        self.memory
            .free_all(self.file_type, self.location, &mut self.manager, is_final);
        self.flushes += 1;
        debug!(location = self.location, chunks = written, is_final, ?decision, "buffer flushed");
        Ok(())
    }

    /// Writes the chunks out, then stores a [`TraceEvent::BufferFlush`]
    /// marker and leaves room for the `pending` bytes of the record that
    /// ran out of memory. Later records are dropped.
    fn intermediate_flush(&mut self, pending: usize) -> Result<()> {
        let start = self.last_timestamp;
        self.write_out(false)?;
        let stop = self.flush.post_flush(self.file_type, self.location);
        self.state = BufferState::Open;
        self.disabled = true;

        let mut marker = Vec::new();
        encode_record(
            &EventRecord::new(start, TraceEvent::BufferFlush { start, stop }),
            &mut marker,
        )?;
        if !self.next_chunk() {
            return Err(lost_after_flush(self.location, "buffer-flush marker"));
        }
        self.append(&marker)?;
        if !self.has_room(pending) && !self.next_chunk() {
            return Err(lost_after_flush(self.location, "record"));
        }
        Ok(())
    }

    /// Writes every chunk and releases the buffer's memory for good.
    pub fn flush_final(&mut self) -> Result<()> {
        if self.state == BufferState::Closed {
            return Ok(());
        }
        self.write_out(true)?;
        self.flush.post_flush(self.file_type, self.location);
        self.state = BufferState::Closed;
        Ok(())
    }
}
