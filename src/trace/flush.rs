//! The flush protocol between buffers and the measurement.
//!
//! A buffer does not decide on its own when and how it flushes. It asks its
//! [`FlushCallbacks`] before a flush (`pre_flush`) and reports back after
//! it (`post_flush`), and it obtains memory through [`MemoryCallbacks`].
//! The measurement's implementations, [`MeasurementFlush`] and
//! [`PagedMemory`], encode the runtime policy:
//!
//! - An intermediate flush of an event buffer means the page budget ran out
//!   while recording. It is logged as a warning and recording is disabled
//!   for the rest of the run; the flush itself still happens.
//! - A final flush is unconditional.
//! - The first completed flush sets a one-way latch: from then on the trace
//!   output mode is fixed.
//! - Page managers are created on the first allocation and destroyed only
//!   by a final release.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::memory::{ChunkRef, PageAllocator, PageManager};
use crate::timer::Clock;
use crate::tracing_compat::{debug, warn};

/// What an archive file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    /// Per-location event stream.
    Events,
    /// Per-location definitions and mapping tables.
    LocalDefs,
    /// Unified definitions.
    GlobalDefs,
}

impl FileType {
    pub(crate) const fn to_byte(self) -> u8 {
        match self {
            Self::Events => 0,
            Self::LocalDefs => 1,
            Self::GlobalDefs => 2,
        }
    }

    pub(crate) const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Events),
            1 => Some(Self::LocalDefs),
            2 => Some(Self::GlobalDefs),
            _ => None,
        }
    }
}

/// Whether a requested flush writes its chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushType {
    /// Write the chunks out.
    Flush,
    /// Discard the chunks.
    NoFlush,
}

/// Decides on and observes buffer flushes.
pub trait FlushCallbacks: Send + Sync {
    /// Called before a buffer flushes.
    fn pre_flush(&self, file_type: FileType, location: u64, is_final: bool) -> FlushType;

    /// Called after a buffer flushed; returns the flush completion time.
    fn post_flush(&self, file_type: FileType, location: u64) -> u64;
}

/// Supplies buffer memory.
pub trait MemoryCallbacks: Send + Sync {
    /// Allocates a chunk of `size` bytes, creating `manager` if needed.
    fn allocate(
        &self,
        file_type: FileType,
        location: u64,
        manager: &mut Option<PageManager>,
        size: usize,
    ) -> Option<ChunkRef>;

    /// Total bytes this memory can hand out.
    fn budget(&self) -> usize;

    /// Returns every chunk of `manager` to the pool. A final release
    /// destroys the manager as well.
    fn free_all(
        &self,
        file_type: FileType,
        location: u64,
        manager: &mut Option<PageManager>,
        is_final: bool,
    );
}

/// Process-wide tracing latches.
#[derive(Debug, Default)]
pub struct TraceStatus {
    has_flushed: AtomicBool,
    recording_disabled: AtomicBool,
}

impl TraceStatus {
    /// True once any buffer has completed a flush.
    #[must_use]
    pub fn has_flushed(&self) -> bool {
        self.has_flushed.load(Ordering::Acquire)
    }

    /// True once memory pressure disabled recording.
    #[must_use]
    pub fn recording_disabled(&self) -> bool {
        self.recording_disabled.load(Ordering::Acquire)
    }

    /// Sets the flushed latch. Returns true for the first call.
    pub fn mark_flushed(&self) -> bool {
        !self.has_flushed.swap(true, Ordering::AcqRel)
    }

    /// Disables recording. Returns true for the first call.
    pub fn disable_recording(&self) -> bool {
        !self.recording_disabled.swap(true, Ordering::AcqRel)
    }
}

/// The measurement's flush policy.
#[derive(Debug)]
pub struct MeasurementFlush {
    clock: Arc<Clock>,
    rank: u32,
    status: Arc<TraceStatus>,
}

impl MeasurementFlush {
    /// Flush policy for `rank`, timestamping with `clock`.
    #[must_use]
    pub const fn new(clock: Arc<Clock>, rank: u32, status: Arc<TraceStatus>) -> Self {
        Self {
            clock,
            rank,
            status,
        }
    }

    /// The latches this policy sets.
    #[must_use]
    pub fn status(&self) -> &Arc<TraceStatus> {
        &self.status
    }
}

impl FlushCallbacks for MeasurementFlush {
    fn pre_flush(&self, file_type: FileType, location: u64, is_final: bool) -> FlushType {
        if file_type == FileType::Events && !is_final {
            warn!(
                rank = self.rank,
                location,
                "Trace buffer flush on rank {}. Increase total memory to avoid intermediate flushes; recording is disabled",
                self.rank
            );
            self.status.disable_recording();
        }
        FlushType::Flush
    }

    fn post_flush(&self, file_type: FileType, location: u64) -> u64 {
        if self.status.mark_flushed() {
            debug!(rank = self.rank, ?file_type, location, "trace output mode fixed");
        }
        self.clock.now()
    }
}

/// Buffer memory drawn from the process page allocator.
#[derive(Debug, Clone)]
pub struct PagedMemory {
    allocator: Arc<PageAllocator>,
}

impl PagedMemory {
    /// Memory callbacks over `allocator`.
    #[must_use]
    pub const fn new(allocator: Arc<PageAllocator>) -> Self {
        Self { allocator }
    }

    /// The underlying allocator.
    #[must_use]
    pub fn allocator(&self) -> &Arc<PageAllocator> {
        &self.allocator
    }
}

impl MemoryCallbacks for PagedMemory {
    fn allocate(
        &self,
        _file_type: FileType,
        _location: u64,
        manager: &mut Option<PageManager>,
        size: usize,
    ) -> Option<ChunkRef> {
        manager
            .get_or_insert_with(|| self.allocator.new_page_manager())
            .alloc(size)
    }

    fn budget(&self) -> usize {
        self.allocator.total_memory()
    }

    fn free_all(
        &self,
        _file_type: FileType,
        _location: u64,
        manager: &mut Option<PageManager>,
        is_final: bool,
    ) {
        if is_final {
            *manager = None;
        } else if let Some(manager) = manager.as_mut() {
            manager.free_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerKind;

    fn policy() -> MeasurementFlush {
        MeasurementFlush::new(
            Arc::new(Clock::new(TimerKind::Logical)),
            0,
            Arc::new(TraceStatus::default()),
        )
    }

    #[test]
    fn intermediate_event_flush_disables_recording() {
        let policy = policy();
        assert_eq!(
            policy.pre_flush(FileType::Events, 1, false),
            FlushType::Flush
        );
        assert!(policy.status().recording_disabled());
    }

    #[test]
    fn final_flush_is_unconditional() {
        let policy = policy();
        assert_eq!(policy.pre_flush(FileType::Events, 1, true), FlushType::Flush);
        assert_eq!(
            policy.pre_flush(FileType::LocalDefs, 1, false),
            FlushType::Flush
        );
        assert!(!policy.status().recording_disabled());
    }

    #[test]
    fn post_flush_latches_and_timestamps() {
        let policy = policy();
        assert!(!policy.status().has_flushed());
        let first = policy.post_flush(FileType::Events, 1);
        let second = policy.post_flush(FileType::Events, 2);
        assert!(policy.status().has_flushed());
        assert!(second > first);
        assert!(!policy.status().mark_flushed());
    }

    #[test]
    fn manager_is_lazy_and_dropped_only_on_final_release() {
        let allocator = PageAllocator::new(16 * 1024, 1024).unwrap();
        let memory = PagedMemory::new(Arc::clone(&allocator));
        let mut manager = None;

        assert!(memory.allocate(FileType::Events, 0, &mut manager, 100).is_some());
        assert!(manager.is_some());
        memory.free_all(FileType::Events, 0, &mut manager, false);
        assert!(manager.is_some());
        assert_eq!(allocator.stats().pages_in_use, 0);

        memory.allocate(FileType::Events, 0, &mut manager, 100);
        memory.free_all(FileType::Events, 0, &mut manager, true);
        assert!(manager.is_none());
        assert_eq!(allocator.stats().pages_in_use, 0);
    }
}
