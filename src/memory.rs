//! Page-based memory for trace buffers.
//!
//! A process owns one [`PageAllocator`] sized by the total-memory budget.
//! Every buffer draws fixed-size pages from it through its own
//! [`PageManager`], which bump-allocates records into the pages it holds.
//! Releasing a manager's pages returns them to the allocator's free pool;
//! pooled pages are handed out again before new ones are created, so a
//! buffer that is flushed and refilled does not grow the process footprint.
//!
//! ```text
//!   PageAllocator (budget: total / page_size pages)
//!     ├── free pool: pages count → blocks
//!     └── PageManager (one per buffer)
//!           └── blocks: [ page | page | ... ]  ← bump offset in the last
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{debug, trace};

/// Snapshot of allocator usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// Pages currently held by page managers.
    pub pages_in_use: usize,
    /// Pages ever created (allocated from the system).
    pub pages_created: usize,
    /// Pages sitting in the free pool.
    pub free_pages: usize,
    /// Page budget.
    pub max_pages: usize,
}

#[derive(Debug, Default)]
struct AllocatorState {
    free: BTreeMap<usize, Vec<Box<[u8]>>>,
    pages_in_use: usize,
    pages_created: usize,
}

impl AllocatorState {
    fn free_pages(&self) -> usize {
        self.free
            .iter()
            .map(|(pages, blocks)| pages * blocks.len())
            .sum()
    }

    fn take_pooled(&mut self, pages: usize) -> Option<Box<[u8]>> {
        let blocks = self.free.get_mut(&pages)?;
        let block = blocks.pop();
        if blocks.is_empty() {
            self.free.remove(&pages);
        }
        block
    }

    /// Drops pooled blocks until `needed` more pages fit in the budget.
    fn evict(&mut self, needed: usize, max_pages: usize) {
        while self.pages_in_use + self.free_pages() + needed > max_pages {
            let Some(mut entry) = self.free.last_entry() else {
                break;
            };
            let blocks = entry.get_mut();
            blocks.pop();
            if blocks.is_empty() {
                entry.remove();
            }
        }
    }
}

/// Process-wide page budget.
#[derive(Debug)]
pub struct PageAllocator {
    page_size: usize,
    max_pages: usize,
    total_memory: usize,
    state: Mutex<AllocatorState>,
}

impl PageAllocator {
    /// Creates an allocator for `total_memory` bytes in pages of `page_size`.
    ///
    /// Fails if the budget cannot hold a single page.
    pub fn new(total_memory: usize, page_size: usize) -> Result<Arc<Self>> {
        if page_size == 0 || total_memory < page_size {
            return Err(Error::new(ErrorKind::InvalidConfig).with_message(format!(
                "total memory {total_memory} cannot hold a page of {page_size} bytes"
            )));
        }
        let max_pages = total_memory / page_size;
        debug!(total_memory, page_size, max_pages, "page allocator created");
        Ok(Arc::new(Self {
            page_size,
            max_pages,
            total_memory,
            state: Mutex::new(AllocatorState::default()),
        }))
    }

    /// Size of one page in bytes.
    #[must_use]
    pub const fn page_size(&self) -> usize {
        self.page_size
    }

    /// Maximum number of pages.
    #[must_use]
    pub const fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// The configured budget in bytes.
    #[must_use]
    pub const fn total_memory(&self) -> usize {
        self.total_memory
    }

    /// Pages needed to hold `bytes`.
    #[must_use]
    pub const fn pages_for(&self, bytes: usize) -> usize {
        bytes.div_ceil(self.page_size)
    }

    /// Takes a block of `pages` contiguous pages, reusing a pooled block of
    /// the same size when one exists. Returns `None` when the budget is
    /// exhausted.
    fn acquire(&self, pages: usize) -> Option<Box<[u8]>> {
        let mut state = self.state.lock();
        if let Some(block) = state.take_pooled(pages) {
            state.pages_in_use += pages;
            trace!(pages, "page block reused");
            return Some(block);
        }
        if state.pages_in_use + pages > self.max_pages {
            return None;
        }
        state.evict(pages, self.max_pages);
        state.pages_in_use += pages;
        state.pages_created += pages;
        drop(state);
        trace!(pages, "page block created");
        Some(vec![0_u8; pages * self.page_size].into_boxed_slice())
    }

    fn release(&self, block: Box<[u8]>) {
        let pages = block.len() / self.page_size;
        let mut state = self.state.lock();
        state.pages_in_use = state.pages_in_use.saturating_sub(pages);
        state.free.entry(pages).or_default().push(block);
    }

    /// Current usage.
    #[must_use]
    pub fn stats(&self) -> AllocatorStats {
        let state = self.state.lock();
        AllocatorStats {
            pages_in_use: state.pages_in_use,
            pages_created: state.pages_created,
            free_pages: state.free_pages(),
            max_pages: self.max_pages,
        }
    }

    /// Returns pooled pages to the system.
    pub fn trim(&self) {
        self.state.lock().free.clear();
    }

    /// Creates an empty page manager drawing from this allocator.
    #[must_use]
    pub fn new_page_manager(self: &Arc<Self>) -> PageManager {
        PageManager {
            allocator: Arc::clone(self),
            blocks: Vec::new(),
        }
    }
}

/// A byte range inside a [`PageManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRef {
    block: usize,
    offset: usize,
    len: usize,
}

impl ChunkRef {
    /// Length in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length chunk.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug)]
struct Block {
    data: Box<[u8]>,
    used: usize,
}

/// Pages held by one buffer.
#[derive(Debug)]
pub struct PageManager {
    allocator: Arc<PageAllocator>,
    blocks: Vec<Block>,
}

impl PageManager {
    /// Reserves `size` bytes, taking new pages from the allocator when the
    /// last block is full. `None` means the budget is exhausted.
    pub fn alloc(&mut self, size: usize) -> Option<ChunkRef> {
        if let Some((index, block)) = self.blocks.iter_mut().enumerate().last() {
            if block.data.len() - block.used >= size {
                let offset = block.used;
                block.used += size;
                return Some(ChunkRef {
                    block: index,
                    offset,
                    len: size,
                });
            }
        }
        let pages = self.allocator.pages_for(size.max(1));
        let data = self.allocator.acquire(pages)?;
        self.blocks.push(Block { data, used: size });
        Some(ChunkRef {
            block: self.blocks.len() - 1,
            offset: 0,
            len: size,
        })
    }

    /// The bytes of a chunk.
    #[must_use]
    pub fn chunk(&self, chunk: ChunkRef) -> &[u8] {
        &self.blocks[chunk.block].data[chunk.offset..chunk.offset + chunk.len]
    }

    /// The bytes of a chunk, mutably.
    pub fn chunk_mut(&mut self, chunk: ChunkRef) -> &mut [u8] {
        &mut self.blocks[chunk.block].data[chunk.offset..chunk.offset + chunk.len]
    }

    /// Number of pages held.
    #[must_use]
    pub fn pages(&self) -> usize {
        self.blocks
            .iter()
            .map(|block| block.data.len() / self.allocator.page_size())
            .sum()
    }

    /// Bytes handed out since the last [`free_all`](Self::free_all).
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.blocks.iter().map(|block| block.used).sum()
    }

    /// Returns every page to the allocator's free pool. Outstanding
    /// [`ChunkRef`]s become invalid.
    pub fn free_all(&mut self) {
        for block in self.blocks.drain(..) {
            self.allocator.release(block.data);
        }
    }
}

impl Drop for PageManager {
    fn drop(&mut self) {
        self.free_all();
    }
}
