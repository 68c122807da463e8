//! In-process rank groups.
//!
//! A [`LocalGroup`] stands in for a multi-process run inside one process:
//! each member is handed to its own thread and behaves like one rank. All
//! collectives are built on one exchange round. Every member deposits an
//! optional buffer; the last one to arrive publishes the collected slots,
//! advances the generation and wakes the others.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{ipc_error, Ipc};
use crate::error::Result;

#[derive(Debug)]
struct ExchangeState {
    arrived: usize,
    generation: u64,
    slots: Vec<Option<Vec<u8>>>,
    published: Arc<Vec<Option<Vec<u8>>>>,
}

#[derive(Debug)]
struct Shared {
    size: usize,
    state: Mutex<ExchangeState>,
    cvar: Condvar,
}

impl Shared {
    fn exchange(&self, rank: usize, bytes: Option<Vec<u8>>) -> Arc<Vec<Option<Vec<u8>>>> {
        let mut state = self.state.lock();
        let generation = state.generation;
        state.slots[rank] = bytes;
        state.arrived += 1;
        if state.arrived == self.size {
            let collected = std::mem::replace(&mut state.slots, vec![None; self.size]);
            state.published = Arc::new(collected);
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.cvar.notify_all();
            return Arc::clone(&state.published);
        }
        while state.generation == generation {
            self.cvar.wait(&mut state);
        }
        Arc::clone(&state.published)
    }
}

/// Factory for the members of an in-process group.
#[derive(Debug)]
pub struct LocalGroup;

impl LocalGroup {
    /// Creates `size` members, ordered by rank.
    #[must_use]
    pub fn new(size: u32) -> Vec<LocalGroupMember> {
        let size = size.max(1);
        let shared = Arc::new(Shared {
            size: size as usize,
            state: Mutex::new(ExchangeState {
                arrived: 0,
                generation: 0,
                slots: vec![None; size as usize],
                published: Arc::new(Vec::new()),
            }),
            cvar: Condvar::new(),
        });
        (0..size)
            .map(|rank| LocalGroupMember {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// One rank of a [`LocalGroup`].
#[derive(Debug)]
pub struct LocalGroupMember {
    rank: u32,
    shared: Arc<Shared>,
}

impl LocalGroupMember {
    fn check_root(&self, root: u32) -> Result<()> {
        if root as usize >= self.shared.size {
            return Err(ipc_error(format!(
                "root {root} outside a group of {}",
                self.shared.size
            )));
        }
        Ok(())
    }
}

impl Ipc for LocalGroupMember {
    fn rank(&self) -> u32 {
        self.rank
    }

    fn size(&self) -> u32 {
        self.shared.size as u32
    }

    fn barrier(&self) -> Result<()> {
        self.shared.exchange(self.rank as usize, None);
        Ok(())
    }

    fn gather(&self, bytes: Vec<u8>, root: u32) -> Result<Option<Vec<Vec<u8>>>> {
        self.check_root(root)?;
        let published = self.shared.exchange(self.rank as usize, Some(bytes));
        if self.rank != root {
            return Ok(None);
        }
        published
            .iter()
            .enumerate()
            .map(|(rank, slot)| {
                slot.clone()
                    .ok_or_else(|| ipc_error(format!("rank {rank} contributed nothing to gather")))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some)
    }

    fn bcast(&self, bytes: Option<Vec<u8>>, root: u32) -> Result<Vec<u8>> {
        self.check_root(root)?;
        let bytes = if self.rank == root { bytes } else { None };
        let published = self.shared.exchange(self.rank as usize, bytes);
        published
            .get(root as usize)
            .cloned()
            .flatten()
            .ok_or_else(|| ipc_error(format!("bcast root {root} passed no value")))
    }
}
