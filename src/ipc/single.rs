//! The single-process collaborator.

use super::{ipc_error, Ipc};
use crate::error::Result;

/// Rank 0 of a one-process run. Collectives return immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct SingleProcess;

impl SingleProcess {
    /// Creates the collaborator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Ipc for SingleProcess {
    fn rank(&self) -> u32 {
        0
    }

    fn size(&self) -> u32 {
        1
    }

    fn barrier(&self) -> Result<()> {
        Ok(())
    }

    fn gather(&self, bytes: Vec<u8>, root: u32) -> Result<Option<Vec<Vec<u8>>>> {
        if root != 0 {
            return Err(ipc_error(format!("gather to rank {root} in a single process")));
        }
        Ok(Some(vec![bytes]))
    }

    fn bcast(&self, bytes: Option<Vec<u8>>, root: u32) -> Result<Vec<u8>> {
        if root != 0 {
            return Err(ipc_error(format!("bcast from rank {root} in a single process")));
        }
        bytes.ok_or_else(|| ipc_error("bcast root passed no value"))
    }
}
