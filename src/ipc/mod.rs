//! Inter-process communication used during unification.
//!
//! The measurement only needs three collectives: a barrier, a gather to a
//! root and a broadcast from a root. They move opaque byte buffers; the
//! typed helpers in this module encode values with MessagePack on the way.
//!
//! # Module Structure
//!
//! - [`single`]: the one-process collaborator (rank 0 of 1)
//! - [`group`]: an in-process group of ranks, one thread per rank

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, ErrorKind, Result};

pub mod group;
pub mod single;

pub use group::{LocalGroup, LocalGroupMember};
pub use single::SingleProcess;

/// Collectives over all processes of a measurement.
///
/// Every process must call each collective in the same order.
pub trait Ipc: Send + Sync + fmt::Debug {
    /// This process's rank.
    fn rank(&self) -> u32;

    /// Number of processes.
    fn size(&self) -> u32;

    /// Blocks until every process arrived.
    fn barrier(&self) -> Result<()>;

    /// Collects one buffer per rank at `root`, in rank order. Non-root
    /// ranks get `None`.
    fn gather(&self, bytes: Vec<u8>, root: u32) -> Result<Option<Vec<Vec<u8>>>>;

    /// Distributes `root`'s buffer to every rank. Non-root ranks pass `None`.
    fn bcast(&self, bytes: Option<Vec<u8>>, root: u32) -> Result<Vec<u8>>;
}

pub(crate) fn ipc_error(detail: impl Into<String>) -> Error {
    Error::new(ErrorKind::IpcFailed).with_message(detail)
}

/// Gathers a value from every rank at `root`.
pub fn gather_value<T: Serialize + DeserializeOwned>(
    ipc: &dyn Ipc,
    value: &T,
    root: u32,
) -> Result<Option<Vec<T>>> {
    let bytes = rmp_serde::to_vec(value)?;
    match ipc.gather(bytes, root)? {
        Some(all) => all
            .iter()
            .map(|b| rmp_serde::from_slice(b).map_err(Error::from))
            .collect::<Result<Vec<T>>>()
            .map(Some),
        None => Ok(None),
    }
}

/// Broadcasts `root`'s value to every rank.
pub fn bcast_value<T: Serialize + DeserializeOwned>(
    ipc: &dyn Ipc,
    value: Option<&T>,
    root: u32,
) -> Result<T> {
    let bytes = value.map(rmp_serde::to_vec).transpose()?;
    let bytes = ipc.bcast(bytes, root)?;
    Ok(rmp_serde::from_slice(&bytes)?)
}

/// Gathers a value from every rank and hands the whole list to every rank.
pub fn allgather_value<T: Serialize + DeserializeOwned>(ipc: &dyn Ipc, value: &T) -> Result<Vec<T>> {
    let gathered = gather_value(ipc, value, 0)?;
    bcast_value(ipc, gathered.as_ref(), 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_process_helpers() {
        let ipc = SingleProcess::new();
        let all = gather_value(&ipc, &(7_u32, String::from("x")), 0).unwrap().unwrap();
        assert_eq!(all, vec![(7, String::from("x"))]);
        let v: u64 = bcast_value(&ipc, Some(&42_u64), 0).unwrap();
        assert_eq!(v, 42);
        assert_eq!(allgather_value(&ipc, &3_u8).unwrap(), vec![3]);
    }
}
