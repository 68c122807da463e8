//! Unification: from per-process definitions to one global numbering.
//!
//! Runs once, after every location has quiesced and before any definition
//! file is written. Every rank takes part in the same collectives:
//!
//! ```text
//!   every rank          rank 0                          every rank
//!   ──────────          ──────                          ──────────
//!   close()
//!   barrier ─────────▶
//!   gather(snapshot) ─▶ unified = new manager ("" = 0)
//!                       for rank in 0..size:
//!                           copy_all_to_unified(rank)
//!                           mappings[rank]
//!                       define_paradigm_groups(unified)
//!                       bcast(mappings) ─────────────▶ apply own mappings
//!   barrier ◀──────────────────────────────────────────
//! ```
//!
//! Ranks are copied in rank order and each rank's definitions in sequence
//! order, so the unified numbering is reproducible for a fixed input.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::definitions::{DefinitionManager, DefinitionMappings, DefinitionSnapshot, RegionDef};
use crate::error::Result;
use crate::ipc::{bcast_value, gather_value, ipc_error, Ipc};
use crate::tracing_compat::{debug, info};

pub mod groups;

pub use groups::{define_paradigm_groups, define_paradigm_locations, ParadigmGroup, PARADIGM_GROUPS};

/// Time span covered by a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Epoch {
    /// Earliest begin timestamp.
    pub begin: u64,
    /// Latest end timestamp.
    pub end: u64,
}

impl Epoch {
    /// A span from `begin` to `end`.
    #[must_use]
    pub const fn new(begin: u64, end: u64) -> Self {
        Self { begin, end }
    }

    /// The smallest span covering both.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            begin: self.begin.min(other.begin),
            end: self.end.max(other.end),
        }
    }

    /// Reduces every rank's epoch to the global one, known to all ranks.
    pub fn reduce(self, ipc: &dyn Ipc) -> Result<Self> {
        let gathered = gather_value(ipc, &self, 0)?;
        let global = gathered.map(|all| {
            all.into_iter()
                .reduce(Self::merge)
                .unwrap_or(self)
        });
        bcast_value(ipc, global.as_ref(), 0)
    }
}

/// Result of unification on one rank.
#[derive(Debug)]
pub struct Unification {
    rank: u32,
    unified: Option<Arc<DefinitionManager>>,
    mappings: DefinitionMappings,
}

impl Unification {
    /// The unified definitions; only rank 0 holds them.
    #[must_use]
    pub fn unified(&self) -> Option<&Arc<DefinitionManager>> {
        self.unified.as_ref()
    }

    /// This rank's local→unified tables.
    #[must_use]
    pub const fn mappings(&self) -> &DefinitionMappings {
        &self.mappings
    }

    /// The rank this result belongs to.
    #[must_use]
    pub const fn rank(&self) -> u32 {
        self.rank
    }
}

/// Copies one process's definitions into a fresh unified manager.
///
/// Afterwards every local definition has its back-reference set.
pub fn unify_locally(definitions: &DefinitionManager) -> Result<DefinitionManager> {
    let unified = DefinitionManager::new();
    definitions.copy_all_to_unified(&unified)?;
    Ok(unified)
}

fn unify_root(
    definitions: &DefinitionManager,
    snapshots: &[DefinitionSnapshot],
) -> Result<(DefinitionManager, Vec<DefinitionMappings>)> {
    let unified = DefinitionManager::new();
    let mut mappings = Vec::with_capacity(snapshots.len());
    for (rank, snapshot) in snapshots.iter().enumerate() {
        if rank == 0 {
            definitions.copy_all_to_unified(&unified)?;
            mappings.push(definitions.mappings()?);
        } else {
            let remote = DefinitionManager::from_snapshot(snapshot)?;
            remote.copy_all_to_unified(&unified)?;
            mappings.push(remote.mappings()?);
        }
        debug!(rank, "definitions copied to unified");
    }
    define_paradigm_groups(&unified)?;
    Ok((unified, mappings))
}

/// Unifies the definitions of all ranks.
///
/// Closes `definitions`; interning afterwards fails. On return every local
/// definition of this rank has its unified back-reference set.
pub fn unify(ipc: &dyn Ipc, definitions: &DefinitionManager) -> Result<Unification> {
    let rank = ipc.rank();
    definitions.close();
    ipc.barrier()?;

    let snapshot = definitions.snapshot();
    let (unified, all_mappings) = match gather_value(ipc, &snapshot, 0)? {
        Some(snapshots) => {
            let (unified, mappings) = unify_root(definitions, &snapshots)?;
            (Some(Arc::new(unified)), Some(mappings))
        }
        None => (None, None),
    };

    let all_mappings: Vec<DefinitionMappings> = bcast_value(ipc, all_mappings.as_ref(), 0)?;
    let mappings = all_mappings
        .into_iter()
        .nth(rank as usize)
        .ok_or_else(|| ipc_error(format!("no mapping tables for rank {rank}")))?;
    if unified.is_none() {
        definitions.apply_mappings(&mappings)?;
    }
    ipc.barrier()?;

    if let Some(unified) = &unified {
        info!(
            ranks = ipc.size(),
            regions = unified.count::<RegionDef>(),
            "unification complete"
        );
    }
    Ok(Unification {
        rank,
        unified,
        mappings,
    })
}
