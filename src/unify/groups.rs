//! Groups that span every rank.
//!
//! Two kinds are built:
//!
//! - Paradigm location groups ([`define_paradigm_locations`]): during
//!   `pre_unify` a thread or accelerator paradigm gathers the global ids of
//!   its locations from all ranks. Rank 0 defines one group holding all of
//!   them, and each rank learns the position of its first location in that
//!   group, which it needs to number its own thread team.
//! - Synthesized groups ([`define_paradigm_groups`]): after all ranks are
//!   copied, rank 0 scans the unified location table and defines one
//!   `Locations` group per paradigm tag that has locations.

use crate::definitions::{Definition, DefinitionManager, GroupHandle, LocationDef};
use crate::error::Result;
use crate::ipc::{bcast_value, gather_value, Ipc};
use crate::tracing_compat::debug;
use crate::types::{GroupType, LocationType, Paradigm};

/// A synthesized cross-rank location group.
#[derive(Debug, Clone, Copy)]
pub struct ParadigmGroup {
    /// Group name.
    pub name: &'static str,
    /// Paradigm recorded on the group.
    pub paradigm: Paradigm,
    /// Selects the member locations.
    pub selects: fn(&LocationDef) -> bool,
}

/// Synthesized groups, in definition order.
pub const PARADIGM_GROUPS: [ParadigmGroup; 5] = [
    ParadigmGroup {
        name: "CUDA_GROUP",
        paradigm: Paradigm::Cuda,
        selects: |location| {
            location.location_type == LocationType::Gpu && location.paradigm == Paradigm::Cuda
        },
    },
    ParadigmGroup {
        name: "OPENCL_GROUP",
        paradigm: Paradigm::OpenCl,
        selects: |location| location.paradigm == Paradigm::OpenCl,
    },
    ParadigmGroup {
        name: "OPENMP_TARGET_GROUP",
        paradigm: Paradigm::OpenMpTarget,
        selects: |location| location.paradigm == Paradigm::OpenMpTarget,
    },
    ParadigmGroup {
        name: "PTHREAD_GROUP",
        paradigm: Paradigm::Pthread,
        selects: |location| location.paradigm == Paradigm::Pthread,
    },
    ParadigmGroup {
        name: "OPENMP_GROUP",
        paradigm: Paradigm::OpenMp,
        selects: |location| location.paradigm == Paradigm::OpenMp,
    },
];

/// Defines the synthesized groups in the unified manager.
///
/// Paradigms without locations get no group. Returns the handles of the
/// groups defined.
pub fn define_paradigm_groups(unified: &DefinitionManager) -> Result<Vec<GroupHandle>> {
    let locations: Vec<LocationDef> = LocationDef::table(unified)
        .lock()
        .iter()
        .map(|(_, location)| location.clone())
        .collect();

    let mut handles = Vec::new();
    for group in &PARADIGM_GROUPS {
        let members: Vec<u64> = locations
            .iter()
            .filter(|location| (group.selects)(location))
            .map(|location| location.global_id)
            .collect();
        if members.is_empty() {
            continue;
        }
        debug!(group = group.name, members = members.len(), "paradigm group defined");
        handles.push(unified.define_group(GroupType::Locations, group.paradigm, group.name, members)?);
    }
    Ok(handles)
}

/// Gathers `global_ids` of one paradigm from every rank.
///
/// Rank 0 defines a `CommLocations` group named `name` holding every rank's
/// ids in rank order, in its local manager, so the group reaches the
/// unified definitions with the rest. Returns the position of this rank's
/// first id in that group. Collective: every rank must call it, also with
/// no locations.
pub fn define_paradigm_locations(
    ipc: &dyn Ipc,
    definitions: &DefinitionManager,
    paradigm: Paradigm,
    name: &str,
    global_ids: &[u64],
) -> Result<u32> {
    let gathered = gather_value(ipc, &global_ids.to_vec(), 0)?;
    let offsets = match gathered {
        Some(per_rank) => {
            let mut offsets = Vec::with_capacity(per_rank.len());
            let mut next = 0_u32;
            for ids in &per_rank {
                offsets.push(next);
                next += ids.len() as u32;
            }
            let members: Vec<u64> = per_rank.concat();
            if !members.is_empty() {
                definitions.define_group(GroupType::CommLocations, paradigm, name, members)?;
            }
            Some(offsets)
        }
        None => None,
    };
    let offsets: Vec<u32> = bcast_value(ipc, offsets.as_ref(), 0)?;
    Ok(offsets.get(ipc.rank() as usize).copied().unwrap_or(0))
}
