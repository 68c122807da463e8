//! Definition manager: interned, deduplicated descriptions of named entities.
//!
//! Every region, source file, string, group, attribute, communicator and
//! location an adapter mentions is interned once per process. The per-kind
//! tables are append-only; a duplicate definition returns the handle of the
//! first one, so handles can be compared for identity within a process.
//!
//! At finalization the local tables are copied into a unified manager on rank
//! 0. Copying re-resolves every handle a definition holds (a region's name,
//! its source file) to the unified equivalent first, which is why kinds are
//! copied in [`DefinitionKind::UNIFY_ORDER`].
//!
//! # Module Structure
//!
//! - [`handle`]: typed handles and the filtered-region sentinel
//! - [`kinds`]: one payload struct per definition kind
//! - [`table`]: the paged, hash-bucketed storage of one kind
//! - [`manager`]: the per-process manager and unified copying
//! - [`mappings`]: local→unified translation tables

use core::fmt;
use std::hash::Hasher;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub mod handle;
pub mod kinds;
pub mod manager;
pub mod mappings;
pub mod table;

pub use handle::{
    AttributeHandle, CommunicatorHandle, GroupHandle, Handle, LocationGroupHandle, LocationHandle,
    MetricHandle, ParameterHandle, RegionHandle, RmaWindowHandle, SourceFileHandle, StringHandle,
};
pub use kinds::{
    AttributeDef, CommunicatorDef, GroupDef, LocationDef, LocationGroupDef, MetricDef,
    ParameterDef, RegionDef, RmaWindowDef, SourceFileDef, StringDef, UNKNOWN_REGION_NAME,
};
pub use manager::{DefinitionManager, DefinitionSnapshot, RegionInfo, UnifiedResolver};
pub use mappings::DefinitionMappings;
pub use table::DefinitionTable;

/// The kinds of definitions a manager stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefinitionKind {
    /// Interned strings.
    String,
    /// Source file names.
    SourceFile,
    /// Code regions.
    Region,
    /// Event attributes.
    Attribute,
    /// Member lists.
    Group,
    /// Region parameters.
    Parameter,
    /// Metrics and counters.
    Metric,
    /// Communicators over groups.
    Communicator,
    /// One-sided communication windows.
    RmaWindow,
    /// Execution streams.
    Location,
    /// Processes and accelerator contexts.
    LocationGroup,
}

impl DefinitionKind {
    /// The order in which kinds are copied into the unified manager.
    ///
    /// A kind only references kinds that appear before it.
    pub const UNIFY_ORDER: [Self; 11] = [
        Self::String,
        Self::SourceFile,
        Self::Region,
        Self::Attribute,
        Self::Group,
        Self::Parameter,
        Self::Metric,
        Self::Communicator,
        Self::RmaWindow,
        Self::Location,
        Self::LocationGroup,
    ];

    /// Short prefix used when displaying handles.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::String => "S",
            Self::SourceFile => "F",
            Self::Region => "R",
            Self::Attribute => "A",
            Self::Group => "G",
            Self::Parameter => "P",
            Self::Metric => "M",
            Self::Communicator => "C",
            Self::RmaWindow => "W",
            Self::Location => "L",
            Self::LocationGroup => "LG",
        }
    }
}

impl fmt::Display for DefinitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "String",
            Self::SourceFile => "SourceFile",
            Self::Region => "Region",
            Self::Attribute => "Attribute",
            Self::Group => "Group",
            Self::Parameter => "Parameter",
            Self::Metric => "Metric",
            Self::Communicator => "Communicator",
            Self::RmaWindow => "RmaWindow",
            Self::Location => "Location",
            Self::LocationGroup => "LocationGroup",
        };
        f.write_str(name)
    }
}

/// A definition payload stored in a [`DefinitionTable`].
///
/// Hashing and equality are spelled out per kind and cover exactly the
/// semantic fields; the sequence number and the unified back-reference live
/// in the table, not in the payload.
pub trait Definition:
    Clone + fmt::Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{
    /// The kind tag of this payload.
    const KIND: DefinitionKind;

    /// Feeds the semantic fields into `state`.
    fn hash_fields<H: Hasher>(&self, state: &mut H);

    /// True if both definitions describe the same entity.
    fn same_as(&self, other: &Self) -> bool;

    /// Returns a copy whose handle fields name definitions of the unified
    /// manager.
    ///
    /// Fails with [`ErrorKind::UnifyOrder`](crate::error::ErrorKind::UnifyOrder)
    /// if a referenced definition has no unified counterpart yet.
    fn to_unified(&self, resolver: &UnifiedResolver<'_>) -> Result<Self>;

    /// The table of this kind inside `manager`.
    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>>;
}
