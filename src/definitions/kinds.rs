//! Definition payloads, one struct per kind.
//!
//! Each payload implements [`Definition`] by hand: the hashed fields and the
//! compared fields are the same list, and handle fields are re-resolved
//! through a [`UnifiedResolver`] when a definition is copied to rank 0.

use std::hash::{Hash, Hasher};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::handle::{
    CommunicatorHandle, GroupHandle, SourceFileHandle, StringHandle,
};
use super::{Definition, DefinitionKind, DefinitionManager, DefinitionTable, UnifiedResolver};
use crate::error::Result;
use crate::types::{
    AttributeType, GroupType, LocationGroupType, LocationType, MetricValueType, Paradigm,
    ParameterType, RegionType,
};
use crate::util::DetHasher;

/// Name given to regions defined without one.
pub const UNKNOWN_REGION_NAME: &str = "<unknown region>";

/// An interned string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringDef {
    value: String,
}

impl StringDef {
    /// Wraps a string value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// The string contents.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl Definition for StringDef {
    const KIND: DefinitionKind = DefinitionKind::String;

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        state.write(self.value.as_bytes());
        state.write_usize(self.value.len());
    }

    fn same_as(&self, other: &Self) -> bool {
        self.value == other.value
    }

    fn to_unified(&self, _resolver: &UnifiedResolver<'_>) -> Result<Self> {
        Ok(self.clone())
    }

    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>> {
        &manager.strings
    }
}

/// A source file, named by an interned string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileDef {
    /// File name.
    pub name: StringHandle,
}

impl Definition for SourceFileDef {
    const KIND: DefinitionKind = DefinitionKind::SourceFile;

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.name.id());
    }

    fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
    }

    fn to_unified(&self, resolver: &UnifiedResolver<'_>) -> Result<Self> {
        Ok(Self {
            name: resolver.resolve(self.name)?,
        })
    }

    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>> {
        &manager.source_files
    }
}

/// A code region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionDef {
    /// Display name.
    pub name: StringHandle,
    /// Mangled or otherwise canonical name.
    pub canonical_name: StringHandle,
    /// Free-form description.
    pub description: StringHandle,
    /// Kind of code the region covers.
    pub region_type: RegionType,
    /// Owning source file, if known.
    pub file: Option<SourceFileHandle>,
    /// First line.
    pub begin_line: u32,
    /// Last line.
    pub end_line: u32,
    /// Adapter that defined the region.
    pub paradigm: Paradigm,
}

impl Definition for RegionDef {
    const KIND: DefinitionKind = DefinitionKind::Region;

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.name.id());
        state.write_u32(self.canonical_name.id());
        state.write_u32(self.description.id());
        self.region_type.hash(state);
        state.write_u32(self.file.map_or(u32::MAX, |f| f.id()));
        state.write_u32(self.begin_line);
        state.write_u32(self.end_line);
        self.paradigm.hash(state);
    }

    fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
            && self.canonical_name == other.canonical_name
            && self.description == other.description
            && self.region_type == other.region_type
            && self.file == other.file
            && self.begin_line == other.begin_line
            && self.end_line == other.end_line
            && self.paradigm == other.paradigm
    }

    fn to_unified(&self, resolver: &UnifiedResolver<'_>) -> Result<Self> {
        Ok(Self {
            name: resolver.resolve(self.name)?,
            canonical_name: resolver.resolve(self.canonical_name)?,
            description: resolver.resolve(self.description)?,
            file: resolver.resolve_opt(self.file)?,
            ..self.clone()
        })
    }

    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>> {
        &manager.regions
    }
}

/// A fixed-size member list.
///
/// Members are global location ids, ranks or positions, depending on the
/// group type; they are plain numbers and are not remapped by unification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDef {
    /// What the members are.
    pub group_type: GroupType,
    /// Paradigm the group belongs to.
    pub paradigm: Paradigm,
    /// Group name.
    pub name: StringHandle,
    /// Members in definition order.
    pub members: Vec<u64>,
}

impl Definition for GroupDef {
    const KIND: DefinitionKind = DefinitionKind::Group;

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        self.group_type.hash(state);
        self.paradigm.hash(state);
        state.write_u32(self.name.id());
        state.write_usize(self.members.len());
        // Order-independent combination; equality still compares in order.
        let combined = self.members.iter().fold(0u64, |acc, member| {
            let mut h = DetHasher::default();
            h.write_u64(*member);
            acc.wrapping_add(h.finish())
        });
        state.write_u64(combined);
    }

    fn same_as(&self, other: &Self) -> bool {
        self.group_type == other.group_type
            && self.paradigm == other.paradigm
            && self.name == other.name
            && self.members == other.members
    }

    fn to_unified(&self, resolver: &UnifiedResolver<'_>) -> Result<Self> {
        Ok(Self {
            name: resolver.resolve(self.name)?,
            ..self.clone()
        })
    }

    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>> {
        &manager.groups
    }
}

/// A typed attribute that can be attached to events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDef {
    /// Attribute name.
    pub name: StringHandle,
    /// Description.
    pub description: StringHandle,
    /// Value type.
    pub attribute_type: AttributeType,
}

impl Definition for AttributeDef {
    const KIND: DefinitionKind = DefinitionKind::Attribute;

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.name.id());
        state.write_u32(self.description.id());
        self.attribute_type.hash(state);
    }

    fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.attribute_type == other.attribute_type
    }

    fn to_unified(&self, resolver: &UnifiedResolver<'_>) -> Result<Self> {
        Ok(Self {
            name: resolver.resolve(self.name)?,
            description: resolver.resolve(self.description)?,
            attribute_type: self.attribute_type,
        })
    }

    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>> {
        &manager.attributes
    }
}

/// A named region parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDef {
    /// Parameter name.
    pub name: StringHandle,
    /// Value type.
    pub parameter_type: ParameterType,
}

impl Definition for ParameterDef {
    const KIND: DefinitionKind = DefinitionKind::Parameter;

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.name.id());
        self.parameter_type.hash(state);
    }

    fn same_as(&self, other: &Self) -> bool {
        self.name == other.name && self.parameter_type == other.parameter_type
    }

    fn to_unified(&self, resolver: &UnifiedResolver<'_>) -> Result<Self> {
        Ok(Self {
            name: resolver.resolve(self.name)?,
            parameter_type: self.parameter_type,
        })
    }

    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>> {
        &manager.parameters
    }
}

/// A metric or counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricDef {
    /// Metric name.
    pub name: StringHandle,
    /// Description.
    pub description: StringHandle,
    /// Unit of the values.
    pub unit: StringHandle,
    /// Value type.
    pub value_type: MetricValueType,
}

impl Definition for MetricDef {
    const KIND: DefinitionKind = DefinitionKind::Metric;

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.name.id());
        state.write_u32(self.description.id());
        state.write_u32(self.unit.id());
        self.value_type.hash(state);
    }

    fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.unit == other.unit
            && self.value_type == other.value_type
    }

    fn to_unified(&self, resolver: &UnifiedResolver<'_>) -> Result<Self> {
        Ok(Self {
            name: resolver.resolve(self.name)?,
            description: resolver.resolve(self.description)?,
            unit: resolver.resolve(self.unit)?,
            value_type: self.value_type,
        })
    }

    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>> {
        &manager.metrics
    }
}

/// A communicator over a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommunicatorDef {
    /// Communicator name.
    pub name: StringHandle,
    /// Member group.
    pub group: GroupHandle,
    /// Communicator this one was derived from.
    pub parent: Option<CommunicatorHandle>,
    /// Paradigm the communicator belongs to.
    pub paradigm: Paradigm,
}

impl Definition for CommunicatorDef {
    const KIND: DefinitionKind = DefinitionKind::Communicator;

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.name.id());
        state.write_u32(self.group.id());
        state.write_u32(self.parent.map_or(u32::MAX, |p| p.id()));
        self.paradigm.hash(state);
    }

    fn same_as(&self, other: &Self) -> bool {
        self.name == other.name
            && self.group == other.group
            && self.parent == other.parent
            && self.paradigm == other.paradigm
    }

    fn to_unified(&self, resolver: &UnifiedResolver<'_>) -> Result<Self> {
        Ok(Self {
            name: resolver.resolve(self.name)?,
            group: resolver.resolve(self.group)?,
            parent: resolver.resolve_opt(self.parent)?,
            paradigm: self.paradigm,
        })
    }

    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>> {
        &manager.communicators
    }
}

/// A one-sided communication window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RmaWindowDef {
    /// Window name.
    pub name: StringHandle,
    /// Communicator the window was created on.
    pub communicator: CommunicatorHandle,
}

impl Definition for RmaWindowDef {
    const KIND: DefinitionKind = DefinitionKind::RmaWindow;

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.name.id());
        state.write_u32(self.communicator.id());
    }

    fn same_as(&self, other: &Self) -> bool {
        self.name == other.name && self.communicator == other.communicator
    }

    fn to_unified(&self, resolver: &UnifiedResolver<'_>) -> Result<Self> {
        Ok(Self {
            name: resolver.resolve(self.name)?,
            communicator: resolver.resolve(self.communicator)?,
        })
    }

    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>> {
        &manager.rma_windows
    }
}

/// An execution stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDef {
    /// Process-independent id: `(local id << 32) | rank`.
    pub global_id: u64,
    /// Location name.
    pub name: StringHandle,
    /// Kind of stream.
    pub location_type: LocationType,
    /// Paradigm that created the location.
    pub paradigm: Paradigm,
    /// Global id of the owning location group (the rank).
    pub location_group: u32,
}

impl Definition for LocationDef {
    const KIND: DefinitionKind = DefinitionKind::Location;

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.global_id);
        state.write_u32(self.name.id());
        self.location_type.hash(state);
        self.paradigm.hash(state);
        state.write_u32(self.location_group);
    }

    fn same_as(&self, other: &Self) -> bool {
        self.global_id == other.global_id
            && self.name == other.name
            && self.location_type == other.location_type
            && self.paradigm == other.paradigm
            && self.location_group == other.location_group
    }

    fn to_unified(&self, resolver: &UnifiedResolver<'_>) -> Result<Self> {
        Ok(Self {
            name: resolver.resolve(self.name)?,
            ..self.clone()
        })
    }

    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>> {
        &manager.locations
    }
}

/// A process or accelerator context owning locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationGroupDef {
    /// Global id (the rank for processes).
    pub global_id: u32,
    /// Display name.
    pub name: StringHandle,
    /// Kind of group.
    pub group_type: LocationGroupType,
}

impl Definition for LocationGroupDef {
    const KIND: DefinitionKind = DefinitionKind::LocationGroup;

    fn hash_fields<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.global_id);
        state.write_u32(self.name.id());
        self.group_type.hash(state);
    }

    fn same_as(&self, other: &Self) -> bool {
        self.global_id == other.global_id
            && self.name == other.name
            && self.group_type == other.group_type
    }

    fn to_unified(&self, resolver: &UnifiedResolver<'_>) -> Result<Self> {
        Ok(Self {
            name: resolver.resolve(self.name)?,
            ..self.clone()
        })
    }

    fn table(manager: &DefinitionManager) -> &Mutex<DefinitionTable<Self>> {
        &manager.location_groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Handle;

    fn hash<D: Definition>(d: &D) -> u64 {
        let mut h = DetHasher::default();
        d.hash_fields(&mut h);
        h.finish()
    }

    #[test]
    fn group_hash_ignores_member_order_but_equality_does_not() {
        let a = GroupDef {
            group_type: GroupType::Locations,
            paradigm: Paradigm::Pthread,
            name: Handle::from_raw(1),
            members: vec![1, 2, 3],
        };
        let b = GroupDef {
            members: vec![3, 2, 1],
            ..a.clone()
        };
        assert_eq!(hash(&a), hash(&b));
        assert!(!a.same_as(&b));
        assert!(a.same_as(&a.clone()));
    }

    #[test]
    fn region_equality_covers_lines_and_paradigm() {
        let base = RegionDef {
            name: Handle::from_raw(1),
            canonical_name: Handle::from_raw(1),
            description: Handle::from_raw(0),
            region_type: RegionType::Function,
            file: Some(Handle::from_raw(0)),
            begin_line: 10,
            end_line: 20,
            paradigm: Paradigm::Compiler,
        };
        let other_lines = RegionDef {
            end_line: 21,
            ..base.clone()
        };
        let other_paradigm = RegionDef {
            paradigm: Paradigm::User,
            ..base.clone()
        };
        assert!(!base.same_as(&other_lines));
        assert!(!base.same_as(&other_paradigm));
        assert_ne!(hash(&base), hash(&other_lines));
    }
}
