//! Local→unified translation tables.

use serde::{Deserialize, Serialize};

use super::{Definition, DefinitionKind, Handle};

/// Per-kind arrays indexed by local sequence number, holding the unified
/// sequence number.
///
/// Computed once after unification so that definition references in the
/// trace can be translated without running the dedup lookup again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionMappings {
    /// Strings.
    pub strings: Vec<u32>,
    /// Source files.
    pub source_files: Vec<u32>,
    /// Regions.
    pub regions: Vec<u32>,
    /// Attributes.
    pub attributes: Vec<u32>,
    /// Groups.
    pub groups: Vec<u32>,
    /// Parameters.
    pub parameters: Vec<u32>,
    /// Metrics.
    pub metrics: Vec<u32>,
    /// Communicators.
    pub communicators: Vec<u32>,
    /// RMA windows.
    pub rma_windows: Vec<u32>,
    /// Locations.
    pub locations: Vec<u32>,
    /// Location groups.
    pub location_groups: Vec<u32>,
}

impl DefinitionMappings {
    /// The mapping array of one kind.
    #[must_use]
    pub fn table(&self, kind: DefinitionKind) -> &[u32] {
        match kind {
            DefinitionKind::String => &self.strings,
            DefinitionKind::SourceFile => &self.source_files,
            DefinitionKind::Region => &self.regions,
            DefinitionKind::Attribute => &self.attributes,
            DefinitionKind::Group => &self.groups,
            DefinitionKind::Parameter => &self.parameters,
            DefinitionKind::Metric => &self.metrics,
            DefinitionKind::Communicator => &self.communicators,
            DefinitionKind::RmaWindow => &self.rma_windows,
            DefinitionKind::Location => &self.locations,
            DefinitionKind::LocationGroup => &self.location_groups,
        }
    }

    /// Translates a local handle. Filtered and invalid handles pass through.
    #[must_use]
    pub fn map<D: Definition>(&self, handle: Handle<D>) -> Option<Handle<D>> {
        if handle.id() >= u32::MAX - 1 {
            return Some(handle);
        }
        self.table(D::KIND)
            .get(handle.index())
            .copied()
            .map(Handle::from_raw)
    }

    /// Total number of mapped definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        DefinitionKind::UNIFY_ORDER
            .iter()
            .map(|&kind| self.table(kind).len())
            .sum()
    }

    /// True if no kind has any entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::{RegionHandle, StringHandle};

    #[test]
    fn map_translates_by_index() {
        let mappings = DefinitionMappings {
            strings: vec![0, 5, 3],
            regions: vec![1],
            ..DefinitionMappings::default()
        };
        assert_eq!(
            mappings.map(StringHandle::from_raw(1)),
            Some(StringHandle::from_raw(5))
        );
        assert_eq!(mappings.map(StringHandle::from_raw(3)), None);
        assert_eq!(mappings.map(RegionHandle::FILTERED), Some(RegionHandle::FILTERED));
        assert_eq!(mappings.len(), 4);
    }
}
