//! The per-process definition manager.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::handle::{
    AttributeHandle, CommunicatorHandle, GroupHandle, Handle, LocationGroupHandle,
    LocationHandle, MetricHandle, ParameterHandle, RegionHandle, RmaWindowHandle,
    SourceFileHandle, StringHandle,
};
use super::kinds::{
    AttributeDef, CommunicatorDef, GroupDef, LocationDef, LocationGroupDef, MetricDef,
    ParameterDef, RegionDef, RmaWindowDef, SourceFileDef, StringDef, UNKNOWN_REGION_NAME,
};
use super::mappings::DefinitionMappings;
use super::{Definition, DefinitionKind, DefinitionTable};
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::{debug, trace};
use crate::types::{
    AttributeType, GroupType, LocationGroupType, LocationType, MetricValueType, Paradigm,
    ParameterType, RegionType,
};

/// Adapter-supplied description of a region.
///
/// Missing names become [`UNKNOWN_REGION_NAME`]; a missing canonical name
/// falls back to the name.
#[derive(Debug, Clone, Copy)]
pub struct RegionInfo<'a> {
    /// Display name.
    pub name: &'a str,
    /// Canonical (mangled) name.
    pub canonical_name: Option<&'a str>,
    /// Description.
    pub description: Option<&'a str>,
    /// Owning source file.
    pub file: Option<SourceFileHandle>,
    /// First line.
    pub begin_line: u32,
    /// Last line.
    pub end_line: u32,
    /// Defining adapter.
    pub paradigm: Paradigm,
    /// Kind of region.
    pub region_type: RegionType,
}

impl<'a> RegionInfo<'a> {
    /// A user function region with no file or line information.
    #[must_use]
    pub const fn new(name: &'a str) -> Self {
        Self {
            name,
            canonical_name: None,
            description: None,
            file: None,
            begin_line: 0,
            end_line: 0,
            paradigm: Paradigm::User,
            region_type: RegionType::Function,
        }
    }

    /// Sets the canonical name.
    #[must_use]
    pub const fn with_canonical_name(mut self, canonical_name: &'a str) -> Self {
        self.canonical_name = Some(canonical_name);
        self
    }

    /// Sets the description.
    #[must_use]
    pub const fn with_description(mut self, description: &'a str) -> Self {
        self.description = Some(description);
        self
    }

    /// Sets the source file and line range.
    #[must_use]
    pub const fn with_location(
        mut self,
        file: SourceFileHandle,
        begin_line: u32,
        end_line: u32,
    ) -> Self {
        self.file = Some(file);
        self.begin_line = begin_line;
        self.end_line = end_line;
        self
    }

    /// Sets the defining adapter.
    #[must_use]
    pub const fn with_paradigm(mut self, paradigm: Paradigm) -> Self {
        self.paradigm = paradigm;
        self
    }

    /// Sets the region type.
    #[must_use]
    pub const fn with_region_type(mut self, region_type: RegionType) -> Self {
        self.region_type = region_type;
        self
    }
}

/// All definitions of a manager in sequence order, for transport to rank 0
/// and for the definition files of the archive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSnapshot {
    /// Strings.
    pub strings: Vec<StringDef>,
    /// Source files.
    pub source_files: Vec<SourceFileDef>,
    /// Regions.
    pub regions: Vec<RegionDef>,
    /// Attributes.
    pub attributes: Vec<AttributeDef>,
    /// Groups.
    pub groups: Vec<GroupDef>,
    /// Parameters.
    pub parameters: Vec<ParameterDef>,
    /// Metrics.
    pub metrics: Vec<MetricDef>,
    /// Communicators.
    pub communicators: Vec<CommunicatorDef>,
    /// RMA windows.
    pub rma_windows: Vec<RmaWindowDef>,
    /// Locations.
    pub locations: Vec<LocationDef>,
    /// Location groups.
    pub location_groups: Vec<LocationGroupDef>,
}

/// Resolves handles of a source manager to their unified counterparts.
#[derive(Debug, Clone, Copy)]
pub struct UnifiedResolver<'a> {
    source: &'a DefinitionManager,
}

impl UnifiedResolver<'_> {
    /// The unified counterpart of `handle`.
    pub fn resolve<D: Definition>(&self, handle: Handle<D>) -> Result<Handle<D>> {
        D::table(self.source)
            .lock()
            .unified(handle)
            .ok_or_else(|| Error::unify_order(D::KIND, handle.id()))
    }

    /// Like [`resolve`](Self::resolve) for optional fields.
    pub fn resolve_opt<D: Definition>(&self, handle: Option<Handle<D>>) -> Result<Option<Handle<D>>> {
        handle.map(|h| self.resolve(h)).transpose()
    }
}

/// Interned definition tables of one process, one mutex per kind.
///
/// The lifecycle is create → intern* → close → copy to unified. The empty
/// string is always string 0.
#[derive(Debug)]
pub struct DefinitionManager {
    pub(crate) strings: Mutex<DefinitionTable<StringDef>>,
    pub(crate) source_files: Mutex<DefinitionTable<SourceFileDef>>,
    pub(crate) regions: Mutex<DefinitionTable<RegionDef>>,
    pub(crate) groups: Mutex<DefinitionTable<GroupDef>>,
    pub(crate) attributes: Mutex<DefinitionTable<AttributeDef>>,
    pub(crate) parameters: Mutex<DefinitionTable<ParameterDef>>,
    pub(crate) metrics: Mutex<DefinitionTable<MetricDef>>,
    pub(crate) communicators: Mutex<DefinitionTable<CommunicatorDef>>,
    pub(crate) rma_windows: Mutex<DefinitionTable<RmaWindowDef>>,
    pub(crate) locations: Mutex<DefinitionTable<LocationDef>>,
    pub(crate) location_groups: Mutex<DefinitionTable<LocationGroupDef>>,
    closed: AtomicBool,
}

impl Default for DefinitionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DefinitionManager {
    /// Creates an empty manager holding only the empty string.
    #[must_use]
    pub fn new() -> Self {
        let manager = Self {
            strings: Mutex::new(DefinitionTable::with_buckets(1024)),
            source_files: Mutex::new(DefinitionTable::with_buckets(128)),
            regions: Mutex::new(DefinitionTable::with_buckets(1024)),
            groups: Mutex::new(DefinitionTable::with_buckets(128)),
            attributes: Mutex::new(DefinitionTable::with_buckets(64)),
            parameters: Mutex::new(DefinitionTable::with_buckets(64)),
            metrics: Mutex::new(DefinitionTable::with_buckets(64)),
            communicators: Mutex::new(DefinitionTable::with_buckets(64)),
            rma_windows: Mutex::new(DefinitionTable::with_buckets(64)),
            locations: Mutex::new(DefinitionTable::with_buckets(256)),
            location_groups: Mutex::new(DefinitionTable::with_buckets(64)),
            closed: AtomicBool::new(false),
        };
        let empty = manager.strings.lock().intern(StringDef::new(""));
        debug_assert_eq!(empty.ok(), Some((StringHandle::EMPTY, true)));
        manager
    }

    /// True once [`close`](Self::close) was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Rejects further interning. Lookups and unified copying still work.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(
                strings = self.count::<StringDef>(),
                regions = self.count::<RegionDef>(),
                locations = self.count::<LocationDef>(),
                "definition manager closed"
            );
        }
    }

    /// Interns a definition of any kind.
    pub fn intern<D: Definition>(&self, definition: D) -> Result<Handle<D>> {
        self.intern_tracked(definition).map(|(handle, _)| handle)
    }

    /// Interns a definition, reporting whether it was new.
    pub fn intern_tracked<D: Definition>(&self, definition: D) -> Result<(Handle<D>, bool)> {
        if self.is_closed() {
            return Err(Error::new(ErrorKind::DefinitionsClosed)
                .with_message(format!("cannot define {} after close", D::KIND)));
        }
        let (handle, inserted) = D::table(self).lock().intern(definition)?;
        if inserted {
            trace!(kind = %D::KIND, handle = handle.id(), "new definition");
        }
        Ok((handle, inserted))
    }

    /// Returns a copy of the definition behind `handle`.
    #[must_use]
    pub fn get<D: Definition>(&self, handle: Handle<D>) -> Option<D> {
        D::table(self).lock().get(handle).cloned()
    }

    /// Calls `f` with the definition behind `handle`.
    pub fn with<D: Definition, R>(&self, handle: Handle<D>, f: impl FnOnce(&D) -> R) -> Option<R> {
        D::table(self).lock().get(handle).map(f)
    }

    /// Number of definitions of kind `D`.
    #[must_use]
    pub fn count<D: Definition>(&self) -> usize {
        D::table(self).lock().len()
    }

    /// Looks up an equal definition without inserting.
    #[must_use]
    pub fn find<D: Definition>(&self, definition: &D) -> Option<Handle<D>> {
        D::table(self).lock().find(definition)
    }

    /// Returns the value of an interned string.
    #[must_use]
    pub fn string(&self, handle: StringHandle) -> Option<String> {
        self.with(handle, |s| s.value().to_owned())
    }

    // =====================================================================
    // Typed definition API
    // =====================================================================

    /// Interns a string.
    pub fn new_string(&self, value: &str) -> Result<StringHandle> {
        if self.is_closed() {
            return Err(Error::new(ErrorKind::DefinitionsClosed));
        }
        self.strings
            .lock()
            .intern(StringDef::new(value))
            .map(|(handle, _)| handle)
    }

    /// Interns a source file by name.
    pub fn new_source_file(&self, name: &str) -> Result<SourceFileHandle> {
        let name = self.new_string(name)?;
        self.intern(SourceFileDef { name })
    }

    /// Interns a region.
    pub fn define_region(&self, info: &RegionInfo<'_>) -> Result<RegionHandle> {
        let name = if info.name.is_empty() {
            UNKNOWN_REGION_NAME
        } else {
            info.name
        };
        let name_handle = self.new_string(name)?;
        let canonical_name = match info.canonical_name {
            Some(canonical) if !canonical.is_empty() => self.new_string(canonical)?,
            _ => name_handle,
        };
        let description = self.new_string(info.description.unwrap_or(""))?;
        self.intern(RegionDef {
            name: name_handle,
            canonical_name,
            description,
            region_type: info.region_type,
            file: info.file,
            begin_line: info.begin_line,
            end_line: info.end_line,
            paradigm: info.paradigm,
        })
    }

    /// Interns a group.
    pub fn define_group(
        &self,
        group_type: GroupType,
        paradigm: Paradigm,
        name: &str,
        members: Vec<u64>,
    ) -> Result<GroupHandle> {
        let name = self.new_string(name)?;
        self.intern(GroupDef {
            group_type,
            paradigm,
            name,
            members,
        })
    }

    /// Interns an attribute.
    pub fn define_attribute(
        &self,
        name: &str,
        description: &str,
        attribute_type: AttributeType,
    ) -> Result<AttributeHandle> {
        let name = self.new_string(name)?;
        let description = self.new_string(description)?;
        self.intern(AttributeDef {
            name,
            description,
            attribute_type,
        })
    }

    /// Interns a parameter.
    pub fn define_parameter(
        &self,
        name: &str,
        parameter_type: ParameterType,
    ) -> Result<ParameterHandle> {
        let name = self.new_string(name)?;
        self.intern(ParameterDef {
            name,
            parameter_type,
        })
    }

    /// Interns a metric.
    ///
    /// A second metric with the same name but different properties is a
    /// duplicate initialization: a warning is logged and the first
    /// definition's handle is returned.
    pub fn define_metric(
        &self,
        name: &str,
        description: &str,
        unit: &str,
        value_type: MetricValueType,
    ) -> Result<MetricHandle> {
        let name_handle = self.new_string(name)?;
        let description = self.new_string(description)?;
        let unit = self.new_string(unit)?;
        let definition = MetricDef {
            name: name_handle,
            description,
            unit,
            value_type,
        };
        if self.is_closed() {
            return Err(Error::new(ErrorKind::DefinitionsClosed));
        }
        let mut metrics = self.metrics.lock();
        if metrics.find(&definition).is_none() {
            let same_name = metrics
                .iter()
                .find(|(_, existing)| existing.name == name_handle)
                .map(|(handle, _)| handle);
            if let Some(existing) = same_name {
                Error::new(ErrorKind::DuplicateMetric)
                    .with_message(format!(
                        "metric \"{name}\" was already defined with different properties"
                    ))
                    .report();
                return Ok(existing);
            }
        }
        metrics.intern(definition).map(|(handle, _)| handle)
    }

    /// Interns a communicator.
    pub fn define_communicator(
        &self,
        name: &str,
        group: GroupHandle,
        parent: Option<CommunicatorHandle>,
        paradigm: Paradigm,
    ) -> Result<CommunicatorHandle> {
        let name = self.new_string(name)?;
        self.intern(CommunicatorDef {
            name,
            group,
            parent,
            paradigm,
        })
    }

    /// Interns an RMA window.
    pub fn define_rma_window(
        &self,
        name: &str,
        communicator: CommunicatorHandle,
    ) -> Result<RmaWindowHandle> {
        let name = self.new_string(name)?;
        self.intern(RmaWindowDef { name, communicator })
    }

    /// Interns a location.
    pub fn define_location(
        &self,
        global_id: u64,
        name: &str,
        location_type: LocationType,
        paradigm: Paradigm,
        location_group: u32,
    ) -> Result<LocationHandle> {
        let name = self.new_string(name)?;
        self.intern(LocationDef {
            global_id,
            name,
            location_type,
            paradigm,
            location_group,
        })
    }

    /// Interns a location group.
    pub fn define_location_group(
        &self,
        global_id: u32,
        name: &str,
        group_type: LocationGroupType,
    ) -> Result<LocationGroupHandle> {
        let name = self.new_string(name)?;
        self.intern(LocationGroupDef {
            global_id,
            name,
            group_type,
        })
    }

    // =====================================================================
    // Unification support
    // =====================================================================

    /// The unified counterpart of a local handle, once set.
    #[must_use]
    pub fn unified<D: Definition>(&self, handle: Handle<D>) -> Option<Handle<D>> {
        D::table(self).lock().unified(handle)
    }

    /// Copies every definition of kind `D` into `unified`, in sequence
    /// order, and records the unified handles as back-references.
    pub fn copy_to_unified<D: Definition>(&self, unified: &Self) -> Result<()> {
        let pending: Vec<(Handle<D>, D)> = D::table(self)
            .lock()
            .iter()
            .map(|(handle, definition)| (handle, definition.clone()))
            .collect();
        let resolver = UnifiedResolver { source: self };
        for (local, definition) in pending {
            let unified_handle = unified.copy_one(&definition, &resolver)?;
            D::table(self).lock().set_unified(local, unified_handle)?;
        }
        Ok(())
    }

    /// Interns one local definition into this (unified) manager.
    ///
    /// The unified manager is never closed while copying.
    fn copy_one<D: Definition>(&self, local: &D, resolver: &UnifiedResolver<'_>) -> Result<Handle<D>> {
        let remapped = local.to_unified(resolver)?;
        D::table(self).lock().intern(remapped).map(|(handle, _)| handle)
    }

    /// Copies a single definition kind by tag.
    pub fn copy_kind_to_unified(&self, kind: DefinitionKind, unified: &Self) -> Result<()> {
        match kind {
            DefinitionKind::String => self.copy_to_unified::<StringDef>(unified),
            DefinitionKind::SourceFile => self.copy_to_unified::<SourceFileDef>(unified),
            DefinitionKind::Region => self.copy_to_unified::<RegionDef>(unified),
            DefinitionKind::Attribute => self.copy_to_unified::<AttributeDef>(unified),
            DefinitionKind::Group => self.copy_to_unified::<GroupDef>(unified),
            DefinitionKind::Parameter => self.copy_to_unified::<ParameterDef>(unified),
            DefinitionKind::Metric => self.copy_to_unified::<MetricDef>(unified),
            DefinitionKind::Communicator => self.copy_to_unified::<CommunicatorDef>(unified),
            DefinitionKind::RmaWindow => self.copy_to_unified::<RmaWindowDef>(unified),
            DefinitionKind::Location => self.copy_to_unified::<LocationDef>(unified),
            DefinitionKind::LocationGroup => self.copy_to_unified::<LocationGroupDef>(unified),
        }
    }

    /// Copies all kinds in dependency order.
    pub fn copy_all_to_unified(&self, unified: &Self) -> Result<()> {
        for kind in DefinitionKind::UNIFY_ORDER {
            self.copy_kind_to_unified(kind, unified)?;
        }
        Ok(())
    }

    /// True if every definition of every kind has a unified counterpart.
    #[must_use]
    pub fn is_fully_unified(&self) -> bool {
        self.strings.lock().is_fully_unified()
            && self.source_files.lock().is_fully_unified()
            && self.regions.lock().is_fully_unified()
            && self.attributes.lock().is_fully_unified()
            && self.groups.lock().is_fully_unified()
            && self.parameters.lock().is_fully_unified()
            && self.metrics.lock().is_fully_unified()
            && self.communicators.lock().is_fully_unified()
            && self.rma_windows.lock().is_fully_unified()
            && self.locations.lock().is_fully_unified()
            && self.location_groups.lock().is_fully_unified()
    }

    /// Builds the local→unified mapping tables of every kind.
    pub fn mappings(&self) -> Result<DefinitionMappings> {
        Ok(DefinitionMappings {
            strings: self.strings.lock().mapping()?,
            source_files: self.source_files.lock().mapping()?,
            regions: self.regions.lock().mapping()?,
            attributes: self.attributes.lock().mapping()?,
            groups: self.groups.lock().mapping()?,
            parameters: self.parameters.lock().mapping()?,
            metrics: self.metrics.lock().mapping()?,
            communicators: self.communicators.lock().mapping()?,
            rma_windows: self.rma_windows.lock().mapping()?,
            locations: self.locations.lock().mapping()?,
            location_groups: self.location_groups.lock().mapping()?,
        })
    }

    fn apply<D: Definition>(&self, mapping: &[u32]) -> Result<()> {
        let mut table = D::table(self).lock();
        if mapping.len() != table.len() {
            return Err(Error::new(ErrorKind::IpcFailed).with_message(format!(
                "{} mapping has {} entries for {} definitions",
                D::KIND,
                mapping.len(),
                table.len()
            )));
        }
        for (id, unified) in mapping.iter().enumerate() {
            table.set_unified(Handle::from_raw(id as u32), Handle::from_raw(*unified))?;
        }
        Ok(())
    }

    /// Sets every back-reference from mapping tables computed elsewhere.
    ///
    /// Used by processes whose definitions were unified remotely.
    pub fn apply_mappings(&self, mappings: &DefinitionMappings) -> Result<()> {
        self.apply::<StringDef>(&mappings.strings)?;
        self.apply::<SourceFileDef>(&mappings.source_files)?;
        self.apply::<RegionDef>(&mappings.regions)?;
        self.apply::<AttributeDef>(&mappings.attributes)?;
        self.apply::<GroupDef>(&mappings.groups)?;
        self.apply::<ParameterDef>(&mappings.parameters)?;
        self.apply::<MetricDef>(&mappings.metrics)?;
        self.apply::<CommunicatorDef>(&mappings.communicators)?;
        self.apply::<RmaWindowDef>(&mappings.rma_windows)?;
        self.apply::<LocationDef>(&mappings.locations)?;
        self.apply::<LocationGroupDef>(&mappings.location_groups)
    }

    // =====================================================================
    // Snapshots
    // =====================================================================

    fn collect<D: Definition>(&self) -> Vec<D> {
        D::table(self).lock().iter().map(|(_, d)| d.clone()).collect()
    }

    /// Copies all definitions out in sequence order.
    #[must_use]
    pub fn snapshot(&self) -> DefinitionSnapshot {
        DefinitionSnapshot {
            strings: self.collect(),
            source_files: self.collect(),
            regions: self.collect(),
            attributes: self.collect(),
            groups: self.collect(),
            parameters: self.collect(),
            metrics: self.collect(),
            communicators: self.collect(),
            rma_windows: self.collect(),
            locations: self.collect(),
            location_groups: self.collect(),
        }
    }

    fn restore<D: Definition>(&self, definitions: &[D]) -> Result<()> {
        let mut table = D::table(self).lock();
        for (position, definition) in definitions.iter().enumerate() {
            let (handle, _) = table.intern(definition.clone())?;
            if handle.index() != position {
                return Err(Error::new(ErrorKind::ArchiveFormat).with_message(format!(
                    "{} snapshot is not deduplicated at position {position}",
                    D::KIND
                )));
            }
        }
        Ok(())
    }

    /// Rebuilds a manager from a snapshot, preserving every sequence number.
    pub fn from_snapshot(snapshot: &DefinitionSnapshot) -> Result<Self> {
        let manager = Self::new();
        let strings = snapshot.strings.get(1..).unwrap_or_default();
        if snapshot.strings.first().map(StringDef::value) != Some("") {
            return Err(Error::new(ErrorKind::ArchiveFormat)
                .with_message("snapshot does not start with the empty string"));
        }
        {
            let mut table = manager.strings.lock();
            for (offset, definition) in strings.iter().enumerate() {
                let (handle, _) = table.intern(definition.clone())?;
                if handle.index() != offset + 1 {
                    return Err(Error::new(ErrorKind::ArchiveFormat)
                        .with_message("string snapshot is not deduplicated"));
                }
            }
        }
        manager.restore(&snapshot.source_files)?;
        manager.restore(&snapshot.regions)?;
        manager.restore(&snapshot.attributes)?;
        manager.restore(&snapshot.groups)?;
        manager.restore(&snapshot.parameters)?;
        manager.restore(&snapshot.metrics)?;
        manager.restore(&snapshot.communicators)?;
        manager.restore(&snapshot.rma_windows)?;
        manager.restore(&snapshot.locations)?;
        manager.restore(&snapshot.location_groups)?;
        Ok(manager)
    }
}
