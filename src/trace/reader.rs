//! Reading an archive back.
//!
//! The reader loads the anchor and the unified definitions eagerly; event
//! and local definition files are decoded on request. Event records keep
//! their local handles, [`ArchiveReader::unified_region`] and
//! [`ArchiveReader::region_name`] translate them.

use std::sync::Arc;

use super::archive::{
    event_file, local_defs_file, Anchor, FileSubstrate, GlobalDefinitions, LocalDefinitions,
    ANCHOR_FILE, GLOBAL_DEFS_FILE,
};
use super::event::{EventRecord, TraceEvent};
use super::file::{decode_frames, decode_records, ArchiveError, FileHeader, HEADER_SIZE};
use super::flush::FileType;
use crate::definitions::{DefinitionManager, RegionDef, RegionHandle};
use crate::error::{Error, ErrorKind, Result};

/// Reader side of an archive.
#[derive(Debug)]
pub struct ArchiveReader {
    substrate: Arc<dyn FileSubstrate>,
    anchor: Anchor,
    global: GlobalDefinitions,
    definitions: DefinitionManager,
}

impl ArchiveReader {
    /// Opens a closed archive.
    pub fn open(substrate: Arc<dyn FileSubstrate>) -> Result<Self> {
        if !substrate.exists(ANCHOR_FILE) {
            return Err(ArchiveError::Missing(ANCHOR_FILE.to_string()).into());
        }
        let json = substrate.read(ANCHOR_FILE).map_err(ArchiveError::from)?;
        let anchor: Anchor = serde_json::from_slice(&json).map_err(ArchiveError::from)?;
        let mut globals: Vec<GlobalDefinitions> =
            read_records(substrate.as_ref(), GLOBAL_DEFS_FILE, FileType::GlobalDefs)?;
        let global = globals.pop().ok_or_else(|| {
            Error::new(ErrorKind::ArchiveFormat).with_message("empty global definition file")
        })?;
        let definitions = DefinitionManager::from_snapshot(&global.definitions)?;
        Ok(Self {
            substrate,
            anchor,
            global,
            definitions,
        })
    }

    /// The anchor.
    #[must_use]
    pub const fn anchor(&self) -> &Anchor {
        &self.anchor
    }

    /// The global definition file.
    #[must_use]
    pub const fn global_definitions(&self) -> &GlobalDefinitions {
        &self.global
    }

    /// The unified definitions as a queryable manager.
    #[must_use]
    pub const fn definitions(&self) -> &DefinitionManager {
        &self.definitions
    }

    /// Global ids of all locations, in anchor order.
    #[must_use]
    pub fn locations(&self) -> Vec<u64> {
        self.anchor
            .locations
            .iter()
            .map(|location| location.global_id)
            .collect()
    }

    /// Every record of a location's event file.
    pub fn events(&self, location: u64) -> Result<Vec<EventRecord>> {
        read_records(self.substrate.as_ref(), &event_file(location), FileType::Events)
    }

    /// The local definition file of a location.
    pub fn local_definitions(&self, location: u64) -> Result<LocalDefinitions> {
        let mut records: Vec<LocalDefinitions> = read_records(
            self.substrate.as_ref(),
            &local_defs_file(location),
            FileType::LocalDefs,
        )?;
        records.pop().ok_or_else(|| {
            Error::new(ErrorKind::ArchiveFormat)
                .with_message(format!("empty local definition file for location {location}"))
        })
    }

    /// The unified handle of a region recorded by `location`.
    pub fn unified_region(&self, location: u64, region: RegionHandle) -> Result<RegionHandle> {
        self.local_definitions(location)?
            .mappings
            .map(region)
            .ok_or_else(|| Error::new(ErrorKind::InvalidHandle).with_message(format!("{region}")))
    }

    /// Name of a region recorded by `location`.
    pub fn region_name(&self, location: u64, region: RegionHandle) -> Result<String> {
        let unified = self.unified_region(location, region)?;
        self.definitions
            .with(unified, |def: &RegionDef| def.name)
            .and_then(|name| self.definitions.string(name))
            .ok_or_else(|| Error::new(ErrorKind::InvalidHandle).with_message(format!("{unified}")))
    }

    /// Enter and leave events of a location as `("enter" | "leave", name)`.
    pub fn region_events(&self, location: u64) -> Result<Vec<(&'static str, String)>> {
        let mut out = Vec::new();
        for record in self.events(location)? {
            match record.event {
                TraceEvent::Enter { region } => out.push(("enter", self.region_name(location, region)?)),
                TraceEvent::Leave { region } => out.push(("leave", self.region_name(location, region)?)),
                _ => {}
            }
        }
        Ok(out)
    }
}

fn read_records<T: serde::de::DeserializeOwned>(
    substrate: &dyn FileSubstrate,
    name: &str,
    expected: FileType,
) -> Result<Vec<T>> {
    if !substrate.exists(name) {
        return Err(ArchiveError::Missing(name.to_string()).into());
    }
    let bytes = substrate.read(name).map_err(ArchiveError::from)?;
    let header = FileHeader::decode(&bytes)?;
    if header.file_type != expected {
        return Err(Error::new(ErrorKind::ArchiveFormat).with_message(format!(
            "{name} holds {:?}, expected {expected:?}",
            header.file_type
        )));
    }
    let chunks = decode_frames(&bytes[HEADER_SIZE..], header.compression)?;
    if expected == FileType::Events {
        let mut records = Vec::new();
        for chunk in &chunks {
            records.extend(decode_records(chunk)?);
        }
        Ok(records)
    } else {
        // Definition records may span frames.
        decode_records(&chunks.concat())
    }
}
