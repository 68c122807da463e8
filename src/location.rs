//! Locations: independent streams of execution.
//!
//! A [`Location`] is shared (`Arc`) between the thread that executes on it,
//! the thread model that tracks ancestry, and finalization. The state the
//! hot path mutates is parked in the location while no thread executes it
//! and checked out by the thread that does; the parked slot is type-erased
//! so the location does not know what the measurement keeps there.
//!
//! Per-subsystem state lives in [`LocationData`], numbered slots of
//! type-erased boxes behind a per-location mutex. Subsystem `n` owns slot
//! `n`.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::definitions::{DefinitionManager, LocationHandle};
use crate::error::{Error, ErrorContext, ErrorKind, Result};
use crate::types::{LocationType, Paradigm};

/// Type-erased per-subsystem state of one location.
#[derive(Default)]
pub struct LocationData {
    slots: Vec<Option<Box<dyn Any + Send>>>,
}

impl fmt::Debug for LocationData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationData")
            .field("slots", &self.slots.iter().map(Option::is_some).collect::<Vec<_>>())
            .finish()
    }
}

impl LocationData {
    /// Stores `value` in `slot`, replacing what was there.
    pub fn set_slot<T: Any + Send>(&mut self, slot: usize, value: T) {
        if self.slots.len() <= slot {
            self.slots.resize_with(slot + 1, || None);
        }
        self.slots[slot] = Some(Box::new(value));
    }

    /// The value in `slot`, if it has type `T`.
    #[must_use]
    pub fn slot<T: Any>(&self, slot: usize) -> Option<&T> {
        self.slots.get(slot)?.as_ref()?.downcast_ref()
    }

    /// The value in `slot` mutably, if it has type `T`.
    pub fn slot_mut<T: Any>(&mut self, slot: usize) -> Option<&mut T> {
        self.slots.get_mut(slot)?.as_mut()?.downcast_mut()
    }

    /// Removes and returns the value in `slot`.
    pub fn take_slot<T: Any>(&mut self, slot: usize) -> Option<T> {
        let entry = self.slots.get_mut(slot)?;
        match entry.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                *entry = Some(other);
                None
            }
        }
    }

    /// Two distinct slots mutably at once.
    pub fn pair_mut<A: Any, B: Any>(&mut self, a: usize, b: usize) -> Option<(&mut A, &mut B)> {
        if a == b {
            return None;
        }
        let (low, high) = (a.min(b), a.max(b));
        if high >= self.slots.len() {
            return None;
        }
        let (head, tail) = self.slots.split_at_mut(high);
        let low_slot = head[low].as_mut()?;
        let high_slot = tail[0].as_mut()?;
        if a < b {
            Some((low_slot.downcast_mut()?, high_slot.downcast_mut()?))
        } else {
            Some((high_slot.downcast_mut()?, low_slot.downcast_mut()?))
        }
    }
}

/// One measured stream of execution.
pub struct Location {
    id: u32,
    global_id: u64,
    rank: u32,
    name: String,
    location_type: LocationType,
    paradigm: Paradigm,
    parent: Option<u32>,
    definition: LocationHandle,
    last_timestamp: AtomicU64,
    data: Mutex<LocationData>,
    parked: Mutex<Option<Box<dyn Any + Send>>>,
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Location")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("location_type", &self.location_type)
            .field("paradigm", &self.paradigm)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

impl Location {
    /// Process-local id, dense from 0.
    #[must_use]
    pub const fn id(&self) -> u32 {
        self.id
    }

    /// Globally unique id: local id in the high word, rank in the low word.
    #[must_use]
    pub const fn global_id(&self) -> u64 {
        self.global_id
    }

    /// Rank of the owning process.
    #[must_use]
    pub const fn rank(&self) -> u32 {
        self.rank
    }

    /// Display name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of execution stream.
    #[must_use]
    pub const fn location_type(&self) -> LocationType {
        self.location_type
    }

    /// Paradigm that created the location.
    #[must_use]
    pub const fn paradigm(&self) -> Paradigm {
        self.paradigm
    }

    /// Id of the location this one was created from.
    #[must_use]
    pub const fn parent(&self) -> Option<u32> {
        self.parent
    }

    /// The local definition describing this location.
    #[must_use]
    pub const fn definition(&self) -> LocationHandle {
        self.definition
    }

    /// Locks the per-location data.
    pub fn data(&self) -> MutexGuard<'_, LocationData> {
        self.data.lock()
    }

    /// Stores the location's recording state while no thread executes it.
    pub fn park(&self, state: Box<dyn Any + Send>) {
        *self.parked.lock() = Some(state);
    }

    /// Takes the parked recording state. `None` while a thread holds it.
    pub fn unpark(&self) -> Option<Box<dyn Any + Send>> {
        self.parked.lock().take()
    }

    /// Context for errors raised on this location.
    #[must_use]
    pub const fn error_context(&self) -> ErrorContext {
        ErrorContext::at(self.rank, self.id)
    }

    /// The last timestamp recorded on this location.
    #[must_use]
    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp.load(Ordering::Acquire)
    }

    /// Records `timestamp` as the newest on this location.
    ///
    /// A timestamp older than the previous one is a fatal
    /// [`ErrorKind::TimestampOrder`].
    pub fn check_timestamp(&self, timestamp: u64) -> Result<()> {
        let previous = self.last_timestamp.fetch_max(timestamp, Ordering::AcqRel);
        if timestamp < previous {
            return Err(Error::new(ErrorKind::TimestampOrder)
                .with_message(format!(
                    "timestamp {timestamp} precedes {previous} on location \"{}\"",
                    self.name
                ))
                .with_context(self.error_context()));
        }
        Ok(())
    }
}

/// All locations of a process in creation order.
#[derive(Debug)]
pub struct LocationRegistry {
    rank: u32,
    locations: Mutex<Vec<Arc<Location>>>,
}

impl LocationRegistry {
    /// An empty registry for the process with `rank`.
    #[must_use]
    pub fn new(rank: u32) -> Self {
        Self {
            rank,
            locations: Mutex::new(Vec::new()),
        }
    }

    /// Creates a location and defines it in `definitions`.
    ///
    /// The location belongs to the process location group whose id is the
    /// rank.
    pub fn create(
        &self,
        definitions: &DefinitionManager,
        name: &str,
        location_type: LocationType,
        paradigm: Paradigm,
        parent: Option<u32>,
    ) -> Result<Arc<Location>> {
        let mut locations = self.locations.lock();
        let id = u32::try_from(locations.len())
            .map_err(|_| Error::internal("location id space exhausted"))?;
        let global_id = (u64::from(id) << 32) | u64::from(self.rank);
        let definition =
            definitions.define_location(global_id, name, location_type, paradigm, self.rank)?;
        let location = Arc::new(Location {
            id,
            global_id,
            rank: self.rank,
            name: name.to_owned(),
            location_type,
            paradigm,
            parent,
            definition,
            last_timestamp: AtomicU64::new(0),
            data: Mutex::new(LocationData::default()),
            parked: Mutex::new(None),
        });
        locations.push(Arc::clone(&location));
        Ok(location)
    }

    /// Looks up a location by local id.
    #[must_use]
    pub fn get(&self, id: u32) -> Option<Arc<Location>> {
        self.locations.lock().get(id as usize).cloned()
    }

    /// All locations in creation order.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<Location>> {
        self.locations.lock().clone()
    }

    /// Number of locations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locations.lock().len()
    }

    /// True before the first location is created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The owning rank.
    #[must_use]
    pub const fn rank(&self) -> u32 {
        self.rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::LocationDef;

    fn registry() -> (LocationRegistry, DefinitionManager) {
        (LocationRegistry::new(3), DefinitionManager::new())
    }

    #[test]
    fn ids_are_dense_and_global_ids_carry_rank() {
        let (registry, defs) = registry();
        let main = registry
            .create(&defs, "Master thread", LocationType::CpuThread, Paradigm::Measurement, None)
            .unwrap();
        let worker = registry
            .create(&defs, "Pthread thread 1", LocationType::CpuThread, Paradigm::Pthread, Some(0))
            .unwrap();
        assert_eq!(main.id(), 0);
        assert_eq!(worker.id(), 1);
        assert_eq!(worker.global_id(), (1 << 32) | 3);
        assert_eq!(worker.parent(), Some(0));
        assert_eq!(defs.count::<LocationDef>(), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn timestamps_must_not_go_back() {
        let (registry, defs) = registry();
        let loc = registry
            .create(&defs, "main", LocationType::CpuThread, Paradigm::Measurement, None)
            .unwrap();
        loc.check_timestamp(10).unwrap();
        loc.check_timestamp(10).unwrap();
        let err = loc.check_timestamp(9).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimestampOrder);
        assert!(err.is_fatal());
        assert_eq!(err.context().rank, Some(3));
        assert_eq!(loc.last_timestamp(), 10);
    }

    #[test]
    fn slots_are_typed() {
        let mut data = LocationData::default();
        data.set_slot(1, 7_u32);
        data.set_slot(0, String::from("stack"));
        assert_eq!(data.slot::<u32>(1), Some(&7));
        assert!(data.slot::<u64>(1).is_none());
        assert!(data.slot::<u32>(2).is_none());

        let (s, n) = data.pair_mut::<String, u32>(0, 1).unwrap();
        s.push('!');
        *n += 1;
        let (n, s) = data.pair_mut::<u32, String>(1, 0).unwrap();
        assert_eq!((*n, s.as_str()), (8, "stack!"));

        assert!(data.take_slot::<u64>(0).is_none());
        assert_eq!(data.take_slot::<String>(0).as_deref(), Some("stack!"));
        assert!(data.slot::<String>(0).is_none());
    }

    #[test]
    fn parked_state_is_taken_once() {
        let (registry, defs) = registry();
        let loc = registry
            .create(&defs, "main", LocationType::CpuThread, Paradigm::Measurement, None)
            .unwrap();
        assert!(loc.unpark().is_none());
        loc.park(Box::new(5_u8));
        let state = loc.unpark().unwrap();
        assert_eq!(state.downcast_ref::<u8>(), Some(&5));
        assert!(loc.unpark().is_none());
    }
}
