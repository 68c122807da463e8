//! Paged storage and hash lookup for one definition kind.

use std::hash::Hasher;

use super::{Definition, Handle};
use crate::error::{Error, ErrorKind, Result};
use crate::util::DetHasher;

/// Entries per storage page. Pages are allocated whole and never move.
pub const ENTRIES_PER_PAGE: usize = 256;

/// Highest sequence number a table hands out; the values above are reserved
/// for sentinels such as [`Handle::INVALID`].
const MAX_ENTRIES: u32 = u32::MAX - 16;

#[derive(Debug)]
struct Entry<D> {
    definition: D,
    hash: u64,
    next_in_bucket: Option<u32>,
    unified: Option<u32>,
}

/// Append-only table of one definition kind.
///
/// The sequence number of an entry is its position in insertion order.
/// Buckets hold the head of a chain of candidate entries with the same hash
/// slot; lookup walks the chain comparing hash first and then all fields.
#[derive(Debug)]
pub struct DefinitionTable<D> {
    pages: Vec<Vec<Entry<D>>>,
    buckets: Box<[Option<u32>]>,
    len: u32,
}

fn hash_of<D: Definition>(definition: &D) -> u64 {
    let mut hasher = DetHasher::default();
    definition.hash_fields(&mut hasher);
    hasher.finish()
}

impl<D: Definition> DefinitionTable<D> {
    /// Creates an empty table with `buckets` hash slots (rounded up to a
    /// power of two).
    #[must_use]
    pub fn with_buckets(buckets: usize) -> Self {
        let buckets = buckets.max(1).next_power_of_two();
        Self {
            pages: Vec::new(),
            buckets: vec![None; buckets].into_boxed_slice(),
            len: 0,
        }
    }

    /// Number of definitions stored.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// True if the table holds no definitions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_of(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn entry(&self, id: u32) -> Option<&Entry<D>> {
        let id = id as usize;
        self.pages
            .get(id / ENTRIES_PER_PAGE)
            .and_then(|page| page.get(id % ENTRIES_PER_PAGE))
    }

    fn entry_mut(&mut self, id: u32) -> Option<&mut Entry<D>> {
        let id = id as usize;
        self.pages
            .get_mut(id / ENTRIES_PER_PAGE)
            .and_then(|page| page.get_mut(id % ENTRIES_PER_PAGE))
    }

    fn find_hashed(&self, definition: &D, hash: u64) -> Option<u32> {
        let mut cursor = self.buckets[self.bucket_of(hash)];
        while let Some(id) = cursor {
            let entry = self.entry(id)?;
            if entry.hash == hash && entry.definition.same_as(definition) {
                return Some(id);
            }
            cursor = entry.next_in_bucket;
        }
        None
    }

    /// Looks up an equal definition without inserting.
    #[must_use]
    pub fn find(&self, definition: &D) -> Option<Handle<D>> {
        self.find_hashed(definition, hash_of(definition))
            .map(Handle::from_raw)
    }

    /// Returns the handle of an equal definition, inserting `definition` if
    /// there is none. The flag is true if a new entry was appended.
    pub fn intern(&mut self, definition: D) -> Result<(Handle<D>, bool)> {
        let hash = hash_of(&definition);
        if let Some(id) = self.find_hashed(&definition, hash) {
            return Ok((Handle::from_raw(id), false));
        }
        if self.len >= MAX_ENTRIES {
            return Err(Error::new(ErrorKind::Internal)
                .with_message(format!("{} table is full", D::KIND)));
        }

        let id = self.len;
        let bucket = self.bucket_of(hash);
        if self
            .pages
            .last()
            .map_or(true, |page| page.len() == ENTRIES_PER_PAGE)
        {
            self.pages.push(Vec::with_capacity(ENTRIES_PER_PAGE));
        }
        let page = self
            .pages
            .last_mut()
            .ok_or_else(|| Error::internal("definition page missing"))?;
        page.push(Entry {
            definition,
            hash,
            next_in_bucket: self.buckets[bucket],
            unified: None,
        });
        self.buckets[bucket] = Some(id);
        self.len += 1;
        Ok((Handle::from_raw(id), true))
    }

    /// Returns the definition behind `handle`.
    #[must_use]
    pub fn get(&self, handle: Handle<D>) -> Option<&D> {
        self.entry(handle.id()).map(|entry| &entry.definition)
    }

    /// Iterates over all definitions in sequence order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle<D>, &D)> {
        self.pages
            .iter()
            .flatten()
            .enumerate()
            .map(|(id, entry)| (Handle::from_raw(id as u32), &entry.definition))
    }

    /// Returns the unified counterpart of `handle`, once set.
    #[must_use]
    pub fn unified(&self, handle: Handle<D>) -> Option<Handle<D>> {
        self.entry(handle.id())
            .and_then(|entry| entry.unified)
            .map(Handle::from_raw)
    }

    /// Records the unified counterpart of `handle`.
    ///
    /// The back-reference is written exactly once.
    pub fn set_unified(&mut self, handle: Handle<D>, unified: Handle<D>) -> Result<()> {
        let entry = self.entry_mut(handle.id()).ok_or_else(|| {
            Error::new(ErrorKind::InvalidHandle).with_message(format!("{} {handle}", D::KIND))
        })?;
        if let Some(previous) = entry.unified {
            return Err(Error::new(ErrorKind::UnifiedAlreadySet).with_message(format!(
                "{} {handle} already unified to {previous}",
                D::KIND
            )));
        }
        entry.unified = Some(unified.id());
        Ok(())
    }

    /// True if every entry has a unified counterpart.
    #[must_use]
    pub fn is_fully_unified(&self) -> bool {
        self.pages.iter().flatten().all(|entry| entry.unified.is_some())
    }

    /// The local→unified translation array, indexed by sequence number.
    pub fn mapping(&self) -> Result<Vec<u32>> {
        self.pages
            .iter()
            .flatten()
            .enumerate()
            .map(|(id, entry)| {
                entry.unified.ok_or_else(|| {
                    Error::new(ErrorKind::NotUnified)
                        .with_message(format!("{} {id} has no unified counterpart", D::KIND))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::kinds::StringDef;

    fn s(value: &str) -> StringDef {
        StringDef::new(value)
    }

    #[test]
    fn duplicate_returns_first_handle() {
        let mut table = DefinitionTable::with_buckets(8);
        let (a, inserted_a) = table.intern(s("main")).unwrap();
        let (b, inserted_b) = table.intern(s("main")).unwrap();
        assert!(inserted_a);
        assert!(!inserted_b);
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn sequence_numbers_follow_insertion_order() {
        let mut table = DefinitionTable::with_buckets(2);
        let handles: Vec<_> = ["a", "b", "c", "b", "d"]
            .iter()
            .map(|v| table.intern(s(v)).unwrap().0.id())
            .collect();
        assert_eq!(handles, vec![0, 1, 2, 1, 3]);
        let values: Vec<_> = table.iter().map(|(_, d)| d.value().to_owned()).collect();
        assert_eq!(values, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn entries_span_pages() {
        let mut table = DefinitionTable::with_buckets(16);
        for i in 0..(ENTRIES_PER_PAGE * 2 + 3) {
            table.intern(s(&format!("name{i}"))).unwrap();
        }
        let last = Handle::from_raw((ENTRIES_PER_PAGE * 2 + 2) as u32);
        assert_eq!(table.get(last).unwrap().value(), "name514");
        assert_eq!(
            table.find(&s("name300")),
            Some(Handle::from_raw(300))
        );
    }

    #[test]
    fn unified_is_set_once() {
        let mut table = DefinitionTable::with_buckets(4);
        let (h, _) = table.intern(s("x")).unwrap();
        assert!(table.mapping().is_err());
        table.set_unified(h, Handle::from_raw(7)).unwrap();
        let err = table.set_unified(h, Handle::from_raw(8)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnifiedAlreadySet);
        assert_eq!(table.unified(h), Some(Handle::from_raw(7)));
        assert_eq!(table.mapping().unwrap(), vec![7]);
        assert!(table.is_fully_unified());
    }
}
