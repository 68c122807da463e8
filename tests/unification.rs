//! Cross-process unification tests.
//!
//! Ranks are simulated with an in-process [`LocalGroup`]; each rank runs on
//! its own thread with its own measurement and definition manager.

#[macro_use]
mod common;

use std::sync::Arc;
use std::thread;

use common::*;
use hpctrace::definitions::{
    DefinitionKind, DefinitionManager, DefinitionMappings, RegionDef, SourceFileDef,
};
use hpctrace::unify::{unify, unify_locally};
use hpctrace::{ArchiveReader, ErrorKind, LocalGroup, MemorySubstrate, RegionHandle, RegionInfo};

fn define_foo_bar(definitions: &DefinitionManager, bar_first: bool) -> (RegionHandle, RegionHandle) {
    let file = definitions.new_source_file("file.c").unwrap();
    let foo = RegionInfo::new("foo").with_location(file, 10, 20);
    let bar = RegionInfo::new("bar").with_location(file, 30, 40);
    if bar_first {
        let bar = definitions.define_region(&bar).unwrap();
        (definitions.define_region(&foo).unwrap(), bar)
    } else {
        let foo = definitions.define_region(&foo).unwrap();
        (foo, definitions.define_region(&bar).unwrap())
    }
}

#[test]
fn three_ranks_share_foo_and_bar() {
    test_phase!("three_ranks_share_foo_and_bar");
    let substrate = MemorySubstrate::new();

    let results = run_ranks(3, &substrate, |m| {
        let (foo, bar) = define_foo_bar(m.definitions(), m.rank() == 1);
        m.enter_region(foo).unwrap();
        m.enter_region(bar).unwrap();
        m.exit_region(bar).unwrap();
        m.exit_region(foo).unwrap();
        let summary = m.finalize().unwrap();
        assert!(m.definitions().is_fully_unified());
        (foo, bar, summary)
    });

    let unified = results[0].2.unification.unified().expect("rank 0 holds the unified table");
    assert_eq!(unified.count::<RegionDef>(), 2);
    assert_eq!(unified.count::<SourceFileDef>(), 1);
    assert!(results[1].2.unification.unified().is_none());

    let mapped: Vec<(RegionHandle, RegionHandle)> = results
        .iter()
        .map(|(foo, bar, summary)| {
            let mappings = summary.unification.mappings();
            (mappings.map(*foo).unwrap(), mappings.map(*bar).unwrap())
        })
        .collect();
    assert!(mapped.windows(2).all(|pair| pair[0] == pair[1]));
    assert_ne!(mapped[0].0, mapped[0].1);

    // Rank 1 defined bar first, so its local numbering differs.
    assert_eq!(results[0].0, results[1].1);
    assert!(results.iter().all(|(_, _, s)| s.epoch == results[0].2.epoch));

    let reader = ArchiveReader::open(as_substrate(&substrate)).unwrap();
    assert_eq!(reader.anchor().rank_count, 3);
    assert_eq!(reader.locations().len(), 3);
    for location in reader.locations() {
        let names: Vec<_> = reader
            .region_events(location)
            .unwrap()
            .into_iter()
            .map(|(kind, name)| format!("{kind} {name}"))
            .collect();
        assert_eq!(names, ["enter foo", "enter bar", "leave bar", "leave foo"]);
    }
    test_complete!("three_ranks_share_foo_and_bar");
}

fn unify_group(size: u32) -> Vec<DefinitionMappings> {
    let members = LocalGroup::new(size);
    thread::scope(|s| {
        let handles: Vec<_> = members
            .into_iter()
            .map(|member| {
                s.spawn(move || {
                    let definitions = DefinitionManager::new();
                    let rank = hpctrace::Ipc::rank(&member);
                    define_foo_bar(&definitions, rank % 2 == 1);
                    definitions
                        .define_region(&RegionInfo::new(&format!("only_on_{rank}")))
                        .unwrap();
                    unify(&member, &definitions).unwrap().mappings().clone()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn unification_is_reproducible() {
    init_test_logging();
    test_phase!("unification_is_reproducible");
    let first = unify_group(4);
    let second = unify_group(4);
    assert_eq!(first, second);
    test_complete!("unification_is_reproducible", ranks = first.len());
}

#[test]
fn local_unification_closes_every_handle() {
    init_test_logging();
    let definitions = DefinitionManager::new();
    let (foo, bar) = define_foo_bar(&definitions, false);
    let unified = unify_locally(&definitions).unwrap();
    assert!(definitions.is_fully_unified());
    assert!(definitions.unified(foo).is_some());
    assert!(definitions.unified(bar).is_some());
    assert_eq!(unified.count::<RegionDef>(), 2);
}

#[test]
fn copying_before_dependencies_is_fatal() {
    init_test_logging();
    let definitions = DefinitionManager::new();
    define_foo_bar(&definitions, false);
    let unified = Arc::new(DefinitionManager::new());

    // Regions reference strings and source files that are not unified yet.
    let err = definitions
        .copy_kind_to_unified(DefinitionKind::Region, &unified)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnifyOrder);
    assert!(err.is_fatal());
}
