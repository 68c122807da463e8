//! Definition interning properties.

#[macro_use]
mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use common::*;
use hpctrace::definitions::{DefinitionManager, MetricDef, RegionDef, StringDef};
use hpctrace::{ErrorKind, MetricValueType, RegionHandle, RegionInfo};
use proptest::prelude::*;

fn region_strategy() -> impl Strategy<Value = (String, u32, u32)> {
    ("[a-z_]{1,8}", 0u32..50, 0u32..50)
}

proptest! {
    #![proptest_config(test_proptest_config(128))]

    #[test]
    fn interning_is_idempotent(regions in prop::collection::vec(region_strategy(), 1..40)) {
        let definitions = DefinitionManager::new();
        let file = definitions.new_source_file("kernel.c").unwrap();
        let mut seen = HashSet::new();
        for (name, begin, end) in &regions {
            let info = RegionInfo::new(name).with_location(file, *begin, *end);
            let before = definitions.count::<RegionDef>();
            let first = definitions.define_region(&info).unwrap();
            let second = definitions.define_region(&info).unwrap();
            prop_assert_eq!(first, second);
            let added = definitions.count::<RegionDef>() - before;
            if seen.insert((name.clone(), *begin, *end)) {
                prop_assert_eq!(added, 1);
            } else {
                prop_assert_eq!(added, 0);
            }
        }
        prop_assert_eq!(definitions.count::<RegionDef>(), seen.len());
    }

    #[test]
    fn strings_are_interned_once(names in prop::collection::vec("[a-c]{0,3}", 1..60)) {
        let definitions = DefinitionManager::new();
        let base = definitions.count::<StringDef>();
        let distinct: HashSet<&String> = names.iter().collect();
        let mut handles = std::collections::HashMap::new();
        for name in &names {
            let handle = definitions.new_string(name).unwrap();
            prop_assert_eq!(*handles.entry(name.clone()).or_insert(handle), handle);
        }
        // The empty string is predefined.
        let expected = distinct.iter().filter(|name| !name.is_empty()).count();
        prop_assert_eq!(definitions.count::<StringDef>() - base, expected);
    }
}

#[test]
fn concurrent_definers_agree_on_handles() {
    init_test_logging();
    test_phase!("concurrent_definers_agree_on_handles");
    let definitions = Arc::new(DefinitionManager::new());
    let names: Vec<String> = (0..32).map(|i| format!("region_{i}")).collect();

    let per_thread: Vec<Vec<RegionHandle>> = thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let definitions = Arc::clone(&definitions);
                let names = &names;
                s.spawn(move || {
                    // Every thread walks the names in a different order.
                    let mut order: Vec<usize> = (0..names.len()).collect();
                    order.rotate_left(t * 7);
                    let mut out = vec![RegionHandle::INVALID; names.len()];
                    for i in order {
                        out[i] = definitions
                            .define_region(&RegionInfo::new(&names[i]))
                            .unwrap();
                    }
                    out
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(per_thread.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(definitions.count::<RegionDef>(), names.len());
    test_complete!("concurrent_definers_agree_on_handles");
}

#[test]
fn metric_redefinition_keeps_the_first() {
    init_test_logging();
    let definitions = DefinitionManager::new();
    let first = definitions
        .define_metric("flops", "floating point ops", "#", MetricValueType::Uint64)
        .unwrap();
    let again = definitions
        .define_metric("flops", "different", "ops", MetricValueType::Double)
        .unwrap();
    assert_eq!(first, again);
    assert_eq!(definitions.count::<MetricDef>(), 1);
}

#[test]
fn closed_manager_rejects_new_definitions() {
    init_test_logging();
    let definitions = DefinitionManager::new();
    let region = definitions.define_region(&RegionInfo::new("before")).unwrap();
    definitions.close();
    let err = definitions
        .define_region(&RegionInfo::new("after"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DefinitionsClosed);
    assert!(region.is_valid());
}
