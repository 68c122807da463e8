//! Region stack properties.

#[macro_use]
mod common;

use common::*;
use hpctrace::task::{TaskStack, FRAME_CAPACITY};
use hpctrace::{MemorySubstrate, RegionHandle};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Op {
    Enter(u32, bool),
    Exit,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u32..64, any::<bool>()).prop_map(|(id, filtered)| Op::Enter(id, filtered)),
        2 => Just(Op::Exit),
    ]
}

fn region(id: u32, filtered: bool) -> RegionHandle {
    if filtered {
        RegionHandle::FILTERED
    } else {
        RegionHandle::from_raw(id)
    }
}

proptest! {
    #![proptest_config(test_proptest_config(256))]

    #[test]
    fn paired_exits_never_underflow(ops in prop::collection::vec(op(), 0..200)) {
        let mut stack = TaskStack::new();
        let mut model: Vec<RegionHandle> = Vec::new();
        for op in ops {
            match op {
                Op::Enter(id, filtered) => {
                    stack.enter(region(id, filtered));
                    model.push(region(id, filtered));
                }
                // Only exit what was entered.
                Op::Exit if !model.is_empty() => {
                    prop_assert_eq!(stack.exit(), model.pop());
                }
                Op::Exit => {}
            }
            prop_assert_eq!(stack.depth(), model.len());
            prop_assert_eq!(stack.top(), model.last().copied());
        }

        let expected: Vec<RegionHandle> = model
            .iter()
            .rev()
            .copied()
            .filter(|region| !region.is_filtered())
            .collect();
        prop_assert_eq!(stack.exit_all(), expected);
        prop_assert_eq!(stack.depth(), 0);
        prop_assert_eq!(stack.exit(), None);
    }

    #[test]
    fn frames_are_reused_after_warm_up(depth in 1usize..(FRAME_CAPACITY * 4), rounds in 2usize..5) {
        let mut stack = TaskStack::new();
        let mut warm = None;
        for _ in 0..rounds {
            for id in 0..depth {
                stack.enter(RegionHandle::from_raw(id as u32));
            }
            for _ in 0..depth {
                stack.exit();
            }
            let frames = stack.stats().frames;
            match warm {
                None => warm = Some(frames),
                Some(first) => prop_assert_eq!(frames, first),
            }
        }
    }
}

#[test]
fn open_regions_are_left_lifo_at_end() {
    init_test_logging();
    test_phase!("open_regions_are_left_lifo_at_end");
    let substrate = MemorySubstrate::new();
    let m = test_measurement::<hpctrace::CreateWait>(test_config(), &substrate);
    let a = m.define_region(&hpctrace::RegionInfo::new("A")).unwrap();
    let b = m.define_region(&hpctrace::RegionInfo::new("B")).unwrap();
    m.enter_region(a).unwrap();
    m.enter_region(b).unwrap();
    m.finalize().unwrap();

    let reader = hpctrace::ArchiveReader::open(as_substrate(&substrate)).unwrap();
    let location = reader.locations()[0];
    let events = reader.region_events(location).unwrap();
    assert_eq!(
        events,
        vec![
            ("enter", "A".to_string()),
            ("enter", "B".to_string()),
            ("leave", "B".to_string()),
            ("leave", "A".to_string()),
        ]
    );
    test_complete!("open_regions_are_left_lifo_at_end");
}
