//! Trace buffering, memory pressure and archive output.

#[macro_use]
mod common;

use std::sync::Arc;

use common::*;
use hpctrace::memory::PageAllocator;
use hpctrace::trace::{EventRecord, FileSubstrate, TraceEvent};
use hpctrace::{
    ArchiveReader, CreateWait, ErrorKind, Measurement, MemorySubstrate, PosixSubstrate, RegionInfo,
};

fn count(records: &[EventRecord], pred: impl Fn(&TraceEvent) -> bool) -> usize {
    records.iter().filter(|record| pred(&record.event)).count()
}

#[test]
fn filtered_regions_leave_no_trace() {
    init_test_logging();
    test_phase!("filtered_regions_leave_no_trace");
    let substrate = MemorySubstrate::new();
    let m: Measurement<CreateWait> =
        test_measurement(test_config().with_filter("mpi_*").with_filter("helper?"), &substrate);

    let main = m.define_region(&RegionInfo::new("main")).unwrap();
    let send = m.define_region(&RegionInfo::new("mpi_send")).unwrap();
    let helper = m.define_region(&RegionInfo::new("helper1")).unwrap();
    assert!(send.is_filtered() && helper.is_filtered());

    m.enter_region(main).unwrap();
    for _ in 0..10 {
        m.enter_region(send).unwrap();
        m.enter_region(helper).unwrap();
        m.exit_region(helper).unwrap();
        m.exit_region(send).unwrap();
    }
    m.exit_region(main).unwrap();
    let summary = m.finalize().unwrap();
    assert_eq!(summary.events, 2);

    let reader = ArchiveReader::open(as_substrate(&substrate)).unwrap();
    let location = reader.locations()[0];
    assert_eq!(
        reader.region_events(location).unwrap(),
        vec![("enter", "main".to_string()), ("leave", "main".to_string())]
    );
    test_complete!("filtered_regions_leave_no_trace");
}

#[test]
fn intermediate_flush_disables_recording() {
    init_test_logging();
    test_phase!("intermediate_flush_disables_recording");
    let substrate = MemorySubstrate::new();
    let config = test_config()
        .with_total_memory(1024)
        .with_page_size(256)
        .with_chunk_size(256);
    let m: Measurement<CreateWait> = test_measurement(config, &substrate);
    let region = m.define_region(&RegionInfo::new("loop_body")).unwrap();

    // Every call made while recording is on is stored, the one that
    // triggers the flush included.
    let (mut entered, mut left) = (0_u64, 0_u64);
    while !m.status().recording_disabled() {
        m.enter_region(region).unwrap();
        entered += 1;
        if m.status().recording_disabled() {
            m.exit_region(region).unwrap();
            break;
        }
        m.exit_region(region).unwrap();
        left += 1;
    }
    for _ in 0..10 {
        m.enter_region(region).unwrap();
        m.exit_region(region).unwrap();
    }
    // The stack is still balanced after recording stopped.
    assert_eq!(m.stack_depth().unwrap(), 0);

    let summary = m.finalize().unwrap();
    assert!(summary.recording_disabled);
    assert_eq!(summary.events, entered + left + 1);

    let reader = ArchiveReader::open(as_substrate(&substrate)).unwrap();
    let records = reader.events(reader.locations()[0]).unwrap();
    let enters = count(&records, |event| matches!(event, TraceEvent::Enter { .. }));
    let leaves = count(&records, |event| matches!(event, TraceEvent::Leave { .. }));
    assert_eq!((enters as u64, leaves as u64), (entered, left));

    // The marker sits right before the record that triggered the flush,
    // which is the last one stored.
    let markers: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, record)| matches!(record.event, TraceEvent::BufferFlush { .. }))
        .map(|(index, _)| index)
        .collect();
    assert_eq!(markers, vec![records.len() - 2]);
    let (marker, trigger) = (&records[records.len() - 2], &records[records.len() - 1]);
    match marker.event {
        TraceEvent::BufferFlush { start, stop } => {
            assert_eq!(start, records[records.len() - 3].timestamp);
            assert!(stop >= start);
            assert_eq!(marker.timestamp, start);
        }
        ref other => panic!("expected a buffer-flush marker, got {other:?}"),
    }
    assert!(trigger.timestamp > marker.timestamp);
    test_complete!("intermediate_flush_disables_recording", events = summary.events);
}

#[test]
fn first_chunk_out_of_memory_is_fatal() {
    init_test_logging();
    let substrate = MemorySubstrate::new();
    let config = test_config()
        .with_total_memory(256)
        .with_page_size(256)
        .with_chunk_size(256);
    let m: Measurement<CreateWait> = test_measurement(config, &substrate);

    // The creating thread takes the only page.
    let spawn = m.thread_create().unwrap();
    let err = std::thread::scope(|s| {
        s.spawn(|| m.thread_begin(&spawn).unwrap_err())
            .join()
            .unwrap()
    });
    assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    assert!(err.is_fatal());
}

#[test]
fn allocator_reuses_pages_after_a_non_final_release() {
    init_test_logging();
    let allocator = PageAllocator::new(16 * 512, 512).unwrap();
    let mut manager = allocator.new_page_manager();
    let n = 8;
    for _ in 0..n {
        assert!(manager.alloc(512).is_some());
    }
    let created = allocator.stats().pages_created;
    assert_eq!(created, n);

    manager.free_all();
    for _ in 0..n {
        assert!(manager.alloc(512).is_some());
    }
    assert_eq!(allocator.stats().pages_created, created);

    drop(manager);
    allocator.trim();
    let stats = allocator.stats();
    assert_eq!(stats.pages_in_use, 0);
    assert_eq!(stats.free_pages, 0);
}

#[test]
fn archive_round_trips_through_the_file_system() {
    init_test_logging();
    test_phase!("archive_round_trips_through_the_file_system");
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("experiment");
    let config = test_config()
        .with_experiment_directory(&root)
        .with_compression(cfg!(feature = "trace-compression"))
        .with_chunk_size(4096);
    let m: Measurement<CreateWait> = Measurement::builder(config).build().unwrap();

    let outer = m.define_region(&RegionInfo::new("outer")).unwrap();
    let inner = m.define_region(&RegionInfo::new("inner")).unwrap();
    // Enough records for several chunks.
    for _ in 0..500 {
        m.enter_region(outer).unwrap();
        m.enter_region(inner).unwrap();
        m.exit_region(inner).unwrap();
        m.exit_region(outer).unwrap();
    }
    let summary = m.finalize().unwrap();
    assert_eq!(summary.events, 2000);
    assert!(root.join("traces.json").is_file());

    let substrate: Arc<dyn FileSubstrate> = Arc::new(PosixSubstrate::new(&root).unwrap());
    let reader = ArchiveReader::open(substrate).unwrap();
    let location = reader.locations()[0];
    let events = reader.region_events(location).unwrap();
    assert_eq!(events.len(), 2000);
    assert_eq!(events[0], ("enter", "outer".to_string()));
    assert_eq!(events[1999], ("leave", "outer".to_string()));
    assert_eq!(reader.anchor().locations[0].events, 2000);

    let records = reader.events(location).unwrap();
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    test_complete!("archive_round_trips_through_the_file_system");
}
