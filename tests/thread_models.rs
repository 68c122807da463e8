//! Fork/join and create/wait threading on real OS threads, read back from
//! the archive.

#[macro_use]
mod common;

use std::collections::BTreeMap;
use std::thread;

use common::*;
use hpctrace::{
    ArchiveReader, CreateWait, ForkJoin, Measurement, MemorySubstrate, RegionInfo, TeamPosition,
};

/// Event names per location name.
fn event_names(substrate: &MemorySubstrate) -> BTreeMap<String, Vec<&'static str>> {
    let reader = ArchiveReader::open(as_substrate(substrate)).unwrap();
    reader
        .anchor()
        .locations
        .iter()
        .map(|location| {
            let names = reader
                .events(location.global_id)
                .unwrap()
                .iter()
                .map(|record| record.event.name())
                .collect();
            (location.name.clone(), names)
        })
        .collect()
}

#[test]
fn parallel_region_is_recorded_on_every_team_member() {
    init_test_logging();
    test_phase!("parallel_region_is_recorded_on_every_team_member");
    let substrate = MemorySubstrate::new();
    let m: Measurement<ForkJoin> = test_measurement(test_config(), &substrate);
    let body = m.define_region(&RegionInfo::new("parallel_body")).unwrap();
    let team_size = 4;

    let fork = m.fork(team_size).unwrap();
    thread::scope(|s| {
        for thread_id in 1..team_size {
            let (m, fork) = (&m, fork.clone());
            s.spawn(move || {
                let team = TeamPosition { thread_id, team_size };
                m.team_begin(&fork, team).unwrap();
                m.enter_region(body).unwrap();
                m.exit_region(body).unwrap();
                m.team_end(team).unwrap();
            });
        }
        let team = TeamPosition { thread_id: 0, team_size };
        m.team_begin(&fork, team).unwrap();
        m.enter_region(body).unwrap();
        m.exit_region(body).unwrap();
        m.team_end(team).unwrap();
    });
    m.join().unwrap();
    m.finalize().unwrap();

    let names = event_names(&substrate);
    assert_eq!(names.len(), team_size as usize);
    assert_eq!(
        names["Master thread"],
        [
            "ThreadFork",
            "ThreadTeamBegin",
            "Enter",
            "Leave",
            "ThreadTeamEnd",
            "ThreadJoin"
        ]
    );
    for thread_id in 1..team_size {
        assert_eq!(
            names[&format!("OMP thread {thread_id}")],
            ["ThreadTeamBegin", "Enter", "Leave", "ThreadTeamEnd"]
        );
    }
    test_complete!("parallel_region_is_recorded_on_every_team_member");
}

#[test]
fn created_threads_close_their_open_regions() {
    init_test_logging();
    test_phase!("created_threads_close_their_open_regions");
    let substrate = MemorySubstrate::new();
    let m: Measurement<CreateWait> = test_measurement(test_config(), &substrate);
    let work = m.define_region(&RegionInfo::new("work")).unwrap();

    let spawns: Vec<_> = (0..2).map(|_| m.thread_create().unwrap()).collect();
    thread::scope(|s| {
        for spawn in &spawns {
            let m = &m;
            s.spawn(move || {
                m.thread_begin(spawn).unwrap();
                m.enter_region(work).unwrap();
                // Left open on purpose.
                m.thread_end(spawn).unwrap();
            });
        }
    });
    for spawn in &spawns {
        m.thread_wait(spawn).unwrap();
    }
    m.finalize().unwrap();

    let names = event_names(&substrate);
    assert_eq!(
        names["Master thread"],
        ["ThreadCreate", "ThreadCreate", "ThreadWait", "ThreadWait"]
    );
    for spawn in &spawns {
        assert_eq!(
            names[&format!("Pthread thread {}", spawn.sequence())],
            ["ThreadBegin", "Enter", "Leave", "ThreadEnd"]
        );
    }
    test_complete!("created_threads_close_their_open_regions");
}

#[test]
fn nested_teams_get_their_own_locations() {
    init_test_logging();
    let substrate = MemorySubstrate::new();
    let m: Measurement<ForkJoin> = test_measurement(test_config(), &substrate);

    let outer = m.fork(2).unwrap();
    thread::scope(|s| {
        let m = &m;
        let outer_worker = outer.clone();
        s.spawn(move || {
            let team = TeamPosition { thread_id: 1, team_size: 2 };
            m.team_begin(&outer_worker, team).unwrap();
            // A team of one nested inside the worker.
            let inner = m.fork(1).unwrap();
            let single = TeamPosition { thread_id: 0, team_size: 1 };
            m.team_begin(&inner, single).unwrap();
            m.team_end(single).unwrap();
            m.join().unwrap();
            m.team_end(team).unwrap();
        });
        let team = TeamPosition { thread_id: 0, team_size: 2 };
        m.team_begin(&outer, team).unwrap();
        m.team_end(team).unwrap();
    });
    m.join().unwrap();
    assert!(!m.in_parallel());
    let summary = m.finalize().unwrap();
    assert!(summary.locations >= 2);
}
