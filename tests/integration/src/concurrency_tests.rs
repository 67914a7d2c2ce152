//! Concurrent callers must observe a linear history per round.

use crate::test_utils::*;
use fedreg_core::RoundId;
use fedreg_registry::RegistryError;
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 16;

fn race<F>(f: F) -> Vec<Result<(), RegistryError>>
where
    F: Fn(usize) -> Result<(), RegistryError> + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(THREADS));
    let f = Arc::new(f);
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let barrier = barrier.clone();
            let f = f.clone();
            thread::spawn(move || {
                barrier.wait();
                f(i)
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_concurrent_duplicate_submissions_single_winner() {
    let t = TestRegistry::in_memory();
    let round_id = RoundId::from(1u64);
    t.registry
        .create_round(&t.owner, round_id, version("v1.0"), T0 + 3600)
        .unwrap();

    let registry = t.registry.clone();
    let results = race(move |i| {
        registry
            .submit_update(&hospital(0), round_id, version("v1.0"), update_hash(&[i as u8]))
            .map(|_| ())
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.code(), "ALREADY_SUBMITTED");
    }
    assert_eq!(t.events.len(), 2);
}

#[test]
fn test_concurrent_distinct_participants_all_accepted() {
    let t = TestRegistry::in_memory();
    let round_id = RoundId::from(2u64);
    t.registry
        .create_round(&t.owner, round_id, version("v1.0"), T0 + 3600)
        .unwrap();

    let registry = t.registry.clone();
    let results = race(move |i| {
        registry
            .submit_update(&hospital(i), round_id, version("v1.0"), random_update_hash())
            .map(|_| ())
    });

    assert!(results.iter().all(|r| r.is_ok()));
    let subs = t.registry.list_submissions(round_id).unwrap().unwrap();
    assert_eq!(subs.len(), THREADS);

    // Ledger sequence numbers stay gap-free under contention
    let entries = t.registry.ledger_entries(1, usize::MAX).unwrap();
    for (i, entry) in entries.iter().enumerate() {
        assert_eq!(entry.seq_no, i as u64 + 1);
    }
}

#[test]
fn test_concurrent_finalize_single_winner() {
    let t = TestRegistry::in_memory();
    let round_id = RoundId::from(3u64);
    t.registry
        .create_round(&t.owner, round_id, version("v1.0"), T0 + 1)
        .unwrap();
    t.clock.advance(1);

    let registry = t.registry.clone();
    let owner = t.owner.clone();
    let results = race(move |i| {
        registry
            .finalize_round(&owner, round_id, update_hash(&[i as u8]), version("v1.1"))
            .map(|_| ())
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.code(), "ALREADY_FINALIZED");
    }
    assert_eq!(t.event_types(), vec!["round.created", "round.finalized"]);
}

#[test]
fn test_concurrent_create_same_id_single_winner() {
    let t = TestRegistry::in_memory();
    let registry = t.registry.clone();
    let owner = t.owner.clone();
    let results = race(move |i| {
        registry
            .create_round(&owner, RoundId::from(42u64), version("v1.0"), T0 + i as u64 + 1)
            .map(|_| ())
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.code(), "ROUND_ALREADY_EXISTS");
    }
    assert_eq!(t.registry.round_count().unwrap(), 1);
}

#[test]
fn test_submit_racing_finalize_never_lands_after_finalization() {
    let t = TestRegistry::in_memory();
    let round_id = RoundId::from(4u64);
    t.registry
        .create_round(&t.owner, round_id, version("v1.0"), T0 + 1)
        .unwrap();
    t.clock.advance(1);

    let registry = t.registry.clone();
    let owner = t.owner.clone();
    let results = race(move |i| {
        if i == 0 {
            registry
                .finalize_round(&owner, round_id, update_hash(b"agg"), version("v1.1"))
                .map(|_| ())
        } else {
            registry
                .submit_update(&hospital(i), round_id, version("v1.0"), random_update_hash())
                .map(|_| ())
        }
    });

    assert!(results[0].is_ok());
    for err in results[1..].iter().map(|r| r.as_ref().unwrap_err()) {
        assert!(matches!(err.code(), "ROUND_CLOSED" | "ROUND_FINALIZED"));
    }
    assert!(t.registry.list_submissions(round_id).unwrap().unwrap().is_empty());
}
