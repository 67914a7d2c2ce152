//! End-to-end round scenarios
//!
//! Each test drives a registry the way the central server and hospital
//! clients do: owner creates a round, hospitals submit, the clock moves past
//! the deadline, the owner finalizes.

use crate::test_utils::*;
use fedreg_core::{RegistryEvent, RoundId, RoundPhase};
use fedreg_registry::BroadcastSink;
use std::sync::Arc;

#[test]
fn test_scenario_submit_then_duplicate() {
    init_tracing();
    let t = TestRegistry::in_memory();
    let round_id = RoundId::from(12u64);
    let model_v = version("v1.0");
    let hosp_a = hospital(1);

    t.registry
        .create_round(&t.owner, round_id, model_v, T0 + 3600)
        .unwrap();
    let hash_x = update_hash(b"deltaW_A_bytes_dummy");
    t.registry
        .submit_update(&hosp_a, round_id, model_v, hash_x)
        .unwrap();

    let err = t
        .registry
        .submit_update(&hosp_a, round_id, model_v, hash_x)
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_SUBMITTED");
    assert_eq!(t.event_types(), vec!["round.created", "update.submitted"]);
}

#[test]
fn test_scenario_version_mismatch_records_nothing() {
    let t = TestRegistry::in_memory();
    let round_id = RoundId::from(1u64);
    let hosp_a = hospital(1);

    t.registry
        .create_round(&t.owner, round_id, version("v1.0"), T0 + 3600)
        .unwrap();
    let err = t
        .registry
        .submit_update(&hosp_a, round_id, version("v2.0"), update_hash(b"dummy"))
        .unwrap_err();

    assert_eq!(err.code(), "MODEL_VERSION_MISMATCH");
    assert!(t.registry.get_submission(&hosp_a, round_id).unwrap().is_none());
    assert_eq!(t.events.len(), 1);
}

#[test]
fn test_scenario_non_owner_finalize() {
    let t = TestRegistry::in_memory();
    let round_id = RoundId::from(100u64);

    t.registry
        .create_round(&t.owner, round_id, version("v1.0"), T0 + 1)
        .unwrap();
    t.clock.advance(2);

    let err = t
        .registry
        .finalize_round(&hospital(1), round_id, update_hash(b"agg"), version("v1.1"))
        .unwrap_err();
    assert_eq!(err.code(), "ONLY_OWNER");
    assert_eq!(
        t.registry.round_phase(round_id).unwrap(),
        Some(RoundPhase::AwaitingFinalization)
    );
}

#[test]
fn test_scenario_finalize_before_deadline() {
    let t = TestRegistry::in_memory();
    let round_id = RoundId::from(101u64);

    t.registry
        .create_round(&t.owner, round_id, version("v1.0"), T0 + 3600)
        .unwrap();
    let err = t
        .registry
        .finalize_round(&t.owner, round_id, update_hash(b"agg"), version("v1.1"))
        .unwrap_err();
    assert_eq!(err.code(), "ROUND_NOT_ENDED");
}

#[test]
fn test_scenario_finalize_twice() {
    let t = TestRegistry::in_memory();
    let round_id = RoundId::from(102u64);

    t.registry
        .create_round(&t.owner, round_id, version("v1.0"), T0 + 1)
        .unwrap();
    t.clock.advance(2);

    t.registry
        .finalize_round(&t.owner, round_id, update_hash(b"agg"), version("v1.1"))
        .unwrap();
    let err = t
        .registry
        .finalize_round(&t.owner, round_id, update_hash(b"agg2"), version("v1.2"))
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_FINALIZED");

    let round = t.registry.get_round(round_id).unwrap().unwrap();
    assert_eq!(round.new_model_version, Some(version("v1.1")));
}

#[test]
fn test_scenario_submit_after_finalize_reports_finalized() {
    let t = TestRegistry::in_memory();
    let round_id = RoundId::from(201u64);

    t.registry
        .create_round(&t.owner, round_id, version("v1.0"), T0 + 1)
        .unwrap();
    t.clock.advance(2);
    t.registry
        .finalize_round(&t.owner, round_id, update_hash(b"agg"), version("v1.1"))
        .unwrap();

    // Deadline has also passed; finalized check wins
    let err = t
        .registry
        .submit_update(&hospital(1), round_id, version("v1.0"), update_hash(b"late"))
        .unwrap_err();
    assert_eq!(err.code(), "ROUND_FINALIZED");
}

#[test]
fn test_full_round_multiple_hospitals() {
    let t = TestRegistry::in_memory();
    let round_id = RoundId::from(7u64);
    let model_v = version("v1.0");

    t.registry
        .create_round(&t.owner, round_id, model_v, T0 + 600)
        .unwrap();
    for n in 0..5 {
        t.clock.advance(10);
        t.registry
            .submit_update(&hospital(n), round_id, model_v, random_update_hash())
            .unwrap();
    }
    assert_eq!(
        t.registry.list_submissions(round_id).unwrap().unwrap().len(),
        5
    );

    t.clock.set(T0 + 600);
    let err = t
        .registry
        .submit_update(&hospital(9), round_id, model_v, random_update_hash())
        .unwrap_err();
    assert_eq!(err.code(), "ROUND_CLOSED");

    t.registry
        .finalize_round(&t.owner, round_id, update_hash(b"fedavg"), version("v1.1"))
        .unwrap();

    let sub = t.registry.get_submission(&hospital(2), round_id).unwrap().unwrap();
    assert_eq!(sub.submitted_at, T0 + 30);
    assert_eq!(
        t.event_types(),
        vec![
            "round.created",
            "update.submitted",
            "update.submitted",
            "update.submitted",
            "update.submitted",
            "update.submitted",
            "round.finalized",
        ]
    );
}

#[tokio::test]
async fn test_broadcast_listener_sees_round_events() {
    let t = TestRegistry::in_memory();
    let bus = Arc::new(BroadcastSink::new(16));
    let mut rx = bus.subscribe();
    t.registry.subscribe(bus.clone()).unwrap();

    let round_id = RoundId::from(55u64);
    t.registry
        .create_round(&t.owner, round_id, version("v1.0"), T0 + 5)
        .unwrap();
    t.registry
        .submit_update(&hospital(1), round_id, version("v1.0"), update_hash(b"a"))
        .unwrap();

    let (first, created) = rx.recv().await.unwrap();
    assert!(matches!(created, RegistryEvent::RoundCreated { .. }));
    let (second, submitted) = rx.recv().await.unwrap();
    assert!(second.seq_no > first.seq_no);
    match submitted {
        RegistryEvent::UpdateSubmitted { participant, .. } => {
            assert_eq!(participant, hospital(1));
        }
        other => panic!("unexpected event {:?}", other),
    }
}
