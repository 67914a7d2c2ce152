//! Durable registry state across restarts.

use crate::test_utils::*;
use fedreg_core::{
    Digest32, Identity, ManualClock, MemoryLedger, RoundId, RoundPhase, SqliteLedger,
    SystemClock, TransactionLog,
};
use fedreg_registry::{RegistryCore, RegistryError};
use std::sync::{Arc, Barrier};
use std::thread;

#[test]
fn test_reopen_restores_rounds_and_submissions() {
    init_tracing();
    let db_path = temp_db_path("test_registry_reopen");
    let round_id = RoundId::from(12u64);
    let hash_a = update_hash(b"hospital-a-update");

    let registry_id = {
        let t = TestRegistry::sqlite(&db_path);
        t.registry
            .create_round(&t.owner, round_id, version("v1.0"), T0 + 100)
            .unwrap();
        t.clock.advance(10);
        t.registry
            .submit_update(&hospital(1), round_id, version("v1.0"), hash_a)
            .unwrap();
        t.registry.genesis_receipt().tx_hash
    };

    let t = TestRegistry::reopen(&db_path, T0 + 20);
    assert_eq!(t.registry.genesis_receipt().tx_hash, registry_id);
    assert_eq!(t.registry.owner(), &owner());

    let sub = t
        .registry
        .get_submission(&hospital(1), round_id)
        .unwrap()
        .unwrap();
    assert_eq!(sub.update_hash, hash_a);
    assert_eq!(sub.submitted_at, T0 + 10);

    // Rules still hold against replayed state
    let err = t
        .registry
        .submit_update(&hospital(1), round_id, version("v1.0"), hash_a)
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_SUBMITTED");
    let err = t
        .registry
        .create_round(&t.owner, round_id, version("v2.0"), T0 + 500)
        .unwrap_err();
    assert_eq!(err.code(), "ROUND_ALREADY_EXISTS");

    // New mutations continue the sequence
    let receipt = t
        .registry
        .submit_update(&hospital(2), round_id, version("v1.0"), random_update_hash())
        .unwrap();
    assert_eq!(receipt.seq_no, 4);
    assert_eq!(t.events.len(), 1);

    remove_db(&db_path);
}

#[test]
fn test_reopen_restores_finalization() {
    let db_path = temp_db_path("test_registry_finalized");
    let round_id = RoundId::from(102u64);
    {
        let t = TestRegistry::sqlite(&db_path);
        t.registry
            .create_round(&t.owner, round_id, version("v1.0"), T0 + 1)
            .unwrap();
        t.clock.advance(1);
        t.registry
            .finalize_round(&t.owner, round_id, update_hash(b"agg"), version("v1.1"))
            .unwrap();
    }

    let t = TestRegistry::reopen(&db_path, T0 + 5);
    let round = t.registry.get_round(round_id).unwrap().unwrap();
    assert!(round.finalized);
    assert_eq!(round.aggregated_update_hash, Some(update_hash(b"agg")));
    assert_eq!(t.registry.round_phase(round_id).unwrap(), Some(RoundPhase::Finalized));

    let err = t
        .registry
        .finalize_round(&t.owner, round_id, update_hash(b"agg"), version("v1.1"))
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_FINALIZED");

    remove_db(&db_path);
}

#[test]
fn test_rolled_back_clock_cannot_reopen_closed_round() {
    let db_path = temp_db_path("test_registry_clock_seed");
    let round_id = RoundId::from(9u64);
    {
        let t = TestRegistry::sqlite(&db_path);
        t.registry
            .create_round(&t.owner, round_id, version("v1.0"), T0 + 50)
            .unwrap();
        // Another round's activity moves the ledger past the deadline
        t.clock.set(T0 + 60);
        t.registry
            .create_round(&t.owner, RoundId::from(10u64), version("v1.0"), T0 + 500)
            .unwrap();
    }

    // Host clock restarts an hour in the past
    let t = TestRegistry::reopen(&db_path, T0 - 3600);
    assert!(t.registry.now() >= T0 + 60);

    let err = t
        .registry
        .submit_update(&hospital(1), round_id, version("v1.0"), random_update_hash())
        .unwrap_err();
    assert_eq!(err.code(), "ROUND_CLOSED");

    remove_db(&db_path);
}

#[test]
fn test_open_with_wrong_owner_fails() {
    let db_path = temp_db_path("test_registry_owner");
    drop(TestRegistry::sqlite(&db_path));

    let ledger = SqliteLedger::open(&db_path).unwrap();
    let intruder = Identity::new("mallory").unwrap();
    let result = RegistryCore::open(
        Box::new(ledger),
        Arc::new(ManualClock::new(T0)),
        Some(&intruder),
    );
    match result {
        Err(err @ RegistryError::OwnerMismatch { .. }) => {
            assert_eq!(err.code(), "OWNER_MISMATCH")
        }
        Err(other) => panic!("unexpected error {}", other),
        Ok(_) => panic!("open should fail"),
    }

    // Without an expectation the recorded owner is adopted
    let ledger = SqliteLedger::open(&db_path).unwrap();
    let registry = RegistryCore::open(Box::new(ledger), Arc::new(SystemClock), None).unwrap();
    assert_eq!(registry.owner(), &owner());

    remove_db(&db_path);
}

#[test]
fn test_open_empty_ledger_is_not_deployed() {
    let result = RegistryCore::open(
        Box::new(MemoryLedger::new()),
        Arc::new(ManualClock::new(T0)),
        None,
    );
    assert!(matches!(result, Err(RegistryError::NotDeployed)));
}

#[test]
fn test_redeploy_over_existing_ledger_fails() {
    let db_path = temp_db_path("test_registry_redeploy");
    drop(TestRegistry::sqlite(&db_path));

    let ledger = SqliteLedger::open(&db_path).unwrap();
    let result = RegistryCore::new(owner(), Arc::new(ManualClock::new(T0)), Box::new(ledger));
    assert!(matches!(result, Err(RegistryError::AlreadyDeployed)));

    remove_db(&db_path);
}

#[test]
fn test_tampered_ledger_refuses_to_open() {
    let db_path = temp_db_path("test_registry_tamper");
    let round_id = RoundId::from(5u64);
    {
        let t = TestRegistry::sqlite(&db_path);
        t.registry
            .create_round(&t.owner, round_id, version("v1.0"), T0 + 100)
            .unwrap();
        t.registry
            .submit_update(&hospital(1), round_id, version("v1.0"), update_hash(b"honest"))
            .unwrap();
    }

    {
        let ledger = SqliteLedger::open(&db_path).unwrap();
        let forged = ledger
            .entries_from(3, 1)
            .unwrap()
            .remove(0)
            .event;
        let mut payload = serde_json::to_value(&forged).unwrap();
        let forged_hash = Digest32::new([0xee; 32]).to_hex();
        payload["update_hash"] = serde_json::Value::String(forged_hash);
        let payload = serde_json::to_string(&payload).unwrap();
        ledger
            .__test_execute_raw_sql(
                "UPDATE registry_ledger SET payload = ?1 WHERE seq_no = 3",
                &[&payload],
            )
            .unwrap();
    }

    assert!(SqliteLedger::open(&db_path).is_err());
    remove_db(&db_path);
}

#[test]
fn test_two_handles_on_one_ledger_accept_a_submission_once() {
    let db_path = temp_db_path("test_registry_two_handles_submit");
    let round_id = RoundId::from(12u64);
    {
        let t = TestRegistry::sqlite(&db_path);
        t.registry
            .create_round(&t.owner, round_id, version("v1.0"), T0 + 100)
            .unwrap();
    }

    let a = TestRegistry::reopen(&db_path, T0 + 10);
    let b = TestRegistry::reopen(&db_path, T0 + 10);

    let receipt = a
        .registry
        .submit_update(&hospital(1), round_id, version("v1.0"), update_hash(b"from-a"))
        .unwrap();
    assert_eq!(receipt.seq_no, 3);

    // b replayed before a's submission landed; it must still refuse
    let err = b
        .registry
        .submit_update(&hospital(1), round_id, version("v1.0"), update_hash(b"from-b"))
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_SUBMITTED");
    let sub = b
        .registry
        .get_submission(&hospital(1), round_id)
        .unwrap()
        .unwrap();
    assert_eq!(sub.update_hash, update_hash(b"from-a"));

    // b's next write extends the same chain
    let receipt = b
        .registry
        .submit_update(&hospital(2), round_id, version("v1.0"), random_update_hash())
        .unwrap();
    assert_eq!(receipt.seq_no, 4);
    assert_eq!(b.event_types(), vec!["update.submitted", "update.submitted"]);
    drop(a);
    drop(b);

    let t = TestRegistry::reopen(&db_path, T0 + 20);
    let subs = t.registry.list_submissions(round_id).unwrap().unwrap();
    assert_eq!(subs.len(), 2);
    assert_eq!(subs[0].update_hash, update_hash(b"from-a"));

    remove_db(&db_path);
}

#[test]
fn test_two_handles_on_one_ledger_finalize_once() {
    let db_path = temp_db_path("test_registry_two_handles_finalize");
    let round_id = RoundId::from(30u64);
    {
        let t = TestRegistry::sqlite(&db_path);
        t.registry
            .create_round(&t.owner, round_id, version("v1.0"), T0 + 5)
            .unwrap();
    }

    let a = TestRegistry::reopen(&db_path, T0 + 10);
    let b = TestRegistry::reopen(&db_path, T0 + 10);

    a.registry
        .finalize_round(&a.owner, round_id, update_hash(b"agg-a"), version("v1.1"))
        .unwrap();
    let err = b
        .registry
        .finalize_round(&b.owner, round_id, update_hash(b"agg-b"), version("v1.2"))
        .unwrap_err();
    assert_eq!(err.code(), "ALREADY_FINALIZED");
    let err = b
        .registry
        .submit_update(&hospital(1), round_id, version("v1.0"), random_update_hash())
        .unwrap_err();
    assert_eq!(err.code(), "ROUND_FINALIZED");
    drop(a);
    drop(b);

    let t = TestRegistry::reopen(&db_path, T0 + 20);
    let round = t.registry.get_round(round_id).unwrap().unwrap();
    assert_eq!(round.aggregated_update_hash, Some(update_hash(b"agg-a")));
    assert_eq!(round.new_model_version, Some(version("v1.1")));

    remove_db(&db_path);
}

#[test]
fn test_handles_racing_on_one_ledger_single_winner() {
    const HANDLES: usize = 4;
    let db_path = temp_db_path("test_registry_handle_race");
    let round_id = RoundId::from(40u64);
    {
        let t = TestRegistry::sqlite(&db_path);
        t.registry
            .create_round(&t.owner, round_id, version("v1.0"), T0 + 100)
            .unwrap();
    }

    let handles: Vec<_> = (0..HANDLES)
        .map(|_| TestRegistry::reopen(&db_path, T0 + 10))
        .collect();
    let barrier = Barrier::new(HANDLES);
    let results: Vec<_> = thread::scope(|s| {
        let workers: Vec<_> = handles
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    let hash = update_hash(&[i as u8]);
                    t.registry
                        .submit_update(&hospital(0), round_id, version("v1.0"), hash)
                        .map(|r| r.seq_no)
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(err.code(), "ALREADY_SUBMITTED");
    }
    drop(handles);

    let t = TestRegistry::reopen(&db_path, T0 + 20);
    assert_eq!(t.registry.list_submissions(round_id).unwrap().unwrap().len(), 1);

    remove_db(&db_path);
}
