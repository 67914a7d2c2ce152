//! In-memory walkthrough of one full training round.

use anyhow::{ensure, Result};
use fedreg_core::{
    Clock, Digest32, Identity, ManualClock, MemoryLedger, ModelVersion, RoundId, SystemClock,
};
use fedreg_registry::{MemorySink, RegistryCore, TracingSink};
use std::sync::Arc;
use tracing::info;

const ROUND_DURATION: u64 = 3600;

pub fn run() -> Result<()> {
    let clock = Arc::new(ManualClock::new(SystemClock.now()));
    let central = Identity::new("central")?;
    let hospital_a = Identity::new("hospital-a")?;
    let hospital_b = Identity::new("hospital-b")?;

    let ledger = Box::new(MemoryLedger::new());
    let registry = RegistryCore::new(central.clone(), clock.clone(), ledger)?;
    let events = Arc::new(MemorySink::new());
    registry.subscribe(Arc::new(TracingSink))?;
    registry.subscribe(events.clone())?;

    let round_id = RoundId::from(clock.now() * 1000);
    let model_v = ModelVersion::from_label("v1.0")?;
    let deadline = clock.now() + ROUND_DURATION;

    registry.create_round(&central, round_id, model_v, deadline)?;
    println!("Round created");
    println!("  - roundId : {}", round_id);
    println!("  - modelV  : {}", model_v.to_hex());
    println!("  - deadline: {}", deadline);

    for hospital in [&hospital_a, &hospital_b] {
        let update_hash = Digest32::from(blake3::hash(format!("{}_update", hospital).as_bytes()));
        let receipt = registry.submit_update(hospital, round_id, model_v, update_hash)?;
        println!("Submitted by {} (seq {}, tx {})", hospital, receipt.seq_no, receipt.tx_hash);
    }

    match registry.submit_update(&hospital_a, round_id, model_v, Digest32::ZERO) {
        Err(e) => println!("Duplicate submission rejected: {}", e.code()),
        Ok(_) => anyhow::bail!("duplicate submission was accepted"),
    }

    match registry.finalize_round(&central, round_id, Digest32::ZERO, model_v) {
        Err(e) => println!("Early finalization rejected: {}", e.code()),
        Ok(_) => anyhow::bail!("round finalized before its deadline"),
    }

    clock.advance(ROUND_DURATION);
    info!(now = clock.now(), "Clock advanced past deadline");

    let submissions = registry.list_submissions(round_id)?.unwrap_or_default();
    let mut hasher = blake3::Hasher::new();
    for submission in &submissions {
        hasher.update(submission.update_hash.as_bytes());
    }
    let aggregated = Digest32::from(hasher.finalize());
    let new_model_v = ModelVersion::from_label("v1.1")?;

    registry.finalize_round(&central, round_id, aggregated, new_model_v)?;
    println!("Round finalized");
    println!("  - aggregatedUpdateHash: {}", aggregated);
    println!("  - newModelVersion     : {}", new_model_v);

    if let Some(sub) = registry.get_submission(&hospital_a, round_id)? {
        println!("Submission: {}", serde_json::to_string_pretty(&sub)?);
    }

    ensure!(events.len() == 4, "expected 4 events, saw {}", events.len());
    Ok(())
}
