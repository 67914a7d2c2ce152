//! Ledger tail: prints every registry event as it is committed.

use anyhow::{bail, Context, Result};
use fedreg_core::{LedgerEntry, RegistryEvent, SqliteLedger, TransactionLog};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const BATCH: usize = 256;

/// One human-readable line per ledger entry.
pub fn render(entry: &LedgerEntry) -> String {
    let body = match &entry.event {
        RegistryEvent::RegistryDeployed { owner } => {
            format!("RegistryDeployed {{ owner: {} }}", owner)
        }
        RegistryEvent::RoundCreated {
            round_id,
            expected_model_version,
            submit_deadline,
        } => format!(
            "RoundCreated {{ roundId: {}, expectedModelVersion: {}, submitDeadline: {} }}",
            round_id,
            expected_model_version.to_hex(),
            submit_deadline
        ),
        RegistryEvent::UpdateSubmitted {
            participant,
            round_id,
            model_version,
            update_hash,
        } => format!(
            "UpdateSubmitted {{ hospital: {}, roundId: {}, modelVersion: {}, updateHash: {} }}",
            participant,
            round_id,
            model_version.to_hex(),
            update_hash
        ),
        RegistryEvent::RoundFinalized {
            round_id,
            aggregated_update_hash,
            new_model_version,
        } => format!(
            "RoundFinalized {{ roundId: {}, aggregatedUpdateHash: {}, newModelVersion: {} }}",
            round_id,
            aggregated_update_hash,
            new_model_version.to_hex()
        ),
    };
    format!("[event] #{} {}", entry.seq_no, body)
}

/// Poll the ledger from `from_seq_no` until interrupted.
pub async fn run(ledger_path: &Path, from_seq_no: u64, poll: Duration) -> Result<()> {
    if !ledger_path.exists() {
        bail!(
            "no registry ledger at {}; run `fedreg-node deploy` first",
            ledger_path.display()
        );
    }
    let ledger = SqliteLedger::open(ledger_path)
        .with_context(|| format!("opening ledger {}", ledger_path.display()))?;

    println!("Listening on: {}", ledger_path.display());
    info!(from_seq_no, poll_ms = poll.as_millis() as u64, "Ledger listener started");

    let mut next = from_seq_no.max(1);
    let mut ticker = tokio::time::interval(poll);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!(next_seq_no = next, "Ledger listener stopped");
                return Ok(());
            }
            _ = ticker.tick() => {
                loop {
                    let batch = ledger.entries_from(next, BATCH)?;
                    if batch.is_empty() {
                        break;
                    }
                    debug!(count = batch.len(), from = next, "New ledger entries");
                    for entry in &batch {
                        println!("{}", render(entry));
                        next = entry.seq_no + 1;
                    }
                }
            }
        }
    }
}
