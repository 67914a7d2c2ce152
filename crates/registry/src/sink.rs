//! Event sinks for registry observers.
//!
//! Sinks are fire-and-forget: they cannot fail an operation and must not
//! block, since the registry calls them while still holding the round lock.

use fedreg_core::{EventSink, Receipt, RegistryEvent};
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{info, trace, warn};

/// Message carried by [`BroadcastSink`].
pub type EventMessage = (Receipt, RegistryEvent);

/// Fans events out to any number of async subscribers.
///
/// Slow subscribers lag and lose the oldest messages rather than blocking the
/// registry; they observe `RecvError::Lagged` and can re-read the ledger.
pub struct BroadcastSink {
    tx: broadcast::Sender<EventMessage>,
}

impl BroadcastSink {
    /// Create a sink buffering up to `capacity` messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// New receiver seeing events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<EventMessage> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, receipt: &Receipt, event: &RegistryEvent) {
        if self.tx.send((*receipt, event.clone())).is_err() {
            trace!(seq_no = receipt.seq_no, "No subscribers for registry event");
        }
    }
}

/// Logs every event as structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, receipt: &Receipt, event: &RegistryEvent) {
        match event {
            RegistryEvent::RegistryDeployed { owner } => {
                info!(seq_no = receipt.seq_no, owner = %owner, "[event] RegistryDeployed");
            }
            RegistryEvent::RoundCreated {
                round_id,
                expected_model_version,
                submit_deadline,
            } => {
                info!(
                    seq_no = receipt.seq_no,
                    round_id = %round_id,
                    expected_model_version = %expected_model_version.to_hex(),
                    submit_deadline = submit_deadline,
                    "[event] RoundCreated"
                );
            }
            RegistryEvent::UpdateSubmitted {
                participant,
                round_id,
                model_version,
                update_hash,
            } => {
                info!(
                    seq_no = receipt.seq_no,
                    hospital = %participant,
                    round_id = %round_id,
                    model_version = %model_version.to_hex(),
                    update_hash = %update_hash,
                    "[event] UpdateSubmitted"
                );
            }
            RegistryEvent::RoundFinalized {
                round_id,
                aggregated_update_hash,
                new_model_version,
            } => {
                info!(
                    seq_no = receipt.seq_no,
                    round_id = %round_id,
                    aggregated_update_hash = %aggregated_update_hash,
                    new_model_version = %new_model_version.to_hex(),
                    "[event] RoundFinalized"
                );
            }
        }
    }
}

/// Keeps every event in publication order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<EventMessage>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far.
    pub fn events(&self) -> Vec<EventMessage> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of events received.
    pub fn len(&self) -> usize {
        self.events().len()
    }

    /// True until the first event arrives.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn publish(&self, receipt: &Receipt, event: &RegistryEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push((*receipt, event.clone())),
            Err(e) => warn!(error = %e, "MemorySink poisoned; event dropped"),
        }
    }
}
