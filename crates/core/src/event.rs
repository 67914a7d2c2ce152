//! Domain events emitted by the registry.
//!
//! Every accepted mutation produces exactly one [`RegistryEvent`], which is
//! appended to the transaction ledger and then handed to the registered
//! [`EventSink`]s together with its [`Receipt`]. Sinks are notifications only;
//! a failing sink never affects the operation that produced the event.

use crate::types::{Digest32, Identity, ModelVersion, RoundId, UpdateHash};
use serde::{Deserialize, Serialize};

/// A state change recorded by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RegistryEvent {
    /// Genesis record fixing the owner
    RegistryDeployed {
        /// Designated owner, immutable afterwards
        owner: Identity,
    },
    /// A round was opened
    RoundCreated {
        /// New round id
        round_id: RoundId,
        /// Version submissions must match
        expected_model_version: ModelVersion,
        /// Unix seconds
        submit_deadline: u64,
    },
    /// A participant submitted its update
    UpdateSubmitted {
        /// Submitting participant
        participant: Identity,
        /// Target round
        round_id: RoundId,
        /// Claimed training version
        model_version: ModelVersion,
        /// Commitment to the update payload
        update_hash: UpdateHash,
    },
    /// The owner closed the round with its aggregation result
    RoundFinalized {
        /// Finalized round
        round_id: RoundId,
        /// Digest of the aggregated update
        aggregated_update_hash: Digest32,
        /// Version produced by the round
        new_model_version: ModelVersion,
    },
}

impl RegistryEvent {
    /// Dotted event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            RegistryEvent::RegistryDeployed { .. } => event_types::REGISTRY_DEPLOYED,
            RegistryEvent::RoundCreated { .. } => event_types::ROUND_CREATED,
            RegistryEvent::UpdateSubmitted { .. } => event_types::UPDATE_SUBMITTED,
            RegistryEvent::RoundFinalized { .. } => event_types::ROUND_FINALIZED,
        }
    }

    /// Round the event is correlated with, if any.
    pub fn round_id(&self) -> Option<RoundId> {
        match self {
            RegistryEvent::RegistryDeployed { .. } => None,
            RegistryEvent::RoundCreated { round_id, .. }
            | RegistryEvent::UpdateSubmitted { round_id, .. }
            | RegistryEvent::RoundFinalized { round_id, .. } => Some(*round_id),
        }
    }
}

/// Durable proof that a mutation was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    /// Position in the transaction ledger (1-based)
    pub seq_no: u64,
    /// Chain hash of the ledger entry
    pub tx_hash: Digest32,
    /// Clock reading the mutation was applied at (Unix seconds)
    pub timestamp: u64,
}

/// Observer of registry events.
pub trait EventSink: Send + Sync {
    /// Called once per accepted mutation, after it is durable.
    fn publish(&self, receipt: &Receipt, event: &RegistryEvent);
}

/// Standard event type names.
pub mod event_types {
    pub const REGISTRY_DEPLOYED: &str = "registry.deployed";
    pub const ROUND_CREATED: &str = "round.created";
    pub const UPDATE_SUBMITTED: &str = "update.submitted";
    pub const ROUND_FINALIZED: &str = "round.finalized";
}
