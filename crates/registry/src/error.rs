//! Registry rejection taxonomy

use fedreg_core::{Identity, LedgerError, ModelVersion, RoundId};
use thiserror::Error;

/// Why a registry operation was rejected.
///
/// Every rejection is atomic: no state changed and no event was published.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Caller is not the designated owner
    #[error("ONLY_OWNER: {caller} is not the registry owner")]
    OnlyOwner {
        /// Rejected caller
        caller: Identity,
    },

    /// `create_round` reused an existing id
    #[error("ROUND_ALREADY_EXISTS: round {0} already exists")]
    RoundAlreadyExists(RoundId),

    /// No round with this id
    #[error("ROUND_NOT_FOUND: round {0} does not exist")]
    RoundNotFound(RoundId),

    /// Submission to a finalized round
    #[error("ROUND_FINALIZED: round {0} is finalized")]
    RoundFinalized(RoundId),

    /// Submission at or after the deadline
    #[error("ROUND_CLOSED: round {round_id} closed at {deadline} (now {now})")]
    RoundClosed {
        /// Target round
        round_id: RoundId,
        /// Round deadline
        deadline: u64,
        /// Clock reading at rejection
        now: u64,
    },

    /// Submitted version differs from the round's expected version
    #[error("MODEL_VERSION_MISMATCH: round {round_id} expects {expected}, got {submitted}")]
    ModelVersionMismatch {
        /// Target round
        round_id: RoundId,
        /// Round's expected version
        expected: ModelVersion,
        /// Version in the submission
        submitted: ModelVersion,
    },

    /// Participant already submitted to this round
    #[error("ALREADY_SUBMITTED: {participant} already submitted to round {round_id}")]
    AlreadySubmitted {
        /// Submitting participant
        participant: Identity,
        /// Target round
        round_id: RoundId,
    },

    /// Second finalization of a round
    #[error("ALREADY_FINALIZED: round {0} is already finalized")]
    AlreadyFinalized(RoundId),

    /// Finalization before the deadline
    #[error("ROUND_NOT_ENDED: round {round_id} ends at {deadline} (now {now})")]
    RoundNotEnded {
        /// Target round
        round_id: RoundId,
        /// Round deadline
        deadline: u64,
        /// Clock reading at rejection
        now: u64,
    },

    /// Transaction ledger failed; nothing was applied
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Other writers kept advancing the shared ledger; nothing was applied
    #[error("Ledger contended: gave up after {attempts} attempts")]
    Contended {
        /// Append attempts made
        attempts: usize,
    },

    /// Opened a ledger without a deployment record
    #[error("Registry not deployed: ledger has no genesis record")]
    NotDeployed,

    /// Deployed onto a ledger that already has history
    #[error("Registry already deployed: ledger is not empty")]
    AlreadyDeployed,

    /// Ledger owner differs from the expected one
    #[error("Owner mismatch: expected {expected}, ledger records {recorded}")]
    OwnerMismatch {
        /// Owner the caller expected
        expected: Identity,
        /// Owner in the genesis record
        recorded: Identity,
    },

    /// Ledger history cannot be replayed
    #[error("Replay failed at seq_no {seq_no}: {reason}")]
    Replay {
        /// Offending entry
        seq_no: u64,
        /// What was inconsistent
        reason: String,
    },

    /// A lock was poisoned by a panicking thread
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl RegistryError {
    /// Stable upper-snake code for the rejection.
    pub fn code(&self) -> &'static str {
        match self {
            RegistryError::OnlyOwner { .. } => "ONLY_OWNER",
            RegistryError::RoundAlreadyExists(_) => "ROUND_ALREADY_EXISTS",
            RegistryError::RoundNotFound(_) => "ROUND_NOT_FOUND",
            RegistryError::RoundFinalized(_) => "ROUND_FINALIZED",
            RegistryError::RoundClosed { .. } => "ROUND_CLOSED",
            RegistryError::ModelVersionMismatch { .. } => "MODEL_VERSION_MISMATCH",
            RegistryError::AlreadySubmitted { .. } => "ALREADY_SUBMITTED",
            RegistryError::AlreadyFinalized(_) => "ALREADY_FINALIZED",
            RegistryError::RoundNotEnded { .. } => "ROUND_NOT_ENDED",
            RegistryError::Ledger(_) => "LEDGER_ERROR",
            RegistryError::Contended { .. } => "LEDGER_CONTENDED",
            RegistryError::NotDeployed => "NOT_DEPLOYED",
            RegistryError::AlreadyDeployed => "ALREADY_DEPLOYED",
            RegistryError::OwnerMismatch { .. } => "OWNER_MISMATCH",
            RegistryError::Replay { .. } => "REPLAY_FAILED",
            RegistryError::LockPoisoned(_) => "LOCK_POISONED",
        }
    }

    /// Whether a registry rule refused the call, as opposed to the ledger,
    /// deployment or process state failing underneath it.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            RegistryError::OnlyOwner { .. }
                | RegistryError::RoundAlreadyExists(_)
                | RegistryError::RoundNotFound(_)
                | RegistryError::RoundFinalized(_)
                | RegistryError::RoundClosed { .. }
                | RegistryError::ModelVersionMismatch { .. }
                | RegistryError::AlreadySubmitted { .. }
                | RegistryError::AlreadyFinalized(_)
                | RegistryError::RoundNotEnded { .. }
        )
    }
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;
