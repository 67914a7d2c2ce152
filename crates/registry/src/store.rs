//! Round and submission tables with one mutual-exclusion domain per round.
//!
//! Creation takes the table-wide write lock. Everything else looks the slot
//! up under a read lock, releases it, and then serializes on the slot's own
//! mutex, so reads of different rounds do not contend. Writers already hold
//! the registry's ledger lock when they get here.

use crate::error::{RegistryError, Result};
use fedreg_core::types::SubmissionMap;
use fedreg_core::{Identity, Round, RoundId, Submission};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockWriteGuard};

/// A round together with its submissions.
#[derive(Debug)]
pub(crate) struct RoundSlot {
    pub round: Round,
    pub submissions: SubmissionMap,
}

impl RoundSlot {
    pub fn new(round: Round) -> Self {
        Self {
            round,
            submissions: HashMap::new(),
        }
    }
}

pub(crate) type SlotHandle = Arc<Mutex<RoundSlot>>;

#[derive(Debug, Default)]
pub(crate) struct RoundTable {
    rounds: RwLock<HashMap<RoundId, SlotHandle>>,
}

impl RoundTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclusive access to the id space, for round creation.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<RoundId, SlotHandle>>> {
        self.rounds
            .write()
            .map_err(|e| RegistryError::LockPoisoned(format!("round table: {}", e)))
    }

    pub fn slot(&self, round_id: &RoundId) -> Result<Option<SlotHandle>> {
        let rounds = self
            .rounds
            .read()
            .map_err(|e| RegistryError::LockPoisoned(format!("round table: {}", e)))?;
        Ok(rounds.get(round_id).cloned())
    }

    pub fn len(&self) -> Result<usize> {
        let rounds = self
            .rounds
            .read()
            .map_err(|e| RegistryError::LockPoisoned(format!("round table: {}", e)))?;
        Ok(rounds.len())
    }

    /// Snapshot of the round, if it exists.
    pub fn round(&self, round_id: &RoundId) -> Result<Option<Round>> {
        let Some(handle) = self.slot(round_id)? else {
            return Ok(None);
        };
        let slot = lock_slot(&handle)?;
        Ok(Some(slot.round.clone()))
    }

    /// Snapshot of one participant's submission, if any.
    pub fn submission(
        &self,
        participant: &Identity,
        round_id: &RoundId,
    ) -> Result<Option<Submission>> {
        let Some(handle) = self.slot(round_id)? else {
            return Ok(None);
        };
        let slot = lock_slot(&handle)?;
        Ok(slot.submissions.get(participant).cloned())
    }

    /// Snapshot of every submission of a round, ordered by participant.
    pub fn submissions(&self, round_id: &RoundId) -> Result<Option<Vec<Submission>>> {
        let Some(handle) = self.slot(round_id)? else {
            return Ok(None);
        };
        let slot = lock_slot(&handle)?;
        let mut all: Vec<Submission> = slot.submissions.values().cloned().collect();
        all.sort_by(|a, b| a.participant.cmp(&b.participant));
        Ok(Some(all))
    }
}

pub(crate) fn lock_slot(handle: &SlotHandle) -> Result<MutexGuard<'_, RoundSlot>> {
    handle
        .lock()
        .map_err(|e| RegistryError::LockPoisoned(format!("round slot: {}", e)))
}
