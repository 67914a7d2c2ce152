//! RegistryCore - round life-cycle and submission authorization
//!
//! Holds all round and submission state and enforces every rule:
//!
//! - Only the owner fixed at deployment may create and finalize rounds
//! - Round ids are never reused
//! - Each participant submits at most once per round, strictly before the
//!   deadline, against the round's expected model version
//! - A round is finalized exactly once, at or after its deadline
//!
//! # Ordering
//!
//! Each mutation takes the ledger lock, catches up on entries other handles
//! appended to the same ledger, then validates, appends, applies the change
//! in memory and publishes its event. The append names the head this handle
//! has applied, so a concurrent writer in another process turns it into a
//! retry against fresh state instead of a forked history. A rejected call
//! changes nothing and publishes nothing. Events therefore reach sinks in
//! ledger order.
//!
//! Locks are always taken ledger first, then the round table, then a round
//! slot. Reads skip the ledger lock.
//!
//! # Per-operation check order
//!
//! - `create_round`: owner, then id uniqueness
//! - `submit_update`: existence, finalized, deadline, version, duplicate
//! - `finalize_round`: owner, existence, finalized, deadline

use crate::error::{RegistryError, Result};
use crate::store::{lock_slot, RoundSlot, RoundTable};
use fedreg_core::{
    Clock, ClockSource, Digest32, EventSink, Identity, LedgerEntry, LedgerError, ModelVersion,
    MonotonicClock, Receipt, RegistryEvent, Round, RoundId, RoundPhase, Submission,
    TransactionLog, UpdateHash,
};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

/// Entries fetched per batch while catching up with a ledger.
const REPLAY_BATCH: usize = 1024;

/// Appends attempted before a mutation gives up on a busy shared ledger.
const MAX_APPEND_ATTEMPTS: usize = 8;

/// The ledger together with the newest entry applied to in-memory state.
struct LedgerState {
    log: Box<dyn TransactionLog>,
    applied: u64,
}

/// The training-round registry.
pub struct RegistryCore {
    owner: Identity,
    genesis: Receipt,
    clock: MonotonicClock<Arc<dyn Clock>>,
    ledger: Mutex<LedgerState>,
    rounds: RoundTable,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl RegistryCore {
    /// Deploy a new registry owned by `owner` onto an empty ledger.
    ///
    /// Appends the genesis record; the owner is immutable afterwards.
    pub fn new(
        owner: Identity,
        clock: Arc<dyn Clock>,
        mut ledger: Box<dyn TransactionLog>,
    ) -> Result<Self> {
        if ledger.latest()?.is_some() {
            return Err(RegistryError::AlreadyDeployed);
        }
        warn_if_local(clock.as_ref());

        let clock = MonotonicClock::new(clock);
        let event = RegistryEvent::RegistryDeployed {
            owner: owner.clone(),
        };
        let genesis = match ledger.append(0, clock.now(), &event) {
            Ok(receipt) => receipt,
            Err(LedgerError::StaleHead { .. }) => return Err(RegistryError::AlreadyDeployed),
            Err(e) => return Err(e.into()),
        };

        info!(
            owner = %owner,
            registry_id = %genesis.tx_hash,
            "Registry deployed"
        );

        Ok(Self {
            owner,
            clock,
            ledger: Mutex::new(LedgerState {
                log: ledger,
                applied: genesis.seq_no,
            }),
            genesis,
            rounds: RoundTable::new(),
            sinks: RwLock::new(Vec::new()),
        })
    }

    /// Rebuild a registry from an existing ledger.
    ///
    /// History is applied as recorded, without re-validation. The clock is
    /// seeded with the last recorded timestamp so time never runs backwards
    /// across restarts. When `expected_owner` is given it must match the
    /// owner in the genesis record.
    pub fn open(
        ledger: Box<dyn TransactionLog>,
        clock: Arc<dyn Clock>,
        expected_owner: Option<&Identity>,
    ) -> Result<Self> {
        warn_if_local(clock.as_ref());

        let first = ledger.entries_from(1, 1)?;
        let (owner, genesis) = match first.first() {
            Some(LedgerEntry {
                event: RegistryEvent::RegistryDeployed { owner },
                ..
            }) => (owner.clone(), first[0].receipt()),
            Some(entry) => {
                return Err(RegistryError::Replay {
                    seq_no: entry.seq_no,
                    reason: format!("first entry is {}", entry.event.event_type()),
                })
            }
            None => return Err(RegistryError::NotDeployed),
        };

        if let Some(expected) = expected_owner {
            if expected != &owner {
                return Err(RegistryError::OwnerMismatch {
                    expected: expected.clone(),
                    recorded: owner,
                });
            }
        }

        let registry = Self {
            owner,
            clock: MonotonicClock::new(clock),
            ledger: Mutex::new(LedgerState {
                log: ledger,
                applied: genesis.seq_no,
            }),
            genesis,
            rounds: RoundTable::new(),
            sinks: RwLock::new(Vec::new()),
        };

        let replayed = {
            let mut state = registry.lock_ledger()?;
            registry.catch_up(&mut state)?
        };

        info!(
            owner = %registry.owner,
            registry_id = %registry.genesis.tx_hash,
            entries = replayed,
            "Registry reopened from ledger"
        );

        Ok(registry)
    }

    /// Apply entries other handles appended to the ledger since this one
    /// last looked, returning how many were applied.
    ///
    /// Mutations do this on their own; call it to bring reads up to date.
    pub fn refresh(&self) -> Result<u64> {
        let mut state = self.lock_ledger()?;
        let applied = self.catch_up(&mut state)?;
        if applied > 0 {
            debug!(entries = applied, head = state.applied, "Registry caught up");
        }
        Ok(applied)
    }

    fn catch_up(&self, state: &mut LedgerState) -> Result<u64> {
        let mut applied = 0u64;
        loop {
            let batch = state.log.entries_from(state.applied + 1, REPLAY_BATCH)?;
            if batch.is_empty() {
                break;
            }
            for entry in batch {
                if entry.seq_no != state.applied + 1 {
                    return Err(RegistryError::Replay {
                        seq_no: entry.seq_no,
                        reason: format!("expected seq_no {}", state.applied + 1),
                    });
                }
                self.apply_recorded(&entry)?;
                self.clock.seed(entry.timestamp);
                state.applied = entry.seq_no;
                applied += 1;
                self.publish(&entry.receipt(), &entry.event);
            }
        }
        Ok(applied)
    }

    /// Append `event` after the head this handle has applied.
    ///
    /// Returns `None` when another writer got there first; the caller
    /// catches up and validates again.
    fn append(
        &self,
        state: &mut LedgerState,
        now: u64,
        event: &RegistryEvent,
    ) -> Result<Option<Receipt>> {
        match state.log.append(state.applied, now, event) {
            Ok(receipt) => {
                state.applied = receipt.seq_no;
                Ok(Some(receipt))
            }
            Err(LedgerError::StaleHead { expected, actual }) => {
                debug!(
                    expected,
                    actual,
                    event_type = event.event_type(),
                    "Ledger moved under this handle; retrying"
                );
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn apply_recorded(&self, entry: &LedgerEntry) -> Result<()> {
        let fail = |reason: String| RegistryError::Replay {
            seq_no: entry.seq_no,
            reason,
        };

        match &entry.event {
            RegistryEvent::RegistryDeployed { .. } => {
                Err(fail("duplicate genesis record".to_string()))
            }
            RegistryEvent::RoundCreated {
                round_id,
                expected_model_version,
                submit_deadline,
            } => {
                let mut rounds = self.rounds.write()?;
                if rounds.contains_key(round_id) {
                    return Err(fail(format!("round {} created twice", round_id)));
                }
                let round = Round::new(*round_id, *expected_model_version, *submit_deadline);
                rounds.insert(*round_id, Arc::new(Mutex::new(RoundSlot::new(round))));
                Ok(())
            }
            RegistryEvent::UpdateSubmitted {
                participant,
                round_id,
                model_version,
                update_hash,
            } => {
                let handle = self
                    .rounds
                    .slot(round_id)?
                    .ok_or_else(|| fail(format!("submission to unknown round {}", round_id)))?;
                let mut slot = lock_slot(&handle)?;
                if slot.submissions.contains_key(participant) {
                    return Err(fail(format!(
                        "{} submitted twice to round {}",
                        participant, round_id
                    )));
                }
                slot.submissions.insert(
                    participant.clone(),
                    Submission {
                        participant: participant.clone(),
                        round_id: *round_id,
                        model_version: *model_version,
                        update_hash: *update_hash,
                        submitted_at: entry.timestamp,
                    },
                );
                Ok(())
            }
            RegistryEvent::RoundFinalized {
                round_id,
                aggregated_update_hash,
                new_model_version,
            } => {
                let handle = self
                    .rounds
                    .slot(round_id)?
                    .ok_or_else(|| fail(format!("finalization of unknown round {}", round_id)))?;
                let mut slot = lock_slot(&handle)?;
                if slot.round.finalized {
                    return Err(fail(format!("round {} finalized twice", round_id)));
                }
                slot.round.finalized = true;
                slot.round.aggregated_update_hash = Some(*aggregated_update_hash);
                slot.round.new_model_version = Some(*new_model_version);
                Ok(())
            }
        }
    }

    /// The designated owner.
    pub fn owner(&self) -> &Identity {
        &self.owner
    }

    /// Receipt of the genesis record; its hash identifies the registry.
    pub fn genesis_receipt(&self) -> &Receipt {
        &self.genesis
    }

    /// Current reading of the registry's (monotonic) clock.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Register an observer for subsequent events.
    pub fn subscribe(&self, sink: Arc<dyn EventSink>) -> Result<()> {
        let mut sinks = self
            .sinks
            .write()
            .map_err(|e| RegistryError::LockPoisoned(format!("sinks: {}", e)))?;
        sinks.push(sink);
        Ok(())
    }

    /// Open a new round. Owner only.
    pub fn create_round(
        &self,
        caller: &Identity,
        round_id: RoundId,
        expected_model_version: ModelVersion,
        submit_deadline: u64,
    ) -> Result<Receipt> {
        self.try_create_round(caller, round_id, expected_model_version, submit_deadline)
            .map_err(|e| rejected("create_round", caller, &round_id, e))
    }

    fn try_create_round(
        &self,
        caller: &Identity,
        round_id: RoundId,
        expected_model_version: ModelVersion,
        submit_deadline: u64,
    ) -> Result<Receipt> {
        self.ensure_owner(caller)?;

        let event = RegistryEvent::RoundCreated {
            round_id,
            expected_model_version,
            submit_deadline,
        };

        let mut ledger = self.lock_ledger()?;
        let state = &mut *ledger;
        for _ in 0..MAX_APPEND_ATTEMPTS {
            self.catch_up(state)?;

            let mut rounds = self.rounds.write()?;
            if rounds.contains_key(&round_id) {
                return Err(RegistryError::RoundAlreadyExists(round_id));
            }

            let Some(receipt) = self.append(state, self.clock.now(), &event)? else {
                continue;
            };

            let round = Round::new(round_id, expected_model_version, submit_deadline);
            rounds.insert(round_id, Arc::new(Mutex::new(RoundSlot::new(round))));

            info!(
                round_id = %round_id,
                expected_model_version = %expected_model_version,
                submit_deadline = submit_deadline,
                seq_no = receipt.seq_no,
                "Round created"
            );

            self.publish(&receipt, &event);
            return Ok(receipt);
        }
        Err(RegistryError::Contended {
            attempts: MAX_APPEND_ATTEMPTS,
        })
    }

    /// Submit `caller`'s update for a round.
    pub fn submit_update(
        &self,
        caller: &Identity,
        round_id: RoundId,
        model_version: ModelVersion,
        update_hash: UpdateHash,
    ) -> Result<Receipt> {
        self.try_submit_update(caller, round_id, model_version, update_hash)
            .map_err(|e| rejected("submit_update", caller, &round_id, e))
    }

    fn try_submit_update(
        &self,
        caller: &Identity,
        round_id: RoundId,
        model_version: ModelVersion,
        update_hash: UpdateHash,
    ) -> Result<Receipt> {
        let event = RegistryEvent::UpdateSubmitted {
            participant: caller.clone(),
            round_id,
            model_version,
            update_hash,
        };

        let mut ledger = self.lock_ledger()?;
        let state = &mut *ledger;
        for _ in 0..MAX_APPEND_ATTEMPTS {
            self.catch_up(state)?;

            let handle = self
                .rounds
                .slot(&round_id)?
                .ok_or(RegistryError::RoundNotFound(round_id))?;
            let mut slot = lock_slot(&handle)?;

            if slot.round.finalized {
                return Err(RegistryError::RoundFinalized(round_id));
            }

            let now = self.clock.now();
            if now >= slot.round.submit_deadline {
                return Err(RegistryError::RoundClosed {
                    round_id,
                    deadline: slot.round.submit_deadline,
                    now,
                });
            }

            if model_version != slot.round.expected_model_version {
                return Err(RegistryError::ModelVersionMismatch {
                    round_id,
                    expected: slot.round.expected_model_version,
                    submitted: model_version,
                });
            }

            if slot.submissions.contains_key(caller) {
                return Err(RegistryError::AlreadySubmitted {
                    participant: caller.clone(),
                    round_id,
                });
            }

            let Some(receipt) = self.append(state, now, &event)? else {
                continue;
            };

            slot.submissions.insert(
                caller.clone(),
                Submission {
                    participant: caller.clone(),
                    round_id,
                    model_version,
                    update_hash,
                    submitted_at: now,
                },
            );

            info!(
                participant = %caller,
                round_id = %round_id,
                update_hash = %update_hash,
                seq_no = receipt.seq_no,
                "Update submitted"
            );

            self.publish(&receipt, &event);
            return Ok(receipt);
        }
        Err(RegistryError::Contended {
            attempts: MAX_APPEND_ATTEMPTS,
        })
    }

    /// Close a round with its aggregation result. Owner only.
    pub fn finalize_round(
        &self,
        caller: &Identity,
        round_id: RoundId,
        aggregated_update_hash: Digest32,
        new_model_version: ModelVersion,
    ) -> Result<Receipt> {
        self.try_finalize_round(caller, round_id, aggregated_update_hash, new_model_version)
            .map_err(|e| rejected("finalize_round", caller, &round_id, e))
    }

    fn try_finalize_round(
        &self,
        caller: &Identity,
        round_id: RoundId,
        aggregated_update_hash: Digest32,
        new_model_version: ModelVersion,
    ) -> Result<Receipt> {
        self.ensure_owner(caller)?;

        let event = RegistryEvent::RoundFinalized {
            round_id,
            aggregated_update_hash,
            new_model_version,
        };

        let mut ledger = self.lock_ledger()?;
        let state = &mut *ledger;
        for _ in 0..MAX_APPEND_ATTEMPTS {
            self.catch_up(state)?;

            let handle = self
                .rounds
                .slot(&round_id)?
                .ok_or(RegistryError::RoundNotFound(round_id))?;
            let mut slot = lock_slot(&handle)?;

            if slot.round.finalized {
                return Err(RegistryError::AlreadyFinalized(round_id));
            }

            let now = self.clock.now();
            if now < slot.round.submit_deadline {
                return Err(RegistryError::RoundNotEnded {
                    round_id,
                    deadline: slot.round.submit_deadline,
                    now,
                });
            }

            let Some(receipt) = self.append(state, now, &event)? else {
                continue;
            };

            slot.round.finalized = true;
            slot.round.aggregated_update_hash = Some(aggregated_update_hash);
            slot.round.new_model_version = Some(new_model_version);

            info!(
                round_id = %round_id,
                aggregated_update_hash = %aggregated_update_hash,
                new_model_version = %new_model_version,
                submissions = slot.submissions.len(),
                seq_no = receipt.seq_no,
                "Round finalized"
            );

            self.publish(&receipt, &event);
            return Ok(receipt);
        }
        Err(RegistryError::Contended {
            attempts: MAX_APPEND_ATTEMPTS,
        })
    }

    /// A participant's submission for a round, if one exists.
    pub fn get_submission(
        &self,
        participant: &Identity,
        round_id: RoundId,
    ) -> Result<Option<Submission>> {
        debug!(participant = %participant, round_id = %round_id, "get_submission");
        self.rounds.submission(participant, &round_id)
    }

    /// Every submission of a round, ordered by participant; `None` if the
    /// round does not exist.
    pub fn list_submissions(&self, round_id: RoundId) -> Result<Option<Vec<Submission>>> {
        debug!(round_id = %round_id, "list_submissions");
        self.rounds.submissions(&round_id)
    }

    /// Snapshot of a round, if it exists.
    pub fn get_round(&self, round_id: RoundId) -> Result<Option<Round>> {
        debug!(round_id = %round_id, "get_round");
        self.rounds.round(&round_id)
    }

    /// Phase of a round at the current clock reading.
    pub fn round_phase(&self, round_id: RoundId) -> Result<Option<RoundPhase>> {
        Ok(self.get_round(round_id)?.map(|r| r.phase(self.clock.now())))
    }

    /// Number of rounds ever created.
    pub fn round_count(&self) -> Result<usize> {
        self.rounds.len()
    }

    /// Ledger entries from `from_seq_no`, oldest first.
    pub fn ledger_entries(&self, from_seq_no: u64, limit: usize) -> Result<Vec<LedgerEntry>> {
        let state = self.lock_ledger()?;
        Ok(state.log.entries_from(from_seq_no, limit)?)
    }

    fn ensure_owner(&self, caller: &Identity) -> Result<()> {
        if caller != &self.owner {
            return Err(RegistryError::OnlyOwner {
                caller: caller.clone(),
            });
        }
        Ok(())
    }

    fn lock_ledger(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.ledger
            .lock()
            .map_err(|e| RegistryError::LockPoisoned(format!("ledger: {}", e)))
    }

    fn publish(&self, receipt: &Receipt, event: &RegistryEvent) {
        match self.sinks.read() {
            Ok(sinks) => {
                for sink in sinks.iter() {
                    sink.publish(receipt, event);
                }
            }
            Err(e) => warn!(error = %e, "Event sinks unavailable; event not published"),
        }
    }
}

fn warn_if_local(clock: &dyn Clock) {
    if clock.source() == ClockSource::Local {
        warn!("Registry is using the local process clock; deadlines trust this host's time");
    }
}

fn rejected(
    op: &'static str,
    caller: &Identity,
    round_id: &RoundId,
    err: RegistryError,
) -> RegistryError {
    warn!(
        op = op,
        caller = %caller,
        round_id = %round_id,
        code = err.code(),
        error = %err,
        "Registry operation rejected"
    );
    err
}
