//! Core functionality for fedreg, the federated-learning round registry.
//!
//! This crate provides the boundary types, time sources, domain events,
//! configuration, logging and the durable transaction ledger used by the
//! registry and its front ends.

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod ledger;
pub mod logging;
pub mod types;

pub use clock::{Clock, ClockSource, ManualClock, MonotonicClock, SystemClock};
pub use config::Config;
pub use error::{CoreError, Result};
pub use event::{EventSink, Receipt, RegistryEvent};
pub use ledger::{
    LedgerEntry, LedgerError, LedgerHealth, LedgerMetrics, MemoryLedger, TransactionLog,
};
#[cfg(feature = "sqlite")]
pub use ledger::SqliteLedger;
pub use types::{
    Digest32, Identity, ModelVersion, Round, RoundId, RoundPhase, Submission, UpdateHash,
};
