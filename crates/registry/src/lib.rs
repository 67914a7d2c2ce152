//! Federated-learning round registry.
//!
//! This crate coordinates training rounds between one owner and many
//! participants. It handles:
//! - Round creation by the owner, with a fixed expected model version and deadline
//! - One update submission per participant per round, before the deadline
//! - Single, terminal finalization by the owner after the deadline
//! - Durable receipts via the transaction ledger in `fedreg-core`
//! - Event fan-out to observers
//!
//! # Examples
//!
//! ```no_run
//! use fedreg_core::{Digest32, Identity, ManualClock, MemoryLedger, ModelVersion, RoundId};
//! use fedreg_registry::RegistryCore;
//! use std::sync::Arc;
//!
//! let clock = Arc::new(ManualClock::new(1_700_000_000));
//! let owner = Identity::new("central").unwrap();
//! let ledger = Box::new(MemoryLedger::new());
//! let registry = RegistryCore::new(owner.clone(), clock.clone(), ledger).unwrap();
//!
//! let v1 = ModelVersion::from_label("v1.0").unwrap();
//! registry.create_round(&owner, RoundId::from(12u64), v1, 1_700_003_600).unwrap();
//!
//! let hospital = Identity::new("hospital-a").unwrap();
//! registry
//!     .submit_update(&hospital, RoundId::from(12u64), v1, Digest32::new([7u8; 32]))
//!     .unwrap();
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod registry;
pub mod sink;
mod store;

pub use error::{RegistryError, Result};
pub use registry::RegistryCore;
pub use sink::{BroadcastSink, EventMessage, MemorySink, TracingSink};
