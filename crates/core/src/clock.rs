//! Time sources for deadline checks.
//!
//! The registry never reads the process clock directly. A host supplies a
//! [`Clock`]; ledger-agreed clocks report [`ClockSource::Ledger`], anything
//! backed by the local wall clock reports [`ClockSource::Local`] so the
//! registry can flag the extra trust assumption.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Where a clock's readings come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockSource {
    /// Host-agreed, tamper-evident time (block time or equivalent)
    Ledger,
    /// This process's wall clock
    Local,
}

/// Current time in Unix seconds.
pub trait Clock: Send + Sync {
    /// Current time (Unix seconds)
    fn now(&self) -> u64;

    /// Provenance of the readings
    fn source(&self) -> ClockSource;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> u64 {
        (**self).now()
    }

    fn source(&self) -> ClockSource {
        (**self).source()
    }
}

/// Host-driven clock that only moves forward.
///
/// Stands in for a ledger's block time: the host advances it as blocks are
/// produced.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Start at `start` Unix seconds.
    pub fn new(start: u64) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move to `t`; earlier values are ignored.
    pub fn set(&self, t: u64) {
        self.now.fetch_max(t, Ordering::SeqCst);
    }

    /// Move forward by `secs`.
    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn source(&self) -> ClockSource {
        ClockSource::Ledger
    }
}

/// Wall clock of the local process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }

    fn source(&self) -> ClockSource {
        ClockSource::Local
    }
}

/// Never returns less than the highest reading it has produced or been seeded with.
pub struct MonotonicClock<C> {
    inner: C,
    floor: AtomicU64,
}

impl<C: Clock> MonotonicClock<C> {
    /// Wrap `inner` with a floor of zero.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            floor: AtomicU64::new(0),
        }
    }

    /// Raise the floor to at least `t`.
    pub fn seed(&self, t: u64) {
        self.floor.fetch_max(t, Ordering::SeqCst);
    }

    /// The wrapped clock.
    pub fn inner(&self) -> &C {
        &self.inner
    }
}

impl<C: Clock> Clock for MonotonicClock<C> {
    fn now(&self) -> u64 {
        let t = self.inner.now();
        let prev = self.floor.fetch_max(t, Ordering::SeqCst);
        prev.max(t)
    }

    fn source(&self) -> ClockSource {
        self.inner.source()
    }
}
