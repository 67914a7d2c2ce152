//! Test utilities for registry integration tests

use fedreg_core::{
    Digest32, Identity, ManualClock, MemoryLedger, ModelVersion, SqliteLedger, TransactionLog,
};
use fedreg_registry::{MemorySink, RegistryCore};
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Chain time every fixture starts at
pub const T0: u64 = 1_700_000_000;

/// Owner identity used by all fixtures
pub const CENTRAL: &str = "central";

/// Initialize tracing only if not already initialized
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// Fresh SQLite path under the system temp dir
pub fn temp_db_path(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}_{}.db", prefix, uuid::Uuid::new_v4()))
}

/// Remove a SQLite database and its WAL side files
pub fn remove_db(path: &Path) {
    let _ = std::fs::remove_file(path);
    for suffix in ["-wal", "-shm"] {
        let mut side = path.as_os_str().to_owned();
        side.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(side));
    }
}

pub fn owner() -> Identity {
    Identity::new(CENTRAL).unwrap()
}

/// `hospital-<n>`
pub fn hospital(n: usize) -> Identity {
    Identity::new(format!("hospital-{}", n)).unwrap()
}

/// Short-string model version tag
pub fn version(label: &str) -> ModelVersion {
    ModelVersion::from_label(label).unwrap()
}

/// BLAKE3 commitment to `data`
pub fn update_hash(data: &[u8]) -> Digest32 {
    Digest32::from(blake3::hash(data))
}

/// Commitment to a random payload
pub fn random_update_hash() -> Digest32 {
    let mut payload = [0u8; 64];
    rand::thread_rng().fill_bytes(&mut payload);
    update_hash(&payload)
}

/// A deployed registry on a manual clock with an event recorder attached
pub struct TestRegistry {
    pub clock: Arc<ManualClock>,
    pub registry: Arc<RegistryCore>,
    pub events: Arc<MemorySink>,
    pub owner: Identity,
}

impl TestRegistry {
    /// Deploy onto an in-memory ledger
    pub fn in_memory() -> Self {
        Self::deploy(Box::new(MemoryLedger::new()))
    }

    /// Deploy onto a new SQLite ledger at `path`
    pub fn sqlite(path: &Path) -> Self {
        Self::deploy(Box::new(SqliteLedger::open(path).unwrap()))
    }

    fn deploy(ledger: Box<dyn TransactionLog>) -> Self {
        let clock = Arc::new(ManualClock::new(T0));
        let registry = RegistryCore::new(owner(), clock.clone(), ledger).unwrap();
        Self::wrap(clock, registry)
    }

    /// Reopen the SQLite ledger at `path` with a clock reading `now`
    pub fn reopen(path: &Path, now: u64) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        let ledger = SqliteLedger::open(path).unwrap();
        let registry = RegistryCore::open(Box::new(ledger), clock.clone(), Some(&owner())).unwrap();
        Self::wrap(clock, registry)
    }

    fn wrap(clock: Arc<ManualClock>, registry: RegistryCore) -> Self {
        let events = Arc::new(MemorySink::new());
        registry.subscribe(events.clone()).unwrap();
        Self {
            clock,
            registry: Arc::new(registry),
            events,
            owner: owner(),
        }
    }

    /// Event type names seen so far
    pub fn event_types(&self) -> Vec<&'static str> {
        self.events
            .events()
            .iter()
            .map(|(_, e)| e.event_type())
            .collect()
    }
}
