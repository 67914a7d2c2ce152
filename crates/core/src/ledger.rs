//! Transaction Ledger - Append-Only Record of Registry Mutations
//!
//! Every accepted registry mutation is appended here before it becomes
//! visible in memory. The ledger is the single writer that serializes the
//! registry's history and the source it is rebuilt from on restart.
//!
//! # Entry layout
//!
//! - seq_no: 1-based, strictly increasing by one
//! - tx_hash: BLAKE3(prev_tx_hash || seq_no || timestamp || payload)
//! - prev_tx_hash: tx_hash of the previous entry, all zeroes for genesis
//! - timestamp: clock reading the mutation was applied at (Unix seconds)
//! - payload: JSON encoding of the [`RegistryEvent`]
//!
//! # Guarantees
//!
//! - Append-only: no in-place updates or deletes
//! - Chain continuity: verified at append time and on every startup
//! - Durability: the SQLite backend runs in WAL mode
//! - Conditional appends: a writer names the head it last saw and the append
//!   fails with [`LedgerError::StaleHead`] if anyone else wrote since, so
//!   several handles on one database cannot fork the history

use crate::event::{Receipt, RegistryEvent};
use crate::types::Digest32;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteLedger;

/// Errors that can occur in ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Ledger corrupted: {0}")]
    CorruptionDetected(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Stale ledger head: expected seq_no {expected}, found {actual}")]
    StaleHead { expected: u64, actual: u64 },
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::DatabaseError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// One recorded mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq_no: u64,
    pub tx_hash: Digest32,
    pub prev_tx_hash: Digest32,
    pub timestamp: u64,
    pub event: RegistryEvent,
}

impl LedgerEntry {
    /// Receipt handed back to the caller for this entry.
    pub fn receipt(&self) -> Receipt {
        Receipt {
            seq_no: self.seq_no,
            tx_hash: self.tx_hash,
            timestamp: self.timestamp,
        }
    }
}

/// Ledger health status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LedgerHealth {
    /// Ledger is healthy
    Ok,
    /// Ledger is corrupted
    Corrupted {
        /// Last good sequence number
        last_good_seq_no: Option<u64>,
        /// First failing sequence number
        first_bad_seq_no: u64,
        /// Error type description
        error_type: String,
    },
}

impl LedgerHealth {
    /// Check if the ledger is healthy
    pub fn is_ok(&self) -> bool {
        matches!(self, LedgerHealth::Ok)
    }
}

/// Observability metrics for the ledger
#[derive(Debug, Default, Clone)]
pub struct LedgerMetrics {
    /// Total entries appended by this handle
    pub ledger_entries_appended_total: u64,
    /// Total startup checks performed
    pub ledger_startup_checks_total: u64,
    /// Total corruption detections
    pub ledger_corruption_detections_total: u64,
}

/// Chain hash binding an entry to its predecessor.
pub fn compute_tx_hash(
    prev_tx_hash: &Digest32,
    seq_no: u64,
    timestamp: u64,
    payload: &[u8],
) -> Digest32 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(prev_tx_hash.as_bytes());
    hasher.update(&seq_no.to_be_bytes());
    hasher.update(&timestamp.to_be_bytes());
    hasher.update(payload);
    Digest32::from(hasher.finalize())
}

/// Append-only, totally ordered log of registry mutations.
pub trait TransactionLog: Send {
    /// Append `event` applied at `timestamp` directly after `expected_head`.
    ///
    /// `expected_head` is the seq_no of the newest entry the caller knows
    /// about (0 for an empty ledger). When the ledger has moved on, nothing
    /// is written and [`LedgerError::StaleHead`] is returned.
    fn append(
        &mut self,
        expected_head: u64,
        timestamp: u64,
        event: &RegistryEvent,
    ) -> Result<Receipt>;

    /// Entries with `seq_no >= from_seq_no`, oldest first, at most `limit`.
    fn entries_from(&self, from_seq_no: u64, limit: usize) -> Result<Vec<LedgerEntry>>;

    /// Most recent entry, if any.
    fn latest(&self) -> Result<Option<LedgerEntry>>;

    /// Metrics snapshot.
    fn metrics(&self) -> LedgerMetrics;
}

/// In-memory ledger for ephemeral registries and tests.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Vec<LedgerEntry>,
    metrics: LedgerMetrics,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TransactionLog for MemoryLedger {
    fn append(
        &mut self,
        expected_head: u64,
        timestamp: u64,
        event: &RegistryEvent,
    ) -> Result<Receipt> {
        let (head, prev_tx_hash) = match self.entries.last() {
            Some(last) => (last.seq_no, last.tx_hash),
            None => (0, Digest32::ZERO),
        };
        if head != expected_head {
            return Err(LedgerError::StaleHead {
                expected: expected_head,
                actual: head,
            });
        }
        let payload = serde_json::to_vec(event)?;
        let seq_no = head + 1;
        let entry = LedgerEntry {
            seq_no,
            tx_hash: compute_tx_hash(&prev_tx_hash, seq_no, timestamp, &payload),
            prev_tx_hash,
            timestamp,
            event: event.clone(),
        };
        let receipt = entry.receipt();
        self.entries.push(entry);
        self.metrics.ledger_entries_appended_total += 1;
        Ok(receipt)
    }

    fn entries_from(&self, from_seq_no: u64, limit: usize) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.seq_no >= from_seq_no)
            .take(limit)
            .cloned()
            .collect())
    }

    fn latest(&self) -> Result<Option<LedgerEntry>> {
        Ok(self.entries.last().cloned())
    }

    fn metrics(&self) -> LedgerMetrics {
        self.metrics.clone()
    }
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use rusqlite::{params, Connection, OpenFlags, OptionalExtension, TransactionBehavior};
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    /// How long a writer waits for another handle's transaction to finish
    const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
    use tracing::{debug, error, info, warn};

    const SELECT_COLUMNS: &str =
        "SELECT seq_no, tx_hash, prev_tx_hash, timestamp, payload FROM registry_ledger";

    struct RawEntry {
        seq_no: u64,
        tx_hash: Vec<u8>,
        prev_tx_hash: Vec<u8>,
        timestamp: u64,
        payload: String,
    }

    fn read_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawEntry> {
        Ok(RawEntry {
            seq_no: row.get::<_, i64>(0)? as u64,
            tx_hash: row.get(1)?,
            prev_tx_hash: row.get(2)?,
            timestamp: row.get::<_, i64>(3)? as u64,
            payload: row.get(4)?,
        })
    }

    fn to_digest(bytes: &[u8], seq_no: u64) -> Result<Digest32> {
        let arr: [u8; 32] = bytes.try_into().map_err(|_| {
            LedgerError::CorruptionDetected(format!(
                "hash at seq_no {} is {} bytes",
                seq_no,
                bytes.len()
            ))
        })?;
        Ok(Digest32::new(arr))
    }

    fn decode(raw: RawEntry) -> Result<LedgerEntry> {
        let event: RegistryEvent = serde_json::from_str(&raw.payload).map_err(|e| {
            LedgerError::CorruptionDetected(format!(
                "undecodable payload at seq_no {}: {}",
                raw.seq_no, e
            ))
        })?;
        Ok(LedgerEntry {
            seq_no: raw.seq_no,
            tx_hash: to_digest(&raw.tx_hash, raw.seq_no)?,
            prev_tx_hash: to_digest(&raw.prev_tx_hash, raw.seq_no)?,
            timestamp: raw.timestamp,
            event,
        })
    }

    /// Transaction ledger with SQLite backend
    pub struct SqliteLedger {
        conn: Connection,
        health: LedgerHealth,
        metrics: LedgerMetrics,
    }

    impl SqliteLedger {
        /// Create or open a ledger at the specified path
        ///
        /// Runs the startup continuity check; a corrupted ledger fails to open.
        pub fn open(path: impl AsRef<Path>) -> Result<Self> {
            let path = path.as_ref();

            info!(path = %path.display(), "Opening transaction ledger");

            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }

            let conn = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;

            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(BUSY_TIMEOUT)?;

            Self::init_schema(&conn)?;

            let mut ledger = Self {
                conn,
                health: LedgerHealth::Ok,
                metrics: LedgerMetrics::default(),
            };

            ledger.startup_continuity_check()?;

            Ok(ledger)
        }

        fn init_schema(conn: &Connection) -> Result<()> {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS registry_ledger (
                    seq_no INTEGER PRIMARY KEY,
                    tx_hash BLOB NOT NULL UNIQUE,
                    prev_tx_hash BLOB NOT NULL,
                    timestamp INTEGER NOT NULL,
                    event_type TEXT NOT NULL,
                    round_id TEXT,
                    payload TEXT NOT NULL,
                    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
                );

                CREATE INDEX IF NOT EXISTS idx_round_id ON registry_ledger(round_id);
                "#,
            )?;

            Ok(())
        }

        fn latest_raw(conn: &Connection) -> Result<Option<RawEntry>> {
            let sql = format!("{} ORDER BY seq_no DESC LIMIT 1", SELECT_COLUMNS);
            let raw = conn.query_row(&sql, [], read_raw).optional()?;
            Ok(raw)
        }

        /// Verify sequence contiguity, chain linkage and stored hashes.
        pub fn startup_continuity_check(&mut self) -> Result<()> {
            self.metrics.ledger_startup_checks_total += 1;

            let sql = format!("{} ORDER BY seq_no ASC", SELECT_COLUMNS);
            let mut stmt = self.conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], read_raw)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            drop(stmt);

            let mut expected_seq_no = 1u64;
            let mut prev_tx_hash = Digest32::ZERO;
            let count = rows.len();

            for raw in rows {
                let seq_no = raw.seq_no;
                let problem = if seq_no != expected_seq_no {
                    Some(format!(
                        "sequence gap: expected {}, found {}",
                        expected_seq_no, seq_no
                    ))
                } else {
                    let payload = raw.payload.clone();
                    match decode(raw) {
                        Err(e) => Some(e.to_string()),
                        Ok(entry) if entry.prev_tx_hash != prev_tx_hash => Some(format!(
                            "chain break at seq_no {}: expected prev {}, got {}",
                            seq_no, prev_tx_hash, entry.prev_tx_hash
                        )),
                        Ok(entry) => {
                            let recomputed = compute_tx_hash(
                                &prev_tx_hash,
                                seq_no,
                                entry.timestamp,
                                payload.as_bytes(),
                            );
                            if recomputed != entry.tx_hash {
                                Some(format!("hash mismatch at seq_no {}", seq_no))
                            } else {
                                prev_tx_hash = entry.tx_hash;
                                None
                            }
                        }
                    }
                };

                if let Some(error_type) = problem {
                    self.health = LedgerHealth::Corrupted {
                        last_good_seq_no: expected_seq_no.checked_sub(1).filter(|n| *n > 0),
                        first_bad_seq_no: seq_no,
                        error_type: error_type.clone(),
                    };
                    self.metrics.ledger_corruption_detections_total += 1;

                    error!(
                        seq_no = seq_no,
                        error_type = %error_type,
                        "Ledger corruption detected"
                    );

                    return Err(LedgerError::CorruptionDetected(error_type));
                }

                expected_seq_no += 1;
            }

            info!(entry_count = count, "Ledger continuity check passed");

            Ok(())
        }

        /// Get ledger health status
        pub fn health(&self) -> &LedgerHealth {
            &self.health
        }

        /// Get the database path
        pub fn db_path(&self) -> PathBuf {
            PathBuf::from(self.conn.path().unwrap_or(""))
        }

        /// Execute raw SQL for testing purposes only
        ///
        /// **WARNING**: bypasses ledger integrity checks. Only for tests that
        /// simulate corruption.
        #[doc(hidden)]
        pub fn __test_execute_raw_sql(
            &self,
            sql: &str,
            params: &[&dyn rusqlite::ToSql],
        ) -> Result<usize> {
            Ok(self.conn.execute(sql, params)?)
        }
    }

    impl TransactionLog for SqliteLedger {
        fn append(
            &mut self,
            expected_head: u64,
            timestamp: u64,
            event: &RegistryEvent,
        ) -> Result<Receipt> {
            if !self.health.is_ok() {
                warn!("Attempted to append to corrupted ledger");
                return Err(LedgerError::CorruptionDetected(
                    "Cannot append to corrupted ledger".to_string(),
                ));
            }

            let payload = serde_json::to_string(event)?;

            // Take the write lock before reading the head so the check and
            // the insert are one step for every handle on this database
            let tx = self
                .conn
                .transaction_with_behavior(TransactionBehavior::Immediate)?;

            let (head, prev_tx_hash) = match Self::latest_raw(&tx)? {
                Some(last) => (last.seq_no, to_digest(&last.tx_hash, last.seq_no)?),
                None => (0, Digest32::ZERO),
            };
            if head != expected_head {
                debug!(expected_head, head, "Append refused: ledger advanced");
                return Err(LedgerError::StaleHead {
                    expected: expected_head,
                    actual: head,
                });
            }
            let seq_no = head + 1;
            let tx_hash = compute_tx_hash(&prev_tx_hash, seq_no, timestamp, payload.as_bytes());

            tx.execute(
                r#"
                INSERT INTO registry_ledger (
                    seq_no, tx_hash, prev_tx_hash, timestamp, event_type, round_id, payload
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    seq_no as i64,
                    tx_hash.as_bytes().to_vec(),
                    prev_tx_hash.as_bytes().to_vec(),
                    timestamp as i64,
                    event.event_type(),
                    event.round_id().map(|id| id.to_string()),
                    payload,
                ],
            )?;

            tx.commit()?;

            self.metrics.ledger_entries_appended_total += 1;

            debug!(
                seq_no = seq_no,
                event_type = event.event_type(),
                "Entry appended to ledger"
            );

            Ok(Receipt {
                seq_no,
                tx_hash,
                timestamp,
            })
        }

        fn entries_from(&self, from_seq_no: u64, limit: usize) -> Result<Vec<LedgerEntry>> {
            let sql = format!(
                "{} WHERE seq_no >= ?1 ORDER BY seq_no ASC LIMIT ?2",
                SELECT_COLUMNS
            );
            let mut stmt = self.conn.prepare(&sql)?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let rows = stmt
                .query_map(params![from_seq_no as i64, limit], read_raw)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            rows.into_iter().map(decode).collect()
        }

        fn latest(&self) -> Result<Option<LedgerEntry>> {
            Self::latest_raw(&self.conn)?.map(decode).transpose()
        }

        fn metrics(&self) -> LedgerMetrics {
            self.metrics.clone()
        }
    }
}
