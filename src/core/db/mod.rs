//! SQLite storage - connection setup, schema and transaction boundaries
//!
//! The database is the single source of truth for parts, lines and audit rows.
//! Mutations run in `BEGIN IMMEDIATE` transactions so the write lock is held
//! from the first validation read until commit: no other writer can slip an edge
//! in between a cycle check and the insert that relies on it. A busy lock waits
//! at most `lock_timeout_ms`, then surfaces as `BomError::Contention`, which is
//! retried a bounded number of times with jittered exponential backoff.

mod serialize;

pub(crate) use serialize::{
    datetime_col, decimal_col, opt_decimal_col, opt_decimal_param, ts,
};

use std::time::Duration;

use rand::Rng;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::{debug, warn};

use crate::core::config::Config;
use crate::core::error::{BomError, BomResult};

/// Current schema version
const SCHEMA_VERSION: i32 = 1;

/// Retry policy for contended writes
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): base × 2^(attempt-1) plus up to base of jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff.as_millis() as u64;
        let exp = base.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
        let jitter = if base == 0 {
            0
        } else {
            rand::rng().random_range(0..=base)
        };
        Duration::from_millis(exp + jitter)
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// An open engine database
pub struct Database {
    conn: Connection,
    retry: RetryPolicy,
}

impl Database {
    /// Open (creating if needed) the database file named in `config`
    pub fn open(config: &Config) -> BomResult<Self> {
        let path = &config.database;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, config)
    }

    /// Private in-memory database (tests, dry runs)
    pub fn open_in_memory(config: &Config) -> BomResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, config)
    }

    fn from_connection(conn: Connection, config: &Config) -> BomResult<Self> {
        configure_connection(&conn, config.lock_timeout())?;
        let db = Self {
            conn,
            retry: RetryPolicy::from(config),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Run `f` inside an IMMEDIATE transaction, committing on `Ok`
    ///
    /// The closure may run more than once when the lock is contended, so it
    /// must not have side effects outside the transaction.
    pub fn write<T, F>(&mut self, op: &'static str, mut f: F) -> BomResult<T>
    where
        F: FnMut(&Transaction<'_>) -> BomResult<T>,
    {
        let mut attempt = 0;
        loop {
            match Self::try_write(&mut self.conn, &mut f) {
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.backoff(attempt);
                    warn!(op, attempt, delay_ms = delay.as_millis() as u64, "write lock contended; retrying");
                    std::thread::sleep(delay);
                }
                Err(err) => {
                    debug!(op, error = %err, "write rolled back");
                    return Err(err);
                }
                Ok(value) => return Ok(value),
            }
        }
    }

    fn try_write<T, F>(conn: &mut Connection, f: &mut F) -> BomResult<T>
    where
        F: FnMut(&Transaction<'_>) -> BomResult<T>,
    {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        // Dropping `tx` on the error path rolls everything back
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run `f` against a consistent snapshot (deferred read transaction)
    pub fn read<T, F>(&self, f: F) -> BomResult<T>
    where
        F: FnOnce(&Connection) -> BomResult<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    fn init_schema(&self) -> BomResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        let version: Option<i32> = self
            .conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
        match version {
            None => {
                self.conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    [SCHEMA_VERSION],
                )?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(BomError::Config(format!(
                    "database schema version {} is newer than this build supports ({})",
                    v, SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }
        Ok(())
    }
}

/// Per-connection pragmas
fn configure_connection(conn: &Connection, lock_timeout: Duration) -> BomResult<()> {
    // WAL lets readers keep a snapshot while a writer holds the lock
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    conn.busy_timeout(lock_timeout)?;
    Ok(())
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS parts (
    id TEXT PRIMARY KEY,
    sku TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    part_type TEXT NOT NULL,
    uom TEXT NOT NULL,
    purchase_uom TEXT NOT NULL,
    conversion_factor TEXT NOT NULL,
    std_cost TEXT,
    baseline_cost TEXT,
    decimal_precision INTEGER NOT NULL,
    lifecycle_status TEXT NOT NULL,
    min_quantity TEXT,
    max_quantity TEXT,
    created TEXT NOT NULL,
    updated TEXT NOT NULL,
    author TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS bom_lines (
    id TEXT PRIMARY KEY,
    parent_part_id TEXT NOT NULL REFERENCES parts(id),
    child_part_id TEXT NOT NULL REFERENCES parts(id),
    qty_per TEXT NOT NULL,
    uom TEXT NOT NULL,
    scrap_pct TEXT NOT NULL,
    sort_order INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    notes TEXT,
    override_reason TEXT CHECK (override_reason IS NULL OR length(trim(override_reason)) > 0),
    created TEXT NOT NULL,
    updated TEXT NOT NULL,
    CHECK (parent_part_id <> child_part_id)
);
CREATE INDEX IF NOT EXISTS idx_lines_parent ON bom_lines(parent_part_id, is_active);
CREATE INDEX IF NOT EXISTS idx_lines_child ON bom_lines(child_part_id, is_active);
CREATE UNIQUE INDEX IF NOT EXISTS idx_lines_active_pair
    ON bom_lines(parent_part_id, child_part_id) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS cost_history (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    part_id TEXT NOT NULL REFERENCES parts(id),
    old_cost TEXT,
    new_cost TEXT NOT NULL,
    change_reason TEXT NOT NULL CHECK (length(trim(change_reason)) > 0),
    effective_date TEXT NOT NULL,
    recorded TEXT NOT NULL,
    author TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cost_history_part ON cost_history(part_id, effective_date);

CREATE TRIGGER IF NOT EXISTS cost_history_no_update
BEFORE UPDATE ON cost_history
BEGIN
    SELECT RAISE(ABORT, 'cost history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS cost_history_no_delete
BEFORE DELETE ON cost_history
BEGIN
    SELECT RAISE(ABORT, 'cost history is append-only');
END;

CREATE TABLE IF NOT EXISTS lifecycle_history (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    part_id TEXT NOT NULL REFERENCES parts(id),
    from_status TEXT NOT NULL,
    to_status TEXT NOT NULL,
    reason TEXT NOT NULL CHECK (length(trim(reason)) > 0),
    overridden INTEGER NOT NULL DEFAULT 0,
    changed TEXT NOT NULL,
    author TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_lifecycle_history_part ON lifecycle_history(part_id);

CREATE TRIGGER IF NOT EXISTS lifecycle_history_no_update
BEFORE UPDATE ON lifecycle_history
BEGIN
    SELECT RAISE(ABORT, 'lifecycle history is append-only');
END;

CREATE TRIGGER IF NOT EXISTS lifecycle_history_no_delete
BEFORE DELETE ON lifecycle_history
BEGIN
    SELECT RAISE(ABORT, 'lifecycle history is append-only');
END;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn memory_db() -> Database {
        Database::open_in_memory(&Config::default()).unwrap()
    }

    #[test]
    fn test_schema_created() {
        let db = memory_db();
        let tables: Vec<String> = db
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .unwrap();
        for expected in ["bom_lines", "cost_history", "lifecycle_history", "parts"] {
            assert!(tables.iter().any(|t| t == expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_reopen_keeps_schema_version() {
        let tmp = tempdir().unwrap();
        let config = Config::for_database(tmp.path().join("nested/bom.db"));
        drop(Database::open(&config).unwrap());
        let db = Database::open(&config).unwrap();
        let version: i32 = db
            .read(|conn| {
                Ok(conn.query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_write_rolls_back_on_error() {
        let mut db = memory_db();
        let result: BomResult<()> = db.write("test", |tx| {
            tx.execute("INSERT INTO schema_version (version) VALUES (99)", [])?;
            Err(BomError::EmptyReason)
        });
        assert!(matches!(result, Err(BomError::EmptyReason)));

        let count: i64 = db
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM schema_version WHERE version = 99",
                    [],
                    |r| r.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_cost_history_is_append_only() {
        let mut db = memory_db();
        db.write("seed", |tx| {
            tx.execute_batch(
                "INSERT INTO parts (id, sku, name, part_type, uom, purchase_uom, conversion_factor,
                    decimal_precision, lifecycle_status, created, updated, author)
                 VALUES ('PRT-01ARZ3NDEKTSV4RRFFQ69G5FAV', 'P1', 'Part', 'PURCHASED', 'EA', 'EA', '1',
                    0, 'ACTIVE', 't', 't', 'test');
                 INSERT INTO cost_history (id, part_id, old_cost, new_cost, change_reason,
                    effective_date, recorded, author)
                 VALUES ('COST-01ARZ3NDEKTSV4RRFFQ69G5FAV', 'PRT-01ARZ3NDEKTSV4RRFFQ69G5FAV',
                    NULL, '1', 'initial', 't', 't', 'test');",
            )?;
            Ok(())
        })
        .unwrap();

        let update: BomResult<()> = db.write("tamper", |tx| {
            tx.execute("UPDATE cost_history SET new_cost = '0'", [])?;
            Ok(())
        });
        assert!(matches!(update, Err(BomError::Database(_))));

        let delete: BomResult<()> = db.write("tamper", |tx| {
            tx.execute("DELETE FROM cost_history", [])?;
            Ok(())
        });
        assert!(matches!(delete, Err(BomError::Database(_))));
    }

    #[test]
    fn test_backoff_grows() {
        let policy = RetryPolicy {
            max_retries: 3,
            base_backoff: Duration::from_millis(10),
        };
        let first = policy.backoff(1);
        let third = policy.backoff(3);
        assert!(first >= Duration::from_millis(10) && first <= Duration::from_millis(20));
        assert!(third >= Duration::from_millis(40) && third <= Duration::from_millis(50));
    }

    #[test]
    fn test_contention_surfaces_after_retries() {
        let tmp = tempdir().unwrap();
        let mut config = Config::for_database(tmp.path().join("bom.db"));
        config.lock_timeout_ms = 20;
        config.max_retries = 1;
        config.retry_backoff_ms = 1;

        let mut db = Database::open(&config).unwrap();

        // A second connection holds the write lock
        let blocker = Connection::open(&config.database).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let result: BomResult<()> = db.write("test", |_tx| Ok(()));
        assert!(matches!(result, Err(BomError::Contention)));

        blocker.execute_batch("ROLLBACK;").unwrap();
        let result: BomResult<()> = db.write("test", |_tx| Ok(()));
        assert!(result.is_ok());
    }
}
