//! SQLite-based sync status storage
//!
//! SQLite has no `SELECT ... FOR UPDATE`; the admission critical section is
//! realized as a `BEGIN IMMEDIATE` transaction behind the connection mutex,
//! which serializes writers and gives the same at-most-one-admission
//! guarantee. All other operations are single autocommitted statements.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{AdmissionGuard, SyncStatusStore};
use crate::models::{HealthStatistics, StatsMap, SyncOutcome, SyncStatusRecord, SyncType};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            -- Sync status, one row per user. The CHECK pins the
            -- progress/is_syncing invariant at the storage level.
            CREATE TABLE sync_status (
                user_id TEXT PRIMARY KEY,
                task_id TEXT,
                is_syncing INTEGER NOT NULL DEFAULT 0,
                sync_type TEXT NOT NULL DEFAULT 'incremental',
                started_at TEXT,
                progress_percentage INTEGER NOT NULL DEFAULT 0,
                current_stats TEXT NOT NULL DEFAULT '{}',
                error_message TEXT,
                updated_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                CHECK (
                    (is_syncing = 0 AND progress_percentage IN (0, 100))
                    OR (is_syncing = 1 AND progress_percentage BETWEEN 0 AND 99)
                )
            );

            -- Zombie sweep scans by heartbeat age
            CREATE INDEX idx_sync_status_heartbeat
                ON sync_status(updated_at) WHERE is_syncing = 1;

            -- No two live rows may share a task_id
            CREATE UNIQUE INDEX idx_sync_status_live_task
                ON sync_status(task_id) WHERE is_syncing = 1;
            "#,
        ),
    ])
}

const RECORD_COLUMNS: &str = "user_id, task_id, is_syncing, sync_type, started_at, \
     progress_percentage, current_stats, error_message, updated_at, created_at";

/// SQLite-based implementation of SyncStatusStore
pub struct SqliteSyncStatusStore {
    conn: Mutex<Connection>,
}

impl SqliteSyncStatusStore {
    /// Open (or create) the status database at `db_path`
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// Fully in-memory database, used by tests
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL keeps readers unblocked during writes; NORMAL sync is safe
        // with WAL; the busy timeout bounds the wait behind a concurrent
        // admission from another process.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SyncStatusRecord> {
        let sync_type: String = row.get(3)?;
        let started_at: Option<String> = row.get(4)?;
        let stats_json: String = row.get(6)?;
        let updated_at: String = row.get(8)?;
        let created_at: String = row.get(9)?;

        Ok(SyncStatusRecord {
            user_id: row.get(0)?,
            task_id: row.get(1)?,
            is_syncing: row.get(2)?,
            sync_type: SyncType::parse(&sync_type),
            started_at: started_at.as_deref().and_then(parse_timestamp),
            progress_percentage: row.get::<_, i64>(5)? as u8,
            current_stats: serde_json::from_str(&stats_json).unwrap_or_default(),
            error_message: row.get(7)?,
            updated_at: parse_timestamp(&updated_at).unwrap_or_else(Utc::now),
            created_at: parse_timestamp(&created_at).unwrap_or_else(Utc::now),
        })
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn upsert_in(conn: &Connection, record: &SyncStatusRecord) -> Result<()> {
    let stats_json = serde_json::to_string(&record.current_stats)?;
    // Targeted upsert rather than INSERT OR REPLACE: REPLACE resolves
    // conflicts on the live-task unique index by deleting the other row.
    conn.execute(
        "INSERT INTO sync_status
         (user_id, task_id, is_syncing, sync_type, started_at,
          progress_percentage, current_stats, error_message, updated_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(user_id) DO UPDATE SET
            task_id = excluded.task_id,
            is_syncing = excluded.is_syncing,
            sync_type = excluded.sync_type,
            started_at = excluded.started_at,
            progress_percentage = excluded.progress_percentage,
            current_stats = excluded.current_stats,
            error_message = excluded.error_message,
            updated_at = excluded.updated_at",
        params![
            record.user_id,
            record.task_id,
            record.is_syncing,
            record.sync_type.as_str(),
            record.started_at.map(|t| t.to_rfc3339()),
            record.progress_percentage as i64,
            stats_json,
            record.error_message,
            record.updated_at.to_rfc3339(),
            record.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn get_in(conn: &Connection, user_id: &str) -> Result<Option<SyncStatusRecord>> {
    let record = conn
        .query_row(
            &format!("SELECT {RECORD_COLUMNS} FROM sync_status WHERE user_id = ?"),
            [user_id],
            SqliteSyncStatusStore::record_from_row,
        )
        .optional()?;
    Ok(record)
}

/// Admission section backed by a `BEGIN IMMEDIATE` transaction.
///
/// IMMEDIATE takes the write lock up front, so two admissions cannot both
/// read the old row state and both decide to admit. Rolls back on drop if
/// never committed.
struct SqliteAdmissionGuard<'a> {
    conn: MutexGuard<'a, Connection>,
    user_id: String,
    open: bool,
}

impl AdmissionGuard for SqliteAdmissionGuard<'_> {
    fn current(&mut self) -> Result<Option<SyncStatusRecord>> {
        get_in(&self.conn, &self.user_id)
    }

    fn upsert(&mut self, record: &SyncStatusRecord) -> Result<()> {
        upsert_in(&self.conn, record)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let mut this = *self;
        this.conn.execute_batch("COMMIT")?;
        this.open = false;
        Ok(())
    }
}

impl Drop for SqliteAdmissionGuard<'_> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.conn.execute_batch("ROLLBACK");
        }
    }
}

impl SyncStatusStore for SqliteSyncStatusStore {
    fn begin_admission<'a>(&'a self, user_id: &str) -> Result<Box<dyn AdmissionGuard + 'a>> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch("BEGIN IMMEDIATE")
            .context("Failed to open admission transaction")?;
        Ok(Box::new(SqliteAdmissionGuard {
            conn,
            user_id: user_id.to_string(),
            open: true,
        }))
    }

    fn get(&self, user_id: &str) -> Result<Option<SyncStatusRecord>> {
        let conn = self.conn.lock().unwrap();
        get_in(&conn, user_id)
    }

    fn upsert(&self, record: &SyncStatusRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        upsert_in(&conn, record)
    }

    fn release(&self, task_id: &str, outcome: &SyncOutcome) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let affected = match outcome {
            SyncOutcome::Completed(stats) => {
                let stats_json = serde_json::to_string(stats)?;
                conn.execute(
                    "UPDATE sync_status
                     SET is_syncing = 0, progress_percentage = 100,
                         current_stats = ?, error_message = NULL, updated_at = ?
                     WHERE task_id = ? AND is_syncing = 1",
                    params![stats_json, now, task_id],
                )?
            }
            SyncOutcome::Failed(message) => conn.execute(
                "UPDATE sync_status
                 SET is_syncing = 0, progress_percentage = 0,
                     error_message = ?, updated_at = ?
                 WHERE task_id = ? AND is_syncing = 1",
                params![message, now, task_id],
            )?,
        };
        Ok(affected > 0)
    }

    fn touch_heartbeat(&self, task_id: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let affected = conn.execute(
            "UPDATE sync_status SET updated_at = ? WHERE task_id = ? AND is_syncing = 1",
            params![Utc::now().to_rfc3339(), task_id],
        )?;
        Ok(affected > 0)
    }

    fn update_progress(&self, task_id: &str, percentage: u8, stats: &StatsMap) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let stats_json = serde_json::to_string(stats)?;
        // 100 is reserved for release
        let affected = conn.execute(
            "UPDATE sync_status
             SET progress_percentage = ?, current_stats = ?, updated_at = ?
             WHERE task_id = ? AND is_syncing = 1",
            params![
                percentage.min(99) as i64,
                stats_json,
                Utc::now().to_rfc3339(),
                task_id
            ],
        )?;
        Ok(affected > 0)
    }

    fn find_zombies(
        &self,
        cutoff: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Result<Vec<SyncStatusRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM sync_status
             WHERE is_syncing = 1 AND updated_at < ?
             ORDER BY updated_at ASC LIMIT ?"
        ))?;
        let zombies = stmt
            .query_map(
                params![
                    cutoff.to_rfc3339(),
                    limit.map(|l| l as i64).unwrap_or(-1)
                ],
                Self::record_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(zombies)
    }

    fn statistics(
        &self,
        zombie_cutoff: DateTime<Utc>,
        recent_cutoff: DateTime<Utc>,
    ) -> Result<HealthStatistics> {
        let conn = self.conn.lock().unwrap();
        let count = |sql: &str, args: &[&dyn rusqlite::ToSql]| -> Result<usize> {
            let n: i64 = conn.query_row(sql, args, |row| row.get(0))?;
            Ok(n as usize)
        };

        Ok(HealthStatistics {
            total_records: count("SELECT COUNT(*) FROM sync_status", &[])?,
            active_syncs: count("SELECT COUNT(*) FROM sync_status WHERE is_syncing = 1", &[])?,
            zombie_tasks: count(
                "SELECT COUNT(*) FROM sync_status WHERE is_syncing = 1 AND updated_at < ?",
                &[&zombie_cutoff.to_rfc3339()],
            )?,
            // Unreachable while the CHECK constraint holds; counted anyway
            // so a migrated or hand-edited database still reports honestly.
            inconsistent_records: count(
                "SELECT COUNT(*) FROM sync_status
                 WHERE NOT ((is_syncing = 1 AND progress_percentage BETWEEN 0 AND 99)
                         OR (is_syncing = 0 AND progress_percentage IN (0, 100)))",
                &[],
            )?,
            recent_completions: count(
                "SELECT COUNT(*) FROM sync_status
                 WHERE is_syncing = 0 AND progress_percentage = 100 AND updated_at >= ?",
                &[&recent_cutoff.to_rfc3339()],
            )?,
        })
    }
}
