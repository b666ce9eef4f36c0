//! SQLite-based credential store and task outbox

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use rusqlite::{Connection, OptionalExtension, params};
use rusqlite_migration::{M, Migrations};

use super::traits::CredentialStore;
use crate::dispatch::{DispatchSink, QueuedTask};
use crate::models::task::{DEFAULT_PRIORITY, DEFAULT_QUEUE, PROCESS_SINGLE_EMAIL_TASK};
use crate::models::{
    CredentialRecord, DispatchTask, OwnerAddress, OwnerId, PlatformId, Secret, TaskHandle,
    Watermark,
};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Owners and their OAuth credentials
        M::up(
            r#"
            CREATE TABLE persons (
                id TEXT PRIMARY KEY,
                primary_email TEXT NOT NULL UNIQUE,
                primary_name TEXT
            );

            CREATE TABLE oauth_tokens (
                person_id TEXT NOT NULL,
                platform_id TEXT NOT NULL,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                token_expires_at INTEGER NOT NULL,  -- unix seconds
                history_id TEXT,                    -- last processed watermark
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (person_id, platform_id),
                FOREIGN KEY (person_id) REFERENCES persons(id) ON DELETE CASCADE
            );
            "#,
        ),
        // Migration 2: Outbox of dispatch tasks drained by the worker
        M::up(
            r#"
            CREATE TABLE dispatch_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_name TEXT NOT NULL,
                queue TEXT NOT NULL,
                priority INTEGER NOT NULL,
                person_id TEXT NOT NULL,
                platform_id TEXT NOT NULL,
                payload BLOB NOT NULL,  -- zstd compressed JSON
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX idx_dispatch_tasks_queue
                ON dispatch_tasks(queue, priority DESC, id ASC);
            "#,
        ),
    ])
}

/// SQLite-based storage for credentials, watermarks and queued tasks
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        Self::from_connection(conn)
    }

    /// In-memory database, mostly for tests
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(mut conn: Connection) -> Result<Self> {
        // WAL lets the worker drain the outbox while the relay writes.
        // busy_timeout covers concurrent relays on the same file.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    /// Register an owner under its (normalized) primary address
    pub fn register_owner(&self, owner: &OwnerId, address: &str, name: Option<&str>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO persons (id, primary_email, primary_name) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET primary_email = excluded.primary_email,
                                           primary_name = excluded.primary_name",
            params![owner.as_str(), OwnerAddress::new(address).as_str(), name],
        )
        .context("Failed to register owner")?;
        Ok(())
    }

    /// Insert or replace the full credential record, watermark included
    pub fn upsert_credential(&self, record: &CredentialRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO oauth_tokens
             (person_id, platform_id, access_token, refresh_token, token_expires_at, history_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.owner_id.as_str(),
                record.platform_id.as_str(),
                record.access_token.expose(),
                record.refresh_token.expose(),
                record.expires_at.timestamp(),
                record.watermark.as_ref().map(|w| w.as_str()),
            ],
        )
        .context("Failed to store credential")?;
        Ok(())
    }

    fn read_credential(
        conn: &Connection,
        owner: &OwnerId,
        platform: &PlatformId,
    ) -> Result<Option<CredentialRecord>> {
        let row: Option<(String, String, i64, Option<String>)> = conn
            .query_row(
                "SELECT access_token, refresh_token, token_expires_at, history_id
                 FROM oauth_tokens WHERE person_id = ?1 AND platform_id = ?2",
                params![owner.as_str(), platform.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()
            .context("Failed to read credential")?;

        let Some((access_token, refresh_token, expires_at, history_id)) = row else {
            return Ok(None);
        };

        Ok(Some(CredentialRecord {
            owner_id: owner.clone(),
            platform_id: platform.clone(),
            access_token: Secret::new(access_token),
            refresh_token: Secret::new(refresh_token),
            expires_at: timestamp_to_utc(expires_at)?,
            watermark: history_id.filter(|h| !h.is_empty()).map(Watermark::new),
        }))
    }

    /// Oldest tasks of a queue, highest priority first
    pub fn pending_tasks(&self, queue: &str, limit: usize) -> Result<Vec<QueuedTask>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, task_name, queue, priority, person_id, platform_id, payload
             FROM dispatch_tasks WHERE queue = ?1
             ORDER BY priority DESC, id ASC LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![queue, limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u8>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Vec<u8>>(6)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(id, task_name, queue, priority, person_id, platform_id, payload)| {
                let json = zstd::decode_all(payload.as_slice())
                    .with_context(|| format!("Failed to decompress task {}", id))?;
                let message = serde_json::from_slice(&json)
                    .with_context(|| format!("Failed to parse task {} payload", id))?;

                Ok(QueuedTask {
                    handle: task_handle(id),
                    task_name,
                    queue,
                    priority,
                    task: DispatchTask {
                        owner_id: OwnerId::new(person_id),
                        platform_id: PlatformId::new(platform_id),
                        message,
                    },
                })
            })
            .collect()
    }

    /// Remove a processed task; returns whether it existed
    pub fn ack_task(&self, handle: &TaskHandle) -> Result<bool> {
        let id = parse_task_handle(handle)?;
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM dispatch_tasks WHERE id = ?1", [id])?;
        Ok(deleted > 0)
    }

    /// Number of queued tasks across all queues
    pub fn count_tasks(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM dispatch_tasks", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }
}

impl CredentialStore for SqliteStore {
    fn lookup(
        &self,
        address: &OwnerAddress,
        platform: &PlatformId,
    ) -> Result<Option<CredentialRecord>> {
        let conn = self.conn()?;

        let owner: Option<String> = conn
            .query_row(
                "SELECT id FROM persons WHERE primary_email = ?1",
                [address.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up owner")?;

        let Some(owner) = owner.map(OwnerId::new) else {
            warn!("[STORE] Owner not found for email={}", address.short());
            return Ok(None);
        };

        let record = Self::read_credential(&conn, &owner, platform)?;
        if record.is_none() {
            warn!(
                "[STORE] OAuth token not found person_id={} platform_id={}",
                owner.short(),
                platform
            );
        }
        Ok(record)
    }

    fn get_credential(
        &self,
        owner: &OwnerId,
        platform: &PlatformId,
    ) -> Result<Option<CredentialRecord>> {
        let conn = self.conn()?;
        Self::read_credential(&conn, owner, platform)
    }

    fn persist_token(&self, record: &CredentialRecord) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE oauth_tokens
                 SET access_token = ?1, token_expires_at = ?2, updated_at = datetime('now')
                 WHERE person_id = ?3 AND platform_id = ?4",
                params![
                    record.access_token.expose(),
                    record.expires_at.timestamp(),
                    record.owner_id.as_str(),
                    record.platform_id.as_str(),
                ],
            )
            .context("Failed to persist refreshed token")?;

        if updated == 0 {
            bail!("Token record not found for person_id={}", record.owner_id);
        }
        Ok(())
    }

    fn commit_watermark(
        &self,
        owner: &OwnerId,
        platform: &PlatformId,
        watermark: &Watermark,
    ) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE oauth_tokens SET history_id = ?1, updated_at = datetime('now')
                 WHERE person_id = ?2 AND platform_id = ?3",
                params![watermark.as_str(), owner.as_str(), platform.as_str()],
            )
            .context("Failed to update history id")?;

        if updated == 0 {
            bail!("Token record not found for person_id={}", owner);
        }
        debug!(
            "[STORE] history_id={} person_id={}",
            watermark,
            owner.short()
        );
        Ok(())
    }
}

impl DispatchSink for SqliteStore {
    fn submit(&self, task: DispatchTask) -> Result<TaskHandle> {
        let json = serde_json::to_vec(&task.message).context("Failed to serialize message")?;
        // Level 3 = good balance of speed vs compression
        let payload = zstd::encode_all(json.as_slice(), 3).context("Failed to compress message")?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO dispatch_tasks
             (task_name, queue, priority, person_id, platform_id, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                PROCESS_SINGLE_EMAIL_TASK,
                DEFAULT_QUEUE,
                DEFAULT_PRIORITY,
                task.owner_id.as_str(),
                task.platform_id.as_str(),
                payload,
            ],
        )
        .context("Failed to enqueue task")?;

        Ok(task_handle(conn.last_insert_rowid()))
    }
}

fn task_handle(id: i64) -> TaskHandle {
    TaskHandle::new(format!("task-{}", id))
}

fn parse_task_handle(handle: &TaskHandle) -> Result<i64> {
    handle
        .as_str()
        .strip_prefix("task-")
        .and_then(|id| id.parse().ok())
        .with_context(|| format!("Invalid task handle: {}", handle))
}

fn timestamp_to_utc(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .with_context(|| format!("Stored token expiry out of range: {}", secs))
}
