//! SQLite-based generation storage.

use super::traits::{
    CacheStorage, GenerationHandle, GenerationMeta, StorageStats, StoredEntry,
};
use crate::error::{CoordinatorError, Result};
use crate::models::{RequestKey, ResponseSnapshot};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

const ACTIVE_VERSION_KEY: &str = "active_version";

/// SQLite-backed cache storage.
///
/// Thread-safe via internal mutex on the connection.
#[derive(Clone)]
pub struct SqliteCacheStorage {
    conn: Arc<Mutex<Connection>>,
}

fn db_err(context: &'static str) -> impl FnOnce(rusqlite::Error) -> CoordinatorError {
    move |e| CoordinatorError::Database {
        message: format!("{}: {}", context, e),
        source: Some(e),
    }
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn decode_snapshot(status: i64, headers: &str, body: Vec<u8>) -> Result<ResponseSnapshot> {
    let headers: Vec<(String, String)> = serde_json::from_str(headers)?;
    Ok(ResponseSnapshot {
        status: status as u16,
        headers,
        body: body.into(),
    })
}

impl SqliteCacheStorage {
    /// Open (or create) the cache database at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoordinatorError::io_with_path(e, parent))?;
        }

        let conn = Connection::open(db_path).map_err(db_err("Failed to open cache database"))?;

        // WAL keeps readers unblocked while a write-back is in flight
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err("Failed to set pragmas"))?;

        Self::with_connection(conn)
    }

    /// In-memory storage, gone when dropped.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("Failed to open memory database"))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(CoordinatorError::lock_poisoned)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            -- One row per generation; seq gives creation order
            CREATE TABLE IF NOT EXISTS cache_generations (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                generation TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS cache_entries (
                generation TEXT NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                cached_at TEXT NOT NULL,
                size_bytes INTEGER NOT NULL,
                PRIMARY KEY (generation, method, url)
            );

            -- Unscoped lookups search by request identity alone
            CREATE INDEX IF NOT EXISTS idx_entries_request
                ON cache_entries(method, url);

            -- Registration record (active generation, ...)
            CREATE TABLE IF NOT EXISTS coordinator_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )
        .map_err(db_err("Failed to initialize cache schema"))?;

        Ok(())
    }

    fn generation_exists(conn: &Connection, generation: &str) -> Result<bool> {
        let exists = conn
            .query_row(
                "SELECT 1 FROM cache_generations WHERE generation = ?1",
                params![generation],
                |_| Ok(true),
            )
            .optional()
            .map_err(db_err("Failed to check generation"))?
            .unwrap_or(false);
        Ok(exists)
    }

    fn write_entry(
        conn: &Connection,
        generation: &str,
        key: &RequestKey,
        response: &ResponseSnapshot,
        now: &str,
    ) -> Result<()> {
        let headers = serde_json::to_string(&response.headers)?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO cache_entries
            (generation, method, url, status, headers, body, cached_at, size_bytes)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                generation,
                key.method(),
                key.url(),
                response.status as i64,
                headers,
                &response.body[..],
                now,
                response.size_bytes() as i64
            ],
        )
        .map_err(db_err("Failed to write cache entry"))?;
        Ok(())
    }
}

impl CacheStorage for SqliteCacheStorage {
    fn open(&self, generation: &str) -> Result<GenerationHandle> {
        let conn = self.lock()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO cache_generations (generation, created_at) VALUES (?1, ?2)",
                params![generation, Utc::now().to_rfc3339()],
            )
            .map_err(db_err("Failed to open generation"))?;

        if inserted > 0 {
            debug!("Created cache generation '{}'", generation);
        }

        Ok(GenerationHandle::new(generation))
    }

    fn has(&self, generation: &str) -> Result<bool> {
        let conn = self.lock()?;
        Self::generation_exists(&conn, generation)
    }

    fn put(
        &self,
        handle: &GenerationHandle,
        key: &RequestKey,
        response: &ResponseSnapshot,
    ) -> Result<()> {
        self.put_all(handle, std::slice::from_ref(&(key.clone(), response.clone())))
    }

    fn put_all(
        &self,
        handle: &GenerationHandle,
        entries: &[(RequestKey, ResponseSnapshot)],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to begin transaction"))?;

        // A handle can outlive its generation when eviction wins the race
        if !Self::generation_exists(&tx, handle.name())? {
            return Err(CoordinatorError::GenerationNotFound(handle.name().to_string()));
        }

        let now = Utc::now().to_rfc3339();
        for (key, response) in entries {
            Self::write_entry(&tx, handle.name(), key, response, &now)?;
        }

        tx.commit().map_err(db_err("Failed to commit cache entries"))?;
        Ok(())
    }

    fn match_in(&self, generation: &str, key: &RequestKey) -> Result<Option<ResponseSnapshot>> {
        let conn = self.lock()?;
        let row: Option<(i64, String, Vec<u8>)> = conn
            .query_row(
                r#"
                SELECT status, headers, body
                FROM cache_entries
                WHERE generation = ?1 AND method = ?2 AND url = ?3
                "#,
                params![generation, key.method(), key.url()],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(db_err("Failed to query cache entry"))?;

        row.map(|(status, headers, body)| decode_snapshot(status, &headers, body))
            .transpose()
    }

    fn match_any(&self, key: &RequestKey) -> Result<Option<StoredEntry>> {
        let conn = self.lock()?;
        let row: Option<(String, i64, String, Vec<u8>, String)> = conn
            .query_row(
                r#"
                SELECT e.generation, e.status, e.headers, e.body, e.cached_at
                FROM cache_entries e
                JOIN cache_generations g ON g.generation = e.generation
                WHERE e.method = ?1 AND e.url = ?2
                ORDER BY g.seq ASC
                LIMIT 1
                "#,
                params![key.method(), key.url()],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err("Failed to query cache entry"))?;

        let Some((generation, status, headers, body, cached_at)) = row else {
            return Ok(None);
        };

        Ok(Some(StoredEntry {
            generation,
            key: key.clone(),
            response: decode_snapshot(status, &headers, body)?,
            cached_at: parse_time(&cached_at),
        }))
    }

    fn delete(&self, generation: &str) -> Result<bool> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(db_err("Failed to begin transaction"))?;

        let entries = tx
            .execute(
                "DELETE FROM cache_entries WHERE generation = ?1",
                params![generation],
            )
            .map_err(db_err("Failed to delete generation entries"))?;
        let existed = tx
            .execute(
                "DELETE FROM cache_generations WHERE generation = ?1",
                params![generation],
            )
            .map_err(db_err("Failed to delete generation"))?
            > 0;

        tx.commit().map_err(db_err("Failed to commit generation delete"))?;

        if existed {
            debug!(
                "Deleted generation '{}' with {} entries",
                generation, entries
            );
        }
        Ok(existed)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT generation FROM cache_generations ORDER BY seq ASC")
            .map_err(db_err("Failed to prepare generation query"))?;

        let keys = stmt
            .query_map([], |row| row.get(0))
            .map_err(db_err("Failed to list generations"))?
            .collect::<std::result::Result<Vec<String>, _>>()
            .map_err(db_err("Failed to read generation row"))?;

        Ok(keys)
    }

    fn entry_keys(&self, generation: &str) -> Result<Vec<RequestKey>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT method, url FROM cache_entries WHERE generation = ?1 ORDER BY url, method",
            )
            .map_err(db_err("Failed to prepare entry query"))?;

        let keys = stmt
            .query_map(params![generation], |row| {
                let method: String = row.get(0)?;
                let url: String = row.get(1)?;
                Ok(RequestKey::new(method, url))
            })
            .map_err(db_err("Failed to list entries"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("Failed to read entry row"))?;

        Ok(keys)
    }

    fn stats(&self) -> Result<StorageStats> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT g.generation, g.created_at,
                       COUNT(e.url), COALESCE(SUM(e.size_bytes), 0)
                FROM cache_generations g
                LEFT JOIN cache_entries e ON e.generation = g.generation
                GROUP BY g.generation
                ORDER BY g.seq ASC
                "#,
            )
            .map_err(db_err("Failed to prepare stats query"))?;

        let generations = stmt
            .query_map([], |row| {
                let generation: String = row.get(0)?;
                let created_at: String = row.get(1)?;
                let entry_count: i64 = row.get(2)?;
                let total_size_bytes: i64 = row.get(3)?;
                Ok(GenerationMeta {
                    generation,
                    created_at: parse_time(&created_at),
                    entry_count: entry_count as usize,
                    total_size_bytes: total_size_bytes as u64,
                })
            })
            .map_err(db_err("Failed to query generation stats"))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(db_err("Failed to read generation stats"))?;

        Ok(StorageStats {
            total_entries: generations.iter().map(|g| g.entry_count).sum(),
            total_size_bytes: generations.iter().map(|g| g.total_size_bytes).sum(),
            generations,
        })
    }

    fn active_version(&self) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM coordinator_state WHERE key = ?1",
            params![ACTIVE_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err("Failed to read active version"))
    }

    fn set_active_version(&self, generation: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO coordinator_state (key, value) VALUES (?1, ?2)",
            params![ACTIVE_VERSION_KEY, generation],
        )
        .map_err(db_err("Failed to record active version"))?;
        Ok(())
    }
}
